//! Name-keyed registry of active supervisors, per `spec.md` §4.4.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Supervisor, WorkerStatus};
use crate::error::{Error, Result};

/// Aggregated health across every registered supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub healthy: usize,
    pub stuck: usize,
    pub restarting: usize,
    pub failed: usize,
    pub is_healthy: bool,
}

/// Read-write-locked map of supervisors, keyed by worker name.
#[derive(Default)]
pub struct Registry {
    supervisors: RwLock<HashMap<String, Arc<Supervisor>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, supervisor: Arc<Supervisor>) -> Result<()> {
        let mut guard = self.supervisors.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.contains_key(supervisor.name()) {
            return Err(Error::programmer_error(format!(
                "supervisor already registered: {}",
                supervisor.name()
            )));
        }
        guard.insert(supervisor.name().to_owned(), supervisor);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Supervisor>> {
        let mut guard = self.supervisors.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Supervisor>> {
        let guard = self.supervisors.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(name).cloned()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<Supervisor>> {
        let guard = self.supervisors.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.values().cloned().collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        let guard = self.supervisors.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.len()
    }

    #[must_use]
    pub fn summary(&self) -> Summary {
        let statuses: Vec<WorkerStatus> = self.all().iter().map(|s| s.status()).collect();
        let total = statuses.len();
        let healthy = statuses.iter().filter(|s| s.state.is_healthy()).count();
        let stuck = statuses
            .iter()
            .filter(|s| s.state == super::WorkerState::Stuck)
            .count();
        let restarting = statuses
            .iter()
            .filter(|s| s.state == super::WorkerState::Restarting)
            .count();
        let failed = statuses
            .iter()
            .filter(|s| s.state == super::WorkerState::Failed)
            .count();
        Summary {
            total,
            healthy,
            stuck,
            restarting,
            failed,
            is_healthy: total > 0 && healthy == total,
        }
    }
}
