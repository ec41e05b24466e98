//! Session preferences: an allow-listed key→value map, validated per key.
//! `spec.md` §4.7.

use std::collections::HashMap;

use crate::error::{Error, Result};

const ALLOWED_THEMES: [&str; 3] = ["light", "dark", "system"];

/// Validated session preferences. Keys outside the allow-list, or values
/// that fail their key's validator, are rejected at `set` time rather than
/// stored and silently ignored later.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    values: HashMap<String, String>,
}

impl Preferences {
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate(key, value)?;
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        "theme" => {
            if ALLOWED_THEMES.contains(&value) {
                Ok(())
            } else {
                Err(Error::auth(format!("invalid theme preference: {value}")))
            }
        }
        "locale" | "timezone" => {
            if value.is_empty() {
                Err(Error::auth(format!("{key} preference must not be empty")))
            } else {
                Ok(())
            }
        }
        other => Err(Error::auth(format!("unknown preference key: {other}"))),
    }
}
