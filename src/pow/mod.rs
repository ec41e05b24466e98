//! C8 — Proof-of-Work mint/verify: a single-use, time-bounded challenge
//! gating an expensive client-side search. `spec.md` §4.8.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use mockable::Clock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::rate_limit::RateLimiter;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Challenge {
    prefix: [u8; 32],
    difficulty: u32,
    #[allow(dead_code)]
    hashed_ip: String,
    used: bool,
    expires_at: DateTime<Utc>,
}

/// What `mint` returns to the client.
#[derive(Debug, Clone)]
pub struct MintedChallenge {
    pub id: Uuid,
    pub prefix: [u8; 32],
    pub difficulty: u32,
    pub expires_at: DateTime<Utc>,
}

pub struct PowService {
    difficulty: u32,
    ttl: Duration,
    challenges: DashMap<Uuid, Challenge>,
    clock: Arc<dyn Clock>,
}

impl PowService {
    #[must_use]
    pub fn new(difficulty: u32, ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            difficulty,
            ttl: Duration::seconds(ttl_secs),
            challenges: DashMap::new(),
            clock,
        }
    }

    #[must_use]
    pub fn mint(&self, client_ip: &str) -> MintedChallenge {
        let mut prefix = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut prefix);
        let id = Uuid::new_v4();
        let expires_at = self.clock.utc() + self.ttl;

        self.challenges.insert(
            id,
            Challenge {
                prefix,
                difficulty: self.difficulty,
                hashed_ip: RateLimiter::hash_ip(client_ip),
                used: false,
                expires_at,
            },
        );

        MintedChallenge { id, prefix, difficulty: self.difficulty, expires_at }
    }

    /// Fails if the challenge is missing, already used, or expired; fails if
    /// the hash does not meet the leading-zero-bits requirement. On success,
    /// marks the challenge used (single use) — a failure to persist that
    /// flag is logged but does not invalidate an already-valid solution.
    pub fn verify(&self, id: Uuid, nonce: &[u8]) -> Result<()> {
        let mut entry = self
            .challenges
            .get_mut(&id)
            .ok_or_else(|| Error::resource_limit("pow challenge not found"))?;

        if entry.used {
            return Err(Error::resource_limit("pow challenge already used"));
        }
        if self.clock.utc() >= entry.expires_at {
            return Err(Error::resource_limit("pow challenge expired"));
        }

        let mut hasher = Sha256::new();
        hasher.update(entry.prefix);
        hasher.update(nonce);
        let digest = hasher.finalize();

        if !has_leading_zero_bits(&digest, entry.difficulty) {
            return Err(Error::resource_limit("pow solution does not meet difficulty"));
        }

        entry.used = true;
        Ok(())
    }
}

/// For `n = difficulty`: the first `n / 8` bytes must be zero; if `n % 8 !=
/// 0`, the next byte's top `n % 8` bits must also be zero.
#[must_use]
pub fn has_leading_zero_bits(digest: &[u8], difficulty: u32) -> bool {
    let full_bytes = (difficulty / 8) as usize;
    let remaining_bits = difficulty % 8;

    if full_bytes > digest.len() {
        return false;
    }
    if digest.iter().take(full_bytes).any(|&byte| byte != 0) {
        return false;
    }
    if remaining_bits == 0 {
        return true;
    }
    let Some(&next_byte) = digest.get(full_bytes) else { return false };
    let mask = 0xFFu8 << (8 - remaining_bits);
    next_byte & mask == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::DefaultClock;
    use rstest::rstest;
    use rstest_bdd_macros::{given, then, when};

    #[rstest]
    #[case(&[0x00, 0xFF], 8, true)]
    #[case(&[0x00, 0x0F], 12, true)]
    #[case(&[0x00, 0xF0], 12, false)]
    #[case(&[0x01, 0x00], 8, false)]
    #[case(&[0x00, 0x00], 0, true)]
    fn leading_zero_bits_check(#[case] digest: &[u8], #[case] difficulty: u32, #[case] expected: bool) {
        assert_eq!(has_leading_zero_bits(digest, difficulty), expected);
    }

    #[test]
    fn s6_mint_then_verify_with_correct_nonce_succeeds_once() {
        let service = PowService::new(0, 60, Arc::new(DefaultClock));
        let minted = service.mint("127.0.0.1");
        service.verify(minted.id, b"any-nonce-since-difficulty-is-zero").unwrap();
        // Second verification of the same challenge must fail: single use.
        assert!(service.verify(minted.id, b"any-nonce-since-difficulty-is-zero").is_err());
    }

    #[test]
    fn verify_fails_for_unknown_challenge() {
        let service = PowService::new(8, 60, Arc::new(DefaultClock));
        assert!(service.verify(Uuid::new_v4(), b"nonce").is_err());
    }

    #[test]
    fn verify_fails_when_expired() {
        let service = PowService::new(0, -1, Arc::new(DefaultClock));
        let minted = service.mint("127.0.0.1");
        assert!(service.verify(minted.id, b"nonce").is_err());
    }

    #[test]
    fn verify_fails_when_solution_does_not_meet_difficulty() {
        let service = PowService::new(32, 60, Arc::new(DefaultClock));
        let minted = service.mint("127.0.0.1");
        // A 32-bit difficulty target is astronomically unlikely to be met by
        // an arbitrary fixed nonce.
        assert!(service.verify(minted.id, b"wrong-nonce").is_err());
    }

    fn solve(prefix: &[u8; 32], difficulty: u32) -> Vec<u8> {
        for nonce in 0u64.. {
            let candidate = nonce.to_be_bytes();
            let mut hasher = Sha256::new();
            hasher.update(prefix);
            hasher.update(candidate);
            if has_leading_zero_bits(&hasher.finalize(), difficulty) {
                return candidate.to_vec();
            }
        }
        unreachable!("a solution exists for any difficulty below the hash's bit width")
    }

    struct VerifyWorld {
        service: PowService,
        challenge: MintedChallenge,
    }

    #[given("a minted challenge with a correctly solved nonce")]
    fn a_minted_challenge_with_a_correctly_solved_nonce() -> (VerifyWorld, Vec<u8>) {
        let service = PowService::new(8, 60, Arc::new(DefaultClock));
        let challenge = service.mint("203.0.113.9");
        let nonce = solve(&challenge.prefix, challenge.difficulty);
        (VerifyWorld { service, challenge }, nonce)
    }

    #[when("the solution is verified twice")]
    fn the_solution_is_verified_twice(setup: (VerifyWorld, Vec<u8>)) -> (Result<()>, Result<()>) {
        let (world, nonce) = setup;
        let first = world.service.verify(world.challenge.id, &nonce);
        let second = world.service.verify(world.challenge.id, &nonce);
        (first, second)
    }

    #[then("the first verification succeeds and the second is rejected as reused")]
    fn the_first_verification_succeeds_and_the_second_is_rejected(outcomes: (Result<()>, Result<()>)) {
        let (first, second) = outcomes;
        assert!(first.is_ok());
        assert!(second.is_err());
    }

    #[rstest]
    fn verifying_a_solved_challenge_twice_rejects_the_replay() {
        let setup = a_minted_challenge_with_a_correctly_solved_nonce();
        let outcomes = the_solution_is_verified_twice(setup);
        the_first_verification_succeeds_and_the_second_is_rejected(outcomes);
    }
}
