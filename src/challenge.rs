//! Ceremony challenge issuance and single-use consumption
//!
//! A challenge is issued for exactly one ceremony, bound at issuance to
//! the ceremony kind, the optional subject user and the request's
//! rpId/origin, and consumed exactly once. Unknown, already-consumed
//! and expired challenges are indistinguishable to callers.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ring::rand::SecureRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CeremonyError, CeremonyResult};

/// Which ceremony a challenge was issued for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

/// A challenge outstanding for one ceremony
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredChallenge {
    /// Base64URL-encoded random challenge value (32 bytes of entropy)
    pub value: String,
    pub kind: CeremonyKind,
    /// Required for Registration; absent for discoverable authentication
    pub subject_user_id: Option<Uuid>,
    /// rpId bound at issuance; must match exactly at verification
    pub rp_id: String,
    /// Origin bound at issuance; must match exactly at verification
    pub origin: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredChallenge {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Generate a fresh challenge value: 32 bytes (256 bits) from the
/// system secure random generator, Base64URL-encoded.
///
/// # Errors
/// Returns `EntropySourceUnavailable` if the random generator fails.
/// This is fatal and non-retryable at this layer.
pub fn generate_challenge_value() -> CeremonyResult<String> {
    let mut bytes = [0u8; 32];
    ring::rand::SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| CeremonyError::EntropySourceUnavailable)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Store of outstanding ceremony challenges
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Issue a fresh challenge bound to the given ceremony context.
    ///
    /// # Errors
    /// Returns `EntropySourceUnavailable` if the random generator fails.
    async fn issue(
        &self,
        kind: CeremonyKind,
        subject_user_id: Option<Uuid>,
        rp_id: &str,
        origin: &str,
        ttl: Duration,
    ) -> CeremonyResult<StoredChallenge>;

    /// Atomically retrieve and invalidate a challenge.
    ///
    /// At-most-once: of two concurrent consumes for the same value,
    /// exactly one succeeds.
    ///
    /// # Errors
    /// Returns `ChallengeNotFound` if the value is unknown, already
    /// consumed, or expired (indistinguishable by design).
    async fn consume(&self, value: &str) -> CeremonyResult<StoredChallenge>;
}

/// In-memory challenge store
///
/// Consumption is a single `HashMap::remove` under the lock, which is
/// the required atomic check-and-set: there is no window in which two
/// callers can both observe the entry.
#[derive(Default)]
pub struct InMemoryChallengeStore {
    challenges: Mutex<HashMap<String, StoredChallenge>>,
}

impl InMemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding (unconsumed) challenges, expired included
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.challenges
            .lock()
            .expect("challenge store mutex poisoned")
            .len()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn issue(
        &self,
        kind: CeremonyKind,
        subject_user_id: Option<Uuid>,
        rp_id: &str,
        origin: &str,
        ttl: Duration,
    ) -> CeremonyResult<StoredChallenge> {
        let value = generate_challenge_value()?;
        let now = Utc::now();
        let challenge = StoredChallenge {
            value: value.clone(),
            kind,
            subject_user_id,
            rp_id: rp_id.to_string(),
            origin: origin.to_string(),
            expires_at: now + ttl,
        };

        let mut challenges = self
            .challenges
            .lock()
            .expect("challenge store mutex poisoned");
        // Abandoned ceremonies are garbage; sweep them while we hold the lock
        challenges.retain(|_, c| !c.is_expired(now));
        challenges.insert(value, challenge.clone());
        Ok(challenge)
    }

    async fn consume(&self, value: &str) -> CeremonyResult<StoredChallenge> {
        let removed = self
            .challenges
            .lock()
            .expect("challenge store mutex poisoned")
            .remove(value);

        match removed {
            Some(challenge) if !challenge.is_expired(Utc::now()) => Ok(challenge),
            // Expired entries are dropped on the floor: to the caller an
            // expired challenge is exactly as absent as an unknown one
            _ => Err(CeremonyError::ChallengeNotFound),
        }
    }
}
