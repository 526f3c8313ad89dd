//! Users and registered credentials
//!
//! Durable store of users and their passkey credentials. Credential ids
//! are globally unique across all users: a physical authenticator key
//! must never be attachable to two identities. The signature counter is
//! persisted through a compare-and-swap so that two authentications
//! racing on a cloned credential cannot both be accepted.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CeremonyError, CeremonyResult};

/// Identity anchor. Owns zero or more credentials exclusively.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// Opaque stable identifier, never reused
    pub id: Uuid,
    /// Unique, immutable lookup key
    pub username: String,
}

/// One registered authenticator key
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CredentialRecord {
    /// Raw credential id bytes, globally unique
    pub credential_id: Vec<u8>,
    /// COSE-encoded public key, immutable once stored
    pub public_key: Vec<u8>,
    /// Monotonically non-decreasing; 0 is both a valid initial value
    /// and the "counter not supported" sentinel
    pub sign_count: u32,
    /// Owning user (lookup back-reference, not an ownership edge)
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Store of users and registered credentials
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Byte-exact credential lookup
    async fn find_by_id(&self, credential_id: &[u8]) -> Option<CredentialRecord>;

    /// A user and all credentials they own
    async fn find_by_username(&self, username: &str) -> Option<(User, Vec<CredentialRecord>)>;

    /// Look a user up by their stable id
    async fn find_user(&self, user_id: Uuid) -> Option<User>;

    /// Idempotent upsert: returns the existing user for the username or
    /// creates one. Centralizes user resolution so the `UsernameTaken`
    /// decision lives in exactly one call site (the coordinator).
    async fn find_or_create_user(&self, username: &str) -> User;

    /// Register a new credential.
    ///
    /// # Errors
    /// Returns `CredentialAlreadyRegistered` if the credential id
    /// already exists, for any user.
    async fn insert(
        &self,
        owner_id: Uuid,
        credential_id: &[u8],
        public_key: &[u8],
        sign_count: u32,
    ) -> CeremonyResult<()>;

    /// Persist a new signature counter via compare-and-swap on the
    /// previously observed value. The caller has already validated that
    /// `new_count` is an acceptable successor; this only persists.
    ///
    /// # Errors
    /// Returns `CredentialNotFound` if the credential is absent, and
    /// `PossibleCloneDetected` if the stored counter no longer equals
    /// `expected_count` (a concurrent authentication won the race).
    async fn update_sign_count(
        &self,
        credential_id: &[u8],
        expected_count: u32,
        new_count: u32,
    ) -> CeremonyResult<()>;
}

#[derive(Default)]
struct RepositoryInner {
    users: HashMap<Uuid, User>,
    usernames: HashMap<String, Uuid>,
    credentials: HashMap<Vec<u8>, CredentialRecord>,
}

/// In-memory credential repository
#[derive(Default)]
pub struct InMemoryCredentialRepository {
    inner: Mutex<RepositoryInner>,
}

impl InMemoryCredentialRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a user up by id
    #[must_use]
    pub fn user_by_id(&self, id: Uuid) -> Option<User> {
        self.inner
            .lock()
            .expect("credential repository mutex poisoned")
            .users
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn find_by_id(&self, credential_id: &[u8]) -> Option<CredentialRecord> {
        self.inner
            .lock()
            .expect("credential repository mutex poisoned")
            .credentials
            .get(credential_id)
            .cloned()
    }

    async fn find_by_username(&self, username: &str) -> Option<(User, Vec<CredentialRecord>)> {
        let inner = self
            .inner
            .lock()
            .expect("credential repository mutex poisoned");
        let user_id = *inner.usernames.get(username)?;
        let user = inner.users.get(&user_id)?.clone();
        let credentials = inner
            .credentials
            .values()
            .filter(|c| c.owner_id == user_id)
            .cloned()
            .collect();
        Some((user, credentials))
    }

    async fn find_user(&self, user_id: Uuid) -> Option<User> {
        self.user_by_id(user_id)
    }

    async fn find_or_create_user(&self, username: &str) -> User {
        let mut inner = self
            .inner
            .lock()
            .expect("credential repository mutex poisoned");
        if let Some(user_id) = inner.usernames.get(username) {
            return inner.users[user_id].clone();
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        inner.usernames.insert(username.to_string(), user.id);
        inner.users.insert(user.id, user.clone());
        user
    }

    async fn insert(
        &self,
        owner_id: Uuid,
        credential_id: &[u8],
        public_key: &[u8],
        sign_count: u32,
    ) -> CeremonyResult<()> {
        let mut inner = self
            .inner
            .lock()
            .expect("credential repository mutex poisoned");
        if inner.credentials.contains_key(credential_id) {
            return Err(CeremonyError::CredentialAlreadyRegistered);
        }
        inner.credentials.insert(
            credential_id.to_vec(),
            CredentialRecord {
                credential_id: credential_id.to_vec(),
                public_key: public_key.to_vec(),
                sign_count,
                owner_id,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update_sign_count(
        &self,
        credential_id: &[u8],
        expected_count: u32,
        new_count: u32,
    ) -> CeremonyResult<()> {
        let mut inner = self
            .inner
            .lock()
            .expect("credential repository mutex poisoned");
        let record = inner
            .credentials
            .get_mut(credential_id)
            .ok_or(CeremonyError::CredentialNotFound)?;
        // Compare-and-swap: losing the race means another assertion for
        // this supposedly unique authenticator was just accepted
        if record.sign_count != expected_count {
            return Err(CeremonyError::PossibleCloneDetected);
        }
        record.sign_count = new_count;
        Ok(())
    }
}
