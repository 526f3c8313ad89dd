//! Ceremony coordination
//!
//! The coordinator drives both ceremonies end to end: it issues bound
//! challenges, consumes them atomically when a response arrives, runs
//! verification, persists the outcome, and — only for a fully verified
//! authentication — appends an attendance record. Verification itself
//! is pure and lives in [`crate::webauthn`]; everything stateful passes
//! through here.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use uuid::Uuid;

use crate::attendance::{AttendanceLog, AttendanceRecord};
use crate::challenge::{CeremonyKind, ChallengeStore, StoredChallenge};
use crate::context::RequestContext;
use crate::credentials::CredentialRepository;
use crate::errors::{CeremonyError, CeremonyResult};
use crate::settings::RollcallSettings;
use crate::webauthn::{
    extract_client_challenge, verify_assertion, verify_registration, AuthenticationOptions,
    AuthenticationResponse, AuthenticatorSelectionCriteria, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RegistrationOptions, RegistrationResponse, RelyingParty,
    UserEntity,
};

/// Who may start a registration ceremony for a username
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnrollmentPolicy {
    /// Registration is open only for usernames that own no credential
    /// yet; a taken username is rejected up front
    NewUser,
    /// Registration adds a device to an existing account; an outer
    /// layer has already vouched for the caller's identity
    AdditionalDevice,
}

/// Outcome of a completed registration ceremony
#[derive(Clone, Debug)]
pub struct RegistrationOutcome {
    pub user_id: Uuid,
    pub username: String,
    pub credential_id: Vec<u8>,
}

/// Outcome of a completed authentication ceremony
#[derive(Clone, Debug)]
pub struct AuthenticationOutcome {
    pub user_id: Uuid,
    pub attendance: AttendanceRecord,
}

/// Drives registration and authentication ceremonies against pluggable
/// stores
pub struct CeremonyCoordinator {
    challenges: Arc<dyn ChallengeStore>,
    credentials: Arc<dyn CredentialRepository>,
    attendance: Arc<dyn AttendanceLog>,
    settings: RollcallSettings,
    enrollment_policy: EnrollmentPolicy,
}

impl CeremonyCoordinator {
    #[must_use]
    pub fn new(
        challenges: Arc<dyn ChallengeStore>,
        credentials: Arc<dyn CredentialRepository>,
        attendance: Arc<dyn AttendanceLog>,
        settings: RollcallSettings,
    ) -> Self {
        Self {
            challenges,
            credentials,
            attendance,
            settings,
            enrollment_policy: EnrollmentPolicy::NewUser,
        }
    }

    #[must_use]
    pub fn with_enrollment_policy(mut self, policy: EnrollmentPolicy) -> Self {
        self.enrollment_policy = policy;
        self
    }

    fn timeout_ms(&self) -> u32 {
        u32::try_from(self.settings.relying_party.timeout_seconds * 1000).unwrap_or(60_000)
    }

    /// Start a registration ceremony for `username`.
    ///
    /// # Errors
    /// Returns `UsernameTaken` under [`EnrollmentPolicy::NewUser`] when
    /// the username already owns a credential, and
    /// `EntropySourceUnavailable` if challenge generation fails.
    pub async fn begin_registration(
        &self,
        username: &str,
        context: &RequestContext,
    ) -> CeremonyResult<RegistrationOptions> {
        if self.enrollment_policy == EnrollmentPolicy::NewUser {
            if let Some((_, existing)) = self.credentials.find_by_username(username).await {
                if !existing.is_empty() {
                    return Err(CeremonyError::UsernameTaken);
                }
            }
        }

        let user = self.credentials.find_or_create_user(username).await;
        let challenge = self
            .challenges
            .issue(
                CeremonyKind::Registration,
                Some(user.id),
                &context.rp_id,
                &context.origin,
                self.settings.challenge_ttl(),
            )
            .await?;
        log::debug!("Issued registration challenge for user {}", user.username);

        Ok(RegistrationOptions {
            challenge: challenge.value,
            rp: RelyingParty {
                id: context.rp_id.clone(),
                name: self.settings.relying_party.name.clone(),
            },
            user: UserEntity {
                id: URL_SAFE_NO_PAD.encode(user.id.as_bytes()),
                name: user.username.clone(),
                display_name: user.username,
            },
            public_key_params: vec![
                PublicKeyCredentialParameters {
                    r#type: "public-key".to_string(),
                    alg: -7, // ES256
                },
                PublicKeyCredentialParameters {
                    r#type: "public-key".to_string(),
                    alg: -257, // RS256
                },
            ],
            timeout: self.timeout_ms(),
            attestation: "none".to_string(),
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: self
                    .settings
                    .relying_party
                    .authenticator_attachment
                    .clone(),
                resident_key: "required".to_string(),
                user_verification: self.settings.relying_party.user_verification.clone(),
            },
        })
    }

    /// Complete a registration ceremony and persist the new credential.
    ///
    /// # Errors
    /// `ChallengeNotFound` when the challenge is unknown, consumed or
    /// expired; `CeremonyTypeMismatch` when it was issued for the other
    /// ceremony; `RpIdMismatch`/`OriginMismatch` when the request
    /// arrives under a different context than the challenge was bound
    /// to; any verification error from [`verify_registration`];
    /// `CredentialAlreadyRegistered` when the attested credential id
    /// already exists.
    pub async fn finish_registration(
        &self,
        response: &RegistrationResponse,
        context: &RequestContext,
    ) -> CeremonyResult<RegistrationOutcome> {
        let challenge = self
            .consume_challenge(
                &response.response.client_data_json,
                CeremonyKind::Registration,
                context,
            )
            .await?;
        let Some(user_id) = challenge.subject_user_id else {
            // Issuance always binds registration challenges to a subject;
            // a stored challenge without one is corrupt, not merely absent
            return Err(CeremonyError::MalformedResponse(
                "registration challenge missing subject user".into(),
            ));
        };

        let verified = verify_registration(
            response,
            &challenge.value,
            &challenge.origin,
            &challenge.rp_id,
            self.settings.require_user_verification(),
        )?;

        let Some(user) = self.credentials.find_user(user_id).await else {
            return Err(CeremonyError::MalformedResponse(
                "registration challenge bound to unknown user".into(),
            ));
        };
        self.credentials
            .insert(
                user_id,
                &verified.credential_id,
                &verified.public_key,
                verified.sign_count,
            )
            .await?;
        log::info!(
            "Registered credential {} for user {user_id}",
            URL_SAFE_NO_PAD.encode(&verified.credential_id)
        );

        Ok(RegistrationOutcome {
            user_id,
            username: user.username,
            credential_id: verified.credential_id,
        })
    }

    /// Start an authentication ceremony.
    ///
    /// With a username the options list that user's credentials and the
    /// challenge is bound to them; without one the ceremony relies on
    /// discoverable credentials and any registered credential may
    /// answer.
    ///
    /// # Errors
    /// `CredentialNotFound` when a given username is unknown or owns no
    /// credential; `EntropySourceUnavailable` if challenge generation
    /// fails.
    pub async fn begin_authentication(
        &self,
        username: Option<&str>,
        context: &RequestContext,
    ) -> CeremonyResult<AuthenticationOptions> {
        let (subject, allow_credentials) = match username {
            Some(username) => {
                let Some((user, records)) = self.credentials.find_by_username(username).await
                else {
                    return Err(CeremonyError::CredentialNotFound);
                };
                if records.is_empty() {
                    return Err(CeremonyError::CredentialNotFound);
                }
                let descriptors = records
                    .iter()
                    .map(|record| PublicKeyCredentialDescriptor {
                        r#type: "public-key".to_string(),
                        id: URL_SAFE_NO_PAD.encode(&record.credential_id),
                    })
                    .collect();
                (Some(user.id), descriptors)
            }
            None => (None, Vec::new()),
        };

        let challenge = self
            .challenges
            .issue(
                CeremonyKind::Authentication,
                subject,
                &context.rp_id,
                &context.origin,
                self.settings.challenge_ttl(),
            )
            .await?;

        Ok(AuthenticationOptions {
            challenge: challenge.value,
            timeout: self.timeout_ms(),
            rp_id: context.rp_id.clone(),
            allow_credentials,
            user_verification: self.settings.relying_party.user_verification.clone(),
        })
    }

    /// Complete an authentication ceremony: verify the assertion,
    /// persist the signature counter, and append one attendance record
    /// for `session_id`.
    ///
    /// The attendance append happens strictly after the counter update
    /// commits; a clone-suspect assertion never produces a record.
    ///
    /// # Errors
    /// `ChallengeNotFound`, `CeremonyTypeMismatch`,
    /// `CredentialNotFound`, the verification errors of
    /// [`verify_assertion`], or `PossibleCloneDetected` from either the
    /// counter check or a lost counter-update race.
    pub async fn finish_authentication(
        &self,
        response: &AuthenticationResponse,
        context: &RequestContext,
        session_id: &str,
    ) -> CeremonyResult<AuthenticationOutcome> {
        let challenge = self
            .consume_challenge(
                &response.response.client_data_json,
                CeremonyKind::Authentication,
                context,
            )
            .await?;

        let credential_id = crate::webauthn::decode_b64(&response.raw_id, "credential id")?;
        let Some(credential) = self.credentials.find_by_id(&credential_id).await else {
            return Err(CeremonyError::CredentialNotFound);
        };
        // A challenge bound to a subject only accepts that subject's keys
        if challenge
            .subject_user_id
            .is_some_and(|subject| subject != credential.owner_id)
        {
            return Err(CeremonyError::CredentialNotFound);
        }

        let verdict = verify_assertion(
            response,
            &credential.public_key,
            credential.sign_count,
            &challenge.value,
            &challenge.origin,
            &challenge.rp_id,
            self.settings.require_user_verification(),
        )
        .inspect_err(|error| {
            if matches!(error, CeremonyError::PossibleCloneDetected) {
                log::warn!(
                    "Signature counter did not advance for credential {}; possible cloned authenticator",
                    URL_SAFE_NO_PAD.encode(&credential_id)
                );
            }
        })?;

        if let Some(new_count) = verdict.new_sign_count {
            self.credentials
                .update_sign_count(&credential_id, credential.sign_count, new_count)
                .await
                .inspect_err(|error| {
                    if matches!(error, CeremonyError::PossibleCloneDetected) {
                        log::warn!(
                            "Lost counter-update race for credential {}; possible cloned authenticator",
                            URL_SAFE_NO_PAD.encode(&credential_id)
                        );
                    }
                })?;
        }

        let record = AttendanceRecord {
            user_id: credential.owner_id,
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        };
        self.attendance.append(record.clone()).await;
        log::info!(
            "Recorded attendance for user {} in session {session_id}",
            credential.owner_id
        );

        Ok(AuthenticationOutcome {
            user_id: credential.owner_id,
            attendance: record,
        })
    }

    /// Consume the challenge named by a response's client data and
    /// check it was issued for the expected ceremony under the same
    /// relying-party context the finish request arrived with.
    async fn consume_challenge(
        &self,
        client_data_json_b64: &str,
        expected_kind: CeremonyKind,
        context: &RequestContext,
    ) -> CeremonyResult<StoredChallenge> {
        let value = extract_client_challenge(client_data_json_b64)?;
        let challenge = self.challenges.consume(&value).await?;
        if challenge.kind != expected_kind {
            return Err(CeremonyError::CeremonyTypeMismatch);
        }
        if challenge.rp_id != context.rp_id {
            return Err(CeremonyError::RpIdMismatch);
        }
        if challenge.origin != context.origin {
            return Err(CeremonyError::OriginMismatch);
        }
        Ok(challenge)
    }
}
