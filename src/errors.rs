//! Ceremony error types
//!
//! One error kind per distinct verification failure. The kinds are what
//! operational logging and the test suite observe; end users only ever
//! see [`CeremonyError::user_message`], which deliberately does not say
//! which check failed.

/// Errors produced by the ceremony components.
///
/// Every verification-step failure is terminal for that ceremony
/// attempt; retries are a new ceremony with a fresh challenge.
#[derive(Debug, thiserror::Error)]
pub enum CeremonyError {
    /// Response payload could not be decoded (base64, JSON or CBOR)
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Client data "type" tag does not match the ceremony being finished
    #[error("client data type does not match ceremony")]
    CeremonyTypeMismatch,

    /// Client data challenge differs from the issued challenge
    #[error("challenge mismatch")]
    ChallengeMismatch,

    /// Challenge is unknown, already consumed, or expired.
    /// Deliberately conflated: callers must not be able to tell which.
    #[error("challenge not found")]
    ChallengeNotFound,

    /// Client data origin differs from the expected origin
    #[error("origin mismatch")]
    OriginMismatch,

    /// Authenticator data rpIdHash differs from SHA-256 of the expected rpId
    #[error("rpId mismatch")]
    RpIdMismatch,

    /// User-present flag unset, or user-verified flag unset while policy requires it
    #[error("user verification required")]
    UserVerificationRequired,

    /// Attestation statement failed validation for its declared format
    #[error("attestation invalid: {0}")]
    AttestationInvalid(String),

    /// Assertion signature did not verify against the stored public key
    #[error("assertion signature invalid")]
    SignatureInvalid,

    /// Signature counter did not advance: the credential may be cloned.
    /// A security event, not a transient failure; callers must surface
    /// it distinctly and must not record attendance.
    #[error("signature counter did not advance; credential possibly cloned")]
    PossibleCloneDetected,

    /// Credential id already registered, for any user
    #[error("credential already registered")]
    CredentialAlreadyRegistered,

    /// No credential with the given id
    #[error("credential not found")]
    CredentialNotFound,

    /// Username already owns at least one registered credential
    #[error("username taken")]
    UsernameTaken,

    /// The system random generator is unavailable. Fatal, non-retryable.
    #[error("entropy source unavailable")]
    EntropySourceUnavailable,
}

impl CeremonyError {
    /// Whether this error indicates a likely security incident rather
    /// than user error, and must be alerted on distinctly.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(self, CeremonyError::PossibleCloneDetected)
    }

    /// Whether this error signals degraded process health rather than a
    /// per-request condition.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, CeremonyError::EntropySourceUnavailable)
    }

    /// Generic message safe to show an end user. Verification failures
    /// all collapse to the same text so a probing attacker learns
    /// nothing about which check rejected them.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            CeremonyError::UsernameTaken => "username is already taken",
            CeremonyError::CredentialAlreadyRegistered => "this device is already enrolled",
            CeremonyError::EntropySourceUnavailable => "service unavailable",
            _ => "verification failed",
        }
    }
}

pub type CeremonyResult<T> = Result<T, CeremonyError>;
