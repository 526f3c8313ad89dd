//! Registration and assertion verification
//!
//! Both ceremonies share one shape: check the client-data type tag,
//! challenge and origin, check the rpId hash and flags embedded in the
//! authenticator data, then validate the signature and derive the
//! outcome. Every check failure is terminal for the ceremony attempt
//! and carries its own error kind; end-user reporting collapses them
//! (see [`crate::errors::CeremonyError::user_message`]).

use ciborium::value::Value;
use serde::Deserialize;

use super::cbor::{decode_b64, AttestationObject, AuthenticatorData};
use super::crypto::{sha256, validate_cose_key, verify_signature};
use super::types::{AuthenticationResponse, RegistrationResponse, VerifiedRegistration};
use crate::errors::{CeremonyError, CeremonyResult};

/// Client data JSON as the browser serializes it
#[derive(Deserialize)]
struct CollectedClientData {
    #[serde(rename = "type")]
    type_tag: String,
    challenge: String,
    origin: String,
}

const TYPE_CREATE: &str = "webauthn.create";
const TYPE_GET: &str = "webauthn.get";

/// Attestation statement formats this verifier understands, as a tagged
/// variant per format. "none" is a legitimate variant carrying no
/// cryptographic proof (explicitly untrusted attestation), not a
/// fallback error path.
enum AttestationFormat {
    None,
    Packed,
}

impl AttestationFormat {
    fn from_fmt(fmt: &str) -> CeremonyResult<Self> {
        match fmt {
            "none" => Ok(Self::None),
            "packed" => Ok(Self::Packed),
            other => Err(CeremonyError::AttestationInvalid(format!(
                "unsupported attestation format {other}"
            ))),
        }
    }
}

/// Outcome of a successful assertion verification
#[derive(Clone, Copy, Debug)]
pub struct AssertionVerdict {
    /// Counter value to persist; `None` when both the stored and the
    /// reported counter are zero (authenticator without counters)
    pub new_sign_count: Option<u32>,
}

fn parse_client_data(client_data_json_b64: &str) -> CeremonyResult<(Vec<u8>, CollectedClientData)> {
    let bytes = decode_b64(client_data_json_b64, "client data")?;
    let parsed = serde_json::from_slice(&bytes)
        .map_err(|_| CeremonyError::MalformedResponse("invalid client data JSON".into()))?;
    Ok((bytes, parsed))
}

/// Pull the challenge value out of a response's client data, so the
/// coordinator knows which outstanding challenge to consume. Only the
/// decode is trusted at this point; every check still runs afterwards
/// against the consumed challenge.
///
/// # Errors
/// Returns `MalformedResponse` if the client data cannot be decoded.
pub fn extract_client_challenge(client_data_json_b64: &str) -> CeremonyResult<String> {
    let (_, client_data) = parse_client_data(client_data_json_b64)?;
    Ok(client_data.challenge)
}

/// Checks shared by both ceremonies: type tag, challenge and origin,
/// all byte-exact with no normalization.
fn verify_client_data(
    client_data: &CollectedClientData,
    expected_type: &str,
    expected_challenge: &str,
    expected_origin: &str,
) -> CeremonyResult<()> {
    if client_data.type_tag != expected_type {
        return Err(CeremonyError::CeremonyTypeMismatch);
    }
    if client_data.challenge != expected_challenge {
        return Err(CeremonyError::ChallengeMismatch);
    }
    if client_data.origin != expected_origin {
        return Err(CeremonyError::OriginMismatch);
    }
    Ok(())
}

fn verify_binding_and_flags(
    auth_data: &AuthenticatorData,
    expected_rp_id: &str,
    require_user_verification: bool,
) -> CeremonyResult<()> {
    if auth_data.rp_id_hash[..] != sha256(expected_rp_id.as_bytes()) {
        return Err(CeremonyError::RpIdMismatch);
    }
    if !auth_data.user_present() {
        return Err(CeremonyError::UserVerificationRequired);
    }
    if require_user_verification && !auth_data.user_verified() {
        return Err(CeremonyError::UserVerificationRequired);
    }
    Ok(())
}

/// Verify a registration (attestation) response.
///
/// On success returns the credential id, public key and initial counter
/// for the caller to persist. There is no partial success.
///
/// # Errors
/// One of `MalformedResponse`, `CeremonyTypeMismatch`,
/// `ChallengeMismatch`, `OriginMismatch`, `RpIdMismatch`,
/// `UserVerificationRequired` or `AttestationInvalid`, depending on
/// which check rejected the response.
pub fn verify_registration(
    response: &RegistrationResponse,
    expected_challenge: &str,
    expected_origin: &str,
    expected_rp_id: &str,
    require_user_verification: bool,
) -> CeremonyResult<VerifiedRegistration> {
    let (client_data_bytes, client_data) = parse_client_data(&response.response.client_data_json)?;
    verify_client_data(
        &client_data,
        TYPE_CREATE,
        expected_challenge,
        expected_origin,
    )?;

    let attestation = AttestationObject::parse(&response.response.attestation_object)?;
    let auth_data = AuthenticatorData::parse(&attestation.auth_data)?;
    verify_binding_and_flags(&auth_data, expected_rp_id, require_user_verification)?;

    let Some(attested) = auth_data.attested_credential else {
        return Err(CeremonyError::MalformedResponse(
            "registration without attested credential data".into(),
        ));
    };

    // The outer credential id must be the one the authenticator attested
    let raw_id = decode_b64(&response.raw_id, "credential id")?;
    if raw_id != attested.credential_id {
        return Err(CeremonyError::MalformedResponse(
            "credential id does not match attested credential".into(),
        ));
    }

    // Keys assertions could never be verified with must not be stored
    validate_cose_key(&attested.public_key)?;

    match AttestationFormat::from_fmt(&attestation.fmt)? {
        AttestationFormat::None => {}
        AttestationFormat::Packed => {
            verify_packed_statement(
                &attestation,
                &attested.public_key,
                &client_data_bytes,
            )?;
        }
    }

    Ok(VerifiedRegistration {
        credential_id: attested.credential_id,
        public_key: attested.public_key,
        sign_count: auth_data.sign_count,
    })
}

/// Packed self-attestation: the statement's signature covers
/// authData || SHA-256(clientDataJSON) under the credential's own key.
fn verify_packed_statement(
    attestation: &AttestationObject,
    credential_public_key: &[u8],
    client_data_bytes: &[u8],
) -> CeremonyResult<()> {
    let Some(Value::Bytes(sig)) = attestation.statement_entry("sig") else {
        return Err(CeremonyError::AttestationInvalid(
            "packed statement missing sig".into(),
        ));
    };
    if attestation.statement_entry("x5c").is_some() {
        // Full attestation with a certificate chain is out of scope;
        // "none" is the expected format for this deployment
        return Err(CeremonyError::AttestationInvalid(
            "certificate attestation not supported".into(),
        ));
    }

    let mut message =
        Vec::with_capacity(attestation.auth_data.len() + 32);
    message.extend_from_slice(&attestation.auth_data);
    message.extend_from_slice(&sha256(client_data_bytes));

    verify_signature(credential_public_key, &message, sig)
        .map_err(|_| CeremonyError::AttestationInvalid("packed signature invalid".into()))
}

/// Verify an authentication (assertion) response against a stored
/// credential.
///
/// The counter rule: when the stored counter and the reported counter
/// are both zero the authenticator does not implement counters and the
/// assertion is accepted without an update. This is a deliberate,
/// documented relaxation of clone detection for that authenticator
/// class; do not generalize it. A reported counter that fails to
/// advance in any other case is `PossibleCloneDetected` — a security
/// event, not user error.
///
/// # Errors
/// As [`verify_registration`], plus `SignatureInvalid` and
/// `PossibleCloneDetected`.
pub fn verify_assertion(
    response: &AuthenticationResponse,
    stored_public_key: &[u8],
    stored_sign_count: u32,
    expected_challenge: &str,
    expected_origin: &str,
    expected_rp_id: &str,
    require_user_verification: bool,
) -> CeremonyResult<AssertionVerdict> {
    let (client_data_bytes, client_data) = parse_client_data(&response.response.client_data_json)?;
    verify_client_data(&client_data, TYPE_GET, expected_challenge, expected_origin)?;

    let auth_data_bytes = decode_b64(&response.response.authenticator_data, "authenticator data")?;
    let auth_data = AuthenticatorData::parse(&auth_data_bytes)?;
    verify_binding_and_flags(&auth_data, expected_rp_id, require_user_verification)?;

    // Signature covers authenticator data || SHA-256(clientDataJSON)
    let signature_bytes = decode_b64(&response.response.signature, "signature")?;
    let mut message = Vec::with_capacity(auth_data_bytes.len() + 32);
    message.extend_from_slice(&auth_data_bytes);
    message.extend_from_slice(&sha256(&client_data_bytes));
    verify_signature(stored_public_key, &message, &signature_bytes).map_err(|error| {
        // The response is already decoded here; a key that cannot be
        // used is a stored-credential problem, reported as a plain
        // verification failure
        match error {
            CeremonyError::MalformedResponse(_) => CeremonyError::SignatureInvalid,
            other => other,
        }
    })?;

    let new_count = auth_data.sign_count;
    if stored_sign_count == 0 && new_count == 0 {
        // Authenticator does not implement counters
        return Ok(AssertionVerdict {
            new_sign_count: None,
        });
    }
    if new_count > stored_sign_count {
        return Ok(AssertionVerdict {
            new_sign_count: Some(new_count),
        });
    }
    Err(CeremonyError::PossibleCloneDetected)
}
