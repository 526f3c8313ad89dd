//! CBOR and binary payload parsing for `WebAuthn`
//!
//! Decodes the attestation object (a CBOR map of `fmt`, `attStmt` and
//! `authData`) and the authenticator-data binary layout:
//!
//! - 32 bytes: rpId hash (SHA-256)
//! - 1 byte: flags
//! - 4 bytes: signature counter (big-endian)
//! - if the AT flag is set, attested credential data:
//!   - 16 bytes: AAGUID
//!   - 2 bytes: credential ID length (L)
//!   - L bytes: credential ID
//!   - remainder: COSE public key

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::de::from_reader;
use ciborium::value::Value;

use crate::errors::{CeremonyError, CeremonyResult};

/// User present
pub const FLAG_UP: u8 = 0x01;
/// User verified
pub const FLAG_UV: u8 = 0x04;
/// Attested credential data included
pub const FLAG_AT: u8 = 0x40;

/// Decode a Base64URL-no-pad field of a ceremony response
pub(crate) fn decode_b64(field: &str, what: &str) -> CeremonyResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(field)
        .map_err(|_| CeremonyError::MalformedResponse(format!("invalid {what} encoding")))
}

/// Parsed attestation object
#[derive(Debug)]
pub struct AttestationObject {
    /// Attestation statement format identifier ("none", "packed", ...)
    pub fmt: String,
    /// Attestation statement, keyed by text label
    pub att_stmt: Vec<(Value, Value)>,
    /// Raw authenticator data bytes (also the signed message prefix)
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    /// Parse a Base64URL-encoded CBOR attestation object.
    ///
    /// # Errors
    /// Returns `MalformedResponse` if the payload is not valid base64,
    /// not valid CBOR, or missing a required entry.
    pub fn parse(attestation_object_b64: &str) -> CeremonyResult<Self> {
        let attestation_bytes = decode_b64(attestation_object_b64, "attestation object")?;

        let attestation: Value = from_reader(&attestation_bytes[..])
            .map_err(|_| CeremonyError::MalformedResponse("invalid CBOR attestation".into()))?;
        let Value::Map(entries) = attestation else {
            return Err(CeremonyError::MalformedResponse(
                "attestation object is not a map".into(),
            ));
        };

        let mut fmt = None;
        let mut att_stmt = None;
        let mut auth_data = None;
        for (key, value) in entries {
            match (key.as_text(), value) {
                (Some("fmt"), Value::Text(text)) => fmt = Some(text),
                (Some("attStmt"), Value::Map(map)) => att_stmt = Some(map),
                (Some("authData"), Value::Bytes(bytes)) => auth_data = Some(bytes),
                _ => {}
            }
        }

        Ok(Self {
            fmt: fmt.ok_or_else(|| {
                CeremonyError::MalformedResponse("missing fmt in attestation".into())
            })?,
            att_stmt: att_stmt.ok_or_else(|| {
                CeremonyError::MalformedResponse("missing attStmt in attestation".into())
            })?,
            auth_data: auth_data.ok_or_else(|| {
                CeremonyError::MalformedResponse("missing authData in attestation".into())
            })?,
        })
    }

    /// Look up an attestation statement entry by its text label
    #[must_use]
    pub fn statement_entry(&self, label: &str) -> Option<&Value> {
        self.att_stmt
            .iter()
            .find(|(k, _)| k.as_text() == Some(label))
            .map(|(_, v)| v)
    }
}

/// Attested credential data (present when the AT flag is set)
#[derive(Debug)]
pub struct AttestedCredential {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE public key, running to the end of the authenticator data
    pub public_key: Vec<u8>,
}

/// Parsed authenticator data
#[derive(Debug)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredential>,
}

impl AuthenticatorData {
    /// Parse the authenticator-data binary layout.
    ///
    /// # Errors
    /// Returns `MalformedResponse` if the data is truncated.
    pub fn parse(auth_data: &[u8]) -> CeremonyResult<Self> {
        if auth_data.len() < 37 {
            return Err(CeremonyError::MalformedResponse(
                "authenticator data too short".into(),
            ));
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&auth_data[..32]);
        let flags = auth_data[32];
        let sign_count =
            u32::from_be_bytes([auth_data[33], auth_data[34], auth_data[35], auth_data[36]]);

        let attested_credential = if flags & FLAG_AT == 0 {
            None
        } else {
            Some(Self::parse_attested_credential(&auth_data[37..])?)
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    fn parse_attested_credential(data: &[u8]) -> CeremonyResult<AttestedCredential> {
        // 16-byte AAGUID, then the 2-byte credential id length
        if data.len() < 18 {
            return Err(CeremonyError::MalformedResponse(
                "attested credential data too short".into(),
            ));
        }
        let mut aaguid = [0u8; 16];
        aaguid.copy_from_slice(&data[..16]);

        let id_len = usize::from(u16::from_be_bytes([data[16], data[17]]));
        let key_start = 18 + id_len;
        if data.len() <= key_start {
            return Err(CeremonyError::MalformedResponse(
                "attested credential data truncated".into(),
            ));
        }

        Ok(AttestedCredential {
            aaguid,
            credential_id: data[18..key_start].to_vec(),
            public_key: data[key_start..].to_vec(),
        })
    }

    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_UP != 0
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_UV != 0
    }
}
