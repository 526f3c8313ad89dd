//! Shared test fixtures: an in-process authenticator that produces
//! well-formed ceremony responses with real ES256 signatures.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::value::Value;
use ring::signature::{self, KeyPair};
use std::sync::Arc;

use rollcall::attendance::{AttendanceLog, InMemoryAttendanceLog};
use rollcall::challenge::InMemoryChallengeStore;
use rollcall::credentials::{CredentialRepository, InMemoryCredentialRepository};
use rollcall::webauthn::{
    sha256, AuthenticationResponse, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, RegistrationResponse, FLAG_AT, FLAG_UP, FLAG_UV,
};
use rollcall::{CeremonyCoordinator, RequestContext, RollcallSettings};

pub const RP_ID: &str = "example.com";
pub const ORIGIN: &str = "https://example.com";

pub fn context() -> RequestContext {
    RequestContext::new(RP_ID, ORIGIN)
}

pub struct Harness {
    pub coordinator: CeremonyCoordinator,
    pub credentials: Arc<InMemoryCredentialRepository>,
    pub attendance: Arc<InMemoryAttendanceLog>,
}

pub fn harness() -> Harness {
    let credentials = Arc::new(InMemoryCredentialRepository::new());
    let attendance = Arc::new(InMemoryAttendanceLog::new());
    let coordinator = CeremonyCoordinator::new(
        Arc::new(InMemoryChallengeStore::new()),
        Arc::clone(&credentials) as Arc<dyn CredentialRepository>,
        Arc::clone(&attendance) as Arc<dyn AttendanceLog>,
        RollcallSettings::default(),
    );
    Harness {
        coordinator,
        credentials,
        attendance,
    }
}

/// A software passkey: one P-256 key pair behind one credential id
pub struct Authenticator {
    key_pair: signature::EcdsaKeyPair,
    rng: ring::rand::SystemRandom,
    credential_id: Vec<u8>,
}

impl Authenticator {
    pub fn new(credential_id: &[u8]) -> Self {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = signature::EcdsaKeyPair::generate_pkcs8(
            &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
            &rng,
        )
        .unwrap();
        let key_pair = signature::EcdsaKeyPair::from_pkcs8(
            &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
            pkcs8.as_ref(),
            &rng,
        )
        .unwrap();
        Self {
            key_pair,
            rng,
            credential_id: credential_id.to_vec(),
        }
    }

    fn cose_public_key(&self) -> Vec<u8> {
        let point = self.key_pair.public_key().as_ref();
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())), // kty: EC2
            (Value::Integer(3.into()), Value::Integer((-7).into())), // alg: ES256
            (Value::Integer((-1).into()), Value::Integer(1.into())), // crv: P-256
            (
                Value::Integer((-2).into()),
                Value::Bytes(point[1..33].to_vec()),
            ),
            (
                Value::Integer((-3).into()),
                Value::Bytes(point[33..65].to_vec()),
            ),
        ]);
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&map, &mut buf).unwrap();
        buf
    }

    fn auth_data(&self, flags: u8, sign_count: u32, with_credential: bool) -> Vec<u8> {
        let mut data = sha256(RP_ID.as_bytes());
        data.push(flags);
        data.extend_from_slice(&sign_count.to_be_bytes());
        if with_credential {
            data.extend_from_slice(&[0u8; 16]); // AAGUID
            data.extend_from_slice(
                &u16::try_from(self.credential_id.len())
                    .unwrap()
                    .to_be_bytes(),
            );
            data.extend_from_slice(&self.credential_id);
            data.extend_from_slice(&self.cose_public_key());
        }
        data
    }

    fn client_data(type_tag: &str, challenge: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": type_tag,
            "challenge": challenge,
            "origin": ORIGIN,
            "crossOrigin": false,
        }))
        .unwrap()
    }

    /// Answer a registration challenge ("none" attestation)
    pub fn register(&self, challenge: &str) -> RegistrationResponse {
        let client_data = Self::client_data("webauthn.create", challenge);
        let auth_data = self.auth_data(FLAG_UP | FLAG_UV | FLAG_AT, 0, true);
        let attestation = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text("none".into())),
            (Value::Text("attStmt".into()), Value::Map(vec![])),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_bytes = Vec::new();
        ciborium::ser::into_writer(&attestation, &mut attestation_bytes).unwrap();

        let id = URL_SAFE_NO_PAD.encode(&self.credential_id);
        RegistrationResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAttestationResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(&client_data),
                attestation_object: URL_SAFE_NO_PAD.encode(&attestation_bytes),
            },
            r#type: "public-key".into(),
        }
    }

    /// Answer an authentication challenge, reporting `sign_count`
    pub fn authenticate(&self, challenge: &str, sign_count: u32) -> AuthenticationResponse {
        let client_data = Self::client_data("webauthn.get", challenge);
        let auth_data = self.auth_data(FLAG_UP | FLAG_UV, sign_count, false);

        let mut message = auth_data.clone();
        message.extend_from_slice(&sha256(&client_data));
        let sig = self.key_pair.sign(&self.rng, &message).unwrap();

        let id = URL_SAFE_NO_PAD.encode(&self.credential_id);
        AuthenticationResponse {
            id: id.clone(),
            raw_id: id,
            response: AuthenticatorAssertionResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(&client_data),
                authenticator_data: URL_SAFE_NO_PAD.encode(&auth_data),
                signature: URL_SAFE_NO_PAD.encode(sig.as_ref()),
                user_handle: None,
            },
            r#type: "public-key".into(),
        }
    }
}
