//! `WebAuthn` ceremony verification
//!
//! Core verification logic for registration (attestation) and
//! authentication (assertion) ceremonies, implemented directly against
//! the W3C `WebAuthn` specification with standard cryptography
//! libraries. This module is pure: it holds no state and performs no
//! I/O; the [`crate::ceremony`] coordinator supplies challenges and
//! credentials and persists the outcomes.

mod cbor;
mod crypto;
mod types;
mod verifier;

pub use cbor::{AttestationObject, AuthenticatorData, FLAG_AT, FLAG_UP, FLAG_UV};
pub(crate) use cbor::decode_b64;
pub use crypto::sha256;
pub use types::*;
pub use verifier::{
    extract_client_challenge, verify_assertion, verify_registration, AssertionVerdict,
};
