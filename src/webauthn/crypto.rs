//! Cryptographic operations for ceremony verification
//!
//! COSE public keys are carried exactly as attested; this module
//! converts them to the formats `ring` verifies against: an
//! uncompressed SEC1 point for ES256 and a DER `RSAPublicKey` for
//! RS256.

use ciborium::de::from_reader;
use ciborium::value::Value;
use ring::digest;
use ring::signature;

use crate::errors::{CeremonyError, CeremonyResult};

// COSE key common parameters
const COSE_KTY: i64 = 1;
const COSE_ALG: i64 = 3;
// COSE key types
const KTY_EC2: i64 = 2;
const KTY_RSA: i64 = 3;
// COSE algorithms
const ALG_ES256: i64 = -7;
const ALG_RS256: i64 = -257;
// EC2 parameters
const EC2_X: i64 = -2;
const EC2_Y: i64 = -3;
// RSA parameters
const RSA_N: i64 = -1;
const RSA_E: i64 = -2;

/// Hash data using SHA-256
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

/// A COSE public key reduced to what verification needs
enum CoseKey {
    Es256 { x: Vec<u8>, y: Vec<u8> },
    Rs256 { n: Vec<u8>, e: Vec<u8> },
}

fn map_get(map: &[(Value, Value)], label: i64) -> Option<&Value> {
    let key = Value::Integer(label.into());
    map.iter().find(|(k, _)| k == &key).map(|(_, v)| v)
}

fn map_get_bytes(map: &[(Value, Value)], label: i64, what: &str) -> CeremonyResult<Vec<u8>> {
    match map_get(map, label) {
        Some(Value::Bytes(bytes)) => Ok(bytes.clone()),
        _ => Err(CeremonyError::MalformedResponse(format!(
            "COSE key missing {what}"
        ))),
    }
}

fn parse_cose_key(public_key: &[u8]) -> CeremonyResult<CoseKey> {
    let value: Value = from_reader(public_key)
        .map_err(|_| CeremonyError::MalformedResponse("invalid COSE key".into()))?;
    let Value::Map(map) = value else {
        return Err(CeremonyError::MalformedResponse(
            "COSE key is not a map".into(),
        ));
    };

    let kty = match map_get(&map, COSE_KTY) {
        Some(Value::Integer(i)) => i128::from(*i),
        _ => {
            return Err(CeremonyError::MalformedResponse(
                "COSE key missing kty".into(),
            ))
        }
    };
    // alg is optional in the COSE key; when present it must agree with kty
    let alg = match map_get(&map, COSE_ALG) {
        Some(Value::Integer(i)) => Some(i128::from(*i)),
        _ => None,
    };

    match kty {
        k if k == i128::from(KTY_EC2) => {
            if alg.is_some_and(|a| a != i128::from(ALG_ES256)) {
                return Err(CeremonyError::MalformedResponse(
                    "unsupported EC2 algorithm".into(),
                ));
            }
            Ok(CoseKey::Es256 {
                x: map_get_bytes(&map, EC2_X, "x coordinate")?,
                y: map_get_bytes(&map, EC2_Y, "y coordinate")?,
            })
        }
        k if k == i128::from(KTY_RSA) => {
            if alg.is_some_and(|a| a != i128::from(ALG_RS256)) {
                return Err(CeremonyError::MalformedResponse(
                    "unsupported RSA algorithm".into(),
                ));
            }
            Ok(CoseKey::Rs256 {
                n: map_get_bytes(&map, RSA_N, "modulus")?,
                e: map_get_bytes(&map, RSA_E, "exponent")?,
            })
        }
        _ => Err(CeremonyError::MalformedResponse(
            "unsupported COSE key type".into(),
        )),
    }
}

/// Check that an attested COSE public key is one assertions can later
/// be verified against. Run at enrollment so a credential with an
/// unusable key is rejected up front instead of being stored.
///
/// # Errors
/// Returns `MalformedResponse` describing what the key is missing or
/// which type/algorithm is unsupported.
pub(crate) fn validate_cose_key(cose_public_key: &[u8]) -> CeremonyResult<()> {
    parse_cose_key(cose_public_key).map(|_| ())
}

/// Verify a ceremony signature over `message` using an attested COSE
/// public key.
///
/// # Errors
/// Returns `MalformedResponse` if the key cannot be parsed and
/// `SignatureInvalid` if verification fails.
pub fn verify_signature(
    cose_public_key: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> CeremonyResult<()> {
    match parse_cose_key(cose_public_key)? {
        CoseKey::Es256 { x, y } => {
            // Uncompressed SEC1 point: 0x04 || x || y
            let mut point = Vec::with_capacity(1 + x.len() + y.len());
            point.push(0x04);
            point.extend_from_slice(&x);
            point.extend_from_slice(&y);

            signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &point)
                .verify(message, signature_bytes)
                .map_err(|_| CeremonyError::SignatureInvalid)
        }
        CoseKey::Rs256 { n, e } => {
            let der = rsa_public_key_der(&n, &e);
            signature::UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, &der)
                .verify(message, signature_bytes)
                .map_err(|_| CeremonyError::SignatureInvalid)
        }
    }
}

/// Encode `RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }`
fn rsa_public_key_der(n: &[u8], e: &[u8]) -> Vec<u8> {
    let n_int = der_unsigned_integer(n);
    let e_int = der_unsigned_integer(e);
    let mut body = Vec::with_capacity(n_int.len() + e_int.len());
    body.extend_from_slice(&n_int);
    body.extend_from_slice(&e_int);

    let mut out = vec![0x30];
    der_push_length(&mut out, body.len());
    out.extend_from_slice(&body);
    out
}

fn der_unsigned_integer(bytes: &[u8]) -> Vec<u8> {
    let mut trimmed: &[u8] = bytes;
    while trimmed.len() > 1 && trimmed[0] == 0 {
        trimmed = &trimmed[1..];
    }
    // A set high bit would flip the sign; pad with a zero octet
    let needs_pad = trimmed.first().is_some_and(|b| b & 0x80 != 0);

    let mut out = vec![0x02];
    der_push_length(&mut out, trimmed.len() + usize::from(needs_pad));
    if needs_pad {
        out.push(0x00);
    }
    out.extend_from_slice(trimmed);
    out
}

fn der_push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(u8::try_from(len).expect("length below 0x80"));
    } else {
        let len_bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | u8::try_from(len_bytes.len()).expect("length of length fits in u8"));
        out.extend_from_slice(&len_bytes);
    }
}
