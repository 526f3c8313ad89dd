//! `WebAuthn` core types
//!
//! Ceremony option payloads handed to the client and the response
//! payloads it returns. Binary fields travel Base64URL-encoded without
//! padding, exactly as the browser serializes them.

use serde::{Deserialize, Serialize};

/// Registration (credential creation) options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,
    pub user: UserEntity,
    #[serde(rename = "pubKeyCredParams")]
    pub public_key_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u32, // Timeout in milliseconds
    pub attestation: String, // "none", "indirect", "direct"
    #[serde(rename = "authenticatorSelection")]
    pub authenticator_selection: AuthenticatorSelectionCriteria,
}

/// Authentication (assertion request) options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub timeout: u32,      // Timeout in milliseconds
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "allowCredentials")]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(rename = "userVerification")]
    pub user_verification: String, // "required", "preferred", "discouraged"
}

/// Relying party information
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingParty {
    pub id: String,   // Domain name (e.g., "example.com")
    pub name: String, // Display name
}

/// User entity
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserEntity {
    pub id: String,   // Base64URL-encoded user handle
    pub name: String, // Username
    #[serde(rename = "displayName")]
    pub display_name: String,
}

/// Public key credential parameters
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub alg: i32, // COSE algorithm (-7 for ES256, -257 for RS256)
}

/// Authenticator selection criteria
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorSelectionCriteria {
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>, // "platform", "cross-platform"
    #[serde(rename = "residentKey")]
    pub resident_key: String, // "required" for passkeys
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

/// Public key credential descriptor
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub id: String, // Base64URL-encoded credential ID
}

/// Registration response from the client
#[derive(Serialize, Deserialize, Debug)]
pub struct RegistrationResponse {
    pub id: String, // Base64URL-encoded credential ID
    #[serde(rename = "rawId")]
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAttestationResponse,
    pub r#type: String, // Always "public-key"
}

/// Authentication response from the client
#[derive(Serialize, Deserialize, Debug)]
pub struct AuthenticationResponse {
    pub id: String, // Base64URL-encoded credential ID
    #[serde(rename = "rawId")]
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAssertionResponse,
    pub r#type: String, // Always "public-key"
}

/// Attestation response carried during registration
#[derive(Serialize, Deserialize, Debug)]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    #[serde(rename = "attestationObject")]
    pub attestation_object: String, // Base64URL-encoded CBOR attestation object
}

/// Assertion response carried during authentication
#[derive(Serialize, Deserialize, Debug)]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String, // Base64URL-encoded authenticator data
    pub signature: String, // Base64URL-encoded signature
    #[serde(rename = "userHandle")]
    pub user_handle: Option<String>, // Base64URL-encoded user handle
}

/// Outcome of a successful registration verification: everything the
/// coordinator needs to persist the new credential. No partial success
/// exists; any failed check yields an error instead.
#[derive(Clone, Debug)]
pub struct VerifiedRegistration {
    pub credential_id: Vec<u8>,
    /// COSE public key exactly as attested
    pub public_key: Vec<u8>,
    /// Initial signature counter reported by the authenticator (commonly 0)
    pub sign_count: u32,
}
