#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the rollcall application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod attendance;
pub mod ceremony;
pub mod challenge;
pub mod context;
pub mod credentials;
pub mod errors;
pub mod handlers;
pub mod settings;
pub mod webauthn;

/// Re-export commonly used items
pub use attendance::{AttendanceLog, AttendanceRecord, InMemoryAttendanceLog};
pub use ceremony::{
    AuthenticationOutcome, CeremonyCoordinator, EnrollmentPolicy, RegistrationOutcome,
};
pub use challenge::{CeremonyKind, ChallengeStore, InMemoryChallengeStore, StoredChallenge};
pub use context::RequestContext;
pub use credentials::{CredentialRecord, CredentialRepository, InMemoryCredentialRepository, User};
pub use errors::{CeremonyError, CeremonyResult};
pub use settings::RollcallSettings;
