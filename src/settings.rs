//! Application settings
//!
//! Settings load from `Settings.toml` in the working directory when
//! present, fall back to defaults otherwise, and are overridable per
//! field through environment variables. The relying-party id and origin
//! are deliberately NOT settings: they are derived per request (see
//! [`crate::context::RequestContext`]).

use std::fs;

use anyhow::Context;
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RollcallSettings {
    pub application: ApplicationSettings,
    pub relying_party: RelyingPartySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingPartySettings {
    /// Display name shown by the authenticator UI
    pub name: String,
    /// Ceremony timeout; also the challenge TTL
    pub timeout_seconds: u64,
    /// "required", "preferred" or "discouraged"
    pub user_verification: String,
    /// Optional "platform" / "cross-platform" restriction
    pub authenticator_attachment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for RelyingPartySettings {
    fn default() -> Self {
        Self {
            name: "Rollcall Attendance".to_string(),
            timeout_seconds: 60,
            user_verification: "required".to_string(),
            authenticator_attachment: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RollcallSettings {
    /// Load settings from `Settings.toml` and environment variables.
    ///
    /// Priority (highest to lowest): environment variables,
    /// `Settings.toml` in the current directory, defaults.
    ///
    /// # Errors
    /// Returns an error if the settings file exists but cannot be read
    /// or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        Ok(settings)
    }

    fn load_base_settings() -> anyhow::Result<Self> {
        let config_path = std::path::PathBuf::from("Settings.toml");
        if config_path.exists() {
            let toml_content = fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            let settings = basic_toml::from_str(&toml_content)
                .with_context(|| format!("failed to parse {}", config_path.display()))?;
            log::info!("Loaded base settings from {}", config_path.display());
            return Ok(settings);
        }
        Ok(Self::default())
    }

    fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_relying_party_env_overrides(&mut settings.relying_party);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
    }

    /// Apply environment overrides for relying-party settings
    pub fn apply_relying_party_env_overrides(rp_settings: &mut RelyingPartySettings) {
        if let Ok(name) = std::env::var("RP_NAME") {
            rp_settings.name = name;
        }
        if let Ok(timeout_str) = std::env::var("RP_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                rp_settings.timeout_seconds = timeout;
            }
        }
        if let Ok(user_verification) = std::env::var("RP_USER_VERIFICATION") {
            rp_settings.user_verification = user_verification;
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Challenge TTL as a duration
    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.relying_party.timeout_seconds).unwrap_or(60))
    }

    /// Whether policy requires the user-verified flag on every ceremony
    #[must_use]
    pub fn require_user_verification(&self) -> bool {
        self.relying_party.user_verification == "required"
    }
}
