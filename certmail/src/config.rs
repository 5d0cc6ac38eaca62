//! Configuration handling.
//!
//! Sender credentials and SMTP settings live in a small TOML file next to
//! the invocation. On first run the file is created with placeholder values
//! so the user has something concrete to edit; the placeholders are refused
//! at send time.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CertmailError, Result};

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "certmail.toml";

/// Sender address written on first run, refused at send time.
pub const PLACEHOLDER_EMAIL: &str = "seu_email@gmail.com";
/// Password written on first run, refused at send time.
pub const PLACEHOLDER_PASSWORD: &str = "sua_senha";

const DEFAULT_RELAY: &str = "smtp.gmail.com";
const DEFAULT_PORT: u16 = 587;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Sender address, also used as the SMTP username.
    pub email: String,
    /// SMTP password or app password.
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            email: PLACEHOLDER_EMAIL.to_string(),
            password: PLACEHOLDER_PASSWORD.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    /// Relay host name, e.g. `smtp.gmail.com`.
    pub relay: String,
    /// STARTTLS submission port.
    pub port: u16,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            relay: DEFAULT_RELAY.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub credentials: Credentials,
    /// Optional in the file; defaults cover the common Gmail setup.
    #[serde(default)]
    pub smtp: SmtpSettings,
}

impl Config {
    /// Read the config file, creating one with placeholder values when it
    /// does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!(path = %path.display(), "config_created");
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| CertmailError::Config(format!("could not read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| CertmailError::Config(format!("could not parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| CertmailError::Config(format!("could not serialize config: {e}")))?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// True while the file still holds the first-run placeholder values.
    pub fn has_placeholder_credentials(&self) -> bool {
        self.credentials.email == PLACEHOLDER_EMAIL
            || self.credentials.password == PLACEHOLDER_PASSWORD
    }
}

// ============================================================================
// Tests
// ============================================================================
