//! CLI argument definitions for the UrbanEye assistant terminal.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use urbaneye_core::{UrbanEyeConfig, UserIdentity};

/// UrbanEye assistant: chat about your civic issue reports from the terminal.
#[derive(Parser, Debug)]
#[command(name = "urbaneye", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Base URL of the UrbanEye backend.
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// Bearer token for the backend (falls back to URBANEYE_TOKEN).
    #[arg(long = "token")]
    pub token: Option<String>,

    /// Gemini model name.
    #[arg(long = "model")]
    pub model: Option<String>,

    /// Reply with a local echo instead of calling Gemini.
    #[arg(long = "offline")]
    pub offline: bool,

    /// Display name of the signed-in user. Omit to run signed out.
    #[arg(long = "name")]
    pub name: Option<String>,

    /// Email of the signed-in user.
    #[arg(long = "email", default_value = "")]
    pub email: String,

    /// Backend role of the signed-in user.
    #[arg(long = "role", default_value = "civilian")]
    pub role: String,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > URBANEYE_CONFIG env var > platform default (~/.urbaneye/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("URBANEYE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the backend token.
    ///
    /// Priority: --token flag > URBANEYE_TOKEN env var. `None` runs the
    /// assistant without live report data.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("URBANEYE_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config: &UrbanEyeConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.general.log_level.clone())
    }

    /// Apply flag overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut UrbanEyeConfig) {
        if let Some(ref url) = self.api_url {
            config.reports.api_url = url.clone();
        }
        if let Some(ref model) = self.model {
            config.assistant.model = model.clone();
        }
    }

    /// The signed-in user, if a name was given.
    pub fn identity(&self) -> Option<UserIdentity> {
        self.name
            .as_ref()
            .map(|name| UserIdentity::new(name.clone(), self.email.clone(), self.role.clone()))
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".urbaneye").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".urbaneye").join("config.toml");
    }
    PathBuf::from("config.toml")
}
