use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, UrbanEyeError};

/// Top-level configuration for the UrbanEye assistant.
///
/// Loaded from `~/.urbaneye/config.toml` by default. Each section corresponds
/// to one collaborator of the conversational session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrbanEyeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl UrbanEyeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UrbanEyeConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UrbanEyeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Conversational assistant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Generation model name.
    pub model: String,
    /// API key for the generation service. When empty, the key is read from
    /// the environment variable named by `api_key_env`.
    pub api_key: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Number of most recent messages sent with each request.
    pub max_history: usize,
    /// Maximum messages admitted per rate-limit window.
    pub rate_limit_max: usize,
    /// Rate-limit window length in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Upper bound on generated tokens per reply.
    pub max_output_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling threshold.
    pub top_p: f32,
    /// Seconds to wait for the stream to open or for the next chunk.
    pub stream_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            api_key: String::new(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            max_history: 10,
            rate_limit_max: 20,
            rate_limit_window_ms: 60_000,
            max_output_tokens: 300,
            temperature: 0.7,
            top_p: 0.9,
            stream_timeout_secs: 60,
        }
    }
}

impl AssistantConfig {
    /// Resolve the API key: explicit value first, then the environment.
    ///
    /// Returns an empty string when neither is set.
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var(&self.api_key_env).unwrap_or_default()
    }
}

/// Report backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Base URL of the UrbanEye backend.
    pub api_url: String,
    /// HTTP timeout for the "my reports" query, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            request_timeout_secs: 15,
        }
    }
}

/// Speech recognition and synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Locale used for recognition at startup and for non-Hindi synthesis.
    pub default_locale: String,
    /// Second recognition locale, also used for Devanagari synthesis.
    pub alternate_locale: String,
    /// Speech rate multiplier.
    pub rate: f32,
    /// Voice pitch multiplier.
    pub pitch: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            default_locale: "en-IN".to_string(),
            alternate_locale: "hi-IN".to_string(),
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = UrbanEyeConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.assistant.model, "gemini-2.5-flash");
        assert_eq!(config.assistant.max_history, 10);
        assert_eq!(config.assistant.rate_limit_max, 20);
        assert_eq!(config.assistant.rate_limit_window_ms, 60_000);
        assert_eq!(config.assistant.max_output_tokens, 300);
        assert_eq!(config.reports.api_url, "http://localhost:5000");
        assert_eq!(config.voice.default_locale, "en-IN");
        assert_eq!(config.voice.alternate_locale, "hi-IN");
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[assistant]
model = "gemini-2.0-flash"
max_history = 6
rate_limit_max = 5
rate_limit_window_ms = 10000

[reports]
api_url = "https://api.urbaneye.example"
"#;
        let file = create_temp_config(content);
        let config = UrbanEyeConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.assistant.model, "gemini-2.0-flash");
        assert_eq!(config.assistant.max_history, 6);
        assert_eq!(config.assistant.rate_limit_max, 5);
        assert_eq!(config.assistant.rate_limit_window_ms, 10_000);
        assert_eq!(config.reports.api_url, "https://api.urbaneye.example");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[assistant]
temperature = 0.2
"#;
        let file = create_temp_config(content);
        let config = UrbanEyeConfig::load(file.path()).unwrap();
        assert!((config.assistant.temperature - 0.2).abs() < f32::EPSILON);
        // Remaining fields use defaults
        assert!((config.assistant.top_p - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.assistant.stream_timeout_secs, 60);
        assert_eq!(config.reports.request_timeout_secs, 15);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = UrbanEyeConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("assistant = [[[");
        let result = UrbanEyeConfig::load(file.path());
        assert!(matches!(result, Err(UrbanEyeError::Config(_))));
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = UrbanEyeConfig::default();
        config.voice.alternate_locale = "ta-IN".to_string();
        config.save(&path).unwrap();

        let reloaded = UrbanEyeConfig::load(&path).unwrap();
        assert_eq!(reloaded.voice.alternate_locale, "ta-IN");
        assert_eq!(reloaded.assistant.max_history, config.assistant.max_history);
    }

    #[test]
    fn test_resolve_api_key_prefers_explicit_value() {
        let config = AssistantConfig {
            api_key: "explicit".to_string(),
            api_key_env: "URBANEYE_TEST_UNUSED_KEY_VAR".to_string(),
            ..AssistantConfig::default()
        };
        assert_eq!(config.resolve_api_key(), "explicit");
    }

    #[test]
    fn test_resolve_api_key_missing_env_is_empty() {
        let config = AssistantConfig {
            api_key_env: "URBANEYE_TEST_SURELY_UNSET_VAR".to_string(),
            ..AssistantConfig::default()
        };
        assert!(config.resolve_api_key().is_empty());
    }
}
