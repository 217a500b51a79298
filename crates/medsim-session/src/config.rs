//! Configuration for a MedSim server.
//!
//! Loaded from `medsim.json` (camelCase keys). Every field has a default, so
//! a missing file yields a working configuration as long as the API key
//! environment variable is set.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::model::ScorePolicy;

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "medsim.json";

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_fast_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_feedback_model() -> String {
    "gemini-2.5-pro".to_string()
}

const fn default_case_temperature() -> f32 {
    1.0
}

const fn default_request_timeout() -> u64 {
    60
}

fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_event_capacity() -> usize {
    100
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Content provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// How out-of-range scores are handled.
    #[serde(default)]
    pub score_policy: ScorePolicy,

    /// Per-subscriber buffer for session events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            server: ServerConfig::default(),
            score_policy: ScorePolicy::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Loads `medsim.json` from the current working directory, or the
    /// defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is unreadable, is not valid
    /// JSON, or fails validation.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            SessionError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `medsim.json` from `dir`.
    ///
    /// # Errors
    ///
    /// See [`Config::load_from_file`].
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from `path`, falling back to the defaults if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConfigParseError` for unreadable files or
    /// invalid JSON, and `SessionError::ConfigValidationError` for values
    /// that parse but make no sense.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(SessionError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SessionError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConfigValidationError` for the first invalid
    /// value found.
    pub fn validate(&self) -> Result<()> {
        self.provider.validate()?;

        if self.server.host.trim().is_empty() {
            return Err(SessionError::config_validation(
                "server.host must not be empty",
                "Set server.host to an address such as 127.0.0.1 in your medsim.json",
            ));
        }

        if self.server.port == 0 {
            return Err(SessionError::config_validation(
                "server.port must be greater than 0",
                "Set server.port to a free TCP port in your medsim.json",
            ));
        }

        if self.event_capacity == 0 {
            return Err(SessionError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 in your medsim.json",
            ));
        }

        Ok(())
    }
}

/// Settings for the Gemini content provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Base URL of the `generativelanguage` REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for case generation.
    #[serde(default = "default_fast_model")]
    pub case_model: String,

    /// Model used for interaction replies.
    #[serde(default = "default_fast_model")]
    pub interaction_model: String,

    /// Model used for case feedback.
    #[serde(default = "default_feedback_model")]
    pub feedback_model: String,

    /// Model used for skill challenges and their evaluation.
    #[serde(default = "default_fast_model")]
    pub skill_model: String,

    /// Sampling temperature for case generation.
    #[serde(default = "default_case_temperature")]
    pub case_temperature: f32,

    /// Upper bound on each HTTP request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            case_model: default_fast_model(),
            interaction_model: default_fast_model(),
            feedback_model: default_feedback_model(),
            skill_model: default_fast_model(),
            case_temperature: default_case_temperature(),
            request_timeout_secs: default_request_timeout(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl ProviderConfig {
    /// Reads the API key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ConfigValidationError` if the variable is unset
    /// or empty.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(SessionError::config_validation(
                format!("environment variable {} is not set", self.api_key_env),
                format!(
                    "Export {} with your Gemini API key, or point provider.apiKeyEnv at another variable",
                    self.api_key_env
                ),
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SessionError::config_validation(
                "provider.baseUrl must not be empty",
                "Remove provider.baseUrl from your medsim.json to use the default endpoint",
            ));
        }

        for (field, model) in [
            ("caseModel", &self.case_model),
            ("interactionModel", &self.interaction_model),
            ("feedbackModel", &self.feedback_model),
            ("skillModel", &self.skill_model),
        ] {
            if model.trim().is_empty() {
                return Err(SessionError::config_validation(
                    format!("provider.{field} must not be empty"),
                    format!("Set provider.{field} to a Gemini model name such as gemini-2.5-flash"),
                ));
            }
        }

        if !(0.0..=2.0).contains(&self.case_temperature) {
            return Err(SessionError::config_validation(
                format!(
                    "provider.caseTemperature must be between 0 and 2, got {}",
                    self.case_temperature
                ),
                "Set provider.caseTemperature to a value between 0.0 and 2.0",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(SessionError::config_validation(
                "provider.requestTimeoutSecs must be greater than 0",
                "Set provider.requestTimeoutSecs to at least 1 second in your medsim.json",
            ));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(SessionError::config_validation(
                "provider.apiKeyEnv must not be empty",
                "Set provider.apiKeyEnv to the name of an environment variable, e.g. API_KEY",
            ));
        }

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port`, suitable for `TcpListener::bind`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
