//! Configuration module for the relay server
//!
//! Configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use realtime_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::core::realtime::{
    InputTranscriptionConfig, RealtimeConfig, TurnDetectionConfig,
    openai::{OPENAI_REALTIME_CONNECT_TIMEOUT_SECS, OPENAI_REALTIME_DEFAULT_MODEL},
};
use crate::core::session::SessionOptions;

mod env;
mod yaml;

pub use yaml::YamlConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("OPENAI_API_KEY is required to reach the realtime service")]
    MissingApiKey,
}

/// Remote session settings.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub model: String,
    /// Endpoint override (e.g. a proxy); the public OpenAI URL when unset
    pub base_url: Option<String>,
    pub voice: String,
    /// Inline system instructions; take precedence over `instructions_path`
    pub instructions: Option<String>,
    /// File holding the system instructions, read once at load time
    pub instructions_path: Option<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// Enables user transcripts when set (e.g. "whisper-1")
    pub transcription_model: Option<String>,
    pub vad: TurnDetectionConfig,
    /// Bound on the remote handshake
    pub connect_timeout_secs: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            model: OPENAI_REALTIME_DEFAULT_MODEL.to_string(),
            base_url: None,
            voice: "alloy".to_string(),
            instructions: None,
            instructions_path: None,
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            transcription_model: None,
            vad: TurnDetectionConfig::default(),
            connect_timeout_secs: OPENAI_REALTIME_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Bound on waiting for sessions to close at shutdown
    pub shutdown_timeout_secs: u64,

    /// OpenAI API key for the Realtime API
    pub openai_api_key: Option<String>,
    pub realtime: RealtimeSettings,

    /// User text that makes the agent speak first; `None` disables it
    pub opening_prompt: Option<String>,
    pub opening_delay_ms: u64,

    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5050,
            shutdown_timeout_secs: 5,
            openai_api_key: None,
            realtime: RealtimeSettings::default(),
            opening_prompt: Some("start".to_string()),
            opening_delay_ms: 500,
            cors_allowed_origins: None,
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and `.env`, loaded in main).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = env::load()?;
        config.finalize()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment.
    ///
    /// Values present in the YAML file override environment variables,
    /// which in turn override defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = env::load()?;
        config.apply_yaml(yaml);
        config.finalize()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(secs) = server.shutdown_timeout_secs {
                self.shutdown_timeout_secs = secs;
            }
        }

        if let Some(realtime) = yaml.realtime {
            if realtime.api_key.is_some() {
                self.openai_api_key = realtime.api_key;
            }
            let settings = &mut self.realtime;
            if let Some(model) = realtime.model {
                settings.model = model;
            }
            if realtime.base_url.is_some() {
                settings.base_url = realtime.base_url;
            }
            if let Some(voice) = realtime.voice {
                settings.voice = voice;
            }
            if realtime.instructions.is_some() {
                settings.instructions = realtime.instructions;
            }
            if realtime.instructions_path.is_some() {
                settings.instructions_path = realtime.instructions_path;
            }
            if let Some(format) = realtime.input_audio_format {
                settings.input_audio_format = format;
            }
            if let Some(format) = realtime.output_audio_format {
                settings.output_audio_format = format;
            }
            if realtime.transcription_model.is_some() {
                settings.transcription_model = realtime.transcription_model;
            }
            if let Some(secs) = realtime.connect_timeout_secs {
                settings.connect_timeout_secs = secs;
            }
            if let Some(vad) = realtime.vad {
                let target = &mut settings.vad;
                target.threshold = vad.threshold.unwrap_or(target.threshold);
                target.prefix_padding_ms = vad.prefix_padding_ms.unwrap_or(target.prefix_padding_ms);
                target.silence_duration_ms =
                    vad.silence_duration_ms.unwrap_or(target.silence_duration_ms);
                target.create_response = vad.create_response.unwrap_or(target.create_response);
                target.interrupt_response =
                    vad.interrupt_response.unwrap_or(target.interrupt_response);
            }
        }

        if let Some(session) = yaml.session {
            if let Some(prompt) = session.opening_prompt {
                let prompt = prompt.trim().to_string();
                self.opening_prompt = (!prompt.is_empty()).then_some(prompt);
            }
            if let Some(ms) = session.opening_delay_ms {
                self.opening_delay_ms = ms;
            }
        }

        if let Some(security) = yaml.security
            && security.cors_allowed_origins.is_some()
        {
            self.cors_allowed_origins = security.cors_allowed_origins;
        }
    }

    /// Read referenced files and check value ranges.
    fn finalize(&mut self) -> Result<(), ConfigError> {
        if self.realtime.instructions.is_none()
            && let Some(path) = self.realtime.instructions_path.as_deref()
        {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_string(),
                source,
            })?;
            self.realtime.instructions = Some(text.trim().to_string());
        }

        let threshold = self.realtime.vad.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                key: "VAD_THRESHOLD".to_string(),
                value: threshold.to_string(),
            });
        }

        if self.realtime.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REALTIME_CONNECT_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Remote session configuration; fails when no API key is configured.
    pub fn realtime_config(&self) -> Result<RealtimeConfig, ConfigError> {
        let api_key = self
            .openai_api_key
            .clone()
            .ok_or(ConfigError::MissingApiKey)?;
        let settings = &self.realtime;

        Ok(RealtimeConfig {
            api_key,
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
            voice: Some(settings.voice.clone()),
            instructions: settings.instructions.clone(),
            input_audio_format: Some(settings.input_audio_format.clone()),
            output_audio_format: Some(settings.output_audio_format.clone()),
            input_audio_transcription: settings
                .transcription_model
                .clone()
                .map(|model| InputTranscriptionConfig { model }),
            turn_detection: Some(settings.vad.clone()),
            connection_timeout_seconds: Some(settings.connect_timeout_secs),
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            opening_prompt: self.opening_prompt.clone(),
            opening_delay: Duration::from_millis(self.opening_delay_ms),
        }
    }
}
