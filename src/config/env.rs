//! Environment variable loading.

use std::str::FromStr;

use super::{ConfigError, ServerConfig};

/// Read a variable, treating empty or whitespace-only values as unset.
pub(super) fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(super) fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_var(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

/// Build a configuration from defaults overlaid with environment variables.
pub(super) fn load() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_env("PORT")? {
        config.port = port;
    }
    if let Some(secs) = parse_env("SHUTDOWN_TIMEOUT_SECS")? {
        config.shutdown_timeout_secs = secs;
    }
    config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");

    config.openai_api_key = env_var("OPENAI_API_KEY");
    if let Some(model) = env_var("REALTIME_MODEL") {
        config.realtime.model = model;
    }
    if let Some(voice) = env_var("REALTIME_VOICE") {
        config.realtime.voice = voice;
    }
    config.realtime.base_url = env_var("REALTIME_BASE_URL");
    config.realtime.instructions = env_var("REALTIME_INSTRUCTIONS");
    config.realtime.instructions_path = env_var("REALTIME_INSTRUCTIONS_PATH");
    if let Some(format) = env_var("REALTIME_INPUT_AUDIO_FORMAT") {
        config.realtime.input_audio_format = format;
    }
    if let Some(format) = env_var("REALTIME_OUTPUT_AUDIO_FORMAT") {
        config.realtime.output_audio_format = format;
    }
    config.realtime.transcription_model = env_var("REALTIME_TRANSCRIPTION_MODEL");
    if let Some(secs) = parse_env("REALTIME_CONNECT_TIMEOUT_SECS")? {
        config.realtime.connect_timeout_secs = secs;
    }

    if let Some(threshold) = parse_env("VAD_THRESHOLD")? {
        config.realtime.vad.threshold = threshold;
    }
    if let Some(ms) = parse_env("VAD_PREFIX_PADDING_MS")? {
        config.realtime.vad.prefix_padding_ms = ms;
    }
    if let Some(ms) = parse_env("VAD_SILENCE_DURATION_MS")? {
        config.realtime.vad.silence_duration_ms = ms;
    }

    if let Ok(prompt) = std::env::var("OPENING_TRIGGER_TEXT") {
        // set but empty disables the opening turn
        let prompt = prompt.trim().to_string();
        config.opening_prompt = (!prompt.is_empty()).then_some(prompt);
    }
    if let Some(ms) = parse_env("OPENING_DELAY_MS")? {
        config.opening_delay_ms = ms;
    }

    Ok(config)
}
