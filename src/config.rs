//! Engine configuration
//!
//! Loaded from an optional `config.toml` in the working directory, with
//! environment variables taking precedence over the file. Missing values
//! fall back to defaults so the engine always starts.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::briefing::DEFAULT_SILENCE_TIMEOUT;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Briefing content generation endpoint
    pub content_url: String,
    /// Follow-up Q&A endpoint
    pub qa_url: String,
    /// Speech-to-text WebSocket endpoint (http(s) or ws(s) scheme)
    pub stt_ws_url: String,
    /// Seconds of silence before a pause point auto-advances
    pub silence_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            content_url: "http://localhost:8080/api/briefing/generate".to_string(),
            qa_url: "http://localhost:8080/api/briefing/qa".to_string(),
            stt_ws_url: "http://localhost:8080/api/stt/stream".to_string(),
            silence_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// Load from `config.toml` (if present) and apply environment overrides
    pub fn load() -> Self {
        Self::load_file(Path::new("config.toml")).overridden(|key| std::env::var(key).ok())
    }

    fn load_file(path: &Path) -> Self {
        if !path.exists() {
            info!("No config file found, using defaults");
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Apply overrides from an environment-like lookup
    fn overridden(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = get("BRIEFCAST_CONTENT_URL") {
            self.content_url = url;
        }
        if let Some(url) = get("BRIEFCAST_QA_URL") {
            self.qa_url = url;
        }
        if let Some(url) = get("BRIEFCAST_STT_WS_URL") {
            self.stt_ws_url = url;
        }
        if let Some(secs) = get("BRIEFCAST_SILENCE_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(secs) => self.silence_timeout_secs = Some(secs),
                Err(_) => error!("Invalid BRIEFCAST_SILENCE_TIMEOUT_SECS: {}", secs),
            }
        }
        self
    }

    /// Silence countdown duration at pause points
    pub fn silence_timeout(&self) -> Duration {
        self.silence_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SILENCE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = EngineConfig::load_file(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.silence_timeout(), DEFAULT_SILENCE_TIMEOUT);
        assert!(config.content_url.contains("/briefing/generate"));
    }

    #[test]
    fn test_toml_parse_with_partial_fields() {
        let config: EngineConfig =
            toml::from_str("content_url = \"https://api.example.com/briefing\"\nsilence_timeout_secs = 6\n")
                .unwrap();
        assert_eq!(config.content_url, "https://api.example.com/briefing");
        assert_eq!(config.silence_timeout(), Duration::from_secs(6));
        // Unspecified fields keep their defaults
        assert!(config.qa_url.contains("/briefing/qa"));
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let config = EngineConfig::default().overridden(|key| match key {
            "BRIEFCAST_QA_URL" => Some("https://qa.example.com".to_string()),
            "BRIEFCAST_SILENCE_TIMEOUT_SECS" => Some("2".to_string()),
            _ => None,
        });
        assert_eq!(config.qa_url, "https://qa.example.com");
        assert_eq!(config.silence_timeout(), Duration::from_secs(2));
        assert!(config.content_url.contains("localhost"));
    }

    #[test]
    fn test_invalid_timeout_override_is_ignored() {
        let config = EngineConfig::default()
            .overridden(|key| (key == "BRIEFCAST_SILENCE_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert_eq!(config.silence_timeout(), DEFAULT_SILENCE_TIMEOUT);
    }
}
