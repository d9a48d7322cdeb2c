use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Base WebSocket URL of the speech-to-text backend.
    pub stt_url: String,
    /// Base WebSocket URL of the text-to-speech backend.
    pub tts_url: String,
    /// Base HTTP URL of the OpenAI-compatible chat completion backend.
    pub llm_url: String,
    pub llm_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    pub characters_path: PathBuf,
}

fn websocket_url(var: &str, default: &str) -> Result<String, ConfigError> {
    let url = std::env::var(var).unwrap_or_else(|_| default.to_string());
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{url}' must start with ws:// or wss://"),
        ));
    }
    Ok(url)
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let stt_url = websocket_url("STT_URL", "ws://localhost:8090")?;
        let tts_url = websocket_url("TTS_URL", "ws://localhost:8089")?;

        let llm_url =
            std::env::var("LLM_URL").unwrap_or_else(|_| "http://localhost:8091/v1".to_string());
        if !(llm_url.starts_with("http://") || llm_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "LLM_URL".to_string(),
                format!("'{llm_url}' must start with http:// or https://"),
            ));
        }
        let llm_api_key = std::env::var("LLM_API_KEY").ok();

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let characters_path = std::env::var("CHARACTERS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./characters"));

        Ok(Self {
            bind_address,
            stt_url,
            tts_url,
            llm_url,
            llm_api_key,
            chat_model,
            log_level,
            characters_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("STT_URL");
            env::remove_var("TTS_URL");
            env::remove_var("LLM_URL");
            env::remove_var("LLM_API_KEY");
            env::remove_var("CHAT_MODEL");
            env::remove_var("RUST_LOG");
            env::remove_var("CHARACTERS_PATH");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8000");
        assert_eq!(config.stt_url, "ws://localhost:8090");
        assert_eq!(config.tts_url, "ws://localhost:8089");
        assert_eq!(config.llm_url, "http://localhost:8091/v1");
        assert_eq!(config.llm_api_key, None);
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.characters_path, PathBuf::from("./characters"));
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:9000");
            env::set_var("STT_URL", "wss://stt.internal:8090");
            env::set_var("TTS_URL", "wss://tts.internal:8089");
            env::set_var("LLM_URL", "https://llm.internal/v1");
            env::set_var("LLM_API_KEY", "test-key");
            env::set_var("CHAT_MODEL", "llama-3.1-8b");
            env::set_var("RUST_LOG", "debug");
            env::set_var("CHARACTERS_PATH", "/srv/characters");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9000");
        assert_eq!(config.stt_url, "wss://stt.internal:8090");
        assert_eq!(config.tts_url, "wss://tts.internal:8089");
        assert_eq!(config.llm_url, "https://llm.internal/v1");
        assert_eq!(config.llm_api_key, Some("test-key".to_string()));
        assert_eq!(config.chat_model, "llama-3.1-8b");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.characters_path, PathBuf::from("/srv/characters"));
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_non_websocket_stt_url() {
        clear_env_vars();
        unsafe {
            env::set_var("STT_URL", "http://localhost:8090");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "STT_URL"),
            _ => panic!("Expected InvalidValue for STT_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_websocket_llm_url() {
        clear_env_vars();
        unsafe {
            env::set_var("LLM_URL", "ws://localhost:8091");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "LLM_URL"),
            _ => panic!("Expected InvalidValue for LLM_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
