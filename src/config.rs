use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classifier::ReplyStyle;
use crate::error::{AutoReplyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub replies: ReplyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_results: default_max_results(),
            account: default_account(),
            label: default_label(),
            min_text_len: default_min_text_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub style: ReplyStyle,
    /// Unset means classification requests never time out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            base_url: default_base_url(),
            style: ReplyStyle::default(),
            request_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    #[serde(default = "default_display_limit")]
    pub display_limit: usize,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
            display_limit: default_display_limit(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_results() -> u32 {
    10
}

fn default_account() -> String {
    "me".to_string()
}

fn default_label() -> String {
    "INBOX".to_string()
}

fn default_min_text_len() -> usize {
    10
}

fn default_mode() -> String {
    "remote".to_string()
}

fn default_base_url() -> String {
    "https://guilhermev14-email-analyzer-ai.hf.space".to_string()
}

fn default_max_concurrent_sends() -> usize {
    5
}

fn default_display_limit() -> usize {
    10
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AutoReplyError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AutoReplyError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AutoReplyError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AutoReplyError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| AutoReplyError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(1..=3600).contains(&self.polling.interval_secs) {
            return Err(AutoReplyError::ConfigError(
                "polling.interval_secs must be between 1 and 3600".to_string(),
            ));
        }

        if !(1..=50).contains(&self.polling.max_results) {
            return Err(AutoReplyError::ConfigError(
                "polling.max_results must be between 1 and 50".to_string(),
            ));
        }

        if self.polling.account.trim().is_empty() {
            return Err(AutoReplyError::ConfigError(
                "polling.account cannot be empty".to_string(),
            ));
        }

        if self.polling.label.trim().is_empty() {
            return Err(AutoReplyError::ConfigError(
                "polling.label cannot be empty".to_string(),
            ));
        }

        match self.classifier.mode.as_str() {
            "remote" => {
                let url = self.classifier.base_url.as_str();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(AutoReplyError::ConfigError(format!(
                        "classifier.base_url must be an http(s) URL, got '{}'",
                        url
                    )));
                }
            }
            "keywords" => {}
            other => {
                return Err(AutoReplyError::ConfigError(format!(
                    "Invalid classifier.mode: '{}'. Must be 'remote' or 'keywords'",
                    other
                )));
            }
        }

        if self.classifier.request_timeout_secs == Some(0) {
            return Err(AutoReplyError::ConfigError(
                "classifier.request_timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        if !(1..=20).contains(&self.replies.max_concurrent_sends) {
            return Err(AutoReplyError::ConfigError(
                "replies.max_concurrent_sends must be between 1 and 20".to_string(),
            ));
        }

        if self.replies.display_limit == 0 {
            return Err(AutoReplyError::ConfigError(
                "replies.display_limit must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn assert_invalid(config: &Config, needle: &str) {
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains(needle),
            "expected '{}' in '{}'",
            needle,
            err
        );
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.polling.interval_secs, 30);
        assert_eq!(config.polling.max_results, 10);
        assert_eq!(config.polling.account, "me");
        assert_eq!(config.polling.label, "INBOX");
        assert_eq!(config.polling.min_text_len, 10);
        assert_eq!(config.classifier.mode, "remote");
        assert_eq!(config.classifier.style, ReplyStyle::Padrao);
        assert!(config.classifier.request_timeout_secs.is_none());
        assert_eq!(config.replies.max_concurrent_sends, 5);
        assert_eq!(config.replies.display_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_bounds() {
        let mut config = Config::default();
        config.polling.interval_secs = 0;
        assert_invalid(&config, "interval_secs");

        config.polling.interval_secs = 3601;
        assert_invalid(&config, "interval_secs");

        config.polling.interval_secs = 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_results_bounds() {
        let mut config = Config::default();
        config.polling.max_results = 0;
        assert_invalid(&config, "max_results");

        config.polling.max_results = 51;
        assert_invalid(&config, "max_results");
    }

    #[test]
    fn test_classifier_mode_and_url() {
        let mut config = Config::default();
        config.classifier.mode = "llm".to_string();
        assert_invalid(&config, "classifier.mode");

        config.classifier.mode = "remote".to_string();
        config.classifier.base_url = "localhost:8000".to_string();
        assert_invalid(&config, "base_url");

        config.classifier.mode = "keywords".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.classifier.request_timeout_secs = Some(0);
        assert_invalid(&config, "request_timeout_secs");

        config.classifier.request_timeout_secs = Some(60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reply_limits() {
        let mut config = Config::default();
        config.replies.max_concurrent_sends = 0;
        assert_invalid(&config, "max_concurrent_sends");

        config.replies.max_concurrent_sends = 21;
        assert_invalid(&config, "max_concurrent_sends");

        config.replies.max_concurrent_sends = 20;
        config.replies.display_limit = 0;
        assert_invalid(&config, "display_limit");
    }

    #[test]
    fn test_empty_account_rejected() {
        let mut config = Config::default();
        config.polling.account = "  ".to_string();
        assert_invalid(&config, "polling.account");
    }

    #[tokio::test]
    async fn test_config_load_save_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = Config::default();
        config.classifier.style = ReplyStyle::Formal;
        config.classifier.request_timeout_secs = Some(45);
        config.save(path).await.unwrap();

        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.classifier.style, ReplyStyle::Formal);
        assert_eq!(loaded.classifier.request_timeout_secs, Some(45));
        assert_eq!(loaded.polling.interval_secs, config.polling.interval_secs);
    }

    #[tokio::test]
    async fn test_config_load_nonexistent_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("missing.toml")).await.unwrap();
        assert_eq!(config.polling.interval_secs, 30);
    }

    #[tokio::test]
    async fn test_config_load_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "this is not valid toml {[}]")
            .await
            .unwrap();

        let err = Config::load(temp_file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_config_partial_with_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let partial = r#"
[polling]
interval_secs = 120

[classifier]
mode = "keywords"
style = "objetiva"
"#;
        tokio::fs::write(temp_file.path(), partial).await.unwrap();

        let config = Config::load(temp_file.path()).await.unwrap();
        assert_eq!(config.polling.interval_secs, 120);
        assert_eq!(config.classifier.mode, "keywords");
        assert_eq!(config.classifier.style, ReplyStyle::Objetiva);
        assert_eq!(config.polling.max_results, 10);
        assert_eq!(config.replies.max_concurrent_sends, 5);
    }

    #[tokio::test]
    async fn test_config_load_rejects_invalid_values() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[polling]\nmax_results = 500\n")
            .await
            .unwrap();

        assert!(Config::load(temp_file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_config_create_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::create_example(&path).await.unwrap();
        assert!(path.exists());
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.classifier.base_url, default_base_url());
    }
}
