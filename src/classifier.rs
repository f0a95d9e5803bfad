//! Classification backends: the remote analyzer service and an offline
//! keyword classifier with canned replies

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::ClassifierConfig;
use crate::error::{AutoReplyError, Result};
use crate::models::{Category, Classification, ClassificationMetadata};

/// Classifies the combined subject + body text of one message
#[async_trait]
pub trait ClassificationClient: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification>;
}

#[async_trait]
impl<T: ClassificationClient + ?Sized> ClassificationClient for Arc<T> {
    async fn classify(&self, text: &str) -> Result<Classification> {
        self.as_ref().classify(text).await
    }
}

/// Tone requested from the analyzer's reply generator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStyle {
    #[default]
    Padrao,
    Formal,
    Informal,
    Detalhada,
    Objetiva,
}

impl ReplyStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStyle::Padrao => "padrao",
            ReplyStyle::Formal => "formal",
            ReplyStyle::Informal => "informal",
            ReplyStyle::Detalhada => "detalhada",
            ReplyStyle::Objetiva => "objetiva",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerHealth {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Client for the hosted analyzer (`/api/v1/analyze`)
pub struct HttpClassificationClient {
    http: reqwest::Client,
    base_url: String,
    style: ReplyStyle,
}

impl HttpClassificationClient {
    /// `timeout` of None leaves requests unbounded
    pub fn new(base_url: &str, style: ReplyStyle, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| AutoReplyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            style,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<AnalyzerHealth> {
        let health = self
            .http
            .get(self.endpoint("health"))
            .send()
            .await?
            .error_for_status()?
            .json::<AnalyzerHealth>()
            .await?;
        Ok(health)
    }
}

#[async_trait]
impl ClassificationClient for HttpClassificationClient {
    async fn classify(&self, text: &str) -> Result<Classification> {
        let started = Instant::now();
        let form = reqwest::multipart::Form::new()
            .text("text", text.to_string())
            .text("style", self.style.as_str());

        let classification = self
            .http
            .post(self.endpoint("analyze"))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json::<Classification>()
            .await?;

        debug!(
            category = %classification.category,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analyzer responded"
        );
        Ok(classification)
    }
}

static PRODUCTIVE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(urgente|importante|negócio|proposta|reunião|projeto|contrato|orçamento|pedido|solicitação)",
    )
    .unwrap()
});

const PRODUCTIVE_REPLY: &str = "Prezado(a), recebemos sua solicitação e ela já está sendo analisada por nossa equipe. Agradecemos o contato.";
const UNPRODUCTIVE_REPLY: &str = "Obrigado pelo seu contato. Sua mensagem foi recebida.";

/// Offline rule set used when the analyzer is not configured
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn categorize(&self, text: &str) -> Category {
        if PRODUCTIVE_KEYWORDS.is_match(text) {
            Category::Productive
        } else {
            Category::Unproductive
        }
    }

    pub fn canned_reply(category: Category) -> &'static str {
        match category {
            Category::Productive => PRODUCTIVE_REPLY,
            Category::Unproductive => UNPRODUCTIVE_REPLY,
        }
    }
}

#[async_trait]
impl ClassificationClient for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification> {
        let started = Instant::now();
        let category = self.categorize(text);

        Ok(Classification {
            category,
            suggested_reply: Self::canned_reply(category).to_string(),
            metadata: Some(ClassificationMetadata {
                processing_time_seconds: Some(started.elapsed().as_secs_f64()),
                text_length: Some(text.chars().count()),
                processed_at: Some(Utc::now().to_rfc3339()),
            }),
        })
    }
}

/// Build the classifier selected by `classifier.mode`
pub fn from_config(config: &ClassifierConfig) -> Result<Arc<dyn ClassificationClient>> {
    match config.mode.as_str() {
        "remote" => {
            info!("Using remote analyzer at {}", config.base_url);
            let timeout = config.request_timeout_secs.map(Duration::from_secs);
            let client = HttpClassificationClient::new(&config.base_url, config.style, timeout)?;
            Ok(Arc::new(client))
        }
        "keywords" => {
            info!("Using offline keyword classifier");
            Ok(Arc::new(KeywordClassifier::new()))
        }
        other => Err(AutoReplyError::ConfigError(format!(
            "Unknown classifier mode '{}'",
            other
        ))),
    }
}
