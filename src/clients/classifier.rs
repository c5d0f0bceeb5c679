use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::Config;
use crate::models::*;

/// External name → ethnicity label producer.
#[async_trait]
pub trait NameClassifier: Send + Sync {
    /// The label vocabulary this classifier may answer with.
    async fn recognized_labels(&self) -> Result<RecognizedLabels>;

    /// Label for `name`, or `None` when the classifier has no answer.
    async fn classify(&self, name: &str) -> Result<Option<String>>;
}

#[derive(Deserialize)]
struct ClassifyResponse {
    ethnicity: Option<String>,
}

#[derive(Deserialize)]
struct LabelsResponse {
    labels: Vec<String>,
}

/// Calls a classification service over HTTP:
/// `POST /classify {"name"}` → `{"ethnicity": string|null}` and `GET /labels` → `{"labels": [...]}`.
#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    base_url: String,
    label_override: Option<Vec<String>>,
}

impl HttpClassifier {
    pub fn new(base_url: String, timeout_ms: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            label_override: None,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let classifier = Self::new(cfg.classifier_url.clone(), cfg.http_timeout_ms, &cfg.http_user_agent)?;
        Ok(classifier.with_labels(cfg.recognized_labels.clone()))
    }

    /// Use a fixed label list instead of asking the service.
    pub fn with_labels(mut self, labels: Option<Vec<String>>) -> Self {
        self.label_override = labels;
        self
    }
}

#[async_trait]
impl NameClassifier for HttpClassifier {
    async fn recognized_labels(&self) -> Result<RecognizedLabels> {
        if let Some(labels) = &self.label_override {
            return Ok(RecognizedLabels::new(labels));
        }
        let url = format!("{}/labels", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Classifier(format!("Label list error: status={} body={}", status, text)));
        }
        let body: LabelsResponse = response.json().await?;
        let labels = RecognizedLabels::new(&body.labels);
        tracing::debug!(label_count = labels.len(), "Fetched recognized labels");
        Ok(labels)
    }

    async fn classify(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/classify", self.base_url);
        let response = self.client
            .post(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Classifier(format!(
                "Classify error: status={} body={}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }
        let body: ClassifyResponse = response.json().await?;
        Ok(body.ethnicity.filter(|label| !label.trim().is_empty()))
    }
}
