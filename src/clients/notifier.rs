use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::config::Config;
use crate::models::*;
use crate::sync::ReportPayload;

/// Delivers a run report to people. Delivery mechanics are up to the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &ReportPayload, recipients: &[String]) -> Result<()>;
}

/// Writes the report to the log; used when no webhook is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, payload: &ReportPayload, recipients: &[String]) -> Result<()> {
        tracing::info!(
            subject = %payload.subject,
            recipients = %recipients.join(";"),
            body = %payload.body,
            "Run report"
        );
        Ok(())
    }
}

/// Posts the report as JSON to a webhook (mail relay, chat hook, ...).
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_ms: u64, user_agent: &str, max_retries: u32, base_backoff_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .connect_timeout(std::time::Duration::from_millis(timeout_ms.min(10_000)))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, url, max_retries, base_backoff_ms })
    }

    pub fn from_config(cfg: &Config) -> Result<Option<Self>> {
        match &cfg.notify_webhook_url {
            Some(url) => Ok(Some(Self::new(
                url.clone(),
                cfg.http_timeout_ms,
                &cfg.http_user_agent,
                cfg.http_max_retries,
                cfg.http_retry_backoff_ms,
            )?)),
            None => Ok(None),
        }
    }

    // base, 2x base, 4x base, ...
    async fn pause(&self, attempt: u32) {
        let backoff_ms = self.base_backoff_ms.saturating_mul(1u64 << attempt.min(16));
        tracing::debug!(backoff_ms, "notification: backing off");
        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, payload: &ReportPayload, recipients: &[String]) -> Result<()> {
        let body = serde_json::json!({
            "subject": payload.subject,
            "body": payload.body,
            "recipients": recipients,
            "counts": payload.counts,
            "sample": payload.sample,
        });

        let mut attempt: u32 = 0;
        loop {
            tracing::info!(url = %self.url, attempt = attempt + 1, "notification: sending report");
            match self.client.post(&self.url).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        tracing::info!(recipients = recipients.len(), "notification: delivered");
                        return Ok(());
                    }
                    let text = response.text().await.unwrap_or_default();
                    let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if transient && attempt < self.max_retries {
                        tracing::warn!(status = %status, attempt = attempt + 1, "notification transient error; retrying");
                        self.pause(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(PipelineError::Notification(format!(
                        "Webhook error: status={} body={}",
                        status,
                        text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tracing::warn!(error = %e, attempt = attempt + 1, "notification request error; retrying");
                        self.pause(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(PipelineError::Notification(format!("Webhook request error: {}", e)));
                }
            }
        }
    }
}
