use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Mutex;

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send_otp_sms(&self, to_number: &str, code: &str) -> Result<(), AppError>;
}

/// Delivers SMS through an outbound webhook (SMS gateway HTTP API).
pub struct WebhookSmsService {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookSmsService {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl SmsProvider for WebhookSmsService {
    async fn send_otp_sms(&self, to_number: &str, code: &str) -> Result<(), AppError> {
        let payload = serde_json::json!({
            "to": to_number,
            "message": format!("Your verification code is {}. It expires in 10 minutes.", code),
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("SMS dispatch failed: {}", e)))?;

        if !response.status().is_success() {
            tracing::error!(to = %to_number, status = %response.status(), "SMS gateway rejected message");
            return Err(AppError::InternalError(anyhow::anyhow!(
                "SMS gateway returned {}",
                response.status()
            )));
        }

        tracing::info!(to = %to_number, "SMS sent");
        Ok(())
    }
}

/// Records outgoing SMS instead of sending them.
#[derive(Default)]
pub struct MockSmsService {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl MockSmsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code_for(&self, to_number: &str) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(to, _)| to == to_number)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl SmsProvider for MockSmsService {
    async fn send_otp_sms(&self, to_number: &str, code: &str) -> Result<(), AppError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to_number.to_string(), code.to_string()));
        }
        Ok(())
    }
}
