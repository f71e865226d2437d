use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_otp_email(&self, to_email: &str, code: &str, purpose: &str)
        -> Result<(), AppError>;

    async fn send_security_alert_email(
        &self,
        to_email: &str,
        subject: &str,
        detail: &str,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &crate::config::SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let email = Message::builder()
            .from(self.from_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::InternalError(e.into()))?;

        // Send in the blocking pool to keep the async runtime responsive
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), to = %to_email, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_otp_email(
        &self,
        to_email: &str,
        code: &str,
        purpose: &str,
    ) -> Result<(), AppError> {
        let subject = match purpose {
            "password_reset" => "Your password reset code",
            _ => "Your verification code",
        };
        let body = format!(
            "Your one-time code is: {}\n\n\
             It expires in 10 minutes. If you did not request this code, you can ignore \
             this email.",
            code
        );
        self.send_email(to_email, subject, &body).await
    }

    async fn send_security_alert_email(
        &self,
        to_email: &str,
        subject: &str,
        detail: &str,
    ) -> Result<(), AppError> {
        let body = format!(
            "{}\n\nIf this was not you, change your password and sign out of all devices \
             immediately.",
            detail
        );
        self.send_email(to_email, subject, &body).await
    }
}

/// Records outgoing mail instead of sending it. Tests read the captured
/// codes back out.
#[derive(Default)]
pub struct MockEmailService {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last message body captured for an address, if any.
    pub fn last_body_for(&self, to_email: &str) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(to, _)| to == to_email)
            .map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_otp_email(
        &self,
        to_email: &str,
        code: &str,
        _purpose: &str,
    ) -> Result<(), AppError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to_email.to_string(), code.to_string()));
        }
        Ok(())
    }

    async fn send_security_alert_email(
        &self,
        to_email: &str,
        subject: &str,
        _detail: &str,
    ) -> Result<(), AppError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to_email.to_string(), subject.to_string()));
        }
        Ok(())
    }
}
