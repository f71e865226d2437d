//! Security alert publisher - persisted alerts plus fire-and-forget email
//! fan-out. A pure sink: nothing in the core reads alerts back for its own
//! decisions.

use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::SecurityAlert;
use crate::services::email::EmailProvider;
use crate::services::store::AuthStore;

#[derive(Clone)]
pub struct SecurityAlertPublisher {
    store: Arc<dyn AuthStore>,
    email: Option<Arc<dyn EmailProvider>>,
}

impl SecurityAlertPublisher {
    pub fn new(store: Arc<dyn AuthStore>, email: Option<Arc<dyn EmailProvider>>) -> Self {
        Self { store, email }
    }

    /// Persist the alert. The write is synchronous: theft-response alerts
    /// must be durable before the triggering call returns.
    pub async fn publish(&self, alert: SecurityAlert) -> Result<(), AppError> {
        tracing::warn!(
            alert_type = %alert.alert_type_code,
            severity = %alert.severity_code,
            user_id = ?alert.user_id,
            ip = ?alert.ip_text,
            detail = %alert.detail_text,
            "Security alert"
        );
        self.store.insert_alert(&alert).await
    }

    /// Persist the alert, then notify the user's address out-of-band. The
    /// email leg is fire-and-forget.
    pub async fn publish_and_notify(
        &self,
        alert: SecurityAlert,
        to_email: &str,
    ) -> Result<(), AppError> {
        let subject = match alert.alert_type_code.as_str() {
            "token_reuse_detected" => "Security alert: suspicious sign-in activity",
            "new_device_login" => "New sign-in to your account",
            "password_changed" => "Your password was changed",
            "two_factor_disabled" => "Two-factor authentication was disabled",
            _ => "Security alert for your account",
        };
        let detail = alert.detail_text.clone();
        self.publish(alert).await?;

        if let Some(email) = &self.email {
            let email = email.clone();
            let to = to_email.to_string();
            let subject = subject.to_string();
            tokio::spawn(async move {
                if let Err(e) = email.send_security_alert_email(&to, &subject, &detail).await {
                    tracing::error!(to = %to, error = %e, "Failed to send security alert email");
                }
            });
        }
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SecurityAlert>, AppError> {
        self.store.list_alerts_for_user(user_id).await
    }

    pub async fn mark_read(&self, alert_id: Uuid) -> Result<bool, AppError> {
        self.store.mark_alert_read(alert_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertSeverity, AlertType};
    use crate::services::store::MemoryStore;

    #[tokio::test]
    async fn test_publish_persists_alert() {
        let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
        let publisher = SecurityAlertPublisher::new(store.clone(), None);
        let user_id = Uuid::new_v4();

        publisher
            .publish(SecurityAlert::new(
                AlertType::NewDeviceLogin,
                AlertSeverity::Info,
                Some(user_id),
                Some("203.0.113.9"),
                Some("device-1"),
                "First login from device device-1",
            ))
            .await
            .unwrap();

        let alerts = publisher.list_for_user(user_id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].read_flag);
    }

    #[tokio::test]
    async fn test_mark_read_is_one_shot() {
        let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
        let publisher = SecurityAlertPublisher::new(store, None);
        let user_id = Uuid::new_v4();

        let alert = SecurityAlert::new(
            AlertType::PasswordChanged,
            AlertSeverity::Info,
            Some(user_id),
            None,
            None,
            "Password changed",
        );
        let alert_id = alert.alert_id;
        publisher.publish(alert).await.unwrap();

        assert!(publisher.mark_read(alert_id).await.unwrap());
        assert!(!publisher.mark_read(alert_id).await.unwrap());
    }
}
