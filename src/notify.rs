//! Outbound notifications.
//!
//! Everything here is best-effort: callers spawn the dispatch and only log a
//! failure. [`OutboxDispatcher`] writes events into `outbox_events`, from where
//! a relay outside this service forwards them to the message queue.

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::config::LinkConfig;

pub const EMAIL_TOPIC: &str = "notifications.email";
pub const USER_REGISTERED_TOPIC: &str = "user.registered";

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_welcome(&self, email: &str, name: &str) -> anyhow::Result<()>;

    async fn send_password_reset_link(
        &self,
        email: &str,
        name: &str,
        url: &str,
    ) -> anyhow::Result<()>;

    async fn send_password_changed(&self, email: &str) -> anyhow::Result<()>;

    async fn publish_registered(&self, account_id: Uuid) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationType {
    Email,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailNotification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub notification_type: NotificationType,
}

impl EmailNotification {
    fn html(to: &str, subject: &str, body: String) -> Self {
        Self {
            recipients: vec![to.to_owned()],
            subject: subject.to_owned(),
            body,
            is_html: true,
            notification_type: NotificationType::Email,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRegistered {
    pub user_id: Uuid,
}

/// Renders the three account emails.
#[derive(Debug, Clone)]
pub struct EmailTemplates {
    dashboard_url: String,
}

impl EmailTemplates {
    pub fn new(links: &LinkConfig) -> Self {
        Self {
            dashboard_url: format!(
                "{}{}",
                links.frontend_base_url, links.frontend_dashboard_path
            ),
        }
    }

    pub fn welcome(&self, email: &str, name: &str) -> EmailNotification {
        let greeting = if name.is_empty() { email } else { name };
        EmailNotification::html(
            email,
            "Welcome aboard!",
            format!(
                "<p>Dear <strong>{}</strong>,</p>\
                 <p>Thank you for signing up. Your account is ready.</p>\
                 <p><a href='{}'>Get started</a></p>",
                escape(greeting),
                escape(&self.dashboard_url),
            ),
        )
    }

    pub fn password_reset(&self, email: &str, name: &str, url: &str) -> EmailNotification {
        let greeting = if name.is_empty() { email } else { name };
        EmailNotification::html(
            email,
            "Reset your password",
            format!(
                "<p>Hi {},</p>\
                 <p>We received a request to reset the password for {}.</p>\
                 <p><a href='{}'>Reset password</a></p>\
                 <p>If you did not ask for this, you can ignore this email.</p>",
                escape(greeting),
                escape(email),
                escape(url),
            ),
        )
    }

    pub fn password_changed(&self, email: &str) -> EmailNotification {
        EmailNotification::html(
            email,
            "Password changed successfully",
            format!(
                "<p>The password for {} was just changed.</p>\
                 <p>If this was not you, reset your password immediately.</p>",
                escape(email),
            ),
        )
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
        .replace('"', "&quot;")
}

/// Appends events to the transactional outbox table.
#[derive(Clone)]
pub struct OutboxDispatcher {
    db: PgPool,
    templates: EmailTemplates,
}

impl OutboxDispatcher {
    pub fn new(db: PgPool, templates: EmailTemplates) -> Self {
        Self { db, templates }
    }

    async fn enqueue<T: Serialize>(&self, topic: &str, payload: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_value(payload).context("serialize outbox payload")?;
        sqlx::query("INSERT INTO outbox_events (id, topic, payload) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(topic)
            .bind(payload)
            .execute(&self.db)
            .await
            .with_context(|| format!("insert outbox event on {topic}"))?;
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for OutboxDispatcher {
    async fn send_welcome(&self, email: &str, name: &str) -> anyhow::Result<()> {
        self.enqueue(EMAIL_TOPIC, &self.templates.welcome(email, name))
            .await
    }

    async fn send_password_reset_link(
        &self,
        email: &str,
        name: &str,
        url: &str,
    ) -> anyhow::Result<()> {
        self.enqueue(EMAIL_TOPIC, &self.templates.password_reset(email, name, url))
            .await
    }

    async fn send_password_changed(&self, email: &str) -> anyhow::Result<()> {
        self.enqueue(EMAIL_TOPIC, &self.templates.password_changed(email))
            .await
    }

    async fn publish_registered(&self, account_id: Uuid) -> anyhow::Result<()> {
        self.enqueue(USER_REGISTERED_TOPIC, &UserRegistered { user_id: account_id })
            .await
    }
}

/// Logs instead of sending. Paired with the in-memory store in dev mode.
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send_welcome(&self, email: &str, _name: &str) -> anyhow::Result<()> {
        info!(%email, "welcome email (not sent)");
        Ok(())
    }

    async fn send_password_reset_link(
        &self,
        email: &str,
        _name: &str,
        _url: &str,
    ) -> anyhow::Result<()> {
        info!(%email, "password reset email (not sent)");
        Ok(())
    }

    async fn send_password_changed(&self, email: &str) -> anyhow::Result<()> {
        info!(%email, "password changed email (not sent)");
        Ok(())
    }

    async fn publish_registered(&self, account_id: Uuid) -> anyhow::Result<()> {
        info!(%account_id, "user registered event (not sent)");
        Ok(())
    }
}
