//! Email notifications delivered through the message queue.
//!
//! Emails are not sent from the request path. They are composed here,
//! serialized as [`EmailMessage`] and enqueued for the delivery worker.

use std::sync::Arc;

use crate::config::Config;
use crate::models::email::EmailMessage;
use crate::storage::{MessageQueue, StorageError};

/// Composes emails and enqueues them on the configured email queue.
#[derive(Clone)]
pub struct Mailer {
    config: Arc<Config>,
    queue: Arc<dyn MessageQueue>,
}

impl Mailer {
    pub fn new(config: Arc<Config>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { config, queue }
    }

    /// Build the queue payload for one email.
    ///
    /// Outside PROD every email is redirected to `DEFAULT_FROM_EMAIL` so test
    /// environments never mail real users.
    pub fn compose(
        &self,
        users: &[String],
        bcc_email: &[String],
        subject: &str,
        body: String,
    ) -> EmailMessage {
        let (to_email, bcc_email) = if self.config.is_production() {
            (users.join(","), bcc_email.join(","))
        } else {
            (
                self.config.default_from_email.clone(),
                self.config.default_from_email.clone(),
            )
        };

        EmailMessage {
            system: self.config.email_system.clone(),
            to_email,
            bcc_email,
            subject: subject.to_string(),
            env: self.config.email_env_tag().to_string(),
            body,
        }
    }

    /// Compose one email and enqueue it. Does not wait for delivery.
    pub async fn send_email(
        &self,
        users: &[String],
        bcc_email: &[String],
        subject: &str,
        body: String,
    ) -> Result<(), StorageError> {
        let message = self.compose(users, bcc_email, subject, body);
        self.enqueue(&self.config.sb_email_queue, vec![message]).await
    }

    /// Enqueue already composed messages on `queue_name`.
    pub async fn enqueue(
        &self,
        queue_name: &str,
        messages: Vec<EmailMessage>,
    ) -> Result<(), StorageError> {
        let payloads = messages
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        self.queue.send_messages(queue_name, payloads).await
    }
}
