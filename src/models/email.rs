//! Email payload handed to the delivery worker through the message queue.

use serde::{Deserialize, Serialize};

/// Queue message consumed by the email worker.
///
/// # JSON Example
///
/// ```json
/// {
///   "system": "base_api",
///   "to_email": "maria@example.com",
///   "bcc_email": "",
///   "subject": "The files have been uploaded!",
///   "env": "prod",
///   "body": "<p>All files were uploaded</p>"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub system: String,

    /// Comma separated recipients
    pub to_email: String,

    /// Comma separated blind-copy recipients
    pub bcc_email: String,
    pub subject: String,

    /// `dev` or `prod`
    pub env: String,

    /// Pre-rendered HTML body
    pub body: String,
}
