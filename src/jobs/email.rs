//! Background email delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::JobError;
use crate::job::{Job, JobContext};

/// Sends one email. Delivery is logged; plug a mail service in `deliver`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailJob {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

impl SendEmailJob {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            message: message.into(),
        }
    }

    async fn deliver(&self) -> Result<(), JobError> {
        let (user, domain) = self
            .to
            .split_once('@')
            .ok_or_else(|| JobError::failed(format!("invalid recipient '{}'", self.to)))?;
        if user.is_empty() || !domain.contains('.') {
            return Err(JobError::failed(format!("invalid recipient '{}'", self.to)));
        }

        info!(to = %self.to, subject = %self.subject, bytes = self.message.len(), "Email sent");
        Ok(())
    }
}

#[async_trait]
impl Job for SendEmailJob {
    const CLASS: &'static str = "emails.send";

    fn max_tries(&self) -> u32 {
        3
    }

    fn timeout_seconds(&self) -> u64 {
        30
    }

    fn retry_after_seconds(&self) -> u64 {
        10
    }

    fn queue(&self) -> &str {
        "emails"
    }

    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
        info!(to = %self.to, attempt = ctx.attempts, "Sending email");
        self.deliver().await
    }

    async fn failed(&self, ctx: &JobContext, error: &JobError) {
        error!(
            to = %self.to,
            attempts = ctx.attempts,
            error = %error,
            "Giving up on email"
        );
    }
}
