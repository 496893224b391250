//! The job serialization envelope.
//!
//! Every driver stores jobs as the JSON form of `JobRecord`:
//!
//! ```text
//! {"class_identity": "emails.send", "data": {...}, "max_tries": 3,
//!  "timeout_seconds": 60, "retry_after_seconds": 0, "queue": "default"}
//! ```
//!
//! Missing policy fields decode to the documented defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Job;
use crate::error::JobError;

/// Default maximum number of attempts for a job.
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Default handler deadline in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Default delay before a failed attempt is retried.
pub const DEFAULT_RETRY_AFTER_SECONDS: u64 = 0;

/// Default queue name.
pub const DEFAULT_QUEUE: &str = "default";

fn default_max_tries() -> u32 {
    DEFAULT_MAX_TRIES
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

/// Serialized job: class identity, application data and execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Registry key of the job type.
    pub class_identity: String,
    /// Application-defined fields.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_after_seconds: u64,
    #[serde(default = "default_queue")]
    pub queue: String,
}

impl JobRecord {
    /// Creates a record with default policy.
    pub fn new(class_identity: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            class_identity: class_identity.into(),
            data,
            max_tries: DEFAULT_MAX_TRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            retry_after_seconds: DEFAULT_RETRY_AFTER_SECONDS,
            queue: DEFAULT_QUEUE.to_string(),
        }
    }

    /// Captures a job's fields and policy.
    ///
    /// # Errors
    ///
    /// Returns `JobError::InvalidPayload` if the job does not serialize to a
    /// JSON object.
    pub fn from_job<J: Job>(job: &J) -> Result<Self, JobError> {
        let data = match serde_json::to_value(job)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(JobError::InvalidPayload(format!(
                    "job '{}' must serialize to an object, got {}",
                    J::CLASS,
                    json_kind(&other)
                )))
            }
        };

        Ok(Self::new(J::CLASS, data)
            .with_max_tries(job.max_tries())
            .with_timeout_seconds(job.timeout_seconds())
            .with_retry_after_seconds(job.retry_after_seconds())
            .with_queue(job.queue()))
    }

    /// Sets the attempt ceiling (at least 1).
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries.max(1);
        self
    }

    /// Sets the handler deadline (at least 1 second).
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds.max(1);
        self
    }

    /// Sets the retry delay.
    pub fn with_retry_after_seconds(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = seconds;
        self
    }

    /// Sets the target queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Encodes the record as the JSON payload stored by drivers.
    pub fn to_payload(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a stored payload, normalising out-of-range policy values.
    ///
    /// # Errors
    ///
    /// Returns `JobError::InvalidPayload` for anything that is not an
    /// envelope with a non-empty class identity.
    pub fn from_payload(payload: &str) -> Result<Self, JobError> {
        let mut record: JobRecord = serde_json::from_str(payload)?;

        if record.class_identity.trim().is_empty() {
            return Err(JobError::InvalidPayload(
                "missing class identity".to_string(),
            ));
        }
        record.max_tries = record.max_tries.max(1);
        record.timeout_seconds = record.timeout_seconds.max(1);
        if record.queue.is_empty() {
            record.queue = default_queue();
        }

        Ok(record)
    }

    /// Handler deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
