//! Class-identity registry.
//!
//! Workers never load code dynamically: every job type a worker can run is
//! registered at start-up, and a claimed payload is turned back into a job by
//! looking up its `class_identity` here.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use super::{Job, JobRecord, RunnableJob};
use crate::error::JobError;

type Constructor = Box<dyn Fn(Value) -> Result<Box<dyn RunnableJob>, JobError> + Send + Sync>;

/// A payload decoded into its envelope and a runnable job.
pub struct DecodedJob {
    pub record: JobRecord,
    pub job: Box<dyn RunnableJob>,
}

impl fmt::Debug for DecodedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedJob")
            .field("record", &self.record)
            .field("class", &self.job.class_identity())
            .finish()
    }
}

/// Maps class identities to job constructors.
#[derive(Default)]
pub struct JobRegistry {
    constructors: HashMap<String, Constructor>,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job type under its `CLASS`.
    ///
    /// Registering the same class twice replaces the earlier entry.
    pub fn register<J: Job>(&mut self) -> &mut Self {
        let constructor: Constructor = Box::new(|data| {
            let job = decode_data::<J>(data)?;
            Ok(Box::new(job) as Box<dyn RunnableJob>)
        });
        self.constructors.insert(J::CLASS.to_string(), constructor);
        self
    }

    /// Builder-style variant of `register`.
    pub fn with<J: Job>(mut self) -> Self {
        self.register::<J>();
        self
    }

    /// Returns whether a class identity is registered.
    pub fn contains(&self, class_identity: &str) -> bool {
        self.constructors.contains_key(class_identity)
    }

    /// Returns the registered class identities, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    /// Returns the number of registered job types.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Returns whether no job types are registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Builds the job described by an envelope.
    ///
    /// # Errors
    ///
    /// Returns `JobError::UnknownClass` for unregistered identities and
    /// `JobError::InvalidPayload` when `data` does not fit the job type.
    pub fn build(&self, record: &JobRecord) -> Result<Box<dyn RunnableJob>, JobError> {
        let constructor = self
            .constructors
            .get(&record.class_identity)
            .ok_or_else(|| JobError::UnknownClass(record.class_identity.clone()))?;

        constructor(Value::Object(record.data.clone()))
    }

    /// Builds an envelope for `class_identity` from raw data, carrying the
    /// job type's own policy.
    ///
    /// # Errors
    ///
    /// Fails like `build` when the class is unknown or the data does not fit.
    pub fn record_for(
        &self,
        class_identity: &str,
        data: Map<String, Value>,
    ) -> Result<JobRecord, JobError> {
        let job = self.build(&JobRecord::new(class_identity, data))?;
        job.to_record()
    }

    /// Decodes a stored payload into its envelope and job.
    pub fn decode(&self, payload: &str) -> Result<DecodedJob, JobError> {
        let record = JobRecord::from_payload(payload)?;
        let job = self.build(&record)?;
        Ok(DecodedJob { record, job })
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("classes", &self.classes())
            .finish()
    }
}

/// Deserializes job data, accepting an empty map for jobs serialized as unit.
fn decode_data<J: Job>(data: Value) -> Result<J, JobError> {
    let empty = matches!(&data, Value::Object(map) if map.is_empty());
    match serde_json::from_value::<J>(data) {
        Ok(job) => Ok(job),
        Err(_) if empty => serde_json::from_value::<J>(Value::Null)
            .map_err(|e| JobError::InvalidPayload(format!("{}: {}", J::CLASS, e))),
        Err(e) => Err(JobError::InvalidPayload(format!("{}: {}", J::CLASS, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobContext;
    use crate::queue::EntryId;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Invoice {
        number: u32,
        lines: Vec<String>,
    }

    #[async_trait]
    impl Job for Invoice {
        const CLASS: &'static str = "billing.invoice";

        fn queue(&self) -> &str {
            "billing"
        }

        fn max_tries(&self) -> u32 {
            5
        }

        async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
            if self.lines.is_empty() {
                Err(JobError::failed(format!("invoice {} has no lines", self.number)))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Heartbeat;

    #[async_trait]
    impl Job for Heartbeat {
        const CLASS: &'static str = "system.heartbeat";

        async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn ctx() -> JobContext {
        JobContext {
            entry_id: EntryId::Key("default:1".to_string()),
            queue: "default".to_string(),
            attempts: 1,
            max_tries: 3,
        }
    }

    #[test]
    fn test_registry_register_and_classes() {
        let registry = JobRegistry::new().with::<Invoice>().with::<Heartbeat>();

        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
        assert!(registry.contains("billing.invoice"));
        assert!(!registry.contains("billing.refund"));
        assert_eq!(registry.classes(), vec!["billing.invoice", "system.heartbeat"]);
    }

    #[tokio::test]
    async fn test_registry_decode_roundtrip() {
        let registry = JobRegistry::new().with::<Invoice>();
        let job = Invoice {
            number: 17,
            lines: vec!["widget".to_string()],
        };
        let payload = JobRecord::from_job(&job).unwrap().to_payload().unwrap();

        let decoded = registry.decode(&payload).expect("registered class decodes");

        assert_eq!(decoded.record.class_identity, "billing.invoice");
        assert_eq!(decoded.record.data["number"], json!(17));
        assert_eq!(decoded.job.class_identity(), "billing.invoice");
        assert!(decoded.job.run(&ctx()).await.is_ok());
    }

    #[test]
    fn test_registry_unknown_class() {
        let registry = JobRegistry::new().with::<Invoice>();
        let payload = r#"{"class_identity": "billing.refund", "data": {}}"#;

        let err = registry.decode(payload).unwrap_err();
        assert_eq!(err, JobError::UnknownClass("billing.refund".to_string()));
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_registry_data_mismatch_is_corrupt() {
        let registry = JobRegistry::new().with::<Invoice>();
        let payload = r#"{"class_identity": "billing.invoice", "data": {"number": "x"}}"#;

        let err = registry.decode(payload).unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(ref msg) if msg.contains("billing.invoice")));
    }

    #[test]
    fn test_registry_unit_job_from_empty_data() {
        let registry = JobRegistry::new().with::<Heartbeat>();
        let payload = JobRecord::from_job(&Heartbeat).unwrap().to_payload().unwrap();

        let decoded = registry.decode(&payload).expect("unit job decodes");
        assert!(decoded.record.data.is_empty());
        assert_eq!(decoded.job.class_identity(), "system.heartbeat");
    }

    #[test]
    fn test_record_for_applies_job_policy() {
        let registry = JobRegistry::new().with::<Invoice>();
        let data = json!({"number": 3, "lines": ["a"]});
        let data = data.as_object().cloned().unwrap();

        let record = registry.record_for("billing.invoice", data).unwrap();

        assert_eq!(record.queue, "billing");
        assert_eq!(record.max_tries, 5);
        assert_eq!(record.data["lines"], json!(["a"]));
        assert!(matches!(
            registry.record_for("billing.refund", Map::new()),
            Err(JobError::UnknownClass(_))
        ));
    }
}
