//! Report generation, typically dispatched with a delay.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::JobError;
use crate::job::{Job, JobContext};

/// Reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Daily,
    Weekly,
    Monthly,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Daily => "daily",
            ReportType::Weekly => "weekly",
            ReportType::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(ReportType::Daily),
            "weekly" => Ok(ReportType::Weekly),
            "monthly" => Ok(ReportType::Monthly),
            other => Err(JobError::InvalidPayload(format!("unknown report type '{}'", other))),
        }
    }
}

/// Generates a report for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateReportJob {
    pub report_type: ReportType,
    pub user_id: u64,
}

impl GenerateReportJob {
    pub fn new(report_type: ReportType, user_id: u64) -> Self {
        Self {
            report_type,
            user_id,
        }
    }

    /// File name of the report generated at `at`.
    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        format!("{}_report_{}.pdf", self.report_type, at.format("%Y%m%d_%H%M%S"))
    }
}

#[async_trait]
impl Job for GenerateReportJob {
    const CLASS: &'static str = "reports.generate";

    fn max_tries(&self) -> u32 {
        2
    }

    fn timeout_seconds(&self) -> u64 {
        300
    }

    fn retry_after_seconds(&self) -> u64 {
        60
    }

    fn queue(&self) -> &str {
        "reports"
    }

    async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
        let file = self.file_name(Utc::now());
        info!(
            report_type = %self.report_type,
            user_id = self.user_id,
            file = %file,
            "Report generated"
        );
        Ok(())
    }

    async fn failed(&self, ctx: &JobContext, error: &JobError) {
        error!(
            report_type = %self.report_type,
            user_id = self.user_id,
            attempts = ctx.attempts,
            error = %error,
            "Report generation failed"
        );
    }
}
