//! Built-in jobs.
//!
//! These are the job types the `queue-forge` binary can run and dispatch
//! out of the box. Applications embedding the library register their own.

pub mod data;
pub mod email;
pub mod report;

pub use data::ProcessDataJob;
pub use email::SendEmailJob;
pub use report::{GenerateReportJob, ReportType};

use crate::job::JobRegistry;

/// Registry holding every built-in job.
pub fn registry() -> JobRegistry {
    JobRegistry::new()
        .with::<SendEmailJob>()
        .with::<ProcessDataJob>()
        .with::<GenerateReportJob>()
}
