//! Sensor data processing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::JobError;
use crate::job::{Job, JobContext};

const HIGH_TEMPERATURE: f64 = 30.0;
const HIGH_HUMIDITY: f64 = 80.0;

/// Summarises one batch of readings from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDataJob {
    pub device_id: String,
    /// Reading name to value, e.g. `{"temperature": 25.5}`.
    pub sensor_data: Map<String, Value>,
}

/// Alerts raised while processing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    HighTemperature,
    HighHumidity,
}

impl ProcessDataJob {
    pub fn new(device_id: impl Into<String>, sensor_data: Map<String, Value>) -> Self {
        Self {
            device_id: device_id.into(),
            sensor_data,
        }
    }

    /// Validates the readings and returns the alerts they trigger.
    pub fn analyse(&self) -> Result<Vec<Alert>, JobError> {
        let mut alerts = Vec::new();

        for (name, value) in &self.sensor_data {
            let reading = value.as_f64().ok_or_else(|| {
                JobError::failed(format!(
                    "reading '{}' from device {} is not numeric",
                    name, self.device_id
                ))
            })?;

            match name.as_str() {
                "temperature" if reading > HIGH_TEMPERATURE => alerts.push(Alert::HighTemperature),
                "humidity" if reading > HIGH_HUMIDITY => alerts.push(Alert::HighHumidity),
                _ => {}
            }
        }

        Ok(alerts)
    }
}

#[async_trait]
impl Job for ProcessDataJob {
    const CLASS: &'static str = "data.process";

    fn max_tries(&self) -> u32 {
        5
    }

    fn timeout_seconds(&self) -> u64 {
        120
    }

    fn retry_after_seconds(&self) -> u64 {
        5
    }

    fn queue(&self) -> &str {
        "data-processing"
    }

    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
        info!(
            device_id = %self.device_id,
            readings = self.sensor_data.len(),
            attempt = ctx.attempts,
            "Processing sensor data"
        );

        for alert in self.analyse()? {
            match alert {
                Alert::HighTemperature => warn!(
                    device_id = %self.device_id,
                    temperature = ?self.sensor_data.get("temperature"),
                    "High temperature detected"
                ),
                Alert::HighHumidity => warn!(
                    device_id = %self.device_id,
                    humidity = ?self.sensor_data.get("humidity"),
                    "High humidity detected"
                ),
            }
        }

        info!(device_id = %self.device_id, "Sensor data processed");
        Ok(())
    }

    async fn failed(&self, ctx: &JobContext, error: &JobError) {
        error!(
            device_id = %self.device_id,
            attempts = ctx.attempts,
            error = %error,
            "Giving up on sensor data"
        );
    }
}
