//! One-shot push of the startup reading and RUL estimate to the cloud dashboard.

use std::time::Duration;

use crate::config::MonitorCfg;
use crate::types::InitialReading;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry disabled: no api key configured")]
    Disabled,
    #[error("telemetry request failed: {0}")]
    Request(String),
    #[error("telemetry endpoint returned {0}")]
    Status(u16),
    #[error("telemetry client could not be built: {0}")]
    Client(String),
}

pub struct TelemetryPublisher {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl TelemetryPublisher {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, TelemetryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Client(e.to_string()))?;
        Ok(Self::with_client(url, api_key, client))
    }

    pub fn with_client(url: impl Into<String>, api_key: Option<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn from_cfg(cfg: &MonitorCfg) -> Result<Self, TelemetryError> {
        Self::new(cfg.telemetry_url.clone(), cfg.telemetry_api_key.clone(), cfg.io_timeout())
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// `field1..field6` = voltage, charge, discharge, temperature, humidity, rul.
    pub fn query(&self, initial: &InitialReading, rul: f64) -> Result<Vec<(&'static str, String)>, TelemetryError> {
        let key = self.api_key.as_ref().ok_or(TelemetryError::Disabled)?;
        Ok(vec![
            ("api_key", key.clone()),
            ("field1", initial.voltage.to_string()),
            ("field2", initial.charge_current.to_string()),
            ("field3", initial.discharge_current.to_string()),
            ("field4", initial.temperature.to_string()),
            ("field5", initial.humidity.to_string()),
            ("field6", rul.to_string()),
        ])
    }

    pub async fn publish(&self, initial: &InitialReading, rul: f64) -> Result<(), TelemetryError> {
        let query = self.query(initial, rul)?;
        let resp = self
            .client
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .map_err(|e| TelemetryError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TelemetryError::Status(resp.status().as_u16()));
        }
        tracing::info!(url = %self.url, "telemetry published");
        Ok(())
    }
}
