use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// The five raw readings the RUL model was trained on.
///
/// Field order and serialized names match the training columns exactly:
/// `Voltage, Charge_Current, Discharge_Current, Temperature, Humidity`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RulFeatures {
    #[serde(rename = "Voltage")]
    pub voltage: f64,
    #[serde(rename = "Charge_Current")]
    pub charge_current: f64,
    #[serde(rename = "Discharge_Current")]
    pub discharge_current: f64,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
    #[serde(rename = "Humidity")]
    pub humidity: f64,
}

impl RulFeatures {
    /// Column names in model order.
    pub const COLUMNS: [&'static str; 5] = [
        "Voltage",
        "Charge_Current",
        "Discharge_Current",
        "Temperature",
        "Humidity",
    ];

    /// Values in model order.
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.voltage,
            self.charge_current,
            self.discharge_current,
            self.temperature,
            self.humidity,
        ]
    }
}

/// Error type for RUL prediction.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("predictor unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
}

/// A pretrained remaining-useful-life regressor.
///
/// The monitor only ever calls this once per session, at startup.
pub trait RulPredictor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(
        &self,
        features: RulFeatures,
    ) -> Pin<Box<dyn Future<Output = Result<f64, PredictError>> + Send + '_>>;
}

/// Mock predictor for testing. Returns a fixed value or a fixed failure.
#[derive(Debug, Clone)]
pub struct MockPredictor {
    pub rul: Option<f64>,
}

impl MockPredictor {
    pub fn new(rul: f64) -> Self {
        Self { rul: Some(rul) }
    }

    /// A predictor whose every call fails with `Unavailable`.
    pub fn failing() -> Self {
        Self { rul: None }
    }
}

impl RulPredictor for MockPredictor {
    fn name(&self) -> &str {
        "mock"
    }

    fn predict(
        &self,
        _features: RulFeatures,
    ) -> Pin<Box<dyn Future<Output = Result<f64, PredictError>> + Send + '_>> {
        let rul = self.rul;
        Box::pin(async move {
            rul.ok_or_else(|| PredictError::Unavailable("mock configured to fail".into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RulFeatures {
        RulFeatures {
            voltage: 11.8,
            charge_current: 120.0,
            discharge_current: 340.0,
            temperature: 31.5,
            humidity: 48.0,
        }
    }

    #[test]
    fn features_serialize_with_training_column_names() {
        let json = serde_json::to_string(&sample()).unwrap();
        let mut last = 0;
        for col in RulFeatures::COLUMNS {
            let pos = json.find(&format!("\"{col}\"")).expect("column present");
            assert!(pos >= last, "{col} out of order in {json}");
            last = pos;
        }
    }

    #[test]
    fn as_array_follows_column_order() {
        assert_eq!(sample().as_array(), [11.8, 120.0, 340.0, 31.5, 48.0]);
    }

    #[tokio::test]
    async fn mock_predictor_returns_value() {
        let mock = MockPredictor::new(412.5);
        assert_eq!(mock.predict(sample()).await.unwrap(), 412.5);
        assert_eq!(mock.name(), "mock");
    }

    #[tokio::test]
    async fn failing_mock_returns_unavailable() {
        let mock = MockPredictor::failing();
        let err = mock.predict(sample()).await.unwrap_err();
        assert!(matches!(err, PredictError::Unavailable(_)));
    }
}
