//! Linear surrogate of the RUL regressor.
//!
//! The training pipeline can export a linear fit as JSON:
//!
//! ```json
//! { "intercept": 1020.0,
//!   "coefficients": { "Voltage": 35.2, "Charge_Current": 0.01,
//!                     "Discharge_Current": -0.42, "Temperature": -6.1,
//!                     "Humidity": -0.3 } }
//! ```

use crate::provider::{PredictError, RulFeatures, RulPredictor};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

#[derive(Debug, Deserialize)]
struct ModelFile {
    intercept: f64,
    coefficients: HashMap<String, f64>,
}

/// `rul = intercept + Σ coefficient[i] * feature[i]`, clamped at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPredictor {
    intercept: f64,
    coefficients: [f64; 5],
}

impl LinearPredictor {
    pub fn new(intercept: f64, coefficients: [f64; 5]) -> Self {
        Self { intercept, coefficients }
    }

    /// Parse an exported model. Every training column must have a coefficient.
    pub fn from_json(text: &str) -> Result<Self, PredictError> {
        let model: ModelFile =
            serde_json::from_str(text).map_err(|e| PredictError::InvalidModel(e.to_string()))?;
        let mut coefficients = [0.0; 5];
        for (slot, col) in coefficients.iter_mut().zip(RulFeatures::COLUMNS) {
            *slot = *model
                .coefficients
                .get(col)
                .ok_or_else(|| PredictError::InvalidModel(format!("missing coefficient {col}")))?;
        }
        Ok(Self::new(model.intercept, coefficients))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PredictError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PredictError::InvalidModel(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn evaluate(&self, features: &RulFeatures) -> f64 {
        let sum: f64 = self
            .coefficients
            .iter()
            .zip(features.as_array())
            .map(|(c, x)| c * x)
            .sum();
        (self.intercept + sum).max(0.0)
    }
}

impl RulPredictor for LinearPredictor {
    fn name(&self) -> &str {
        "linear"
    }

    fn predict(
        &self,
        features: RulFeatures,
    ) -> Pin<Box<dyn Future<Output = Result<f64, PredictError>> + Send + '_>> {
        let rul = self.evaluate(&features);
        Box::pin(async move { Ok(rul) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MODEL: &str = r#"{
        "intercept": 1000.0,
        "coefficients": {
            "Voltage": 10.0,
            "Charge_Current": 0.1,
            "Discharge_Current": -0.5,
            "Temperature": -2.0,
            "Humidity": -1.0
        }
    }"#;

    fn features() -> RulFeatures {
        RulFeatures {
            voltage: 12.0,
            charge_current: 100.0,
            discharge_current: 200.0,
            temperature: 30.0,
            humidity: 50.0,
        }
    }

    #[test]
    fn evaluates_weighted_sum() {
        let p = LinearPredictor::from_json(MODEL).unwrap();
        // 1000 + 120 + 10 - 100 - 60 - 50
        assert!((p.evaluate(&features()) - 920.0).abs() < 1e-9);
    }

    #[test]
    fn negative_estimate_clamps_to_zero() {
        let p = LinearPredictor::new(-50.0, [0.0; 5]);
        assert_eq!(p.evaluate(&features()), 0.0);
    }

    #[test]
    fn missing_coefficient_rejected() {
        let text = r#"{"intercept": 1.0, "coefficients": {"Voltage": 1.0}}"#;
        let err = LinearPredictor::from_json(text).unwrap_err();
        assert!(err.to_string().contains("Charge_Current"));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MODEL.as_bytes()).unwrap();
        let p = LinearPredictor::from_path(file.path()).unwrap();
        let rul = p.predict(features()).await.unwrap();
        assert!((rul - 920.0).abs() < 1e-9);
    }

    #[test]
    fn unreadable_path_is_invalid_model() {
        let err = LinearPredictor::from_path("/nonexistent/cellwatch-model.json").unwrap_err();
        assert!(matches!(err, PredictError::InvalidModel(_)));
    }
}
