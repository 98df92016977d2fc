//! HTTP-served RUL model.
//!
//! The trained regressor is exported behind a small scoring service. The
//! service takes the five features as a JSON object keyed by training column
//! name and answers with the estimate.

use crate::provider::{PredictError, RulFeatures, RulPredictor};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// RUL predictor backed by a remote scoring endpoint.
pub struct HttpPredictor {
    client: reqwest::Client,
    url: String,
}

impl HttpPredictor {
    pub fn new(url: impl Into<String>) -> Result<Self, PredictError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PredictError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(url, client))
    }

    /// Build with a caller-supplied client (custom timeout, proxy settings).
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into().trim_end_matches('/').to_owned(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn predict_remote(&self, features: RulFeatures) -> Result<f64, PredictError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&features)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(url = %self.url, error = %e, "scoring request failed");
                PredictError::RequestFailed(e.to_string())
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::debug!(url = %self.url, %status, "scoring service rejected request");
            return Err(PredictError::RequestFailed(format!("{status}: {text}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PredictError::InvalidResponse(e.to_string()))?;
        let estimate = parse_estimate(&body);
        if estimate.is_err() {
            tracing::debug!(url = %self.url, %body, "scoring response carried no estimate");
        }
        estimate
    }
}

impl RulPredictor for HttpPredictor {
    fn name(&self) -> &str {
        "http"
    }

    fn predict(
        &self,
        features: RulFeatures,
    ) -> Pin<Box<dyn Future<Output = Result<f64, PredictError>> + Send + '_>> {
        Box::pin(self.predict_remote(features))
    }
}

/// Accepts `{"rul": x}`, `{"prediction": x}`, `[x]` or a bare number.
fn parse_estimate(body: &serde_json::Value) -> Result<f64, PredictError> {
    let value = match body {
        serde_json::Value::Object(map) => map.get("rul").or_else(|| map.get("prediction")),
        serde_json::Value::Array(items) => items.first(),
        other => Some(other),
    };
    value
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .ok_or_else(|| PredictError::InvalidResponse(body.to_string()))
}
