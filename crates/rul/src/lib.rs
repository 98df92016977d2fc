//! Remaining-useful-life estimation behind a narrow interface.

pub mod http;
pub mod linear;
pub mod provider;

pub use provider::{MockPredictor, PredictError, RulFeatures, RulPredictor};
