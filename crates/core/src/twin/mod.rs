pub mod estimator;

pub use estimator::{TwinEstimator, TwinObservation, TwinState};
