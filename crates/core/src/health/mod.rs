pub mod classifier;

pub use classifier::{FaultClassifier, classify};
