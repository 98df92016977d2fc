pub mod config;
pub mod control;
pub mod device;
pub mod health;
pub mod io;
pub mod runtime;
pub mod telemetry;
pub mod twin;
pub mod types;
