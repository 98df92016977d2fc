pub mod commands;
pub mod snapshot;
