pub mod actions;
pub mod reader;

pub use actions::{ActionTrigger, DeliveryOutcome, DeviceAction, HttpActionTrigger};
pub use reader::{DeviceEndpoint, ReadError};
