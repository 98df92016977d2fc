mod monitor;
mod session;
mod shutdown;

pub use monitor::{Monitor, TickOutcome};
pub use session::{Session, StartupError};
pub use shutdown::ShutdownGuard;
