use tokio::sync::mpsc;

/// Presenter → session control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin a monitoring session (or retry after a failed start).
    Start,
    /// Stop monitoring and exit.
    Shutdown,
}

impl SessionCommand {
    /// Console words: `start`, `quit`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Some(Self::Start),
            "quit" | "q" | "exit" | "/q" | "/quit" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Command channel sender: the presenter pushes commands here.
pub type CommandSender = mpsc::Sender<SessionCommand>;
/// Command channel receiver: the session consumes from here.
pub type CommandReceiver = mpsc::Receiver<SessionCommand>;

/// Create a command channel with the given buffer size.
pub fn channel(buffer: usize) -> (CommandSender, CommandReceiver) {
    mpsc::channel(buffer)
}
