use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cellwatch_rul::{PredictError, RulPredictor};

use super::monitor::Monitor;
use super::shutdown::ShutdownGuard;
use crate::config::MonitorCfg;
use crate::device::actions::ActionTrigger;
use crate::device::reader::{self, DeviceEndpoint, ReadError};
use crate::io::commands::{self, CommandReceiver, CommandSender, SessionCommand};
use crate::io::snapshot::{self, SnapshotReceiver, SnapshotSender};
use crate::telemetry::TelemetryPublisher;
use crate::types::{InitialReading, MonitorSnapshot, RulValue, SessionState};

/// Why a session could not start. The loop is not entered.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("initial reading failed: {0}")]
    Read(#[from] ReadError),
    #[error("RUL prediction failed: {0}")]
    Predict(#[from] PredictError),
    #[error("startup cancelled")]
    Cancelled,
}

/// How `run_session` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Not running (never started, or startup failed); wait for a start command.
    AwaitStart,
    /// Shut down by command or signal.
    Stopped,
}

/// Owns the command channel, the snapshot channel and the shutdown token.
/// Drives one monitoring session at a time.
pub struct Session {
    cfg: Arc<MonitorCfg>,
    predictor: Arc<dyn RulPredictor>,
    trigger: Arc<dyn ActionTrigger>,
    telemetry: Option<TelemetryPublisher>,
    shutdown: ShutdownGuard,
    commands: CommandReceiver,
    snapshot_tx: SnapshotSender,
}

impl Session {
    /// Create a new Session. Returns (Session, command_sender, snapshot_receiver).
    /// Send `SessionCommand`s into the returned sender to start or stop monitoring.
    /// Watch the returned receiver for `MonitorSnapshot`s.
    pub fn new(
        cfg: Arc<MonitorCfg>,
        predictor: Arc<dyn RulPredictor>,
        trigger: Arc<dyn ActionTrigger>,
    ) -> (Self, CommandSender, SnapshotReceiver) {
        let (command_tx, command_rx) = commands::channel(8);
        let (snapshot_tx, snapshot_rx) = snapshot::channel();
        let telemetry = TelemetryPublisher::from_cfg(&cfg)
            .inspect_err(|e| tracing::warn!(error = %e, "telemetry disabled"))
            .ok();
        let session = Self {
            cfg,
            predictor,
            trigger,
            telemetry,
            shutdown: ShutdownGuard::new(),
            commands: command_rx,
            snapshot_tx,
        };
        (session, command_tx, snapshot_rx)
    }

    /// Replace the telemetry publisher (tests point it at a local endpoint).
    pub fn with_telemetry(mut self, telemetry: TelemetryPublisher) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Returns the cancellation token for spawning child tasks.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Start the signal listener, optionally autostart, then serve commands
    /// until shutdown. Returns once the snapshot reads `Stopped`.
    pub async fn run(&mut self) {
        self.shutdown.spawn_signal_listener();
        let token = self.shutdown.token();

        tracing::info!(
            device = %self.cfg.device_base_url(),
            predictor = self.predictor.name(),
            "cellwatch session ready"
        );

        let mut end = SessionEnd::AwaitStart;
        if self.cfg.autostart {
            end = self.run_session(&token).await;
        }

        while end == SessionEnd::AwaitStart {
            let cmd = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                cmd = self.commands.recv() => cmd,
            };
            match cmd {
                Some(SessionCommand::Start) => end = self.run_session(&token).await,
                Some(SessionCommand::Shutdown) | None => break,
            }
        }

        token.cancel();
        snapshot::publish(&self.snapshot_tx, |s| s.state = SessionState::Stopped);
        tracing::info!("cellwatch session stopped");
    }

    /// Startup then monitor until shutdown. Twin and sequencer live only here.
    async fn run_session(&mut self, token: &CancellationToken) -> SessionEnd {
        let session_id = Uuid::new_v4();
        snapshot::publish(&self.snapshot_tx, |s| {
            *s = MonitorSnapshot {
                session_id: Some(session_id),
                state: SessionState::Starting,
                ..MonitorSnapshot::default()
            };
        });
        tracing::info!(%session_id, "session starting");

        let (initial, rul) = match self.startup(token).await {
            Ok(v) => v,
            Err(StartupError::Cancelled) => return SessionEnd::Stopped,
            Err(e) => {
                tracing::error!(%session_id, error = %e, "session startup failed");
                let msg = e.to_string();
                snapshot::publish(&self.snapshot_tx, |s| {
                    s.state = SessionState::Failed(msg);
                    s.rul = RulValue::Unavailable;
                });
                return SessionEnd::AwaitStart;
            }
        };

        tracing::info!(
            %session_id,
            rul,
            net_current = initial.net_current(),
            "initial reading and RUL estimate ready"
        );
        snapshot::publish(&self.snapshot_tx, |s| {
            s.state = SessionState::Running;
            s.initial = Some(initial);
            s.rul = RulValue::Estimate(rul);
        });

        self.push_telemetry(token, &initial, rul).await;

        let mut monitor = Monitor::new(&self.cfg, Arc::clone(&self.trigger));
        {
            let run = monitor.run(token.clone(), &self.snapshot_tx);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    _ = &mut run => break,
                    cmd = self.commands.recv() => match cmd {
                        Some(SessionCommand::Start) => {
                            tracing::debug!("start ignored, session already running");
                        }
                        Some(SessionCommand::Shutdown) | None => {
                            token.cancel();
                            (&mut run).await;
                            break;
                        }
                    },
                }
            }
        }

        tracing::info!(%session_id, ticks = monitor.tick_count(), "session finished");
        SessionEnd::Stopped
    }

    /// Read `/5` and run the predictor once.
    async fn startup(&self, token: &CancellationToken) -> Result<(InitialReading, f64), StartupError> {
        let endpoint = DeviceEndpoint::from_cfg(&self.cfg);
        let initial = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StartupError::Cancelled),
            r = reader::poll_initial(&endpoint) => r?,
        };
        let rul = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StartupError::Cancelled),
            r = self.predictor.predict(initial.features()) => r?,
        };
        Ok((initial, rul))
    }

    async fn push_telemetry(&self, token: &CancellationToken, initial: &InitialReading, rul: f64) {
        let Some(telemetry) = self.telemetry.as_ref().filter(|t| t.is_enabled()) else {
            tracing::debug!("telemetry skipped, no api key configured");
            return;
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            res = telemetry.publish(initial, rul) => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "telemetry push failed");
                }
            }
        }
    }
}
