use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::MonitorCfg;
use crate::control::sequencer::{ActionSequencer, SequencerEvent};
use crate::device::actions::{ActionTrigger, DeliveryOutcome};
use crate::device::reader::{self, DeviceEndpoint};
use crate::health::classifier::FaultClassifier;
use crate::io::snapshot::{self, SnapshotSender};
use crate::twin::estimator::TwinEstimator;
use crate::types::SensorReading;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Reading processed and snapshot published.
    Processed(SensorReading),
    /// Poll failed; nothing but the error was published.
    Skipped(String),
    Cancelled,
}

/// Per-session control loop: poll, classify, twin, sequence, publish.
///
/// Owns the twin and the sequencer, so both die with the session.
pub struct Monitor {
    endpoint: DeviceEndpoint,
    classifier: FaultClassifier,
    twin: TwinEstimator,
    sequencer: ActionSequencer,
    trigger: Arc<dyn ActionTrigger>,
    period: Duration,
    projection_steps: usize,
    tick_count: u64,
}

impl Monitor {
    pub fn new(cfg: &MonitorCfg, trigger: Arc<dyn ActionTrigger>) -> Self {
        Self {
            endpoint: DeviceEndpoint::from_cfg(cfg),
            classifier: FaultClassifier::from_cfg(cfg),
            twin: TwinEstimator::from_cfg(cfg),
            sequencer: ActionSequencer::from_cfg(cfg),
            trigger,
            period: cfg.tick_interval(),
            projection_steps: cfg.projection_steps,
            tick_count: 0,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn sequencer(&self) -> &ActionSequencer {
        &self.sequencer
    }

    /// Tick at a fixed period until `token` is cancelled. Ticks never overlap;
    /// a tick that overruns delays the next one.
    pub async fn run(&mut self, token: CancellationToken, tx: &SnapshotSender) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(period_ms = self.period.as_millis() as u64, "monitor loop started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!(tick_count = self.tick_count, "shutdown signal received, exiting monitor loop");
                    break;
                },
                _ = interval.tick() => {
                    if self.tick(&token, tx).await == TickOutcome::Cancelled {
                        break;
                    }
                },
            }
        }
    }

    /// Single tick. Every blocking call is raced against `token`.
    pub async fn tick(&mut self, token: &CancellationToken, tx: &SnapshotSender) -> TickOutcome {
        self.tick_count += 1;
        let span = tracing::info_span!("tick", n = self.tick_count);
        self.tick_inner(token, tx).instrument(span).await
    }

    async fn tick_inner(&mut self, token: &CancellationToken, tx: &SnapshotSender) -> TickOutcome {
        let polled = tokio::select! {
            biased;
            _ = token.cancelled() => return TickOutcome::Cancelled,
            r = reader::poll_status(&self.endpoint) => r,
        };

        let tick_count = self.tick_count;
        let reading = match polled {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "status poll failed, skipping tick");
                let msg = e.to_string();
                snapshot::publish(tx, |s| {
                    s.tick_count = tick_count;
                    s.last_poll_error = Some(msg.clone());
                });
                return TickOutcome::Skipped(msg);
            }
        };

        let fault = self.classifier.classify(&reading);
        let observation = self.twin.observe(&reading);
        let projection = self.twin.project_future(self.projection_steps);

        if !fault.is_normal() {
            tracing::warn!(status = ?fault, "fault detected");
        }
        if !observation.status.is_normal() {
            tracing::warn!(
                deviation = observation.deviation,
                predicted_voltage = observation.predicted_voltage,
                "twin anomaly"
            );
        }

        let event = tokio::select! {
            biased;
            _ = token.cancelled() => return TickOutcome::Cancelled,
            ev = self.sequencer.tick(reading.current, Instant::now(), self.trigger.as_ref()) => ev,
        };
        match &event {
            SequencerEvent::Fired { action, outcome: DeliveryOutcome::Delivered, .. } => {
                tracing::info!(action = action.path(), "action triggered");
            }
            SequencerEvent::Fired { action, outcome: DeliveryOutcome::Failed(reason), advanced } => {
                tracing::warn!(action = action.path(), %reason, advanced, "action delivery failed");
            }
            SequencerEvent::Unchanged => {}
            other => tracing::debug!(event = ?other, phase = %self.sequencer.phase(), "sequencer transition"),
        }

        tracing::debug!(
            voltage = reading.voltage,
            current = reading.current,
            temperature = reading.temperature,
            soc = observation.predicted_soc,
            "tick processed"
        );

        let phase = self.sequencer.phase();
        let note = event.note();
        snapshot::publish(tx, |s| {
            s.tick_count = tick_count;
            s.reading = Some(reading);
            s.fault = fault;
            s.twin = observation.status;
            s.soc_projection = projection;
            s.phase = phase;
            if let Some(note) = note {
                s.last_action = Some(note);
            }
            s.last_poll_error = None;
        });

        TickOutcome::Processed(reading)
    }
}
