//! Debounce-and-trigger state machine for the two device actions.
//!
//! Idle → Timing when `current > bound`; Timing → Action1Fired once the
//! condition has held for the debounce period; Action1Fired → Action2Fired on
//! the next tick; Action2Fired → Idle when `current <= bound`.
//!
//! The entry test (`current > bound`) and the reset test (`current <= bound`)
//! are deliberately asymmetric and must stay that way.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::MonitorCfg;
use crate::device::actions::{ActionTrigger, DeliveryOutcome, DeviceAction};

/// Default current bound (mA).
pub const LOW_CURRENT_BOUND: f64 = -500.0;
/// Default debounce period.
pub const DEBOUNCE_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencePhase {
    Idle,
    Timing,
    Action1Fired,
    Action2Fired,
}

impl fmt::Display for SequencePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Timing => "timing",
            Self::Action1Fired => "action1-fired",
            Self::Action2Fired => "action2-fired",
        };
        f.write_str(s)
    }
}

/// What to do when a trigger call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryPolicy {
    /// Treat a failed delivery as done and advance anyway.
    MarkDone,
    /// Stay in the current phase and retry on later ticks; give up (mark done)
    /// after `max_attempts` failures.
    Retry { max_attempts: u32 },
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkDone => f.write_str("mark_done"),
            Self::Retry { max_attempts } => write!(f, "retry:{max_attempts}"),
        }
    }
}

impl FromStr for DeliveryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "mark_done" {
            return Ok(Self::MarkDone);
        }
        s.strip_prefix("retry:")
            .and_then(|n| n.trim().parse().ok())
            .map(|max_attempts| Self::Retry { max_attempts })
            .ok_or_else(|| format!("unknown delivery policy {s:?}"))
    }
}

/// Sequencer memory, persisted across ticks for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSequenceState {
    pub phase: SequencePhase,
    /// Set only while `phase == Timing`.
    pub low_current_timer_start: Option<Instant>,
    pub action1_fired_at: Option<Instant>,
    /// Failed deliveries of the pending action, for `DeliveryPolicy::Retry`.
    pub failed_attempts: u32,
}

impl Default for ActionSequenceState {
    fn default() -> Self {
        Self {
            phase: SequencePhase::Idle,
            low_current_timer_start: None,
            action1_fired_at: None,
            failed_attempts: 0,
        }
    }
}

/// Result of one sequencer tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    /// No transition.
    Unchanged,
    TimerStarted,
    TimerCancelled,
    /// An action was attempted. `advanced` is false when the policy kept the phase.
    Fired {
        action: DeviceAction,
        outcome: DeliveryOutcome,
        advanced: bool,
    },
    /// Back to Idle after both actions; a new cycle may begin.
    Reset,
}

impl SequencerEvent {
    /// Operator-facing note for the snapshot, if any.
    pub fn note(&self) -> Option<String> {
        match self {
            Self::Fired { action, outcome: DeliveryOutcome::Delivered, .. } => {
                Some(format!("Triggered {}", action.path()))
            }
            Self::Fired { action, outcome: DeliveryOutcome::Failed(_), .. } => {
                Some(format!("Failed to trigger {}", action.path()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionSequencer {
    state: ActionSequenceState,
    bound: f64,
    debounce: Duration,
    policy: DeliveryPolicy,
}

impl ActionSequencer {
    pub fn new() -> Self {
        Self::with_params(LOW_CURRENT_BOUND, Duration::from_secs(DEBOUNCE_SECONDS), DeliveryPolicy::MarkDone)
    }

    pub fn with_params(bound: f64, debounce: Duration, policy: DeliveryPolicy) -> Self {
        Self {
            state: ActionSequenceState::default(),
            bound,
            debounce,
            policy,
        }
    }

    pub fn from_cfg(cfg: &MonitorCfg) -> Self {
        Self::with_params(
            cfg.low_current_bound_ma,
            Duration::from_secs(cfg.debounce_secs),
            cfg.delivery_policy,
        )
    }

    pub fn phase(&self) -> SequencePhase {
        self.state.phase
    }

    pub fn state(&self) -> &ActionSequenceState {
        &self.state
    }

    /// Advance once with the tick's current (mA) and wall-clock instant.
    pub async fn tick(
        &mut self,
        current: f64,
        now: Instant,
        trigger: &dyn ActionTrigger,
    ) -> SequencerEvent {
        match self.state.phase {
            SequencePhase::Idle => {
                if current > self.bound {
                    self.state.phase = SequencePhase::Timing;
                    self.state.low_current_timer_start = Some(now);
                    tracing::debug!(current, "sequencer timer started");
                    SequencerEvent::TimerStarted
                } else {
                    SequencerEvent::Unchanged
                }
            }
            SequencePhase::Timing => {
                if current <= self.bound {
                    self.state.phase = SequencePhase::Idle;
                    self.state.low_current_timer_start = None;
                    self.state.failed_attempts = 0;
                    tracing::debug!(current, "sequencer timer cancelled");
                    return SequencerEvent::TimerCancelled;
                }
                let elapsed = self
                    .state
                    .low_current_timer_start
                    .map(|start| now.saturating_duration_since(start))
                    .unwrap_or_default();
                if elapsed >= self.debounce {
                    self.fire(DeviceAction::Action1, now, trigger).await
                } else {
                    SequencerEvent::Unchanged
                }
            }
            SequencePhase::Action1Fired => self.fire(DeviceAction::Action2, now, trigger).await,
            SequencePhase::Action2Fired => {
                if current <= self.bound {
                    self.state = ActionSequenceState::default();
                    tracing::debug!(current, "sequencer reset");
                    SequencerEvent::Reset
                } else {
                    SequencerEvent::Unchanged
                }
            }
        }
    }

    async fn fire(
        &mut self,
        action: DeviceAction,
        now: Instant,
        trigger: &dyn ActionTrigger,
    ) -> SequencerEvent {
        let outcome = trigger.trigger(action).await;
        let advanced = match (&outcome, self.policy) {
            (DeliveryOutcome::Delivered, _) | (DeliveryOutcome::Failed(_), DeliveryPolicy::MarkDone) => true,
            (DeliveryOutcome::Failed(_), DeliveryPolicy::Retry { max_attempts }) => {
                self.state.failed_attempts += 1;
                self.state.failed_attempts >= max_attempts
            }
        };

        if advanced {
            self.state.failed_attempts = 0;
            match action {
                DeviceAction::Action1 => {
                    self.state.phase = SequencePhase::Action1Fired;
                    self.state.low_current_timer_start = None;
                    self.state.action1_fired_at = Some(now);
                }
                DeviceAction::Action2 => {
                    self.state.phase = SequencePhase::Action2Fired;
                }
            }
        }

        SequencerEvent::Fired { action, outcome, advanced }
    }
}

impl Default for ActionSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::actions::MockTrigger;

    fn secs(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    #[tokio::test]
    async fn full_cycle_fires_each_action_once() {
        let trigger = MockTrigger::new();
        let mut seq = ActionSequencer::new();
        let t0 = Instant::now();

        assert_eq!(seq.tick(-100.0, t0, &trigger).await, SequencerEvent::TimerStarted);
        assert_eq!(seq.phase(), SequencePhase::Timing);
        assert_eq!(seq.state().low_current_timer_start, Some(t0));

        // 2 s cadence, still debouncing
        for s in (2..30).step_by(2) {
            assert_eq!(seq.tick(-100.0, secs(t0, s), &trigger).await, SequencerEvent::Unchanged);
        }
        assert!(trigger.calls().is_empty());

        let ev = seq.tick(-100.0, secs(t0, 30), &trigger).await;
        assert_eq!(ev.note().as_deref(), Some("Triggered /1"));
        assert_eq!(seq.phase(), SequencePhase::Action1Fired);
        assert_eq!(seq.state().action1_fired_at, Some(secs(t0, 30)));
        assert_eq!(seq.state().low_current_timer_start, None);

        let ev = seq.tick(-100.0, secs(t0, 32), &trigger).await;
        assert_eq!(ev.note().as_deref(), Some("Triggered /2"));
        assert_eq!(seq.phase(), SequencePhase::Action2Fired);

        // unchanged qualifying current never re-fires
        for s in [34, 36, 60, 120] {
            assert_eq!(seq.tick(-100.0, secs(t0, s), &trigger).await, SequencerEvent::Unchanged);
        }
        assert_eq!(trigger.calls(), vec![DeviceAction::Action1, DeviceAction::Action2]);

        assert_eq!(seq.tick(-600.0, secs(t0, 122), &trigger).await, SequencerEvent::Reset);
        assert_eq!(seq.phase(), SequencePhase::Idle);
        assert_eq!(*seq.state(), ActionSequenceState::default());
    }

    #[tokio::test]
    async fn strong_discharge_never_leaves_idle() {
        let trigger = MockTrigger::new();
        let mut seq = ActionSequencer::new();
        let t0 = Instant::now();
        for s in (0..120).step_by(2) {
            seq.tick(-600.0, secs(t0, s), &trigger).await;
            assert_eq!(seq.phase(), SequencePhase::Idle);
            assert!(seq.state().low_current_timer_start.is_none());
        }
        // the bound itself counts as strong discharge
        seq.tick(-500.0, secs(t0, 200), &trigger).await;
        assert_eq!(seq.phase(), SequencePhase::Idle);
        assert!(trigger.calls().is_empty());
    }

    #[tokio::test]
    async fn strong_discharge_cancels_timer() {
        let trigger = MockTrigger::new();
        let mut seq = ActionSequencer::new();
        let t0 = Instant::now();
        seq.tick(-100.0, t0, &trigger).await;
        assert_eq!(seq.tick(-700.0, secs(t0, 20), &trigger).await, SequencerEvent::TimerCancelled);
        assert_eq!(seq.phase(), SequencePhase::Idle);
        assert!(seq.state().low_current_timer_start.is_none());

        // debounce restarts from scratch
        seq.tick(-100.0, secs(t0, 22), &trigger).await;
        seq.tick(-100.0, secs(t0, 40), &trigger).await;
        assert_eq!(seq.phase(), SequencePhase::Timing);
        seq.tick(-100.0, secs(t0, 52), &trigger).await;
        assert_eq!(seq.phase(), SequencePhase::Action1Fired);
    }

    #[tokio::test]
    async fn action2_follows_regardless_of_current() {
        let trigger = MockTrigger::new();
        let mut seq = ActionSequencer::new();
        let t0 = Instant::now();
        seq.tick(0.0, t0, &trigger).await;
        seq.tick(0.0, secs(t0, 30), &trigger).await;
        seq.tick(-900.0, secs(t0, 32), &trigger).await;
        assert_eq!(seq.phase(), SequencePhase::Action2Fired);
        seq.tick(-900.0, secs(t0, 34), &trigger).await;
        assert_eq!(seq.phase(), SequencePhase::Idle);
    }

    #[tokio::test]
    async fn mark_done_advances_on_failure() {
        let trigger = MockTrigger::failing(DeviceAction::Action1, 5);
        let mut seq = ActionSequencer::new();
        let t0 = Instant::now();
        seq.tick(-100.0, t0, &trigger).await;
        let ev = seq.tick(-100.0, secs(t0, 30), &trigger).await;
        assert_eq!(ev.note().as_deref(), Some("Failed to trigger /1"));
        assert!(matches!(ev, SequencerEvent::Fired { advanced: true, .. }));
        assert_eq!(seq.phase(), SequencePhase::Action1Fired);
        assert!(seq.state().action1_fired_at.is_some());
        seq.tick(-100.0, secs(t0, 32), &trigger).await;
        assert_eq!(trigger.count(DeviceAction::Action1), 1);
        assert_eq!(seq.phase(), SequencePhase::Action2Fired);
    }

    #[tokio::test]
    async fn retry_policy_retries_then_gives_up() {
        let trigger = MockTrigger::failing(DeviceAction::Action2, 10);
        let mut seq = ActionSequencer::with_params(
            LOW_CURRENT_BOUND,
            Duration::from_secs(DEBOUNCE_SECONDS),
            DeliveryPolicy::Retry { max_attempts: 3 },
        );
        let t0 = Instant::now();
        seq.tick(-100.0, t0, &trigger).await;
        seq.tick(-100.0, secs(t0, 30), &trigger).await;
        assert_eq!(seq.phase(), SequencePhase::Action1Fired);

        for s in [32, 34] {
            let ev = seq.tick(-100.0, secs(t0, s), &trigger).await;
            assert!(matches!(ev, SequencerEvent::Fired { advanced: false, .. }));
            assert_eq!(seq.phase(), SequencePhase::Action1Fired);
        }
        let ev = seq.tick(-100.0, secs(t0, 36), &trigger).await;
        assert!(matches!(ev, SequencerEvent::Fired { advanced: true, .. }));
        assert_eq!(seq.phase(), SequencePhase::Action2Fired);
        assert_eq!(trigger.count(DeviceAction::Action2), 3);
        assert_eq!(seq.state().failed_attempts, 0);
    }

    #[tokio::test]
    async fn retry_policy_recovers_after_transient_failure() {
        let trigger = MockTrigger::failing(DeviceAction::Action1, 1);
        let mut seq = ActionSequencer::with_params(
            LOW_CURRENT_BOUND,
            Duration::from_secs(DEBOUNCE_SECONDS),
            DeliveryPolicy::Retry { max_attempts: 5 },
        );
        let t0 = Instant::now();
        seq.tick(-100.0, t0, &trigger).await;
        seq.tick(-100.0, secs(t0, 30), &trigger).await;
        assert_eq!(seq.phase(), SequencePhase::Timing);
        let ev = seq.tick(-100.0, secs(t0, 32), &trigger).await;
        assert_eq!(ev.note().as_deref(), Some("Triggered /1"));
        assert_eq!(seq.phase(), SequencePhase::Action1Fired);
    }

    #[test]
    fn delivery_policy_parsing() {
        assert_eq!("mark_done".parse::<DeliveryPolicy>().unwrap(), DeliveryPolicy::MarkDone);
        assert_eq!(
            "retry:4".parse::<DeliveryPolicy>().unwrap(),
            DeliveryPolicy::Retry { max_attempts: 4 }
        );
        assert!("retry:".parse::<DeliveryPolicy>().is_err());
        assert!("always".parse::<DeliveryPolicy>().is_err());
        assert_eq!(DeliveryPolicy::Retry { max_attempts: 2 }.to_string(), "retry:2");
    }
}
