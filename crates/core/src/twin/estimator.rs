use serde::{Deserialize, Serialize};

use crate::config::MonitorCfg;
use crate::types::{FaultStatus, SensorReading};

/// Default |real - predicted| voltage deviation that counts as an anomaly (V).
pub const ANOMALY_THRESHOLD_V: f64 = 0.05;
/// SOC lost per projection step.
pub const PROJECTION_DECAY_PER_STEP: f64 = 0.01;

/// Simulated battery state. Lives for one monitoring session.
///
/// `state_of_charge` is not clamped while stepping; only projections clamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwinState {
    /// V
    pub voltage: f64,
    /// 0..1 nominally
    pub state_of_charge: f64,
    /// °C
    pub temperature: f64,
    /// mAh
    pub capacity: f64,
    /// Ω
    pub internal_resistance: f64,
    /// Calibration gain, 0..1
    pub learn_rate: f64,
}

impl Default for TwinState {
    fn default() -> Self {
        Self {
            voltage: 11.7,
            state_of_charge: 1.0,
            temperature: 25.0,
            capacity: 3000.0,
            internal_resistance: 0.05,
            learn_rate: 0.01,
        }
    }
}

impl TwinState {
    pub fn from_cfg(cfg: &MonitorCfg) -> Self {
        Self {
            voltage: cfg.twin_voltage,
            state_of_charge: cfg.twin_soc,
            temperature: cfg.twin_temperature,
            capacity: cfg.twin_capacity_mah,
            internal_resistance: cfg.twin_internal_resistance,
            learn_rate: cfg.twin_learn_rate,
        }
    }
}

/// What the twin concluded from one real reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwinObservation {
    pub predicted_voltage: f64,
    pub predicted_soc: f64,
    pub predicted_temperature: f64,
    pub deviation: f64,
    pub status: FaultStatus,
}

/// Equivalent-circuit digital twin with exponential calibration toward real readings.
#[derive(Debug, Clone)]
pub struct TwinEstimator {
    state: TwinState,
    anomaly_threshold: f64,
}

impl TwinEstimator {
    pub fn new(state: TwinState) -> Self {
        Self::with_threshold(state, ANOMALY_THRESHOLD_V)
    }

    pub fn with_threshold(state: TwinState, anomaly_threshold: f64) -> Self {
        Self { state, anomaly_threshold }
    }

    pub fn from_cfg(cfg: &MonitorCfg) -> Self {
        Self::with_threshold(TwinState::from_cfg(cfg), cfg.anomaly_threshold_v)
    }

    pub fn state(&self) -> &TwinState {
        &self.state
    }

    /// Pull voltage and temperature toward the real values.
    /// `_real_current` is accepted for symmetry with the device reading but not used here.
    pub fn calibrate(&mut self, real_voltage: f64, _real_current: f64, real_temperature: f64) -> (f64, f64) {
        let s = &mut self.state;
        s.voltage += s.learn_rate * (real_voltage - s.voltage);
        s.temperature += s.learn_rate * (real_temperature - s.temperature);
        (s.voltage, s.temperature)
    }

    /// Advance one interval. Returns post-step (voltage, state_of_charge, temperature).
    pub fn step(&mut self, current: f64) -> (f64, f64, f64) {
        let s = &mut self.state;
        s.voltage -= current * s.internal_resistance * 0.001;
        s.state_of_charge -= (current / s.capacity) * 0.001;
        s.temperature += current.abs() * 0.0005;
        (s.voltage, s.state_of_charge, s.temperature)
    }

    /// Linear SOC decay from the current state, clamped to [0, 1]. Does not mutate.
    pub fn project_future(&self, steps: usize) -> Vec<f64> {
        (0..steps)
            .map(|i| (self.state.state_of_charge - i as f64 * PROJECTION_DECAY_PER_STEP).clamp(0.0, 1.0))
            .collect()
    }

    /// One tick: calibrate, step, then compare the real voltage with this tick's prediction.
    pub fn observe(&mut self, reading: &SensorReading) -> TwinObservation {
        self.calibrate(reading.voltage, reading.current, reading.temperature);
        let (predicted_voltage, predicted_soc, predicted_temperature) = self.step(reading.current);
        let deviation = (reading.voltage - predicted_voltage).abs();
        TwinObservation {
            predicted_voltage,
            predicted_soc,
            predicted_temperature,
            deviation,
            status: anomaly_status(reading.voltage, predicted_voltage, self.anomaly_threshold),
        }
    }
}

impl Default for TwinEstimator {
    fn default() -> Self {
        Self::new(TwinState::default())
    }
}

/// Twin status channel: `TwinAnomaly` when the deviation exceeds `threshold`.
pub fn anomaly_status(real_voltage: f64, predicted_voltage: f64, threshold: f64) -> FaultStatus {
    let deviation = (real_voltage - predicted_voltage).abs();
    if deviation > threshold {
        FaultStatus::TwinAnomaly { deviation }
    } else {
        FaultStatus::Normal { current: None }
    }
}
