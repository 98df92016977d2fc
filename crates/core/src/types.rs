use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cellwatch_rul::RulFeatures;

use crate::control::sequencer::SequencePhase;

// ── Readings ───────────────────────────────────────────────────

/// One `/status` poll. Negative current is discharge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
    /// V
    pub voltage: f64,
    /// mA
    pub current: f64,
}

impl SensorReading {
    /// Field order on the wire: temperature, humidity, voltage, current.
    pub fn from_fields(f: [f64; 4]) -> Self {
        Self {
            temperature: f[0],
            humidity: f[1],
            voltage: f[2],
            current: f[3],
        }
    }
}

/// The `/5` snapshot taken once at session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialReading {
    pub voltage: f64,
    pub charge_current: f64,
    pub discharge_current: f64,
    pub temperature: f64,
    pub humidity: f64,
}

impl InitialReading {
    /// Field order on the wire: voltage, charge, discharge, temperature, humidity.
    pub fn from_fields(f: [f64; 5]) -> Self {
        Self {
            voltage: f[0],
            charge_current: f[1],
            discharge_current: f[2],
            temperature: f[3],
            humidity: f[4],
        }
    }

    pub fn net_current(&self) -> f64 {
        self.charge_current - self.discharge_current
    }

    pub fn features(&self) -> RulFeatures {
        RulFeatures {
            voltage: self.voltage,
            charge_current: self.charge_current,
            discharge_current: self.discharge_current,
            temperature: self.temperature,
            humidity: self.humidity,
        }
    }
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
}

/// Health status of the pack. Classifier and twin publish on separate channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FaultStatus {
    /// Last observed current, for the status line.
    Normal { current: Option<f64> },
    ThermalFault,
    CellImbalanceFault,
    /// Absolute deviation between real and predicted voltage.
    TwinAnomaly { deviation: f64 },
}

impl FaultStatus {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Normal { .. } => Severity::Normal,
            _ => Severity::Warning,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Normal { current: Some(c) } => format!("Current: {c:.2} mA - Normal Operation"),
            Self::Normal { current: None } => "Normal Operation".to_string(),
            Self::ThermalFault => "Thermal Fault Detected! Temperature > 40°C".to_string(),
            Self::CellImbalanceFault => "Cell Imbalance Fault! Voltage < 9V".to_string(),
            Self::TwinAnomaly { deviation } => format!("Anomaly Detected! ΔV={deviation:.3}V"),
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal { .. })
    }
}

/// RUL as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RulValue {
    Unavailable,
    Estimate(f64),
}

impl std::fmt::Display for RulValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Estimate(v) => write!(f, "{v:.2}"),
        }
    }
}

/// Monitoring session lifecycle as seen by the presenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// Waiting for a start command.
    Idle,
    /// Reading `/5` and running the RUL model.
    Starting,
    Running,
    /// Startup failed; a new start command may retry.
    Failed(String),
    Stopped,
}

/// Everything the presentation layer needs, published once per change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    pub tick_count: u64,
    pub initial: Option<InitialReading>,
    pub reading: Option<SensorReading>,
    pub fault: FaultStatus,
    pub twin: FaultStatus,
    pub rul: RulValue,
    pub soc_projection: Vec<f64>,
    pub phase: SequencePhase,
    /// e.g. "Triggered /1", "Failed to trigger /2".
    pub last_action: Option<String>,
    pub last_poll_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self {
            session_id: None,
            state: SessionState::Idle,
            tick_count: 0,
            initial: None,
            reading: None,
            fault: FaultStatus::Normal { current: None },
            twin: FaultStatus::Normal { current: None },
            rul: RulValue::Unavailable,
            soc_projection: Vec::new(),
            phase: SequencePhase::Idle,
            last_action: None,
            last_poll_error: None,
            updated_at: Utc::now(),
        }
    }
}

impl MonitorSnapshot {
    /// Worst of the two status channels, classifier first.
    pub fn headline(&self) -> &FaultStatus {
        if !self.fault.is_normal() || self.twin.is_normal() {
            &self.fault
        } else {
            &self.twin
        }
    }
}
