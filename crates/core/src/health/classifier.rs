use crate::config::MonitorCfg;
use crate::types::{FaultStatus, SensorReading};

/// Default thermal fault limit (°C, exclusive).
pub const THERMAL_LIMIT_C: f64 = 40.0;
/// Default cell imbalance limit (V, exclusive).
pub const CELL_IMBALANCE_V: f64 = 9.0;

/// Threshold classifier. First match wins: thermal, then cell imbalance.
#[derive(Debug, Clone, Copy)]
pub struct FaultClassifier {
    thermal_limit_c: f64,
    cell_imbalance_v: f64,
}

impl FaultClassifier {
    pub fn new() -> Self {
        Self::with_limits(THERMAL_LIMIT_C, CELL_IMBALANCE_V)
    }

    pub fn with_limits(thermal_limit_c: f64, cell_imbalance_v: f64) -> Self {
        Self { thermal_limit_c, cell_imbalance_v }
    }

    pub fn from_cfg(cfg: &MonitorCfg) -> Self {
        Self::with_limits(cfg.thermal_limit_c, cfg.cell_imbalance_v)
    }

    pub fn classify(&self, reading: &SensorReading) -> FaultStatus {
        if reading.temperature > self.thermal_limit_c {
            FaultStatus::ThermalFault
        } else if reading.voltage < self.cell_imbalance_v {
            FaultStatus::CellImbalanceFault
        } else {
            FaultStatus::Normal { current: Some(reading.current) }
        }
    }
}

impl Default for FaultClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify with the default limits.
pub fn classify(reading: &SensorReading) -> FaultStatus {
    FaultClassifier::new().classify(reading)
}
