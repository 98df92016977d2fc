use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::control::sequencer::DeliveryPolicy;

/// Environment variable prefix for every config key (`CELLWATCH_TICK_MS` → `tick_ms`).
pub const ENV_PREFIX: &str = "CELLWATCH_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("config file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path}, line {line}: expected key=value")]
    Syntax { path: String, line: usize },
}

/// All monitor parameters. Defaults reproduce the field deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorCfg {
    // device
    pub host: String,
    pub port: u16,
    pub io_timeout_ms: u64,
    pub read_limit_bytes: usize,

    // loop cadence
    pub tick_ms: u64,
    pub autostart: bool,

    // fault thresholds
    pub thermal_limit_c: f64,
    pub cell_imbalance_v: f64,

    // digital twin
    pub anomaly_threshold_v: f64,
    pub projection_steps: usize,
    pub twin_voltage: f64,
    pub twin_soc: f64,
    pub twin_temperature: f64,
    pub twin_capacity_mah: f64,
    pub twin_internal_resistance: f64,
    pub twin_learn_rate: f64,

    // action sequencing
    pub low_current_bound_ma: f64,
    pub debounce_secs: u64,
    pub delivery_policy: DeliveryPolicy,

    // telemetry
    pub telemetry_url: String,
    pub telemetry_api_key: Option<String>,

    // RUL model
    pub rul_url: Option<String>,
    pub rul_model: Option<String>,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            host: "192.168.137.86".into(),
            port: 80,
            io_timeout_ms: 2000,
            read_limit_bytes: 1024,
            tick_ms: 2000,
            autostart: true,
            thermal_limit_c: 40.0,
            cell_imbalance_v: 9.0,
            anomaly_threshold_v: 0.05,
            projection_steps: 10,
            twin_voltage: 11.7,
            twin_soc: 1.0,
            twin_temperature: 25.0,
            twin_capacity_mah: 3000.0,
            twin_internal_resistance: 0.05,
            twin_learn_rate: 0.01,
            low_current_bound_ma: -500.0,
            debounce_secs: 30,
            delivery_policy: DeliveryPolicy::MarkDone,
            telemetry_url: "https://api.thingspeak.com/update".into(),
            telemetry_api_key: None,
            rul_url: None,
            rul_model: None,
        }
    }
}

impl MonitorCfg {
    /// Load from an optional `key=value` file, then overlay `CELLWATCH_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut map = match path {
            Some(p) => read_file_map(p)?,
            None => HashMap::new(),
        };
        map.extend(env_map(std::env::vars()));
        Self::from_map(&map)
    }

    pub fn from_map(m: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            host: get_or(m, "host", d.host)?,
            port: get_or(m, "port", d.port)?,
            io_timeout_ms: get_or(m, "io_timeout_ms", d.io_timeout_ms)?,
            read_limit_bytes: get_or(m, "read_limit_bytes", d.read_limit_bytes)?,
            tick_ms: get_or(m, "tick_ms", d.tick_ms)?,
            autostart: get_or(m, "autostart", d.autostart)?,
            thermal_limit_c: get_or(m, "thermal_limit_c", d.thermal_limit_c)?,
            cell_imbalance_v: get_or(m, "cell_imbalance_v", d.cell_imbalance_v)?,
            anomaly_threshold_v: get_or(m, "anomaly_threshold_v", d.anomaly_threshold_v)?,
            projection_steps: get_or(m, "projection_steps", d.projection_steps)?,
            twin_voltage: get_or(m, "twin_voltage", d.twin_voltage)?,
            twin_soc: get_or(m, "twin_soc", d.twin_soc)?,
            twin_temperature: get_or(m, "twin_temperature", d.twin_temperature)?,
            twin_capacity_mah: get_or(m, "twin_capacity_mah", d.twin_capacity_mah)?,
            twin_internal_resistance: get_or(m, "twin_internal_resistance", d.twin_internal_resistance)?,
            twin_learn_rate: get_or(m, "twin_learn_rate", d.twin_learn_rate)?,
            low_current_bound_ma: get_or(m, "low_current_bound_ma", d.low_current_bound_ma)?,
            debounce_secs: get_or(m, "debounce_secs", d.debounce_secs)?,
            delivery_policy: get_or(m, "delivery_policy", d.delivery_policy)?,
            telemetry_url: get_or(m, "telemetry_url", d.telemetry_url)?,
            telemetry_api_key: get_opt(m, "telemetry_api_key"),
            rul_url: get_opt(m, "rul_url"),
            rul_model: get_opt(m, "rul_model"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that parse but would stall or panic the loop.
    fn validate(&self) -> Result<(), ConfigError> {
        check("tick_ms", self.tick_ms, self.tick_ms > 0)?;
        check("io_timeout_ms", self.io_timeout_ms, self.io_timeout_ms > 0)?;
        check("read_limit_bytes", self.read_limit_bytes, self.read_limit_bytes > 0)?;
        check(
            "twin_capacity_mah",
            self.twin_capacity_mah,
            self.twin_capacity_mah.is_finite() && self.twin_capacity_mah != 0.0,
        )?;
        check(
            "twin_learn_rate",
            self.twin_learn_rate,
            (0.0..=1.0).contains(&self.twin_learn_rate),
        )
    }

    /// Every key with its current value and a one-line description.
    pub fn to_entries(&self) -> Vec<(&str, String, &str)> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "(unset)".into());
        let key = self.telemetry_api_key.as_ref().map(|_| "(set)".to_string());
        vec![
            ("host", self.host.clone(), "Device address"),
            ("port", self.port.to_string(), "Device TCP port"),
            ("io_timeout_ms", self.io_timeout_ms.to_string(), "Per-request network timeout ms"),
            ("read_limit_bytes", self.read_limit_bytes.to_string(), "Max bytes read per device response"),
            ("tick_ms", self.tick_ms.to_string(), "Poll interval ms"),
            ("autostart", self.autostart.to_string(), "Start monitoring without waiting for a start command"),
            ("thermal_limit_c", self.thermal_limit_c.to_string(), "Thermal fault above this temperature"),
            ("cell_imbalance_v", self.cell_imbalance_v.to_string(), "Cell imbalance fault below this voltage"),
            ("anomaly_threshold_v", self.anomaly_threshold_v.to_string(), "Twin deviation that counts as anomaly"),
            ("projection_steps", self.projection_steps.to_string(), "SOC projection horizon"),
            ("twin_voltage", self.twin_voltage.to_string(), "Twin initial voltage"),
            ("twin_soc", self.twin_soc.to_string(), "Twin initial state of charge"),
            ("twin_temperature", self.twin_temperature.to_string(), "Twin initial temperature"),
            ("twin_capacity_mah", self.twin_capacity_mah.to_string(), "Twin capacity mAh"),
            ("twin_internal_resistance", self.twin_internal_resistance.to_string(), "Twin internal resistance ohms"),
            ("twin_learn_rate", self.twin_learn_rate.to_string(), "Twin calibration rate"),
            ("low_current_bound_ma", self.low_current_bound_ma.to_string(), "Action sequencer current bound mA"),
            ("debounce_secs", self.debounce_secs.to_string(), "Action sequencer debounce seconds"),
            ("delivery_policy", self.delivery_policy.to_string(), "mark_done or retry:<attempts>"),
            ("telemetry_url", self.telemetry_url.clone(), "Telemetry endpoint"),
            ("telemetry_api_key", opt(&key), "Telemetry write key"),
            ("rul_url", opt(&self.rul_url), "RUL scoring service URL"),
            ("rul_model", opt(&self.rul_model), "RUL linear model JSON path"),
        ]
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Base URL for HTTP requests to the device, e.g. `http://10.0.0.5:80`.
    pub fn device_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Collect `CELLWATCH_*` variables as lowercase config keys.
pub fn env_map(vars: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(ENV_PREFIX)
                .map(|key| (key.to_ascii_lowercase(), v))
        })
        .collect()
}

/// Parse `key=value` lines. Blank lines and `#` comments are skipped.
pub fn parse_kv(path: &str, text: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            return Err(ConfigError::Syntax { path: path.to_owned(), line: i + 1 });
        };
        map.insert(k.trim().to_ascii_lowercase(), v.trim().to_owned());
    }
    Ok(map)
}

fn read_file_map(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
        path: display.clone(),
        source,
    })?;
    parse_kv(&display, &text)
}

fn get_or<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_owned(),
            value: v.clone(),
        }),
    }
}

fn check(key: &str, value: impl ToString, ok: bool) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue { key: key.to_owned(), value: value.to_string() })
    }
}

fn get_opt(map: &HashMap<String, String>, key: &str) -> Option<String> {
    map.get(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
