use std::sync::Mutex;
use std::time::Duration;

use crate::config::MonitorCfg;

/// The two one-shot device actions, fired in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeviceAction {
    Action1,
    Action2,
}

impl DeviceAction {
    pub fn path(self) -> &'static str {
        match self {
            Self::Action1 => "/1",
            Self::Action2 => "/2",
        }
    }
}

/// Result of one trigger attempt. The response body is never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[async_trait::async_trait]
pub trait ActionTrigger: Send + Sync {
    async fn trigger(&self, action: DeviceAction) -> DeliveryOutcome;
}

/// Fires actions as plain HTTP GETs against the device.
pub struct HttpActionTrigger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActionTrigger {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        // The device sits on the local network; never route through a proxy.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn from_cfg(cfg: &MonitorCfg) -> Result<Self, reqwest::Error> {
        Self::new(cfg.device_base_url(), cfg.io_timeout())
    }

    pub fn url_for(&self, action: DeviceAction) -> String {
        format!("{}{}", self.base_url, action.path())
    }
}

#[async_trait::async_trait]
impl ActionTrigger for HttpActionTrigger {
    async fn trigger(&self, action: DeviceAction) -> DeliveryOutcome {
        let url = self.url_for(action);
        // Any completed round trip counts; the device acts on receipt.
        match self.client.get(&url).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    tracing::debug!(%url, status = %resp.status(), "action answered with non-success status");
                }
                DeliveryOutcome::Delivered
            }
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        }
    }
}

/// Mock trigger for testing. Records every call and fails the first N attempts per action.
#[derive(Debug, Default)]
pub struct MockTrigger {
    calls: Mutex<Vec<DeviceAction>>,
    fail_action1: Mutex<u32>,
    fail_action2: Mutex<u32>,
}

impl MockTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` attempts of `action`.
    pub fn failing(action: DeviceAction, n: u32) -> Self {
        let mock = Self::default();
        *mock.failures_for(action).lock().unwrap_or_else(|e| e.into_inner()) = n;
        mock
    }

    pub fn calls(&self) -> Vec<DeviceAction> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, action: DeviceAction) -> usize {
        self.calls().iter().filter(|a| **a == action).count()
    }

    fn failures_for(&self, action: DeviceAction) -> &Mutex<u32> {
        match action {
            DeviceAction::Action1 => &self.fail_action1,
            DeviceAction::Action2 => &self.fail_action2,
        }
    }
}

#[async_trait::async_trait]
impl ActionTrigger for MockTrigger {
    async fn trigger(&self, action: DeviceAction) -> DeliveryOutcome {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(action);
        let mut remaining = self.failures_for(action).lock().unwrap_or_else(|e| e.into_inner());
        if *remaining > 0 {
            *remaining -= 1;
            DeliveryOutcome::Failed("mock failure".into())
        } else {
            DeliveryOutcome::Delivered
        }
    }
}
