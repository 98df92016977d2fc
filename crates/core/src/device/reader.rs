use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::MonitorCfg;
use crate::types::{InitialReading, SensorReading};

/// Why a poll produced no reading. Every variant is transient: the caller skips the tick.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("response is not valid UTF-8")]
    Encoding,
    #[error("unparseable field {field:?}")]
    Parse { field: String },
    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },
}

/// Device resource paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePath {
    /// `/5`: voltage, charge current, discharge current, temperature, humidity.
    Initial,
    /// `/status`: temperature, humidity, voltage, current.
    Status,
}

impl DevicePath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "/5",
            Self::Status => "/status",
        }
    }
}

/// Where and how to reach the device. One fresh connection per request.
#[derive(Debug, Clone)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub read_limit: usize,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(2),
            read_limit: 1024,
        }
    }

    pub fn from_cfg(cfg: &MonitorCfg) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            timeout: cfg.io_timeout(),
            read_limit: cfg.read_limit_bytes,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Poll `/status`.
pub async fn poll_status(ep: &DeviceEndpoint) -> Result<SensorReading, ReadError> {
    let text = fetch(ep, DevicePath::Status).await?;
    parse_fields::<4>(&text).map(SensorReading::from_fields)
}

/// Poll `/5`.
pub async fn poll_initial(ep: &DeviceEndpoint) -> Result<InitialReading, ReadError> {
    let text = fetch(ep, DevicePath::Initial).await?;
    parse_fields::<5>(&text).map(InitialReading::from_fields)
}

/// Send a GET for `path` and return the raw response text, bounded by `ep.timeout`.
pub async fn fetch(ep: &DeviceEndpoint, path: DevicePath) -> Result<String, ReadError> {
    tokio::time::timeout(ep.timeout, exchange(ep, path))
        .await
        .map_err(|_| ReadError::Timeout(ep.timeout))?
}

async fn exchange(ep: &DeviceEndpoint, path: DevicePath) -> Result<String, ReadError> {
    let addr = ep.addr();
    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ReadError::Connect { addr: addr.clone(), source })?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path.as_str(),
        ep.host
    );
    stream.write_all(request.as_bytes()).await?;

    // Stop at EOF, the byte limit, or once a Content-Length body is complete.
    let mut buf = Vec::with_capacity(ep.read_limit);
    let mut chunk = [0u8; 512];
    while buf.len() < ep.read_limit {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let take = n.min(ep.read_limit - buf.len());
        buf.extend_from_slice(&chunk[..take]);
        if framed_len(&buf).is_some_and(|end| buf.len() >= end) {
            break;
        }
    }

    String::from_utf8(buf).map_err(|_| ReadError::Encoding)
}

/// Total response length when the headers are complete and carry `Content-Length`.
fn framed_len(buf: &[u8]) -> Option<usize> {
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = std::str::from_utf8(&buf[..head_end]).ok()?;
    let len = head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    })?;
    Some(head_end + 4 + len)
}

/// Strip header framing (everything up to the first blank line) and return the body.
pub fn body_of(response: &str) -> &str {
    let trimmed = response.trim();
    match trimmed.split_once("\r\n\r\n") {
        Some((_, rest)) => rest.split("\r\n\r\n").next().unwrap_or(rest),
        None => trimmed,
    }
}

/// Parse exactly `N` comma-separated floats from a (possibly framed) response.
pub fn parse_fields<const N: usize>(response: &str) -> Result<[f64; N], ReadError> {
    let values = body_of(response)
        .split(',')
        .map(|f| {
            let f = f.trim();
            f.parse::<f64>()
                .map_err(|_| ReadError::Parse { field: f.to_owned() })
        })
        .collect::<Result<Vec<f64>, _>>()?;
    let got = values.len();
    values
        .try_into()
        .map_err(|_| ReadError::FieldCount { expected: N, got })
}
