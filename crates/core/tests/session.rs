//! End-to-end session tests against a fake device on loopback.
//!
//! The fake answers `/5`, `/status`, `/1` and `/2` the way the field unit does
//! and records every path it was asked for.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cellwatch_core::config::MonitorCfg;
use cellwatch_core::control::SequencePhase;
use cellwatch_core::device::HttpActionTrigger;
use cellwatch_core::io::commands::SessionCommand;
use cellwatch_core::runtime::Session;
use cellwatch_core::telemetry::TelemetryPublisher;
use cellwatch_core::types::{FaultStatus, RulValue, SessionState};
use cellwatch_rul::MockPredictor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const INITIAL: &str = "12.2,150,400,29,51";
const STATUS: &str = "31,45,11.9,-120";
const WAIT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
struct Hits(Arc<Mutex<Vec<String>>>);

impl Hits {
    fn count(&self, path: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|p| p.as_str() == path).count()
    }

    fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Spawn a fake device. Returns its port and the request log.
async fn fake_device() -> (u16, Hits) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Hits::default();
    let log = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            let log = log.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 2048];
                let n = sock.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                let path = request.split_whitespace().nth(1).unwrap_or("").to_owned();
                let body = match path.as_str() {
                    "/5" => INITIAL,
                    "/status" => STATUS,
                    _ => "OK",
                };
                log.0.lock().unwrap().push(path);
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    (port, hits)
}

fn cfg(port: u16) -> MonitorCfg {
    MonitorCfg {
        host: "127.0.0.1".into(),
        port,
        tick_ms: 50,
        io_timeout_ms: 1000,
        debounce_secs: 0,
        ..MonitorCfg::default()
    }
}

fn trigger(cfg: &MonitorCfg) -> Arc<HttpActionTrigger> {
    Arc::new(HttpActionTrigger::from_cfg(cfg).unwrap())
}

#[tokio::test]
async fn session_runs_and_fires_actions_once() {
    let (port, hits) = fake_device().await;
    let cfg = cfg(port);
    let (mut session, tx, mut rx) =
        Session::new(Arc::new(cfg.clone()), Arc::new(MockPredictor::new(812.5)), trigger(&cfg));
    let handle = tokio::spawn(async move { session.run().await });

    // 1. Startup: /5 read, RUL set, state Running
    let snap = tokio::time::timeout(WAIT, rx.wait_for(|s| s.tick_count >= 5))
        .await
        .expect("ticks within timeout")
        .unwrap()
        .clone();
    assert_eq!(snap.state, SessionState::Running);
    assert_eq!(snap.rul, RulValue::Estimate(812.5));
    let initial = snap.initial.expect("initial reading");
    assert_eq!(initial.net_current(), -250.0);

    // 2. Per-tick reading and status
    let reading = snap.reading.expect("reading");
    assert_eq!(reading.current, -120.0);
    assert_eq!(snap.fault, FaultStatus::Normal { current: Some(-120.0) });
    assert_eq!(snap.soc_projection.len(), 10);
    assert!(snap.last_poll_error.is_none());

    // 3. Sustained qualifying current: /1 then /2, each exactly once
    assert_eq!(snap.phase, SequencePhase::Action2Fired);
    assert_eq!(snap.last_action.as_deref(), Some("Triggered /2"));
    assert_eq!(hits.count("/1"), 1);
    assert_eq!(hits.count("/2"), 1);
    assert_eq!(hits.count("/5"), 1);
    let order: Vec<_> = hits.all().into_iter().filter(|p| p == "/1" || p == "/2").collect();
    assert_eq!(order, ["/1", "/2"]);

    // 4. Shutdown
    tx.send(SessionCommand::Shutdown).await.unwrap();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(rx.borrow().state, SessionState::Stopped);
}

#[tokio::test]
async fn prediction_failure_blocks_loop() {
    let (port, hits) = fake_device().await;
    let cfg = cfg(port);
    let (mut session, tx, mut rx) =
        Session::new(Arc::new(cfg.clone()), Arc::new(MockPredictor::failing()), trigger(&cfg));
    let handle = tokio::spawn(async move { session.run().await });

    let snap = tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s.state, SessionState::Failed(_))))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(snap.rul, RulValue::Unavailable);
    assert!(snap.initial.is_none());
    let first_id = snap.session_id;

    // no ticks after a failed start
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rx.borrow().tick_count, 0);
    assert_eq!(hits.count("/status"), 0);

    // a later start retries with a fresh session
    tx.send(SessionCommand::Start).await.unwrap();
    rx.wait_for(|s| s.session_id != first_id && matches!(s.state, SessionState::Failed(_)))
        .await
        .unwrap();
    assert_eq!(hits.count("/5"), 2);

    tx.send(SessionCommand::Shutdown).await.unwrap();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(rx.borrow().state, SessionState::Stopped);
}

#[tokio::test]
async fn cancellation_stops_running_loop() {
    let (port, hits) = fake_device().await;
    let cfg = cfg(port);
    let (mut session, _tx, mut rx) =
        Session::new(Arc::new(cfg.clone()), Arc::new(MockPredictor::new(1.0)), trigger(&cfg));
    let token = session.token();
    let handle = tokio::spawn(async move { session.run().await });

    rx.wait_for(|s| s.tick_count >= 2).await.unwrap();
    token.cancel();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(rx.borrow().state, SessionState::Stopped);

    // let a request that was in flight at cancel time land in the log
    tokio::time::sleep(Duration::from_millis(100)).await;
    let polls = hits.count("/status");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.count("/status"), polls, "no polls after cancellation");
}

#[tokio::test]
async fn waits_for_start_without_autostart() {
    let (port, hits) = fake_device().await;
    let cfg = MonitorCfg { autostart: false, ..cfg(port) };
    let (mut session, tx, mut rx) =
        Session::new(Arc::new(cfg.clone()), Arc::new(MockPredictor::new(5.0)), trigger(&cfg));
    let handle = tokio::spawn(async move { session.run().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rx.borrow().state, SessionState::Idle);
    assert!(hits.all().is_empty());

    tx.send(SessionCommand::Start).await.unwrap();
    let snap = rx.wait_for(|s| s.state == SessionState::Running).await.unwrap().clone();
    assert_eq!(snap.rul, RulValue::Estimate(5.0));

    tx.send(SessionCommand::Shutdown).await.unwrap();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn startup_pushes_telemetry_once() {
    let (port, _hits) = fake_device().await;

    // telemetry sink
    let sink = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sink_addr = sink.local_addr().unwrap();
    let sink_task = tokio::spawn(async move {
        let (mut sock, _) = sink.accept().await.unwrap();
        let mut buf = vec![0u8; 2048];
        let n = sock.read(&mut buf).await.unwrap();
        sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nConnection: close\r\n\r\n1")
            .await
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    });
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let telemetry =
        TelemetryPublisher::with_client(format!("http://{sink_addr}/update"), Some("KEY".into()), client);

    let cfg = cfg(port);
    let (session, tx, mut rx) =
        Session::new(Arc::new(cfg.clone()), Arc::new(MockPredictor::new(812.5)), trigger(&cfg));
    let mut session = session.with_telemetry(telemetry);
    let handle = tokio::spawn(async move { session.run().await });

    let request = tokio::time::timeout(WAIT, sink_task).await.unwrap().unwrap();
    let line = request.lines().next().unwrap();
    assert!(line.starts_with("GET /update?api_key=KEY&field1=12.2"), "{line}");
    assert!(line.contains("field6=812.5"));

    rx.wait_for(|s| s.tick_count >= 1).await.unwrap();
    tx.send(SessionCommand::Shutdown).await.unwrap();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
}
