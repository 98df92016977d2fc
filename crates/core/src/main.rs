use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cellwatch_core::config::MonitorCfg;
use cellwatch_core::device::HttpActionTrigger;
use cellwatch_core::io::commands::{CommandSender, SessionCommand};
use cellwatch_core::io::snapshot::SnapshotReceiver;
use cellwatch_core::runtime::Session;
use cellwatch_core::types::{MonitorSnapshot, SessionState, Severity};
use cellwatch_rul::RulPredictor;
use cellwatch_rul::http::HttpPredictor;
use cellwatch_rul::linear::LinearPredictor;
use clap::Parser;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILE: &str = "/tmp/cellwatch.log";

/// Battery-pack monitor console.
#[derive(Parser, Debug)]
#[command(name = "cellwatch", version, about)]
struct Args {
    /// `key=value` config file; `CELLWATCH_*` env vars override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing() -> anyhow::Result<()> {
    // JSON to a file keeps the console readable while snapshots print.
    if std::env::var_os("CELLWATCH_LOG_JSON").is_some() {
        let path = std::env::var("CELLWATCH_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.into());
        let file = std::fs::File::create(&path).with_context(|| format!("creating log file {path}"))?;
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .init();
    }
    Ok(())
}

fn build_predictor(cfg: &MonitorCfg) -> anyhow::Result<Arc<dyn RulPredictor>> {
    if let Some(url) = &cfg.rul_url {
        return Ok(Arc::new(HttpPredictor::new(url.clone())?));
    }
    if let Some(path) = &cfg.rul_model {
        let model = LinearPredictor::from_path(path).with_context(|| format!("loading RUL model {path}"))?;
        return Ok(Arc::new(model));
    }
    anyhow::bail!("no RUL model configured: set CELLWATCH_RUL_URL or CELLWATCH_RUL_MODEL")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let cfg = MonitorCfg::load(args.config.as_deref()).context("loading configuration")?;
    if args.print_config {
        for (key, value, desc) in cfg.to_entries() {
            println!("{key:<26} {value:<34} {desc}");
        }
        return Ok(());
    }

    let predictor = build_predictor(&cfg)?;
    let trigger = Arc::new(HttpActionTrigger::from_cfg(&cfg).context("building device client")?);
    let autostart = cfg.autostart;

    let (mut session, command_tx, snapshot_rx) = Session::new(Arc::new(cfg), predictor, trigger);
    let token = session.token();

    let session_fut = session.run();
    let console_fut = run_console(command_tx, snapshot_rx, token.clone(), autostart);
    tokio::pin!(session_fut);
    tokio::pin!(console_fut);

    tokio::select! {
        _ = &mut session_fut => {
            token.cancel();
            (&mut console_fut).await
        }
        result = &mut console_fut => {
            token.cancel();
            (&mut session_fut).await;
            result
        }
    }
}

async fn run_console(
    command_tx: CommandSender,
    mut snapshot_rx: SnapshotReceiver,
    token: CancellationToken,
    autostart: bool,
) -> anyhow::Result<()> {
    println!("cellwatch: commands are `start` and `quit`");
    if !autostart {
        println!("waiting for `start`");
    }

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    spawn_input_thread(line_tx);

    let mut last_state = SessionState::Idle;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                break;
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshot_rx.borrow_and_update().clone();
                if snap.state != last_state {
                    print_transition(&snap)?;
                    last_state = snap.state.clone();
                }
                if snap.state == SessionState::Running && snap.tick_count > 0 {
                    print_tick(&snap)?;
                }
                if snap.state == SessionState::Stopped {
                    break;
                }
            }
            line = line_rx.recv() => {
                // input closed: Ctrl-C, Ctrl-D or a terminal error
                let Some(line) = line else {
                    let _ = command_tx.send(SessionCommand::Shutdown).await;
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                match SessionCommand::parse(text) {
                    Some(cmd) => {
                        if command_tx.send(cmd).await.is_err() || cmd == SessionCommand::Shutdown {
                            break;
                        }
                    }
                    None => println!("unknown command {text:?}; try `start` or `quit`"),
                }
            }
        }
    }
    println!();
    Ok(())
}

fn print_transition(snap: &MonitorSnapshot) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    match &snap.state {
        SessionState::Idle => {}
        SessionState::Starting => writeln!(out, "\rstarting: reading /5 and estimating RUL")?,
        SessionState::Running => {
            if let Some(initial) = &snap.initial {
                writeln!(
                    out,
                    "\rinitial: {:.2} V, charge {:.2} mA, discharge {:.2} mA, net {:.2} mA, {:.1} °C, {:.1} %",
                    initial.voltage,
                    initial.charge_current,
                    initial.discharge_current,
                    initial.net_current(),
                    initial.temperature,
                    initial.humidity,
                )?;
            }
            writeln!(out, "RUL: {}", snap.rul)?;
        }
        SessionState::Failed(msg) => {
            writeln!(out, "\rstartup failed: {msg} (RUL {}); type `start` to retry", snap.rul)?
        }
        SessionState::Stopped => writeln!(out, "\rstopped")?,
    }
    out.flush()?;
    Ok(())
}

/// Worst status channel with its severity marker.
fn status_line(snap: &MonitorSnapshot) -> String {
    let headline = snap.headline();
    let mark = match headline.severity() {
        Severity::Normal => "ok",
        Severity::Warning => "WARN",
    };
    format!("{mark} {}", headline.message())
}

fn print_tick(snap: &MonitorSnapshot) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    if let Some(err) = &snap.last_poll_error {
        writeln!(out, "\r[{}] poll failed: {err}", snap.tick_count)?;
        out.flush()?;
        return Ok(());
    }
    let Some(r) = &snap.reading else {
        return Ok(());
    };
    writeln!(
        out,
        "\r[{}] {:.2} V  {:.2} mA  {:.1} °C  {:.1} %  | {} | phase {}",
        snap.tick_count,
        r.voltage,
        r.current,
        r.temperature,
        r.humidity,
        status_line(snap),
        snap.phase,
    )?;
    // the headline shows the classifier fault; keep a concurrent twin anomaly visible
    if !snap.fault.is_normal() && !snap.twin.is_normal() {
        writeln!(out, "    twin: {}", snap.twin.message())?;
    }
    if let (Some(first), Some(last)) = (snap.soc_projection.first(), snap.soc_projection.last()) {
        writeln!(out, "    SOC projection {first:.2} -> {last:.2} over {} steps", snap.soc_projection.len())?;
    }
    if let Some(note) = &snap.last_action {
        writeln!(out, "    {note}")?;
    }
    out.flush()?;
    Ok(())
}

fn spawn_input_thread(line_tx: mpsc::UnboundedSender<String>) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                eprintln!("input error: {e}");
                return;
            }
        };
        loop {
            match editor.readline("cellwatch> ") {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("input error: {e}");
                    break;
                }
            }
        }
    });
}
