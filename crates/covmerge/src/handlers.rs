use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use covmerge_common::Colors;
use covmerge_daemon::{AggregatorConfig, CloseReport, MetricsSnapshot};
use covmerge_exec::{read_exec_file, ExecutionData, SessionInfo};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::commands::{ForwardArgs, OutputFormat, ServeArgs};
use crate::error::CoverageError;
use crate::forward::AgentOptions;
use crate::recorder::CoverageRecorder;
use crate::settings::{self, Filters, SessionSettings};
use crate::telemetry;

pub type HandlerResult = Result<(), Box<dyn std::error::Error>>;

const WAIT_TICK: Duration = Duration::from_millis(100);
const STOPPED_BY_DURATION: &str = "duration";

fn format_uptime_ms(uptime_ms: u64) -> String {
    let secs = uptime_ms / 1000;
    let mins = secs / 60;
    let hours = mins / 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, mins % 60, secs % 60)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

pub fn handle_serve(args: ServeArgs, format: OutputFormat) -> HandlerResult {
    let settings = SessionSettings::new(args.output)
        .with_filters(Filters::from_parts(args.includes, args.excludes));
    if args.clean && settings.clean_output()? {
        info!(output = %settings.output().display(), "Removed stale coverage output");
    }

    let mut config = AggregatorConfig::from_env();
    if let Some(secs) = args.drain_timeout {
        config = config.with_drain_timeout(Duration::from_secs(secs));
    }

    let recorder = CoverageRecorder::start(settings, config)?;
    let port = recorder.port();

    if let Some(port_file) = &args.port_file {
        fs::write(port_file, format!("{}\n", port)).map_err(|source| CoverageError::Forward {
            path: port_file.clone(),
            source,
        })?;
    }

    let forwarded = args
        .forward_to
        .iter()
        .map(|dir| recorder.forward_to_project(dir))
        .collect::<Result<Vec<PathBuf>, CoverageError>>()?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&json!({
                "event": "listening",
                "port": port,
                "output": recorder.output_path().display().to_string(),
                "forwarded": forwarded,
            }))?
        ),
        OutputFormat::Text => {
            println!(
                "{} 127.0.0.1:{}",
                Colors::success("Listening on"),
                Colors::bold(&port.to_string())
            );
            println!("  Output: {}", recorder.output_path().display());
            for path in &forwarded {
                println!("  Forwarded: {}", path.display());
            }
        }
    }

    let stopped_by = wait_for_shutdown(args.duration.map(Duration::from_secs))?;
    info!(stopped_by, "Closing coverage listener");

    let report = recorder.close();
    print_close_summary(&report, &recorder.metrics(), stopped_by, format)?;
    Ok(())
}

/// Blocks until SIGINT/SIGTERM or until `duration` elapses, and reports which.
fn wait_for_shutdown(duration: Option<Duration>) -> Result<&'static str, CoverageError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    let signals = covmerge_daemon::SignalHandler::setup(Arc::clone(&shutdown))?;

    let deadline = duration.map(|d| Instant::now() + d);
    while !shutdown.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(STOPPED_BY_DURATION);
        }
        thread::sleep(WAIT_TICK);
    }
    #[cfg(unix)]
    if let Some(signal) = signals.received() {
        return Ok(signal.name());
    }
    Ok("signal")
}

fn print_close_summary(
    report: &CloseReport,
    metrics: &MetricsSnapshot,
    stopped_by: &str,
    format: OutputFormat,
) -> HandlerResult {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&json!({
                "event": "closed",
                "stopped_by": stopped_by,
                "report": report,
                "metrics": metrics,
            }))?
        ),
        OutputFormat::Text => {
            println!(
                "{} {}",
                Colors::bold("Coverage listener closed"),
                Colors::dim(&format!("({})", stopped_by))
            );
            println!(
                "  Sessions: {} accepted, {} completed, {} failed, {} abandoned",
                metrics.connections_accepted,
                metrics.sessions_completed,
                metrics.sessions_failed,
                metrics.sessions_abandoned
            );
            println!(
                "  Written: {} session infos, {} records, {} flushes",
                metrics.session_infos_written, metrics.records_written, metrics.flushes
            );
            println!("  Uptime: {}", format_uptime_ms(metrics.uptime_ms));
            if report.abandoned > 0 {
                println!(
                    "  {}",
                    Colors::warning(&format!(
                        "{} session(s) did not finish within the drain timeout",
                        report.abandoned
                    ))
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SessionView<'a> {
    id: &'a str,
    start: String,
    dump: String,
}

impl<'a> From<&'a SessionInfo> for SessionView<'a> {
    fn from(info: &'a SessionInfo) -> Self {
        Self {
            id: &info.id,
            start: format_millis(info.start),
            dump: format_millis(info.dump),
        }
    }
}

#[derive(Debug, Serialize)]
struct RecordView<'a> {
    id: String,
    name: &'a str,
    probes: usize,
    hits: usize,
}

impl<'a> From<&'a ExecutionData> for RecordView<'a> {
    fn from(data: &'a ExecutionData) -> Self {
        Self {
            id: format!("{:016x}", data.id),
            name: &data.name,
            probes: data.probes.len(),
            hits: data.hit_count(),
        }
    }
}

pub fn handle_inspect(file: PathBuf, merged: bool, format: OutputFormat) -> HandlerResult {
    let exec = read_exec_file(&file).map_err(CoverageError::from)?;
    let records = if merged {
        exec.merged_records()
    } else {
        exec.records.clone()
    };

    let sessions: Vec<SessionView> = exec.sessions.iter().map(SessionView::from).collect();
    let classes: Vec<RecordView> = records.iter().map(RecordView::from).collect();

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "file": file.display().to_string(),
                "headers": exec.headers,
                "merged": merged,
                "sessions": sessions,
                "records": classes,
            }))?
        ),
        OutputFormat::Text => {
            println!("{}", Colors::bold(&file.display().to_string()));
            println!("  Headers: {}", exec.headers);
            println!();
            println!("{} ({})", Colors::bold("Sessions"), sessions.len());
            for session in &sessions {
                println!(
                    "  {}  {} .. {}",
                    Colors::info(session.id),
                    session.start,
                    session.dump
                );
            }
            println!();
            let title = if merged { "Classes (merged)" } else { "Records" };
            println!("{} ({})", Colors::bold(title), classes.len());
            for class in &classes {
                println!(
                    "  {} {}  {}/{}",
                    Colors::dim(&class.id),
                    class.name,
                    class.hits,
                    class.probes
                );
            }
        }
    }
    Ok(())
}

pub fn handle_forward(args: ForwardArgs, format: OutputFormat) -> HandlerResult {
    let mut options = AgentOptions::new(args.port)
        .with_filters(Filters::from_parts(args.includes, args.excludes));
    if let Some(session_id) = args.session_id {
        options = options.with_session_id(session_id);
    }

    let written = if args.dry_run {
        None
    } else {
        Some(options.append_to_project(&args.project_dir)?)
    };
    let javaagent = args.javaagent.as_deref().map(|jar| options.javaagent_arg(jar));

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "options": options,
                "agent_args": options.to_agent_args(),
                "javaagent": javaagent,
                "written": written,
            }))?
        ),
        OutputFormat::Text => {
            match &written {
                Some(path) => println!("{} {}", Colors::success("Updated"), path.display()),
                None => print!("{}", options.gradle_properties()),
            }
            if let Some(arg) = &javaagent {
                println!("{}", arg);
            }
        }
    }
    Ok(())
}

pub fn handle_env(format: OutputFormat) -> HandlerResult {
    let names = [
        settings::OUTPUT_VAR,
        settings::INCLUDES_VAR,
        settings::EXCLUDES_VAR,
        settings::JAVAAGENT_VAR,
        "COVMERGE_DRAIN_TIMEOUT",
        "COVMERGE_ACCEPT_POLL_MS",
        "COVMERGE_WRITE_BUFFER",
        telemetry::LOG_FILE_VAR,
        "RUST_LOG",
        "NO_COLOR",
    ];
    let vars: Vec<(&str, Option<String>)> = names
        .iter()
        .map(|name| (*name, std::env::var(name).ok()))
        .collect();

    let config = AggregatorConfig::from_env();
    let session = SessionSettings::from_env();

    match format {
        OutputFormat::Json => {
            let env_map: serde_json::Map<String, serde_json::Value> = vars
                .iter()
                .map(|(name, value)| (name.to_string(), json!(value)))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "environment": env_map,
                    "settings": session,
                    "drain_timeout_ms": config.drain_timeout.as_millis() as u64,
                    "accept_poll_ms": config.accept_poll_interval.as_millis() as u64,
                    "write_buffer_bytes": config.write_buffer_bytes,
                }))?
            );
        }
        OutputFormat::Text => {
            println!("{}", Colors::bold("Coverage Configuration:"));
            match &session {
                Some(s) => println!("  Output: {}", s.output().display()),
                None => println!("  Output: {}", Colors::dim("(coverage disabled)")),
            }
            println!("  Drain timeout: {}s", config.drain_timeout.as_secs());
            println!("  Accept poll: {}ms", config.accept_poll_interval.as_millis());
            println!("  Write buffer: {} bytes", config.write_buffer_bytes);
            println!();
            println!("{}", Colors::bold("Environment Variables:"));
            for (name, value) in &vars {
                let val_str = value.as_deref().unwrap_or("(not set)");
                println!(
                    "  {}: {}",
                    name,
                    if value.is_some() {
                        Colors::info(val_str)
                    } else {
                        Colors::dim(val_str)
                    }
                );
            }
        }
    }
    Ok(())
}
