//! Batch, one-shot and diagnostic commands.

use crate::config::Config;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use irm_client::{connect, ClientError, PoolParts, Worker, WorkerPool, WorkerReport};
use irm_protocol::{FixedName, IrmHeader};
use pretty_hex::pretty_hex;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Output rendering for responses and errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Response text as received, errors on stderr.
    #[default]
    Plain,
    /// One JSON object per line.
    Jsonl,
}

/// Reads requests from `path`, or stdin for `-`.
pub fn load_requests(path: &Path) -> io::Result<Vec<String>> {
    if path == Path::new("-") {
        read_requests(io::stdin().lock())
    } else {
        read_requests(BufReader::new(File::open(path)?))
    }
}

/// Reads one request per line, skipping blank lines and `#` comments.
pub fn read_requests(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut requests = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        requests.push(trimmed.to_string());
    }
    Ok(requests)
}

#[derive(Serialize)]
struct Record<'a> {
    timestamp: DateTime<Utc>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason_code: Option<u32>,
}

/// Renders one successful response.
pub fn format_response(format: OutputFormat, text: &str) -> String {
    match format {
        OutputFormat::Plain => text.to_string(),
        OutputFormat::Jsonl => to_json_line(&Record {
            timestamp: Utc::now(),
            status: "ok",
            worker: None,
            response: Some(text),
            error: None,
            return_code: None,
            reason_code: None,
        }),
    }
}

/// Renders one failed request.
pub fn format_error(format: OutputFormat, worker: usize, error: &ClientError) -> String {
    match format {
        OutputFormat::Plain => format!("{} [worker {}]: {}", "Error".red(), worker, error),
        OutputFormat::Jsonl => to_json_line(&Record {
            timestamp: Utc::now(),
            status: if error.is_fatal() { "fatal" } else { "error" },
            worker: Some(worker),
            response: None,
            error: Some(error.to_string()),
            return_code: error.status().map(|s| s.return_code),
            reason_code: error.status().map(|s| s.reason_code),
        }),
    }
}

fn to_json_line(record: &Record<'_>) -> String {
    serde_json::to_string(record)
        .unwrap_or_else(|e| format!("{{\"status\":\"error\",\"error\":\"{}\"}}", e))
}

/// Totals of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub workers: usize,
    pub submitted: usize,
    pub responses: usize,
    pub business_errors: usize,
    pub rejected: usize,
    pub failed_workers: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Returns whether every worker ended cleanly.
    pub fn is_success(&self) -> bool {
        self.failed_workers == 0 && !self.interrupted
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.responses as f64 / secs
        } else {
            0.0
        };
        writeln!(f, "{}", "Summary".bold())?;
        writeln!(f, "  sessions:        {}", self.workers)?;
        writeln!(f, "  submitted:       {}", self.submitted)?;
        writeln!(
            f,
            "  responses:       {}",
            self.responses.to_string().green()
        )?;
        writeln!(
            f,
            "  business errors: {}",
            paint_count(self.business_errors, false)
        )?;
        writeln!(
            f,
            "  rejected:        {}",
            paint_count(self.rejected, false)
        )?;
        writeln!(
            f,
            "  failed sessions: {}",
            paint_count(self.failed_workers, true)
        )?;
        if self.interrupted {
            writeln!(f, "  {}", "interrupted".yellow())?;
        }
        write!(f, "  elapsed:         {:.3}s ({:.1} tx/s)", secs, rate)
    }
}

fn paint_count(n: usize, severe: bool) -> colored::ColoredString {
    match (n, severe) {
        (0, _) => n.to_string().normal(),
        (_, true) => n.to_string().red(),
        (_, false) => n.to_string().yellow(),
    }
}

/// Runs `requests` `repeat` times over a pool of sessions.
///
/// Responses and errors are written to `out` as they arrive. Ctrl+C stops
/// the feed; requests already queued still complete.
pub async fn run_batch(
    config: &Config,
    requests: Vec<String>,
    repeat: usize,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<RunSummary, Box<dyn Error>> {
    let template = Arc::new(config.template()?);
    let pool = WorkerPool::start(&config.pool_config(), template).await?;
    let workers = pool.size();
    let PoolParts {
        requests: queue,
        mut responses,
        mut reports,
        handles,
    } = pool.into_parts()?;

    let mut summary = RunSummary {
        workers,
        submitted: requests.len() * repeat,
        ..Default::default()
    };
    let started = Instant::now();

    let feeder = tokio::spawn(async move {
        for _ in 0..repeat {
            for line in &requests {
                if queue.send(line.clone()).await.is_err() {
                    return;
                }
            }
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut live = workers;
    while live > 0 {
        tokio::select! {
            Some(text) = responses.recv() => {
                summary.responses += 1;
                writeln!(out, "{}", format_response(format, &text))?;
            }
            report = reports.recv() => match report {
                Some(WorkerReport::Finished { worker, stats }) => {
                    tracing::debug!("worker {} finished: {:?}", worker, stats);
                    live -= 1;
                }
                Some(WorkerReport::Error { worker, error }) => {
                    if error.is_fatal() {
                        summary.failed_workers += 1;
                        live -= 1;
                    } else if error.status().is_some() {
                        summary.business_errors += 1;
                    } else {
                        summary.rejected += 1;
                    }
                    report_error(format, worker, &error, out)?;
                }
                None => break,
            },
            _ = &mut ctrl_c, if !summary.interrupted => {
                eprintln!("\n{}", "Interrupted, finishing queued requests...".dimmed());
                summary.interrupted = true;
                feeder.abort();
            }
        }
    }

    // Workers are gone; collect what they published before stopping.
    while let Some(text) = responses.recv().await {
        summary.responses += 1;
        writeln!(out, "{}", format_response(format, &text))?;
    }
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("worker task failed: {}", e);
        }
    }
    let _ = feeder.await;

    summary.elapsed = started.elapsed();
    Ok(summary)
}

fn report_error(
    format: OutputFormat,
    worker: usize,
    error: &ClientError,
    out: &mut dyn Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Plain => {
            eprintln!("{}", format_error(format, worker, error));
            Ok(())
        }
        OutputFormat::Jsonl => writeln!(out, "{}", format_error(format, worker, error)),
    }
}

/// Runs a single transaction on a new session.
pub async fn send_one(config: &Config, request: &str) -> Result<String, ClientError> {
    let template = config
        .template()
        .map_err(|e| ClientError::Configuration(e.to_string()))?;
    let template = Arc::new(template);
    let pool_config = config.pool_config();
    let session = connect(&pool_config.connection).await?;
    let mut worker = Worker::new(0, template, session, pool_config.worker)?;

    let result = worker.transact(request).await;
    if !matches!(&result, Err(e) if e.is_fatal()) {
        if let Err(e) = worker.close().await {
            tracing::debug!("close failed: {}", e);
        }
    }
    result
}

/// Describes the header template and dumps its wire bytes.
pub fn describe_header(
    template: &IrmHeader,
    trancode: Option<&str>,
) -> Result<String, Box<dyn Error>> {
    let header = match trancode {
        Some(code) => {
            let trancode = FixedName::new("trancode", code)?;
            template.for_transaction(template.client_id, trancode)
        }
        None => template.clone(),
    };

    let mut bytes = BytesMut::with_capacity(irm_protocol::IRM_SIZE);
    header.put(&mut bytes);

    let mut out = String::new();
    out.push_str(&format!("{}\n", "IRM header".bold()));
    out.push_str(&format!("  id:          {}\n", header.id.to_string().cyan()));
    out.push_str(&format!("  client id:   '{}'\n", header.client_id));
    out.push_str(&format!("  timer:       {:?}\n", header.timer));
    out.push_str(&format!("  socket type: {:?}\n", header.socket_type));
    out.push_str(&format!(
        "  flags:       F0={:02X} F1={:02X} F2={:02X} F3={:02X} F5={:02X}\n",
        header.f0, header.user.f1, header.user.f2, header.user.f3, header.f5
    ));
    out.push_str(&format!("  message:     {:?}\n", header.user.message_type));
    out.push_str(&format!("  trancode:    '{}'\n", header.user.trancode));
    out.push_str(&format!("  datastore:   '{}'\n", header.user.datastore));
    out.push_str(&format!("  lterm:       '{}'\n", header.user.lterm));
    out.push_str(&format!("  userid:      '{}'\n\n", header.user.racf_userid));
    out.push_str(&pretty_hex(&bytes));
    out.push('\n');
    Ok(out)
}
