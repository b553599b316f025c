//! Telemetry pipeline for the echo server.
//!
//! Connection handlers publish onto two bounded channels; two dedicated sink
//! tasks drain them:
//!
//! - a CSV logger appending one row per received message, flushed per row
//! - a latency aggregator emitting one average-latency row per fixed window
//!
//! Each sink owns its output file exclusively. A sink terminates when its
//! channel closes (every sender dropped), flushing anything still buffered,
//! so dropping the [`Telemetry`] handle and awaiting [`TelemetryTasks`] is
//! the drain protocol.
//!
//! Producers never block on the sinks: when a queue is full the record is
//! dropped and a warning logged. Echo traffic must not stall on a slow disk.

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of each telemetry queue
pub const CHANNEL_CAPACITY: usize = 100;

/// Header of the per-message log CSV
const LOG_HEADER: &str = "timestamp,client_ip,size_bytes,message,pod_name\n";

/// Header of the latency-summary CSV
const LATENCY_HEADER: &str = "timestamp,avg_latency_ms\n";

/// One received message, as recorded by a connection handler.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub client_addr: String,
    pub size_bytes: usize,
    pub message: String,
    pub pod_name: String,
}

impl LogEntry {
    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{}\n",
            csv_field(&self.timestamp.to_rfc3339()),
            csv_field(&self.client_addr),
            self.size_bytes,
            csv_field(&self.message),
            csv_field(&self.pod_name),
        )
    }
}

/// Quote a CSV field if it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Producer-side handle shared by all connection handlers.
#[derive(Clone)]
pub struct Telemetry {
    log_tx: mpsc::Sender<LogEntry>,
    latency_tx: mpsc::Sender<Duration>,
}

/// Join handles for the two sink tasks. Await them after dropping every
/// [`Telemetry`] clone to drain and close the output files.
pub struct TelemetryTasks {
    pub logger: JoinHandle<std::io::Result<()>>,
    pub aggregator: JoinHandle<std::io::Result<()>>,
}

impl Telemetry {
    /// Open both output files and spawn the sink tasks.
    ///
    /// The log file is opened append-mode; its header is written only when
    /// the file is empty, so repeated server runs accumulate into one file.
    /// The latency file is truncated and gets a fresh header. Failure to
    /// open either file is returned to the caller, which treats it as fatal.
    pub async fn start(
        log_path: &Path,
        latency_path: &Path,
        window: Duration,
    ) -> std::io::Result<(Telemetry, TelemetryTasks)> {
        let log_file = open_append_with_header(log_path, LOG_HEADER).await?;

        let mut latency_file = File::create(latency_path).await?;
        latency_file.write_all(LATENCY_HEADER.as_bytes()).await?;
        latency_file.flush().await?;

        let (log_tx, log_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (latency_tx, latency_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let logger = tokio::spawn(csv_logger(log_file, log_rx));
        let aggregator = tokio::spawn(latency_aggregator(latency_file, latency_rx, window));

        Ok((
            Telemetry { log_tx, latency_tx },
            TelemetryTasks { logger, aggregator },
        ))
    }

    /// Channel-only handle for tests that assert on emitted records.
    #[cfg(test)]
    pub(crate) fn for_tests() -> (
        Telemetry,
        mpsc::Receiver<LogEntry>,
        mpsc::Receiver<Duration>,
    ) {
        let (log_tx, log_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (latency_tx, latency_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Telemetry { log_tx, latency_tx }, log_rx, latency_rx)
    }

    /// Enqueue one message record. Drops the record with a warning if the
    /// logger queue is full.
    pub fn record_message(&self, entry: LogEntry) {
        if let Err(e) = self.log_tx.try_send(entry) {
            warn!(error = %e, "Log queue full, dropping message record");
        }
    }

    /// Enqueue one connection-latency sample. Drops the sample with a
    /// warning if the aggregator queue is full.
    pub fn record_latency(&self, latency: Duration) {
        if let Err(e) = self.latency_tx.try_send(latency) {
            warn!(error = %e, "Latency queue full, dropping sample");
        }
    }
}

/// Open a file for appending, writing `header` first if the file is empty.
async fn open_append_with_header(path: &Path, header: &str) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    if file.metadata().await?.len() == 0 {
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;
    }

    Ok(file)
}

/// Drain the log queue, appending one CSV row per entry. Every row is
/// flushed before the next entry is processed.
async fn csv_logger(
    mut file: File,
    mut rx: mpsc::Receiver<LogEntry>,
) -> std::io::Result<()> {
    while let Some(entry) = rx.recv().await {
        file.write_all(entry.to_csv_row().as_bytes()).await?;
        file.flush().await?;
    }

    debug!("Log queue closed, CSV logger exiting");
    Ok(())
}

/// Buffer latency samples and emit one average row per window. Windows with
/// zero samples emit nothing. On channel close, any still-buffered samples
/// are flushed as a final row before exiting.
async fn latency_aggregator(
    mut file: File,
    mut rx: mpsc::Receiver<Duration>,
    window: Duration,
) -> std::io::Result<()> {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
    let mut samples: Vec<Duration> = Vec::new();

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(latency) => samples.push(latency),
                    None => {
                        if !samples.is_empty() {
                            write_average_row(&mut file, &samples).await?;
                        }
                        debug!("Latency queue closed, aggregator exiting");
                        return Ok(());
                    }
                }
            }
            _ = ticker.tick() => {
                if !samples.is_empty() {
                    write_average_row(&mut file, &samples).await?;
                    samples.clear();
                }
            }
        }
    }
}

async fn write_average_row(file: &mut File, samples: &[Duration]) -> std::io::Result<()> {
    let total: Duration = samples.iter().sum();
    let avg_ms = total.as_secs_f64() / samples.len() as f64 * 1000.0;
    let row = format!("{},{:.2}\n", Utc::now().to_rfc3339(), avg_ms);
    file.write_all(row.as_bytes()).await?;
    file.flush().await
}
