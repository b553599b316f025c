//! Wave-based load-generation client.
//!
//! Drives successive waves of simulated clients against an echo server
//! (10, 20, .. 100 concurrent clients). Each simulated client dials once,
//! exchanges a fixed payload a configured number of times, and reports its
//! total round-trip duration. Wave statistics are computed only after every
//! client in the wave has terminated, then appended as one CSV row.

use crate::config::LoadConfig;
use crate::stats::LatencySummary;
use std::io;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Fixed payload exchanged by every simulated client
const LOAD_PAYLOAD: &[u8] = b"performance test payload";

/// Timeout for dialing and for each response read
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between waves, letting the server settle
const WAVE_PAUSE: Duration = Duration::from_secs(2);

/// Wave sizes driven by one program run
const WAVE_START: usize = 10;
const WAVE_END: usize = 100;
const WAVE_STEP: usize = 10;

/// Header of the load-test results CSV
const RESULTS_HEADER: &str = "run_id,replicas,clients,messages_per_client,\
avg_latency_ms,min_latency_ms,max_latency_ms,median_latency_ms,stddev_latency_ms,\
successes,failures\n";

/// One completed wave, ready to append to the results CSV.
#[derive(Debug)]
pub struct WaveResult {
    pub run_id: u32,
    pub replicas: u32,
    pub clients: usize,
    pub messages_per_client: u32,
    pub summary: LatencySummary,
    pub successes: usize,
    pub failures: usize,
}

impl WaveResult {
    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{},{}\n",
            self.run_id,
            self.replicas,
            self.clients,
            self.messages_per_client,
            self.summary.avg_ms,
            self.summary.min_ms,
            self.summary.max_ms,
            self.summary.median_ms,
            self.summary.stddev_ms,
            self.successes,
            self.failures,
        )
    }
}

/// Outcome of one wave before statistics: latency samples in seconds from
/// successful clients, plus the count of failed clients.
#[derive(Debug, Default)]
struct WaveOutcome {
    latencies_secs: Vec<f64>,
    failures: usize,
}

/// One simulated client: dial, exchange the payload `messages` times, return
/// the total wall-clock duration. Any dial/write/read error or timeout makes
/// the whole client a failure; there are no retries.
async fn run_client(target: String, messages: u32, pacing: Duration) -> io::Result<Duration> {
    let start = Instant::now();

    let mut stream = timeout(CONNECTION_TIMEOUT, TcpStream::connect(target.as_str()))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

    let mut buf = [0u8; 1024];
    for _ in 0..messages {
        stream.write_all(LOAD_PAYLOAD).await?;
        tokio::time::sleep(pacing).await;

        let n = timeout(CONNECTION_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed connection",
            ));
        }
    }

    Ok(start.elapsed())
}

/// Launch `clients` simulated clients concurrently and reduce their results
/// after all have terminated. A panicked client task counts as a failure.
async fn run_wave(
    target: &str,
    clients: usize,
    messages: u32,
    pacing: Duration,
) -> WaveOutcome {
    let mut handles = Vec::with_capacity(clients);
    for _ in 0..clients {
        handles.push(tokio::spawn(run_client(
            target.to_string(),
            messages,
            pacing,
        )));
    }

    let mut outcome = WaveOutcome::default();
    for handle in handles {
        match handle.await {
            Ok(Ok(elapsed)) => outcome.latencies_secs.push(elapsed.as_secs_f64()),
            Ok(Err(e)) => {
                debug!(error = %e, "Client failed");
                outcome.failures += 1;
            }
            Err(e) => {
                warn!(error = %e, "Client task panicked");
                outcome.failures += 1;
            }
        }
    }

    outcome
}

/// Open the results CSV append-mode, writing the header only when the file
/// is empty. Repeated program runs accumulate rows into one file.
async fn open_results_csv(path: &std::path::Path) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    if file.metadata().await?.len() == 0 {
        file.write_all(RESULTS_HEADER.as_bytes()).await?;
        file.flush().await?;
    }

    Ok(file)
}

/// Run every wave size in ascending order, appending one result row per
/// wave. Failure to open the output file is returned to the caller (fatal).
pub async fn run_waves(config: &LoadConfig) -> io::Result<()> {
    let mut output = open_results_csv(&config.output).await?;

    let mut clients = WAVE_START;
    while clients <= WAVE_END {
        info!(
            run_id = config.run_id,
            replicas = config.replicas,
            messages = config.messages_per_client,
            clients,
            "Starting wave"
        );

        let outcome = run_wave(
            &config.target,
            clients,
            config.messages_per_client,
            config.pacing,
        )
        .await;

        let successes = outcome.latencies_secs.len();
        let summary = LatencySummary::from_seconds(&outcome.latencies_secs)
            .unwrap_or_else(LatencySummary::zeroed);

        if successes > 0 {
            info!(
                clients,
                avg_ms = format!("{:.2}", summary.avg_ms),
                min_ms = format!("{:.2}", summary.min_ms),
                max_ms = format!("{:.2}", summary.max_ms),
                median_ms = format!("{:.2}", summary.median_ms),
                stddev_ms = format!("{:.2}", summary.stddev_ms),
                successes,
                failures = outcome.failures,
                "Wave complete"
            );
        } else {
            warn!(clients, "Wave complete with no successful clients");
        }

        let result = WaveResult {
            run_id: config.run_id,
            replicas: config.replicas,
            clients,
            messages_per_client: config.current_test_messages,
            summary,
            successes,
            failures: outcome.failures,
        };

        output.write_all(result.to_csv_row().as_bytes()).await?;
        output.flush().await?;

        tokio::time::sleep(WAVE_PAUSE).await;
        clients += WAVE_STEP;
    }

    Ok(())
}
