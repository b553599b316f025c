//! TCP echo server.
//!
//! Accepts connections in an unbounded loop and spawns one handler task per
//! connection. Each handler echoes received bytes verbatim, publishes one
//! telemetry record per message, and one latency sample per connection
//! lifetime (accept to close).

use crate::config::ServerConfig;
use crate::telemetry::{LogEntry, Telemetry};
use bytes::BytesMut;
use chrono::Utc;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Read buffer size per connection
const BUFFER_SIZE: usize = 1024;

/// Server instance
pub struct Server {
    config: ServerConfig,
    telemetry: Telemetry,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: ServerConfig, telemetry: Telemetry) -> Self {
        Server { config, telemetry }
    }

    /// Start the server and begin accepting connections.
    ///
    /// A bind failure is returned to the caller (fatal). Accept errors are
    /// logged and the loop continues. Connection tasks are spawned without
    /// an upper bound; admission control is deliberately absent.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!(
            address = %self.config.listen_addr(),
            pod = %self.config.pod_name,
            "Server listening"
        );

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let telemetry = self.telemetry.clone();
                    let pod_name = self.config.pod_name.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, pod_name, telemetry).await
                        {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Runs the echo loop until EOF or the first I/O error, then records the
/// connection's total duration as one latency sample. The sample is emitted
/// on every exit path; errors terminate only this connection.
pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    pod_name: String,
    telemetry: Telemetry,
) -> std::io::Result<()> {
    let start = Instant::now();
    let result = echo_loop(&mut stream, &addr, &pod_name, &telemetry).await;
    telemetry.record_latency(start.elapsed());
    debug!(peer = %addr, "Connection closed");
    result
}

/// Read-echo loop: each received chunk is logged and written back verbatim.
async fn echo_loop(
    stream: &mut TcpStream,
    addr: &SocketAddr,
    pod_name: &str,
    telemetry: &Telemetry,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        buffer.clear();
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            // Peer closed the connection
            return Ok(());
        }

        telemetry.record_message(LogEntry {
            timestamp: Utc::now(),
            client_addr: addr.to_string(),
            size_bytes: n,
            message: String::from_utf8_lossy(&buffer[..n]).into_owned(),
            pod_name: pod_name.to_string(),
        });

        stream.write_all(&buffer[..n]).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "echowave_server_{}_{}",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn accept_one(
        listener: TcpListener,
        telemetry: Telemetry,
        pod_name: String,
    ) -> std::io::Result<()> {
        let (stream, peer) = listener.accept().await?;
        handle_connection(stream, peer, pod_name, telemetry).await
    }

    #[tokio::test]
    async fn test_ping_emits_one_entry_and_one_sample() {
        let (telemetry, mut log_rx, mut latency_rx) = Telemetry::for_tests();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_one(listener, telemetry, "pod-test".to_string()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        drop(client);

        server.await.unwrap().unwrap();

        let entry = log_rx.recv().await.unwrap();
        assert_eq!(entry.message, "ping");
        assert_eq!(entry.size_bytes, 4);
        assert_eq!(entry.pod_name, "pod-test");
        assert!(log_rx.recv().await.is_none());

        let sample = latency_rx.recv().await.unwrap();
        assert!(sample > Duration::ZERO);
        assert!(latency_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_echo_fidelity_across_messages() {
        let (telemetry, mut log_rx, _latency_rx) = Telemetry::for_tests();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_one(listener, telemetry, "pod-test".to_string()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let messages: [&[u8]; 3] = [b"alpha", b"beta", b"a,b with \"quotes\""];
        for msg in messages {
            client.write_all(msg).await.unwrap();
            let mut buf = vec![0u8; msg.len()];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        }
        drop(client);

        server.await.unwrap().unwrap();

        for msg in messages {
            let entry = log_rx.recv().await.unwrap();
            assert_eq!(entry.message, String::from_utf8_lossy(msg));
            assert_eq!(entry.size_bytes, msg.len());
        }
    }

    #[tokio::test]
    async fn test_sample_recorded_for_connection_with_no_messages() {
        let (telemetry, _log_rx, mut latency_rx) = Telemetry::for_tests();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_one(listener, telemetry, "pod-test".to_string()));

        // Connect and close immediately without sending anything
        let client = TcpStream::connect(addr).await.unwrap();
        drop(client);

        server.await.unwrap().unwrap();
        assert!(latency_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_server_end_to_end_writes_log_row() {
        let log_path = temp_path("e2e_log.csv");
        let latency_path = temp_path("e2e_latency.csv");

        let (telemetry, tasks) =
            Telemetry::start(&log_path, &latency_path, Duration::from_secs(10))
                .await
                .unwrap();

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            log_file: log_path.clone(),
            latency_file: latency_path.clone(),
            window: Duration::from_secs(10),
            pod_name: "pod-e2e".to_string(),
            log_level: "info".to_string(),
        };

        // Bind here so the test knows the ephemeral port
        let listener = TcpListener::bind(config.listen_addr()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_one(listener, telemetry, config.pod_name.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        drop(client);

        server.await.unwrap().unwrap();
        tasks.logger.await.unwrap().unwrap();
        tasks.aggregator.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(&log_path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,client_ip,size_bytes,message,pod_name"
        );
        let row = lines.next().unwrap();
        assert!(row.contains(",5,hello,pod-e2e"));
        assert!(lines.next().is_none());

        let _ = std::fs::remove_file(&log_path);
        let _ = std::fs::remove_file(&latency_path);
    }
}
