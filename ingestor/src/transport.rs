//! Transport reader: a long-lived line stream from the coordinator over a
//! serial port or a TCP socket, supervised with bounded reconnects.
//!
//! One reader per configured connection; nothing else writes to the
//! stream. The serial port is read on a blocking thread and bridged into
//! the async side over a channel (the `serialport` crate is synchronous).

use crate::decode;
use crate::errors::Result;
use crate::metrics::{DECODE_FAILURES_TOTAL, LINES_TOTAL, TRANSPORT_RECONNECTS_TOTAL};
use crate::model::RawReading;
use crate::publish::{Event, Publisher};
use chrono::Utc;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Serial { path: String, baud: u32 },
    Tcp { addr: String },
    /// No reader at all; ingestion happens only over HTTP.
    HttpOnly,
}

impl TransportConfig {
    pub fn transport_id(&self) -> String {
        match self {
            TransportConfig::Serial { path, .. } => format!("serial:{path}"),
            TransportConfig::Tcp { addr } => format!("tcp:{addr}"),
            TransportConfig::HttpOnly => "http-only".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        ReaderSettings {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }
}

enum LineSource {
    Tcp(Lines<BufReader<TcpStream>>),
    Serial(mpsc::Receiver<io::Result<String>>),
}

impl LineSource {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        match self {
            LineSource::Tcp(lines) => lines.next_line().await,
            LineSource::Serial(rx) => match rx.recv().await {
                Some(Ok(line)) => Ok(Some(line)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            },
        }
    }
}

async fn open(config: &TransportConfig) -> Result<LineSource> {
    match config {
        TransportConfig::Tcp { addr } => {
            let stream = TcpStream::connect(addr).await?;
            Ok(LineSource::Tcp(BufReader::new(stream).lines()))
        }
        TransportConfig::Serial { path, baud } => {
            let port = serialport::new(path, *baud)
                .timeout(Duration::from_millis(500))
                .open()?;
            info!("opened serial port {} at {} baud", path, baud);
            let (tx, rx) = mpsc::channel(256);
            std::thread::spawn(move || read_serial_lines(port, tx));
            Ok(LineSource::Serial(rx))
        }
        TransportConfig::HttpOnly => unreachable!("no reader in HTTP-only mode"),
    }
}

/// Blocking read loop: accumulate bytes, emit one line per newline. Ends
/// when the port errors or the async side hangs up.
fn read_serial_lines(
    mut port: Box<dyn serialport::SerialPort>,
    tx: mpsc::Sender<io::Result<String>>,
) {
    let mut buf = [0u8; 256];
    let mut acc: Vec<u8> = Vec::new();
    loop {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                for &byte in &buf[..n] {
                    match byte {
                        b'\n' => {
                            let line = String::from_utf8_lossy(&acc).into_owned();
                            acc.clear();
                            if tx.blocking_send(Ok(line)).is_err() {
                                return;
                            }
                        }
                        b'\r' => {}
                        other => acc.push(other),
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

/// Supervise the connection: read until it drops, then reconnect with a
/// fixed delay up to the configured attempt bound. Exhausting the bound is
/// terminal; the process must be restarted externally.
pub async fn run_reader(
    config: TransportConfig,
    settings: ReaderSettings,
    tx: mpsc::Sender<RawReading>,
    publisher: Arc<Publisher>,
) {
    let transport_id = config.transport_id();
    let mut attempts: u32 = 0;

    loop {
        match open(&config).await {
            Ok(mut lines) => {
                attempts = 0;
                info!(%transport_id, "transport connected");
                publisher.publish_diagnostic(Event::TransportStatus {
                    connected: true,
                    transport_id: transport_id.clone(),
                    timestamp: Utc::now(),
                });

                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if !forward_line(&line, &tx).await {
                                return; // pipeline gone, nothing left to do
                            }
                        }
                        Ok(None) => {
                            warn!(%transport_id, "transport stream closed");
                            break;
                        }
                        Err(e) => {
                            warn!(%transport_id, error = %e, "transport read error");
                            break;
                        }
                    }
                }

                publisher.publish_diagnostic(Event::TransportStatus {
                    connected: false,
                    transport_id: transport_id.clone(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(%transport_id, error = %e, "transport connect failed");
            }
        }

        attempts += 1;
        if attempts > settings.max_reconnect_attempts {
            error!(
                %transport_id,
                attempts = settings.max_reconnect_attempts,
                "max reconnect attempts reached, reader degraded until restart"
            );
            publisher.publish_diagnostic(Event::TransportStatus {
                connected: false,
                transport_id,
                timestamp: Utc::now(),
            });
            return;
        }

        TRANSPORT_RECONNECTS_TOTAL.inc();
        info!(
            %transport_id,
            attempt = attempts,
            max = settings.max_reconnect_attempts,
            delay_ms = settings.reconnect_delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::time::sleep(settings.reconnect_delay).await;
    }
}

/// Validate and decode one line, forwarding the result to the pipeline.
/// Returns false only when the pipeline channel is closed.
async fn forward_line(line: &str, tx: &mpsc::Sender<RawReading>) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    LINES_TOTAL.inc();

    if decode::detect(line).is_none() {
        DECODE_FAILURES_TOTAL.inc();
        warn!(raw = %line, "line matches no known shape, dropped");
        return true;
    }

    match decode::decode_line(line) {
        Ok(raw) => {
            debug!(device_id = %raw.device_id, "decoded line");
            if tx.send(raw).await.is_err() {
                error!("pipeline channel closed, stopping reader");
                return false;
            }
            true
        }
        Err(e) => {
            DECODE_FAILURES_TOTAL.inc();
            warn!(raw = %line, error = %e, "decode failed, input dropped");
            true
        }
    }
}
