//! The AT-command session actor.
//!
//! Owns the serial port exclusively and serializes every AT exchange through
//! a single mpsc request channel, removing the nested-lock re-entrancy
//! hazard the source's per-call locking scheme had (SPEC_FULL.md §4.A).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

use crate::error::{ControllerError, Result};

struct AtRequest {
    command: String,
    expected: Vec<String>,
    timeout: Duration,
    reply: oneshot::Sender<Result<Vec<String>>>,
}

/// A cheaply-cloneable handle to the session actor.
#[derive(Clone)]
pub struct AtHandle {
    tx: mpsc::Sender<AtRequest>,
}

impl AtHandle {
    pub async fn send(&self, command: &str, expected: &[&str], timeout: Duration) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        let req = AtRequest {
            command: command.to_string(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
            timeout,
            reply,
        };
        self.tx.send(req).await.map_err(|_| ControllerError::ModuleOperation {
            command: command.to_string(),
            detail: "AT session actor is gone".to_string(),
        })?;
        rx.await.map_err(|_| ControllerError::ModuleOperation {
            command: command.to_string(),
            detail: "AT session actor dropped the reply".to_string(),
        })?
    }

    /// Convenience for the common case: expect a plain "OK".
    pub async fn send_ok(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        self.send(command, &["OK"], timeout).await
    }
}

/// Spawns the actor task and returns a handle to it. `port_path` is a
/// device path (e.g. `/dev/ttyUSB2`); failure to open it is returned so the
/// caller (the network manager) can degrade to offline mode instead of
/// aborting the process.
pub async fn spawn(port_path: &str, baud_rate: u32) -> Result<AtHandle> {
    let port = tokio_serial::new(port_path, baud_rate)
        .timeout(Duration::from_millis(200))
        .open_native_async()
        .map_err(|e| ControllerError::ModuleOperation {
            command: "open".to_string(),
            detail: format!("failed to open {port_path}: {e}"),
        })?;

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(run_actor(port, rx));
    Ok(AtHandle { tx })
}

async fn run_actor(port: tokio_serial::SerialStream, mut rx: mpsc::Receiver<AtRequest>) {
    let mut reader = BufReader::new(port);

    while let Some(req) = rx.recv().await {
        let result = exchange(&mut reader, &req).await;
        let _ = req.reply.send(result);
    }
    warn!("AT session actor exiting: request channel closed");
}

async fn exchange(
    reader: &mut BufReader<tokio_serial::SerialStream>,
    req: &AtRequest,
) -> Result<Vec<String>> {
    let line = format!("{}\r\n", req.command);
    reader
        .get_mut()
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ControllerError::ModuleOperation {
            command: req.command.clone(),
            detail: format!("write failed: {e}"),
        })?;

    let deadline = tokio::time::Instant::now() + req.timeout;
    let mut lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ControllerError::ModuleOperation {
                command: req.command.clone(),
                detail: format!("timed out waiting for {:?}", req.expected),
            });
        }

        let mut byte = [0u8; 1];
        match tokio::time::timeout(remaining, reader.read_exact(&mut byte)).await {
            Ok(Ok(_)) => {
                if byte[0] == b'\n' {
                    let line = String::from_utf8_lossy(&buf).trim().to_string();
                    buf.clear();
                    if line.is_empty() {
                        continue;
                    }
                    debug!(command = %req.command, %line, "AT response line");
                    if line.contains("ERROR") {
                        return Err(ControllerError::ModuleOperation {
                            command: req.command.clone(),
                            detail: format!("modem returned error: {line}"),
                        });
                    }
                    let matched = req.expected.iter().any(|e| line.contains(e.as_str()));
                    lines.push(line);
                    if matched {
                        return Ok(lines);
                    }
                } else {
                    buf.push(byte[0]);
                }
            }
            Ok(Err(e)) => {
                return Err(ControllerError::ModuleOperation {
                    command: req.command.clone(),
                    detail: format!("read failed: {e}"),
                });
            }
            Err(_) => {
                return Err(ControllerError::ModuleOperation {
                    command: req.command.clone(),
                    detail: format!("timed out waiting for {:?}", req.expected),
                });
            }
        }
    }
}
