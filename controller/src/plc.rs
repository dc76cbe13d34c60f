//! PLC bridge (component B) — a Modbus/TCP client guarded by two locks:
//! one around the client's connection lifecycle, one around the I/O itself,
//! so a reconnect never re-enters a write in flight.
//!
//! Grounded on the source's `plc_bridge.py`: cumulative alert-level coils at
//! `output_coil_count + yolo_memory_start`, a heartbeat coil, lazy
//! reconnect-on-failure, and a hard timeout on every write.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context as ModbusContext};
use tokio_modbus::prelude::*;
use tracing::{error, info, warn};

use crate::config::PlcConfig;
use crate::domain::{AlertLevel, HEARTBEAT_MEMORY_INDEX};
use crate::error::{ControllerError, Result};

pub struct PlcBridge {
    config: PlcConfig,
    /// Guards connect/reconnect/disconnect of the underlying client.
    client_lock: Mutex<Option<ModbusContext>>,
    /// Guards the actual read/write frame exchange, independent of the
    /// client-lifecycle lock above, so a write-in-progress is never torn
    /// down by a concurrent reconnect.
    io_lock: Mutex<()>,
    current_level: Mutex<AlertLevel>,
}

impl PlcBridge {
    pub fn new(config: PlcConfig) -> Self {
        Self {
            config,
            client_lock: Mutex::new(None),
            io_lock: Mutex::new(()),
            current_level: Mutex::new(AlertLevel::Normal),
        }
    }

    /// Reachability pre-check: a raw TCP connect followed by a trivial coil
    /// read to confirm the peer actually speaks Modbus, not just TCP.
    pub async fn test_connection(&self, max_retries: u32, delay: Duration) -> bool {
        let addr: SocketAddr = match format!("{}:{}", self.config.host, self.config.port).parse() {
            Ok(a) => a,
            Err(e) => {
                error!("invalid PLC address {}:{}: {e}", self.config.host, self.config.port);
                return false;
            }
        };

        for attempt in 1..=max_retries {
            match tokio::time::timeout(Duration::from_secs(1), tokio::net::TcpStream::connect(addr)).await {
                Ok(Ok(_)) => match self.probe_modbus_liveness(addr).await {
                    true => return true,
                    false => warn!("PLC reachability check attempt {attempt}/{max_retries}: TCP connected but Modbus coil read failed"),
                },
                Ok(Err(e)) => warn!("PLC reachability check attempt {attempt}/{max_retries} failed: {e}"),
                Err(_) => warn!("PLC reachability check attempt {attempt}/{max_retries} timed out"),
            }
            tokio::time::sleep(delay).await;
        }
        false
    }

    /// Opens a short-lived Modbus context independent of `ensure_client`'s
    /// lazy-connect lifecycle and reads a single coil to confirm the peer
    /// actually speaks Modbus, not just TCP.
    async fn probe_modbus_liveness(&self, addr: SocketAddr) -> bool {
        let mut ctx = match tokio::time::timeout(Duration::from_secs(2), tcp::connect(addr)).await {
            Ok(Ok(ctx)) => ctx,
            _ => return false,
        };
        let base = self.config.base_address();
        matches!(
            tokio::time::timeout(Duration::from_secs(1), ctx.read_coils(base, 1)).await,
            Ok(Ok(Ok(_)))
        )
    }

    async fn ensure_client(&self) -> Result<()> {
        let mut guard = self.client_lock.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| ControllerError::Config {
                detail: format!("invalid PLC address: {e}"),
            })?;
        let ctx = tcp::connect(addr).await.map_err(|e| ControllerError::Network {
            detail: format!("modbus connect failed: {e}"),
        })?;
        info!("connected to PLC at {addr}");
        *guard = Some(ctx);
        Ok(())
    }

    /// Checks the client out from behind `client_lock`, performs the write
    /// under `io_lock` against the owned value (never against a reference
    /// held through the lifecycle lock), then checks it back in on success.
    /// A failure or timeout drops the checked-out client; the next call's
    /// `ensure_client` reconnects lazily.
    async fn write_coils(&self, addr: u16, values: &[bool]) -> Result<()> {
        let _io = self.io_lock.lock().await;
        self.ensure_client().await?;

        let mut ctx = {
            let mut guard = self.client_lock.lock().await;
            guard.take().ok_or_else(|| ControllerError::Network {
                detail: "PLC client not connected".into(),
            })?
        };

        let write = ctx.write_multiple_coils(addr, values);
        let outcome = tokio::time::timeout(Duration::from_millis(self.config.write_timeout_ms), write).await;

        match outcome {
            Ok(Ok(Ok(()))) => {
                *self.client_lock.lock().await = Some(ctx);
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(ControllerError::Network {
                detail: format!("modbus exception: {e}"),
            }),
            Ok(Err(e)) => Err(ControllerError::Network {
                detail: format!("modbus transport error: {e}"),
            }),
            Err(_) => Err(ControllerError::PlcWriteTimeout {
                elapsed_ms: self.config.write_timeout_ms,
            }),
        }
    }

    /// Write the cumulative alert-level coils. Only updates the cached
    /// `current_level` on success.
    pub async fn set_alert_level(&self, level: AlertLevel) -> Result<()> {
        let base = self.config.base_address();
        self.write_coils(base, &level.coils()).await?;
        *self.current_level.lock().await = level;
        Ok(())
    }

    pub async fn reset_yolo_flags(&self) -> Result<()> {
        self.set_alert_level(AlertLevel::Normal).await
    }

    pub async fn send_yolo_heartbeat(&self) -> Result<()> {
        let addr = self.config.output_coil_count + HEARTBEAT_MEMORY_INDEX;
        self.write_coils(addr, &[true]).await
    }

    pub async fn current_level(&self) -> AlertLevel {
        *self.current_level.lock().await
    }
}
