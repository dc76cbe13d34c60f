//! Scheduler/clock (component C) — periodic jobs driven off `tokio::time`
//! intervals, each observing a shared stop flag so shutdown reacts within
//! about a second (§5).
//!
//! Grounded on the source's `schedule`-library-driven scheduler thread
//! (`_scheduled_heartbeat`, `_scheduled_gps_update`, `_scheduled_retry_offline`),
//! translated to independent `tokio::spawn` loops sharing one `watch<bool>`
//! stop signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::network::NetworkManager;
use crate::plc::PlcBridge;

pub type StopSignal = watch::Receiver<bool>;

pub fn stop_channel() -> (watch::Sender<bool>, StopSignal) {
    watch::channel(false)
}

async fn stopped(stop: &mut StopSignal) -> bool {
    *stop.borrow()
}

pub async fn run_heartbeat(plc: Arc<PlcBridge>, interval_s: u64, mut stop: StopSignal) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_s));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stopped(&mut stop).await { break; }
                if let Err(e) = plc.send_yolo_heartbeat().await {
                    tracing::warn!("PLC heartbeat write failed: {e}");
                }
            }
            _ = stop.changed() => { if *stop.borrow() { break; } }
        }
    }
    info!("heartbeat task stopped");
}

pub async fn run_gps_job(network: Arc<NetworkManager>, interval_s: u64, mut stop: StopSignal) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_s));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stopped(&mut stop).await { break; }
                network.sample_and_report_gps().await;
            }
            _ = stop.changed() => { if *stop.borrow() { break; } }
        }
    }
    info!("GPS sampling task stopped");
}

pub async fn run_offline_retry_job(network: Arc<NetworkManager>, interval_s: u64, mut stop: StopSignal) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_s));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stopped(&mut stop).await { break; }
                network.retry_offline_once().await;
            }
            _ = stop.changed() => { if *stop.borrow() { break; } }
        }
    }
    info!("offline retry task stopped");
}
