//! UI snapshot publisher — emits `{score, level, distractedCount, events}`
//! to the UI collaborator over Socket.IO at a decoupled, low cadence.
//!
//! Grounded on the teacher's `main.rs` `io.emit("sequence-update", ...)`
//! pattern and `auto_director.rs`'s independently-paced broadcast loop; the
//! UI client itself is out of scope (§1) — only this outbound contract is.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use socketioxide::SocketIo;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::AnalyzerSnapshot;

pub type SharedSnapshot = Arc<RwLock<AnalyzerSnapshot>>;

/// Publishes the latest snapshot at `hz` regardless of how often the
/// pipeline actually ticks — dropping a snapshot under load is acceptable
/// (§5: "UI sink ... best-effort fire-and-forget").
pub async fn run_publisher(snapshot: SharedSnapshot, io: SocketIo, hz: u32) {
    let mut ticker = tokio::time::interval(Duration::from_millis(1000 / hz.max(1) as u64));
    loop {
        ticker.tick().await;
        let snap = snapshot.read().await.clone();
        if io.emit("analyzer-snapshot", &json!(snap)).is_err() {
            debug!("UI snapshot emit failed (no connected clients?)");
        }
    }
}
