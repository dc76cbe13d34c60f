//! Detection ingestion boundary (§2.1) — a UDP listener that receives
//! per-frame detection batches (from a real classifier process or the
//! externalized synthetic-detection driver) and forwards them to the
//! pipeline orchestrator over an in-process channel.
//!
//! Grounded directly on the teacher's `uwb_hub.rs`: bind-or-warn (never
//! fatal), per-source sequence tracking to reject replays/duplicates, and a
//! bounded `mpsc` hand-off to the consumer task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use detection_types::{Detection, DetectionEnvelope};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DetectionHubConfig;

pub struct DetectionBatch {
    pub detections: Vec<Detection>,
}

struct SeqTracker {
    last_seq: HashMap<u32, u32>,
}

impl SeqTracker {
    fn new() -> Self {
        Self { last_seq: HashMap::new() }
    }

    fn accept(&mut self, source_id: u32, seq: u32) -> bool {
        let last = self.last_seq.entry(source_id).or_insert(0);
        let diff = seq.wrapping_sub(*last);
        if diff == 0 || diff > 1_000_000 {
            warn!("detection hub: rejected packet from source {source_id}: seq {seq} (last {last})");
            return false;
        }
        *last = seq;
        true
    }
}

pub async fn run(config: DetectionHubConfig, tx: mpsc::Sender<DetectionBatch>) {
    let addr = format!("0.0.0.0:{}", config.udp_port);
    let socket = match UdpSocket::bind(&addr).await {
        Ok(s) => {
            info!("detection hub listening on UDP {addr}");
            Arc::new(s)
        }
        Err(e) => {
            warn!("detection hub: could not bind UDP {addr}: {e} (pipeline will receive no input)");
            return;
        }
    };

    let mut seq_tracker = SeqTracker::new();
    let mut buf = vec![0u8; 8192];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                process_packet(&buf[..len], src, &mut seq_tracker, &tx).await;
            }
            Err(e) => {
                warn!("detection hub: UDP recv error: {e}");
            }
        }
    }
}

async fn process_packet(
    data: &[u8],
    src: SocketAddr,
    seq_tracker: &mut SeqTracker,
    tx: &mpsc::Sender<DetectionBatch>,
) {
    let env: DetectionEnvelope = match serde_json::from_slice(data) {
        Ok(e) => e,
        Err(e) => {
            debug!("detection hub: malformed packet from {src}: {e}");
            return;
        }
    };

    if !seq_tracker.accept(env.source_id, env.seq) {
        return;
    }

    let _ = tx
        .try_send(DetectionBatch {
            detections: env.detections,
        })
        .map_err(|e| debug!("detection hub: pipeline channel full, dropping batch: {e}"));
}
