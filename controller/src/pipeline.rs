//! Pipeline orchestrator (component H).
//!
//! Receives classifier output batches from the detection ingestion
//! boundary, drives the behavior analyzer, and on a level-transition edge
//! drives the PLC bridge and the network manager — invariant #7: at most
//! one alert action per transition edge.
//!
//! Grounded on the teacher's `run_engine_tick` shape (interval loop,
//! match-on-result, snapshot write then emit), generalized from a
//! fixed-interval graph walk to an event-driven tick fired by detection
//! arrival.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analyzer::BehaviorAnalyzer;
use crate::detection_hub::DetectionBatch;
use crate::domain::AnalyzerSnapshot;
use crate::network::NetworkManager;
use crate::plc::PlcBridge;
use crate::scheduler::StopSignal;
use crate::ui::SharedSnapshot;

/// Window over which the recent tick rate is averaged for the UI's `fps`
/// field — wide enough to smooth out bursty detection arrival.
const FPS_WINDOW_S: f64 = 2.0;

pub struct Pipeline {
    analyzer: BehaviorAnalyzer,
    plc: Arc<PlcBridge>,
    network: Arc<NetworkManager>,
    snapshot: SharedSnapshot,
    started_at: Instant,
    tick_times: VecDeque<f64>,
}

impl Pipeline {
    pub fn new(
        analyzer: BehaviorAnalyzer,
        plc: Arc<PlcBridge>,
        network: Arc<NetworkManager>,
        snapshot: SharedSnapshot,
    ) -> Self {
        Self {
            analyzer,
            plc,
            network,
            snapshot,
            started_at: Instant::now(),
            tick_times: VecDeque::new(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<DetectionBatch>, mut stop: StopSignal) {
        loop {
            tokio::select! {
                batch = rx.recv() => {
                    match batch {
                        Some(batch) => self.on_batch(&batch.detections).await,
                        None => {
                            warn!("pipeline: detection channel closed, stopping");
                            break;
                        }
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() { break; }
                }
            }
        }
        info!("pipeline stopped");
    }

    async fn on_batch(&mut self, detections: &[crate::domain::Detection]) {
        let t = self.started_at.elapsed().as_secs_f64();
        let outcome = self.analyzer.tick(t, detections);

        if outcome.level_changed {
            if let Err(e) = self.plc.set_alert_level(outcome.new_level).await {
                warn!("PLC alert-level write failed: {e}");
            }

            if outcome.committed.is_empty() {
                self.network
                    .report_level_change(
                        outcome.prev_level,
                        outcome.new_level,
                        self.analyzer.progress_score(),
                        self.analyzer.distracted_count(),
                    )
                    .await;
            }
        }

        for event in &outcome.committed {
            self.network.report_event(event, None).await;
        }

        let fps = self.tick_fps(t);
        let snapshot = AnalyzerSnapshot {
            progress_score: self.analyzer.progress_score(),
            level: self.analyzer.current_level(),
            distracted_count: self.analyzer.distracted_count(),
            events_tail: self.analyzer.events_tail(20),
            detections: detections.to_vec(),
            fps,
        };
        *self.snapshot.write().await = snapshot;
    }

    /// Rolling tick rate over `FPS_WINDOW_S`, used for the UI's `fps` field.
    fn tick_fps(&mut self, t: f64) -> f32 {
        self.tick_times.push_back(t);
        while let Some(&front) = self.tick_times.front() {
            if t - front > FPS_WINDOW_S {
                self.tick_times.pop_front();
            } else {
                break;
            }
        }
        if self.tick_times.len() < 2 {
            return 0.0;
        }
        let span = t - self.tick_times.front().copied().unwrap_or(t);
        (self.tick_times.len() as f64 / span.max(1e-6)) as f32
    }
}
