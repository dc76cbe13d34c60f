//! main.rs — synthetic driver-behavior detection generator
//!
//! Drives the fatigue controller's detection ingestion boundary (UDP JSON
//! envelopes) without camera hardware, so the rest of the pipeline — the
//! behavior analyzer, PLC bridge, network manager — can be exercised in
//! integration tests and manual runs alike.
//!
//! Runs one loop: at `fps`, sample the active scenario phase into a
//! `DetectionEnvelope` and send it to the controller's UDP listener.

mod generator;
mod scenarios;
mod udp_tx;

use std::time::{Duration, Instant};

use clap::Parser;
use detection_types::DetectionEnvelope;
use rand::SeedableRng;
use tracing::info;

use scenarios::ScenarioConfig;
use udp_tx::DetectionTransmitter;

#[derive(Parser, Debug)]
#[command(name = "detection-sim", about = "Synthetic driver-behavior detection generator")]
struct Args {
    /// Controller's detection ingestion UDP address.
    #[arg(long, default_value = "127.0.0.1:6767")]
    hub_addr: String,
    /// Optional TOML file describing a custom scenario; overrides --scenario.
    #[arg(long)]
    scenario_file: Option<String>,
    /// Built-in scenario preset: normal, drowsy, distracted, emergency_composite.
    #[arg(long, default_value = "drowsy")]
    scenario: String,
    /// Detection rate in frames per second.
    #[arg(long, default_value = "4.0")]
    fps: f64,
    /// Synthetic source/camera ID.
    #[arg(long, default_value = "1")]
    source_id: u32,
    /// Simulation speed multiplier (1.0 = real-time phase durations).
    #[arg(long, default_value = "1.0")]
    speed: f64,
}

fn load_scenario(args: &Args) -> ScenarioConfig {
    if let Some(path) = &args.scenario_file {
        let raw = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read scenario file {path}: {e}"));
        return toml::from_str(&raw).unwrap_or_else(|e| panic!("invalid scenario file {path}: {e}"));
    }
    scenarios::by_name(&args.scenario).unwrap_or_else(|| {
        tracing::warn!("unknown scenario '{}', falling back to 'drowsy'", args.scenario);
        scenarios::preset_drowsy()
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "detection_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let scenario = load_scenario(&args);
    info!(
        "detection-sim starting — scenario='{}' fps={} -> {}",
        scenario.name, args.fps, args.hub_addr
    );

    let tx = DetectionTransmitter::new(&args.hub_addr)
        .await
        .expect("failed to bind UDP socket");

    let mut rng = rand::rngs::StdRng::from_entropy();
    let period = Duration::from_secs_f64(1.0 / args.fps.max(0.1));
    let mut ticker = tokio::time::interval(period);
    let started_at = Instant::now();
    let mut seq: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let t = started_at.elapsed().as_secs_f64() * args.speed;
                let phase = scenario.phase_at(t);
                let detections = generator::sample_detections(phase, &mut rng);

                seq = seq.wrapping_add(1);
                let envelope = DetectionEnvelope {
                    source_id: args.source_id,
                    seq,
                    detections,
                    frame_ts_ms: (t * 1000.0) as u64,
                };
                tx.send(&envelope).await;

                if seq % (args.fps.max(1.0) as u32 * 5).max(1) == 0 {
                    info!("sent {seq} detection batches (t={t:.1}s)");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("detection-sim shutting down");
                break;
            }
        }
    }
}
