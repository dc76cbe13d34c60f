mod analyzer;
mod config;
mod detection_hub;
mod domain;
mod error;
mod gps_fallback;
mod modem;
mod network;
mod offline_store;
mod pipeline;
mod plc;
mod scheduler;
mod ui;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use socketioxide::extract::SocketRef;
use socketioxide::SocketIo;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use analyzer::BehaviorAnalyzer;
use config::Config;
use network::NetworkManager;
use offline_store::OfflineStore;
use pipeline::Pipeline;
use plc::PlcBridge;

static STARTUP_MS: AtomicU64 = AtomicU64::new(0);

async fn health_check() -> axum::Json<serde_json::Value> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let startup = STARTUP_MS.load(Ordering::Relaxed);
    let uptime_secs = if startup > 0 { (now_ms - startup) / 1000 } else { 0 };
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs,
    }))
}

#[tokio::main]
async fn main() {
    let startup_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    STARTUP_MS.store(startup_ms, Ordering::Relaxed);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fatigue_controller=info,socketioxide=warn".into()),
        )
        .init();

    info!(
        "Fatigue Controller (Rust) v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load().await;

    let offline = Arc::new(OfflineStore::open(config.offline.clone()).await);
    let network = Arc::new(NetworkManager::initialize(config.clone(), offline.clone()).await);

    let plc = Arc::new(PlcBridge::new(config.plc.clone()));
    if !plc.test_connection(5, Duration::from_secs(2)).await {
        warn!("PLC not reachable at startup, will reconnect lazily on first write");
    }
    if let Err(e) = plc.reset_yolo_flags().await {
        warn!("failed to reset PLC alert coils at startup: {e}");
    }

    let analyzer = BehaviorAnalyzer::new(config.clone());
    let snapshot = Arc::new(RwLock::new(domain::AnalyzerSnapshot::default()));

    let (stop_tx, stop_rx) = scheduler::stop_channel();
    let (det_tx, det_rx) = mpsc::channel(256);

    tokio::spawn(detection_hub::run(config.detection_hub.clone(), det_tx));

    let pipeline = Pipeline::new(analyzer, plc.clone(), network.clone(), snapshot.clone());
    tokio::spawn(pipeline.run(det_rx, stop_rx.clone()));

    tokio::spawn(scheduler::run_heartbeat(
        plc.clone(),
        config.timing.heartbeat_interval_s,
        stop_rx.clone(),
    ));
    tokio::spawn(scheduler::run_gps_job(
        network.clone(),
        config.timing.gps_interval_s,
        stop_rx.clone(),
    ));
    tokio::spawn(scheduler::run_offline_retry_job(
        network.clone(),
        config.timing.retry_interval_s,
        stop_rx.clone(),
    ));

    let (socket_layer, io) = SocketIo::builder().build_layer();

    let snapshot_sock = snapshot.clone();
    io.ns("/", move |socket: SocketRef| {
        let snapshot = snapshot_sock.clone();
        async move {
            info!(socket_id = %socket.id, "UI client connected");
            let snap = snapshot.read().await.clone();
            let _ = socket.emit("analyzer-snapshot", &json!(snap));
        }
    });

    tokio::spawn(ui::run_publisher(snapshot.clone(), io.clone(), 2));

    let cors_origins_env =
        std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

    let cors = if cors_origins_env.trim() == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins_env
            .split(',')
            .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .layer(socket_layer)
        .layer(cors);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("0.0.0.0:{port}");
    info!("listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return;
        }
    };

    tokio::select! {
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping background tasks");
            let _ = stop_tx.send(true);
        }
    }
}
