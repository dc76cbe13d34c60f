//! Immutable configuration value.
//!
//! Built once at startup: built-in defaults, overlaid with a JSON config
//! file (missing file -> defaults, written out once), overlaid with a small
//! set of recognized environment variables. Never mutated in place after
//! construction — a live reconfigure is a distinct, explicit operation that
//! would swap an `Arc<Config>`, not one this controller currently exposes.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::LabelId;
use crate::error::{ControllerError, Result};

const CONFIG_FILE: &str = "config.json";

// ─── Analyzer thresholds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    pub min_confidence: f32,
    pub fatigue_min_confidence: f32,
    pub focused_min_confidence: f32,
    pub duration_threshold_s: f64,
    pub fatigue_duration_threshold_s: f64,
    pub min_detections_for_duration: u32,
    pub window_size_s: f64,
    pub count_threshold: u32,
    pub score_threshold: f32,
    pub progress_increment: f32,
    pub progress_decrement_focused: f32,
    pub progress_decrement_normal: f32,
    pub safe_driving_confirm_time_s: f64,
    pub level_reset_threshold_s: f64,
    pub multi_event_cooldown_s: f64,
    pub level3_cooldown_s: f64,
    pub continuous_distracted_window_s: f64,
    pub continuous_distracted_count: u32,
    pub event_merge_window_s: f64,
    pub max_events: usize,
    pub max_tracker_len: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.80,
            fatigue_min_confidence: 0.85,
            focused_min_confidence: 0.72,
            duration_threshold_s: 1.5,
            fatigue_duration_threshold_s: 2.0,
            min_detections_for_duration: 2,
            window_size_s: 30.0,
            count_threshold: 3,
            score_threshold: 0.8,
            progress_increment: 3.0,
            progress_decrement_focused: 5.0,
            progress_decrement_normal: 0.5,
            safe_driving_confirm_time_s: 3.0,
            level_reset_threshold_s: 10.0,
            multi_event_cooldown_s: 10.0,
            level3_cooldown_s: 5.0,
            continuous_distracted_window_s: 90.0,
            continuous_distracted_count: 7,
            event_merge_window_s: 5.0,
            max_events: 200,
            max_tracker_len: 100,
        }
    }
}

// ─── Modem / serial ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub apn: String,
    pub ntp_server: String,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB2".to_string(),
            baud_rate: 115_200,
            apn: "cmnet".to_string(),
            ntp_server: "ntp.aliyun.com".to_string(),
        }
    }
}

// ─── Remote server / device identity ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub base_url: String,
    pub device_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://telemetry.example.com".to_string(),
            device_id: "device-0001".to_string(),
        }
    }
}

// ─── Timing block ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    pub heartbeat_interval_s: u64,
    pub gps_interval_s: u64,
    pub event_cooldown_s: u64,
    pub data_report_cooldown_s: u64,
    pub retry_interval_s: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: 10,
            gps_interval_s: 20,
            event_cooldown_s: 5,
            data_report_cooldown_s: 30,
            retry_interval_s: 30,
        }
    }
}

// ─── PLC ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub output_coil_count: u16,
    pub yolo_memory_start: u16,
    pub write_timeout_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            output_coil_count: 6,
            yolo_memory_start: 40,
            write_timeout_ms: 2_000,
        }
    }
}

impl PlcConfig {
    /// Base address for the YOLO memory-bit block (heartbeat + alert coils).
    pub fn base_address(&self) -> u16 {
        self.output_coil_count + self.yolo_memory_start
    }
}

// ─── GPS fallback defaults ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultDataConfig {
    pub fallback_lat: f64,
    pub fallback_lng: f64,
    pub max_gps_failures: u32,
}

impl Default for DefaultDataConfig {
    fn default() -> Self {
        Self {
            fallback_lat: 31.2304,
            fallback_lng: 121.4737,
            max_gps_failures: 5,
        }
    }
}

// ─── Offline store ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineConfig {
    pub queue_file: String,
    pub key_file: String,
    pub max_retries: u32,
    pub max_queue_len: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            queue_file: "offline_queue.bin".to_string(),
            key_file: "offline_queue.key".to_string(),
            max_retries: 3,
            max_queue_len: 10_000,
        }
    }
}

// ─── Detection ingestion boundary ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionHubConfig {
    pub udp_port: u16,
}

impl Default for DetectionHubConfig {
    fn default() -> Self {
        Self { udp_port: 6767 }
    }
}

// ─── Top-level config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_weights")]
    pub weights: HashMap<LabelId, f32>,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub plc: PlcConfig,
    #[serde(default)]
    pub default_data: DefaultDataConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub detection_hub: DetectionHubConfig,
}

fn default_weights() -> HashMap<LabelId, f32> {
    use LabelId::*;
    HashMap::from([
        (Focused, 0.0),
        (EyesClosed, 0.35),
        (Yawning, 0.20),
        (EyesClosedHeadLeft, 0.30),
        (EyesClosedHeadRight, 0.30),
        (HeadUp, 0.15),
        (HeadDown, 0.25),
        (SeeingLeft, 0.20),
        (SeeingRight, 0.20),
    ])
}

impl Config {
    /// Load from `config.json`, falling back to built-in defaults when the
    /// file is missing or unparseable. Never aborts startup.
    pub async fn load() -> Self {
        let mut cfg = if !Path::new(CONFIG_FILE).exists() {
            info!("no {CONFIG_FILE} found, using built-in defaults");
            let cfg = Config::with_defaults();
            if let Err(e) = cfg.write_out().await {
                warn!("failed to write default config file: {e}");
            }
            cfg
        } else {
            match tokio::fs::read_to_string(CONFIG_FILE).await {
                Ok(data) => match serde_json::from_str::<Config>(&data) {
                    Ok(cfg) => {
                        info!("loaded configuration from {CONFIG_FILE}");
                        cfg
                    }
                    Err(e) => {
                        warn!("failed to parse {CONFIG_FILE}: {e}, using defaults");
                        Config::with_defaults()
                    }
                },
                Err(e) => {
                    warn!("failed to read {CONFIG_FILE}: {e}, using defaults");
                    Config::with_defaults()
                }
            }
        };

        if let Ok(port) = std::env::var("PLC_MODBUS_PORT") {
            match port.parse() {
                Ok(p) => cfg.plc.port = p,
                Err(e) => warn!("ignoring invalid PLC_MODBUS_PORT={port}: {e}"),
            }
        }

        cfg
    }

    #[cfg(test)]
    pub fn default_for_tests() -> Self {
        Self::with_defaults()
    }

    fn with_defaults() -> Self {
        Self {
            weights: default_weights(),
            analyzer: AnalyzerConfig::default(),
            modem: ModemConfig::default(),
            server: ServerConfig::default(),
            timing: TimingConfig::default(),
            plc: PlcConfig::default(),
            default_data: DefaultDataConfig::default(),
            offline: OfflineConfig::default(),
            detection_hub: DetectionHubConfig::default(),
        }
    }

    async fn write_out(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ControllerError::Config {
            detail: e.to_string(),
        })?;
        tokio::fs::write(CONFIG_FILE, json)
            .await
            .map_err(|e| ControllerError::Config {
                detail: e.to_string(),
            })
    }

    pub fn weight(&self, label: LabelId) -> f32 {
        self.weights.get(&label).copied().unwrap_or(0.0)
    }
}
