//! Network manager (component F) — token session lifecycle, telemetry
//! dispatch over the modem, and fan-in to the offline store on failure.
//!
//! Grounded on the source's `network_manager.py`, with the "busy flag"
//! replaced per SPEC_FULL.md §9: a non-blocking `try_lock` stands in for
//! `request_in_progress`, falling straight through to the offline queue on
//! contention instead of spinning or blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{AlertLevel, Event, GpsFix, LabelEventKind, OfflineItem, OfflineKind, TokenSession};
use crate::error::Result;
use crate::gps_fallback::GpsFallbackPolicy;
use crate::modem::{HttpMethod, ModemTransport};
use crate::offline_store::OfflineStore;

fn wall_now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

pub struct NetworkManager {
    config: Config,
    modem: Option<ModemTransport>,
    offline: Arc<OfflineStore>,
    gps: Mutex<GpsFallbackPolicy>,
    token: Mutex<TokenSession>,
    dispatch_lock: Mutex<()>,
    offline_mode: AtomicBool,
}

impl NetworkManager {
    /// Opening the modem is best-effort: failure switches to permanent
    /// offline mode rather than aborting the process (§4.F).
    pub async fn initialize(config: Config, offline: Arc<OfflineStore>) -> Self {
        let modem = match ModemTransport::open(&config.modem).await {
            Ok(m) => match m.initialize_module().await {
                Ok(()) => {
                    if let Err(e) = m.sync_time_with_ntp(&config.modem.ntp_server).await {
                        warn!("NTP sync failed, continuing without it: {e}");
                    }
                    if let Err(e) = m.gnss_start().await {
                        warn!("GNSS start failed, GPS reports will use fallback coordinates: {e}");
                    }
                    Some(m)
                }
                Err(e) => {
                    warn!("modem module init failed, switching to offline mode: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("modem unavailable, switching to offline mode: {e}");
                None
            }
        };

        let offline_mode = modem.is_none();
        let manager = Self {
            gps: Mutex::new(GpsFallbackPolicy::new(config.default_data.clone())),
            config,
            modem,
            offline,
            token: Mutex::new(TokenSession::default()),
            dispatch_lock: Mutex::new(()),
            offline_mode: AtomicBool::new(offline_mode),
        };

        if !offline_mode {
            manager.login().await.ok();
        }
        manager
    }

    pub fn is_offline(&self) -> bool {
        self.offline_mode.load(Ordering::Relaxed) || self.modem.is_none()
    }

    pub async fn login(&self) -> Result<()> {
        let modem = match &self.modem {
            Some(m) => m,
            None => return Ok(()),
        };
        let path = format!(
            "/auth/token?deviceId={}",
            percent_encode(&self.config.server.device_id)
        );
        let url = format!("{}{}", self.config.server.base_url, path);

        for attempt in 1..=3 {
            match modem
                .http_request(HttpMethod::Post, &url, None, Duration::from_secs(15))
                .await
            {
                Ok(outcome) if outcome.status == 200 => {
                    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(&outcome.body) {
                        let token = v["data"]["token"].as_str().map(|s| s.to_string());
                        let expires_in = v["data"]["expiresIn"].as_u64().unwrap_or(3600);
                        let mut guard = self.token.lock().await;
                        guard.token = token;
                        guard.expires_at = Some(Instant::now() + Duration::from_secs(expires_in));
                        info!("device login succeeded");
                        return Ok(());
                    }
                }
                Ok(outcome) => warn!("login attempt {attempt}/3 returned status {}", outcome.status),
                Err(e) => warn!("login attempt {attempt}/3 failed: {e}"),
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Err(crate::error::ControllerError::Network {
            detail: "device login failed after 3 attempts".to_string(),
        })
    }

    /// The single entry point for dispatching telemetry. Non-blocking on
    /// contention: a concurrent caller finds the lock held and enqueues
    /// immediately rather than waiting (the mailbox replacement for the
    /// source's busy flag).
    async fn api_call(&self, path: &str, body: serde_json::Value, kind: OfflineKind) {
        let guard = match self.dispatch_lock.try_lock() {
            Ok(g) => g,
            Err(_) => {
                self.enqueue(kind, body).await;
                return;
            }
        };

        if self.is_offline() {
            drop(guard);
            self.enqueue(kind, body).await;
            return;
        }

        if !self.token.lock().await.is_valid() {
            if self.login().await.is_err() {
                drop(guard);
                self.enqueue(kind, body).await;
                return;
            }
        }

        let modem = self.modem.as_ref().expect("checked is_offline above");
        let url = format!(
            "{}/data/report?device_id={}",
            self.config.server.base_url,
            percent_encode(&self.config.server.device_id)
        );
        let payload = serde_json::to_vec(&body).unwrap_or_default();

        match modem
            .http_request(HttpMethod::Post, &url, Some(&payload), Duration::from_secs(20))
            .await
        {
            Ok(outcome) if outcome.status == 200 => {}
            Ok(outcome) if outcome.status == 401 => {
                self.token.lock().await.token = None;
                drop(guard);
                self.enqueue(kind, body).await;
            }
            Ok(outcome) => {
                warn!("telemetry POST {path} returned status {}", outcome.status);
                drop(guard);
                self.enqueue(kind, body).await;
            }
            Err(e) => {
                warn!("telemetry POST {path} failed: {e}");
                drop(guard);
                self.enqueue(kind, body).await;
            }
        }
    }

    async fn enqueue(&self, kind: OfflineKind, payload: serde_json::Value) {
        self.offline
            .enqueue(OfflineItem {
                enqueue_time_ms: wall_now_ms(),
                kind,
                payload,
                retry_count: 0,
            })
            .await;
    }

    pub async fn report_event(&self, event: &Event, loc: Option<crate::domain::Location>) {
        let severity = event.level.severity(event.confidence * 100.0);
        let body = json!({
            "dataType": "event",
            "timestamp": wall_now_ms(),
            "data": {
                "eventId": format!("{}-{}", event.wall_time_ms, event.behavior.event_kind() as u8),
                "level": event.level.label(),
                "severity": severity,
                "score": event.progress_score,
                "behavior": event.behavior,
                "confidence": event.confidence,
                "duration": event.duration_s,
                "locationLat": loc.map(|l| l.lat),
                "locationLng": loc.map(|l| l.lng),
                "distractedCount": event.distracted_count,
            }
        });
        self.api_call("/data/report", body, OfflineKind::Event).await;
    }

    /// Reports a level transition that committed no event of its own — the
    /// safe-driving hard reset is the common case (§4.G).
    pub async fn report_level_change(
        &self,
        prev: AlertLevel,
        new: AlertLevel,
        progress_score: f32,
        distracted_count: u64,
    ) {
        let body = json!({
            "dataType": "level_change",
            "timestamp": wall_now_ms(),
            "data": {
                "previousLevel": prev.label(),
                "level": new.label(),
                "score": progress_score,
                "distractedCount": distracted_count,
            }
        });
        self.api_call("/data/report", body, OfflineKind::Event).await;
    }

    pub async fn report_gps(&self, fix: &GpsFix) {
        let body = json!({
            "dataType": "gps",
            "timestamp": wall_now_ms(),
            "data": {
                "locationLat": fix.loc.map(|l| l.lat),
                "locationLng": fix.loc.map(|l| l.lng),
                "speed": fix.speed_kmh,
                "direction": fix.heading_deg,
                "altitude": fix.altitude_m,
                "satellites": fix.satellites,
            }
        });
        self.api_call("/data/report", body, OfflineKind::Gps).await;
    }

    /// Samples GPS (real fix if the modem is present, else the fallback
    /// policy) and reports it. Intended to be driven by the scheduler.
    pub async fn sample_and_report_gps(&self) {
        let fix = match &self.modem {
            Some(m) => match m.get_gnss_location(3, Duration::from_secs(2)).await {
                Ok(gnss) => {
                    let mut gps = self.gps.lock().await;
                    let mut fix = gps.on_success(gnss.location);
                    fix.speed_kmh = Some(gnss.speed_kmh);
                    fix.altitude_m = Some(gnss.altitude_m);
                    fix.satellites = Some(gnss.satellites_in_use);
                    fix.heading_deg = gnss.course_deg;
                    fix
                }
                Err(_) => self.gps.lock().await.on_failure(),
            },
            None => self.gps.lock().await.on_failure(),
        };
        self.report_gps(&fix).await;
    }

    /// One offline-retry cycle: pop the front item, dispatch it, and on
    /// failure increment its retry counter and stop — matching the
    /// source's "abort the cycle on failure" policy (§4.D).
    pub async fn retry_offline_once(&self) {
        if self.is_offline() {
            return;
        }
        let Some(item) = self.offline.peek_front().await else {
            return;
        };

        let modem = match &self.modem {
            Some(m) => m,
            None => return,
        };
        let url = format!(
            "{}/data/report?device_id={}",
            self.config.server.base_url,
            percent_encode(&self.config.server.device_id)
        );
        let payload = serde_json::to_vec(&item.payload).unwrap_or_default();

        match modem
            .http_request(HttpMethod::Post, &url, Some(&payload), Duration::from_secs(20))
            .await
        {
            Ok(outcome) if outcome.status == 200 => {
                self.offline.ack_front().await;
            }
            _ => {
                self.offline.fail_front().await;
            }
        }
    }
}
