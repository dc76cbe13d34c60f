//! Shared domain types: detections, labels, events, alert levels, and the
//! small value types exchanged between the PLC bridge, network manager, and
//! behavior analyzer.

use serde::{Deserialize, Serialize};

pub use detection_types::{Detection, LabelId};

// ─── Labels ───────────────────────────────────────────────────────────────────

pub trait LabelEventKind {
    fn event_kind(self) -> EventKind;
}

impl LabelEventKind for LabelId {
    fn event_kind(self) -> EventKind {
        if self.is_fatigue() {
            EventKind::Fatigue
        } else if self.is_distraction() {
            EventKind::Distracted
        } else {
            EventKind::Emergency
        }
    }
}

// ─── Alert level ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    #[default]
    Normal,
    L1,
    L2,
    L3,
}

impl AlertLevel {
    /// Level is a pure function of score — invariant #2.
    pub fn from_score(score: f32) -> Self {
        if score >= 95.0 {
            AlertLevel::L3
        } else if score >= 80.0 {
            AlertLevel::L2
        } else if score >= 60.0 {
            AlertLevel::L1
        } else {
            AlertLevel::Normal
        }
    }

    /// Cumulative coil encoding: L0=000, L1=100, L2=110, L3=111.
    pub fn coils(self) -> [bool; 3] {
        match self {
            AlertLevel::Normal => [false, false, false],
            AlertLevel::L1 => [true, false, false],
            AlertLevel::L2 => [true, true, false],
            AlertLevel::L3 => [true, true, true],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AlertLevel::Normal => "Normal",
            AlertLevel::L1 => "Level 1",
            AlertLevel::L2 => "Level 2",
            AlertLevel::L3 => "Level 3",
        }
    }

    pub fn severity(self, score: f32) -> Option<&'static str> {
        if score >= 85.0 {
            Some("CRITICAL")
        } else if score >= 70.0 {
            Some("HIGH")
        } else if score >= 60.0 {
            Some("MEDIUM")
        } else if score >= 10.0 {
            Some("LOW")
        } else {
            None
        }
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Fatigue,
    Distracted,
    Emergency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub wall_time_ms: u64,
    #[serde(skip)]
    pub start_time_s: f64,
    pub behavior: LabelId,
    pub duration_s: f64,
    pub count: u32,
    pub confidence: f32,
    pub kind: EventKind,
    pub level: AlertLevel,
    /// Analyzer's 0-100 progress score at commit time, distinct from
    /// `confidence` (the detector's own 0-1 confidence for this behavior).
    pub progress_score: f32,
    /// `distracted_count` as of this event's commit.
    pub distracted_count: u64,
}

// ─── PLC coil model ───────────────────────────────────────────────────────────

pub const HEARTBEAT_MEMORY_INDEX: u16 = 39;
pub const ALERT_MEMORY_INDEX: u16 = 40;

// ─── Modem session ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ModemSessionInfo {
    pub gnss_on: bool,
    pub time_offset_s: i64,
}

// ─── Token session ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TokenSession {
    pub token: Option<String>,
    pub expires_at: Option<std::time::Instant>,
}

impl Default for TokenSession {
    fn default() -> Self {
        Self {
            token: None,
            expires_at: None,
        }
    }
}

impl TokenSession {
    pub fn is_valid(&self) -> bool {
        match (&self.token, self.expires_at) {
            (Some(_), Some(exp)) => std::time::Instant::now() < exp,
            _ => false,
        }
    }
}

// ─── Offline item ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineKind {
    Event,
    Gps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineItem {
    pub enqueue_time_ms: u64,
    pub kind: OfflineKind,
    pub payload: serde_json::Value,
    pub retry_count: u32,
}

// ─── Analyzer snapshot (what the pipeline/UI observe) ────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerSnapshot {
    pub progress_score: f32,
    pub level: AlertLevel,
    pub distracted_count: u64,
    pub events_tail: Vec<Event>,
    pub detections: Vec<Detection>,
    pub fps: f32,
}

// ─── GPS fix ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub loc: Option<Location>,
    pub realtime: bool,
    pub reason: Option<String>,
    pub speed_kmh: Option<f32>,
    pub altitude_m: Option<f32>,
    pub satellites: Option<u32>,
    /// Heading in degrees from true north, when the fix source reports one.
    pub heading_deg: Option<f32>,
}
