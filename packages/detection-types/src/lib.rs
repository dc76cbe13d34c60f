//! # detection-types
//!
//! Shared wire types for the detection ingestion boundary.
//!
//! These types are used by:
//! - `fatigue-controller`: receiving and parsing `DetectionEnvelope`s from a
//!   classifier process over UDP
//! - `detection-simulator`: producing synthetic `DetectionEnvelope`s for
//!   integration testing without real camera hardware
//!
//! Kept as its own crate (rather than inline in the controller) so a future
//! on-device classifier process can depend on it without pulling in the
//! controller's Modbus/serial/network stack.

use serde::{Deserialize, Serialize};

/// One driver-state label the classifier can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelId {
    Focused,
    EyesClosed,
    Yawning,
    EyesClosedHeadLeft,
    EyesClosedHeadRight,
    HeadUp,
    HeadDown,
    SeeingLeft,
    SeeingRight,
}

impl LabelId {
    pub fn is_fatigue(self) -> bool {
        matches!(
            self,
            LabelId::EyesClosed
                | LabelId::Yawning
                | LabelId::EyesClosedHeadLeft
                | LabelId::EyesClosedHeadRight
                | LabelId::HeadUp
        )
    }

    pub fn is_distraction(self) -> bool {
        matches!(self, LabelId::HeadDown | LabelId::SeeingLeft | LabelId::SeeingRight)
    }
}

/// A single classifier output for one frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Detection {
    pub label: LabelId,
    pub confidence: f32,
}

/// Wire envelope sent by a classifier (or the simulator) to the ingestion
/// boundary over UDP, one per processed frame. `seq` is per-`source_id` and
/// monotonically increasing; the receiver uses it to reject replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEnvelope {
    pub source_id: u32,
    pub seq: u32,
    pub detections: Vec<Detection>,
    pub frame_ts_ms: u64,
}
