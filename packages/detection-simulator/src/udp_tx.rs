//! UDP transmitter for `DetectionEnvelope`s — sends synthetic detections to
//! the controller's ingestion boundary.
//!
//! Errors are logged and never fatal (the simulator must keep running
//! independently of whether a controller is listening).

use detection_types::DetectionEnvelope;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub struct DetectionTransmitter {
    socket: UdpSocket,
    target_addr: String,
}

impl DetectionTransmitter {
    pub async fn new(target_addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
        })
    }

    pub async fn send(&self, envelope: &DetectionEnvelope) {
        let bytes = match serde_json::to_vec(envelope) {
            Ok(b) => b,
            Err(e) => {
                warn!("detection-sim: serialize failed: {e}");
                return;
            }
        };
        match self.socket.send_to(&bytes, &self.target_addr).await {
            Ok(_) => debug!(
                "detection-sim -> {} source={} seq={}",
                self.target_addr, envelope.source_id, envelope.seq
            ),
            Err(e) => warn!("detection-sim: send failed: {e}"),
        }
    }
}
