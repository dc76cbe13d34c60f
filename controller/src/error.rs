//! Typed error taxonomy for the controller.
//!
//! Low layers (modem, PLC) return these directly; the network manager
//! classifies them into "degrade and enqueue" vs. "propagate"; the analyzer
//! never returns an error at all (see `analyzer::BehaviorAnalyzer::tick`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("modem module operation failed: {command} -> {detail}")]
    ModuleOperation { command: String, detail: String },

    #[error("network/PDP activation failed: {detail}")]
    Network { detail: String },

    #[error("GNSS fix unavailable after {attempts} attempts")]
    GnssFix { attempts: u32 },

    #[error("HTTP request failed (command={command}, raw_response={raw_response})")]
    HttpRequest { command: String, raw_response: String },

    #[error("failed to parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("PLC write timed out after {elapsed_ms}ms")]
    PlcWriteTimeout { elapsed_ms: u64 },

    #[error("configuration error: {detail}")]
    Config { detail: String },
}

pub type Result<T> = std::result::Result<T, ControllerError>;
