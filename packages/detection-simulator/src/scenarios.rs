//! Scenario definitions — each scenario is a sequence of timed phases, each
//! phase naming the labels that should fire and at roughly what confidence,
//! so an integration run can exercise the analyzer's escalation and reset
//! paths without camera hardware.

use detection_types::LabelId;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseConfig {
    /// How long this phase runs, in seconds.
    pub duration_s: f64,
    /// Labels this phase emits each tick, with a base confidence and jitter.
    pub labels: Vec<LabelSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelSpec {
    pub label: LabelId,
    pub mean_confidence: f32,
    pub stddev: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub phases: Vec<PhaseConfig>,
}

impl ScenarioConfig {
    /// Total scenario length.
    pub fn total_duration_s(&self) -> f64 {
        self.phases.iter().map(|p| p.duration_s).sum()
    }

    /// The phase active at elapsed time `t`, looping back to the first
    /// phase once the scenario runs past its total duration.
    pub fn phase_at(&self, t: f64) -> &PhaseConfig {
        let t = t % self.total_duration_s().max(0.001);
        let mut acc = 0.0;
        for phase in &self.phases {
            acc += phase.duration_s;
            if t < acc {
                return phase;
            }
        }
        self.phases.last().expect("scenario has at least one phase")
    }
}

pub fn preset_normal() -> ScenarioConfig {
    ScenarioConfig {
        name: "normal".to_string(),
        phases: vec![PhaseConfig {
            duration_s: 3600.0,
            labels: vec![LabelSpec {
                label: LabelId::Focused,
                mean_confidence: 0.95,
                stddev: 0.03,
            }],
        }],
    }
}

pub fn preset_drowsy() -> ScenarioConfig {
    ScenarioConfig {
        name: "drowsy".to_string(),
        phases: vec![
            PhaseConfig {
                duration_s: 10.0,
                labels: vec![LabelSpec {
                    label: LabelId::Focused,
                    mean_confidence: 0.92,
                    stddev: 0.04,
                }],
            },
            PhaseConfig {
                duration_s: 8.0,
                labels: vec![LabelSpec {
                    label: LabelId::EyesClosed,
                    mean_confidence: 0.90,
                    stddev: 0.05,
                }],
            },
            PhaseConfig {
                duration_s: 15.0,
                labels: vec![LabelSpec {
                    label: LabelId::Focused,
                    mean_confidence: 0.95,
                    stddev: 0.03,
                }],
            },
        ],
    }
}

pub fn preset_distracted() -> ScenarioConfig {
    ScenarioConfig {
        name: "distracted".to_string(),
        phases: vec![
            PhaseConfig {
                duration_s: 6.0,
                labels: vec![LabelSpec {
                    label: LabelId::Focused,
                    mean_confidence: 0.93,
                    stddev: 0.04,
                }],
            },
            PhaseConfig {
                duration_s: 4.0,
                labels: vec![LabelSpec {
                    label: LabelId::HeadDown,
                    mean_confidence: 0.88,
                    stddev: 0.05,
                }],
            },
            PhaseConfig {
                duration_s: 4.0,
                labels: vec![LabelSpec {
                    label: LabelId::SeeingLeft,
                    mean_confidence: 0.86,
                    stddev: 0.06,
                }],
            },
        ],
    }
}

pub fn preset_emergency_composite() -> ScenarioConfig {
    ScenarioConfig {
        name: "emergency_composite".to_string(),
        phases: vec![
            PhaseConfig {
                duration_s: 3.0,
                labels: vec![LabelSpec {
                    label: LabelId::Focused,
                    mean_confidence: 0.9,
                    stddev: 0.03,
                }],
            },
            PhaseConfig {
                duration_s: 6.0,
                labels: vec![
                    LabelSpec {
                        label: LabelId::EyesClosed,
                        mean_confidence: 0.92,
                        stddev: 0.04,
                    },
                    LabelSpec {
                        label: LabelId::Yawning,
                        mean_confidence: 0.8,
                        stddev: 0.06,
                    },
                    LabelSpec {
                        label: LabelId::HeadDown,
                        mean_confidence: 0.85,
                        stddev: 0.05,
                    },
                ],
            },
        ],
    }
}

pub fn by_name(name: &str) -> Option<ScenarioConfig> {
    match name {
        "normal" => Some(preset_normal()),
        "drowsy" => Some(preset_drowsy()),
        "distracted" => Some(preset_distracted()),
        "emergency_composite" => Some(preset_emergency_composite()),
        _ => None,
    }
}
