//! The behavior analyzer — the core algorithm (component G).
//!
//! Pure over its own state: no I/O, no locking, called synchronously from
//! the pipeline orchestrator once per classifier output batch. Modeled on
//! the tick-loop shape of a fixed-interval sequencer, generalized from a
//! graph-walk to a sliding-window score accumulator.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::config::Config;
use crate::domain::{AlertLevel, Detection, Event, EventKind, LabelEventKind, LabelId};

fn wall_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Bounded ring of recent `(time, confidence)` hits for one label.
#[derive(Debug, Default)]
struct Tracker {
    hits: VecDeque<(f64, f32)>,
    last_single_alert_time: f64,
}

impl Tracker {
    fn push(&mut self, t: f64, confidence: f32, cap: usize) {
        self.hits.push_back((t, confidence));
        while self.hits.len() > cap {
            self.hits.pop_front();
        }
    }

    fn prune(&mut self, t: f64, window_s: f64) {
        while let Some(&(ts, _)) = self.hits.front() {
            if t - ts > window_s {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_since(&self, t: f64, since_s: f64) -> usize {
        self.hits.iter().filter(|&&(ts, _)| t - ts <= since_s).count()
    }

    fn mean_confidence(&self) -> f32 {
        if self.hits.is_empty() {
            return 0.0;
        }
        self.hits.iter().map(|&(_, c)| c).sum::<f32>() / self.hits.len() as f32
    }
}

/// Outcome of one tick, used by the pipeline orchestrator to decide whether
/// to drive the PLC bridge and the network manager (invariant #7: at most
/// one alert action per transition edge).
pub struct TickOutcome {
    pub prev_level: AlertLevel,
    pub new_level: AlertLevel,
    pub level_changed: bool,
    pub committed: Vec<Event>,
}

pub struct BehaviorAnalyzer {
    config: Config,
    trackers: HashMap<LabelId, Tracker>,
    /// Time-ordered log of every tracker-affecting detection, used to
    /// compute the behavior-switch metric without depending on hash-map
    /// iteration order (resolves the open question in SPEC_FULL.md §4.G).
    switch_log: VecDeque<(f64, LabelId)>,
    progress_score: f32,
    current_level: AlertLevel,
    last_safe_time: Option<f64>,
    last_multi_event_time: f64,
    last_level3_time: f64,
    distracted_timestamps: VecDeque<f64>,
    distracted_count: u64,
    events: VecDeque<Event>,
}

impl BehaviorAnalyzer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            trackers: HashMap::new(),
            switch_log: VecDeque::new(),
            progress_score: 0.0,
            current_level: AlertLevel::Normal,
            last_safe_time: None,
            last_multi_event_time: f64::NEG_INFINITY,
            last_level3_time: f64::NEG_INFINITY,
            distracted_timestamps: VecDeque::new(),
            distracted_count: 0,
            events: VecDeque::new(),
        }
    }

    pub fn progress_score(&self) -> f32 {
        self.progress_score
    }

    pub fn current_level(&self) -> AlertLevel {
        self.current_level
    }

    pub fn distracted_count(&self) -> u64 {
        self.distracted_count
    }

    pub fn events_tail(&self, n: usize) -> Vec<Event> {
        self.events.iter().rev().take(n).rev().cloned().collect()
    }

    /// Advance the analyzer by one classifier output. `t` is monotonic
    /// seconds — injectable so tests never have to sleep.
    ///
    /// Never panics on malformed input: an empty-but-valid detection slice
    /// simply decays the score. Callers are expected to have already
    /// discarded unparseable wire payloads before this is called (the
    /// analyzer itself does no I/O and has nothing left that can fail).
    pub fn tick(&mut self, t: f64, detections: &[Detection]) -> TickOutcome {
        let prev_level = self.current_level;
        self.current_level = AlertLevel::from_score(self.progress_score);

        self.apply_safe_driving_reset(t, detections);
        self.apply_tracker_updates(t, detections);

        self.current_level = AlertLevel::from_score(self.progress_score);
        let level_changed = self.current_level != prev_level;

        let mut committed = Vec::new();
        self.detect_single_label_events(t, &mut committed);
        self.detect_level3_composite(t, &mut committed);
        self.detect_multi_behavior(t, &mut committed);
        self.detect_continuous_distraction(t, &mut committed);

        if level_changed {
            info!(
                from = prev_level.label(),
                to = self.current_level.label(),
                score = self.progress_score,
                "alert level transition"
            );
        }

        TickOutcome {
            prev_level,
            new_level: self.current_level,
            level_changed,
            committed,
        }
    }

    fn apply_safe_driving_reset(&mut self, t: f64, detections: &[Detection]) {
        let a = &self.config.analyzer;
        let has_focused = detections
            .iter()
            .any(|d| d.label == LabelId::Focused && d.confidence >= a.focused_min_confidence);
        let has_other_high = detections
            .iter()
            .any(|d| d.label != LabelId::Focused && d.confidence >= a.min_confidence);
        let all_focused = has_focused && !has_other_high;

        if all_focused {
            match self.last_safe_time {
                None => self.last_safe_time = Some(t),
                Some(start) => {
                    let dwell = t - start;
                    if dwell >= a.safe_driving_confirm_time_s {
                        if self.current_level == AlertLevel::L3 {
                            self.hard_reset(t, 50.0, AlertLevel::L1);
                        } else if dwell >= a.level_reset_threshold_s {
                            self.hard_reset(t, 0.0, AlertLevel::Normal);
                        }
                    }
                    self.progress_score = (self.progress_score - a.progress_decrement_focused).max(0.0);
                }
            }
        } else {
            self.last_safe_time = None;
            self.progress_score =
                (self.progress_score - a.progress_decrement_normal).clamp(0.0, 100.0);
        }
    }

    fn hard_reset(&mut self, t: f64, score: f32, level: AlertLevel) {
        debug!(to = level.label(), "hard reset from extended focused dwell");
        self.progress_score = score;
        self.current_level = level;
        self.trackers.clear();
        self.switch_log.clear();
        self.distracted_timestamps.clear();
        self.last_multi_event_time = t;
        self.last_level3_time = t;
    }

    fn apply_tracker_updates(&mut self, t: f64, detections: &[Detection]) {
        let a = self.config.analyzer.clone();
        for d in detections {
            let weight = self.config.weight(d.label);
            if weight <= 0.0 {
                continue;
            }
            let gate = if d.label.is_fatigue() {
                a.fatigue_min_confidence
            } else {
                a.min_confidence
            };
            if d.confidence < gate {
                continue;
            }
            let tracker = self.trackers.entry(d.label).or_default();
            tracker.push(t, d.confidence, a.max_tracker_len);
            self.switch_log.push_back((t, d.label));

            let age = t - tracker.hits.front().map(|&(ts, _)| ts).unwrap_or(t);
            let factor = (1.0 + age / 30.0).min(1.5);
            self.progress_score =
                (self.progress_score + a.progress_increment * weight * factor).min(100.0);
        }

        for tracker in self.trackers.values_mut() {
            tracker.prune(t, a.window_size_s);
        }
        self.trackers.retain(|_, tr| !tr.hits.is_empty());

        while let Some(&(ts, _)) = self.switch_log.front() {
            if t - ts > 10.0 {
                self.switch_log.pop_front();
            } else {
                break;
            }
        }
    }

    /// `level_override` lets a caller cap the level stamped onto the event
    /// below `current_level` (sustained single-label distraction events must
    /// never read L3 — see `detect_single_label_events`). `None` stamps
    /// `current_level` as before.
    fn commit_event(
        &mut self,
        t: f64,
        label: LabelId,
        duration_s: f64,
        count: u32,
        confidence: f32,
        kind: EventKind,
        level_override: Option<AlertLevel>,
    ) -> Event {
        let level = level_override.unwrap_or(self.current_level);
        if let Some(last) = self.events.back_mut() {
            if last.behavior == label && (t - last.start_time_s).abs() <= self.config.analyzer.event_merge_window_s
                && t >= last.start_time_s
            {
                last.duration_s = t - last.start_time_s;
                last.count += count;
                last.confidence = (last.confidence + confidence) / 2.0;
                last.level = level;
                last.progress_score = self.progress_score;
                last.distracted_count = self.distracted_count;
                return last.clone();
            }
        }
        let ev = Event {
            wall_time_ms: wall_now_ms(),
            start_time_s: t,
            behavior: label,
            duration_s,
            count,
            confidence,
            kind,
            level,
            progress_score: self.progress_score,
            distracted_count: self.distracted_count,
        };
        self.events.push_back(ev.clone());
        while self.events.len() > self.config.analyzer.max_events {
            self.events.pop_front();
        }
        ev
    }

    fn detect_single_label_events(&mut self, t: f64, committed: &mut Vec<Event>) {
        let a = self.config.analyzer.clone();
        // bool flag marks the sustained-distraction branch, whose committed
        // event must never be stamped L3 regardless of `current_level`.
        let mut fires: Vec<(LabelId, EventKind, f64, u32, f32, bool)> = Vec::new();

        for (&label, tracker) in self.trackers.iter() {
            let th = if label.is_fatigue() {
                a.fatigue_duration_threshold_s
            } else {
                a.duration_threshold_s
            };
            let recent_sustained = tracker.count_since(t, th);
            let recent_short = tracker.count_since(t, 2.0);
            let since_last = t - tracker.last_single_alert_time;

            if !label.is_fatigue()
                && recent_sustained as u32 >= a.min_detections_for_duration
                && since_last >= th
            {
                fires.push((label, EventKind::Distracted, th, recent_sustained as u32, tracker.mean_confidence(), true));
            } else if recent_short >= 2 && since_last >= 2.0 {
                fires.push((label, label.event_kind(), 2.0, recent_short as u32, tracker.mean_confidence(), false));
            }
        }

        for (label, kind, duration, count, confidence, sustained) in fires {
            if let Some(tr) = self.trackers.get_mut(&label) {
                tr.last_single_alert_time = t;
            }
            if kind == EventKind::Distracted {
                self.distracted_count += 1;
                self.distracted_timestamps.push_back(t);
            }
            let level_override = sustained.then(|| {
                if self.progress_score < 80.0 {
                    AlertLevel::L1
                } else {
                    AlertLevel::L2
                }
            });
            let ev = self.commit_event(t, label, duration, count, confidence, kind, level_override);
            committed.push(ev);
        }
    }

    fn detect_level3_composite(&mut self, t: f64, committed: &mut Vec<Event>) {
        let a = self.config.analyzer.clone();
        let fatigue_hits_5s: usize = self
            .trackers
            .iter()
            .filter(|(l, _)| l.is_fatigue())
            .map(|(_, tr)| tr.count_since(t, 5.0))
            .sum();

        let mut switches = 0u32;
        let mut prev: Option<LabelId> = None;
        for &(ts, label) in self.switch_log.iter() {
            if t - ts > 10.0 {
                continue;
            }
            if let Some(p) = prev {
                if p != label {
                    switches += 1;
                }
            }
            prev = Some(label);
        }

        let fires = (fatigue_hits_5s >= 3 || switches >= 7)
            && (t - self.last_level3_time) >= a.level3_cooldown_s
            && self.progress_score >= 95.0;

        if fires {
            self.last_level3_time = t;
            let ev = self.commit_event(t, LabelId::EyesClosed, 5.0, fatigue_hits_5s.max(1) as u32, 0.9, EventKind::Fatigue, None);
            committed.push(ev);
        }
    }

    fn detect_multi_behavior(&mut self, t: f64, committed: &mut Vec<Event>) {
        let a = self.config.analyzer.clone();
        let distinct = self.trackers.len() as u32;
        let sum: f32 = self
            .trackers
            .iter()
            .map(|(&label, tr)| self.config.weight(label) * tr.mean_confidence())
            .sum();

        let fires = distinct >= a.count_threshold
            && sum >= a.score_threshold
            && (t - self.last_multi_event_time) >= a.multi_event_cooldown_s
            && (t - self.last_level3_time) >= a.level3_cooldown_s
            && self.progress_score >= 80.0;

        if fires {
            self.last_multi_event_time = t;
            self.distracted_count += 1;
            self.distracted_timestamps.push_back(t);
            if let Some((&label, _)) = self
                .trackers
                .iter()
                .max_by(|a, b| a.1.mean_confidence().partial_cmp(&b.1.mean_confidence()).unwrap())
            {
                let ev = self.commit_event(t, label, 0.0, distinct, sum.min(1.0), EventKind::Distracted, None);
                committed.push(ev);
            }
        }
    }

    fn detect_continuous_distraction(&mut self, t: f64, committed: &mut Vec<Event>) {
        let a = self.config.analyzer.clone();
        while let Some(&ts) = self.distracted_timestamps.front() {
            if t - ts > a.continuous_distracted_window_s {
                self.distracted_timestamps.pop_front();
            } else {
                break;
            }
        }

        let fires = self.distracted_timestamps.len() as u32 >= a.continuous_distracted_count
            && (t - self.last_level3_time) >= a.level3_cooldown_s
            && self.progress_score >= 95.0;

        if fires {
            self.last_level3_time = t;
            let label = self
                .trackers
                .keys()
                .find(|l| l.is_distraction())
                .copied()
                .unwrap_or(LabelId::HeadDown);
            let ev = self.commit_event(t, label, a.continuous_distracted_window_s, self.distracted_timestamps.len() as u32, 0.9, EventKind::Distracted, None);
            self.distracted_timestamps.clear();
            committed.push(ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn analyzer() -> BehaviorAnalyzer {
        BehaviorAnalyzer::new(Config::default_for_tests())
    }

    fn det(label: LabelId, confidence: f32) -> Detection {
        Detection { label, confidence }
    }

    /// Scenario 1: escalation to L1 around t≈2.5s feeding eyes_closed at 4fps.
    #[test]
    fn escalates_to_l1_around_2_5s() {
        let mut an = analyzer();
        let mut t = 0.0;
        let mut crossed_at = None;
        while t <= 3.0 {
            let out = an.tick(t, &[det(LabelId::EyesClosed, 0.90)]);
            if out.new_level == AlertLevel::L1 && crossed_at.is_none() {
                crossed_at = Some(t);
            }
            t += 0.25;
        }
        let crossed = crossed_at.expect("expected L1 crossing");
        assert!((2.0..=3.0).contains(&crossed), "crossed at {crossed}");
        assert_eq!(an.current_level().coils(), [true, false, false]);
    }

    /// Scenario 2: merging within the 5s window yields exactly one event record.
    #[test]
    fn merges_events_within_window() {
        let mut an = analyzer();
        let mut t = 0.0;
        while t <= 6.0 {
            an.tick(t, &[det(LabelId::EyesClosed, 0.90)]);
            t += 0.25;
        }
        let tail = an.events_tail(10);
        let matching: Vec<_> = tail.iter().filter(|e| e.behavior == LabelId::EyesClosed).collect();
        assert_eq!(matching.len(), 1, "expected exactly one merged event, got {matching:?}");
        assert!(matching[0].duration_s >= 5.0);
        assert!(matching[0].count >= 3);
    }

    /// Scenario 3: hard reset from L3 at 3s and 10s of continuous focused dwell.
    #[test]
    fn hard_resets_from_l3() {
        let mut an = analyzer();
        an.progress_score = 96.0;
        an.current_level = AlertLevel::L3;
        an.trackers.insert(LabelId::EyesClosed, Tracker::default());

        let mut t = 0.0;
        let mut dropped_to_l1 = false;
        while t <= 3.0 {
            let out = an.tick(t, &[det(LabelId::Focused, 0.95)]);
            if out.new_level == AlertLevel::L1 {
                dropped_to_l1 = true;
            }
            t += 0.25;
        }
        assert!(dropped_to_l1, "expected drop to L1 after 3s focused dwell");
        assert!((an.progress_score() - 50.0).abs() < 1.0);
        assert!(an.trackers.is_empty());

        let mut dropped_to_normal = false;
        while t <= 13.0 {
            let out = an.tick(t, &[det(LabelId::Focused, 0.95)]);
            if out.new_level == AlertLevel::Normal {
                dropped_to_normal = true;
            }
            t += 0.25;
        }
        assert!(dropped_to_normal, "expected drop to Normal after 10s focused dwell");
        assert_eq!(an.progress_score(), 0.0);
    }

    /// Scenario 6: cumulative coil encoding through Normal -> L1 -> L2 -> L3 -> L2.
    #[test]
    fn cumulative_coil_sequence() {
        assert_eq!(AlertLevel::Normal.coils(), [false, false, false]);
        assert_eq!(AlertLevel::L1.coils(), [true, false, false]);
        assert_eq!(AlertLevel::L2.coils(), [true, true, false]);
        assert_eq!(AlertLevel::L3.coils(), [true, true, true]);
        assert_eq!(AlertLevel::L2.coils(), [true, true, false]);
    }
}
