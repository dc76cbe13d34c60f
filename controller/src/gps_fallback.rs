//! GPS fallback policy (component E).
//!
//! Resolves SPEC_FULL.md §9's open question in favor of the spec's own
//! §4.E description over the apparent always-fallback behavior observed in
//! one copy of the source's `_handle_gps_fallback`.

use crate::config::DefaultDataConfig;
use crate::domain::{GpsFix, Location};

pub struct GpsFallbackPolicy {
    config: DefaultDataConfig,
    last_real_location: Option<Location>,
    failure_count: u32,
}

impl GpsFallbackPolicy {
    pub fn new(config: DefaultDataConfig) -> Self {
        Self {
            config,
            last_real_location: None,
            failure_count: 0,
        }
    }

    pub fn on_success(&mut self, loc: Location) -> GpsFix {
        self.last_real_location = Some(loc);
        self.failure_count = 0;
        GpsFix {
            loc: Some(loc),
            realtime: true,
            reason: None,
            speed_kmh: None,
            altitude_m: None,
            satellites: None,
            heading_deg: None,
        }
    }

    pub fn on_failure(&mut self) -> GpsFix {
        self.failure_count += 1;

        if let Some(loc) = self.last_real_location {
            return GpsFix {
                loc: Some(loc),
                realtime: false,
                reason: Some(format!("stale ({} failures)", self.failure_count)),
                speed_kmh: None,
                altitude_m: None,
                satellites: None,
            };
        }

        if self.failure_count >= self.config.max_gps_failures {
            return GpsFix {
                loc: None,
                realtime: false,
                reason: Some("no fix and no cached location".to_string()),
                speed_kmh: None,
                altitude_m: None,
                satellites: None,
            };
        }

        GpsFix {
            loc: Some(Location {
                lat: self.config.fallback_lat,
                lng: self.config.fallback_lng,
            }),
            realtime: false,
            reason: Some("bootstrap".to_string()),
            speed_kmh: None,
            altitude_m: None,
            satellites: None,
            heading_deg: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DefaultDataConfig {
        DefaultDataConfig {
            fallback_lat: 33.5,
            fallback_lng: 119.5,
            max_gps_failures: 3,
        }
    }

    /// Scenario 5: staged degradation through to `None`.
    #[test]
    fn stages_through_to_none() {
        let mut policy = GpsFallbackPolicy::new(config());

        let first = policy.on_failure();
        assert!(first.loc.is_some());
        assert!(!first.realtime);
        assert_eq!(first.reason.as_deref(), Some("bootstrap"));

        let real = Location { lat: 33.5, lng: 119.0 };
        let ok = policy.on_success(real);
        assert!(ok.realtime);

        let stale = policy.on_failure();
        assert!(!stale.realtime);
        assert_eq!(stale.loc.unwrap().lng, real.lng);

        // last_real_location is always preferred over None/default once set,
        // so additional failures keep returning the stale fix.
        for _ in 0..10 {
            let f = policy.on_failure();
            assert_eq!(f.loc.unwrap().lat, real.lat);
        }
    }

    #[test]
    fn returns_none_once_failures_exhausted_with_no_cache() {
        let mut policy = GpsFallbackPolicy::new(config());
        let _ = policy.on_failure();
        let _ = policy.on_failure();
        let third = policy.on_failure();
        assert!(third.loc.is_none());
    }
}
