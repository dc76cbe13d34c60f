//! GNSS fix and satellite-view parsing.
//!
//! Grounded on the source's `_parse_qgpsloc` / `get_current_satellites_info`:
//! comma-separated NMEA-ish fields and `$..GSV` talker-ID prefixes.

use crate::domain::Location;
use crate::error::{ControllerError, Result};

#[derive(Debug, Clone)]
pub struct GnssFix {
    pub location: Location,
    pub hdop: f32,
    pub altitude_m: f32,
    pub fix_mode: u8,
    pub speed_kmh: f32,
    pub course_deg: Option<f32>,
    pub satellites_in_use: u32,
}

/// Parses one `+QGPSLOC:` response line's comma-separated fields:
/// `utc_time,lat,lon,hdop,alt,fix_mode,course,speed_kmh,utc_date,satellites`.
pub fn parse_qgpsloc(line: &str) -> Result<GnssFix> {
    let body = line
        .split_once(':')
        .map(|(_, rest)| rest.trim())
        .unwrap_or(line.trim());
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 9 {
        return Err(ControllerError::Parse {
            what: "QGPSLOC".to_string(),
            detail: format!("expected >=9 fields, got {}: {line}", fields.len()),
        });
    }

    let lat = parse_ddmm(fields[1]).ok_or_else(|| ControllerError::Parse {
        what: "QGPSLOC latitude".to_string(),
        detail: fields[1].to_string(),
    })?;
    let lon = parse_ddmm(fields[2]).ok_or_else(|| ControllerError::Parse {
        what: "QGPSLOC longitude".to_string(),
        detail: fields[2].to_string(),
    })?;

    let hdop: f32 = fields[3].parse().unwrap_or(99.0);
    let altitude_m: f32 = fields[4].parse().unwrap_or(0.0);
    let fix_mode: u8 = fields[5].parse().unwrap_or(0);
    let course_deg: Option<f32> = fields.get(6).and_then(|s| s.parse().ok());
    let speed_kmh: f32 = fields.get(7).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let satellites_in_use: u32 = fields.get(8).and_then(|s| s.parse().ok()).unwrap_or(0);

    Ok(GnssFix {
        location: Location { lat, lng: lon },
        hdop,
        altitude_m,
        fix_mode,
        speed_kmh,
        course_deg,
        satellites_in_use,
    })
}

/// `ddmm.mmmm` + hemisphere letter -> signed decimal degrees.
fn parse_ddmm(field: &str) -> Option<f64> {
    let (value, hemi) = field.split_at(field.len().checked_sub(1)?);
    let raw: f64 = value.parse().ok()?;
    let degrees = (raw / 100.0).floor();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemi {
        "S" | "W" => Some(-decimal),
        _ => Some(decimal),
    }
}

#[derive(Debug, Default)]
pub struct SatelliteInfo {
    pub total: u32,
    pub gps: u32,
    pub beidou: u32,
    pub glonass: u32,
    pub galileo: u32,
}

/// Parses raw `$..GSV` NMEA sentences for a satellite-count summary.
pub fn parse_gsv_sentences(raw: &str) -> SatelliteInfo {
    let mut info = SatelliteInfo::default();
    for line in raw.lines() {
        let line = line.trim();
        if line.len() < 6 || !line.starts_with('$') {
            continue;
        }
        let talker = &line[1..3];
        let fields: Vec<&str> = line.split(',').collect();
        let count: u32 = fields.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
        match talker {
            "GP" => info.gps += count,
            "GB" => info.beidou += count,
            "GL" => info.glonass += count,
            "GA" => info.galileo += count,
            _ => {}
        }
    }
    info.total = info.gps + info.beidou + info.glonass + info.galileo;
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ddmm_north_east() {
        assert!((parse_ddmm("3130.5000N").unwrap() - 31.508333).abs() < 1e-3);
        assert!((parse_ddmm("12128.4000E").unwrap() - 121.474).abs() < 1e-2);
    }

    #[test]
    fn parses_qgpsloc_line() {
        let fix = parse_qgpsloc("+QGPSLOC: 093212.0,3130.5000N,12128.4000E,1.2,50.0,3,,12.3,270726,09")
            .expect("valid fix");
        assert!(fix.location.lat > 31.0 && fix.location.lat < 32.0);
        assert_eq!(fix.satellites_in_use, 9);
    }
}
