//! NMEA RMC sentence parser for GPS packets captured off the wire.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

// Talker-agnostic RMC sentence with trailing checksum: $..RMC,...*hh.
// The checksum is carried but not validated.
static RMC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(..RMC,[^*]*\*[0-9A-Fa-f]{2})").unwrap());

/// One decoded, deduplicated position fix.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub timestamp_us: i64,
    pub lat: f64,
    pub lon: f64,
    pub speed_knots: f64,
    pub course_deg: f64,
    pub magnetic_variation: f64,
    pub utc_time: Option<NaiveDateTime>,
}

#[derive(Debug, Default)]
pub struct GpsStats {
    pub sentences: u64,
    pub emitted: u64,
    pub duplicates: u64,
    pub parse_failures: u64,
}

#[derive(Debug, Default)]
pub struct GpsSentenceParser {
    // Signed coordinates of the last emitted fix, for exact-match dedup.
    prev: Option<(f64, f64)>,
    pub stats: GpsStats,
}

impl GpsSentenceParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a UDP payload for an RMC sentence and decode it. Returns None
    /// when the payload carries no sentence, the fields fail to parse, or
    /// the fix duplicates the previous one; none of these is fatal.
    pub fn parse(&mut self, timestamp_us: i64, payload: &[u8]) -> Option<GpsFix> {
        let captures = RMC_PATTERN.captures(payload)?;
        let sentence = String::from_utf8_lossy(captures.get(1)?.as_bytes());
        self.stats.sentences += 1;

        let fields: Vec<&str> = sentence.split(',').collect();
        let Some(fix) = decode_fields(&fields, timestamp_us) else {
            self.stats.parse_failures += 1;
            tracing::warn!(sentence = %sentence, "RMC field parse failure; record dropped");
            return None;
        };

        // Frames that resolve before the session zero carry no usable time.
        if fix.timestamp_us < 0 {
            return None;
        }

        let key = (fix.lat, fix.lon);
        if self.prev == Some(key) {
            self.stats.duplicates += 1;
            return None;
        }
        self.prev = Some(key);
        self.stats.emitted += 1;
        Some(fix)
    }
}

fn decode_fields(fields: &[&str], timestamp_us: i64) -> Option<GpsFix> {
    if fields.len() < 11 {
        return None;
    }
    let (lat_deg, lat_min) = parse_dmm(fields[3])?;
    let (lon_deg, lon_min) = parse_dmm(fields[5])?;

    let mut lat = lat_deg + lat_min / 60.0;
    if fields[4] == "S" {
        lat = -lat;
    }
    let mut lon = lon_deg + lon_min / 60.0;
    if fields[6] == "W" {
        lon = -lon;
    }

    let utc_time = parse_utc(fields[1], fields[9]);
    let speed_knots = parse_optional_f64(fields[7])?;
    let course_deg = parse_optional_f64(fields[8])?;
    let magnetic_variation = parse_optional_f64(fields[10])?;

    Some(GpsFix {
        timestamp_us,
        lat,
        lon,
        speed_knots,
        course_deg,
        magnetic_variation,
        utc_time,
    })
}

/// Degree + decimal-minute field, e.g. "4916.45" = 49° 16.45'.
fn parse_dmm(dmm: &str) -> Option<(f64, f64)> {
    let dot = dmm.find('.')?;
    if dot < 2 {
        return None;
    }
    let deg = dmm[..dot - 2].parse().ok()?;
    let minutes = dmm[dot - 2..].parse().ok()?;
    Some((deg, minutes))
}

fn parse_utc(time_field: &str, date_field: &str) -> Option<NaiveDateTime> {
    let time = time_field.split('.').next()?;
    NaiveDateTime::parse_from_str(&format!("{date_field}{time}"), "%d%m%y%H%M%S").ok()
}

/// Empty fields are legal in RMC sentences and decode as zero.
fn parse_optional_f64(field: &str) -> Option<f64> {
    if field.is_empty() {
        Some(0.0)
    } else {
        field.parse().ok()
    }
}
