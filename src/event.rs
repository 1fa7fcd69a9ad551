//! Normalized events flowing from the sensor workers to the consumer.

use chrono::NaiveDateTime;

/// One decoded sensor record, tagged with its source entity and a timestamp
/// relative to the session-global zero (microseconds).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Gps {
        entity: String,
        timestamp_us: i64,
        lat: f64,
        lon: f64,
        speed_knots: f64,
        course_deg: f64,
        magnetic_variation: f64,
        utc_time: Option<NaiveDateTime>,
    },
    LidarFrame {
        entity: String,
        timestamp_us: i64,
        positions: Vec<[f32; 3]>,
        colors: Vec<[u8; 3]>,
    },
    VideoFrame {
        entity: String,
        timestamp_us: i64,
        image_bytes: Vec<u8>,
    },
    Signal {
        entity: String,
        timestamp_us: i64,
        name: String,
        value: f64,
    },
}

impl Event {
    pub fn timestamp_us(&self) -> i64 {
        match self {
            Event::Gps { timestamp_us, .. }
            | Event::LidarFrame { timestamp_us, .. }
            | Event::VideoFrame { timestamp_us, .. }
            | Event::Signal { timestamp_us, .. } => *timestamp_us,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            Event::Gps { entity, .. }
            | Event::LidarFrame { entity, .. }
            | Event::VideoFrame { entity, .. }
            | Event::Signal { entity, .. } => entity,
        }
    }
}

/// What travels on the shared bounded queue: events, or the per-worker
/// end-of-stream sentinel the consumer counts to know when the run is done.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueMessage {
    Event(Event),
    Finished { entity: String },
}

/// Format a duration in seconds as `mm:ss` for segment labels.
pub fn format_mmss(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0.0), "00:00");
        assert_eq!(format_mmss(59.9), "00:59");
        assert_eq!(format_mmss(60.0), "01:00");
        assert_eq!(format_mmss(3599.0), "59:59");
        assert_eq!(format_mmss(-5.0), "00:00");
    }

    #[test]
    fn test_event_accessors() {
        let ev = Event::Signal {
            entity: "can0".to_string(),
            timestamp_us: 42,
            name: "speed".to_string(),
            value: 1.5,
        };
        assert_eq!(ev.timestamp_us(), 42);
        assert_eq!(ev.entity(), "can0");
    }
}
