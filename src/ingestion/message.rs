//! Tolerant decoding and strict validation of inbound broadcast lines.

use crate::geo::{is_valid_latitude, is_valid_longitude, Waypoint};
use crate::storage::{NewPosition, POSITION_REPORT_MESSAGE_TYPE};
use crate::voyage::Mmsi;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vessel ids arrive as strings from the simulator but as integers from some feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(u64),
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Text(s) => f.write_str(s),
            RawId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A line as received, before any validation. Every field is optional so that
/// shape problems surface as [`ValidationFailure`]s rather than parse errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Present only on control events (`vessel_added`, `speed_updated`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub mmsi: Option<RawId>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub decoded: Option<RawDecoded>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDecoded {
    #[serde(default)]
    pub mmsi: Option<RawId>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub course: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
}

impl RawMessage {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Control events share the stream with positions but carry no position data.
    pub fn is_control(&self) -> bool {
        self.kind.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid vessel id {0:?}")]
    InvalidMmsi(String),
    #[error("vessel id mismatch: envelope {envelope}, decoded {decoded}")]
    MmsiMismatch { envelope: String, decoded: String },
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// A position report that passed validation and may be buffered.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidMessage {
    pub mmsi: Mmsi,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub heading: Option<f64>,
    pub payload: String,
}

impl ValidMessage {
    pub fn position(&self) -> Waypoint {
        Waypoint::new(self.latitude, self.longitude)
    }

    pub fn to_row(&self) -> NewPosition {
        NewPosition {
            mmsi: self.mmsi.clone(),
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            speed: self.speed,
            course: self.course,
            heading: self.heading,
            raw_message: self.payload.clone(),
            message_type: POSITION_REPORT_MESSAGE_TYPE,
        }
    }
}

pub fn is_valid(raw: &RawMessage) -> bool {
    validate(raw).is_ok()
}

pub fn validate(raw: &RawMessage) -> Result<ValidMessage, ValidationFailure> {
    let decoded = raw
        .decoded
        .as_ref()
        .ok_or(ValidationFailure::MissingField("decoded"))?;

    let mmsi = resolve_mmsi(raw.mmsi.as_ref(), decoded.mmsi.as_ref())?;

    let timestamp = raw
        .timestamp
        .as_deref()
        .ok_or(ValidationFailure::MissingField("timestamp"))
        .and_then(parse_timestamp)?;

    let latitude = decoded
        .latitude
        .ok_or(ValidationFailure::MissingField("latitude"))?;
    if !is_valid_latitude(latitude) {
        return Err(ValidationFailure::OutOfRange {
            field: "latitude",
            value: latitude,
        });
    }

    let longitude = decoded
        .longitude
        .ok_or(ValidationFailure::MissingField("longitude"))?;
    if !is_valid_longitude(longitude) {
        return Err(ValidationFailure::OutOfRange {
            field: "longitude",
            value: longitude,
        });
    }

    if let Some(speed) = decoded.speed {
        if !speed.is_finite() || speed < 0.0 {
            return Err(ValidationFailure::OutOfRange {
                field: "speed",
                value: speed,
            });
        }
    }

    check_angle("course", decoded.course)?;
    check_angle("heading", decoded.heading)?;

    Ok(ValidMessage {
        mmsi,
        timestamp,
        latitude,
        longitude,
        speed: decoded.speed,
        course: decoded.course,
        heading: decoded.heading,
        payload: raw.payload.clone().unwrap_or_default(),
    })
}

fn resolve_mmsi(
    envelope: Option<&RawId>,
    decoded: Option<&RawId>,
) -> Result<Mmsi, ValidationFailure> {
    let id = match (envelope, decoded) {
        (Some(envelope), Some(decoded)) => {
            let (envelope, decoded) = (envelope.to_string(), decoded.to_string());
            if envelope != decoded {
                return Err(ValidationFailure::MmsiMismatch { envelope, decoded });
            }
            envelope
        }
        (Some(id), None) | (None, Some(id)) => id.to_string(),
        (None, None) => return Err(ValidationFailure::MissingField("mmsi")),
    };

    id.parse().map_err(|_| ValidationFailure::InvalidMmsi(id))
}

fn check_angle(field: &'static str, value: Option<f64>) -> Result<(), ValidationFailure> {
    match value {
        Some(v) if !(0.0..=360.0).contains(&v) => Err(ValidationFailure::OutOfRange { field, value: v }),
        _ => Ok(()),
    }
}

/// Accepts RFC 3339 or naive ISO-8601; naive timestamps are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ValidationFailure> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ValidationFailure::InvalidTimestamp(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(mmsi: &str, lat: f64, lon: f64) -> String {
        format!(
            r#"{{"message":"AIVDM","mmsi":"{m}","timestamp":"2024-03-01T12:00:00.000000Z","payload":"p",
               "decoded":{{"mmsi":"{m}","latitude":{lat},"longitude":{lon},"speed":15.0,"course":90.0,"heading":90.0}}}}"#,
            m = mmsi,
            lat = lat,
            lon = lon
        )
    }

    #[test]
    fn test_valid_message_accepted() {
        let raw = RawMessage::parse(&line("123456789", 51.9, 4.1)).unwrap();
        let valid = validate(&raw).unwrap();
        assert_eq!(valid.mmsi.as_str(), "123456789");
        assert_eq!(valid.speed, Some(15.0));
        assert_eq!(valid.payload, "p");
    }

    #[test]
    fn test_short_mmsi_and_bad_coordinates_rejected() {
        let raw = RawMessage::parse(&line("123", 200.0, 400.0)).unwrap();
        assert!(!is_valid(&raw));
        assert!(matches!(validate(&raw), Err(ValidationFailure::InvalidMmsi(_))));
    }

    #[test]
    fn test_out_of_range_latitude_rejected() {
        let raw = RawMessage::parse(&line("123456789", 91.0, 0.0)).unwrap();
        assert_eq!(
            validate(&raw),
            Err(ValidationFailure::OutOfRange {
                field: "latitude",
                value: 91.0
            })
        );
    }

    #[test]
    fn test_numeric_mmsi_accepted() {
        let raw = RawMessage::parse(
            r#"{"mmsi":123456789,"timestamp":"2024-03-01T12:00:00","decoded":{"latitude":1.0,"longitude":2.0}}"#,
        )
        .unwrap();
        let valid = validate(&raw).unwrap();
        assert_eq!(valid.mmsi.as_str(), "123456789");
        assert_eq!(valid.speed, None);
    }

    #[test]
    fn test_missing_fields_fail_closed() {
        let raw = RawMessage::parse(r#"{"mmsi":"123456789","timestamp":"2024-03-01T12:00:00Z"}"#).unwrap();
        assert_eq!(validate(&raw), Err(ValidationFailure::MissingField("decoded")));

        let raw = RawMessage::parse(
            r#"{"mmsi":"123456789","timestamp":"2024-03-01T12:00:00Z","decoded":{"latitude":1.0}}"#,
        )
        .unwrap();
        assert_eq!(validate(&raw), Err(ValidationFailure::MissingField("longitude")));
    }

    #[test]
    fn test_mismatched_ids_rejected() {
        let raw = RawMessage::parse(
            r#"{"mmsi":"123456789","timestamp":"2024-03-01T12:00:00Z",
                "decoded":{"mmsi":"987654321","latitude":1.0,"longitude":2.0}}"#,
        )
        .unwrap();
        assert!(matches!(validate(&raw), Err(ValidationFailure::MmsiMismatch { .. })));
    }

    #[test]
    fn test_timestamp_formats() {
        let a = parse_timestamp("2024-03-01T12:00:00Z").unwrap();
        let b = parse_timestamp("2024-03-01T12:00:00").unwrap();
        let c = parse_timestamp("2024-03-01T13:00:00+01:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_control_event_detected() {
        let raw = RawMessage::parse(r#"{"type":"speed_updated","speed_factor":2.0}"#).unwrap();
        assert!(raw.is_control());
    }

    #[test]
    fn test_negative_speed_rejected() {
        let raw = RawMessage::parse(
            r#"{"mmsi":"123456789","timestamp":"2024-03-01T12:00:00Z",
                "decoded":{"latitude":1.0,"longitude":2.0,"speed":-1.0}}"#,
        )
        .unwrap();
        assert!(!is_valid(&raw));
    }
}
