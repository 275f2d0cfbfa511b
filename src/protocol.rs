use crate::voyage::PositionReport;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

pub const AIVDM_MESSAGE: &str = "AIVDM";
pub const DEFAULT_VESSEL_SPEED_KNOTS: f64 = 15.0;
pub const DEFAULT_SPEED_FACTOR: f64 = 5.0;
pub const MAX_LINE_LENGTH: usize = 4096;

/// Control commands sent by clients to the broadcast scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    AddVessel {
        mmsi: String,
        #[serde(default = "default_vessel_speed")]
        speed: f64,
    },
    SetSpeed {
        #[serde(alias = "speed")]
        speed_factor: f64,
    },
}

fn default_vessel_speed() -> f64 {
    DEFAULT_VESSEL_SPEED_KNOTS
}

/// Non-position broadcasts and direct replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    VesselAdded {
        mmsi: String,
        start_port: String,
        end_port: String,
        distance_nm: f64,
    },
    SpeedUpdated {
        speed_factor: f64,
    },
    Error {
        message: String,
    },
}

/// Periodic position broadcast in the logical AIVDM shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AivdmMessage {
    pub message: String,
    pub mmsi: String,
    pub timestamp: String,
    pub payload: String,
    pub decoded: DecodedPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPosition {
    pub mmsi: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub course: f64,
    pub heading: f64,
    pub message_count: u32,
    pub elapsed_minutes: f64,
    pub distance_covered: f64,
}

impl AivdmMessage {
    pub fn from_report(report: &PositionReport) -> Self {
        let timestamp = report.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        let mmsi = report.mmsi.to_string();

        Self {
            message: AIVDM_MESSAGE.to_string(),
            payload: placeholder_payload(&mmsi, &timestamp),
            decoded: DecodedPosition {
                mmsi: mmsi.clone(),
                latitude: report.latitude,
                longitude: report.longitude,
                speed: report.speed_knots,
                course: report.course_degrees,
                heading: report.heading_degrees,
                message_count: report.sequence_number,
                elapsed_minutes: report.elapsed_minutes,
                distance_covered: report.distance_covered,
            },
            mmsi,
            timestamp,
        }
    }
}

/// Stand-in for an encoded AIS sentence; binary fidelity is not modelled.
pub fn placeholder_payload(mmsi: &str, timestamp: &str) -> String {
    format!("!AIVDM,1,1,,A,DUMMY-{}-{},0*hh", mmsi, timestamp)
}

/// Any line a subscriber may receive from the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Event(ServerEvent),
    Position(AivdmMessage),
}

impl From<ServerEvent> for Outbound {
    fn from(event: ServerEvent) -> Self {
        Outbound::Event(event)
    }
}

impl From<&PositionReport> for Outbound {
    fn from(report: &PositionReport) -> Self {
        Outbound::Position(AivdmMessage::from_report(report))
    }
}

/// Serializes a value as a single JSON line without the trailing newline.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}
