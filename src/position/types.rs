use serde::Serialize;

use crate::timetable::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Running,
    Unknown,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Stale,
    Rejected,
    Suspect,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    /// Direction of travel in degrees clockwise from north.
    pub bearing: f64,
}

/// One train's materialized position at a query instant.
#[derive(Debug, Clone, Serialize)]
pub struct TrainPosition {
    pub train_number: String,
    pub trip_id: String,
    pub line: String,
    pub direction: Direction,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_station_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_station_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub location: GeoPoint,
    /// Delay in seconds at the current or next upcoming stop.
    pub delay: i32,
    pub quality: Quality,
}

/// Result of one `positions` query, before the HTTP envelope.
#[derive(Debug)]
pub struct LineSnapshot {
    pub positions: Vec<TrainPosition>,
    /// Whether the fused set backing this answer was older than the
    /// staleness threshold.
    pub stale: bool,
}
