//! Parses the per-line timetable JSON corpus into validated trips.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::DataLoadError;
use crate::fusion::matching::{direction_from_number_parity, normalize_train_number};

use super::service_day::parse_timetable_time;
use super::types::{Direction, ServiceType, StopTime, TimetableStore, TimetableTrip};

/// Trip-id suffix -> operating calendar. Ids that match none are tagged
/// Unknown and excluded from serving.
const SERVICE_SUFFIXES: &[(&str, ServiceType)] = &[
    (".Weekday", ServiceType::Weekday),
    (".SaturdayHoliday", ServiceType::SaturdayHoliday),
    (".Saturday", ServiceType::SaturdayHoliday),
    (".Holiday", ServiceType::SaturdayHoliday),
];

#[derive(Debug, Deserialize)]
struct RawTrip {
    id: String,
    #[serde(default)]
    number: String,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default, rename = "trainType")]
    train_type: Option<String>,
    #[serde(default)]
    origin: Vec<String>,
    #[serde(default)]
    destination: Vec<String>,
    #[serde(default)]
    stops: Vec<RawStop>,
}

#[derive(Debug, Deserialize)]
struct RawStop {
    station: String,
    #[serde(default)]
    arrival: Option<String>,
    #[serde(default)]
    departure: Option<String>,
}

pub fn service_type_from_id(id: &str) -> ServiceType {
    for (suffix, service_type) in SERVICE_SUFFIXES {
        if id.ends_with(suffix) {
            return *service_type;
        }
    }
    ServiceType::Unknown
}

pub fn load_timetables(data_dir: &Path, catalog: &Catalog) -> Result<TimetableStore, DataLoadError> {
    let mut trips: Vec<TimetableTrip> = Vec::new();
    let mut dropped = 0usize;
    let mut unknown_service_ids: HashSet<String> = HashSet::new();

    for (line_idx, line) in catalog.lines.iter().enumerate() {
        let path = data_dir.join("timetables").join(format!("{}.json", line.id));
        if !path.exists() {
            return Err(DataLoadError::Missing(path));
        }
        let file = File::open(&path).map_err(|source| DataLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let raw_trips: Vec<RawTrip> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| DataLoadError::Json {
                path: path.clone(),
                source,
            })?;

        for raw in raw_trips {
            match parse_trip(raw, line_idx, catalog) {
                Ok(trip) => {
                    if trip.service_type == ServiceType::Unknown {
                        unknown_service_ids.insert(trip.id.clone());
                    }
                    trips.push(trip);
                }
                Err(reason) => {
                    warn!(line = %line.id, %reason, "dropping malformed trip");
                    dropped += 1;
                }
            }
        }
    }

    if !unknown_service_ids.is_empty() {
        warn!(
            count = unknown_service_ids.len(),
            "trips with unrecognized service-type suffix; they will not be served"
        );
    }

    info!(
        trips = trips.len(),
        dropped, "loaded timetable corpus"
    );

    Ok(TimetableStore::new(trips))
}

fn parse_trip(raw: RawTrip, line_idx: usize, catalog: &Catalog) -> Result<TimetableTrip, String> {
    let line = &catalog.lines[line_idx];

    if raw.stops.len() < 2 {
        return Err(format!("trip {} has fewer than two stops", raw.id));
    }

    let mut stops = Vec::with_capacity(raw.stops.len());
    for raw_stop in &raw.stops {
        let station = *catalog
            .station_index
            .get(&raw_stop.station)
            .ok_or_else(|| format!("trip {} references unknown station {}", raw.id, raw_stop.station))?;

        let arrival = parse_optional_time(raw_stop.arrival.as_deref())
            .map_err(|v| format!("trip {} has unparseable arrival {:?}", raw.id, v))?;
        let departure = parse_optional_time(raw_stop.departure.as_deref())
            .map_err(|v| format!("trip {} has unparseable departure {:?}", raw.id, v))?;

        if arrival.is_none() && departure.is_none() {
            return Err(format!(
                "trip {} stop {} has neither arrival nor departure",
                raw.id, raw_stop.station
            ));
        }
        if let (Some(arr), Some(dep)) = (arrival, departure) {
            if dep < arr {
                return Err(format!(
                    "trip {} departs {} before arriving at {}",
                    raw.id, dep, raw_stop.station
                ));
            }
        }

        stops.push(StopTime {
            station,
            arrival,
            departure,
        });
    }

    // Stop times must not go backwards across the trip. Equal adjacent
    // times survive as zero-duration runs, flagged invalid downstream.
    for pair in stops.windows(2) {
        if pair[1].arrival_or_departure() < pair[0].departure_or_arrival() {
            return Err(format!("trip {} has non-monotonic stop times", raw.id));
        }
    }

    validate_traversal(&raw.id, &stops, line)?;

    let resolve_terminals = |ids: &[String]| -> Vec<usize> {
        ids.iter()
            .filter_map(|id| catalog.station_index.get(id).copied())
            .collect()
    };

    let normalized_number = normalize_train_number(&raw.number).unwrap_or_default();
    let mut direction = raw
        .direction
        .as_deref()
        .map(Direction::parse)
        .unwrap_or(Direction::Unknown);
    if direction == Direction::Unknown
        && line.shape.as_ref().is_some_and(|s| s.closed_loop)
    {
        // Loop-line timetables sometimes omit the direction; the number's
        // parity encodes it (odd outer, even inner).
        direction = direction_from_number_parity(&normalized_number);
    }

    Ok(TimetableTrip {
        service_type: service_type_from_id(&raw.id),
        normalized_number,
        direction,
        train_type: raw.train_type.unwrap_or_default(),
        origin: resolve_terminals(&raw.origin),
        destination: resolve_terminals(&raw.destination),
        id: raw.id,
        line: line_idx,
        number: raw.number,
        stops,
    })
}

fn parse_optional_time(value: Option<&str>) -> Result<Option<u32>, String> {
    match value {
        None | Some("") => Ok(None),
        Some(v) => parse_timetable_time(v)
            .map(Some)
            .ok_or_else(|| v.to_string()),
    }
}

/// The stop sequence must walk the line's station order one station at a
/// time in one consistent direction. Loop lines may cross the seam between
/// the last- and first-listed stations, repeatedly for circling trains.
fn validate_traversal(
    trip_id: &str,
    stops: &[StopTime],
    line: &crate::catalog::Line,
) -> Result<(), String> {
    let n = line.station_idx.len();
    if n < 2 {
        return Ok(());
    }

    let mut forward: Option<bool> = None;
    for pair in stops.windows(2) {
        let a = *line
            .station_pos
            .get(&pair[0].station)
            .ok_or_else(|| format!("trip {} stop not on its line", trip_id))?;
        let b = *line
            .station_pos
            .get(&pair[1].station)
            .ok_or_else(|| format!("trip {} stop not on its line", trip_id))?;

        let step_forward = (a + 1) % n == b;
        let step_backward = (b + 1) % n == a;
        let step = match (step_forward, step_backward) {
            (true, false) => true,
            (false, true) => false,
            // Two-station lines are ambiguous; accept either reading.
            (true, true) => forward.unwrap_or(true),
            (false, false) => {
                return Err(format!(
                    "trip {} teleports between non-adjacent stations",
                    trip_id
                ))
            }
        };

        match forward {
            None => forward = Some(step),
            Some(dir) if dir != step => {
                return Err(format!("trip {} reverses direction mid-run", trip_id))
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{Line, LocalizedName, Station};
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    fn test_catalog(station_count: usize) -> Catalog {
        let stations: Vec<Station> = (0..station_count)
            .map(|i| Station {
                id: format!("JR-East.Test.S{i}"),
                name: LocalizedName::default(),
                line_ids: vec!["JR-East.Test".to_string()],
                lon: 139.70 + 0.01 * i as f64,
                lat: 35.68,
            })
            .collect();
        let station_index = stations
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let station_idx: Vec<usize> = (0..station_count).collect();
        let station_pos: HashMap<usize, usize> =
            station_idx.iter().map(|&i| (i, i)).collect();
        let line = Line {
            id: "JR-East.Test".to_string(),
            name: LocalizedName::default(),
            color: "#000000".to_string(),
            station_ids: stations.iter().map(|s| s.id.clone()).collect(),
            station_idx,
            station_pos,
            ascending: None,
            descending: None,
            shape: None,
        };
        Catalog {
            line_index: HashMap::from([(line.id.clone(), 0)]),
            lines: vec![line],
            stations,
            station_index,
            ranks: RwLock::new(HashMap::new()),
        }
    }

    fn raw_trip(id: &str, stops: &[(&str, Option<&str>, Option<&str>)]) -> RawTrip {
        RawTrip {
            id: id.to_string(),
            number: "1234G".to_string(),
            direction: Some("Outbound".to_string()),
            train_type: None,
            origin: vec![],
            destination: vec![],
            stops: stops
                .iter()
                .map(|(station, arr, dep)| RawStop {
                    station: station.to_string(),
                    arrival: arr.map(str::to_string),
                    departure: dep.map(str::to_string),
                })
                .collect(),
        }
    }

    #[test]
    fn parses_a_well_formed_trip() {
        let catalog = test_catalog(3);
        let trip = parse_trip(
            raw_trip(
                "JR-East.Test.1234G.Weekday",
                &[
                    ("JR-East.Test.S0", None, Some("08:00")),
                    ("JR-East.Test.S1", Some("08:03"), Some("08:04")),
                    ("JR-East.Test.S2", Some("08:07"), None),
                ],
            ),
            0,
            &catalog,
        )
        .unwrap();

        assert_eq!(trip.service_type, ServiceType::Weekday);
        assert_eq!(trip.normalized_number, "1234G");
        assert_eq!(trip.stops[0].departure, Some(28_800));
        assert_eq!(trip.stops[2].arrival, Some(29_220));
    }

    #[test]
    fn unknown_suffix_is_tagged_unknown() {
        assert_eq!(
            service_type_from_id("JR-East.Test.1234G.Special"),
            ServiceType::Unknown
        );
        assert_eq!(
            service_type_from_id("JR-East.Test.1234G.Holiday"),
            ServiceType::SaturdayHoliday
        );
    }

    #[test]
    fn rejects_non_monotonic_times() {
        let catalog = test_catalog(3);
        let err = parse_trip(
            raw_trip(
                "JR-East.Test.1234G.Weekday",
                &[
                    ("JR-East.Test.S0", None, Some("08:10")),
                    ("JR-East.Test.S1", Some("08:05"), None),
                ],
            ),
            0,
            &catalog,
        )
        .unwrap_err();
        assert!(err.contains("non-monotonic"));
    }

    #[test]
    fn rejects_unknown_station() {
        let catalog = test_catalog(2);
        let err = parse_trip(
            raw_trip(
                "JR-East.Test.1234G.Weekday",
                &[
                    ("JR-East.Test.S0", None, Some("08:00")),
                    ("JR-East.Test.Ghost", Some("08:05"), None),
                ],
            ),
            0,
            &catalog,
        )
        .unwrap_err();
        assert!(err.contains("unknown station"));
    }

    #[test]
    fn rejects_teleporting_trips() {
        let catalog = test_catalog(4);
        let err = parse_trip(
            raw_trip(
                "JR-East.Test.1234G.Weekday",
                &[
                    ("JR-East.Test.S0", None, Some("08:00")),
                    ("JR-East.Test.S2", Some("08:05"), None),
                ],
            ),
            0,
            &catalog,
        )
        .unwrap_err();
        assert!(err.contains("teleports"));
    }

    #[test]
    fn trips_crossing_midnight_stay_monotonic() {
        let catalog = test_catalog(3);
        let trip = parse_trip(
            raw_trip(
                "JR-East.Test.2400G.Weekday",
                &[
                    ("JR-East.Test.S0", None, Some("23:58")),
                    ("JR-East.Test.S1", Some("24:02"), Some("24:03")),
                    ("JR-East.Test.S2", Some("00:05"), None),
                ],
            ),
            0,
            &catalog,
        )
        .unwrap();
        assert_eq!(trip.stops[1].arrival, Some(86_520));
        assert_eq!(trip.stops[2].arrival, Some(86_700));
    }
}
