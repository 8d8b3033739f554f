//! Loads the three static JSON artifacts (lines, stations, per-line shape
//! coordinates) and assembles the in-memory catalog.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::BoundingBox;
use crate::error::DataLoadError;

use super::shape;
use super::types::{Catalog, Line, LocalizedName, Rank, RankEntry, Station};

#[derive(Debug, Deserialize)]
struct RawRailway {
    id: String,
    #[serde(default)]
    title: LocalizedName,
    #[serde(default)]
    color: String,
    #[serde(default)]
    stations: Vec<String>,
    #[serde(default)]
    ascending: Option<String>,
    #[serde(default)]
    descending: Option<String>,
}

/// `railway` appears both as a single id and as an id array in the source
/// data; the first entry wins.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRailwayRef {
    One(String),
    Many(Vec<String>),
}

impl RawRailwayRef {
    fn into_vec(self) -> Vec<String> {
        match self {
            RawRailwayRef::One(id) => vec![id],
            RawRailwayRef::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStation {
    id: String,
    railway: RawRailwayRef,
    #[serde(default)]
    title: LocalizedName,
    coord: Option<Vec<f64>>,
    #[serde(default)]
    rank: Option<Rank>,
    #[serde(default, rename = "dwellTime")]
    dwell_time: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawCoordinates {
    #[serde(default)]
    railways: Vec<RawRailwayShape>,
}

#[derive(Debug, Deserialize)]
struct RawRailwayShape {
    id: String,
    #[serde(default)]
    sublines: Vec<RawSubline>,
}

#[derive(Debug, Deserialize)]
struct RawSubline {
    #[serde(default)]
    coords: Vec<Vec<f64>>,
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    if !path.exists() {
        return Err(DataLoadError::Missing(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| DataLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| DataLoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_catalog(data_dir: &Path, bbox: &BoundingBox) -> Result<Catalog, DataLoadError> {
    let railways: Vec<RawRailway> = load_json(&data_dir.join("railways.json"))?;
    let stations: Vec<RawStation> = load_json(&data_dir.join("stations.json"))?;
    let coordinates: RawCoordinates = load_json(&data_dir.join("coordinates.json"))?;
    assemble(railways, stations, coordinates, bbox)
}

/// Optional list of public holidays (`YYYY-MM-DD`). A missing file means no
/// configured holidays.
pub fn load_holidays(data_dir: &Path) -> Result<Vec<NaiveDate>, DataLoadError> {
    let path = data_dir.join("holidays.json");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw: Vec<String> = load_json(&path)?;
    let mut holidays = Vec::with_capacity(raw.len());
    for entry in raw {
        match NaiveDate::parse_from_str(&entry, "%Y-%m-%d") {
            Ok(date) => holidays.push(date),
            Err(_) => warn!(entry, "ignoring unparseable holiday date"),
        }
    }
    Ok(holidays)
}

fn assemble(
    railways: Vec<RawRailway>,
    raw_stations: Vec<RawStation>,
    coordinates: RawCoordinates,
    bbox: &BoundingBox,
) -> Result<Catalog, DataLoadError> {
    let mut stations: Vec<Station> = Vec::new();
    let mut station_index: HashMap<String, usize> = HashMap::new();
    let mut ranks: HashMap<usize, RankEntry> = HashMap::new();
    // Ids seen in stations.json, including entries rejected below. Lets us
    // tell a bbox-rejected station apart from an id that never existed.
    let mut seen_station_ids: HashMap<String, bool> = HashMap::new();

    for raw in raw_stations {
        let coord = match raw.coord.as_deref() {
            Some([lon, lat, ..]) => (*lon, *lat),
            _ => {
                warn!(station = %raw.id, "station has no coordinate, rejecting");
                seen_station_ids.insert(raw.id, false);
                continue;
            }
        };

        if !bbox.contains(coord.0, coord.1) {
            warn!(
                station = %raw.id,
                lon = coord.0,
                lat = coord.1,
                "station coordinate outside bounding box, rejecting"
            );
            seen_station_ids.insert(raw.id, false);
            continue;
        }

        let idx = stations.len();
        if let Some(rank) = raw.rank {
            let dwell_secs = raw.dwell_time.unwrap_or_else(|| rank.default_dwell());
            ranks.insert(idx, RankEntry { rank, dwell_secs });
        } else if let Some(dwell_secs) = raw.dwell_time {
            ranks.insert(
                idx,
                RankEntry {
                    rank: Rank::B,
                    dwell_secs,
                },
            );
        }

        seen_station_ids.insert(raw.id.clone(), true);
        station_index.insert(raw.id.clone(), idx);
        stations.push(Station {
            id: raw.id,
            name: raw.title,
            line_ids: raw.railway.into_vec(),
            lon: coord.0,
            lat: coord.1,
        });
    }

    let shapes_by_line: HashMap<String, Vec<Vec<(f64, f64)>>> = coordinates
        .railways
        .into_iter()
        .map(|entry| {
            let sublines = entry
                .sublines
                .into_iter()
                .map(|sl| {
                    sl.coords
                        .into_iter()
                        .filter_map(|c| match c.as_slice() {
                            [lon, lat, ..] => Some((*lon, *lat)),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
            (entry.id, sublines)
        })
        .collect();

    let mut lines: Vec<Line> = Vec::new();
    let mut line_index: HashMap<String, usize> = HashMap::new();

    for raw in railways {
        let mut station_ids = Vec::with_capacity(raw.stations.len());
        let mut station_idx = Vec::with_capacity(raw.stations.len());
        for sid in raw.stations {
            match station_index.get(&sid) {
                Some(&idx) => {
                    station_ids.push(sid);
                    station_idx.push(idx);
                }
                None => {
                    if seen_station_ids.contains_key(&sid) {
                        // Present in stations.json but rejected above.
                        warn!(line = %raw.id, station = %sid, "dropping rejected station from line order");
                    } else {
                        return Err(DataLoadError::UnknownStation {
                            line: raw.id,
                            station: sid,
                        });
                    }
                }
            }
        }

        let station_pos: HashMap<usize, usize> = station_idx
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();

        let line_shape = match shapes_by_line.get(&raw.id) {
            Some(sublines) => {
                let coords: Vec<(f64, f64)> = station_idx
                    .iter()
                    .map(|&i| (stations[i].lon, stations[i].lat))
                    .collect();
                match build_validated_shape(sublines, &coords, bbox) {
                    Some(shape) => Some(shape),
                    None => {
                        warn!(line = %raw.id, "invalid shape, serving line without geometry");
                        None
                    }
                }
            }
            None => {
                warn!(line = %raw.id, "no shape entry, serving line without geometry");
                None
            }
        };

        let idx = lines.len();
        line_index.insert(raw.id.clone(), idx);
        lines.push(Line {
            id: raw.id,
            name: raw.title,
            color: raw.color,
            station_ids,
            station_idx,
            station_pos,
            ascending: raw.ascending,
            descending: raw.descending,
            shape: line_shape,
        });
    }

    info!(
        lines = lines.len(),
        stations = stations.len(),
        "loaded static catalog"
    );

    Ok(Catalog {
        lines,
        line_index,
        stations,
        station_index,
        ranks: RwLock::new(ranks),
    })
}

fn build_validated_shape(
    sublines: &[Vec<(f64, f64)>],
    station_coords: &[(f64, f64)],
    bbox: &BoundingBox,
) -> Option<super::types::LineShape> {
    if sublines
        .iter()
        .flatten()
        .any(|&(lon, lat)| !bbox.contains(lon, lat))
    {
        return None;
    }
    shape::build_shape(sublines, station_coords)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Vec<RawRailway>, Vec<RawStation>, RawCoordinates) {
        let railways = serde_json::from_str(
            r##"[{
                "id": "JR-East.TestLoop",
                "title": {"ja": "試験線", "en": "Test Loop"},
                "color": "#80C241",
                "stations": ["JR-East.TestLoop.A", "JR-East.TestLoop.B"]
            }]"##,
        )
        .unwrap();
        let stations = serde_json::from_str(
            r#"[
                {"id": "JR-East.TestLoop.A", "railway": "JR-East.TestLoop",
                 "title": {"ja": "甲", "en": "A"}, "coord": [139.70, 35.68],
                 "rank": "S", "dwellTime": 50},
                {"id": "JR-East.TestLoop.B", "railway": ["JR-East.TestLoop"],
                 "title": {"ja": "乙", "en": "B"}, "coord": [139.71, 35.68]}
            ]"#,
        )
        .unwrap();
        let coordinates = serde_json::from_str(
            r#"{"railways": [{
                "id": "JR-East.TestLoop",
                "sublines": [{"coords": [[139.70, 35.68], [139.705, 35.68]]},
                             {"coords": [[139.71, 35.68], [139.705, 35.68]]}]
            }]}"#,
        )
        .unwrap();
        (railways, stations, coordinates)
    }

    #[test]
    fn assembles_lines_stations_and_shape() {
        let (railways, stations, coordinates) = fixture();
        let catalog = assemble(railways, stations, coordinates, &BoundingBox::default()).unwrap();

        let line = catalog.line("JR-East.TestLoop").unwrap();
        assert_eq!(line.station_idx.len(), 2);
        assert_eq!(line.operator(), "JR-East");

        let shape = line.shape.as_ref().unwrap();
        // Second subline arrives reversed and is flipped during stitching.
        assert_eq!(shape.points.len(), 4);
        assert_eq!(shape.anchors, vec![0, 2]);

        let ranks = catalog.ranks.try_read().unwrap();
        assert_eq!(Catalog::dwell_secs(&ranks, 0), 50);
        assert_eq!(Catalog::dwell_secs(&ranks, 1), 20);
    }

    #[test]
    fn out_of_bounds_station_is_rejected_not_fatal() {
        let (railways, mut stations, coordinates) = fixture();
        stations[1].coord = Some(vec![0.0, 51.5]);
        let catalog = assemble(railways, stations, coordinates, &BoundingBox::default()).unwrap();
        assert_eq!(catalog.stations.len(), 1);
        let line = catalog.line("JR-East.TestLoop").unwrap();
        assert_eq!(line.station_idx.len(), 1);
    }

    #[test]
    fn unknown_station_reference_is_fatal() {
        let (mut railways, stations, coordinates) = fixture();
        railways[0].stations.push("JR-East.TestLoop.Ghost".to_string());
        let err = assemble(railways, stations, coordinates, &BoundingBox::default()).unwrap_err();
        assert!(matches!(err, DataLoadError::UnknownStation { .. }));
    }
}
