use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Default dwell seconds per station rank, matching the operational
/// importance tags: S = giant terminal, A = major station, B = everything
/// else.
pub const DWELL_RANK_S: u32 = 50;
pub const DWELL_RANK_A: u32 = 35;
pub const DWELL_RANK_B: u32 = 20;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocalizedName {
    #[serde(default)]
    pub ja: String,
    #[serde(default)]
    pub en: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Rank {
    S,
    A,
    B,
}

impl Rank {
    pub fn default_dwell(&self) -> u32 {
        match self {
            Rank::S => DWELL_RANK_S,
            Rank::A => DWELL_RANK_A,
            Rank::B => DWELL_RANK_B,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RankEntry {
    pub rank: Rank,
    pub dwell_secs: u32,
}

impl Default for RankEntry {
    fn default() -> Self {
        Self {
            rank: Rank::B,
            dwell_secs: DWELL_RANK_B,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Station {
    pub id: String,
    pub name: LocalizedName,
    /// Lines passing through this station.
    pub line_ids: Vec<String>,
    pub lon: f64,
    pub lat: f64,
}

/// Stitched polyline geometry for one line, with the precomputed arrays the
/// position materializer interpolates over.
#[derive(Debug, Clone)]
pub struct LineShape {
    /// (lon, lat) vertices of the stitched polyline.
    pub points: Vec<(f64, f64)>,
    /// Cumulative arc length in meters, same length as `points`.
    pub cum_dist: Vec<f64>,
    /// Per line-station nearest vertex index, parallel to `Line::station_idx`.
    pub anchors: Vec<usize>,
    /// Distance in meters from each station to its anchor vertex.
    pub anchor_dist: Vec<f64>,
    /// Whether the polyline closes on itself (loop lines).
    pub closed_loop: bool,
}

impl LineShape {
    pub fn total_length(&self) -> f64 {
        *self.cum_dist.last().unwrap_or(&0.0)
    }
}

#[derive(Debug, Clone)]
pub struct Line {
    pub id: String,
    pub name: LocalizedName,
    pub color: String,
    /// Station ids in line order.
    pub station_ids: Vec<String>,
    /// Same stations as indices into `Catalog::stations`.
    pub station_idx: Vec<usize>,
    /// Position of each station index within this line's order.
    pub station_pos: HashMap<usize, usize>,
    pub ascending: Option<String>,
    pub descending: Option<String>,
    /// Absent when the shape failed validation; queries then fall back to
    /// straight chords between station coordinates.
    pub shape: Option<LineShape>,
}

impl Line {
    pub fn operator(&self) -> &str {
        self.id.split('.').next().unwrap_or("")
    }
}

/// The static catalog. Lines, stations and geometry are frozen after load;
/// only the rank table accepts admin writes.
#[derive(Debug)]
pub struct Catalog {
    pub lines: Vec<Line>,
    pub line_index: HashMap<String, usize>,
    pub stations: Vec<Station>,
    pub station_index: HashMap<String, usize>,
    /// Station index -> rank/dwell. Guarded so admin writes serialize with
    /// in-flight queries; queries hold a read guard for their whole call.
    pub ranks: RwLock<HashMap<usize, RankEntry>>,
}

impl Catalog {
    pub fn line(&self, id: &str) -> Option<&Line> {
        self.line_index.get(id).map(|&i| &self.lines[i])
    }

    pub fn station(&self, idx: usize) -> &Station {
        &self.stations[idx]
    }

    pub fn station_by_id(&self, id: &str) -> Option<&Station> {
        self.station_index.get(id).map(|&i| &self.stations[i])
    }

    /// Dwell seconds assumed for a station, from a rank-table snapshot.
    pub fn dwell_secs(ranks: &HashMap<usize, RankEntry>, station: usize) -> u32 {
        ranks
            .get(&station)
            .map(|e| e.dwell_secs)
            .unwrap_or(DWELL_RANK_B)
    }

    pub async fn set_rank(&self, station: usize, rank: Rank, dwell_secs: u32) {
        let mut ranks = self.ranks.write().await;
        ranks.insert(station, RankEntry { rank, dwell_secs });
    }
}
