use std::collections::HashMap;

use serde::Serialize;

/// Operating calendar a trip belongs to, inferred from the trip id suffix.
/// `Unknown` trips are kept in the store but never served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceType {
    Weekday,
    SaturdayHoliday,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    OuterLoop,
    InnerLoop,
    Inbound,
    Outbound,
    Unknown,
}

impl Direction {
    pub fn parse(value: &str) -> Self {
        match value {
            "OuterLoop" => Direction::OuterLoop,
            "InnerLoop" => Direction::InnerLoop,
            "Inbound" => Direction::Inbound,
            "Outbound" => Direction::Outbound,
            _ => Direction::Unknown,
        }
    }
}

/// One scheduled stop, in effective seconds since the service-day midnight.
/// First stops usually carry only a departure and last stops only an
/// arrival, mirroring the source timetables.
#[derive(Debug, Clone, Copy)]
pub struct StopTime {
    /// Index into `Catalog::stations`.
    pub station: usize,
    pub arrival: Option<u32>,
    pub departure: Option<u32>,
}

impl StopTime {
    pub fn arrival_or_departure(&self) -> u32 {
        self.arrival.or(self.departure).unwrap_or(0)
    }

    pub fn departure_or_arrival(&self) -> u32 {
        self.departure.or(self.arrival).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct TimetableTrip {
    /// Full source id, e.g. `JR-East.Yamanote.1234G.Weekday`.
    pub id: String,
    /// Index into `Catalog::lines`.
    pub line: usize,
    /// Train number as written in the timetable, e.g. `1234G`.
    pub number: String,
    /// Number after trip-id normalization, the GTFS-RT match key.
    pub normalized_number: String,
    pub service_type: ServiceType,
    pub direction: Direction,
    pub train_type: String,
    /// Terminal stations; trips that split keep every entry but only the
    /// first drives motion segments.
    pub origin: Vec<usize>,
    pub destination: Vec<usize>,
    pub stops: Vec<StopTime>,
}

impl TimetableTrip {
    pub fn first_arrival(&self) -> u32 {
        self.stops
            .first()
            .map(|s| s.arrival_or_departure())
            .unwrap_or(0)
    }

    pub fn last_arrival(&self) -> u32 {
        self.stops
            .last()
            .map(|s| s.arrival_or_departure())
            .unwrap_or(0)
    }

    /// Whether the trip traverses its line in increasing station order.
    /// Decided from the first adjacent stop pair (loop-aware: the seam pair
    /// last->first counts as forward).
    pub fn traverses_forward(&self, station_pos: &HashMap<usize, usize>, n_stations: usize) -> bool {
        for pair in self.stops.windows(2) {
            let (Some(&a), Some(&b)) = (
                station_pos.get(&pair[0].station),
                station_pos.get(&pair[1].station),
            ) else {
                continue;
            };
            if n_stations > 0 && (a + 1) % n_stations == b {
                return true;
            }
            if n_stations > 0 && (b + 1) % n_stations == a {
                return false;
            }
            return b > a;
        }
        true
    }
}

pub struct TimetableStore {
    pub trips: Vec<TimetableTrip>,
    /// Trip indices per line.
    pub by_line: HashMap<usize, Vec<u32>>,
    /// Trip indices per (normalized number, calendar), the GTFS-RT match
    /// table. Many-to-one per calendar is possible and tiebroken at match
    /// time.
    pub by_number: HashMap<(String, ServiceType), Vec<u32>>,
}

impl TimetableStore {
    pub fn new(trips: Vec<TimetableTrip>) -> Self {
        let mut by_line: HashMap<usize, Vec<u32>> = HashMap::new();
        let mut by_number: HashMap<(String, ServiceType), Vec<u32>> = HashMap::new();
        for (i, trip) in trips.iter().enumerate() {
            by_line.entry(trip.line).or_default().push(i as u32);
            if trip.service_type != ServiceType::Unknown && !trip.normalized_number.is_empty() {
                by_number
                    .entry((trip.normalized_number.clone(), trip.service_type))
                    .or_default()
                    .push(i as u32);
            }
        }
        Self {
            trips,
            by_line,
            by_number,
        }
    }

    pub fn trip(&self, idx: u32) -> &TimetableTrip {
        &self.trips[idx as usize]
    }
}
