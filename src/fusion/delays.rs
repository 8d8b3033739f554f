//! Builds per-stop delay offset arrays from GTFS-RT `StopTimeUpdate`s.

use gtfs_realtime::trip_update::StopTimeUpdate;

use crate::catalog::Catalog;
use crate::timetable::TimetableTrip;

use super::types::TripDelays;

/// Accepted offset range in seconds. Values outside are clamped and the
/// trip is tagged suspect.
pub const OFFSET_MIN: i32 = -600;
pub const OFFSET_MAX: i32 = 7200;

fn is_skipped(stu: &StopTimeUpdate) -> bool {
    stu.schedule_relationship
        == Some(gtfs_realtime::trip_update::stop_time_update::ScheduleRelationship::Skipped as i32)
}

fn update_delay(stu: &StopTimeUpdate) -> Option<i32> {
    stu.arrival
        .as_ref()
        .and_then(|e| e.delay)
        .or_else(|| stu.departure.as_ref().and_then(|e| e.delay))
}

/// Build the offset schedule for one matched trip.
///
/// An update addresses a stop by sequence (1-based) or by stop id; stops the
/// feed does not mention take the offset of the previous mentioned stop
/// (zero before the first mention). Offsets never decrease along the trip:
/// a smaller later value is raised to the earlier one.
pub fn build_offsets(
    trip: &TimetableTrip,
    updates: &[StopTimeUpdate],
    catalog: &Catalog,
) -> TripDelays {
    let len = trip.stops.len();
    let mut sparse: Vec<Option<i32>> = vec![None; len];
    // Loop trips revisit stations; id-addressed updates resolve to the
    // first occurrence at or after the previously addressed stop.
    let mut search_from = 0usize;

    for stu in updates {
        if is_skipped(stu) {
            continue;
        }
        let Some(delay) = update_delay(stu) else {
            continue;
        };

        let idx = resolve_stop_index(trip, stu, catalog, search_from);
        if let Some(idx) = idx {
            sparse[idx] = Some(delay);
            search_from = idx;
        }
    }

    let mut offsets = vec![0i32; len];
    let mut suspect = false;
    let mut carried = 0i32;
    for i in 0..len {
        if let Some(mentioned) = sparse[i] {
            carried = mentioned;
        }
        let mut value = carried;
        if !(OFFSET_MIN..=OFFSET_MAX).contains(&value) {
            value = value.clamp(OFFSET_MIN, OFFSET_MAX);
            suspect = true;
        }
        if i > 0 && value < offsets[i - 1] {
            value = offsets[i - 1];
        }
        offsets[i] = value;
    }

    TripDelays { offsets, suspect }
}

fn resolve_stop_index(
    trip: &TimetableTrip,
    stu: &StopTimeUpdate,
    catalog: &Catalog,
    search_from: usize,
) -> Option<usize> {
    if let Some(stop_id) = stu.stop_id.as_deref() {
        if let Some(&station) = catalog.station_index.get(stop_id) {
            if let Some(pos) = trip.stops[search_from..]
                .iter()
                .position(|s| s.station == station)
            {
                return Some(search_from + pos);
            }
        }
    }
    if let Some(seq) = stu.stop_sequence {
        let idx = (seq as usize).checked_sub(1)?;
        if idx < trip.stops.len() {
            return Some(idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::{Direction, ServiceType, StopTime, TimetableTrip};
    use gtfs_realtime::trip_update::{StopTimeEvent, StopTimeUpdate};
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    fn trip(n_stops: usize) -> TimetableTrip {
        TimetableTrip {
            id: "JR-East.Test.100G.Weekday".to_string(),
            line: 0,
            number: "100G".to_string(),
            normalized_number: "100G".to_string(),
            service_type: ServiceType::Weekday,
            direction: Direction::Outbound,
            train_type: String::new(),
            origin: vec![],
            destination: vec![],
            stops: (0..n_stops)
                .map(|i| StopTime {
                    station: i,
                    arrival: Some(28_800 + 120 * i as u32),
                    departure: Some(28_820 + 120 * i as u32),
                })
                .collect(),
        }
    }

    fn empty_catalog() -> Catalog {
        Catalog {
            lines: vec![],
            line_index: HashMap::new(),
            stations: vec![],
            station_index: HashMap::new(),
            ranks: RwLock::new(HashMap::new()),
        }
    }

    fn stu(seq: u32, delay: i32) -> StopTimeUpdate {
        StopTimeUpdate {
            stop_sequence: Some(seq),
            arrival: Some(StopTimeEvent {
                delay: Some(delay),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn forward_fills_unmentioned_stops() {
        let trip = trip(5);
        let delays = build_offsets(&trip, &[stu(2, 60), stu(4, 90)], &empty_catalog());
        assert_eq!(delays.offsets, vec![0, 60, 60, 90, 90]);
        assert!(!delays.suspect);
    }

    #[test]
    fn later_smaller_offsets_are_raised() {
        let trip = trip(4);
        let delays = build_offsets(&trip, &[stu(1, 120), stu(3, 30)], &empty_catalog());
        assert_eq!(delays.offsets, vec![120, 120, 120, 120]);
    }

    #[test]
    fn offsets_are_monotone_non_decreasing() {
        let trip = trip(6);
        let delays = build_offsets(
            &trip,
            &[stu(1, 300), stu(2, 60), stu(5, 45)],
            &empty_catalog(),
        );
        for pair in delays.offsets.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn out_of_range_offsets_clamp_and_mark_suspect() {
        let trip = trip(3);
        let delays = build_offsets(&trip, &[stu(1, 90_000)], &empty_catalog());
        assert_eq!(delays.offsets, vec![OFFSET_MAX, OFFSET_MAX, OFFSET_MAX]);
        assert!(delays.suspect);

        let early = build_offsets(&trip, &[stu(2, -5_000)], &empty_catalog());
        assert_eq!(early.offsets[1], OFFSET_MIN);
        assert!(early.suspect);
    }

    #[test]
    fn skipped_stops_are_bridged_by_forward_fill() {
        let trip = trip(4);
        let mut skipped = stu(3, 999);
        skipped.schedule_relationship = Some(
            gtfs_realtime::trip_update::stop_time_update::ScheduleRelationship::Skipped as i32,
        );
        let delays = build_offsets(&trip, &[stu(2, 60), skipped], &empty_catalog());
        assert_eq!(delays.offsets, vec![0, 60, 60, 60]);
    }

    #[test]
    fn departure_delay_is_used_when_arrival_is_absent(){
        let trip = trip(2);
        let update = StopTimeUpdate {
            stop_sequence: Some(1),
            departure: Some(StopTimeEvent {
                delay: Some(45),
                ..Default::default()
            }),
            ..Default::default()
        };
        let delays = build_offsets(&trip, &[update], &empty_catalog());
        assert_eq!(delays.offsets, vec![45, 45]);
    }
}
