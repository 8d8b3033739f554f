//! Turns a validated timetable trip into its dwell/motion segments.

use crate::timetable::TimetableTrip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Dwell { station: usize },
    Motion { from_station: usize, to_station: usize },
}

/// A half-open time interval `[start, end)` in effective seconds during
/// which one trip is either dwelling at a station or moving between two.
/// Zero-duration runs are kept but flagged invalid; zero-duration dwells are
/// legitimate point events (a stop the timetable gives no dwell at).
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Index into `TimetableStore::trips`.
    pub trip: u32,
    /// Stop position within the trip: the dwell's stop, or the motion's
    /// origin stop. Drives per-stop delay offsets.
    pub stop_idx: u16,
    pub kind: SegmentKind,
    pub start: u32,
    pub end: u32,
    pub invalid: bool,
}

impl Segment {
    /// Half-open containment, with the degenerate zero-length interval
    /// matching exactly its instant so point-dwells stay observable.
    pub fn contains(&self, t: u32) -> bool {
        (self.start <= t && t < self.end) || (self.start == self.end && t == self.start)
    }

    pub fn is_dwell(&self) -> bool {
        matches!(self.kind, SegmentKind::Dwell { .. })
    }
}

/// One dwell per stop and one motion per adjacent-stop pair, in strict time
/// order. Stop times were validated at load, so only zero-duration runs can
/// remain degenerate here.
pub fn build_trip_segments(trip: &TimetableTrip, trip_idx: u32) -> Vec<Segment> {
    let stops = &trip.stops;
    let mut segments = Vec::with_capacity(stops.len() * 2);

    for (i, stop) in stops.iter().enumerate() {
        let arr = stop.arrival_or_departure();
        let dep = if i + 1 == stops.len() {
            // The trip ends at its last arrival.
            stop.arrival.unwrap_or_else(|| stop.departure_or_arrival())
        } else {
            stop.departure_or_arrival()
        };

        segments.push(Segment {
            trip: trip_idx,
            stop_idx: i as u16,
            kind: SegmentKind::Dwell {
                station: stop.station,
            },
            start: arr,
            end: dep,
            invalid: false,
        });

        if i + 1 < stops.len() {
            let next = &stops[i + 1];
            let next_arr = next.arrival_or_departure();
            segments.push(Segment {
                trip: trip_idx,
                stop_idx: i as u16,
                kind: SegmentKind::Motion {
                    from_station: stop.station,
                    to_station: next.station,
                },
                start: dep,
                end: next_arr,
                invalid: next_arr == dep,
            });
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::{Direction, ServiceType, StopTime, TimetableTrip};

    fn trip(stops: Vec<StopTime>) -> TimetableTrip {
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
            stops,
        }
    }

    fn st(station: usize, arrival: Option<u32>, departure: Option<u32>) -> StopTime {
        StopTime {
            station,
            arrival,
            departure,
        }
    }

    #[test]
    fn segments_cover_the_trip_with_no_gaps() {
        let trip = trip(vec![
            st(0, Some(28_800), Some(28_860)),
            st(1, Some(28_920), Some(28_940)),
            st(2, Some(29_000), None),
        ]);
        let segments = build_trip_segments(&trip, 0);

        assert_eq!(segments.len(), 5);
        assert_eq!(segments[0].start, trip.first_arrival());
        assert_eq!(segments.last().unwrap().end, trip.last_arrival());
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(segments.iter().all(|s| !s.invalid));
    }

    #[test]
    fn departure_instant_belongs_to_the_motion() {
        let trip = trip(vec![
            st(0, Some(28_800), Some(28_860)),
            st(1, Some(28_920), None),
        ]);
        let segments = build_trip_segments(&trip, 0);

        let at_departure: Vec<&Segment> =
            segments.iter().filter(|s| s.contains(28_860)).collect();
        assert_eq!(at_departure.len(), 1);
        assert!(matches!(
            at_departure[0].kind,
            SegmentKind::Motion { .. }
        ));
    }

    #[test]
    fn zero_duration_run_is_flagged_invalid() {
        let trip = trip(vec![
            st(0, Some(28_800), Some(28_860)),
            st(1, Some(28_860), None),
        ]);
        let segments = build_trip_segments(&trip, 0);
        let motion = segments.iter().find(|s| !s.is_dwell()).unwrap();
        assert!(motion.invalid);
        assert_eq!(motion.start, motion.end);
    }

    #[test]
    fn point_dwell_matches_only_its_instant() {
        let trip = trip(vec![
            st(0, None, Some(28_800)),
            st(1, Some(28_860), Some(28_860)),
            st(2, Some(28_920), None),
        ]);
        let segments = build_trip_segments(&trip, 0);
        let dwell = segments
            .iter()
            .find(|s| s.is_dwell() && s.stop_idx == 1)
            .unwrap();
        assert!(dwell.contains(28_860));
        assert!(!dwell.contains(28_861));
    }
}
