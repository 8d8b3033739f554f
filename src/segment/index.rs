//! Per-line time-indexed segment arrays. Built once from the timetable and
//! frozen; queries bound their linear scan with a coarse time-bucket table.

use std::collections::HashMap;

use tracing::info;

use crate::timetable::{ServiceType, TimetableStore};

use super::build::{build_trip_segments, Segment};

/// Width of one coarse time bucket in seconds.
const BUCKET_SECONDS: u32 = 300;

#[derive(Debug, Clone, Copy)]
pub struct ActiveTrain {
    pub trip: u32,
    /// Index of the covering segment in `LineSegments::segments`.
    pub segment: u32,
}

pub struct LineSegments {
    /// All segments of all trips on the line, sorted by start time (dwells
    /// before motions on ties so point-dwells win boundary instants).
    pub segments: Vec<Segment>,
    /// Per bucket, the `[lo, hi)` index range whose intervals may overlap
    /// that bucket.
    buckets: Vec<Option<(u32, u32)>>,
    /// Chronological segment indices per trip, for neighbor re-search when
    /// delay shifting moves a trip out of its scheduled segment.
    per_trip: HashMap<u32, Vec<u32>>,
}

impl LineSegments {
    fn build(mut segments: Vec<Segment>) -> Self {
        segments.sort_by_key(|s| (s.start, !s.is_dwell() as u8, s.trip, s.stop_idx));

        let max_end = segments
            .iter()
            .map(|s| s.end.max(s.start))
            .max()
            .unwrap_or(0);
        let mut buckets: Vec<Option<(u32, u32)>> =
            vec![None; (max_end / BUCKET_SECONDS) as usize + 1];

        let mut per_trip: HashMap<u32, Vec<u32>> = HashMap::new();
        for (i, seg) in segments.iter().enumerate() {
            per_trip.entry(seg.trip).or_default().push(i as u32);

            let first = seg.start / BUCKET_SECONDS;
            let last = seg.end.max(seg.start + 1).saturating_sub(1) / BUCKET_SECONDS;
            for b in first..=last {
                let slot = &mut buckets[b as usize];
                *slot = match *slot {
                    None => Some((i as u32, i as u32 + 1)),
                    Some((lo, hi)) => Some((lo.min(i as u32), hi.max(i as u32 + 1))),
                };
            }
        }

        Self {
            segments,
            buckets,
            per_trip,
        }
    }

    /// Every trip with a segment covering `t` on the given operating
    /// calendar, each with its unique covering segment. Trips with an
    /// unrecognized service type are never returned.
    pub fn trains_at(
        &self,
        t: u32,
        calendar: ServiceType,
        store: &TimetableStore,
    ) -> Vec<ActiveTrain> {
        let Some(&Some((lo, hi))) = self.buckets.get((t / BUCKET_SECONDS) as usize) else {
            return Vec::new();
        };

        let mut by_trip: HashMap<u32, u32> = HashMap::new();
        for i in lo..hi {
            let seg = &self.segments[i as usize];
            if !seg.contains(t) {
                continue;
            }
            let trip = store.trip(seg.trip);
            if trip.service_type != calendar || trip.service_type == ServiceType::Unknown {
                continue;
            }
            // A point-dwell and the motion leaving it can share an instant;
            // the dwell sorts first and wins.
            by_trip.entry(seg.trip).or_insert(i);
        }

        let mut active: Vec<ActiveTrain> = by_trip
            .into_iter()
            .map(|(trip, segment)| ActiveTrain { trip, segment })
            .collect();
        active.sort_by_key(|a| a.trip);
        active
    }

    /// Chronological segments of one trip.
    pub fn trip_segments(&self, trip: u32) -> &[u32] {
        self.per_trip.get(&trip).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Segment arrays for every line, index-aligned with `Catalog::lines`.
pub struct SegmentIndex {
    pub lines: Vec<LineSegments>,
}

impl SegmentIndex {
    pub fn build(store: &TimetableStore, line_count: usize) -> Self {
        let mut per_line: Vec<Vec<Segment>> = vec![Vec::new(); line_count];
        for (i, trip) in store.trips.iter().enumerate() {
            if trip.line < line_count {
                per_line[trip.line].extend(build_trip_segments(trip, i as u32));
            }
        }

        let lines: Vec<LineSegments> = per_line.into_iter().map(LineSegments::build).collect();
        info!(
            segments = lines.iter().map(|l| l.segments.len()).sum::<usize>(),
            "built segment index"
        );
        Self { lines }
    }

    pub fn line(&self, line_idx: usize) -> &LineSegments {
        &self.lines[line_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::{Direction, StopTime, TimetableTrip};

    fn trip(id: &str, line: usize, service_type: ServiceType, times: &[(u32, u32)]) -> TimetableTrip {
        TimetableTrip {
            id: id.to_string(),
            line,
            number: "100G".to_string(),
            normalized_number: "100G".to_string(),
            service_type,
            direction: Direction::Outbound,
            train_type: String::new(),
            origin: vec![],
            destination: vec![],
            stops: times
                .iter()
                .enumerate()
                .map(|(i, &(arr, dep))| StopTime {
                    station: i,
                    arrival: Some(arr),
                    departure: Some(dep),
                })
                .collect(),
        }
    }

    fn store() -> TimetableStore {
        TimetableStore::new(vec![
            trip(
                "JR-East.Test.100G.Weekday",
                0,
                ServiceType::Weekday,
                &[(28_800, 28_860), (28_920, 28_940), (29_000, 29_000)],
            ),
            trip(
                "JR-East.Test.102G.SaturdayHoliday",
                0,
                ServiceType::SaturdayHoliday,
                &[(28_800, 28_860), (28_920, 28_940), (29_000, 29_000)],
            ),
            trip(
                "JR-East.Test.900X.Unknown",
                0,
                ServiceType::Unknown,
                &[(28_800, 28_860), (28_920, 28_920)],
            ),
        ])
    }

    #[test]
    fn returns_exactly_one_segment_per_active_trip() {
        let store = store();
        let index = SegmentIndex::build(&store, 1);

        let active = index.line(0).trains_at(28_830, ServiceType::Weekday, &store);
        assert_eq!(active.len(), 1);
        let seg = index.line(0).segments[active[0].segment as usize];
        assert!(seg.is_dwell());
        assert!(seg.contains(28_830));
    }

    #[test]
    fn calendar_filters_trips() {
        let store = store();
        let index = SegmentIndex::build(&store, 1);

        let weekend = index
            .line(0)
            .trains_at(28_830, ServiceType::SaturdayHoliday, &store);
        assert_eq!(weekend.len(), 1);
        assert_eq!(store.trip(weekend[0].trip).service_type, ServiceType::SaturdayHoliday);
    }

    #[test]
    fn unknown_service_trips_are_never_served() {
        let store = store();
        let index = SegmentIndex::build(&store, 1);
        for t in [28_800, 28_830, 28_900] {
            let active = index.line(0).trains_at(t, ServiceType::Weekday, &store);
            assert!(active
                .iter()
                .all(|a| store.trip(a.trip).service_type == ServiceType::Weekday));
        }
    }

    #[test]
    fn out_of_range_instants_return_nothing() {
        let store = store();
        let index = SegmentIndex::build(&store, 1);
        assert!(index
            .line(0)
            .trains_at(120_000, ServiceType::Weekday, &store)
            .is_empty());
        assert!(index
            .line(0)
            .trains_at(10_000, ServiceType::Weekday, &store)
            .is_empty());
    }

    #[test]
    fn trip_segments_are_chronological() {
        let store = store();
        let index = SegmentIndex::build(&store, 1);
        let segs = index.line(0).trip_segments(0);
        assert_eq!(segs.len(), 5);
        let starts: Vec<u32> = segs
            .iter()
            .map(|&i| index.line(0).segments[i as usize].start)
            .collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
    }
}
