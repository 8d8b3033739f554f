//! The query-time position materializer: given a line and an instant, fuse
//! the segment index with the current delay set and project every active
//! trip onto the line geometry.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::catalog::shape::{self, ANCHOR_GUARD_M};
use crate::catalog::types::RankEntry;
use crate::catalog::{Catalog, Line};
use crate::error::QueryError;
use crate::fusion::FusedTripSet;
use crate::segment::index::LineSegments;
use crate::segment::{Segment, SegmentIndex, SegmentKind};
use crate::timetable::service_day::{effective_seconds, operating_calendar, service_date};
use crate::timetable::{TimetableStore, TimetableTrip};

use super::types::{GeoPoint, LineSnapshot, Quality, Status, TrainPosition};

pub struct QueryContext<'a> {
    pub catalog: &'a Catalog,
    pub store: &'a TimetableStore,
    pub segments: &'a SegmentIndex,
    /// The fused set snapshot taken at the start of the query; every trip
    /// in one answer reflects this same set.
    pub fused: &'a FusedTripSet,
    /// Rank-table snapshot held for the whole call, so admin edits land on
    /// the next query, not this one.
    pub ranks: &'a HashMap<usize, RankEntry>,
    pub holidays: &'a [NaiveDate],
    pub staleness: std::time::Duration,
    pub fusion_enabled: bool,
    pub deadline: Option<Instant>,
}

/// Per-trip delay offsets, zero for unmatched trips.
#[derive(Clone, Copy)]
struct Offsets<'a> {
    offsets: Option<&'a [i32]>,
}

impl Offsets<'_> {
    fn at(&self, stop: usize) -> i64 {
        self.offsets
            .and_then(|o| o.get(stop))
            .copied()
            .unwrap_or(0) as i64
    }
}

pub fn positions_at(
    ctx: &QueryContext<'_>,
    line_id: &str,
    at: DateTime<Tz>,
    now: DateTime<Utc>,
) -> Result<LineSnapshot, QueryError> {
    let &line_idx = ctx
        .catalog
        .line_index
        .get(line_id)
        .ok_or_else(|| QueryError::LineUnknown(line_id.to_string()))?;
    let line = &ctx.catalog.lines[line_idx];

    let stale = ctx.fusion_enabled && ctx.fused.is_stale(now, ctx.staleness);

    let t_signed = effective_seconds(at);
    if t_signed < 0 {
        return Ok(LineSnapshot {
            positions: Vec::new(),
            stale,
        });
    }
    let t = t_signed as u32;
    let calendar = operating_calendar(service_date(at), ctx.holidays);

    let line_segments = ctx.segments.line(line_idx);
    let active = line_segments.trains_at(t, calendar, ctx.store);

    let mut positions = Vec::with_capacity(active.len());
    for train in active {
        if ctx.deadline.is_some_and(|d| Instant::now() > d) {
            return Err(QueryError::Canceled);
        }
        if let Some(position) = materialize_trip(ctx, line, line_segments, train.trip, t, stale) {
            positions.push(position);
        }
    }

    // Stable order for client-side diffing.
    positions.sort_by(|a, b| {
        a.train_number
            .cmp(&b.train_number)
            .then_with(|| a.trip_id.cmp(&b.trip_id))
    });

    Ok(LineSnapshot { positions, stale })
}

/// Produce the single position a trip reports at `t`, or None once its
/// fused timeline has finished. Walks the trip's segments with delay
/// offsets and query-time dwell applied, so a shifted trip still lands on
/// exactly one segment.
fn materialize_trip(
    ctx: &QueryContext<'_>,
    line: &Line,
    line_segments: &LineSegments,
    trip_idx: u32,
    t: u32,
    stale: bool,
) -> Option<TrainPosition> {
    let trip = ctx.store.trip(trip_idx);
    let delays = ctx.fused.delays_for(trip_idx);
    let offsets = Offsets {
        offsets: delays.map(|d| d.offsets.as_slice()),
    };
    let suspect = delays.is_some_and(|d| d.suspect);
    let t = t as i64;

    let mut first_start: Option<i64> = None;
    let mut last_end = i64::MIN;
    let mut covering: Option<(&Segment, i64, i64)> = None;
    let mut next_after: Option<&Segment> = None;

    for &si in line_segments.trip_segments(trip_idx) {
        let seg = &line_segments.segments[si as usize];
        let (start, end) = effective_interval(ctx, trip, &offsets, seg);
        if first_start.is_none() {
            first_start = Some(start);
        }
        last_end = last_end.max(end);
        if (start <= t && t < end) || (start == end && t == start) {
            covering = Some((seg, start, end));
            break;
        }
        if start > t && next_after.is_none() {
            next_after = Some(seg);
        }
    }

    if let Some((seg, start, end)) = covering {
        return Some(match seg.kind {
            SegmentKind::Dwell { station } => {
                let delay = offsets.at(seg.stop_idx as usize);
                dwell_position(ctx, line, trip, station, Status::Stopped, delay, suspect, stale)
            }
            SegmentKind::Motion {
                from_station,
                to_station,
            } => {
                let delay = offsets.at(seg.stop_idx as usize + 1);
                if seg.invalid || end <= start {
                    motion_position(
                        ctx, line, trip, from_station, to_station, 0.0, Status::Invalid, delay,
                        suspect, stale,
                    )
                } else {
                    let progress = ((t - start) as f64 / (end - start) as f64).clamp(0.0, 1.0);
                    motion_position(
                        ctx, line, trip, from_station, to_station, progress, Status::Running,
                        delay, suspect, stale,
                    )
                }
            }
        });
    }

    // Delay shifting moved the whole fused timeline past `t`: the train is
    // still held at its first upcoming station.
    if first_start.is_some_and(|start| t < start) {
        let station = trip.stops[0].station;
        let delay = offsets.at(0);
        return Some(dwell_position(
            ctx,
            line,
            trip,
            station,
            Status::Stopped,
            delay,
            suspect,
            stale,
        ));
    }

    if t >= last_end {
        // Fused timeline already finished (early-running trip).
        return None;
    }

    // An interior gap cannot arise from monotone offsets; report the trip
    // rather than lose it.
    let station = next_after
        .map(|seg| match seg.kind {
            SegmentKind::Dwell { station } => station,
            SegmentKind::Motion { from_station, .. } => from_station,
        })
        .unwrap_or(trip.stops[0].station);
    Some(dwell_position(
        ctx,
        line,
        trip,
        station,
        Status::Unknown,
        0,
        suspect,
        stale,
    ))
}

/// A segment's interval with delay offsets and query-time dwell applied.
fn effective_interval(
    ctx: &QueryContext<'_>,
    trip: &TimetableTrip,
    offsets: &Offsets<'_>,
    seg: &Segment,
) -> (i64, i64) {
    let i = seg.stop_idx as usize;
    match seg.kind {
        SegmentKind::Dwell { .. } => {
            let start = trip.stops[i].arrival_or_departure() as i64 + offsets.at(i);
            let end = effective_departure(ctx, trip, i) as i64 + offsets.at(i);
            (start, end.max(start))
        }
        SegmentKind::Motion { .. } => {
            let start = effective_departure(ctx, trip, i) as i64 + offsets.at(i);
            let end = trip.stops[i + 1].arrival_or_departure() as i64 + offsets.at(i + 1);
            (start, end)
        }
    }
}

/// The departure actually used for segment boundaries. Timetables that
/// write `arrival == departure` (or an arrival only) get the station's
/// dwell time added, clamped so the following run keeps a positive
/// duration. Reading the rank table here makes admin dwell edits visible
/// on the next query without rebuilding the index.
fn effective_departure(ctx: &QueryContext<'_>, trip: &TimetableTrip, i: usize) -> u32 {
    let stop = &trip.stops[i];
    if i + 1 == trip.stops.len() {
        return stop.arrival.unwrap_or_else(|| stop.departure_or_arrival());
    }
    match (stop.arrival, stop.departure) {
        (Some(arr), Some(dep)) if dep > arr => dep,
        (Some(arr), _) => {
            let dwell = Catalog::dwell_secs(ctx.ranks, stop.station);
            let next_arr = trip.stops[i + 1].arrival_or_departure();
            (arr + dwell).min(next_arr)
        }
        (None, Some(dep)) => dep,
        (None, None) => stop.departure_or_arrival(),
    }
}

fn quality_for(status: Status, suspect: bool, stale: bool) -> Quality {
    if status == Status::Invalid {
        Quality::Rejected
    } else if suspect {
        Quality::Suspect
    } else if stale {
        Quality::Stale
    } else {
        Quality::Good
    }
}

fn display_number(trip: &TimetableTrip) -> String {
    if trip.normalized_number.is_empty() {
        trip.number.clone()
    } else {
        trip.normalized_number.clone()
    }
}

#[allow(clippy::too_many_arguments)]
fn dwell_position(
    ctx: &QueryContext<'_>,
    line: &Line,
    trip: &TimetableTrip,
    station: usize,
    status: Status,
    delay: i64,
    suspect: bool,
    stale: bool,
) -> TrainPosition {
    let st = ctx.catalog.station(station);
    let forward = trip.traverses_forward(&line.station_pos, line.station_idx.len());

    let bearing = line
        .shape
        .as_ref()
        .and_then(|shape| {
            let &pos = line.station_pos.get(&station)?;
            if shape.anchor_dist[pos] > ANCHOR_GUARD_M {
                return None;
            }
            let tangent = shape::tangent_at_vertex(shape, shape.anchors[pos]);
            Some(if forward {
                tangent
            } else {
                (tangent + 180.0) % 360.0
            })
        })
        .unwrap_or_else(|| chord_bearing_at_stop(ctx, trip, station));

    TrainPosition {
        train_number: display_number(trip),
        trip_id: trip.id.clone(),
        line: line.id.clone(),
        direction: trip.direction,
        status,
        station_id: Some(st.id.clone()),
        from_station_id: None,
        to_station_id: None,
        progress: None,
        location: GeoPoint {
            lat: st.lat,
            lon: st.lon,
            bearing,
        },
        delay: delay as i32,
        quality: quality_for(status, suspect, stale),
    }
}

#[allow(clippy::too_many_arguments)]
fn motion_position(
    ctx: &QueryContext<'_>,
    line: &Line,
    trip: &TimetableTrip,
    from_station: usize,
    to_station: usize,
    progress: f64,
    status: Status,
    delay: i64,
    suspect: bool,
    stale: bool,
) -> TrainPosition {
    let location = project_motion(ctx, line, from_station, to_station, progress);
    TrainPosition {
        train_number: display_number(trip),
        trip_id: trip.id.clone(),
        line: line.id.clone(),
        direction: trip.direction,
        status,
        station_id: None,
        from_station_id: Some(ctx.catalog.station(from_station).id.clone()),
        to_station_id: Some(ctx.catalog.station(to_station).id.clone()),
        progress: Some(progress),
        location,
        delay: delay as i32,
        quality: quality_for(status, suspect, stale),
    }
}

/// Project a moving train onto the line geometry by arc length between the
/// two stations' anchors; straight chord between station coordinates when
/// the shape is unusable.
fn project_motion(
    ctx: &QueryContext<'_>,
    line: &Line,
    from_station: usize,
    to_station: usize,
    progress: f64,
) -> GeoPoint {
    if let Some(shape) = &line.shape {
        if let (Some(&pa), Some(&pb)) = (
            line.station_pos.get(&from_station),
            line.station_pos.get(&to_station),
        ) {
            let anchors_usable = shape.anchor_dist[pa] <= ANCHOR_GUARD_M
                && shape.anchor_dist[pb] <= ANCHOR_GUARD_M
                && shape.anchors[pa] != shape.anchors[pb];
            if anchors_usable {
                let n = line.station_idx.len();
                let forward = if n > 0 && (pa + 1) % n == pb {
                    true
                } else if n > 0 && (pb + 1) % n == pa {
                    false
                } else {
                    pb > pa
                };
                let ((lon, lat), bearing) = shape::interpolate_between_anchors(
                    shape,
                    shape.anchors[pa],
                    shape.anchors[pb],
                    forward,
                    progress,
                );
                return GeoPoint { lat, lon, bearing };
            }
        }
    }

    let a = ctx.catalog.station(from_station);
    let b = ctx.catalog.station(to_station);
    GeoPoint {
        lat: a.lat + (b.lat - a.lat) * progress,
        lon: a.lon + (b.lon - a.lon) * progress,
        bearing: shape::bearing_degrees((a.lon, a.lat), (b.lon, b.lat)),
    }
}

/// Bearing fallback for a stopped train on a shapeless line: the chord
/// toward the next stop, or from the previous stop at the terminal.
fn chord_bearing_at_stop(ctx: &QueryContext<'_>, trip: &TimetableTrip, station: usize) -> f64 {
    let idx = trip.stops.iter().position(|s| s.station == station);
    let (from, to) = match idx {
        Some(i) if i + 1 < trip.stops.len() => (station, trip.stops[i + 1].station),
        Some(i) if i > 0 => (trip.stops[i - 1].station, station),
        _ => return 0.0,
    };
    let a = ctx.catalog.station(from);
    let b = ctx.catalog.station(to);
    shape::bearing_degrees((a.lon, a.lat), (b.lon, b.lat))
}
