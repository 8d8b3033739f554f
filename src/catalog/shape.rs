//! Polyline geometry for a line: subline stitching, arc-length bookkeeping
//! and the interpolation used to place moving trains on the track.

use super::types::LineShape;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A station further than this from its nearest shape vertex cannot be
/// trusted as an interpolation anchor; motion falls back to straight chords.
pub const ANCHOR_GUARD_M: f64 = 500.0;

/// Endpoints closer than this make the polyline a closed loop.
const LOOP_CLOSE_M: f64 = 10.0;

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing in degrees [0, 360) from one (lon, lat) point to another.
pub fn bearing_degrees(from: (f64, f64), to: (f64, f64)) -> f64 {
    let lat1 = from.1.to_radians();
    let lat2 = to.1.to_radians();
    let delta_lon = (to.0 - from.0).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Walk the sublines in order, reversing any subline whose far end is closer
/// to the last stitched endpoint, and concatenate into one polyline. The
/// comparison uses squared planar distance on raw coordinates, which is all
/// the orientation decision needs.
pub fn stitch_sublines(sublines: &[Vec<(f64, f64)>]) -> Vec<(f64, f64)> {
    let mut merged: Vec<(f64, f64)> = Vec::new();
    let mut previous_end: Option<(f64, f64)> = None;

    for subline in sublines {
        if subline.is_empty() {
            continue;
        }

        let mut coords: Vec<(f64, f64)> = subline.clone();
        if let Some(prev) = previous_end {
            let first = coords[0];
            let last = coords[coords.len() - 1];
            let dist_to_first = (first.0 - prev.0).powi(2) + (first.1 - prev.1).powi(2);
            let dist_to_last = (last.0 - prev.0).powi(2) + (last.1 - prev.1).powi(2);
            if dist_to_last < dist_to_first {
                coords.reverse();
            }
        }

        previous_end = coords.last().copied();
        merged.extend(coords);
    }

    merged
}

fn nearest_vertex(points: &[(f64, f64)], lon: f64, lat: f64) -> (usize, f64) {
    let mut best_idx = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &(plon, plat)) in points.iter().enumerate() {
        let d = haversine_distance(lat, lon, plat, plon);
        if d < best_dist {
            best_dist = d;
            best_idx = i;
        }
    }
    (best_idx, best_dist)
}

/// Build the stitched shape for a line. `station_coords` are the (lon, lat)
/// of the line's stations in line order. Returns None when fewer than two
/// vertices survive stitching.
pub fn build_shape(
    sublines: &[Vec<(f64, f64)>],
    station_coords: &[(f64, f64)],
) -> Option<LineShape> {
    let points = stitch_sublines(sublines);
    if points.len() < 2 {
        return None;
    }

    let mut cum_dist = Vec::with_capacity(points.len());
    cum_dist.push(0.0);
    for w in points.windows(2) {
        let d = haversine_distance(w[0].1, w[0].0, w[1].1, w[1].0);
        cum_dist.push(cum_dist.last().unwrap() + d);
    }

    let mut anchors = Vec::with_capacity(station_coords.len());
    let mut anchor_dist = Vec::with_capacity(station_coords.len());
    for &(lon, lat) in station_coords {
        let (idx, dist) = nearest_vertex(&points, lon, lat);
        anchors.push(idx);
        anchor_dist.push(dist);
    }

    let first = points[0];
    let last = points[points.len() - 1];
    let closed_loop = haversine_distance(first.1, first.0, last.1, last.0) < LOOP_CLOSE_M;

    Some(LineShape {
        points,
        cum_dist,
        anchors,
        anchor_dist,
        closed_loop,
    })
}

/// The point and tangent bearing at an arc-length distance along the
/// polyline. `dist` is clamped into [0, total].
pub fn point_at_distance(shape: &LineShape, dist: f64) -> ((f64, f64), f64) {
    let total = shape.total_length();
    let dist = dist.clamp(0.0, total);

    // First segment whose far end reaches `dist`.
    let hi = shape.cum_dist.partition_point(|&d| d < dist);
    let j = hi.clamp(1, shape.points.len() - 1);

    let seg_start = shape.cum_dist[j - 1];
    let seg_end = shape.cum_dist[j];
    let p0 = shape.points[j - 1];
    let p1 = shape.points[j];

    let bearing = bearing_degrees(p0, p1);
    if seg_end <= seg_start {
        return (p0, bearing);
    }

    let ratio = (dist - seg_start) / (seg_end - seg_start);
    let lon = p0.0 + (p1.0 - p0.0) * ratio;
    let lat = p0.1 + (p1.1 - p0.1) * ratio;
    ((lon, lat), bearing)
}

/// Tangent bearing of the polyline at a vertex, in the polyline's own
/// forward orientation.
pub fn tangent_at_vertex(shape: &LineShape, vertex: usize) -> f64 {
    let n = shape.points.len();
    if vertex + 1 < n {
        bearing_degrees(shape.points[vertex], shape.points[vertex + 1])
    } else {
        bearing_degrees(shape.points[n - 2], shape.points[n - 1])
    }
}

/// Interpolate between two anchor vertices by arc length.
///
/// For closed loops the path follows the traversal orientation (`forward`
/// meaning increasing station order, which is also increasing arc length),
/// wrapping across the seam where the motion bridges the last-listed station
/// back to the first. Returns the (lon, lat) point and the bearing of travel.
pub fn interpolate_between_anchors(
    shape: &LineShape,
    anchor_from: usize,
    anchor_to: usize,
    forward: bool,
    progress: f64,
) -> ((f64, f64), f64) {
    let total = shape.total_length();
    let dist_a = shape.cum_dist[anchor_from];
    let dist_b = shape.cum_dist[anchor_to];
    let progress = progress.clamp(0.0, 1.0);

    let (target, moving_forward) = if shape.closed_loop && total > 0.0 {
        if forward {
            let gap = (dist_b - dist_a).rem_euclid(total);
            ((dist_a + progress * gap).rem_euclid(total), true)
        } else {
            let gap = (dist_a - dist_b).rem_euclid(total);
            ((dist_a - progress * gap).rem_euclid(total), false)
        }
    } else {
        (
            dist_a + progress * (dist_b - dist_a),
            dist_b >= dist_a,
        )
    };

    let (point, tangent) = point_at_distance(shape, target);
    let bearing = if moving_forward {
        tangent
    } else {
        (tangent + 180.0) % 360.0
    };
    (point, bearing)
}
