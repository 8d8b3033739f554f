//! Matching GTFS-RT trip identifiers to timetable trips.
//!
//! The feed's trip ids are operator-specific: an optional `<digits>:`
//! routing prefix, an optional 4-digit operator prefix, then the train
//! number proper (3-4 digits and one letter). `"1:1111406H"` and
//! `"4200406H"` both normalize to `"406H"`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::Catalog;
use crate::segment::{SegmentIndex, SegmentKind};
use crate::timetable::{Direction, TimetableStore};

lazy_static! {
    static ref FEED_PREFIX_REGEX: Regex = Regex::new(r"^\d+:").unwrap();
    static ref TRAIN_NUMBER_REGEX: Regex =
        Regex::new(r"^(?:\d{4})?(0*)([0-9]\d{0,3})([A-Za-z])$").unwrap();
}

/// Normalize an operator trip id (or a timetable train number) to the
/// canonical train number. Returns None when the tail does not look like a
/// train number; such feed trips are counted unmatched.
///
/// Idempotent: a canonical number normalizes to itself.
pub fn normalize_train_number(raw: &str) -> Option<String> {
    let tail = FEED_PREFIX_REGEX.replace(raw, "");
    let captures = TRAIN_NUMBER_REGEX.captures(&tail)?;

    let zeros = captures.get(1).map_or("", |m| m.as_str());
    let digits = captures.get(2).map_or("", |m| m.as_str());
    let letter = captures.get(3).map_or("", |m| m.as_str());

    // The number body is 3 or 4 digits including any leading zeros.
    let body_len = zeros.len() + digits.len();
    if !(3..=4).contains(&body_len) {
        return None;
    }

    Some(format!("{}{}", digits, letter.to_ascii_uppercase()))
}

/// Loop-direction fallback used when a feed trip has no usable direction:
/// odd train numbers run the outer loop, even the inner.
pub fn direction_from_number_parity(normalized: &str) -> Direction {
    let digits: String = normalized.chars().take_while(char::is_ascii_digit).collect();
    match digits.parse::<u32>() {
        Ok(n) if n % 2 == 1 => Direction::OuterLoop,
        Ok(_) => Direction::InnerLoop,
        Err(_) => Direction::Unknown,
    }
}

fn gtfs_direction_id(direction: Direction) -> Option<u32> {
    match direction {
        Direction::OuterLoop | Direction::Outbound => Some(0),
        Direction::InnerLoop | Direction::Inbound => Some(1),
        Direction::Unknown => None,
    }
}

/// Pick one timetable trip among several sharing a normalized number on the
/// same calendar. Tiebreak order: the feed's `direction_id`, then whether a
/// candidate's currently-active segment faces the feed's first upcoming
/// stop, else give up (the caller drops the update with a diagnostic).
pub fn select_candidate(
    candidates: &[u32],
    store: &TimetableStore,
    catalog: &Catalog,
    segments: &SegmentIndex,
    now_effective: u32,
    direction_id: Option<u32>,
    first_upcoming_stop_id: Option<&str>,
) -> Option<u32> {
    match candidates {
        [] => return None,
        [only] => return Some(*only),
        _ => {}
    }

    if let Some(feed_dir) = direction_id {
        let matching: Vec<u32> = candidates
            .iter()
            .copied()
            .filter(|&c| gtfs_direction_id(store.trip(c).direction) == Some(feed_dir))
            .collect();
        if let [only] = matching.as_slice() {
            return Some(*only);
        }
    }

    if let Some(stop_id) = first_upcoming_stop_id {
        if let Some(&station) = catalog.station_index.get(stop_id) {
            let matching: Vec<u32> = candidates
                .iter()
                .copied()
                .filter(|&c| active_station(store, segments, c, now_effective) == Some(station))
                .collect();
            if let [only] = matching.as_slice() {
                return Some(*only);
            }
        }
    }

    None
}

/// The station a trip currently faces: the dwell's station, or a motion's
/// destination.
fn active_station(
    store: &TimetableStore,
    segments: &SegmentIndex,
    trip: u32,
    now_effective: u32,
) -> Option<usize> {
    let line = store.trip(trip).line;
    let line_segments = segments.line(line);
    for &i in line_segments.trip_segments(trip) {
        let seg = &line_segments.segments[i as usize];
        if seg.contains(now_effective) {
            return Some(match seg.kind {
                SegmentKind::Dwell { station } => station,
                SegmentKind::Motion { to_station, .. } => to_station,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_prefixed_feed_ids() {
        assert_eq!(normalize_train_number("1:1111406H").as_deref(), Some("406H"));
        assert_eq!(normalize_train_number("42000906G").as_deref(), Some("906G"));
        assert_eq!(normalize_train_number("4200406H").as_deref(), Some("406H"));
        assert_eq!(normalize_train_number("4201301G").as_deref(), Some("301G"));
    }

    #[test]
    fn canonical_numbers_pass_through() {
        assert_eq!(normalize_train_number("406H").as_deref(), Some("406H"));
        assert_eq!(normalize_train_number("1234g").as_deref(), Some("1234G"));
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["1:1111406H", "42000906G", "406H", "1234G", "0906G"] {
            if let Some(once) = normalize_train_number(raw) {
                assert_eq!(normalize_train_number(&once), Some(once.clone()));
            }
        }
    }

    #[test]
    fn equivalent_ids_agree() {
        let a = normalize_train_number("1:1111406H");
        let b = normalize_train_number("4200406H");
        assert_eq!(a, b);
        assert_eq!(a.as_deref(), Some("406H"));
    }

    #[test]
    fn rejects_non_conforming_tails() {
        assert_eq!(normalize_train_number(""), None);
        assert_eq!(normalize_train_number("12G"), None);
        assert_eq!(normalize_train_number("ABC"), None);
        assert_eq!(normalize_train_number("12345"), None);
        assert_eq!(normalize_train_number("00906G"), None);
    }

    #[test]
    fn leading_zeros_are_stripped() {
        assert_eq!(normalize_train_number("0906G").as_deref(), Some("906G"));
        assert_eq!(normalize_train_number("906G").as_deref(), Some("906G"));
    }

    #[test]
    fn parity_fallback_direction() {
        assert_eq!(direction_from_number_parity("301G"), Direction::OuterLoop);
        assert_eq!(direction_from_number_parity("406H"), Direction::InnerLoop);
        assert_eq!(direction_from_number_parity("G"), Direction::Unknown);
    }
}
