use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Per-stop delay offsets for one matched timetable trip. Offsets are
/// monotone non-decreasing along the trip and clamped into the accepted
/// range; a clamped trip is tagged suspect.
#[derive(Debug, Clone)]
pub struct TripDelays {
    pub offsets: Vec<i32>,
    pub suspect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FusionStats {
    pub matched: usize,
    pub unmatched: usize,
    pub suspect: usize,
    pub ambiguous_dropped: usize,
}

/// One immutable fusion result. Published by atomic reference swap; a query
/// clones the inner `Arc` once and reads a consistent set for its whole
/// call. Timetable trips absent from `delays` run on schedule (zero
/// offsets).
#[derive(Debug)]
pub struct FusedTripSet {
    /// Timetable trip index -> delay schedule.
    pub delays: HashMap<u32, TripDelays>,
    /// Wall-clock time of the successful fetch that produced this set.
    pub fetched_at: Option<DateTime<Utc>>,
    pub feed_timestamp: Option<u64>,
    pub stats: FusionStats,
}

impl FusedTripSet {
    pub fn empty() -> Self {
        Self {
            delays: HashMap::new(),
            fetched_at: None,
            feed_timestamp: None,
            stats: FusionStats::default(),
        }
    }

    pub fn delays_for(&self, trip: u32) -> Option<&TripDelays> {
        self.delays.get(&trip)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.fetched_at
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Stale once older than the threshold (two refresh periods). A set
    /// that never fetched is stale as soon as fusion is enabled.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.age(now) {
            Some(age) => age > threshold,
            None => true,
        }
    }
}

/// The publish slot. The outer lock is only held long enough to clone or
/// replace the inner reference.
pub type SharedFused = Arc<RwLock<Arc<FusedTripSet>>>;

pub fn new_shared_fused() -> SharedFused {
    Arc::new(RwLock::new(Arc::new(FusedTripSet::empty())))
}

/// Publisher health, tracked across fetch cycles.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    pub health: FeedHealth,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self {
            health: FeedHealth::Healthy,
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
        }
    }
}
