//! The background fusion worker: fetch the GTFS-RT TripUpdate feed on a
//! fixed cadence, match entities to timetable trips, and publish a fresh
//! immutable `FusedTripSet`. Failures keep the previous set in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use prost::Message;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::FetchError;
use crate::segment::SegmentIndex;
use crate::timetable::service_day::{effective_seconds, operating_calendar, service_date};
use crate::timetable::{ServiceType, TimetableStore};

use super::delays::build_offsets;
use super::matching::{normalize_train_number, select_candidate};
use super::types::{FeedHealth, FeedStatus, FusedTripSet, FusionStats, SharedFused};

/// Consecutive transport failures before the publisher reports degraded.
pub const FAILURE_DEGRADE_THRESHOLD: u32 = 5;

pub async fn run_fusion(
    config: Arc<Config>,
    catalog: Arc<Catalog>,
    store: Arc<TimetableStore>,
    segments: Arc<SegmentIndex>,
    fused: SharedFused,
    status: Arc<RwLock<FeedStatus>>,
) {
    let Some(url) = config.gtfs_rt_url.clone() else {
        warn!("GTFS_RT_URL not configured, serving timetable-only positions");
        // Stay alive so the service keeps running on the timetable alone.
        std::future::pending::<()>().await;
        return;
    };

    info!(
        url = %url,
        interval_secs = config.refresh_interval.as_secs(),
        "starting fusion worker"
    );

    let client = reqwest::Client::new();
    let mut interval = tokio::time::interval(config.refresh_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match fetch_feed(
            &client,
            &url,
            config.gtfs_rt_key.as_deref(),
            config.fetch_timeout,
        )
        .await
        {
            Ok(feed) => {
                let now = Utc::now();
                let local_now = now.with_timezone(&config.timezone);
                let calendar = operating_calendar(service_date(local_now), &config.holidays);
                let now_effective = effective_seconds(local_now).max(0) as u32;

                let next = fuse_feed(
                    &feed, &store, &catalog, &segments, calendar, now_effective, now,
                );
                debug!(
                    matched = next.stats.matched,
                    unmatched = next.stats.unmatched,
                    suspect = next.stats.suspect,
                    dropped = next.stats.ambiguous_dropped,
                    "fusion cycle complete"
                );

                {
                    let mut slot = fused.write().await;
                    *slot = Arc::new(next);
                }

                let mut st = status.write().await;
                if st.health == FeedHealth::Degraded {
                    info!("feed recovered, publisher healthy again");
                }
                st.health = FeedHealth::Healthy;
                st.consecutive_failures = 0;
                st.last_success = Some(now);
                st.last_error = None;
            }
            Err(err) => {
                let mut st = status.write().await;
                st.consecutive_failures += 1;
                st.last_error = Some(err.to_string());
                if st.consecutive_failures >= FAILURE_DEGRADE_THRESHOLD
                    && st.health == FeedHealth::Healthy
                {
                    st.health = FeedHealth::Degraded;
                    warn!(
                        failures = st.consecutive_failures,
                        "feed failing repeatedly, publisher degraded"
                    );
                }
                warn!(error = %err, failures = st.consecutive_failures, "feed fetch failed, retaining previous fused set");
            }
        }
    }
}

async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    key: Option<&str>,
    timeout: Duration,
) -> Result<gtfs_realtime::FeedMessage, FetchError> {
    let mut request = client.get(url).timeout(timeout);
    if let Some(key) = key {
        request = request.query(&[("acl:consumerKey", key)]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    let bytes = response.bytes().await?;
    Ok(gtfs_realtime::FeedMessage::decode(bytes.as_ref())?)
}

fn is_canceled(trip: &gtfs_realtime::TripDescriptor) -> bool {
    trip.schedule_relationship
        == Some(gtfs_realtime::trip_descriptor::ScheduleRelationship::Canceled as i32)
}

/// Match every TripUpdate entity against the timetable and build the next
/// fused set. `VehiclePosition` entities are ignored. Pure so cycles are
/// testable without a network.
pub fn fuse_feed(
    feed: &gtfs_realtime::FeedMessage,
    store: &TimetableStore,
    catalog: &Catalog,
    segments: &SegmentIndex,
    calendar: ServiceType,
    now_effective: u32,
    fetched_at: DateTime<Utc>,
) -> FusedTripSet {
    let mut stats = FusionStats::default();
    let mut delays = std::collections::HashMap::new();

    for entity in &feed.entity {
        let Some(trip_update) = &entity.trip_update else {
            continue;
        };
        let trip = &trip_update.trip;
        if is_canceled(trip) {
            debug!(entity = %entity.id, "skipping canceled trip");
            continue;
        }
        let Some(raw_id) = trip.trip_id.as_deref() else {
            continue;
        };

        let Some(number) = normalize_train_number(raw_id) else {
            stats.unmatched += 1;
            continue;
        };

        let Some(candidates) = store.by_number.get(&(number.clone(), calendar)) else {
            stats.unmatched += 1;
            continue;
        };

        let first_upcoming_stop = trip_update
            .stop_time_update
            .iter()
            .find_map(|stu| stu.stop_id.as_deref());

        let Some(matched) = select_candidate(
            candidates,
            store,
            catalog,
            segments,
            now_effective,
            trip.direction_id,
            first_upcoming_stop,
        ) else {
            stats.ambiguous_dropped += 1;
            debug!(number = %number, candidates = candidates.len(), "ambiguous train number, dropping update");
            continue;
        };

        let trip_delays = build_offsets(
            store.trip(matched),
            &trip_update.stop_time_update,
            catalog,
        );
        if trip_delays.suspect {
            stats.suspect += 1;
        }
        stats.matched += 1;
        delays.insert(matched, trip_delays);
    }

    FusedTripSet {
        delays,
        fetched_at: Some(fetched_at),
        feed_timestamp: feed.header.timestamp,
        stats,
    }
}
