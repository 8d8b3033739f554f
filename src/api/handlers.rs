//! HTTP handlers: the position query surface, static catalog endpoints and
//! the admin rank write.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::catalog::types::Rank;
use crate::error::QueryError;
use crate::position::{positions_at, QueryContext, TrainPosition};

use super::server::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct PositionsParams {
    pub line: String,
    pub at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PositionsResponse {
    pub positions: Vec<TrainPosition>,
    pub timestamp: String,
    pub line: String,
    pub quality: &'static str,
}

/// `GET /positions?line=<id>&at=<ISO8601?>`
pub async fn get_positions(
    State(state): State<AppState>,
    Query(params): Query<PositionsParams>,
) -> Response {
    let tz = state.config.timezone;
    let now = Utc::now();
    let at = match &params.at {
        Some(raw) => match parse_at(raw, tz) {
            Some(at) => at,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unparseable at parameter: {raw}"),
                )
            }
        },
        None => now.with_timezone(&tz),
    };

    // Snapshot the fused set once; the whole answer reflects it.
    let fused = { state.fused.read().await.clone() };
    let ranks = state.catalog.ranks.read().await;

    let ctx = QueryContext {
        catalog: &state.catalog,
        store: &state.store,
        segments: &state.segments,
        fused: &fused,
        ranks: &ranks,
        holidays: &state.config.holidays,
        staleness: state.config.staleness_threshold(),
        fusion_enabled: state.config.gtfs_rt_url.is_some(),
        deadline: Some(Instant::now() + state.config.query_deadline),
    };

    match positions_at(&ctx, &params.line, at, now) {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(PositionsResponse {
                positions: snapshot.positions,
                timestamp: at.to_rfc3339(),
                line: params.line,
                quality: if snapshot.stale { "stale" } else { "good" },
            }),
        )
            .into_response(),
        Err(QueryError::LineUnknown(line)) => {
            error_response(StatusCode::NOT_FOUND, format!("unknown line: {line}"))
        }
        Err(QueryError::Canceled) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "query deadline elapsed")
        }
    }
}

/// Accepts RFC 3339 with any offset, or a naive local timestamp.
fn parse_at(raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
    if let Ok(fixed) = DateTime::parse_from_rfc3339(raw) {
        return Some(fixed.with_timezone(&tz));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()?;
    tz.from_local_datetime(&naive).earliest()
}

/// `GET /lines`
pub async fn get_lines(State(state): State<AppState>) -> Response {
    let lines: Vec<_> = state
        .catalog
        .lines
        .iter()
        .map(|line| {
            json!({
                "id": line.id,
                "name_ja": line.name.ja,
                "name_en": line.name.en,
                "color": line.color,
                "operator": line.operator(),
                "station_count": line.station_idx.len(),
            })
        })
        .collect();
    Json(json!({ "lines": lines })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LineParam {
    pub line: Option<String>,
}

/// `GET /stations?line=<id>`
pub async fn get_stations(
    State(state): State<AppState>,
    Query(params): Query<LineParam>,
) -> Response {
    let Some(line_id) = params.line else {
        return error_response(StatusCode::BAD_REQUEST, "line query parameter is required");
    };
    let Some(line) = state.catalog.line(&line_id) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown line: {line_id}"));
    };

    let ranks = state.catalog.ranks.read().await;
    let stations: Vec<_> = line
        .station_idx
        .iter()
        .map(|&idx| {
            let st = state.catalog.station(idx);
            let entry = ranks.get(&idx).copied().unwrap_or_default();
            json!({
                "id": st.id,
                "line_id": line.id,
                "name_ja": st.name.ja,
                "name_en": st.name.en,
                "coord": { "lon": st.lon, "lat": st.lat },
                "rank": entry.rank,
                "dwell_time": entry.dwell_secs,
            })
        })
        .collect();
    Json(json!({ "stations": stations })).into_response()
}

/// `GET /shape?line=<id>`: the stitched polyline as a GeoJSON LineString.
pub async fn get_shape(
    State(state): State<AppState>,
    Query(params): Query<LineParam>,
) -> Response {
    let Some(line_id) = params.line else {
        return error_response(StatusCode::BAD_REQUEST, "line query parameter is required");
    };
    let Some(line) = state.catalog.line(&line_id) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown line: {line_id}"));
    };
    let Some(shape) = &line.shape else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("no shape available for line: {line_id}"),
        );
    };

    let coordinates: Vec<[f64; 2]> = shape.points.iter().map(|&(lon, lat)| [lon, lat]).collect();
    Json(json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": {
                "type": "LineString",
                "coordinates": coordinates,
            },
            "properties": {
                "line_id": line.id,
                "color": line.color,
            },
        }],
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct RankUpdate {
    pub rank: Rank,
    pub dwell_time: u32,
}

/// `PUT /stations/{id}/rank`: admin write-through to the rank table.
pub async fn put_station_rank(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
    Json(update): Json<RankUpdate>,
) -> Response {
    let Some(&idx) = state.catalog.station_index.get(&station_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("unknown station: {station_id}"),
        );
    };

    state
        .catalog
        .set_rank(idx, update.rank, update.dwell_time)
        .await;
    info!(station = %station_id, rank = ?update.rank, dwell = update.dwell_time, "station rank updated");
    StatusCode::NO_CONTENT.into_response()
}

/// `GET /health`: service liveness plus publisher health and fusion
/// counters. The unmatched counter is the canonical signal for feed drift.
pub async fn health(State(state): State<AppState>) -> Response {
    let status = state.feed_status.read().await.clone();
    let fused = { state.fused.read().await.clone() };
    let age_seconds = fused.age(Utc::now()).map(|a| a.as_secs());

    Json(json!({
        "status": "ok",
        "feed": {
            "health": status.health,
            "consecutive_failures": status.consecutive_failures,
            "last_success": status.last_success.map(|t| t.to_rfc3339()),
            "last_error": status.last_error,
        },
        "fused": {
            "age_seconds": age_seconds,
            "matched": fused.stats.matched,
            "unmatched": fused.stats.unmatched,
            "suspect": fused.stats.suspect,
            "ambiguous_dropped": fused.stats.ambiguous_dropped,
        },
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Tokyo;

    #[test]
    fn parses_rfc3339_with_offset() {
        let at = parse_at("2025-01-20T08:00:00+09:00", Tokyo).unwrap();
        assert_eq!(at.to_rfc3339(), "2025-01-20T08:00:00+09:00");

        // UTC instant converted into the local zone.
        let at = parse_at("2025-01-19T23:00:00Z", Tokyo).unwrap();
        assert_eq!(at.to_rfc3339(), "2025-01-20T08:00:00+09:00");
    }

    #[test]
    fn parses_naive_local_timestamps() {
        let at = parse_at("2025-01-20T08:00:00", Tokyo).unwrap();
        assert_eq!(at.to_rfc3339(), "2025-01-20T08:00:00+09:00");
        assert!(parse_at("yesterday", Tokyo).is_none());
    }
}
