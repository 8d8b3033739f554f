use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, put};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::fusion::{FeedStatus, SharedFused};
use crate::segment::SegmentIndex;
use crate::timetable::TimetableStore;

use super::handlers;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
    pub store: Arc<TimetableStore>,
    pub segments: Arc<SegmentIndex>,
    pub fused: SharedFused,
    pub feed_status: Arc<RwLock<FeedStatus>>,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/positions", get(handlers::get_positions))
        .route("/lines", get(handlers::get_lines))
        .route("/stations", get(handlers::get_stations))
        .route("/shape", get(handlers::get_shape))
        .route("/stations/{id}/rank", put(handlers::put_station_rank))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = &config.cors_allow_origin;
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn run_server(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state)).await
}
