use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tokyo_rail_positions::api::{run_server, AppState};
use tokyo_rail_positions::catalog::loader as catalog_loader;
use tokyo_rail_positions::config::Config;
use tokyo_rail_positions::fusion::fetcher::run_fusion;
use tokyo_rail_positions::fusion::types::new_shared_fused;
use tokyo_rail_positions::fusion::FeedStatus;
use tokyo_rail_positions::segment::SegmentIndex;
use tokyo_rail_positions::timetable::loader as timetable_loader;

#[derive(Parser)]
#[command(name = "tokyo-rail-positions")]
#[command(about = "Real-time train position service for Tokyo-area JR lines")]
struct Args {
    /// Port to run the HTTP server on
    #[arg(short, long, env = "SERVER_PORT", default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal configuration error");
            return ExitCode::from(2);
        }
    };

    let catalog = match catalog_loader::load_catalog(&config.static_data_dir, &config.bounding_box)
    {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!(error = %e, "failed to load static catalog");
            return ExitCode::from(1);
        }
    };

    match catalog_loader::load_holidays(&config.static_data_dir) {
        Ok(holidays) => config.holidays = holidays,
        Err(e) => {
            error!(error = %e, "failed to load holiday calendar");
            return ExitCode::from(1);
        }
    }

    let store = match timetable_loader::load_timetables(&config.static_data_dir, &catalog) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to load timetable corpus");
            return ExitCode::from(1);
        }
    };

    let segments = Arc::new(SegmentIndex::build(&store, catalog.lines.len()));
    let config = Arc::new(config);

    let fused = new_shared_fused();
    let feed_status = Arc::new(RwLock::new(FeedStatus::default()));

    let fusion_handle = tokio::spawn(run_fusion(
        config.clone(),
        catalog.clone(),
        store.clone(),
        segments.clone(),
        fused.clone(),
        feed_status.clone(),
    ));

    let state = AppState {
        config,
        catalog,
        store,
        segments,
        fused,
        feed_status,
    };
    let port = args.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_server(state, port).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!("service started");

    tokio::select! {
        _ = fusion_handle => info!("fusion worker exited"),
        _ = server_handle => error!("API server exited"),
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    ExitCode::SUCCESS
}
