use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::error::ConfigError;

const DEFAULT_REFRESH_INTERVAL_SEC: u64 = 30;
const DEFAULT_FETCH_TIMEOUT_SEC: u64 = 10;
const DEFAULT_QUERY_DEADLINE_MS: u64 = 2000;

/// Geographic bounding box used to validate station coordinates at load.
/// Defaults cover the Japanese archipelago.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max && lat >= self.lat_min && lat <= self.lat_max
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            lon_min: 122.0,
            lon_max: 154.0,
            lat_min: 20.0,
            lat_max: 46.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// GTFS-RT TripUpdate endpoint. When absent the service runs
    /// timetable-only and the fusion loop is not started.
    pub gtfs_rt_url: Option<String>,
    /// API key carried as the `acl:consumerKey` query parameter.
    pub gtfs_rt_key: Option<String>,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub timezone: Tz,
    pub static_data_dir: PathBuf,
    pub cors_allow_origin: Vec<String>,
    pub query_deadline: Duration,
    pub bounding_box: BoundingBox,
    /// Public holidays operating the SaturdayHoliday calendar, loaded from
    /// holidays.json when present.
    pub holidays: Vec<NaiveDate>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let timezone = match std::env::var("LOCAL_TZ") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::Timezone(name))?,
            Err(_) => chrono_tz::Asia::Tokyo,
        };

        let cors_allow_origin = std::env::var("CORS_ALLOW_ORIGIN")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            gtfs_rt_url: std::env::var("GTFS_RT_URL").ok().filter(|s| !s.is_empty()),
            gtfs_rt_key: std::env::var("GTFS_RT_KEY").ok().filter(|s| !s.is_empty()),
            refresh_interval: Duration::from_secs(parse_env(
                "REFRESH_INTERVAL_SEC",
                DEFAULT_REFRESH_INTERVAL_SEC,
            )?),
            fetch_timeout: Duration::from_secs(parse_env(
                "FETCH_TIMEOUT_SEC",
                DEFAULT_FETCH_TIMEOUT_SEC,
            )?),
            timezone,
            static_data_dir: PathBuf::from(
                std::env::var("STATIC_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ),
            cors_allow_origin,
            query_deadline: Duration::from_millis(parse_env(
                "QUERY_DEADLINE_MS",
                DEFAULT_QUERY_DEADLINE_MS,
            )?),
            bounding_box: BoundingBox {
                lon_min: parse_env("BBOX_LON_MIN", 122.0)?,
                lon_max: parse_env("BBOX_LON_MAX", 154.0)?,
                lat_min: parse_env("BBOX_LAT_MIN", 20.0)?,
                lat_max: parse_env("BBOX_LAT_MAX", 46.0)?,
            },
            holidays: Vec::new(),
        })
    }

    /// The fused set is considered stale once it is older than two refresh
    /// periods.
    pub fn staleness_threshold(&self) -> Duration {
        self.refresh_interval * 2
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_rejects_out_of_range() {
        let bbox = BoundingBox::default();
        assert!(bbox.contains(139.7, 35.68)); // Tokyo
        assert!(!bbox.contains(0.0, 51.5)); // London
        assert!(!bbox.contains(139.7, 50.0));
    }

    #[test]
    fn staleness_is_two_refresh_periods() {
        let mut config = Config::from_env().unwrap();
        config.refresh_interval = Duration::from_secs(30);
        assert_eq!(config.staleness_threshold(), Duration::from_secs(60));
    }
}
