use std::path::PathBuf;

/// Errors raised while loading the static corpus at startup. Any of these
/// aborts startup (exit code 1).
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("data file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line} references unknown station {station}")]
    UnknownStation { line: String, station: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("unknown timezone: {0}")]
    Timezone(String),
}

/// Errors from a single fusion cycle. Parse failures are handled exactly
/// like transport failures: the previous fused set is retained.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("feed protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Errors surfaced by the position query API.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("unknown line: {0}")]
    LineUnknown(String),
    #[error("query deadline elapsed")]
    Canceled,
}
