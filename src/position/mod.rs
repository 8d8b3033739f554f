pub mod materializer;
pub mod types;

pub use materializer::{positions_at, QueryContext};
pub use types::{GeoPoint, LineSnapshot, Quality, Status, TrainPosition};
