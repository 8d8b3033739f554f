pub mod delays;
pub mod fetcher;
pub mod matching;
pub mod types;

pub use types::{FeedHealth, FeedStatus, FusedTripSet, SharedFused, TripDelays};
