pub mod build;
pub mod index;

pub use build::{build_trip_segments, Segment, SegmentKind};
pub use index::{ActiveTrain, LineSegments, SegmentIndex};
