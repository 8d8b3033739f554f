pub mod loader;
pub mod service_day;
pub mod types;

pub use types::{Direction, ServiceType, StopTime, TimetableStore, TimetableTrip};
