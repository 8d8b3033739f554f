pub mod loader;
pub mod shape;
pub mod types;

pub use types::{Catalog, Line, LineShape, Rank, RankEntry, Station};
