pub mod executor;
pub mod merge;

pub use executor::{FanOut, RowOf};
pub use merge::k_way_merge;
