pub mod geo;
pub mod model;
pub mod normalize;

pub use model::*;
pub use normalize::{NormalizedItem, NormalizedOrder};
