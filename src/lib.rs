pub mod cache;
pub mod lookup;
pub mod normalize;
pub mod resolver;
pub mod splitter;
pub mod utils;
