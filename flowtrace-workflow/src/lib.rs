pub mod engine;
pub mod nodes;

pub use engine::*;
pub use nodes::*;
