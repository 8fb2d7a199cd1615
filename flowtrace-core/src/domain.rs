pub mod ids;
pub mod workflow;
pub mod execution;

pub use ids::*;
pub use workflow::*;
pub use execution::*;
