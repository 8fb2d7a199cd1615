//! Command-line runner and webhook server for the reference workflow engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod server;

pub use config::Config;
pub use engine::{build_runner, load_workflow};
pub use error::{ApiError, ApiResult};
pub use server::{routes, AppState, WebhookResponse};
