//! MNEME API - HTTP surface for the memory-augmented inference proxy
//!
//! Sits between client applications and third-party LLM providers:
//! authenticates callers by memory-context id, retrieves stored
//! conversational material into the provider request, forwards with the
//! owner's own provider credential, streams the response back untouched,
//! persists what was observed, and meters billable memory tokens.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod macros;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod orchestrator;
pub mod quota;
pub mod registry;
pub mod retention;
pub mod routes;
pub mod state;
pub mod tee;
pub mod telemetry;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
