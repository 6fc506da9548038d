//! MNEME LLM - Provider Layer
//!
//! Provider-agnostic routing and forwarding for inference requests:
//! - Model identifier parsing with family inference
//! - Per-family adapters: endpoint, credential header, request transform
//! - Streaming delta parsers extracting incremental assistant text
//! - Embedding provider trait with OpenAI and deterministic local impls
//!
//! The router never alters streaming bytes on their way to the client;
//! delta parsing happens only on the capture branch.

mod client;
mod embedding;
pub mod providers;
mod router;
mod stream;

pub use client::{ProviderClient, ProviderResponse};
pub use embedding::{EmbeddingProvider, HashEmbedder, OpenAiEmbeddingProvider};
pub use providers::{adapter_for, ProviderAdapter};
pub use router::{parse_model, ProviderRoute};
pub use stream::{DeltaParser, SseFramer, StreamEvent};
