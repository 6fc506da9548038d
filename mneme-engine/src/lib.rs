//! MNEME Engine - Temporal Retrieval
//!
//! The heart of the proxy: turns a natural-language query and a
//! (context, session) pair into an ordered list of stored chunks that
//! become the model preamble. Temporal windows enforce diversity across
//! conversation ages; windows are derived from chunk age at query time,
//! never persisted.
//!
//! Also home to the embedding cache (content-keyed, stampede-safe), the
//! selective storer, and the model-family preamble formatters.

mod embed_cache;
mod formatter;
mod retrieval;
mod storer;

pub use embed_cache::EmbeddingCache;
pub use formatter::{render_preamble, wrapper_for_model, PreambleEntry, WrapperKind};
pub use retrieval::{RetrievalEngine, RetrievedChunk, RetrievedSet};
pub use storer::{split_text, StoreOutcome, StoreRequest, Storer};
