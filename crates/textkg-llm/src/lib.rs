//! Model backend boundary for the textkg pipeline.
//!
//! Provides the role-tagged chat request/response types, the `ProviderAdapter`
//! trait with an OpenAI-compatible implementation, the `EmbedderClient` trait
//! for vector embeddings, the compile-time model slot configuration, and the
//! `LlmClient` with its middleware chain.

pub mod client;
pub mod embedder;
pub mod openai;
pub mod provider;
pub mod slots;
pub mod types;

pub use client::{CostTrackingMiddleware, LlmClient, LoggingMiddleware, Middleware};
pub use embedder::{EmbedderClient, Embedding, OpenAiEmbedder};
pub use openai::OpenAiAdapter;
pub use provider::{DynProvider, ProviderAdapter};
pub use slots::{ModelSlot, ModelSlotConfig};
pub use types::{ChatRequest, ChatResponse, FinishReason, Message, Role, Usage};
