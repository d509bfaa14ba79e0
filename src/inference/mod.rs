//! LLM inference bridge
//!
//! Native bridge around llama.cpp: backend selection, the single-instance
//! load/generate/release lifecycle, and model file validation.

pub mod backend;
pub mod engine;
pub mod model;

// Re-export main types for convenience
pub use backend::{select_backend, BackendInfo, LlamaCppBackend, ModelBackend};
pub use engine::{shared, EngineError, EngineState, InferenceEngine};
pub use model::{validate_gguf, GgufMetadata, ModelError, GGUF_MAGIC};
