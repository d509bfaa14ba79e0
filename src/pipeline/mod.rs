//! Generation pipeline
//!
//! Prompt construction, output sanitization, and the orchestrator that
//! sequences resolve → load → generate → sanitize.

pub mod generation;
pub mod prompt;
pub mod sanitize;

// Re-export main types for convenience
pub use generation::{
    GenerationOrchestrator, GenerationRequest, GenerationResult, PrepareError,
};
pub use prompt::{build_prompt, PromptMode, FALLBACK_AGENT_TEXT, MAX_TOKENS};
pub use sanitize::sanitize_html;
