//! uiloom
//!
//! On-device generation core for a mobile "agent text → rendered HTML"
//! client: CPU profiling, model staging, the single-instance inference
//! bridge, and the prompt/sanitize pipeline around it. The presentation
//! layer, file pickers and the native model math live outside this crate.

pub mod inference;
pub mod pipeline;
pub mod storage;
pub mod system;

pub use inference::{EngineError, EngineState, InferenceEngine};
pub use pipeline::{GenerationOrchestrator, GenerationRequest, GenerationResult, PromptMode};
pub use storage::resolver::{ContentProvider, ModelReference, ModelResolver, ResolveError};
pub use system::cpu::ThreadConfig;

/// Install the tracing subscriber for the host process.
///
/// Call once from the embedding shell; respects `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
