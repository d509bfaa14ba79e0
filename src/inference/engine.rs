//! Inference engine
//!
//! Owns the lifetime of the single native model instance. All access runs
//! through `load`/`generate`/`release`, serialized on one mutex so the
//! native layer never sees concurrent calls.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::inference::backend::{select_backend, BackendInfo, ModelBackend};
use crate::inference::model::validate_gguf;
use crate::system::cpu::ThreadConfig;

/// Engine lifecycle state. At most one model is resident process-wide;
/// transitions happen only inside engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready {
        model_path: PathBuf,
        thread_config: ThreadConfig,
    },
    Releasing,
}

/// Generation-boundary errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no model is loaded")]
    NotReady,

    #[error("generation failed: {0}")]
    Native(String),
}

static SHARED: Lazy<Arc<InferenceEngine>> =
    Lazy::new(|| Arc::new(InferenceEngine::new(select_backend())));

/// The process-wide engine over the probed default backend
pub fn shared() -> Arc<InferenceEngine> {
    Arc::clone(&SHARED)
}

/// Single-instance bridge to the native model.
///
/// Constructed with an injected backend for tests; production code uses
/// [`shared`].
pub struct InferenceEngine {
    /// The native instance. Locking this mutex is the mutual-exclusion
    /// boundary: a generate in progress blocks a concurrent release and
    /// vice versa.
    backend: Mutex<Box<dyn ModelBackend>>,
    /// Observable snapshot, written only while the backend lock is held.
    state: RwLock<EngineState>,
}

impl InferenceEngine {
    pub fn new(backend: Box<dyn ModelBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            state: RwLock::new(EngineState::Unloaded),
        }
    }

    /// Current lifecycle state (snapshot)
    pub fn state(&self) -> EngineState {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True when a model is resident and ready to generate
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready { .. })
    }

    /// Backend description for logs and host display
    pub fn backend_info(&self) -> BackendInfo {
        self.lock_backend().info()
    }

    /// Load a model. Only valid from `Unloaded`; a resident model is never
    /// silently replaced — callers must `release` first.
    ///
    /// Returns false on rejection or any load failure; reasons go to logs
    /// by design, not into a typed error.
    pub fn load(&self, path: &Path, thread_config: ThreadConfig) -> bool {
        let mut backend = self.lock_backend();

        if self.state() != EngineState::Unloaded {
            tracing::warn!(
                path = %path.display(),
                "Load rejected: a model is already resident; release it first"
            );
            return false;
        }
        self.set_state(EngineState::Loading);

        let metadata = match validate_gguf(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Rejected model file: {}", e);
                self.set_state(EngineState::Unloaded);
                return false;
            }
        };

        tracing::info!(
            path = %path.display(),
            size_mb = metadata.size_bytes / (1024 * 1024),
            gguf_version = metadata.version,
            threads = thread_config.threads,
            big_cores_only = thread_config.used_high_performance_only,
            "Loading model"
        );

        if backend.load(path, thread_config.threads) {
            self.set_state(EngineState::Ready {
                model_path: path.to_path_buf(),
                thread_config,
            });
            true
        } else {
            self.set_state(EngineState::Unloaded);
            false
        }
    }

    /// Run bounded generation against the resident model.
    ///
    /// Calling without a resident model is a contract violation surfaced as
    /// [`EngineError::NotReady`]; the native layer is never touched.
    pub fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, EngineError> {
        let mut backend = self.lock_backend();

        if !matches!(self.state(), EngineState::Ready { .. }) {
            return Err(EngineError::NotReady);
        }

        backend.generate(prompt, max_tokens)
    }

    /// Free the native instance. Idempotent no-op when nothing is resident.
    pub fn release(&self) {
        let mut backend = self.lock_backend();

        if !matches!(self.state(), EngineState::Ready { .. }) {
            tracing::debug!("Release with no model resident");
            return;
        }

        self.set_state(EngineState::Releasing);
        backend.release();
        self.set_state(EngineState::Unloaded);
        tracing::info!("Model released");
    }

    fn lock_backend(&self) -> MutexGuard<'_, Box<dyn ModelBackend>> {
        match self.backend.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Only called while the backend lock is held
    fn set_state(&self, state: EngineState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }
}
