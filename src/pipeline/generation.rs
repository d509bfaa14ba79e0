//! Generation orchestration
//!
//! Sequences one request end to end: resolve the model artifact, load it,
//! build the prompt, generate, sanitize. Staging, load and generation are
//! long-running and run on the blocking pool; the calling flow only awaits.
//! Results come back as typed values — the success channel never carries a
//! tagged error string.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::inference::engine::InferenceEngine;
use crate::pipeline::prompt::{build_prompt, PromptMode};
use crate::pipeline::sanitize::sanitize_html;
use crate::storage::resolver::{ModelReference, ModelResolver, ResolveError};
use crate::storage::settings::{save_settings, AppSettings};
use crate::system::cpu::{recommended_config, ThreadConfig};
use crate::system::resources::get_resource_usage;

/// One generation request from the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub agent_text: String,
    pub mode: PromptMode,
}

/// What the host renders: a complete document, or a user-facing failure
/// message. Failures never hide inside the `Html` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenerationResult {
    Html(String),
    Failure(String),
}

/// Model preparation errors, worded for direct display
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("unable to access the model file: {0}")]
    Resolve(#[from] ResolveError),

    #[error("failed to load model; check the path, permissions, and GGUF format")]
    LoadFailed,

    #[error("background task failed: {0}")]
    Task(String),
}

/// Drives the resolve → load → generate → sanitize pipeline around the
/// single engine instance.
pub struct GenerationOrchestrator {
    engine: Arc<InferenceEngine>,
    resolver: Arc<ModelResolver>,
    settings: Mutex<AppSettings>,
    persist: bool,
}

impl GenerationOrchestrator {
    pub fn new(
        engine: Arc<InferenceEngine>,
        resolver: Arc<ModelResolver>,
        settings: AppSettings,
    ) -> Self {
        Self {
            engine,
            resolver,
            settings: Mutex::new(settings),
            persist: true,
        }
    }

    /// Disable settings persistence (tests, ephemeral hosts)
    pub fn persist_settings(mut self, enabled: bool) -> Self {
        self.persist = enabled;
        self
    }

    /// Prompt mode from persisted preferences
    pub fn preferred_mode(&self) -> PromptMode {
        if self.lock_settings().minimal_prompt {
            PromptMode::Minimal
        } else {
            PromptMode::Full
        }
    }

    /// Resolve the reference, profile the CPU and load the model.
    ///
    /// On success the reference and the staged copy are persisted so the
    /// next session can resolve cache-first.
    pub async fn prepare_model(
        &self,
        reference: ModelReference,
    ) -> Result<ThreadConfig, PrepareError> {
        let request_id = Uuid::new_v4();

        let (cached_path, cached_handle) = {
            let settings = self.lock_settings();
            (
                settings.staged_model_path.clone(),
                settings.model_handle.clone(),
            )
        };

        let resolver = Arc::clone(&self.resolver);
        let resolve_reference = reference.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            resolver.resolve(
                &resolve_reference,
                cached_path.as_deref(),
                cached_handle.as_deref(),
            )
        })
        .await
        .map_err(|e| PrepareError::Task(e.to_string()))??;

        let ram = get_resource_usage();
        tracing::info!(
            %request_id,
            ram_used_mb = ram.ram_used_mb,
            ram_total_mb = ram.ram_total_mb,
            model = %resolved.local_path.display(),
            "Preparing model"
        );

        let thread_config = recommended_config();
        let engine = Arc::clone(&self.engine);
        let load_path = resolved.local_path.clone();
        let loaded =
            tokio::task::spawn_blocking(move || engine.load(&load_path, thread_config))
                .await
                .map_err(|e| PrepareError::Task(e.to_string()))?;
        if !loaded {
            return Err(PrepareError::LoadFailed);
        }

        {
            let mut settings = self.lock_settings();
            settings.model_reference = Some(reference_string(&reference));
            if let ModelReference::Handle(handle) = &reference {
                settings.model_handle = Some(handle.clone());
            }
            settings.staged_model_path =
                Some(resolved.local_path.display().to_string());
            if self.persist {
                if let Err(e) = save_settings(&settings) {
                    tracing::warn!("Failed to persist model reference: {}", e);
                }
            }
        }

        tracing::info!(%request_id, threads = thread_config.threads, "Model ready");
        Ok(thread_config)
    }

    /// Run one generation request to a renderable result.
    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        let request_id = Uuid::new_v4();

        if !self.engine.is_ready() {
            return GenerationResult::Failure("Load the model first.".to_string());
        }

        let (max_tokens, plaintext_fallback) = {
            let settings = self.lock_settings();
            (settings.max_tokens as usize, settings.plaintext_fallback)
        };

        let prompt = build_prompt(&request.agent_text, request.mode);
        tracing::debug!(%request_id, prompt_chars = prompt.len(), "Starting generation");

        let engine = Arc::clone(&self.engine);
        let outcome =
            tokio::task::spawn_blocking(move || engine.generate(&prompt, max_tokens)).await;

        match outcome {
            Ok(Ok(raw)) => {
                let document = sanitize_html(&raw, plaintext_fallback);
                tracing::info!(%request_id, chars = document.len(), "Preview refreshed");
                GenerationResult::Html(document)
            }
            Ok(Err(e)) => {
                tracing::warn!(%request_id, "Generation failed: {}", e);
                GenerationResult::Failure(e.to_string())
            }
            Err(e) => {
                tracing::error!(%request_id, "Generation task failed: {}", e);
                GenerationResult::Failure("generation task failed".to_string())
            }
        }
    }

    /// Free the resident model. Safe to call at any time.
    pub async fn release_model(&self) {
        let engine = Arc::clone(&self.engine);
        if let Err(e) = tokio::task::spawn_blocking(move || engine.release()).await {
            tracing::error!("Release task failed: {}", e);
        }
    }

    fn lock_settings(&self) -> MutexGuard<'_, AppSettings> {
        match self.settings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The reference as persisted in settings
fn reference_string(reference: &ModelReference) -> String {
    match reference {
        ModelReference::LocalPath(path) => path.clone(),
        ModelReference::Handle(handle) => handle.clone(),
    }
}
