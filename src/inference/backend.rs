//! Native backend seam
//!
//! The narrow capability the engine consumes from the native layer —
//! {load, generate, release} — plus startup-time backend selection. The
//! host SoC is probed once to decide whether an accelerated build should be
//! preferred; the generic CPU path is always available and falling back to
//! it is never fatal.

use std::fs;
use std::num::NonZeroU32;
use std::path::Path;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use crate::inference::engine::EngineError;

/// Context window handed to the native engine
const DEFAULT_CONTEXT: u32 = 4096;

/// Maximum tokens per decode batch during prompt prefill
const PREFILL_BATCH: usize = 512;

/// Generation length floor and the default when the caller passes zero
const MIN_GENERATION: usize = 16;
const DEFAULT_GENERATION: usize = 512;

/// Layer-offload request for accelerated builds (everything the device fits)
const OFFLOAD_ALL_LAYERS: u32 = 1000;

const SYSTEM_INSTRUCTION: &str =
    "You are an expert front-end engineer producing accessible HTML/CSS.";

/// Narrow native capability consumed by the engine.
///
/// One implementor holds at most one resident model. Callers must serialize
/// access; the engine's mutex does exactly that.
pub trait ModelBackend: Send {
    /// Load the model at `path`. Returns false on a malformed file,
    /// unsupported format or allocation failure — never panics.
    fn load(&mut self, path: &Path, threads: usize) -> bool;

    /// Run bounded generation against the resident model.
    fn generate(&mut self, prompt: &str, max_tokens: usize) -> Result<String, EngineError>;

    /// Free the resident model. Idempotent.
    fn release(&mut self);

    /// Static description for logs and host display.
    fn info(&self) -> BackendInfo;
}

/// Backend description
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub name: &'static str,
    pub accelerated: bool,
}

/// SoC family detected from the host, used only to pick the preferred
/// backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocClass {
    Qualcomm,
    Exynos,
    Other,
}

/// Resolve the backend strategy once at startup.
///
/// An accelerated build on a Qualcomm SoC prefers GPU offload; everything
/// else goes straight to the generic CPU path. Preference is only a first
/// attempt — a failed accelerated load falls back to CPU inside
/// [`LlamaCppBackend::load`].
pub fn select_backend() -> Box<dyn ModelBackend> {
    let soc = detect_soc();
    let accelerated_build = cfg!(any(feature = "cuda", feature = "vulkan", feature = "metal"));
    let prefer_accelerated = accelerated_build && soc == SocClass::Qualcomm;

    tracing::info!(
        ?soc,
        accelerated_build,
        prefer_accelerated,
        "Selected native backend"
    );
    Box::new(LlamaCppBackend::new(prefer_accelerated))
}

/// Probe the SoC vendor/hardware strings (best effort)
fn detect_soc() -> SocClass {
    detect_soc_at(Path::new("/sys/devices/soc0"), Path::new("/proc/cpuinfo"))
}

fn detect_soc_at(soc_root: &Path, cpuinfo: &Path) -> SocClass {
    for entry in ["vendor", "family", "machine"] {
        if let Ok(text) = fs::read_to_string(soc_root.join(entry)) {
            let class = classify_soc_string(&text);
            if class != SocClass::Other {
                return class;
            }
        }
    }

    if let Ok(text) = fs::read_to_string(cpuinfo) {
        for line in text.lines() {
            if line.starts_with("Hardware") {
                return classify_soc_string(line);
            }
        }
    }

    SocClass::Other
}

fn classify_soc_string(value: &str) -> SocClass {
    let lower = value.to_lowercase();
    if lower.contains("qualcomm") || lower.contains("qcom") || lower.contains("snapdragon") {
        SocClass::Qualcomm
    } else if lower.contains("exynos") || lower.contains("samsung") {
        SocClass::Exynos
    } else {
        SocClass::Other
    }
}

/// Generic llama.cpp backend over `llama-cpp-2`.
///
/// The llama backend handle is initialized on first load and kept for the
/// process lifetime — the native layer does not support re-initialization
/// after free. `release` drops only the model; a later `load` reuses the
/// handle.
pub struct LlamaCppBackend {
    backend: Option<LlamaBackend>,
    model: Option<LlamaModel>,
    threads: i32,
    prefer_accelerated: bool,
}

impl LlamaCppBackend {
    pub fn new(prefer_accelerated: bool) -> Self {
        Self {
            backend: None,
            model: None,
            threads: 1,
            prefer_accelerated,
        }
    }

    fn ensure_backend(&mut self) -> Option<&LlamaBackend> {
        if self.backend.is_none() {
            match LlamaBackend::init() {
                Ok(backend) => self.backend = Some(backend),
                Err(e) => {
                    tracing::error!("llama backend init failed: {}", e);
                    return None;
                }
            }
        }
        self.backend.as_ref()
    }
}

impl ModelBackend for LlamaCppBackend {
    fn load(&mut self, path: &Path, threads: usize) -> bool {
        self.threads = threads.max(1) as i32;
        let prefer_accelerated = self.prefer_accelerated;
        let Some(backend) = self.ensure_backend() else {
            return false;
        };

        // Optimized variant first, generic CPU load always attempted after.
        let accelerated = if prefer_accelerated {
            let params = LlamaModelParams::default().with_n_gpu_layers(OFFLOAD_ALL_LAYERS);
            match LlamaModel::load_from_file(backend, path, &params) {
                Ok(model) => Some(model),
                Err(e) => {
                    tracing::warn!("Accelerated load failed, falling back to CPU: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let model = match accelerated {
            Some(model) => model,
            None => {
                let params = LlamaModelParams::default();
                match LlamaModel::load_from_file(backend, path, &params) {
                    Ok(model) => model,
                    Err(e) => {
                        tracing::error!(path = %path.display(), "Model load failed: {}", e);
                        return false;
                    }
                }
            }
        };

        tracing::info!(
            path = %path.display(),
            threads = self.threads,
            "Loaded model"
        );
        self.model = Some(model);
        true
    }

    fn generate(&mut self, prompt: &str, max_tokens: usize) -> Result<String, EngineError> {
        let model = self.model.as_ref().ok_or(EngineError::NotReady)?;
        let backend = self.backend.as_ref().ok_or(EngineError::NotReady)?;

        let templated = apply_chat_template(prompt);

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(DEFAULT_CONTEXT))
            .with_n_threads(self.threads)
            .with_n_threads_batch(self.threads);
        let mut ctx = model
            .new_context(backend, ctx_params)
            .map_err(|e| EngineError::Native(e.to_string()))?;

        let tokens = model
            .str_to_token(&templated, AddBos::Always)
            .map_err(|e| EngineError::Native(e.to_string()))?;
        if tokens.is_empty() {
            return Err(EngineError::Native("failed to tokenize prompt".into()));
        }

        let n_ctx = ctx.n_ctx() as usize;
        if tokens.len() >= n_ctx {
            return Err(EngineError::Native(
                "prompt is longer than the context window".into(),
            ));
        }

        let requested = if max_tokens > 0 {
            max_tokens
        } else {
            DEFAULT_GENERATION
        };
        let available = n_ctx - tokens.len();
        let to_generate = requested.min(available).max(MIN_GENERATION);

        // Prefill in chunks so the prompt never exceeds the batch capacity.
        let mut batch = LlamaBatch::new(PREFILL_BATCH, 1);
        let last_index = tokens.len() as i32 - 1;
        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH) {
            batch.clear();
            for (offset, &token) in chunk.iter().enumerate() {
                let position = pos + offset as i32;
                batch
                    .add(token, position, &[0], position == last_index)
                    .map_err(|e| EngineError::Native(e.to_string()))?;
            }
            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Native(e.to_string()))?;
            pos += chunk.len() as i32;
        }

        let mut sampler = LlamaSampler::greedy();
        let mut output = String::new();
        let mut n_cur = tokens.len() as i32;

        for _ in 0..to_generate {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if model.is_eog_token(token) {
                break;
            }

            let piece = model
                .token_to_str(token, Special::Tokenize)
                .unwrap_or_else(|_| String::new());
            if is_chat_marker(&piece) {
                break;
            }
            output.push_str(&piece);

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| EngineError::Native(e.to_string()))?;
            n_cur += 1;

            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Native(e.to_string()))?;
        }

        if output.is_empty() {
            return Err(EngineError::Native("model returned empty response".into()));
        }
        Ok(output)
    }

    fn release(&mut self) {
        self.model = None;
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "llama.cpp",
            accelerated: self.prefer_accelerated,
        }
    }
}

/// Wrap a bare prompt in the model's chat template, leaving already
/// templated prompts untouched.
fn apply_chat_template(user_prompt: &str) -> String {
    if user_prompt.contains("<|im_start|>") {
        return user_prompt.to_string();
    }
    format!(
        "<|im_start|>system\n{SYSTEM_INSTRUCTION}\n<|im_end|>\n\
         <|im_start|>user\n{user_prompt}\n<|im_end|>\n\
         <|im_start|>assistant\n"
    )
}

/// Chat-structure markers that end generation when they leak into output
fn is_chat_marker(piece: &str) -> bool {
    matches!(
        piece.trim(),
        "<|im_start|>" | "<|im_end|>" | "<|endoftext|>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_classify_soc_strings() {
        assert_eq!(
            classify_soc_string("Qualcomm Technologies, Inc SM8550"),
            SocClass::Qualcomm
        );
        assert_eq!(classify_soc_string("qcom"), SocClass::Qualcomm);
        assert_eq!(classify_soc_string("Snapdragon"), SocClass::Qualcomm);
        assert_eq!(classify_soc_string("Samsung Exynos 2200"), SocClass::Exynos);
        assert_eq!(classify_soc_string("rockchip rk3588"), SocClass::Other);
    }

    #[test]
    fn test_detect_soc_from_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        let soc_root = dir.path().join("soc0");
        fs::create_dir_all(&soc_root).unwrap();
        fs::write(soc_root.join("machine"), "Snapdragon 8 Gen 2\n").unwrap();

        let missing = dir.path().join("cpuinfo");
        assert_eq!(detect_soc_at(&soc_root, &missing), SocClass::Qualcomm);
    }

    #[test]
    fn test_detect_soc_falls_back_to_cpuinfo() {
        let dir = tempfile::tempdir().unwrap();
        let cpuinfo = dir.path().join("cpuinfo");
        fs::write(
            &cpuinfo,
            "processor\t: 0\nHardware\t: Samsung Exynos990\n",
        )
        .unwrap();

        let missing_root = dir.path().join("soc0");
        assert_eq!(detect_soc_at(&missing_root, &cpuinfo), SocClass::Exynos);
    }

    #[test]
    fn test_detect_soc_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            detect_soc_at(&dir.path().join("soc0"), &dir.path().join("cpuinfo")),
            SocClass::Other
        );
    }

    #[test]
    fn test_chat_template_applied_once() {
        let wrapped = apply_chat_template("make a card");
        assert!(wrapped.starts_with("<|im_start|>system\n"));
        assert!(wrapped.contains("make a card"));
        assert!(wrapped.ends_with("<|im_start|>assistant\n"));

        // Already templated prompts pass through untouched.
        assert_eq!(apply_chat_template(&wrapped), wrapped);
    }

    #[test]
    fn test_chat_markers_end_generation() {
        assert!(is_chat_marker("<|im_end|>"));
        assert!(is_chat_marker(" <|endoftext|> "));
        assert!(!is_chat_marker("<div>"));
    }
}
