//! Model artifact resolution
//!
//! Turns a user-supplied model reference into a readable local file. Opaque
//! content handles (file pickers, revocable grants) are staged once into the
//! private models directory so later loads no longer depend on external
//! access. Resolution prefers already-readable sources over re-copying.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::models_dir;

/// Destination name when nothing better can be derived
const DEFAULT_MODEL_FILENAME: &str = "model.gguf";

/// Caller-supplied pointer at a model artifact. May be stale: the file can
/// have moved or the grant been revoked since it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelReference {
    /// Filesystem path the user typed or previously used
    LocalPath(String),
    /// Opaque content handle granted by the host file picker
    Handle(String),
}

/// A reference resolved to a file that was readable at resolution time.
/// No guarantee it stays readable afterwards.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub local_path: PathBuf,
    pub source: ModelReference,
}

/// Resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no readable model source")]
    Unreachable,

    #[error("staging copy failed: {0}")]
    CopyFailed(String),
}

/// Host capability that opens opaque content handles.
///
/// The underlying location of a handle is unknown to this crate; the host
/// supplies the byte stream and, best effort, a suggested display name it
/// recorded when the content was picked.
pub trait ContentProvider: Send + Sync {
    /// Open a readable byte stream for the handle
    fn open(&self, handle: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Best-effort display name for the handle
    fn display_name(&self, handle: &str) -> Option<String>;
}

/// Resolves model references, staging opaque content into private storage.
pub struct ModelResolver {
    provider: Arc<dyn ContentProvider>,
    /// Override for the staging directory; `None` means the private models dir
    models_dir: Option<PathBuf>,
}

impl ModelResolver {
    pub fn new(provider: Arc<dyn ContentProvider>) -> Self {
        Self {
            provider,
            models_dir: None,
        }
    }

    /// Stage into an explicit directory instead of the private models dir
    pub fn with_models_dir(provider: Arc<dyn ContentProvider>, dir: PathBuf) -> Self {
        Self {
            provider,
            models_dir: Some(dir),
        }
    }

    /// Resolve a reference to a readable local file.
    ///
    /// Order: the reference itself if it is a readable path, then the cached
    /// local path from an earlier staging, then a fresh staging copy from
    /// whichever handle is available. Cache-first is intentional: a staged
    /// copy outlives revoked grants and avoids repeated copies.
    pub fn resolve(
        &self,
        reference: &ModelReference,
        cached_local_path: Option<&str>,
        cached_handle: Option<&str>,
    ) -> Result<ResolvedModel, ResolveError> {
        if let ModelReference::LocalPath(path) = reference {
            let direct = Path::new(path);
            if is_readable_file(direct) {
                return Ok(ResolvedModel {
                    local_path: direct.to_path_buf(),
                    source: reference.clone(),
                });
            }
        }

        if let Some(cached) = cached_local_path {
            let cached = Path::new(cached);
            if is_readable_file(cached) {
                tracing::debug!(path = %cached.display(), "Reusing staged model copy");
                return Ok(ResolvedModel {
                    local_path: cached.to_path_buf(),
                    source: reference.clone(),
                });
            }
        }

        let handle = match reference {
            ModelReference::Handle(handle) => Some(handle.as_str()),
            ModelReference::LocalPath(_) => cached_handle,
        };

        match handle {
            Some(handle) => self.stage_from_handle(handle, reference),
            None => Err(ResolveError::Unreachable),
        }
    }

    /// Stream-copy the handle's content into the staging directory.
    ///
    /// A failed copy deletes the partial destination file; the directory never
    /// keeps half a model.
    fn stage_from_handle(
        &self,
        handle: &str,
        source: &ModelReference,
    ) -> Result<ResolvedModel, ResolveError> {
        let dir = self.staging_dir()?;
        let destination = dir.join(self.destination_name(handle));

        match self.copy_handle_to(handle, &destination) {
            Ok(bytes) => {
                tracing::info!(
                    dest = %destination.display(),
                    bytes,
                    "Staged model into private storage"
                );
                Ok(ResolvedModel {
                    local_path: destination,
                    source: source.clone(),
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&destination);
                tracing::warn!(dest = %destination.display(), "Staging failed: {}", e);
                Err(ResolveError::CopyFailed(e.to_string()))
            }
        }
    }

    fn copy_handle_to(&self, handle: &str, destination: &Path) -> io::Result<u64> {
        let mut input = self.provider.open(handle)?;
        let mut output = File::create(destination)?;
        let bytes = io::copy(&mut input, &mut output)?;
        output.sync_all()?;
        Ok(bytes)
    }

    fn staging_dir(&self) -> Result<PathBuf, ResolveError> {
        match &self.models_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| ResolveError::CopyFailed(e.to_string()))?;
                Ok(dir.clone())
            }
            None => models_dir().map_err(|e| ResolveError::CopyFailed(e.to_string())),
        }
    }

    /// Destination filename: the handle's trailing segment, then the host's
    /// recorded display name, then a generic default. Deterministic per
    /// handle, so re-staging the same content overwrites the same file.
    fn destination_name(&self, handle: &str) -> String {
        handle_file_name(handle)
            .or_else(|| {
                self.provider
                    .display_name(handle)
                    .and_then(|name| sanitize_file_name(&name))
            })
            .unwrap_or_else(|| DEFAULT_MODEL_FILENAME.to_string())
    }
}

/// Name derived from the handle itself: its last `/`-separated segment
fn handle_file_name(handle: &str) -> Option<String> {
    let tail = handle.rsplit('/').next()?;
    sanitize_file_name(tail)
}

/// Flatten a suggested name into a single safe filename component
fn sanitize_file_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }

    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let flattened = no_fragment
        .trim_start_matches('/')
        .replace('\\', "/")
        .replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider serving fixed bytes, counting how often it is opened
    struct FixedProvider {
        content: Vec<u8>,
        name: Option<String>,
        opens: AtomicUsize,
    }

    impl FixedProvider {
        fn new(content: &[u8]) -> Self {
            Self {
                content: content.to_vec(),
                name: None,
                opens: AtomicUsize::new(0),
            }
        }

        fn with_name(content: &[u8], name: &str) -> Self {
            Self {
                name: Some(name.to_string()),
                ..Self::new(content)
            }
        }
    }

    impl ContentProvider for FixedProvider {
        fn open(&self, _handle: &str) -> io::Result<Box<dyn Read + Send>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Cursor::new(self.content.clone())))
        }

        fn display_name(&self, _handle: &str) -> Option<String> {
            self.name.clone()
        }
    }

    /// Provider whose stream fails partway through
    struct FailingProvider;

    struct FailingRead {
        served: bool,
    }

    impl Read for FailingRead {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "grant revoked"))
            } else {
                self.served = true;
                let chunk = b"partial";
                buf[..chunk.len()].copy_from_slice(chunk);
                Ok(chunk.len())
            }
        }
    }

    impl ContentProvider for FailingProvider {
        fn open(&self, _handle: &str) -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(FailingRead { served: false }))
        }

        fn display_name(&self, _handle: &str) -> Option<String> {
            None
        }
    }

    fn resolver_in(dir: &Path, provider: Arc<dyn ContentProvider>) -> ModelResolver {
        ModelResolver::with_models_dir(provider, dir.to_path_buf())
    }

    #[test]
    fn test_readable_local_path_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("qwen.gguf");
        fs::write(&model, b"GGUF....").unwrap();

        let provider = Arc::new(FixedProvider::new(b"unused"));
        let resolver = resolver_in(dir.path(), provider.clone());

        let reference = ModelReference::LocalPath(model.display().to_string());
        let resolved = resolver.resolve(&reference, None, None).unwrap();

        assert_eq!(resolved.local_path, model);
        // Direct hit: no copy performed
        assert_eq!(provider.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unreadable_path_without_fallbacks_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(dir.path(), Arc::new(FixedProvider::new(b"")));

        let reference = ModelReference::LocalPath("/nonexistent/model.gguf".to_string());
        let err = resolver.resolve(&reference, None, None).unwrap_err();
        assert!(matches!(err, ResolveError::Unreachable));
    }

    #[test]
    fn test_cached_local_path_preferred_over_restaging() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.gguf");
        fs::write(&staged, b"cached copy").unwrap();

        let provider = Arc::new(FixedProvider::new(b"fresh copy"));
        let resolver = resolver_in(dir.path(), provider.clone());

        let reference = ModelReference::Handle("content://models/42".to_string());
        let cached = staged.display().to_string();
        let resolved = resolver.resolve(&reference, Some(&cached), None).unwrap();

        assert_eq!(resolved.local_path, staged);
        assert_eq!(provider.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_staging_copies_handle_content() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(dir.path(), Arc::new(FixedProvider::new(b"model bytes")));

        let reference = ModelReference::Handle("content://docs/qwen-q4.gguf".to_string());
        let resolved = resolver.resolve(&reference, None, None).unwrap();

        assert_eq!(resolved.local_path, dir.path().join("qwen-q4.gguf"));
        assert_eq!(fs::read(&resolved.local_path).unwrap(), b"model bytes");
    }

    #[test]
    fn test_stale_path_falls_back_to_cached_handle() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(dir.path(), Arc::new(FixedProvider::new(b"bytes")));

        let reference = ModelReference::LocalPath("/gone/model.gguf".to_string());
        let resolved = resolver
            .resolve(&reference, None, Some("content://docs/picked.gguf"))
            .unwrap();

        assert_eq!(resolved.local_path, dir.path().join("picked.gguf"));
    }

    #[test]
    fn test_failed_copy_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(dir.path(), Arc::new(FailingProvider));

        let reference = ModelReference::Handle("content://docs/broken.gguf".to_string());
        let err = resolver.resolve(&reference, None, None).unwrap_err();

        assert!(matches!(err, ResolveError::CopyFailed(_)));
        assert!(!dir.path().join("broken.gguf").exists());
    }

    #[test]
    fn test_destination_name_fallback_chain() {
        let dir = tempfile::tempdir().unwrap();

        // Handle tail wins over the recorded display name.
        let named = resolver_in(
            dir.path(),
            Arc::new(FixedProvider::with_name(b"x", "display.gguf")),
        );
        assert_eq!(
            named.destination_name("content://docs/tail.gguf"),
            "tail.gguf"
        );

        // Blank tail: fall back to the display name.
        assert_eq!(named.destination_name("content://docs/"), "display.gguf");

        // Neither available: generic default.
        let unnamed = resolver_in(dir.path(), Arc::new(FixedProvider::new(b"x")));
        assert_eq!(unnamed.destination_name("content://docs/"), "model.gguf");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(
            sanitize_file_name("a/b\\c:d.gguf").as_deref(),
            Some("a__b__c_d.gguf")
        );
        assert_eq!(
            sanitize_file_name("name.gguf?sig=abc#frag").as_deref(),
            Some("name.gguf")
        );
        assert_eq!(sanitize_file_name("  "), None);
        assert_eq!(sanitize_file_name("..."), None);
    }
}
