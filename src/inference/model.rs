//! Model file validation
//!
//! Cheap GGUF header checks so junk files are rejected before the expensive
//! native load is attempted.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Magic bytes at the start of every GGUF file
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// GGUF versions the native engine understands
const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 1..=3;

/// Header fields read during validation
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub size_bytes: u64,
}

/// Model file validation errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("cannot open model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too small to be a GGUF model")]
    Truncated,

    #[error("not a GGUF file (bad magic)")]
    BadMagic,

    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),
}

/// Validate the GGUF header of a model file.
///
/// Only the fixed-size header is read; tensor data is left to the native
/// engine.
pub fn validate_gguf(path: &Path) -> Result<GgufMetadata, ModelError> {
    let mut file = File::open(path)?;
    let size_bytes = file.metadata()?.len();

    let mut header = [0u8; 16];
    file.read_exact(&mut header)
        .map_err(|_| ModelError::Truncated)?;

    if header[0..4] != GGUF_MAGIC {
        return Err(ModelError::BadMagic);
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ModelError::UnsupportedVersion(version));
    }

    let tensor_count = u64::from_le_bytes([
        header[8], header[9], header[10], header[11], header[12], header[13], header[14],
        header[15],
    ]);

    Ok(GgufMetadata {
        version,
        tensor_count,
        size_bytes,
    })
}
