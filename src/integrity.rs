//! Checksum validation of downloaded files

use async_trait::async_trait;
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};
use crate::types::{Integrity, IntegrityAlgorithm};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Validates a file against its declared checksum
#[async_trait]
pub trait IntegrityValidator: Send + Sync {
    /// Check `path` against `integrity`
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityMismatch`] when the digest differs, or an I/O
    /// error when the file cannot be read.
    async fn validate(&self, path: &Path, integrity: &Integrity) -> Result<()>;
}

/// Streaming md5 / sha256 / sha512 validator
#[derive(Clone, Copy, Debug, Default)]
pub struct ChecksumValidator;

impl ChecksumValidator {
    /// Create a validator
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IntegrityValidator for ChecksumValidator {
    async fn validate(&self, path: &Path, integrity: &Integrity) -> Result<()> {
        let actual = file_digest(path, integrity.method).await?;
        if !actual.eq_ignore_ascii_case(integrity.value.trim()) {
            return Err(Error::IntegrityMismatch {
                path: path.to_path_buf(),
                expected: integrity.value.clone(),
                actual,
            });
        }
        tracing::debug!(path = %path.display(), method = %integrity.method, "integrity ok");
        Ok(())
    }
}

/// Incremental hasher over the supported algorithms
enum FileHasher {
    Md5(md5::Context),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl FileHasher {
    fn new(method: IntegrityAlgorithm) -> Self {
        match method {
            IntegrityAlgorithm::Md5 => FileHasher::Md5(md5::Context::new()),
            IntegrityAlgorithm::Sha256 => FileHasher::Sha256(Sha256::new()),
            IntegrityAlgorithm::Sha512 => FileHasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            FileHasher::Md5(ctx) => ctx.consume(data),
            FileHasher::Sha256(h) => h.update(data),
            FileHasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            FileHasher::Md5(ctx) => to_hex(&ctx.compute().0),
            FileHasher::Sha256(h) => to_hex(&h.finalize()),
            FileHasher::Sha512(h) => to_hex(&h.finalize()),
        }
    }
}

/// Hex digest of a file
pub async fn file_digest(path: &Path, method: IntegrityAlgorithm) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = FileHasher::new(method);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finish())
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}
