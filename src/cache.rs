//! Cache-hit detection
//!
//! A task whose target file is already on disk and usable completes without
//! ever constructing a provider.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::integrity::IntegrityValidator;
use crate::types::Integrity;

/// Decides whether a previously downloaded file can be reused
#[async_trait]
pub trait CacheProbe: Send + Sync {
    /// Whether `path` holds a complete, valid copy of the file
    ///
    /// Never fails: any problem reading the file means "not usable".
    async fn exists_usable_file(
        &self,
        path: &Path,
        expected_size: u64,
        integrity: Option<&Integrity>,
    ) -> bool;
}

/// Filesystem probe: size must match and the checksum (if any) must validate
///
/// An unknown expected size (0) never counts as a hit, since a partial file
/// could not be told apart from a finished one.
pub struct FsCacheProbe {
    validator: Arc<dyn IntegrityValidator>,
}

impl FsCacheProbe {
    /// Create a probe validating checksums with `validator`
    pub fn new(validator: Arc<dyn IntegrityValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl CacheProbe for FsCacheProbe {
    async fn exists_usable_file(
        &self,
        path: &Path,
        expected_size: u64,
        integrity: Option<&Integrity>,
    ) -> bool {
        if expected_size == 0 {
            return false;
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return false,
        };
        if metadata.len() != expected_size {
            tracing::debug!(
                path = %path.display(),
                expected = expected_size,
                actual = metadata.len(),
                "cached file has wrong size"
            );
            return false;
        }

        if let Some(integrity) = integrity
            && let Err(e) = self.validator.validate(path, integrity).await
        {
            tracing::debug!(path = %path.display(), error = %e, "cached file failed validation");
            return false;
        }

        true
    }
}
