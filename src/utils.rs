//! Utility functions for file handling

use std::path::Path;

/// Delete a file if it exists
///
/// Best effort: a missing file is fine, any other failure is logged. If the
/// file is still present afterwards a warning is emitted, since a stale
/// partial file would fool the next cache check.
///
/// # Returns
///
/// `true` if the path no longer exists after the call.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() {
/// use taskfetch::utils::try_delete_file;
/// use std::path::Path;
///
/// let gone = try_delete_file(Path::new("/tmp/cache/packages/pkg.7z")).await;
/// assert!(gone);
/// # }
/// ```
pub async fn try_delete_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "deleted file");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete file");
        }
    }

    let still_there = tokio::fs::try_exists(path).await.unwrap_or(true);
    if still_there {
        tracing::warn!(path = %path.display(), "file still exists after delete attempt");
    }
    !still_there
}

/// Derive a file name from the last path segment of a URL
///
/// Percent-encoding is kept as-is. Returns `"download"` when the URL has no
/// usable segment.
///
/// # Examples
///
/// ```
/// use taskfetch::utils::file_name_from_url;
///
/// assert_eq!(file_name_from_url("https://example.com/pkgs/tool-1.2.7z?sig=x"), "tool-1.2.7z");
/// assert_eq!(file_name_from_url("https://example.com/"), "download");
/// ```
pub fn file_name_from_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url)
        && let Some(mut segments) = parsed.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        return last.to_string();
    }

    "download".to_string()
}
