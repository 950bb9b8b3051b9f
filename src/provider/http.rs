//! Single-stream HTTP provider
//!
//! Also hosts the streaming and progress helpers shared with the ranged
//! provider.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::traits::{ProgressCallback, Provider, ProviderBackend, ProviderInfo, TransferParams};
use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::types::ProgressNotification;

/// Build the HTTP client shared by every provider of a backend
pub(crate) fn build_client(config: &DownloadConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.request_timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))
}

/// Content-Length header value, if present and numeric
pub(crate) fn header_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Ask the server for the remote size with a HEAD request
///
/// Servers that reject HEAD are tolerated; the size is then learned from the
/// GET response instead.
pub(crate) async fn probe_remote_size(client: &reqwest::Client, url: &str) -> Option<u64> {
    match client.head(url).send().await {
        Ok(response) if response.status().is_success() => {
            header_content_length(response.headers()).filter(|len| *len > 0)
        }
        Ok(response) => {
            tracing::debug!(url, status = %response.status(), "HEAD rejected, size unknown until GET");
            None
        }
        Err(e) => {
            tracing::debug!(url, error = %e, "HEAD failed, size unknown until GET");
            None
        }
    }
}

/// Rate-limits progress notifications and tracks transfer speed
pub(crate) struct ProgressThrottle {
    callback: ProgressCallback,
    interval: Duration,
    last_emit: Option<Instant>,
    window_start: Instant,
    window_bytes: u64,
    speed_bps: u64,
}

impl ProgressThrottle {
    pub(crate) fn new(callback: ProgressCallback, interval: Duration) -> Self {
        Self {
            callback,
            interval,
            last_emit: None,
            window_start: Instant::now(),
            window_bytes: 0,
            speed_bps: 0,
        }
    }

    /// Account for `chunk` new bytes and emit if the interval elapsed
    pub(crate) fn record(&mut self, downloaded: u64, total: u64, chunk: u64) {
        self.window_bytes += chunk;
        let due = self
            .last_emit
            .is_none_or(|last| last.elapsed() >= self.interval);
        if due {
            self.emit(downloaded, total);
        }
    }

    /// Emit unconditionally (end of transfer)
    pub(crate) fn finish(&mut self, downloaded: u64, total: u64) {
        self.emit(downloaded, total);
    }

    /// Restart speed measurement after an interruption
    pub(crate) fn restart_window(&mut self) {
        self.window_start = Instant::now();
        self.window_bytes = 0;
    }

    fn emit(&mut self, downloaded: u64, total: u64) {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed > 0.0 && self.window_bytes > 0 {
            self.speed_bps = (self.window_bytes as f64 / elapsed) as u64;
        }
        self.window_start = Instant::now();
        self.window_bytes = 0;
        self.last_emit = Some(Instant::now());

        (self.callback)(ProgressNotification {
            downloaded_bytes: downloaded,
            total_size: total,
            speed_bps: self.speed_bps,
        });
    }
}

/// How a streamed body ended
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    /// Body fully written; total bytes in the file
    Finished(u64),
    /// Stopped by the interrupt token; bytes in the file so far
    Interrupted(u64),
}

/// Stream a response body into `file`, starting at byte `downloaded`
pub(crate) async fn stream_body(
    response: reqwest::Response,
    file: &mut tokio::fs::File,
    mut downloaded: u64,
    total: u64,
    throttle: &mut ProgressThrottle,
    interrupt: Option<&CancellationToken>,
) -> Result<StreamEnd> {
    let mut stream = response.bytes_stream();

    loop {
        let next = match interrupt {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    file.flush().await?;
                    return Ok(StreamEnd::Interrupted(downloaded));
                }
                chunk = stream.next() => chunk,
            },
            None => stream.next().await,
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        throttle.record(downloaded, total, chunk.len() as u64);
    }

    file.flush().await?;
    Ok(StreamEnd::Finished(downloaded))
}

/// Reject a finished transfer whose byte count disagrees with the known size
pub(crate) fn check_size(params: &TransferParams, written: u64, expected: u64) -> Result<()> {
    if expected > 0 && written != expected {
        return Err(Error::Transfer(format!(
            "size mismatch for {}: expected {} bytes, received {}",
            params.file_name, expected, written
        )));
    }
    Ok(())
}

/// Backend for [`HttpProvider`]
pub struct HttpBackend {
    client: reqwest::Client,
    progress_interval: Duration,
}

impl HttpBackend {
    /// Registry id
    pub const ID: &'static str = "http";

    /// Build the backend from download settings
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        })
    }
}

#[async_trait]
impl ProviderBackend for HttpBackend {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: Self::ID.to_string(),
            allow_pause: false,
            description: "single-stream HTTP GET".to_string(),
        }
    }

    fn create(&self, params: TransferParams, on_progress: ProgressCallback) -> Arc<dyn Provider> {
        Arc::new(HttpProvider::new(
            self.client.clone(),
            params,
            on_progress,
            self.progress_interval,
        ))
    }
}

/// Non-pausable provider streaming one GET response to disk
///
/// `remove` aborts a running transfer; `start` then fails with
/// [`Error::Canceled`].
pub struct HttpProvider {
    client: reqwest::Client,
    params: TransferParams,
    total_size: AtomicU64,
    on_progress: ProgressCallback,
    progress_interval: Duration,
    removed: CancellationToken,
}

impl HttpProvider {
    /// Create a provider for one transfer
    pub fn new(
        client: reqwest::Client,
        params: TransferParams,
        on_progress: ProgressCallback,
        progress_interval: Duration,
    ) -> Self {
        let total_size = AtomicU64::new(params.total_size);
        Self {
            client,
            params,
            total_size,
            on_progress,
            progress_interval,
            removed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn allow_pause(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        HttpBackend::ID
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.params.dir).await?;
        if self.total_size.load(Ordering::Relaxed) == 0
            && let Some(size) = probe_remote_size(&self.client, &self.params.url).await
        {
            self.total_size.store(size, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let response = tokio::select! {
            biased;
            _ = self.removed.cancelled() => return Err(Error::Canceled),
            response = self.client.get(&self.params.url).send() => response?,
        };
        if !response.status().is_success() {
            return Err(Error::Transfer(format!(
                "HTTP {} fetching {}",
                response.status(),
                self.params.url
            )));
        }

        let mut total = self.total_size.load(Ordering::Relaxed);
        if total == 0
            && let Some(len) = response.content_length()
        {
            total = len;
            self.total_size.store(len, Ordering::Relaxed);
        }

        let path = self.params.target_path();
        let mut file = tokio::fs::File::create(&path).await?;
        let mut throttle = ProgressThrottle::new(self.on_progress.clone(), self.progress_interval);

        tracing::debug!(url = %self.params.url, path = %path.display(), total, "http transfer started");
        let written = match stream_body(
            response,
            &mut file,
            0,
            total,
            &mut throttle,
            Some(&self.removed),
        )
        .await?
        {
            StreamEnd::Finished(written) => written,
            StreamEnd::Interrupted(_) => return Err(Error::Canceled),
        };

        check_size(&self.params, written, total)?;
        throttle.finish(written, total.max(written));
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.removed.cancel();
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressNotification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
        (callback, seen)
    }

    fn provider_for(
        server: &MockServer,
        dir: &std::path::Path,
        total_size: u64,
        on_progress: ProgressCallback,
    ) -> HttpProvider {
        let backend = HttpBackend::new(&DownloadConfig::default()).unwrap();
        HttpProvider::new(
            backend.client.clone(),
            TransferParams {
                url: format!("{}/files/a.bin", server.uri()),
                file_name: "a.bin".into(),
                dir: dir.to_path_buf(),
                total_size,
            },
            on_progress,
            Duration::from_millis(0),
        )
    }

    #[tokio::test]
    async fn downloads_body_and_reports_final_progress() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4096];
        Mock::given(method("GET"))
            .and(path("/files/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested");
        let (callback, seen) = recorder();
        let provider = provider_for(&server, &target, 4096, callback);

        provider.init().await.unwrap();
        provider.start().await.unwrap();

        assert_eq!(std::fs::read(target.join("a.bin")).unwrap(), body);
        let last = *seen.lock().unwrap().last().unwrap();
        assert_eq!(last.downloaded_bytes, 4096);
        assert_eq!(last.total_size, 4096);
    }

    #[tokio::test]
    async fn unknown_size_is_learned_from_response() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 100]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (callback, seen) = recorder();
        let provider = provider_for(&server, dir.path(), 0, callback);

        provider.init().await.unwrap();
        provider.start().await.unwrap();

        let last = *seen.lock().unwrap().last().unwrap();
        assert_eq!(last.total_size, 100);
    }

    #[tokio::test]
    async fn http_error_status_fails_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (callback, _) = recorder();
        let provider = provider_for(&server, dir.path(), 10, callback);

        let err = provider.start().await.unwrap_err();
        assert!(matches!(err, Error::Transfer(ref msg) if msg.contains("404")), "{err}");
    }

    #[tokio::test]
    async fn size_mismatch_is_a_transfer_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (callback, _) = recorder();
        let provider = provider_for(&server, dir.path(), 20, callback);

        let err = provider.start().await.unwrap_err();
        assert!(err.to_string().contains("size mismatch"), "{err}");
    }

    #[tokio::test]
    async fn pause_and_resume_are_not_supported() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let (callback, _) = recorder();
        let provider = provider_for(&server, dir.path(), 1, callback);

        assert!(!provider.allow_pause());
        assert!(matches!(provider.pause().await, Err(Error::NotSupported(_))));
        assert!(matches!(provider.resume().await, Err(Error::NotSupported(_))));
    }

    #[tokio::test]
    async fn remove_aborts_running_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 32])
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (callback, _) = recorder();
        let provider = Arc::new(provider_for(&server, dir.path(), 32, callback));

        let running = provider.clone();
        let transfer = tokio::spawn(async move { running.start().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        provider.remove().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), transfer)
            .await
            .expect("removed transfer should stop")
            .unwrap();
        assert!(matches!(outcome, Err(Error::Canceled)));
    }

    #[test]
    fn throttle_emits_first_and_final_notifications() {
        let (callback, seen) = recorder();
        let mut throttle = ProgressThrottle::new(callback, Duration::from_secs(3600));

        throttle.record(10, 100, 10);
        throttle.record(20, 100, 10);
        throttle.record(30, 100, 10);
        throttle.finish(100, 100);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "only the first record and finish may emit");
        assert_eq!(seen[0].downloaded_bytes, 10);
        assert_eq!(seen[1].downloaded_bytes, 100);
    }

    #[test]
    fn content_length_header_is_parsed() {
        let mut headers = HeaderMap::new();
        assert_eq!(header_content_length(&headers), None);
        headers.insert(CONTENT_LENGTH, "512".parse().unwrap());
        assert_eq!(header_content_length(&headers), Some(512));
    }
}
