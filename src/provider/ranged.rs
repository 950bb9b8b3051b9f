//! Pausable HTTP provider using range requests
//!
//! `pause` interrupts the in-flight stream and parks `start`. `resume` wakes
//! it and the transfer continues with `Range: bytes=<offset>-`, appending to
//! the partial file. Servers that ignore the range get a fresh download.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::http::{
    ProgressThrottle, StreamEnd, build_client, check_size, probe_remote_size, stream_body,
};
use super::traits::{ProgressCallback, Provider, ProviderBackend, ProviderInfo, TransferParams};
use crate::config::DownloadConfig;
use crate::error::{Error, Result};

/// What to do with the response to a (possibly ranged) request
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ResumePlan {
    /// Append the body to the partial file at this offset
    Append(u64),
    /// Server sent the whole file; truncate and start over
    Restart,
    /// Nothing left to fetch
    AlreadyComplete,
}

/// Decide how to treat a response given the offset that was requested
pub(crate) fn plan_resume(status: StatusCode, offset: u64) -> Result<ResumePlan> {
    match status {
        StatusCode::PARTIAL_CONTENT if offset > 0 => Ok(ResumePlan::Append(offset)),
        StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => Ok(ResumePlan::AlreadyComplete),
        status if status.is_success() && offset > 0 => Ok(ResumePlan::Restart),
        status if status.is_success() => Ok(ResumePlan::Append(0)),
        status => Err(Error::Transfer(format!("HTTP {}", status))),
    }
}

/// Backend for [`RangedHttpProvider`]
pub struct RangedHttpBackend {
    client: reqwest::Client,
    progress_interval: Duration,
}

impl RangedHttpBackend {
    /// Registry id
    pub const ID: &'static str = "http-ranged";

    /// Build the backend from download settings
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        })
    }
}

#[async_trait]
impl ProviderBackend for RangedHttpBackend {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: Self::ID.to_string(),
            allow_pause: true,
            description: "HTTP with in-session pause via range requests".to_string(),
        }
    }

    fn create(&self, params: TransferParams, on_progress: ProgressCallback) -> Arc<dyn Provider> {
        Arc::new(RangedHttpProvider::new(
            self.client.clone(),
            params,
            on_progress,
            self.progress_interval,
        ))
    }
}

struct PauseControl {
    paused: bool,
    interrupt: CancellationToken,
}

/// Pausable provider; the partial file survives a pause within the session
pub struct RangedHttpProvider {
    client: reqwest::Client,
    params: TransferParams,
    total_size: AtomicU64,
    downloaded: AtomicU64,
    on_progress: ProgressCallback,
    progress_interval: Duration,
    control: Mutex<PauseControl>,
    resumed: Notify,
    removed: CancellationToken,
}

impl RangedHttpProvider {
    /// Create a provider for one transfer
    pub fn new(
        client: reqwest::Client,
        params: TransferParams,
        on_progress: ProgressCallback,
        progress_interval: Duration,
    ) -> Self {
        let removed = CancellationToken::new();
        let total_size = AtomicU64::new(params.total_size);
        Self {
            client,
            params,
            total_size,
            downloaded: AtomicU64::new(0),
            on_progress,
            progress_interval,
            control: Mutex::new(PauseControl {
                paused: false,
                interrupt: removed.child_token(),
            }),
            resumed: Notify::new(),
            removed,
        }
    }

    /// Bytes in the partial file
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Whether the transfer is currently parked by `pause`
    pub fn is_paused(&self) -> bool {
        self.control().paused
    }

    fn control(&self) -> MutexGuard<'_, PauseControl> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Token for the next leg of the transfer, or None while paused
    fn active_interrupt(&self) -> Option<CancellationToken> {
        let control = self.control();
        (!control.paused).then(|| control.interrupt.clone())
    }

    async fn wait_for_resume(&self) -> Result<()> {
        loop {
            // Registered before the check so a resume in between is not lost.
            let resumed = self.resumed.notified();
            if self.removed.is_cancelled() {
                return Err(Error::Canceled);
            }
            if !self.control().paused {
                return Ok(());
            }
            tokio::select! {
                _ = resumed => {}
                _ = self.removed.cancelled() => return Err(Error::Canceled),
            }
        }
    }

    async fn open_for(&self, plan: &ResumePlan) -> Result<tokio::fs::File> {
        let path = self.params.target_path();
        let file = match plan {
            ResumePlan::Append(offset) if *offset > 0 => {
                tokio::fs::OpenOptions::new()
                    .append(true)
                    .open(&path)
                    .await?
            }
            _ => tokio::fs::File::create(&path).await?,
        };
        Ok(file)
    }
}

#[async_trait]
impl Provider for RangedHttpProvider {
    fn allow_pause(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        RangedHttpBackend::ID
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
        let mut throttle = ProgressThrottle::new(self.on_progress.clone(), self.progress_interval);
        self.downloaded.store(0, Ordering::Relaxed);

        loop {
            if self.removed.is_cancelled() {
                return Err(Error::Canceled);
            }
            let Some(interrupt) = self.active_interrupt() else {
                self.wait_for_resume().await?;
                throttle.restart_window();
                continue;
            };

            let offset = self.downloaded.load(Ordering::Relaxed);
            let mut request = self.client.get(&self.params.url);
            if offset > 0 {
                request = request.header(RANGE, format!("bytes={}-", offset));
            }

            let response = tokio::select! {
                biased;
                _ = interrupt.cancelled() => continue,
                response = request.send() => response?,
            };

            let plan = plan_resume(response.status(), offset)
                .map_err(|e| Error::Transfer(format!("{} fetching {}", e, self.params.url)))?;
            let mut total = self.total_size.load(Ordering::Relaxed);

            let start_at = match plan {
                ResumePlan::AlreadyComplete => {
                    check_size(&self.params, offset, total)?;
                    throttle.finish(offset, total.max(offset));
                    return Ok(());
                }
                ResumePlan::Restart => {
                    tracing::debug!(url = %self.params.url, offset, "server ignored range, restarting");
                    0
                }
                ResumePlan::Append(at) => at,
            };

            if total == 0
                && start_at == 0
                && let Some(len) = response.content_length()
            {
                total = len;
                self.total_size.store(len, Ordering::Relaxed);
            }

            let mut file = self.open_for(&plan).await?;
            let end = stream_body(
                response,
                &mut file,
                start_at,
                total,
                &mut throttle,
                Some(&interrupt),
            )
            .await?;

            match end {
                StreamEnd::Finished(written) => {
                    self.downloaded.store(written, Ordering::Relaxed);
                    check_size(&self.params, written, total)?;
                    throttle.finish(written, total.max(written));
                    return Ok(());
                }
                StreamEnd::Interrupted(written) => {
                    self.downloaded.store(written, Ordering::Relaxed);
                    tracing::debug!(url = %self.params.url, offset = written, "transfer interrupted");
                }
            }
        }
    }

    async fn pause(&self) -> Result<()> {
        if self.removed.is_cancelled() {
            return Err(Error::Canceled);
        }
        let mut control = self.control();
        if !control.paused {
            control.paused = true;
            control.interrupt.cancel();
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        if self.removed.is_cancelled() {
            return Err(Error::Canceled);
        }
        {
            let mut control = self.control();
            if !control.paused {
                return Ok(());
            }
            control.paused = false;
            control.interrupt = self.removed.child_token();
        }
        self.resumed.notify_waiters();
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.removed.cancel();
        self.resumed.notify_waiters();
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProgressNotification;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer, dir: &std::path::Path, total_size: u64) -> Arc<RangedHttpProvider> {
        let backend = RangedHttpBackend::new(&DownloadConfig::default()).unwrap();
        let callback: ProgressCallback = Arc::new(|_: ProgressNotification| {});
        Arc::new(RangedHttpProvider::new(
            backend.client.clone(),
            TransferParams {
                url: format!("{}/pkg.bin", server.uri()),
                file_name: "pkg.bin".into(),
                dir: dir.to_path_buf(),
                total_size,
            },
            callback,
            Duration::from_millis(0),
        ))
    }

    async fn wait_until_requested(server: &MockServer, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if server.received_requests().await.unwrap_or_default().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("request never reached the server");
    }

    #[test]
    fn resume_plan_follows_status() {
        assert_eq!(plan_resume(StatusCode::OK, 0).unwrap(), ResumePlan::Append(0));
        assert_eq!(
            plan_resume(StatusCode::PARTIAL_CONTENT, 512).unwrap(),
            ResumePlan::Append(512)
        );
        assert_eq!(plan_resume(StatusCode::OK, 512).unwrap(), ResumePlan::Restart);
        assert_eq!(
            plan_resume(StatusCode::RANGE_NOT_SATISFIABLE, 512).unwrap(),
            ResumePlan::AlreadyComplete
        );
        assert!(plan_resume(StatusCode::NOT_FOUND, 0).is_err());
        assert!(plan_resume(StatusCode::RANGE_NOT_SATISFIABLE, 0).is_err());
    }

    #[tokio::test]
    async fn downloads_without_interruption() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pkg.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 2048]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider_for(&server, dir.path(), 2048);
        provider.init().await.unwrap();
        provider.start().await.unwrap();

        assert_eq!(provider.downloaded_bytes(), 2048);
        assert_eq!(std::fs::read(dir.path().join("pkg.bin")).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn pause_parks_start_until_resume() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pkg.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![9u8; 256])
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider_for(&server, dir.path(), 256);
        provider.init().await.unwrap();

        let running = provider.clone();
        let transfer = tokio::spawn(async move { running.start().await });
        wait_until_requested(&server, 1).await;

        provider.pause().await.unwrap();
        assert!(provider.is_paused());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!transfer.is_finished(), "paused transfer must stay parked");

        provider.resume().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), transfer)
            .await
            .expect("resumed transfer should finish")
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("pkg.bin")).unwrap().len(), 256);
    }

    #[tokio::test]
    async fn remove_aborts_parked_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 64])
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let provider = provider_for(&server, dir.path(), 64);

        let running = provider.clone();
        let transfer = tokio::spawn(async move { running.start().await });
        wait_until_requested(&server, 1).await;

        provider.pause().await.unwrap();
        provider.remove().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), transfer)
            .await
            .expect("removed transfer should stop")
            .unwrap();
        assert!(matches!(outcome, Err(Error::Canceled)));
        assert!(matches!(provider.resume().await, Err(Error::Canceled)));
    }

    #[tokio::test]
    async fn repeated_pause_and_resume_are_idempotent() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let provider = provider_for(&server, dir.path(), 1);

        provider.pause().await.unwrap();
        provider.pause().await.unwrap();
        assert!(provider.is_paused());
        provider.resume().await.unwrap();
        provider.resume().await.unwrap();
        assert!(!provider.is_paused());
    }
}
