//! Scripted provider backend whose transfers finish only when the test says so

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use taskfetch::{
    Error, ProgressCallback, ProgressNotification, Provider, ProviderBackend, ProviderInfo, Result,
    TransferParams,
};

/// Id the scripted backend is registered under
pub const SCRIPTED: &str = "scripted";

/// Shared script and counters for every provider the backend creates
pub struct Script {
    pub allow_pause: bool,
    pub body: Vec<u8>,
    /// Fail the next `start()` call, then behave normally
    pub fail_next_start: AtomicBool,
    /// One permit finishes one transfer
    pub gate: Semaphore,
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub paused: AtomicUsize,
    pub resumed: AtomicUsize,
    pub removed: AtomicUsize,
}

impl Script {
    pub fn new(allow_pause: bool) -> Arc<Self> {
        Arc::new(Self {
            allow_pause,
            body: vec![0x5a; 1024],
            fail_next_start: AtomicBool::new(false),
            gate: Semaphore::new(0),
            created: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            paused: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
        })
    }

    /// Let `n` held transfers finish
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct ScriptedBackend {
    pub script: Arc<Script>,
}

#[async_trait]
impl ProviderBackend for ScriptedBackend {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: SCRIPTED.to_string(),
            allow_pause: self.script.allow_pause,
            description: "scripted test transfers".to_string(),
        }
    }

    fn create(&self, params: TransferParams, on_progress: ProgressCallback) -> Arc<dyn Provider> {
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptedProvider {
            script: self.script.clone(),
            params,
            on_progress,
            removed: CancellationToken::new(),
        })
    }
}

struct ScriptedProvider {
    script: Arc<Script>,
    params: TransferParams,
    on_progress: ProgressCallback,
    removed: CancellationToken,
}

impl ScriptedProvider {
    fn progress(&self, downloaded_bytes: u64) {
        (self.on_progress)(ProgressNotification {
            downloaded_bytes,
            total_size: self.script.body.len() as u64,
            speed_bps: 0,
        });
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn allow_pause(&self) -> bool {
        self.script.allow_pause
    }

    fn name(&self) -> &str {
        SCRIPTED
    }

    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.params.dir).await?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let script = &self.script;
        script.started.fetch_add(1, Ordering::SeqCst);
        let now = script.active.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_active.fetch_max(now, Ordering::SeqCst);

        let half = script.body.len() / 2;
        tokio::fs::write(self.params.target_path(), &script.body[..half]).await?;
        self.progress(half as u64);

        let outcome = tokio::select! {
            permit = script.gate.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    if script.fail_next_start.swap(false, Ordering::SeqCst) {
                        Err(Error::Transfer("scripted failure".to_string()))
                    } else {
                        tokio::fs::write(self.params.target_path(), &script.body)
                            .await
                            .map_err(Error::from)
                    }
                }
                Err(_) => Err(Error::Other("gate closed".to_string())),
            },
            _ = self.removed.cancelled() => Err(Error::Canceled),
        };

        script.active.fetch_sub(1, Ordering::SeqCst);
        outcome?;
        self.progress(script.body.len() as u64);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.script.paused.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.script.resumed.fetch_add(1, Ordering::SeqCst);
        self.progress(self.script.body.len() as u64 / 2);
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.script.removed.fetch_add(1, Ordering::SeqCst);
        self.removed.cancel();
        Ok(())
    }
}
