//! Task lifecycle: cache check, provider setup, admission, transfer, validation.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{DownloadTask, RunToken, TaskInner};
use crate::error::{Error, Result};
use crate::provider::{ProgressCallback, TransferParams};
use crate::types::{ProgressNotification, StateKind, TaskMeta};

impl DownloadTask {
    /// Run the task once from the top
    ///
    /// Resolves when the run reaches `completed` or `error`, or when a pause
    /// or cancel parked it at a checkpoint. A cache hit completes without
    /// constructing a provider.
    ///
    /// # Errors
    ///
    /// Returns the failure that moved the task to `error`, or
    /// [`Error::IllegalTransition`] if the task has already been started.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if let Some(current) = inner.machine.kind() {
            return Err(Error::IllegalTransition {
                from: Some(current),
                to: StateKind::Queuing,
            });
        }

        inner.flags.provider_started.store(false, Ordering::SeqCst);
        inner.flags.transfer_done.store(false, Ordering::SeqCst);
        inner.flags.queuing_paused.store(false, Ordering::SeqCst);
        inner.flags.canceled.store(false, Ordering::SeqCst);
        let token = self.next_run();

        let config = inner.ctx.config.snapshot();
        let meta = TaskMeta {
            provider_id: config.download.provider.clone(),
            resolved_dir: config.packages_dir(),
            params: inner.params.clone(),
        };
        *super::lock(&inner.meta) = Some(meta.clone());
        inner
            .ctx
            .pool
            .add(inner.id.clone(), inner.machine.state(), meta.clone());
        self.attach_to_machine();

        tracing::info!(
            task_id = %inner.id,
            provider = %meta.provider_id,
            url = %meta.params.url,
            "task started"
        );

        let target = meta.target_path();
        if inner
            .ctx
            .cache
            .exists_usable_file(&target, meta.params.total_size, meta.params.integrity.as_ref())
            .await
        {
            tracing::info!(task_id = %inner.id, path = %target.display(), "usable file already cached");
            return self.transition(|m| m.to_completed());
        }

        let backend = match inner.ctx.registry.prepare(&meta.provider_id).await {
            Ok(backend) => backend,
            Err(e) => return Err(self.fail(e)),
        };
        let provider = backend.create(TransferParams::from(&meta), self.progress_forwarder());
        *super::lock(&inner.provider) = Some(provider.clone());

        if let Err(e) = provider.init().await {
            return Err(self.fail(e));
        }
        tracing::debug!(task_id = %inner.id, provider = provider.name(), allow_pause = provider.allow_pause(), "provider initialized");

        self.download(token).await
    }

    /// Queue for a slot, then transfer and validate
    pub(crate) async fn download(&self, token: RunToken) -> Result<()> {
        let inner = &self.inner;
        self.transition(|m| m.to_queuing())?;

        let permit = inner.ctx.pool.queue().await;
        if self.admission_superseded(token) {
            tracing::debug!(task_id = %inner.id, "admitted run no longer wanted, stepping aside");
            drop(permit);
            return Ok(());
        }
        self.store_permit(permit);

        let provider = match self.current_provider() {
            Ok(provider) => provider,
            Err(e) => return Err(self.fail(e)),
        };
        inner.flags.provider_started.store(true, Ordering::SeqCst);
        tracing::debug!(task_id = %inner.id, "transfer starting");

        let outcome = provider.start().await;
        if self.run_superseded(token) {
            tracing::debug!(task_id = %inner.id, "transfer ended after cancel");
            super::lock(&inner.permit).take();
            return Ok(());
        }
        if let Err(e) = outcome {
            return Err(self.fail(e));
        }

        inner.flags.transfer_done.store(true, Ordering::SeqCst);
        self.complete_transfer(token).await
    }

    /// Validate and complete after the provider's transfer call succeeded
    ///
    /// A pause that raced the end of the transfer leaves the task `paused`;
    /// validation then waits for `continue`.
    pub(crate) async fn complete_transfer(&self, token: RunToken) -> Result<()> {
        let inner = &self.inner;
        match self.kind() {
            Some(StateKind::Downloading) => {}
            Some(StateKind::Queuing) => {
                tracing::debug!(task_id = %inner.id, "transfer finished without reporting progress");
                if let Err(e) = self.report_transfer_finished().await {
                    return Err(self.fail(e));
                }
            }
            Some(StateKind::Paused) => {
                tracing::debug!(task_id = %inner.id, "transfer finished while paused, validation waits for continue");
                return Ok(());
            }
            other => {
                tracing::debug!(task_id = %inner.id, state = ?other, "transfer finished after the task moved on");
                return Ok(());
            }
        }

        if let Err(e) = inner.machine.to_validating() {
            if self.kind() == Some(StateKind::Paused) {
                tracing::debug!(task_id = %inner.id, "paused before validation, waiting for continue");
                return Ok(());
            }
            return Err(self.fail(e));
        }

        if let Some(meta) = self.meta()
            && let Some(integrity) = &meta.params.integrity
            && let Err(e) = inner
                .ctx
                .validator
                .validate(&meta.target_path(), integrity)
                .await
        {
            if self.run_superseded(token) {
                return Ok(());
            }
            return Err(self.fail(e));
        }

        if self.run_superseded(token) {
            return Ok(());
        }
        if let Err(e) = inner.machine.to_completed() {
            return Err(self.fail(e));
        }
        tracing::info!(task_id = %inner.id, "task completed");
        Ok(())
    }

    /// Move to `downloading` with the size of the finished file
    pub(crate) async fn report_transfer_finished(&self) -> Result<()> {
        let size = match self.meta() {
            Some(meta) => tokio::fs::metadata(meta.target_path())
                .await
                .map(|m| m.len())
                .unwrap_or(meta.params.total_size),
            None => 0,
        };
        self.transition(|m| {
            m.to_downloading(ProgressNotification {
                downloaded_bytes: size,
                total_size: size,
                speed_bps: 0,
            })
        })
    }

    /// Progress callback handed to the provider
    ///
    /// Holds only a weak reference so a dropped task is not kept alive by its
    /// provider. Notifications outside `queuing`/`downloading` are dropped.
    fn progress_forwarder(&self) -> ProgressCallback {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |progress: ProgressNotification| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            forward_progress(&inner, progress);
        })
    }
}

fn forward_progress(inner: &TaskInner, progress: ProgressNotification) {
    match inner.machine.to_downloading_if_active(progress) {
        Ok(true) => {}
        Ok(false) => {
            tracing::trace!(task_id = %inner.id, "progress dropped, task not active");
        }
        Err(e) => {
            tracing::error!(task_id = %inner.id, error = %e, "progress transition rejected");
        }
    }
}
