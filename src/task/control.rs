//! Task control: command dispatch for pause, continue, cancel and retry.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{DownloadTask, lock};
use crate::commands::is_allowed;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::types::{Command, StateKind};
use crate::utils::try_delete_file;

impl DownloadTask {
    /// Apply a command to the task
    ///
    /// The command is checked against the legality table for the current
    /// state and provider first; an illegal command changes nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::IllegalCommand`] if the command is not accepted right now
    /// - [`Error::NotSupported`] if the provider cannot pause mid-transfer
    /// - the provider failure that moved the task to `error`
    ///
    /// `cancel` never fails once accepted.
    pub async fn command(&self, command: Command, payload: Option<serde_json::Value>) -> Result<()> {
        let state = self.kind();
        if !is_allowed(state, self.allow_pause(), command) {
            return Err(Error::IllegalCommand {
                command,
                state: state.map_or_else(|| "unstarted".to_string(), |s| s.to_string()),
                payload: payload.map(|p| p.to_string()),
            });
        }

        tracing::debug!(task_id = %self.inner.id, %command, state = ?state, "command accepted");
        match command {
            Command::Pause => self.handle_pause().await,
            Command::Continue => self.handle_continue().await,
            Command::Cancel => {
                self.handle_cancel().await;
                Ok(())
            }
            Command::Retry => self.handle_retry().await,
        }
    }

    /// Shorthand for `command(Command::Pause, None)`
    pub async fn pause(&self) -> Result<()> {
        self.command(Command::Pause, None).await
    }

    /// Shorthand for `command(Command::Continue, None)`
    pub async fn resume(&self) -> Result<()> {
        self.command(Command::Continue, None).await
    }

    /// Shorthand for `command(Command::Cancel, None)`
    pub async fn cancel(&self) -> Result<()> {
        self.command(Command::Cancel, None).await
    }

    /// Shorthand for `command(Command::Retry, None)`
    pub async fn retry(&self) -> Result<()> {
        self.command(Command::Retry, None).await
    }

    async fn handle_pause(&self) -> Result<()> {
        let Some(provider) = self.enter_pause()? else {
            return Ok(());
        };
        if let Err(e) = provider.pause().await {
            return Err(self.fail(e));
        }
        tracing::info!(task_id = %self.inner.id, "transfer paused");
        Ok(())
    }

    /// Move a queuing or downloading task to `paused`
    ///
    /// Returns the provider when its transfer has to be paused as well. While
    /// the task still waits for its first slot the provider is untouched and
    /// the queued run is parked through `queuing_paused` instead.
    fn enter_pause(&self) -> Result<Option<Arc<dyn Provider>>> {
        let flags = &self.inner.flags;
        if self.kind() == Some(StateKind::Queuing) && !flags.provider_started.load(Ordering::SeqCst)
        {
            flags.queuing_paused.store(true, Ordering::SeqCst);
            self.transition(|m| m.to_paused())?;
            return Ok(None);
        }

        let provider = self.current_provider()?;
        if !provider.allow_pause() {
            return Err(Error::NotSupported(format!(
                "provider {} cannot pause a running transfer",
                provider.name()
            )));
        }
        self.transition(|m| m.to_paused())?;
        Ok(Some(provider))
    }

    async fn handle_continue(&self) -> Result<()> {
        let flags = &self.inner.flags;

        if flags.queuing_paused.swap(false, Ordering::SeqCst) {
            if !flags.provider_started.load(Ordering::SeqCst) {
                let token = self.next_ticket(self.current_token());
                tracing::debug!(task_id = %self.inner.id, "re-queuing after pause while queued");
                return self.download(token).await;
            }
            tracing::debug!(task_id = %self.inner.id, "transfer already issued, continue is a no-op");
            return Ok(());
        }

        if flags.transfer_done.load(Ordering::SeqCst) {
            tracing::debug!(task_id = %self.inner.id, "transfer finished while paused, validating");
            if let Err(e) = self.report_transfer_finished().await {
                return Err(self.fail(e));
            }
            return self.complete_transfer(self.current_token()).await;
        }

        let provider = self.current_provider()?;
        if !provider.allow_pause() {
            return Err(Error::NotSupported(format!(
                "provider {} cannot resume a transfer",
                provider.name()
            )));
        }

        let token = self.next_ticket(self.current_token());
        self.transition(|m| m.to_queuing())?;
        let permit = self.inner.ctx.pool.queue().await;
        if self.admission_superseded(token) {
            tracing::debug!(task_id = %self.inner.id, "resume no longer wanted after admission");
            drop(permit);
            return Ok(());
        }
        self.store_permit(permit);

        // Progress from the provider moves the task back to `downloading`.
        if let Err(e) = provider.resume().await {
            return Err(self.fail(e));
        }
        tracing::info!(task_id = %self.inner.id, "transfer resumed");
        Ok(())
    }

    async fn handle_cancel(&self) {
        let inner = &self.inner;
        inner.flags.canceled.store(true, Ordering::SeqCst);

        // Same path as the pause command, skipped where it could only be refused.
        let kind = self.kind();
        let waiting_for_slot = !inner.flags.provider_started.load(Ordering::SeqCst);
        if matches!(kind, Some(StateKind::Queuing | StateKind::Downloading))
            && (self.allow_pause() || (kind == Some(StateKind::Queuing) && waiting_for_slot))
        {
            let paused = match self.enter_pause() {
                Ok(Some(provider)) => provider.pause().await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = paused {
                tracing::warn!(task_id = %inner.id, error = %e, "pause before cancel failed");
            }
        }

        let provider = lock(&inner.provider).clone();
        if let Some(provider) = &provider
            && let Err(e) = provider.remove().await
        {
            tracing::warn!(task_id = %inner.id, provider = provider.name(), error = %e, "provider cleanup failed");
        }

        if let Some(meta) = self.meta() {
            try_delete_file(&meta.target_path()).await;
        }

        if !self.kind().is_some_and(StateKind::is_terminal) {
            let _ = self.transition(|m| m.to_error(Error::Canceled.to_string()));
        }
        inner.ctx.pool.remove(&inner.id);
        tracing::info!(task_id = %inner.id, "task canceled");
    }

    async fn handle_retry(&self) -> Result<()> {
        let inner = &self.inner;

        if let Some(meta) = self.meta() {
            try_delete_file(&meta.target_path()).await;
        }
        inner.ctx.pool.remove(&inner.id);
        inner.machine.remove_listeners();
        inner.machine.reset();
        lock(&inner.permit).take();

        let old_provider = lock(&inner.provider).take();
        if let Some(provider) = old_provider
            && let Err(e) = provider.remove().await
        {
            tracing::debug!(task_id = %inner.id, error = %e, "discarded provider cleanup failed");
        }

        tracing::info!(task_id = %inner.id, "retrying task");
        self.start().await
    }
}
