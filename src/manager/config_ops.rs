//! Runtime configuration updates.

use super::DownloadManager;
use crate::config::{Config, ConfigUpdate};
use crate::error::Result;

impl DownloadManager {
    /// Get a copy of the current configuration
    pub fn get_config(&self) -> Config {
        self.ctx.config.snapshot()
    }

    /// Update runtime-changeable configuration settings
    ///
    /// Provider and cache directory changes apply to tasks started afterwards.
    /// A raised `max_downloading_tasks` admits waiting tasks immediately; a
    /// lowered one takes effect as running tasks release their slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the resulting
    /// configuration is invalid; nothing is changed in that case.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use taskfetch::{Config, ConfigUpdate, DownloadManager};
    /// # fn example(manager: DownloadManager) -> taskfetch::Result<()> {
    /// manager.update_config(ConfigUpdate {
    ///     max_downloading_tasks: Some(5),
    ///     ..Default::default()
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn update_config(&self, update: ConfigUpdate) -> Result<Config> {
        let config = self.ctx.config.apply(&update)?;
        self.ctx.pool.rebalance();

        tracing::info!(
            provider = %config.download.provider,
            cache_dir = %config.download.cache_dir.display(),
            max_downloading_tasks = config.download.max_downloading_tasks,
            "configuration updated"
        );
        Ok(config)
    }
}
