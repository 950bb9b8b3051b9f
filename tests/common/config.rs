//! Test manager construction around the scripted backend

use std::sync::Arc;
use tempfile::TempDir;
use taskfetch::{
    CacheProbe, ChecksumValidator, Config, DownloadConfig, DownloadManager, FsCacheProbe,
    IntegrityValidator, ProviderRegistry, TaskParams,
};

use super::providers::{SCRIPTED, Script, ScriptedBackend};

/// Manager whose default provider is the scripted backend
pub fn scripted_manager(max_downloading_tasks: usize, script: Arc<Script>) -> (DownloadManager, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let config = Config {
        download: DownloadConfig {
            provider: SCRIPTED.to_string(),
            cache_dir: temp_dir.path().to_path_buf(),
            max_downloading_tasks,
            ..Default::default()
        },
    };

    let mut registry = ProviderRegistry::new();
    registry.register(SCRIPTED, Arc::new(ScriptedBackend { script }));
    let validator: Arc<dyn IntegrityValidator> = Arc::new(ChecksumValidator::new());
    let cache: Arc<dyn CacheProbe> = Arc::new(FsCacheProbe::new(validator.clone()));

    let manager = DownloadManager::with_collaborators(config, registry, cache, validator)
        .expect("Failed to create manager");
    (manager, temp_dir)
}

/// Params for a scripted download of `name`
pub fn params(name: &str) -> TaskParams {
    TaskParams {
        url: format!("scripted://files/{name}"),
        file_name: name.to_string(),
        total_size: 1024,
        integrity: None,
    }
}
