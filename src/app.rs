//! Wiring of the default collaborators

use crate::clip::FfmpegTrimmer;
use crate::config::Config;
use crate::recorder::{FfmpegEncoder, OpenChunks, Recorder};
use crate::store::RecordStore;
use crate::sync::{
    HttpNetworkClient, JsonFileQuotaStore, MemoryQuotaStore, QuotaStore, RecordingQuota,
    SyncEngine, ZipArchiver,
};
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::LocalFileSystem;
use std::sync::Arc;

/// Recorder and sync engine sharing one record store
pub struct ClipVault {
    pub config: Config,
    pub store: RecordStore,
    pub recorder: Recorder,
    pub sync: SyncEngine,
}

impl ClipVault {
    /// Build everything from a validated config
    ///
    /// Must be called inside a tokio runtime, which hosts the recorder.
    pub fn new(mut config: Config) -> AppResult<Self> {
        config.validate()?;
        config.sync.ensure_device_id();

        std::fs::create_dir_all(&config.recordings_root)?;
        let store = RecordStore::new(&config.recordings_root, config.recording.extension.clone());
        let fs = Arc::new(LocalFileSystem);
        let open_chunks = OpenChunks::new();

        let recorder = Recorder::spawn(
            store.clone(),
            Box::new(FfmpegEncoder::new()),
            Arc::new(FfmpegTrimmer::new(open_chunks.clone())),
            fs.clone(),
            open_chunks,
        );

        let quota_store: Box<dyn QuotaStore> = match &config.sync.quota_state_path {
            Some(path) => Box::new(JsonFileQuotaStore::new(path)),
            None => Box::new(MemoryQuotaStore::new()),
        };
        let quota = Arc::new(RecordingQuota::new(
            config.sync.quota_ceiling_bytes,
            config.sync.refresh_interval(),
            quota_store,
        ));

        let network = HttpNetworkClient::new(&config.sync.upload_base_url)
            .map_err(|e| AppError::Config(format!("Failed to build upload client: {}", e)))?;

        let sync = SyncEngine::new(
            store.clone(),
            fs,
            Arc::new(ZipArchiver),
            Arc::new(network),
            quota,
            config.sync.clone(),
        );

        tracing::info!(
            "ClipVault ready at {:?} (device {})",
            config.recordings_root,
            config.sync.device_id.as_deref().unwrap_or_default()
        );

        Ok(Self {
            config,
            store,
            recorder,
            sync,
        })
    }
}
