//! Sync engine
//!
//! A pass runs four stages strictly in order, each joined before the next:
//! clean, telemetry archive, images archive, then videos smallest-first.
//! Per-item failures skip the item and never abort the pass.

use super::archiver::Archiver;
use super::network::{NetworkClient, NetworkError};
use super::quota::{QuotaError, RecordingQuota};
use super::types::{SyncError, SyncEvent, SyncReport, SyncSettings, SyncStatus};
use crate::store::{RecordStore, RecordingSession};
use crate::utils::executor::run_stage;
use crate::utils::fs::{extension_of, FileSystemProvider};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TELEMETRY_ARCHIVE: &str = "telemetry";
const IMAGES_ARCHIVE: &str = "images";

/// Small-artifact categories bundled into one archive per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKind {
    Telemetry,
    Images,
}

impl ArtifactKind {
    fn stem(&self) -> &'static str {
        match self {
            ArtifactKind::Telemetry => TELEMETRY_ARCHIVE,
            ArtifactKind::Images => IMAGES_ARCHIVE,
        }
    }
}

/// A video file waiting for upload
#[derive(Debug, Clone)]
struct PendingVideo {
    session: RecordingSession,
    path: PathBuf,
    size: u64,
}

pub struct SyncEngine {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    store: RecordStore,
    fs: Arc<dyn FileSystemProvider>,
    archiver: Arc<dyn Archiver>,
    network: Arc<dyn NetworkClient>,
    quota: Arc<RecordingQuota>,
    settings: SyncSettings,
    device_id: String,
    status: RwLock<SyncStatus>,
    pending: AtomicBool,
    cancel: Mutex<CancellationToken>,
    last_report: RwLock<Option<SyncReport>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(
        store: RecordStore,
        fs: Arc<dyn FileSystemProvider>,
        archiver: Arc<dyn Archiver>,
        network: Arc<dyn NetworkClient>,
        quota: Arc<RecordingQuota>,
        mut settings: SyncSettings,
    ) -> Self {
        let device_id = settings.ensure_device_id().to_string();
        let (event_tx, _) = broadcast::channel(100);

        Self {
            inner: Arc::new(SyncInner {
                store,
                fs,
                archiver,
                network,
                quota,
                settings,
                device_id,
                status: RwLock::new(SyncStatus::Idle),
                pending: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
                last_report: RwLock::new(None),
                event_tx,
            }),
        }
    }

    pub fn status(&self) -> SyncStatus {
        *self.inner.status.read()
    }

    /// Whether another pass will run after the current one
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        *self.inner.last_report.read()
    }

    pub fn remote_folder(&self, session: &RecordingSession) -> String {
        self.inner.remote_folder(session)
    }

    /// Trigger a pass
    ///
    /// When a pass is already running this only flags another one to follow
    /// it and returns `None`; otherwise it returns the task running the
    /// passes.
    pub fn sync(&self) -> Option<JoinHandle<()>> {
        {
            let mut status = self.inner.status.write();
            if *status == SyncStatus::Syncing {
                self.inner.pending.store(true, Ordering::SeqCst);
                tracing::debug!("Sync already running, coalescing request");
                return None;
            }
            *status = SyncStatus::Syncing;
        }

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            loop {
                // A pass runs on its own task so a panic still ends it
                let pass = inner.clone();
                match tokio::spawn(async move { pass.run_pass().await }).await {
                    Ok(report) => *inner.last_report.write() = Some(report),
                    Err(e) => {
                        tracing::error!("Sync pass aborted: {}", e);
                        let _ = inner.event_tx.send(SyncEvent::Stopped);
                    }
                }

                let again = {
                    let mut status = inner.status.write();
                    if inner.pending.swap(false, Ordering::SeqCst) {
                        true
                    } else {
                        *status = SyncStatus::Idle;
                        false
                    }
                };
                if !again {
                    break;
                }
            }
        }))
    }

    /// Cancel outstanding uploads and drop any coalesced request
    ///
    /// Cancelled items are left untouched on disk and retried next pass.
    pub fn stop_sync(&self) {
        tracing::info!("Stopping sync");
        self.inner.pending.store(false, Ordering::SeqCst);
        {
            let mut token = self.inner.cancel.lock();
            token.cancel();
            *token = CancellationToken::new();
        }
        self.inner.network.cancel();
    }
}

struct ArtifactJob {
    session: RecordingSession,
    kind: ArtifactKind,
}

impl SyncInner {
    fn remote_folder(&self, session: &RecordingSession) -> String {
        self.settings.remote_folder(&session.name(), &self.device_id)
    }

    /// Sessions the recorder is not writing to
    fn idle_sessions(&self) -> Vec<RecordingSession> {
        match self.store.sessions() {
            Ok(sessions) => sessions
                .into_iter()
                .filter(|s| !self.store.is_active(s.dir()))
                .collect(),
            Err(e) => {
                tracing::error!("Failed to list sessions: {}", e);
                Vec::new()
            }
        }
    }

    async fn run_pass(self: &Arc<Self>) -> SyncReport {
        let token = self.cancel.lock().clone();
        let _ = self.event_tx.send(SyncEvent::Started);
        tracing::info!("Sync pass started");

        let mut report = SyncReport {
            removed_dirs: self.clean(),
            ..Default::default()
        };

        for kind in [ArtifactKind::Telemetry, ArtifactKind::Images] {
            if token.is_cancelled() {
                break;
            }
            report += self.upload_artifacts(kind, &token).await;
        }

        if !token.is_cancelled() {
            report += self.upload_videos(&token).await;
        }

        tracing::info!(
            "Sync pass finished: {} removed, {} archived, {} uploaded, {} skipped",
            report.removed_dirs,
            report.archives_created,
            report.uploads,
            report.skipped
        );
        let _ = self.event_tx.send(SyncEvent::Stopped);
        report
    }

    /// Evict synced sessions oldest-first while over the disk budget, plus
    /// every synced session of size zero and every empty unsynced one
    fn clean(&self) -> usize {
        let mut synced = Vec::new();
        let mut removed = 0;

        for session in self.idle_sessions() {
            let size = match session.dir_size(self.fs.as_ref()) {
                Ok(size) => size,
                Err(e) => {
                    tracing::warn!("Failed to size {:?}: {}", session.dir(), e);
                    continue;
                }
            };

            if self.fs.exists(&session.synced_marker_path()) {
                synced.push((session, size));
            } else if self.fs.list(session.dir()).map_or(false, |e| e.is_empty()) {
                removed += usize::from(self.remove_dir(session.dir()));
            }
        }

        let mut total: u64 = synced.iter().map(|(_, size)| size).sum();
        for (session, size) in synced {
            if size == 0 || total > self.settings.disk_budget_bytes {
                if self.remove_dir(session.dir()) {
                    removed += 1;
                    total -= size;
                }
            }
        }

        removed
    }

    fn remove_dir(&self, dir: &Path) -> bool {
        match self.fs.remove(dir) {
            Ok(()) => {
                tracing::info!("Removed session {:?}", dir);
                true
            }
            Err(e) => {
                tracing::error!("Failed to remove session {:?}: {}", dir, e);
                false
            }
        }
    }

    async fn upload_artifacts(
        self: &Arc<Self>,
        kind: ArtifactKind,
        token: &CancellationToken,
    ) -> SyncReport {
        let jobs: Vec<ArtifactJob> = self
            .idle_sessions()
            .into_iter()
            .map(|session| ArtifactJob { session, kind })
            .collect();

        let outcomes = run_stage(
            kind.stem(),
            jobs,
            self.settings.max_concurrent_uploads,
            |job| {
                let inner = self.clone();
                let token = token.clone();
                async move { inner.sync_artifact(job, token).await }
            },
        )
        .await;

        let mut report = SyncReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(created) => {
                    report.uploads += 1;
                    report.archives_created += usize::from(created);
                }
                Err(SyncError::NoRequestedFiles(dir)) => {
                    tracing::debug!("No {} files in {:?}", kind.stem(), dir);
                }
                Err(e) => {
                    tracing::warn!("Skipping {} upload: {}", kind.stem(), e);
                    report.skipped += 1;
                }
            }
        }
        report
    }

    fn artifact_files(&self, job: &ArtifactJob) -> Result<Vec<PathBuf>, SyncError> {
        let files = match job.kind {
            ArtifactKind::Telemetry => self
                .fs
                .list(job.session.dir())?
                .into_iter()
                .filter(|path| !self.fs.is_dir(path))
                .filter(|path| {
                    extension_of(path).map_or(false, |ext| self.settings.is_telemetry(&ext))
                })
                .collect(),
            ArtifactKind::Images => {
                let dir = job.session.images_dir();
                if !self.fs.is_dir(&dir) {
                    Vec::new()
                } else {
                    self.fs
                        .list(&dir)?
                        .into_iter()
                        .filter(|path| !self.fs.is_dir(path))
                        .collect()
                }
            }
        };
        Ok(files)
    }

    /// Archive, reserve, upload, then delete and mark one session category
    ///
    /// Returns whether a new archive was created.
    async fn sync_artifact(
        &self,
        job: ArtifactJob,
        token: CancellationToken,
    ) -> Result<bool, SyncError> {
        let archive = job.session.archive_path(job.kind.stem());
        let originals = self.artifact_files(&job)?;

        // An archive left by a failed upload is reused as is
        let created = if self.fs.exists(&archive) {
            false
        } else {
            if originals.is_empty() {
                return Err(SyncError::NoRequestedFiles(job.session.dir().to_path_buf()));
            }
            let archiver = self.archiver.clone();
            let files = originals.clone();
            let dest = archive.clone();
            tokio::task::spawn_blocking(move || archiver.archive(&files, &dest))
                .await
                .map_err(|e| SyncError::ArchiveCreationFailed(e.to_string()))??;
            true
        };

        let size = self.fs.size(&archive)?;
        self.quota.reserve(size)?;

        let folder = self.remote_folder(&job.session);
        self.upload(&archive, &folder, &token).await?;

        for file in &originals {
            if let Err(e) = self.fs.remove(file) {
                tracing::warn!("Failed to remove synced file {:?}: {}", file, e);
            }
        }
        self.fs.remove(&archive)?;
        if job.kind == ArtifactKind::Images {
            self.fs.remove(&job.session.images_dir())?;
        }

        job.session
            .mark_synced(self.fs.as_ref())
            .map_err(|e| SyncError::SyncFileCreationFailed {
                path: job.session.synced_marker_path(),
                reason: e.to_string(),
            })?;

        Ok(created)
    }

    fn pending_videos(&self) -> Vec<PendingVideo> {
        let mut videos = Vec::new();
        for session in self.idle_sessions() {
            let entries = match self.fs.list(session.dir()) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Failed to list {:?}: {}", session.dir(), e);
                    continue;
                }
            };
            for path in entries {
                let is_video = !self.fs.is_dir(&path)
                    && extension_of(&path).map_or(false, |ext| self.settings.is_video(&ext));
                if !is_video {
                    continue;
                }
                match self.fs.size(&path) {
                    Ok(size) => videos.push(PendingVideo {
                        session: session.clone(),
                        path,
                        size,
                    }),
                    Err(e) => tracing::warn!("Failed to size {:?}: {}", path, e),
                }
            }
        }

        videos.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.path.cmp(&b.path)));
        videos
    }

    /// Reserve smallest-first, then upload everything that fit
    async fn upload_videos(self: &Arc<Self>, token: &CancellationToken) -> SyncReport {
        let mut report = SyncReport::default();
        let mut admitted = Vec::new();

        for video in self.pending_videos() {
            match self.quota.reserve(video.size) {
                Ok(()) => admitted.push(video),
                Err(QuotaError::QuotaExceeded { requested, remaining }) => {
                    tracing::info!(
                        "Deferring {:?}: needs {} bytes, {} remaining",
                        video.path,
                        requested,
                        remaining
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!("Quota unavailable for {:?}: {}", video.path, e);
                    report.skipped += 1;
                }
            }
        }

        let outcomes = run_stage(
            "videos",
            admitted,
            self.settings.max_concurrent_uploads,
            |video| {
                let inner = self.clone();
                let token = token.clone();
                async move {
                    let folder = inner.remote_folder(&video.session);
                    inner.upload(&video.path, &folder, &token).await?;
                    inner.fs.remove(&video.path)?;
                    Ok::<_, SyncError>(())
                }
            },
        )
        .await;

        for outcome in outcomes {
            match outcome {
                Ok(()) => report.uploads += 1,
                Err(e) => {
                    tracing::warn!("Skipping video upload: {}", e);
                    report.skipped += 1;
                }
            }
        }
        report
    }

    async fn upload(
        &self,
        file: &Path,
        folder: &str,
        token: &CancellationToken,
    ) -> Result<(), SyncError> {
        if token.is_cancelled() {
            return Err(NetworkError::Cancelled.into());
        }

        tokio::select! {
            _ = token.cancelled() => Err(NetworkError::Cancelled.into()),
            result = self.network.upload(file, folder) => {
                result?;
                let _ = self.event_tx.send(SyncEvent::Uploaded {
                    remote_folder: folder.to_string(),
                    file: file.to_path_buf(),
                });
                Ok(())
            }
        }
    }
}
