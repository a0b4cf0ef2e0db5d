//! Clip extractor
//!
//! Turns time-range requests into clip files. Trims whose source chunk is
//! still being written are parked per chunk index and replayed when that
//! chunk is cut. Every chunk referenced by a parked or in-flight request is
//! pinned so retention leaves it alone.

use super::plan::{plan_clip, ChunkTimeline};
use super::trimmer::Trimmer;
use super::types::{ClipError, ClipKind, ClipPiece, ClipRequest, TrimError};
use crate::recorder::RecordingEvent;
use crate::store::{ClipLogEntry, RecordingSession};
use crate::utils::fs::FileSystemProvider;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Result of a dispatched trim, collected by the recorder
pub type TrimOutcome = (ClipRequest, Result<(), TrimError>);

/// Attempts before a request that keeps hitting an open source is dropped
const MAX_TRIM_ATTEMPTS: u32 = 3;

/// Where the chunk a request needs currently stands
#[derive(Debug, Clone, Copy)]
pub struct ChunkPosition {
    /// Chunk being written, if any
    pub active: Option<usize>,
    /// Chunk being written, or the next one to be opened
    pub current: usize,
}

pub struct ClipExtractor {
    trimmer: Arc<dyn Trimmer>,
    fs: Arc<dyn FileSystemProvider>,
    events: broadcast::Sender<RecordingEvent>,
    session: Option<RecordingSession>,
    reference_time: f64,
    timeline: ChunkTimeline,
    retry: BTreeMap<usize, Vec<ClipRequest>>,
    pinned: HashMap<usize, usize>,
    entries: Vec<ClipLogEntry>,
}

impl ClipExtractor {
    pub fn new(
        trimmer: Arc<dyn Trimmer>,
        fs: Arc<dyn FileSystemProvider>,
        events: broadcast::Sender<RecordingEvent>,
    ) -> Self {
        Self {
            trimmer,
            fs,
            events,
            session: None,
            reference_time: 0.0,
            timeline: ChunkTimeline::new(0.0),
            retry: BTreeMap::new(),
            pinned: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Start accepting clips for a session
    pub fn begin(&mut self, session: RecordingSession, reference_time: f64, chunk_length: f64) {
        self.session = Some(session);
        self.reference_time = reference_time;
        self.timeline = ChunkTimeline::new(chunk_length);
        self.retry.clear();
        self.pinned.clear();
        self.entries.clear();
    }

    /// Record the offset, relative to the reference time, a chunk was
    /// opened at
    pub fn chunk_started(&mut self, index: usize, offset: f64) {
        self.timeline.record_start(index, offset);
    }

    pub fn is_accepting(&self) -> bool {
        self.session.is_some()
    }

    /// Chunks that retention must not delete
    pub fn pinned_chunks(&self) -> HashSet<usize> {
        self.pinned.keys().copied().collect()
    }

    /// Requests parked for a chunk
    pub fn parked(&self, chunk_index: usize) -> usize {
        self.retry.get(&chunk_index).map_or(0, Vec::len)
    }

    pub fn entries(&self) -> &[ClipLogEntry] {
        &self.entries
    }

    /// Plan `[start, end)` and submit one request per piece
    ///
    /// Returns the number of pieces. Trims are spawned onto `in_flight`;
    /// whole-chunk copies of closed chunks complete before this returns.
    pub fn make_clip(
        &mut self,
        start: f64,
        end: f64,
        position: ChunkPosition,
        in_flight: &mut JoinSet<TrimOutcome>,
    ) -> Result<usize, ClipError> {
        let session = self.session.clone().ok_or(ClipError::NotRecording)?;
        // Pieces may reach at most one chunk past the one being written
        let last_chunk = position.current.saturating_add(1);
        let pieces = plan_clip(self.reference_time, &self.timeline, last_chunk, start, end)?;

        tracing::info!(
            "Clip [{:.3}, {:.3}] maps to {} piece(s)",
            start,
            end,
            pieces.len()
        );

        let count = pieces.len();
        for piece in pieces {
            let request = self.request_for(&session, piece);
            self.submit(request, position, in_flight);
        }
        Ok(count)
    }

    fn request_for(&self, session: &RecordingSession, piece: ClipPiece) -> ClipRequest {
        let source_path = if self.timeline.chunk_length() > 0.0 {
            session.chunk_path(piece.chunk_index)
        } else {
            session.continuous_path()
        };
        let dest_path = session.clip_path(piece.log_start, piece.log_end);
        let name = dest_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        ClipRequest {
            source_chunk_index: piece.chunk_index,
            source_path,
            dest_path,
            kind: piece.kind,
            trim: piece.trim,
            log_entry: ClipLogEntry::new(name, piece.log_start, piece.log_end),
            attempts: 0,
        }
    }

    fn submit(&mut self, request: ClipRequest, position: ChunkPosition, in_flight: &mut JoinSet<TrimOutcome>) {
        let index = request.source_chunk_index;

        if index >= position.current {
            if request.kind == ClipKind::Trim && position.active == Some(index) {
                self.dispatch(request, in_flight);
            } else {
                self.park(request);
            }
            return;
        }

        if !self.fs.exists(&request.source_path) {
            tracing::warn!(
                "Dropping clip {}: chunk {} was already removed",
                request.log_entry.name,
                index
            );
            return;
        }

        match request.kind {
            ClipKind::Copy => self.copy_now(request),
            ClipKind::Trim => self.dispatch(request, in_flight),
        }
    }

    fn dispatch(&mut self, request: ClipRequest, in_flight: &mut JoinSet<TrimOutcome>) {
        self.pin(request.source_chunk_index);
        let trimmer = self.trimmer.clone();
        in_flight.spawn(async move {
            let result = trimmer
                .trim(&request.source_path, &request.dest_path, request.trim)
                .await;
            (request, result)
        });
    }

    fn park(&mut self, request: ClipRequest) {
        tracing::debug!(
            "Parking clip {} until chunk {} is cut",
            request.log_entry.name,
            request.source_chunk_index
        );
        self.pin(request.source_chunk_index);
        self.retry
            .entry(request.source_chunk_index)
            .or_default()
            .push(request);
    }

    /// Handle the result of a dispatched trim
    pub fn on_trim_finished(
        &mut self,
        mut request: ClipRequest,
        result: Result<(), TrimError>,
        position: ChunkPosition,
        in_flight: &mut JoinSet<TrimOutcome>,
    ) {
        let index = request.source_chunk_index;
        self.unpin(index);

        match result {
            Ok(()) => self.record(request.log_entry),
            Err(TrimError::SourceNotExportable(_)) => {
                request.attempts += 1;
                if position.active == Some(index) {
                    self.park(request);
                } else if request.attempts < MAX_TRIM_ATTEMPTS {
                    // The chunk was cut while the trim was running
                    self.dispatch(request, in_flight);
                } else {
                    tracing::warn!(
                        "Dropping clip {} after {} attempts",
                        request.log_entry.name,
                        request.attempts
                    );
                }
            }
            Err(e) => {
                tracing::error!("Failed to trim clip {}: {}", request.log_entry.name, e);
                let _ = self.events.send(RecordingEvent::Error(e.to_string()));
            }
        }
    }

    /// Replay every request parked for a chunk that has just been cut
    ///
    /// Requests run in the order they were parked and all complete before
    /// this returns.
    pub async fn on_chunk_cut(&mut self, number: usize) -> usize {
        let Some(pending) = self.retry.remove(&number) else {
            return 0;
        };

        let count = pending.len();
        tracing::debug!("Retrying {} clip(s) for chunk {}", count, number);

        for request in pending {
            self.unpin(number);

            match request.kind {
                ClipKind::Copy => self.copy_now(request),
                ClipKind::Trim => {
                    let result = self
                        .trimmer
                        .trim(&request.source_path, &request.dest_path, request.trim)
                        .await;
                    match result {
                        Ok(()) => self.record(request.log_entry),
                        Err(e) => {
                            tracing::error!(
                                "Retried clip {} failed: {}",
                                request.log_entry.name,
                                e
                            );
                            let _ = self.events.send(RecordingEvent::Error(e.to_string()));
                        }
                    }
                }
            }
        }

        count
    }

    /// Stop accepting clips and close the log
    ///
    /// Requests still parked belong to chunks that were never cut and are
    /// dropped. Returns the number of logged clips.
    pub fn finalize(&mut self) -> usize {
        for (index, requests) in std::mem::take(&mut self.retry) {
            for request in requests {
                tracing::warn!(
                    "Dropping clip {}: chunk {} was never cut",
                    request.log_entry.name,
                    index
                );
            }
        }
        self.pinned.clear();

        if let Some(session) = self.session.take() {
            if let Err(e) = session.write_clip_log(&self.entries) {
                tracing::error!("Failed to write clip log for {:?}: {}", session.dir(), e);
            }
        }

        self.entries.len()
    }

    fn copy_now(&mut self, request: ClipRequest) {
        match self.fs.copy(&request.source_path, &request.dest_path) {
            Ok(bytes) => {
                tracing::debug!(
                    "Copied chunk {} ({} bytes) to {:?}",
                    request.source_chunk_index,
                    bytes,
                    request.dest_path
                );
                self.record(request.log_entry);
            }
            Err(e) => {
                tracing::error!(
                    "Failed to copy chunk {} for clip {}: {}",
                    request.source_chunk_index,
                    request.log_entry.name,
                    e
                );
            }
        }
    }

    fn record(&mut self, entry: ClipLogEntry) {
        self.entries.push(entry.clone());

        if let Some(session) = &self.session {
            if let Err(e) = session.write_clip_log(&self.entries) {
                tracing::error!("Failed to update clip log: {}", e);
            }
        }

        tracing::info!("Saved clip {} [{:.3}, {:.3}]", entry.name, entry.start, entry.end);
        let _ = self.events.send(RecordingEvent::ClipSaved(entry));
    }

    fn pin(&mut self, index: usize) {
        *self.pinned.entry(index).or_insert(0) += 1;
    }

    fn unpin(&mut self, index: usize) {
        if let Some(count) = self.pinned.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(&index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::TrimRange;
    use crate::recorder::testing::FakeTrimmer;
    use crate::recorder::OpenChunks;
    use crate::utils::fs::LocalFileSystem;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        session: RecordingSession,
        open: OpenChunks,
        trimmer: FakeTrimmer,
        extractor: ClipExtractor,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let session = RecordingSession::open(dir.path(), "mp4");
        let open = OpenChunks::new();
        let trimmer = FakeTrimmer::new(open.clone());
        let (events, _) = broadcast::channel(16);
        let mut extractor =
            ClipExtractor::new(Arc::new(trimmer.clone()), Arc::new(LocalFileSystem), events);
        extractor.begin(session.clone(), 0.0, 5.0);
        Fixture {
            _dir: dir,
            session,
            open,
            trimmer,
            extractor,
        }
    }

    fn closed(current: usize) -> ChunkPosition {
        ChunkPosition {
            active: None,
            current,
        }
    }

    async fn drain(fx: &mut Fixture, in_flight: &mut JoinSet<TrimOutcome>, position: ChunkPosition) {
        while let Some(joined) = in_flight.join_next().await {
            let (request, result) = joined.unwrap();
            fx.extractor.on_trim_finished(request, result, position, in_flight);
        }
    }

    #[tokio::test]
    async fn test_spanning_clip_over_closed_chunks() {
        let mut fx = fixture();
        for i in 0..3 {
            std::fs::write(fx.session.chunk_path(i), format!("chunk {}", i)).unwrap();
        }

        let mut in_flight = JoinSet::new();
        let count = fx
            .extractor
            .make_clip(3.0, 12.0, closed(3), &mut in_flight)
            .unwrap();
        assert_eq!(count, 3);
        drain(&mut fx, &mut in_flight, closed(3)).await;

        let mut entries = fx.extractor.entries().to_vec();
        entries.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
        assert_eq!(
            entries,
            vec![
                ClipLogEntry::new("3000-5000.mp4", 3.0, 5.0),
                ClipLogEntry::new("5000-10000.mp4", 5.0, 10.0),
                ClipLogEntry::new("10000-12000.mp4", 10.0, 12.0),
            ]
        );

        let copied = std::fs::read_to_string(fx.session.dir().join("5000-10000.mp4")).unwrap();
        assert_eq!(copied, "chunk 1");
        assert_eq!(fx.trimmer.calls().len(), 2);
        assert!(fx.extractor.pinned_chunks().is_empty());
        assert_eq!(fx.session.read_clip_log().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_open_chunk_trim_is_parked_and_replayed_on_cut() {
        let mut fx = fixture();
        let chunk = fx.session.chunk_path(0);
        std::fs::write(&chunk, "chunk 0").unwrap();
        fx.open.insert(&chunk);

        let active = ChunkPosition {
            active: Some(0),
            current: 0,
        };
        let mut in_flight = JoinSet::new();
        fx.extractor.make_clip(1.0, 2.0, active, &mut in_flight).unwrap();
        drain(&mut fx, &mut in_flight, active).await;

        assert_eq!(fx.extractor.parked(0), 1);
        assert!(fx.extractor.pinned_chunks().contains(&0));
        assert!(fx.extractor.entries().is_empty());

        fx.open.remove(&chunk);
        assert_eq!(fx.extractor.on_chunk_cut(0).await, 1);

        assert_eq!(fx.extractor.parked(0), 0);
        assert!(fx.extractor.pinned_chunks().is_empty());
        assert_eq!(
            fx.extractor.entries(),
            &[ClipLogEntry::new("1000-2000.mp4", 1.0, 2.0)]
        );
    }

    #[tokio::test]
    async fn test_future_chunk_is_parked_directly() {
        let mut fx = fixture();
        let position = ChunkPosition {
            active: Some(0),
            current: 0,
        };
        let mut in_flight = JoinSet::new();

        fx.extractor.make_clip(6.0, 7.0, position, &mut in_flight).unwrap();

        assert!(in_flight.is_empty());
        assert_eq!(fx.extractor.parked(1), 1);
        assert!(fx.trimmer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pruned_chunk_is_dropped() {
        let mut fx = fixture();
        let mut in_flight = JoinSet::new();

        fx.extractor.make_clip(1.0, 2.0, closed(2), &mut in_flight).unwrap();

        assert!(in_flight.is_empty());
        assert!(fx.extractor.entries().is_empty());
        assert!(fx.extractor.pinned_chunks().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_drops_parked_and_closes_log() {
        let mut fx = fixture();
        let mut in_flight = JoinSet::new();
        fx.extractor.make_clip(11.0, 12.0, closed(1), &mut in_flight).unwrap();
        assert_eq!(fx.extractor.parked(2), 1);

        assert_eq!(fx.extractor.finalize(), 0);
        assert!(!fx.extractor.is_accepting());
        assert!(fx.session.clip_log_path().exists());

        let err = fx
            .extractor
            .make_clip(1.0, 2.0, closed(1), &mut in_flight)
            .unwrap_err();
        assert!(matches!(err, ClipError::NotRecording));
    }

    #[tokio::test]
    async fn test_range_far_past_recording_is_rejected() {
        let mut fx = fixture();
        let position = ChunkPosition {
            active: Some(0),
            current: 0,
        };
        let mut in_flight = JoinSet::new();

        let err = fx
            .extractor
            .make_clip(0.0, 1e13, position, &mut in_flight)
            .unwrap_err();
        assert!(matches!(err, ClipError::InvalidRange { .. }));

        // One chunk past the one being written is still accepted
        assert_eq!(
            fx.extractor.make_clip(4.0, 10.0, position, &mut in_flight).unwrap(),
            2
        );
        assert!(fx
            .extractor
            .make_clip(4.0, 10.5, position, &mut in_flight)
            .is_err());
        assert_eq!(fx.extractor.parked(1), 1);
        assert_eq!(fx.extractor.parked(2), 0);
    }

    #[tokio::test]
    async fn test_trims_follow_recorded_chunk_starts() {
        let mut fx = fixture();
        for i in 0..3 {
            std::fs::write(fx.session.chunk_path(i), format!("chunk {}", i)).unwrap();
        }
        fx.extractor.chunk_started(1, 2.0);
        fx.extractor.chunk_started(2, 5.0);

        let mut in_flight = JoinSet::new();
        fx.extractor
            .make_clip(3.0, 8.0, closed(3), &mut in_flight)
            .unwrap();
        drain(&mut fx, &mut in_flight, closed(3)).await;

        let mut calls = fx.trimmer.calls();
        calls.sort_by_key(|call| call.source.clone());
        assert_eq!(calls[0].source, fx.session.chunk_path(1));
        assert_eq!(calls[0].range, TrimRange::new(1.0, 3.0));
        assert_eq!(calls[1].source, fx.session.chunk_path(2));
        assert_eq!(calls[1].range, TrimRange::new(0.0, 3.0));

        let mut names: Vec<String> = fx.extractor.entries().iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["3000-5000.mp4", "5000-8000.mp4"]);
    }
}
