//! Recording coordinator
//!
//! Every recording operation (start, stop, frames, clips, chunk cuts) runs
//! on one actor task, so the chunk counter, retention and the clip retry
//! map are only ever touched in a single linear order. [`Recorder`] is the
//! cloneable handle that feeds that task.

use super::chunk_buffer::{ChunkBuffer, FrameOutcome};
use super::encoder::{Encoder, Frame};
use super::state::{OpenChunks, RecordingError, RecordingEvent, RecordingResult, RecordingSettings, RecordingState};
use crate::clip::{ChunkPosition, ClipError, ClipExtractor, TrimOutcome, Trimmer};
use crate::store::RecordStore;
use crate::utils::fs::FileSystemProvider;
use chrono::Utc;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

enum Command {
    Start {
        settings: RecordingSettings,
        reference_time: Option<f64>,
        reply: oneshot::Sender<Result<PathBuf, RecordingError>>,
    },
    Frame {
        frame: Frame,
        reply: oneshot::Sender<FrameOutcome>,
    },
    Clip {
        start: f64,
        end: f64,
        reply: oneshot::Sender<Result<usize, ClipError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<RecordingResult, RecordingError>>,
    },
}

/// Handle to the recording actor
#[derive(Clone)]
pub struct Recorder {
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<RecordingState>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl Recorder {
    /// Spawn the recording actor on the current tokio runtime
    pub fn spawn(
        store: RecordStore,
        encoder: Box<dyn Encoder>,
        trimmer: Arc<dyn Trimmer>,
        fs: Arc<dyn FileSystemProvider>,
        open_chunks: OpenChunks,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (commands, rx) = mpsc::channel(64);
        let state = Arc::new(RwLock::new(RecordingState::Idle));

        let actor = RecorderActor {
            store,
            started: None,
            buffer: ChunkBuffer::new(encoder, fs.clone(), open_chunks),
            extractor: ClipExtractor::new(trimmer, fs, event_tx.clone()),
            state: state.clone(),
            event_tx: event_tx.clone(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            commands,
            state,
            event_tx,
        }
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Start recording into a new session, using the wall clock at start as
    /// the reference time for clip requests
    pub async fn start_recording(&self, settings: RecordingSettings) -> Result<PathBuf, RecordingError> {
        self.start(settings, None).await
    }

    /// Start recording with an explicit reference time, in seconds
    pub async fn start_recording_with_reference(
        &self,
        settings: RecordingSettings,
        reference_time: f64,
    ) -> Result<PathBuf, RecordingError> {
        self.start(settings, Some(reference_time)).await
    }

    async fn start(
        &self,
        settings: RecordingSettings,
        reference_time: Option<f64>,
    ) -> Result<PathBuf, RecordingError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            settings,
            reference_time,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RecordingError::RecorderNotReady)?
    }

    pub async fn handle_frame(&self, frame: Frame) -> Result<FrameOutcome, RecordingError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Frame { frame, reply }).await?;
        rx.await.map_err(|_| RecordingError::RecorderNotReady)
    }

    /// Request a clip covering absolute times `[start, end)`
    ///
    /// Returns the number of clip files the range was split into. Files are
    /// written asynchronously; watch for [`RecordingEvent::ClipSaved`].
    pub async fn make_clip(&self, start: f64, end: f64) -> Result<usize, ClipError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Clip { start, end, reply })
            .await
            .map_err(|_| ClipError::NotRecording)?;
        rx.await.map_err(|_| ClipError::NotRecording)?
    }

    /// Cut the final chunk, wait for outstanding clips and close the session
    pub async fn stop_recording(&self) -> Result<RecordingResult, RecordingError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| RecordingError::RecorderNotReady)?
    }

    async fn send(&self, command: Command) -> Result<(), RecordingError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RecordingError::RecorderNotReady)
    }
}

enum Event {
    Command(Option<Command>),
    Tick,
    Trimmed(Result<TrimOutcome, JoinError>),
}

/// Why the open chunk is being cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CutReason {
    /// The chunk timer fired
    Boundary,
    /// The encoder failed mid-chunk
    EncoderFailure,
    /// Recording is stopping; no chunk follows
    Stop,
}

struct RecorderActor {
    store: RecordStore,
    started: Option<Instant>,
    buffer: ChunkBuffer,
    extractor: ClipExtractor,
    state: Arc<RwLock<RecordingState>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl RecorderActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut ticker: Option<Interval> = None;
        let mut in_flight: JoinSet<TrimOutcome> = JoinSet::new();

        loop {
            let event = tokio::select! {
                command = rx.recv() => Event::Command(command),
                _ = tick(&mut ticker) => Event::Tick,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => Event::Trimmed(joined),
            };

            match event {
                Event::Command(None) => {
                    if *self.state.read() != RecordingState::Idle {
                        if let Err(e) = self.stop(&mut ticker, &mut in_flight).await {
                            tracing::error!("Failed to stop recording on shutdown: {}", e);
                        }
                    }
                    break;
                }
                Event::Command(Some(command)) => {
                    self.handle_command(command, &mut ticker, &mut in_flight).await;
                }
                Event::Tick => {
                    self.cut(CutReason::Boundary).await;
                }
                Event::Trimmed(Ok((request, result))) => {
                    let position = self.position();
                    self.extractor
                        .on_trim_finished(request, result, position, &mut in_flight);
                }
                Event::Trimmed(Err(e)) => tracing::error!("Trim task failed: {}", e),
            }
        }

        tracing::debug!("Recorder actor exited");
    }

    async fn handle_command(
        &mut self,
        command: Command,
        ticker: &mut Option<Interval>,
        in_flight: &mut JoinSet<TrimOutcome>,
    ) {
        match command {
            Command::Start {
                settings,
                reference_time,
                reply,
            } => {
                let result = self.start(settings, reference_time, ticker).await;
                let _ = reply.send(result);
            }
            Command::Frame { frame, reply } => {
                let outcome = self.buffer.handle_frame(&frame).await;
                if let FrameOutcome::CutRequired(reason) = &outcome {
                    tracing::warn!("Encoder failed, cutting chunk early: {}", reason);
                    let _ = self.event_tx.send(RecordingEvent::Error(reason.clone()));
                    // The timer keeps its grid so later chunks realign
                    self.cut(CutReason::EncoderFailure).await;
                }
                let _ = reply.send(outcome);
            }
            Command::Clip { start, end, reply } => {
                let result = if *self.state.read() == RecordingState::Recording {
                    let position = self.position();
                    self.extractor.make_clip(start, end, position, in_flight)
                } else {
                    Err(ClipError::NotRecording)
                };
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let result = self.stop(ticker, in_flight).await;
                let _ = reply.send(result);
            }
        }
    }

    fn position(&self) -> ChunkPosition {
        ChunkPosition {
            active: self.buffer.active_chunk(),
            current: self.buffer.current_chunk(),
        }
    }

    async fn start(
        &mut self,
        settings: RecordingSettings,
        reference_time: Option<f64>,
        ticker: &mut Option<Interval>,
    ) -> Result<PathBuf, RecordingError> {
        if *self.state.read() != RecordingState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }

        let started_at = Utc::now();
        let session = self.store.create_session(started_at)?;
        let path = session.dir().to_path_buf();
        let reference_time =
            reference_time.unwrap_or_else(|| started_at.timestamp_millis() as f64 / 1000.0);

        tracing::info!("Starting recording to: {:?}", path);

        if let Err(e) = self
            .buffer
            .start_recording(session.clone(), settings.clone())
            .await
        {
            self.store.release(&session);
            return Err(e);
        }
        self.extractor
            .begin(session, reference_time, settings.chunk_length_f64());
        self.started = Some(Instant::now());

        if settings.chunking_enabled() {
            let period = settings.chunk_length();
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            *ticker = Some(interval);
        }

        *self.state.write() = RecordingState::Recording;
        let _ = self.event_tx.send(RecordingEvent::Started { path: path.clone() });

        tracing::info!("Recording started");
        Ok(path)
    }

    /// Cut the open chunk, replay its parked clips, then open the next one
    async fn cut(&mut self, reason: CutReason) {
        let finished = reason == CutReason::Stop;
        match self.buffer.cut_chunk(finished).await {
            Some(cut) => {
                let _ = self.event_tx.send(RecordingEvent::ChunkCut {
                    number: cut.number,
                    finished,
                });
                self.extractor.on_chunk_cut(cut.number).await;
            }
            None if finished => return,
            // A previous chunk failed to open; try again on this boundary
            None => {}
        }

        let pinned = self.extractor.pinned_chunks();
        if let Err(e) = self.buffer.begin_next_chunk(&pinned).await {
            tracing::error!("Failed to open next chunk: {}", e);
            let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
        }

        if let Some(index) = self.buffer.active_chunk() {
            let offset = self.chunk_offset(reason);
            tracing::debug!("Chunk {} starts at {:.3}s", index, offset);
            self.extractor.chunk_started(index, offset);
        }
    }

    /// Offset from recording start of a chunk opened now
    ///
    /// Timer cuts land on the chunk grid; an early cut starts the next chunk
    /// wherever the failure happened.
    fn chunk_offset(&self, reason: CutReason) -> f64 {
        let elapsed = self
            .started
            .map_or(0.0, |started| started.elapsed().as_secs_f64());
        let length = self.buffer.settings().chunk_length_f64();

        match reason {
            CutReason::Boundary if length > 0.0 => (elapsed / length).round() * length,
            _ => elapsed,
        }
    }

    async fn stop(
        &mut self,
        ticker: &mut Option<Interval>,
        in_flight: &mut JoinSet<TrimOutcome>,
    ) -> Result<RecordingResult, RecordingError> {
        if *self.state.read() == RecordingState::Idle {
            return Err(RecordingError::RecorderNotReady);
        }

        tracing::info!("Stopping recording");
        *self.state.write() = RecordingState::Stopping;
        *ticker = None;

        self.cut(CutReason::Stop).await;

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((request, result)) => {
                    let position = self.position();
                    self.extractor
                        .on_trim_finished(request, result, position, in_flight);
                }
                Err(e) => tracing::error!("Trim task failed: {}", e),
            }
        }

        let clip_count = self.extractor.finalize();
        let finished = self.buffer.finish();
        *self.state.write() = RecordingState::Idle;

        let (session, chunk_count) = finished.ok_or(RecordingError::RecorderNotReady)?;
        self.store.release(&session);

        let session_path = session.dir().to_path_buf();
        let _ = self.event_tx.send(RecordingEvent::Stopped {
            path: session_path.clone(),
        });

        tracing::info!(
            "Recording stopped: {} chunk(s), {} clip(s)",
            chunk_count,
            clip_count
        );

        Ok(RecordingResult {
            session_path,
            chunk_count,
            clip_count,
        })
    }
}
