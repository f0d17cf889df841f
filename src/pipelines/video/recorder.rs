// SPDX-License-Identifier: GPL-3.0-only

//! Recording sink
//!
//! Buffers are demultiplexed by media kind on a private serial worker. The
//! first buffer of each expected kind creates that kind's track; writing
//! starts once every expected track exists, at the timestamp of the buffer
//! that completed the set.
//!
//! ```text
//! Idle ─start─> WaitingForTracks ─all tracks─> Writing ─stop─> Finishing ─flushed─> Closed
//!                      └──────────────────stop──────────────────┘
//! ```

use super::encoder_selection::TrackSettings;
use super::muxer::{ContainerWriter, WriterFactory};
use crate::backends::camera::{FrameBuffer, FrameSink, MediaKind};
use crate::errors::RecordingError;
use crate::storage;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Called once when a stop request has been handled, with the output path
pub type Completion = Box<dyn FnOnce(Option<PathBuf>) + Send>;

/// Lifecycle of the recording sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    WaitingForTracks,
    Writing,
    Finishing,
    Closed,
}

impl RecordingState {
    /// A session exists and has not closed yet
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecordingState::WaitingForTracks | RecordingState::Writing | RecordingState::Finishing
        )
    }
}

/// Media kinds a session waits for before it starts writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedTracks(BTreeSet<MediaKind>);

impl ExpectedTracks {
    pub fn new(kinds: impl IntoIterator<Item = MediaKind>) -> Self {
        Self(kinds.into_iter().collect())
    }

    pub fn video_only() -> Self {
        Self::new([MediaKind::Video])
    }

    pub fn video_and_audio() -> Self {
        Self::new([MediaKind::Video, MediaKind::Audio])
    }

    pub fn contains(&self, kind: MediaKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = MediaKind> + '_ {
        self.0.iter().copied()
    }
}

/// Per-kind track of the active session
#[derive(Debug, Clone)]
pub struct TrackWriter {
    pub kind: MediaKind,
    pub settings: TrackSettings,
    pub ready_for_data: bool,
}

struct RecordingSession {
    output_path: PathBuf,
    writer: Box<dyn ContainerWriter>,
    tracks: BTreeMap<MediaKind, TrackWriter>,
    disabled: BTreeSet<MediaKind>,
    session_start: Option<Duration>,
    appended: u64,
    dropped: u64,
}

impl RecordingSession {
    fn new(output_path: PathBuf, writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            output_path,
            writer,
            tracks: BTreeMap::new(),
            disabled: BTreeSet::new(),
            session_start: None,
            appended: 0,
            dropped: 0,
        }
    }

    /// Every expected kind that is still enabled has a track
    fn has_all_tracks(&self, expected: &ExpectedTracks) -> bool {
        let mut enabled = expected
            .iter()
            .filter(|kind| !self.disabled.contains(kind))
            .peekable();
        enabled.peek().is_some() && enabled.all(|kind| self.tracks.contains_key(&kind))
    }
}

enum Command {
    Start(Box<RecordingSession>),
    Frame(FrameBuffer),
    Stop(Completion),
    Flush(mpsc::Sender<()>),
}

struct Shared {
    state: Mutex<RecordingState>,
    last_output: Mutex<Option<PathBuf>>,
}

impl Shared {
    fn state(&self) -> RecordingState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RecordingState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Move to `to` only if the state is still `from`
    fn transition(&self, from: RecordingState, to: RecordingState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn last_output(&self) -> Option<PathBuf> {
        self.last_output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Muxes filtered video and audio into a container file
pub struct RecordingSink {
    factory: Box<dyn WriterFactory>,
    output_dir: PathBuf,
    shared: Arc<Shared>,
    sender: Option<mpsc::Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl RecordingSink {
    /// Create an idle sink and spawn its worker
    pub fn new(
        factory: Box<dyn WriterFactory>,
        expected: ExpectedTracks,
        output_dir: PathBuf,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(RecordingState::Idle),
            last_output: Mutex::new(None),
        });
        let (sender, receiver) = mpsc::channel();

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("recording-worker".to_string())
            .spawn(move || Worker::new(expected, worker_shared).run(receiver));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "Failed to spawn recording worker");
                None
            }
        };

        Self {
            factory,
            output_dir,
            shared,
            sender: Some(sender),
            worker,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.shared.state()
    }

    /// Open a new output file and begin waiting for tracks.
    ///
    /// Returns the output path. Fails with [`RecordingError::AlreadyRecording`]
    /// while a session is active; a writer that cannot be opened leaves the
    /// state unchanged.
    pub fn start_recording(&self) -> Result<PathBuf, RecordingError> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_active() {
            return Err(RecordingError::AlreadyRecording);
        }

        let sender = match (&self.sender, &self.worker) {
            (Some(sender), Some(_)) => sender,
            _ => {
                return Err(RecordingError::SessionStartFailed(
                    "recording worker not running".to_string(),
                ));
            }
        };

        let output_path = storage::unique_recording_path(&self.output_dir)
            .map_err(|e| RecordingError::WriterOpenFailed(e.to_string()))?;
        let writer = self.factory.open(&output_path)?;

        sender
            .send(Command::Start(Box::new(RecordingSession::new(
                output_path.clone(),
                writer,
            ))))
            .map_err(|_| RecordingError::SessionStartFailed("worker stopped".to_string()))?;

        *state = RecordingState::WaitingForTracks;
        *self
            .shared
            .last_output
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(output_path.clone());

        info!(path = %output_path.display(), "Recording started");
        Ok(output_path)
    }

    /// Stop the active session.
    ///
    /// `completion` is invoked exactly once: after the container has been
    /// flushed when a session was active, otherwise right away with the last
    /// output path.
    pub fn stop_recording(&self, completion: impl FnOnce(Option<PathBuf>) + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());

        match *state {
            RecordingState::WaitingForTracks | RecordingState::Writing => {
                if let Some(sender) = &self.sender {
                    *state = RecordingState::Finishing;
                    drop(state);
                    info!("Stopping recording");
                    if let Err(mpsc::SendError(Command::Stop(completion))) =
                        sender.send(Command::Stop(Box::new(completion)))
                    {
                        warn!("Recording worker gone, nothing to finalize");
                        self.shared.set_state(RecordingState::Closed);
                        completion(self.shared.last_output());
                    }
                    return;
                }
                drop(state);
                completion(self.shared.last_output());
            }
            RecordingState::Finishing => {
                drop(state);
                debug!("Recording already finishing");
                completion(self.shared.last_output());
            }
            RecordingState::Idle | RecordingState::Closed => {
                drop(state);
                debug!("No active recording to stop");
                completion(self.shared.last_output());
            }
        }
    }

    /// Block until everything enqueued so far has been processed
    pub fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (tx, rx) = mpsc::channel();
        if sender.send(Command::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }
}

impl FrameSink for RecordingSink {
    fn on_frame(&self, frame: FrameBuffer) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Command::Frame(frame));
        }
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        // Closing the channel ends the worker, which finalizes any open session
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Owns all per-session track state; runs on the worker thread only
struct Worker {
    expected: ExpectedTracks,
    shared: Arc<Shared>,
    session: Option<RecordingSession>,
}

impl Worker {
    fn new(expected: ExpectedTracks, shared: Arc<Shared>) -> Self {
        Self {
            expected,
            shared,
            session: None,
        }
    }

    fn run(mut self, receiver: mpsc::Receiver<Command>) {
        debug!("Recording worker started");

        for command in receiver {
            match command {
                Command::Start(session) => self.session = Some(*session),
                Command::Frame(frame) => self.handle_frame(frame),
                Command::Stop(completion) => self.finish_session(completion),
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        if self.session.is_some() {
            warn!("Recording sink dropped while recording, finalizing");
            self.finish_session(Box::new(|_| {}));
        }
        debug!("Recording worker finished");
    }

    fn handle_frame(&mut self, frame: FrameBuffer) {
        // Buffers queued behind a stop find no session
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let kind = frame.kind();
        if !self.expected.contains(kind) || session.disabled.contains(&kind) {
            session.dropped += 1;
            return;
        }

        if !session.tracks.contains_key(&kind) {
            let settings = TrackSettings::for_buffer(&frame);
            match session.writer.add_track(&settings) {
                Ok(()) => {
                    debug!(%kind, ?settings, "Track created");
                    session.tracks.insert(
                        kind,
                        TrackWriter {
                            kind,
                            settings,
                            ready_for_data: false,
                        },
                    );
                }
                Err(e) => {
                    warn!(%kind, error = %e, "Track rejected, recording without it");
                    session.disabled.insert(kind);
                }
            }
        }

        if session.session_start.is_none() {
            if !session.has_all_tracks(&self.expected) {
                session.dropped += 1;
                return;
            }

            if let Err(e) = session.writer.start_session(frame.pts) {
                error!(error = %e, "Failed to start write session");
                self.abort_session();
                return;
            }
            session.session_start = Some(frame.pts);
            // A stop issued meanwhile keeps the session Finishing
            self.shared
                .transition(RecordingState::WaitingForTracks, RecordingState::Writing);
            info!(start = ?frame.pts, tracks = session.tracks.len(), "Writing recording");
        }

        if session.session_start.is_some_and(|start| frame.pts < start) {
            session.dropped += 1;
            return;
        }

        let ready = session.writer.is_ready_for_more(kind);
        let Some(track) = session.tracks.get_mut(&kind) else {
            session.dropped += 1;
            return;
        };
        if track.ready_for_data != ready {
            debug!(%kind, ready, "Track readiness changed");
            track.ready_for_data = ready;
        }
        if !ready {
            session.dropped += 1;
            return;
        }

        match session.writer.append(&frame) {
            Ok(()) => session.appended += 1,
            Err(e) => {
                session.dropped += 1;
                debug!(%kind, error = %e, "Append failed");
            }
        }
    }

    /// Session start failed; close the writer and give up on this recording
    fn abort_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.writer.finish(Box::new(|_| {}));
        }
        self.shared.set_state(RecordingState::Closed);
    }

    fn finish_session(&mut self, completion: Completion) {
        // Nothing left to close; the state belongs to whoever ended the session
        let Some(session) = self.session.take() else {
            completion(self.shared.last_output());
            return;
        };

        for track in session.tracks.values() {
            debug!(kind = %track.kind, settings = ?track.settings, "Closing track");
        }

        info!(
            path = %session.output_path.display(),
            appended = session.appended,
            dropped = session.dropped,
            "Finalizing recording"
        );

        let shared = Arc::clone(&self.shared);
        let path = session.output_path;
        session.writer.finish(Box::new(move |result| {
            if let Err(e) = result {
                error!(error = %e, "Recording did not finalize cleanly");
            }
            shared.set_state(RecordingState::Closed);
            completion(Some(path));
        }));
    }
}
