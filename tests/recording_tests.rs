// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the recording sink state machine

use filtercam::RecordingError;
use filtercam::backends::camera::{FrameBuffer, FrameSink, MediaKind, PixelFormat, SampleFormat};
use filtercam::pipelines::video::{
    ContainerWriter, ExpectedTracks, FinishCallback, RecordingSink, RecordingState,
    TrackSettings, WriterFactory,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    AddTrack(MediaKind),
    Start(Duration),
    Append(MediaKind, Duration),
    Finish,
}

#[derive(Debug, Clone, Copy, Default)]
struct Behavior {
    fail_open: bool,
    reject: Option<MediaKind>,
    not_ready: Option<MediaKind>,
}

type Events = Arc<Mutex<Vec<Event>>>;

/// Holds the worker inside a writer call until the test releases it
struct Gate {
    entered: Mutex<mpsc::Sender<&'static str>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Gate {
    fn new() -> (Arc<Self>, mpsc::Receiver<&'static str>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(Self {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        (gate, entered_rx, release_tx)
    }

    fn pass(&self, call: &'static str) {
        let _ = self.entered.lock().unwrap().send(call);
        // Bounded so a failed assertion cannot leave the worker parked
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
    }
}

struct MockWriter {
    path: PathBuf,
    events: Events,
    behavior: Behavior,
    gate: Option<Arc<Gate>>,
}

impl MockWriter {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn wait_at_gate(&self, call: &'static str) {
        if let Some(gate) = &self.gate {
            gate.pass(call);
        }
    }
}

impl ContainerWriter for MockWriter {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_track(&mut self, settings: &TrackSettings) -> Result<(), RecordingError> {
        if self.behavior.reject == Some(settings.kind()) {
            return Err(RecordingError::TrackRejected {
                kind: settings.kind(),
                reason: "unsupported".to_string(),
            });
        }
        self.record(Event::AddTrack(settings.kind()));
        Ok(())
    }

    fn start_session(&mut self, at: Duration) -> Result<(), RecordingError> {
        self.wait_at_gate("start_session");
        self.record(Event::Start(at));
        Ok(())
    }

    fn is_ready_for_more(&self, kind: MediaKind) -> bool {
        self.behavior.not_ready != Some(kind)
    }

    fn append(&mut self, frame: &FrameBuffer) -> Result<(), RecordingError> {
        self.wait_at_gate("append");
        self.record(Event::Append(frame.kind(), frame.pts));
        Ok(())
    }

    fn finish(self: Box<Self>, done: FinishCallback) {
        self.record(Event::Finish);
        done(Ok(()));
    }
}

struct MockFactory {
    events: Events,
    behavior: Behavior,
    gate: Option<Arc<Gate>>,
}

impl WriterFactory for MockFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, RecordingError> {
        if self.behavior.fail_open {
            return Err(RecordingError::WriterOpenFailed("read-only".to_string()));
        }
        Ok(Box::new(MockWriter {
            path: path.to_path_buf(),
            events: Arc::clone(&self.events),
            behavior: self.behavior,
            gate: self.gate.clone(),
        }))
    }
}

struct Harness {
    sink: RecordingSink,
    events: Events,
    dir: PathBuf,
}

impl Harness {
    fn new(expected: ExpectedTracks, behavior: Behavior) -> Self {
        Self::with_gate(expected, behavior, None)
    }

    fn with_gate(expected: ExpectedTracks, behavior: Behavior, gate: Option<Arc<Gate>>) -> Self {
        let events = Events::default();
        let dir = std::env::temp_dir().join(format!("filtercam-rec-{}", uuid::Uuid::new_v4()));
        let factory = MockFactory {
            events: Arc::clone(&events),
            behavior,
            gate,
        };
        Self {
            sink: RecordingSink::new(Box::new(factory), expected, dir.clone()),
            events,
            dir,
        }
    }

    fn events(&self) -> Vec<Event> {
        self.sink.flush();
        self.events.lock().unwrap().clone()
    }

    fn appended(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Append(..)))
            .count()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn video(ms: u64) -> FrameBuffer {
    FrameBuffer::video(
        vec![0u8; 16],
        PixelFormat::BGRA,
        2,
        2,
        8,
        Duration::from_millis(ms),
    )
}

fn audio(ms: u64) -> FrameBuffer {
    FrameBuffer::audio(
        vec![0u8; 8],
        SampleFormat::S16LE,
        44_100,
        1,
        Duration::from_millis(ms),
    )
}

#[test]
fn test_idle_sink_drops_buffers() {
    let harness = Harness::new(ExpectedTracks::video_only(), Behavior::default());

    for ms in 0..5 {
        harness.sink.on_frame(video(ms * 33));
    }

    assert!(harness.events().is_empty());
    assert_eq!(harness.sink.state(), RecordingState::Idle);
}

#[test]
fn test_session_starts_at_first_buffer_with_all_tracks() {
    let harness = Harness::new(ExpectedTracks::video_and_audio(), Behavior::default());
    harness.sink.start_recording().expect("start");
    assert_eq!(harness.sink.state(), RecordingState::WaitingForTracks);

    harness.sink.on_frame(video(0));
    harness.sink.on_frame(video(10));
    harness.sink.on_frame(audio(20));
    // Earlier than the session start
    harness.sink.on_frame(video(15));
    harness.sink.on_frame(video(30));

    assert_eq!(
        harness.events(),
        vec![
            Event::AddTrack(MediaKind::Video),
            Event::AddTrack(MediaKind::Audio),
            Event::Start(Duration::from_millis(20)),
            Event::Append(MediaKind::Audio, Duration::from_millis(20)),
            Event::Append(MediaKind::Video, Duration::from_millis(30)),
        ]
    );
    assert_eq!(harness.sink.state(), RecordingState::Writing);
}

#[test]
fn test_stop_twice_completes_both_with_path() {
    let harness = Harness::new(ExpectedTracks::video_only(), Behavior::default());
    let path = harness.sink.start_recording().expect("start");
    assert!(path.starts_with(&harness.dir));

    harness.sink.on_frame(video(0));
    harness.sink.flush();
    assert_eq!(harness.sink.state(), RecordingState::Writing);

    let (tx, rx) = mpsc::channel();
    let first = tx.clone();
    harness.sink.stop_recording(move |path| first.send(path).unwrap());
    harness.sink.stop_recording(move |path| tx.send(path).unwrap());

    let results: Vec<Option<PathBuf>> = rx.iter().take(2).collect();
    assert_eq!(results, vec![Some(path.clone()), Some(path)]);

    let finishes = harness
        .events()
        .iter()
        .filter(|event| **event == Event::Finish)
        .count();
    assert_eq!(finishes, 1);
    assert_eq!(harness.sink.state(), RecordingState::Closed);
}

#[test]
fn test_stop_without_session_completes_immediately() {
    let harness = Harness::new(ExpectedTracks::video_only(), Behavior::default());

    let (tx, rx) = mpsc::channel();
    harness.sink.stop_recording(move |path| tx.send(path).unwrap());

    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), None);
    assert!(harness.events().is_empty());
}

#[test]
fn test_buffers_after_stop_are_not_written() {
    let harness = Harness::new(ExpectedTracks::video_only(), Behavior::default());
    harness.sink.start_recording().expect("start");

    harness.sink.on_frame(video(0));
    harness.sink.stop_recording(|_| {});
    harness.sink.on_frame(video(33));

    assert_eq!(harness.appended(), 1);
}

#[test]
fn test_rejected_track_is_disabled() {
    let behavior = Behavior {
        reject: Some(MediaKind::Audio),
        ..Behavior::default()
    };
    let harness = Harness::new(ExpectedTracks::video_and_audio(), behavior);
    harness.sink.start_recording().expect("start");

    harness.sink.on_frame(audio(0));
    harness.sink.on_frame(video(5));
    harness.sink.on_frame(audio(10));

    assert_eq!(
        harness.events(),
        vec![
            Event::AddTrack(MediaKind::Video),
            Event::Start(Duration::from_millis(5)),
            Event::Append(MediaKind::Video, Duration::from_millis(5)),
        ]
    );
}

#[test]
fn test_start_while_recording_fails() {
    let harness = Harness::new(ExpectedTracks::video_only(), Behavior::default());
    harness.sink.start_recording().expect("start");

    assert!(matches!(
        harness.sink.start_recording(),
        Err(RecordingError::AlreadyRecording)
    ));
}

#[test]
fn test_open_failure_keeps_state() {
    let behavior = Behavior {
        fail_open: true,
        ..Behavior::default()
    };
    let harness = Harness::new(ExpectedTracks::video_only(), behavior);

    assert!(matches!(
        harness.sink.start_recording(),
        Err(RecordingError::WriterOpenFailed(_))
    ));
    assert_eq!(harness.sink.state(), RecordingState::Idle);
}

#[test]
fn test_unready_track_drops_buffers() {
    let behavior = Behavior {
        not_ready: Some(MediaKind::Video),
        ..Behavior::default()
    };
    let harness = Harness::new(ExpectedTracks::video_only(), behavior);
    harness.sink.start_recording().expect("start");

    for ms in 0..4 {
        harness.sink.on_frame(video(ms * 33));
    }

    assert_eq!(
        harness.events(),
        vec![Event::AddTrack(MediaKind::Video), Event::Start(Duration::ZERO)]
    );
}

#[test]
fn test_new_session_after_close() {
    let harness = Harness::new(ExpectedTracks::video_only(), Behavior::default());
    let first = harness.sink.start_recording().expect("start");
    harness.sink.on_frame(video(0));

    let (tx, rx) = mpsc::channel();
    harness.sink.stop_recording(move |path| tx.send(path).unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Some(first.clone()));

    let second = harness.sink.start_recording().expect("restart");
    assert_ne!(first, second);
}

#[test]
fn test_stop_during_session_start_stays_finishing() {
    let (gate, entered, release) = Gate::new();
    let harness = Harness::with_gate(ExpectedTracks::video_only(), Behavior::default(), Some(gate));
    let path = harness.sink.start_recording().expect("start");

    harness.sink.on_frame(video(0));
    assert_eq!(entered.recv_timeout(Duration::from_secs(5)), Ok("start_session"));

    let (tx, rx) = mpsc::channel();
    let first = tx.clone();
    harness.sink.stop_recording(move |path| first.send(path).unwrap());
    assert_eq!(harness.sink.state(), RecordingState::Finishing);

    // Let the session start; the worker then blocks in the first append
    release.send(()).unwrap();
    assert_eq!(entered.recv_timeout(Duration::from_secs(5)), Ok("append"));
    assert_eq!(harness.sink.state(), RecordingState::Finishing);

    // Still finishing: no second finalize and no new session
    harness.sink.stop_recording(move |path| tx.send(path).unwrap());
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Some(path.clone())
    );
    assert!(matches!(
        harness.sink.start_recording(),
        Err(RecordingError::AlreadyRecording)
    ));

    release.send(()).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(path));

    let events = harness.events();
    assert_eq!(
        events,
        vec![
            Event::AddTrack(MediaKind::Video),
            Event::Start(Duration::ZERO),
            Event::Append(MediaKind::Video, Duration::ZERO),
            Event::Finish,
        ]
    );
    assert_eq!(harness.sink.state(), RecordingState::Closed);
}

#[test]
fn test_buffers_queued_before_stop_drain() {
    let harness = Harness::new(ExpectedTracks::video_only(), Behavior::default());
    harness.sink.start_recording().expect("start");

    for ms in 0..5 {
        harness.sink.on_frame(video(ms * 33));
    }
    harness.sink.stop_recording(|_| {});

    assert_eq!(harness.appended(), 5);
}
