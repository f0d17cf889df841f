// SPDX-License-Identifier: GPL-3.0-only

//! Capture source
//!
//! One GStreamer pipeline owns the camera and, optionally, the microphone.
//! Both branches end in an appsink whose callback hands buffers to the single
//! registered [`FrameSink`] on the streaming thread.
//!
//! ```text
//! camera ! videoconvert ! videoscale ! videorate ! BGRA caps ! appsink ──┐
//!                                                                        ├─> FrameSink
//! mic ! audioconvert ! audioresample ! S16LE caps ! appsink ─────────────┘
//! ```
//!
//! Appsinks keep at most one buffer and drop the oldest, so a slow sink loses
//! frames instead of building a queue.

pub mod enumeration;
pub mod types;

pub use enumeration::list_devices;
pub use types::*;

use crate::backends::audio;
use crate::constants::capture::{
    DEFAULT_FRAMERATE, DEFAULT_HEIGHT, DEFAULT_WIDTH, MAX_BUFFERS,
};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::SetupError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receiver of captured buffers
///
/// Called on a GStreamer streaming thread, once per buffer. Implementations
/// must not block for longer than a frame interval or frames are dropped
/// upstream.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: FrameBuffer);
}

impl<F> FrameSink for F
where
    F: Fn(FrameBuffer) + Send + Sync,
{
    fn on_frame(&self, frame: FrameBuffer) {
        self(frame)
    }
}

/// Where captured media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Hardware devices found by the device monitor
    #[default]
    Device,
    /// Live `videotestsrc` / `audiotestsrc`
    TestPattern,
}

/// Capture settings fixed for the lifetime of a started pipeline
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Preferred camera; falls back to the first device
    pub position: CameraPosition,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// Capture a microphone alongside the camera
    pub audio: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            position: CameraPosition::default(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
            audio: false,
        }
    }
}

/// The registered sink, shared with the streaming threads
#[derive(Clone, Default)]
pub(crate) struct SinkSlot(Arc<Mutex<Option<Arc<dyn FrameSink>>>>);

impl SinkSlot {
    fn replace(&self, sink: Option<Arc<dyn FrameSink>>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = sink;
    }

    /// Hand `frame` to the sink; returns false if none is registered
    pub(crate) fn deliver(&self, frame: FrameBuffer) -> bool {
        // Clone out so the sink runs without holding the lock
        let sink = self.0.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match sink {
            Some(sink) => {
                sink.on_frame(frame);
                true
            }
            None => false,
        }
    }
}

/// Camera and microphone session delivering [`FrameBuffer`]s
pub struct CaptureSource {
    config: CaptureConfig,
    sink: SinkSlot,
    device_orientation: Arc<AtomicU8>,
    pipeline: Option<gst::Pipeline>,
}

impl CaptureSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            sink: SinkSlot::default(),
            device_orientation: Arc::new(AtomicU8::new(DeviceOrientation::default().to_u8())),
            pipeline: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Register the sink that receives every buffer, replacing any previous one
    pub fn set_sink(&self, sink: Arc<dyn FrameSink>) {
        self.sink.replace(Some(sink));
    }

    /// Unregister the sink; later buffers are dropped
    pub fn clear_sink(&self) {
        self.sink.replace(None);
    }

    /// Update the device orientation used to tag subsequent video buffers
    pub fn set_device_orientation(&self, orientation: DeviceOrientation) {
        self.device_orientation
            .store(orientation.to_u8(), Ordering::Relaxed);
    }

    pub fn device_orientation(&self) -> DeviceOrientation {
        DeviceOrientation::from_u8(self.device_orientation.load(Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Acquire devices and begin delivering buffers.
    ///
    /// Calling `start` on a running source does nothing. Missing devices are
    /// reported as [`SetupError::DeviceNotFound`].
    pub fn start(&mut self) -> Result<(), SetupError> {
        if self.pipeline.is_some() {
            debug!("Capture source already running");
            return Ok(());
        }

        gst::init()?;

        let pipeline = gst::Pipeline::with_name("filtercam-capture");
        self.add_video_branch(&pipeline)?;

        if self.config.audio {
            audio::add_audio_branch(&pipeline, self.config.source, self.sink.clone())?;
        }

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(SetupError::Backend(format!(
                "Failed to start capture pipeline: {}",
                e
            )));
        }

        // Device errors surface on the bus while the pipeline spins up
        let (result, state, _) = pipeline.state(gst::ClockTime::from_seconds(5));
        debug!(?result, ?state, "Capture pipeline state");

        if let Some(bus) = pipeline.bus()
            && let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error])
            && let gst::MessageView::Error(err) = msg.view()
        {
            let _ = pipeline.set_state(gst::State::Null);
            error!(error = %err.error(), debug = ?err.debug(), "Capture pipeline error");
            return Err(SetupError::Backend(err.error().to_string()));
        }

        info!(
            width = self.config.width,
            height = self.config.height,
            framerate = self.config.framerate,
            audio = self.config.audio,
            source = ?self.config.source,
            "Capture started"
        );

        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// Halt delivery and release the devices
    pub fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                warn!(error = %e, "Failed to stop capture pipeline");
            }
            info!("Capture stopped");
        }
    }

    fn add_video_branch(&self, pipeline: &gst::Pipeline) -> Result<(), SetupError> {
        let (source, position) = self.video_source()?;
        let convert = make_element("videoconvert", "video_convert")?;
        let scale = make_element("videoscale", "video_scale")?;
        let rate = make_element("videorate", "video_rate")?;

        let caps = gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Bgra)
            .width(self.config.width as i32)
            .height(self.config.height as i32)
            .framerate(gst::Fraction::new(self.config.framerate as i32, 1))
            .build();

        let appsink = gst_app::AppSink::builder()
            .name("video_sink")
            .caps(&caps)
            .drop(true)
            .max_buffers(MAX_BUFFERS)
            .sync(false)
            .build();

        pipeline
            .add_many([&source, &convert, &scale, &rate, appsink.upcast_ref()])
            .map_err(|e| SetupError::Backend(format!("Failed to build video branch: {}", e)))?;
        gst::Element::link_many([&source, &convert, &scale, &rate, appsink.upcast_ref()])
            .map_err(|e| SetupError::Backend(format!("Failed to link video branch: {}", e)))?;

        let sink = self.sink.clone();
        let device_orientation = Arc::clone(&self.device_orientation);
        let frame_count = AtomicU64::new(0);

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;

                    let orientation = Orientation::for_device(
                        DeviceOrientation::from_u8(device_orientation.load(Ordering::Relaxed)),
                        position,
                    );

                    let Some(frame) = video_frame_from_sample(&sample, orientation) else {
                        debug!("Dropping unreadable video sample");
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    let count = frame_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % FRAME_LOG_INTERVAL == 0 {
                        debug!(frames = count, pts = ?frame.pts, "Video frames captured");
                    }

                    sink.deliver(frame);
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(())
    }

    /// Create the video source element and report which camera it is
    fn video_source(&self) -> Result<(gst::Element, CameraPosition), SetupError> {
        match self.config.source {
            SourceKind::TestPattern => {
                let source = make_element("videotestsrc", "video_source")?;
                source.set_property("is-live", true);
                Ok((source, self.config.position))
            }
            SourceKind::Device => {
                let (info, device) =
                    enumeration::find_device(MediaKind::Video, self.config.position)
                        .ok_or(SetupError::DeviceNotFound(MediaKind::Video))?;

                let source = device.create_element(Some("video_source")).map_err(|e| {
                    SetupError::Backend(format!("Failed to open {}: {}", info.name, e))
                })?;

                info!(name = %info.name, position = ?info.position, "Using camera");
                Ok((source, info.position.unwrap_or(self.config.position)))
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSource")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

pub(crate) fn make_element(factory: &str, name: &str) -> Result<gst::Element, SetupError> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| SetupError::Backend(format!("Failed to create {}: {}", factory, e)))
}

pub(crate) fn clock_time_to_duration(time: gst::ClockTime) -> Duration {
    Duration::from_nanos(time.nseconds())
}

fn video_frame_from_sample(sample: &gst::Sample, orientation: Orientation) -> Option<FrameBuffer> {
    let info = gst_video::VideoInfo::from_caps(sample.caps()?).ok()?;
    let buffer = sample.buffer_owned()?;

    if buffer.flags().contains(gst::BufferFlags::CORRUPTED) {
        warn!("Corrupted video buffer");
        return None;
    }

    let pts = buffer.pts().map(clock_time_to_duration).unwrap_or_default();
    let duration = buffer.duration().map(clock_time_to_duration);
    let stride = info.stride().first().copied().unwrap_or(0).max(0) as u32;
    let mapped = buffer.into_mapped_buffer_readable().ok()?;

    Some(
        FrameBuffer::video(
            FrameData::from_mapped_buffer(mapped),
            PixelFormat::from_gst_name(info.format().to_str().as_str()),
            info.width(),
            info.height(),
            stride,
            pts,
        )
        .with_duration(duration)
        .with_orientation(orientation),
    )
}
