// SPDX-License-Identifier: GPL-3.0-only

//! Container writers
//!
//! [`ContainerWriter`] is what the recording sink drives; [`GstMp4Writer`]
//! implements it with one `appsrc` branch per track feeding `mp4mux`:
//!
//! ```text
//! appsrc(video) ! videoconvert ! videocrop ! videoscale ! caps ! H.264 enc ! h264parse ─┐
//!                                                                                       ├─ mp4mux ! filesink
//! appsrc(audio) ! audioconvert ! audioresample ! caps ! AAC enc ! aacparse ─────────────┘
//! ```
//!
//! `videocrop` is only present for aspect-fill tracks; its edges follow the
//! dimensions of the appended frames.

use super::encoder_selection::{
    AudioSettings, ScalingMode, TrackSettings, VideoSettings, select_audio_encoder,
    select_video_encoder,
};
use crate::backends::camera::types::{AudioFormat, FrameBuffer, MediaFormat, MediaKind};
use crate::constants::recording::TRACK_QUEUE_MAX_BYTES;
use crate::constants::timing::FINALIZE_TIMEOUT;
use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Called once when a writer has finished, successfully or not
pub type FinishCallback = Box<dyn FnOnce(Result<(), RecordingError>) + Send>;

/// A muxing container file
///
/// Tracks are added before the session starts. Appended buffers carry
/// timestamps on the capture clock; the writer rebases them on the session
/// start.
pub trait ContainerWriter: Send {
    fn output_path(&self) -> &Path;

    /// Add a track; an error means the container rejected it
    fn add_track(&mut self, settings: &TrackSettings) -> Result<(), RecordingError>;

    /// Begin writing; buffers before `at` must not be appended
    fn start_session(&mut self, at: Duration) -> Result<(), RecordingError>;

    /// Whether the track can take another buffer without queueing further
    fn is_ready_for_more(&self, kind: MediaKind) -> bool;

    fn append(&mut self, frame: &FrameBuffer) -> Result<(), RecordingError>;

    /// Flush and close the file, then call `done`. May complete asynchronously.
    fn finish(self: Box<Self>, done: FinishCallback);
}

/// Opens container writers for new recordings
pub trait WriterFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, RecordingError>;
}

/// Opens [`GstMp4Writer`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct GstMp4WriterFactory;

impl WriterFactory for GstMp4WriterFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, RecordingError> {
        Ok(Box::new(GstMp4Writer::open(path)?))
    }
}

struct TrackBranch {
    appsrc: gst_app::AppSrc,
    /// Format the appsrc caps were last set from
    caps_format: Option<MediaFormat>,
    /// Aspect-fill crop and the track dimensions it crops towards
    crop: Option<(gst::Element, (u32, u32))>,
}

/// MP4 writer backed by a GStreamer pipeline
pub struct GstMp4Writer {
    pipeline: gst::Pipeline,
    muxer: gst::Element,
    output_path: PathBuf,
    tracks: BTreeMap<MediaKind, TrackBranch>,
    session_start: Option<Duration>,
}

impl GstMp4Writer {
    /// Create the muxer and open the output file
    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| RecordingError::WriterOpenFailed(e.to_string()))?;

        // Fail now, not on the first buffer, if the file cannot be created
        std::fs::File::create(path).map_err(|e| {
            RecordingError::WriterOpenFailed(format!("{}: {}", path.display(), e))
        })?;

        let location = path.to_str().ok_or_else(|| {
            RecordingError::WriterOpenFailed(format!("non UTF-8 path: {}", path.display()))
        })?;

        let pipeline = gst::Pipeline::with_name("filtercam-recorder");

        let muxer = gst::ElementFactory::make("mp4mux")
            .name("muxer")
            .build()
            .map_err(|e| RecordingError::WriterOpenFailed(format!("mp4mux: {}", e)))?;
        if muxer.find_property("streamable").is_some() {
            muxer.set_property("streamable", false);
        }

        let filesink = gst::ElementFactory::make("filesink")
            .name("filesink")
            .property("location", location)
            .build()
            .map_err(|e| RecordingError::WriterOpenFailed(format!("filesink: {}", e)))?;

        pipeline
            .add_many([&muxer, &filesink])
            .map_err(|e| RecordingError::WriterOpenFailed(e.to_string()))?;
        muxer
            .link(&filesink)
            .map_err(|e| RecordingError::WriterOpenFailed(format!("link muxer: {}", e)))?;

        info!(path = %path.display(), "Opened MP4 writer");

        Ok(Self {
            pipeline,
            muxer,
            output_path: path.to_path_buf(),
            tracks: BTreeMap::new(),
            session_start: None,
        })
    }

    fn add_video_branch(&self, settings: &VideoSettings) -> Result<TrackBranch, RecordingError> {
        let selected = select_video_encoder(settings)?;

        // Caps come from the appended buffers
        let appsrc = make_appsrc("video_src");
        let convert = make("videoconvert", "video_convert")?;
        let crop = match settings.scaling {
            ScalingMode::AspectFill => Some(make("videocrop", "video_crop")?),
            ScalingMode::AspectFit => None,
        };
        let scale = make("videoscale", "video_scale")?;
        if scale.find_property("add-borders").is_some() {
            scale.set_property("add-borders", settings.scaling == ScalingMode::AspectFit);
        }

        let capsfilter = make("capsfilter", "video_caps")?;
        capsfilter.set_property(
            "caps",
            gst::Caps::builder("video/x-raw")
                .field("width", settings.width as i32)
                .field("height", settings.height as i32)
                .build(),
        );

        let queue = make("queue", "video_queue")?;
        let mut elements = vec![appsrc.upcast_ref::<gst::Element>(), &convert];
        elements.extend(crop.as_ref());
        elements.extend([&scale, &capsfilter, &queue, &selected.encoder, &selected.parser]);
        self.attach(&elements, MediaKind::Video)?;
        debug!(
            encoder = selected.element_name,
            scaling = ?settings.scaling,
            "Video branch ready"
        );

        Ok(TrackBranch {
            appsrc,
            caps_format: None,
            crop: crop.map(|crop| (crop, (settings.width, settings.height))),
        })
    }

    fn add_audio_branch(&self, settings: &AudioSettings) -> Result<TrackBranch, RecordingError> {
        let selected = select_audio_encoder(settings)?;

        let appsrc = make_appsrc("audio_src");
        let convert = make("audioconvert", "audio_convert")?;
        let resample = make("audioresample", "audio_resample")?;

        let capsfilter = make("capsfilter", "audio_caps")?;
        capsfilter.set_property(
            "caps",
            gst::Caps::builder("audio/x-raw")
                .field("rate", settings.sample_rate as i32)
                .field("channels", settings.channels as i32)
                .build(),
        );

        let queue = make("queue", "audio_queue")?;
        let elements = [
            appsrc.upcast_ref::<gst::Element>(),
            &convert,
            &resample,
            &capsfilter,
            &queue,
            &selected.encoder,
            &selected.parser,
        ];
        self.attach(&elements, MediaKind::Audio)?;
        debug!(encoder = selected.element_name, "Audio branch ready");

        Ok(TrackBranch {
            appsrc,
            caps_format: None,
            crop: None,
        })
    }

    /// Add a linear chain to the pipeline and link its tail to the muxer.
    ///
    /// On failure the chain is taken out of the pipeline again.
    fn attach(&self, elements: &[&gst::Element], kind: MediaKind) -> Result<(), RecordingError> {
        let Some(tail) = elements.last() else {
            return Err(RecordingError::TrackRejected {
                kind,
                reason: "empty branch".to_string(),
            });
        };

        let linked = self
            .pipeline
            .add_many(elements.iter().copied())
            .map_err(|e| e.to_string())
            .and_then(|()| {
                gst::Element::link_many(elements.iter().copied())
                    .map_err(|e| format!("link branch: {}", e))
            })
            .and_then(|()| {
                tail.link(&self.muxer)
                    .map_err(|e| format!("link to muxer: {}", e))
            });

        if let Err(reason) = linked {
            warn!(%kind, %reason, "Removing partially built track branch");
            self.detach(elements);
            return Err(RecordingError::TrackRejected { kind, reason });
        }

        debug!(%kind, "Track branch linked to muxer");
        Ok(())
    }

    fn detach(&self, elements: &[&gst::Element]) {
        for element in elements {
            if element.has_as_parent(&self.pipeline) {
                let _ = element.set_state(gst::State::Null);
                if let Err(e) = self.pipeline.remove(*element) {
                    warn!(element = %element.name(), error = %e, "Failed to remove element");
                }
            }
        }
    }

    fn check_bus_for_error(&self) -> Result<(), String> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error])
            && let gst::MessageView::Error(err) = msg.view()
        {
            error!(
                error = %err.error(),
                debug = ?err.debug(),
                source = ?err.src().map(|s| s.name()),
                "Recording pipeline error"
            );
            return Err(err.error().to_string());
        }
        Ok(())
    }
}

impl ContainerWriter for GstMp4Writer {
    fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn add_track(&mut self, settings: &TrackSettings) -> Result<(), RecordingError> {
        let kind = settings.kind();
        if self.session_start.is_some() || self.tracks.contains_key(&kind) {
            return Err(RecordingError::TrackRejected {
                kind,
                reason: "tracks are fixed once writing has started".to_string(),
            });
        }

        let branch = match settings {
            TrackSettings::Video(video) => self.add_video_branch(video)?,
            TrackSettings::Audio(audio) => self.add_audio_branch(audio)?,
        };

        self.tracks.insert(kind, branch);
        info!(%kind, "Added recording track");
        Ok(())
    }

    fn start_session(&mut self, at: Duration) -> Result<(), RecordingError> {
        if self.tracks.is_empty() {
            return Err(RecordingError::SessionStartFailed("no tracks".to_string()));
        }

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| RecordingError::SessionStartFailed(e.to_string()))?;
        self.check_bus_for_error()
            .map_err(RecordingError::SessionStartFailed)?;

        self.session_start = Some(at);
        info!(start = ?at, tracks = self.tracks.len(), "Write session started");
        Ok(())
    }

    fn is_ready_for_more(&self, kind: MediaKind) -> bool {
        self.tracks
            .get(&kind)
            .is_some_and(|track| track.appsrc.current_level_bytes() < track.appsrc.max_bytes())
    }

    fn append(&mut self, frame: &FrameBuffer) -> Result<(), RecordingError> {
        let start = self.session_start.ok_or_else(|| {
            RecordingError::AppendFailed("session not started".to_string())
        })?;
        let track = self.tracks.get_mut(&frame.kind()).ok_or_else(|| {
            RecordingError::AppendFailed(format!("no {} track", frame.kind()))
        })?;

        if track.caps_format != Some(frame.format) {
            let caps = match &frame.format {
                MediaFormat::Video(format) => {
                    if let Some((crop, track_size)) = &track.crop {
                        let edges = aspect_fill_crop((format.width, format.height), *track_size);
                        set_crop(crop, edges);
                    }
                    video_caps(format.width, format.height)
                }
                MediaFormat::Audio(format) => audio_caps(format),
            };
            debug!(kind = %frame.kind(), %caps, "Setting track caps");
            track.appsrc.set_caps(Some(&caps));
            track.caps_format = Some(frame.format);
        }

        let mut buffer = gst::Buffer::from_slice(frame.data.clone());
        {
            let buffer = buffer.get_mut().ok_or_else(|| {
                RecordingError::AppendFailed("buffer not writable".to_string())
            })?;
            let pts = frame.pts.saturating_sub(start);
            buffer.set_pts(gst::ClockTime::from_nseconds(pts.as_nanos() as u64));
            if let Some(duration) = frame.duration {
                buffer.set_duration(gst::ClockTime::from_nseconds(duration.as_nanos() as u64));
            }
        }

        track
            .appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| RecordingError::AppendFailed(format!("{:?}", e)))
    }

    fn finish(self: Box<Self>, done: FinishCallback) {
        if self.session_start.is_none() {
            info!(path = %self.output_path.display(), "Closing writer without data");
            let _ = self.pipeline.set_state(gst::State::Null);
            done(Ok(()));
            return;
        }

        for (kind, track) in &self.tracks {
            if let Err(e) = track.appsrc.end_of_stream() {
                warn!(%kind, error = ?e, "Failed to send end of stream");
            }
        }

        let pipeline = self.pipeline;
        let path = self.output_path;

        // EOS has to travel through the encoders before the muxer can write
        // its index, so wait on a helper thread
        let spawned = std::thread::Builder::new()
            .name("mp4-finalize".to_string())
            .spawn(move || {
                let result = wait_for_eos(&pipeline);
                if let Err(e) = pipeline.set_state(gst::State::Null) {
                    warn!(error = %e, "Failed to stop recording pipeline");
                }
                match &result {
                    Ok(()) => info!(path = %path.display(), "Recording finalized"),
                    Err(e) => error!(path = %path.display(), error = %e, "Recording finalize failed"),
                }
                done(result);
            });

        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn finalize thread");
        }
    }
}

fn wait_for_eos(pipeline: &gst::Pipeline) -> Result<(), RecordingError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| RecordingError::FinalizeFailed("no bus".to_string()))?;
    let timeout = gst::ClockTime::from_nseconds(FINALIZE_TIMEOUT.as_nanos() as u64);

    for msg in bus.iter_timed(timeout) {
        match msg.view() {
            gst::MessageView::Eos(..) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(RecordingError::FinalizeFailed(err.error().to_string()));
            }
            _ => {}
        }
    }

    Err(RecordingError::FinalizeFailed(format!(
        "no end of stream within {:?}",
        FINALIZE_TIMEOUT
    )))
}

fn make(factory: &str, name: &str) -> Result<gst::Element, RecordingError> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| RecordingError::EncoderNotAvailable(format!("{}: {}", factory, e)))
}

fn make_appsrc(name: &str) -> gst_app::AppSrc {
    gst_app::AppSrc::builder()
        .name(name)
        .format(gst::Format::Time)
        .is_live(true)
        .do_timestamp(false)
        .block(false)
        .max_bytes(TRACK_QUEUE_MAX_BYTES)
        .build()
}

fn audio_caps(format: &AudioFormat) -> gst::Caps {
    gst::Caps::builder("audio/x-raw")
        .field("format", format.sample_format.gst_name())
        .field("rate", format.rate as i32)
        .field("channels", format.channels as i32)
        .field("layout", "interleaved")
        .build()
}

/// Edges to cut from a `source` frame so it has the aspect ratio of `track`.
///
/// Returns `(left, right, top, bottom)`. The overflow is split between both
/// sides, with the odd pixel going to the right or bottom.
fn aspect_fill_crop(source: (u32, u32), track: (u32, u32)) -> (u32, u32, u32, u32) {
    let (src_w, src_h) = (u64::from(source.0), u64::from(source.1));
    let (dst_w, dst_h) = (u64::from(track.0), u64::from(track.1));
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return (0, 0, 0, 0);
    }

    if src_w * dst_h > src_h * dst_w {
        // Wider than the track
        let excess = (src_w - src_h * dst_w / dst_h) as u32;
        (excess / 2, excess - excess / 2, 0, 0)
    } else {
        let excess = (src_h - src_w * dst_h / dst_w) as u32;
        (0, 0, excess / 2, excess - excess / 2)
    }
}

fn set_crop(crop: &gst::Element, (left, right, top, bottom): (u32, u32, u32, u32)) {
    debug!(left, right, top, bottom, "Aspect-fill crop");
    crop.set_property("left", left as i32);
    crop.set_property("right", right as i32);
    crop.set_property("top", top as i32);
    crop.set_property("bottom", bottom as i32);
}

fn video_caps(width: u32, height: u32) -> gst::Caps {
    gst_video::VideoCapsBuilder::new()
        .format(gst_video::VideoFormat::Bgra)
        .width(width as i32)
        .height(height as i32)
        .framerate(gst::Fraction::new(0, 1))
        .build()
}
