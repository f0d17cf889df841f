// SPDX-License-Identifier: GPL-3.0-only

//! Microphone branch of the capture pipeline
//!
//! Audio is delivered as interleaved S16LE at a fixed rate and channel count
//! and never touches the GPU.

use crate::backends::camera::types::{FrameBuffer, MediaKind, SampleFormat};
use crate::backends::camera::{
    SinkSlot, SourceKind, clock_time_to_duration, enumeration, make_element,
};
use crate::constants::capture::{AUDIO_CHANNELS, AUDIO_SAMPLE_RATE, MAX_BUFFERS};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::SetupError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Caps every captured audio buffer conforms to
pub fn capture_caps() -> gst::Caps {
    gst::Caps::builder("audio/x-raw")
        .field("format", SampleFormat::S16LE.gst_name())
        .field("rate", AUDIO_SAMPLE_RATE as i32)
        .field("channels", AUDIO_CHANNELS as i32)
        .field("layout", "interleaved")
        .build()
}

/// Add the microphone branch to `pipeline`, delivering into `sink`
pub(crate) fn add_audio_branch(
    pipeline: &gst::Pipeline,
    source_kind: SourceKind,
    sink: SinkSlot,
) -> Result<(), SetupError> {
    let source = match source_kind {
        SourceKind::TestPattern => {
            let source = make_element("audiotestsrc", "audio_source")?;
            source.set_property("is-live", true);
            source
        }
        SourceKind::Device => {
            let (info, device) = enumeration::find_device(MediaKind::Audio, Default::default())
                .ok_or(SetupError::DeviceNotFound(MediaKind::Audio))?;
            info!(name = %info.name, "Using microphone");
            device.create_element(Some("audio_source")).map_err(|e| {
                SetupError::Backend(format!("Failed to open {}: {}", info.name, e))
            })?
        }
    };

    let convert = make_element("audioconvert", "audio_convert")?;
    let resample = make_element("audioresample", "audio_resample")?;

    let appsink = gst_app::AppSink::builder()
        .name("audio_sink")
        .caps(&capture_caps())
        .drop(true)
        .max_buffers(MAX_BUFFERS)
        .sync(false)
        .build();

    pipeline
        .add_many([&source, &convert, &resample, appsink.upcast_ref()])
        .map_err(|e| SetupError::Backend(format!("Failed to build audio branch: {}", e)))?;
    gst::Element::link_many([&source, &convert, &resample, appsink.upcast_ref()])
        .map_err(|e| SetupError::Backend(format!("Failed to link audio branch: {}", e)))?;

    let buffer_count = AtomicU64::new(0);
    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |appsink| {
                let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;

                let Some(frame) = audio_frame_from_sample(&sample) else {
                    debug!("Dropping unreadable audio sample");
                    return Ok(gst::FlowSuccess::Ok);
                };

                let count = buffer_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % FRAME_LOG_INTERVAL == 0 {
                    debug!(buffers = count, pts = ?frame.pts, "Audio buffers captured");
                }

                sink.deliver(frame);
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(())
}

fn audio_frame_from_sample(sample: &gst::Sample) -> Option<FrameBuffer> {
    let structure = sample.caps()?.structure(0)?;
    let sample_format = SampleFormat::from_gst_name(structure.get::<&str>("format").ok()?)?;
    let rate = structure.get::<i32>("rate").ok()? as u32;
    let channels = structure.get::<i32>("channels").ok()? as u32;

    let buffer = sample.buffer_owned()?;
    let pts = buffer.pts().map(clock_time_to_duration).unwrap_or_default();
    let duration = buffer.duration().map(clock_time_to_duration);
    let mapped = buffer.into_mapped_buffer_readable().ok()?;

    Some(
        FrameBuffer::audio(
            crate::backends::camera::FrameData::from_mapped_buffer(mapped),
            sample_format,
            rate,
            channels,
            pts,
        )
        .with_duration(duration),
    )
}
