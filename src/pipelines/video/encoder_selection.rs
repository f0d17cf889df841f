// SPDX-License-Identifier: GPL-3.0-only

//! Track settings and encoder selection for the MP4 writer
//!
//! Video is always H.264 and audio always AAC. Which GStreamer element
//! implements the codec depends on the installed plugins; the first one that
//! can be created wins.

use crate::backends::camera::types::{FrameBuffer, MediaFormat, MediaKind};
use crate::constants::recording::{
    AUDIO_BITRATE_BPS, AUDIO_CHANNELS, AUDIO_SAMPLE_RATE, VIDEO_BITRATE_BPS,
};
use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info, warn};

/// H.264 encoders in priority order
const H264_ENCODERS: [&str; 5] = [
    "x264enc",
    "openh264enc",
    "vah264enc",
    "vaapih264enc",
    "nvh264enc",
];

/// AAC encoders in priority order
const AAC_ENCODERS: [&str; 4] = ["avenc_aac", "fdkaacenc", "voaacenc", "faac"];

/// Video codec of a recording track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

impl VideoCodec {
    pub fn parser_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
        }
    }
}

/// Audio codec of a recording track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
}

impl AudioCodec {
    pub fn parser_name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aacparse",
        }
    }
}

/// How frames are fitted into the track's dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingMode {
    /// Preserve aspect ratio and crop the overflow
    #[default]
    AspectFill,
    /// Preserve aspect ratio and letterbox
    AspectFit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Average bitrate in bits per second
    pub bitrate_bps: u32,
    pub scaling: ScalingMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSettings {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u32,
    /// Bitrate in bits per second
    pub bitrate_bps: u32,
}

/// Encoder settings of one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSettings {
    Video(VideoSettings),
    Audio(AudioSettings),
}

impl TrackSettings {
    /// Settings for the track a buffer of this format would open.
    ///
    /// Video tracks take the buffer's dimensions; audio tracks are always
    /// mono AAC at 44.1 kHz regardless of the captured format.
    pub fn for_buffer(frame: &FrameBuffer) -> Self {
        match frame.format {
            MediaFormat::Video(format) => TrackSettings::Video(VideoSettings {
                codec: VideoCodec::H264,
                width: format.width,
                height: format.height,
                bitrate_bps: VIDEO_BITRATE_BPS,
                scaling: ScalingMode::AspectFill,
            }),
            MediaFormat::Audio(_) => TrackSettings::Audio(AudioSettings {
                codec: AudioCodec::Aac,
                sample_rate: AUDIO_SAMPLE_RATE,
                channels: AUDIO_CHANNELS,
                bitrate_bps: AUDIO_BITRATE_BPS,
            }),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            TrackSettings::Video(_) => MediaKind::Video,
            TrackSettings::Audio(_) => MediaKind::Audio,
        }
    }
}

/// Encoder element plus its stream parser
pub struct SelectedEncoder {
    pub encoder: gst::Element,
    pub parser: gst::Element,
    pub element_name: &'static str,
}

/// Create and configure the first available H.264 encoder
pub fn select_video_encoder(settings: &VideoSettings) -> Result<SelectedEncoder, RecordingError> {
    let (element_name, encoder) = first_available(&H264_ENCODERS).ok_or_else(|| {
        RecordingError::EncoderNotAvailable(
            "no H.264 encoder found; install gst-plugins-ugly (x264enc) or gst-plugins-bad (openh264enc)"
                .to_string(),
        )
    })?;

    configure_video_encoder(&encoder, element_name, settings.bitrate_bps);
    let parser = make_parser(settings.codec.parser_name())?;

    info!(
        encoder = element_name,
        width = settings.width,
        height = settings.height,
        bitrate_bps = settings.bitrate_bps,
        "Selected video encoder"
    );

    Ok(SelectedEncoder {
        encoder,
        parser,
        element_name,
    })
}

/// Create and configure the first available AAC encoder
pub fn select_audio_encoder(settings: &AudioSettings) -> Result<SelectedEncoder, RecordingError> {
    let (element_name, encoder) = first_available(&AAC_ENCODERS).ok_or_else(|| {
        RecordingError::EncoderNotAvailable(
            "no AAC encoder found; install gst-libav (avenc_aac) or gst-plugins-bad (fdkaacenc)"
                .to_string(),
        )
    })?;

    set_if_present(&encoder, "bitrate", &settings.bitrate_bps.to_string());
    let parser = make_parser(settings.codec.parser_name())?;

    info!(
        encoder = element_name,
        rate = settings.sample_rate,
        channels = settings.channels,
        bitrate_bps = settings.bitrate_bps,
        "Selected audio encoder"
    );

    Ok(SelectedEncoder {
        encoder,
        parser,
        element_name,
    })
}

fn first_available(candidates: &[&'static str]) -> Option<(&'static str, gst::Element)> {
    candidates.iter().find_map(|name| {
        gst::ElementFactory::make(name)
            .build()
            .ok()
            .map(|element| (*name, element))
    })
}

fn make_parser(name: &str) -> Result<gst::Element, RecordingError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| RecordingError::EncoderNotAvailable(format!("{}: {}", name, e)))
}

fn configure_video_encoder(encoder: &gst::Element, element_name: &str, bitrate_bps: u32) {
    let bitrate_kbps = bitrate_bps / 1000;

    match element_name {
        "x264enc" => {
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "bitrate", &bitrate_kbps.to_string());
        }
        "openh264enc" => {
            set_if_present(encoder, "rate-control", "bitrate");
            set_if_present(encoder, "bitrate", &bitrate_bps.to_string());
            set_if_present(encoder, "usage-type", "camera");
        }
        "nvh264enc" => {
            set_if_present(encoder, "rc-mode", "vbr");
            set_if_present(encoder, "bitrate", &bitrate_kbps.to_string());
        }
        _ => {
            set_if_present(encoder, "bitrate", &bitrate_kbps.to_string());
        }
    }

    debug!(encoder = element_name, bitrate_kbps, "Configured video encoder");
}

/// Set a property from its string form, skipping elements that lack it
fn set_if_present(element: &gst::Element, property: &str, value: &str) {
    if element.find_property(property).is_some() {
        element.set_property_from_str(property, value);
    } else {
        warn!(
            element = %element.name(),
            property,
            "Encoder property not supported"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{PixelFormat, SampleFormat};
    use std::time::Duration;

    #[test]
    fn test_video_settings_follow_buffer_dimensions() {
        let frame = FrameBuffer::video(vec![0u8; 16], PixelFormat::BGRA, 1280, 720, 5120, Duration::ZERO);
        let TrackSettings::Video(settings) = TrackSettings::for_buffer(&frame) else {
            panic!("expected video settings");
        };
        assert_eq!((settings.width, settings.height), (1280, 720));
        assert_eq!(settings.bitrate_bps, 10 * 1024 * 1024);
        assert_eq!(settings.scaling, ScalingMode::AspectFill);
        assert_eq!(settings.codec, VideoCodec::H264);
    }

    #[test]
    fn test_audio_settings_are_fixed_mono_aac() {
        let frame = FrameBuffer::audio(vec![0u8; 8], SampleFormat::F32LE, 48_000, 2, Duration::ZERO);
        let settings = TrackSettings::for_buffer(&frame);
        assert_eq!(settings.kind(), MediaKind::Audio);
        assert_eq!(
            settings,
            TrackSettings::Audio(AudioSettings {
                codec: AudioCodec::Aac,
                sample_rate: 44_100,
                channels: 1,
                bitrate_bps: 64_000,
            })
        );
    }
}
