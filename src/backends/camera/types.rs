// SPDX-License-Identifier: GPL-3.0-only
// Shared types for capture, filtering and recording

//! Frame buffer data model shared by every pipeline stage

use gstreamer::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Frame data storage - either pre-copied bytes or zero-copy GStreamer buffer
///
/// This enum allows frames to be passed around without copying the underlying
/// pixel data when coming from GStreamer pipelines. The `Mapped` variant keeps
/// the GStreamer buffer mapped and alive until all references are dropped.
#[derive(Clone)]
pub enum FrameData {
    /// Pre-copied bytes (GPU readback, tests)
    Copied(Arc<[u8]>),
    /// Zero-copy mapped GStreamer buffer - no data copy, just reference counting
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    /// Create FrameData from a mapped GStreamer buffer (zero-copy)
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    pub fn len(&self) -> usize {
        match self {
            FrameData::Copied(data) => data.len(),
            FrameData::Mapped(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for FrameData {
    fn from(data: Vec<u8>) -> Self {
        FrameData::Copied(data.into())
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Kind of media carried by a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Pixel formats understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit BGRA, the only format the GPU path maps
    BGRA,
    /// 32-bit RGBA
    RGBA,
    /// Semi-planar YUV 4:2:0
    NV12,
    /// Anything the GPU path cannot map
    Unknown,
}

impl PixelFormat {
    /// Parse a GStreamer `video/x-raw` format string
    pub fn from_gst_name(name: &str) -> Self {
        match name {
            "BGRA" | "BGRx" => PixelFormat::BGRA,
            "RGBA" | "RGBx" => PixelFormat::RGBA,
            "NV12" => PixelFormat::NV12,
            _ => PixelFormat::Unknown,
        }
    }

    /// GStreamer caps format name
    pub fn gst_name(&self) -> &'static str {
        match self {
            PixelFormat::BGRA => "BGRA",
            PixelFormat::RGBA => "RGBA",
            PixelFormat::NV12 => "NV12",
            PixelFormat::Unknown => "unknown",
        }
    }
}

/// Audio sample formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 16-bit little endian, interleaved
    S16LE,
    /// 32-bit float little endian, interleaved
    F32LE,
}

impl SampleFormat {
    pub fn from_gst_name(name: &str) -> Option<Self> {
        match name {
            "S16LE" => Some(SampleFormat::S16LE),
            "F32LE" => Some(SampleFormat::F32LE),
            _ => None,
        }
    }

    pub fn gst_name(&self) -> &'static str {
        match self {
            SampleFormat::S16LE => "S16LE",
            SampleFormat::F32LE => "F32LE",
        }
    }
}

/// Video layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row in the payload
    pub stride: u32,
}

/// Audio layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub rate: u32,
    pub channels: u32,
}

/// Format metadata attached to a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

/// Physical orientation of the capturing device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    /// Device rotated so the top points left
    LandscapeLeft,
    /// Device rotated so the top points right
    LandscapeRight,
}

impl DeviceOrientation {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            DeviceOrientation::Portrait => 0,
            DeviceOrientation::PortraitUpsideDown => 1,
            DeviceOrientation::LandscapeLeft => 2,
            DeviceOrientation::LandscapeRight => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceOrientation::PortraitUpsideDown,
            2 => DeviceOrientation::LandscapeLeft,
            3 => DeviceOrientation::LandscapeRight,
            _ => DeviceOrientation::Portrait,
        }
    }
}

/// Where a camera sits on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraPosition {
    #[default]
    Front,
    Back,
    External,
}

impl CameraPosition {
    /// Parse a location property value ("front", "back", "external")
    pub fn from_location(location: &str) -> Option<Self> {
        match location.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Some(CameraPosition::Front),
            "back" | "rear" | "environment" => Some(CameraPosition::Back),
            "external" => Some(CameraPosition::External),
            _ => None,
        }
    }
}

/// Rotation needed to display a frame upright (clockwise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Rotate90 => 90,
            Rotation::Rotate180 => 180,
            Rotation::Rotate270 => 270,
        }
    }
}

/// Orientation tag carried by every delivered video buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Orientation {
    pub rotation: Rotation,
    /// Horizontally mirrored (front camera)
    pub mirrored: bool,
}

impl Orientation {
    /// Derive the video orientation from device orientation and camera position.
    ///
    /// Landscape device orientations map to the opposite video orientation
    /// because the sensor is mounted relative to the device's home position.
    /// The front camera additionally mirrors, which swaps the two landscape cases.
    pub fn for_device(device: DeviceOrientation, position: CameraPosition) -> Self {
        let mirrored = position == CameraPosition::Front;

        let rotation = match (device, mirrored) {
            (DeviceOrientation::Portrait, _) => Rotation::None,
            (DeviceOrientation::PortraitUpsideDown, _) => Rotation::Rotate180,
            (DeviceOrientation::LandscapeLeft, false) => Rotation::Rotate90,
            (DeviceOrientation::LandscapeRight, false) => Rotation::Rotate270,
            (DeviceOrientation::LandscapeLeft, true) => Rotation::Rotate270,
            (DeviceOrientation::LandscapeRight, true) => Rotation::Rotate90,
        };

        Self { rotation, mirrored }
    }
}

/// A timestamped media sample flowing through the pipeline
///
/// Frame buffers are immutable once constructed and are moved from stage to
/// stage; fan-out clones share the payload by reference count.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub format: MediaFormat,
    /// Presentation timestamp on the capture clock
    pub pts: Duration,
    pub duration: Option<Duration>,
    pub data: FrameData,
    /// Orientation tag (always default for audio)
    pub orientation: Orientation,
}

impl FrameBuffer {
    /// Create a video frame buffer
    pub fn video(
        data: impl Into<FrameData>,
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
        stride: u32,
        pts: Duration,
    ) -> Self {
        Self {
            format: MediaFormat::Video(VideoFormat {
                pixel_format,
                width,
                height,
                stride,
            }),
            pts,
            duration: None,
            data: data.into(),
            orientation: Orientation::default(),
        }
    }

    /// Create an audio frame buffer
    pub fn audio(
        data: impl Into<FrameData>,
        sample_format: SampleFormat,
        rate: u32,
        channels: u32,
        pts: Duration,
    ) -> Self {
        Self {
            format: MediaFormat::Audio(AudioFormat {
                sample_format,
                rate,
                channels,
            }),
            pts,
            duration: None,
            data: data.into(),
            orientation: Orientation::default(),
        }
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn kind(&self) -> MediaKind {
        match self.format {
            MediaFormat::Video(_) => MediaKind::Video,
            MediaFormat::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn video_format(&self) -> Option<&VideoFormat> {
        match &self.format {
            MediaFormat::Video(format) => Some(format),
            MediaFormat::Audio(_) => None,
        }
    }

    pub fn audio_format(&self) -> Option<&AudioFormat> {
        match &self.format {
            MediaFormat::Audio(format) => Some(format),
            MediaFormat::Video(_) => None,
        }
    }
}

/// A capture device discovered on the system
#[derive(Debug, Clone)]
pub struct CaptureDevice {
    pub name: String,
    pub kind: MediaKind,
    /// GStreamer device class (e.g. "Video/Source")
    pub device_class: String,
    pub position: Option<CameraPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_camera_is_mirrored_and_swaps_landscape() {
        let left = Orientation::for_device(DeviceOrientation::LandscapeLeft, CameraPosition::Front);
        assert!(left.mirrored);
        assert_eq!(left.rotation, Rotation::Rotate270);

        let back = Orientation::for_device(DeviceOrientation::LandscapeLeft, CameraPosition::Back);
        assert!(!back.mirrored);
        assert_eq!(back.rotation, Rotation::Rotate90);
    }

    #[test]
    fn test_portrait_orientations_ignore_position() {
        for position in [CameraPosition::Front, CameraPosition::Back] {
            let up = Orientation::for_device(DeviceOrientation::Portrait, position);
            assert_eq!(up.rotation, Rotation::None);
            let down = Orientation::for_device(DeviceOrientation::PortraitUpsideDown, position);
            assert_eq!(down.rotation.degrees(), 180);
        }
    }

    #[test]
    fn test_device_orientation_u8_round_trip() {
        for orientation in [
            DeviceOrientation::Portrait,
            DeviceOrientation::PortraitUpsideDown,
            DeviceOrientation::LandscapeLeft,
            DeviceOrientation::LandscapeRight,
        ] {
            assert_eq!(DeviceOrientation::from_u8(orientation.to_u8()), orientation);
        }
    }

    #[test]
    fn test_frame_kind_follows_format() {
        let video = FrameBuffer::video(vec![0u8; 16], PixelFormat::BGRA, 2, 2, 8, Duration::ZERO);
        assert_eq!(video.kind(), MediaKind::Video);
        assert!(video.audio_format().is_none());

        let audio = FrameBuffer::audio(vec![0u8; 4], SampleFormat::S16LE, 44_100, 1, Duration::ZERO);
        assert_eq!(audio.kind(), MediaKind::Audio);
        assert_eq!(audio.audio_format().map(|f| f.rate), Some(44_100));
    }

    #[test]
    fn test_camera_position_from_location() {
        assert_eq!(CameraPosition::from_location("Front"), Some(CameraPosition::Front));
        assert_eq!(CameraPosition::from_location("back"), Some(CameraPosition::Back));
        assert_eq!(CameraPosition::from_location("side"), None);
    }
}
