// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Application identifier used for config and data directories
pub const APP_NAME: &str = "filtercam";

/// Capture defaults
pub mod capture {
    /// Target capture width
    pub const DEFAULT_WIDTH: u32 = 1280;
    /// Target capture height
    pub const DEFAULT_HEIGHT: u32 = 720;
    /// Target capture framerate
    pub const DEFAULT_FRAMERATE: u32 = 30;
    /// Appsink queue depth; late frames are discarded rather than queued
    pub const MAX_BUFFERS: u32 = 1;
    /// Audio capture sample rate
    pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
    /// Audio capture channel count
    pub const AUDIO_CHANNELS: u32 = 1;
}

/// GPU dispatch and surface constants
pub mod gpu {
    /// Compute workgroup edge length (16x16 invocations per group)
    pub const WORKGROUP_SIZE: u32 = 16;
    /// Bytes per BGRA pixel
    pub const BYTES_PER_PIXEL: u32 = 4;
    /// Minimum size of a per-parameter uniform buffer
    pub const PARAMETER_BUFFER_SIZE: u64 = 16;
}

/// Preview/display constants
pub mod display {
    /// Default display refresh rate
    pub const DEFAULT_REFRESH_HZ: u32 = 60;
}

/// Recording/encoder constants
pub mod recording {
    /// Average H.264 bitrate (10 Mibit/s)
    pub const VIDEO_BITRATE_BPS: u32 = 10 * 1024 * 1024;
    /// AAC bitrate
    pub const AUDIO_BITRATE_BPS: u32 = 64_000;
    /// AAC sample rate
    pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
    /// AAC channel count (mono)
    pub const AUDIO_CHANNELS: u32 = 1;
    /// Per-track appsrc queue limit; above it the track is not ready for data
    pub const TRACK_QUEUE_MAX_BYTES: u64 = 64 * 1024 * 1024;
    /// Container file extension
    pub const FILE_EXTENSION: &str = "mp4";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// How long finalize waits for EOS to reach the file sink
    pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);
    /// Poll interval for the CLI run loop
    pub const RUN_LOOP_POLL: Duration = Duration::from_millis(100);
    /// Log frame statistics every N frames
    pub const FRAME_LOG_INTERVAL: u64 = 300;
}
