// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture, filter and recording pipeline
//!
//! Errors fall into three groups:
//! - [`SetupError`]: resource acquisition at start-up failed; the pipeline cannot run
//! - [`FrameError`]: a single frame could not be processed and is dropped
//! - [`RecordingError`]: the recording sink or one of its tracks failed

use crate::backends::camera::types::MediaKind;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Start-up failures (capture device, GPU, kernels)
    Setup(SetupError),
    /// Recording-related errors
    Recording(RecordingError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Fatal set-up errors, surfaced immediately and never retried
#[derive(Debug, Clone)]
pub enum SetupError {
    /// No capture device of the requested kind exists
    DeviceNotFound(MediaKind),
    /// No usable GPU adapter or device
    NoGpuDevice(String),
    /// Compute or render kernels failed to compile
    KernelLibrary(String),
    /// Media backend (GStreamer) could not be initialised or configured
    Backend(String),
}

/// Per-frame failures; the affected frame is dropped or passed through
#[derive(Debug, Clone)]
pub enum FrameError {
    /// Pixel format cannot be mapped to a GPU image
    UnsupportedFormat(String),
    /// GPU resource allocation failed
    AllocationFailed(String),
    /// GPU readback into a new frame buffer failed
    EncodeFailure(String),
}

/// Recording-specific errors
#[derive(Debug, Clone)]
pub enum RecordingError {
    /// A recording session is already active
    AlreadyRecording,
    /// The container writer could not be opened (bad path, disk full, ...)
    WriterOpenFailed(String),
    /// The container refused a track; that media kind is disabled for the session
    TrackRejected { kind: MediaKind, reason: String },
    /// Write session could not be started
    SessionStartFailed(String),
    /// Appending a buffer failed
    AppendFailed(String),
    /// No suitable encoder element is installed
    EncoderNotAvailable(String),
    /// Finalizing the container failed
    FinalizeFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Setup(e) => write!(f, "Setup error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::DeviceNotFound(kind) => write!(f, "No {} capture device found", kind),
            SetupError::NoGpuDevice(msg) => write!(f, "No GPU device: {}", msg),
            SetupError::KernelLibrary(msg) => write!(f, "Kernel library unavailable: {}", msg),
            SetupError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            FrameError::AllocationFailed(msg) => write!(f, "GPU allocation failed: {}", msg),
            FrameError::EncodeFailure(msg) => write!(f, "Encode failure: {}", msg),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::WriterOpenFailed(msg) => write!(f, "Failed to open writer: {}", msg),
            RecordingError::TrackRejected { kind, reason } => {
                write!(f, "Container rejected {} track: {}", kind, reason)
            }
            RecordingError::SessionStartFailed(msg) => {
                write!(f, "Failed to start write session: {}", msg)
            }
            RecordingError::AppendFailed(msg) => write!(f, "Failed to append buffer: {}", msg),
            RecordingError::EncoderNotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            RecordingError::FinalizeFailed(msg) => write!(f, "Failed to finalize: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for SetupError {}
impl std::error::Error for FrameError {}
impl std::error::Error for RecordingError {}

impl From<SetupError> for AppError {
    fn from(err: SetupError) -> Self {
        AppError::Setup(err)
    }
}

impl From<RecordingError> for AppError {
    fn from(err: RecordingError) -> Self {
        AppError::Recording(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for SetupError {
    fn from(err: gstreamer::glib::Error) -> Self {
        SetupError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_display_names_media_kind() {
        let err = SetupError::DeviceNotFound(MediaKind::Video);
        assert_eq!(err.to_string(), "No video capture device found");
    }

    #[test]
    fn test_recording_error_converts_into_app_error() {
        let err: AppError = RecordingError::AlreadyRecording.into();
        assert!(matches!(err, AppError::Recording(RecordingError::AlreadyRecording)));
        assert_eq!(
            err.to_string(),
            "Recording error: Recording already in progress"
        );
    }
}
