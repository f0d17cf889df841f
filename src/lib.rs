// SPDX-License-Identifier: GPL-3.0-only

//! filtercam - real-time camera filters with preview and MP4 recording
//!
//! Camera (and optional microphone) buffers flow through a chain of GPU
//! compute filters, are presented once per display refresh, and can be muxed
//! into an MP4 file together with the audio track.
//!
//! # Architecture
//!
//! - [`backends`]: capture source, frame buffers and device discovery
//! - [`gpu`]: the shared wgpu device
//! - [`shaders`]: GPU image store, filter kernels and the filter chain
//! - [`pipelines`]: the frame path, preview rendering and recording
//! - [`config`]: persistent user settings
//! - [`storage`]: recording output locations

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipelines;
pub mod shaders;
pub mod storage;

pub use backends::camera::{CaptureSource, FrameBuffer, FrameSink, MediaKind};
pub use config::Config;
pub use errors::{AppError, AppResult, FrameError, RecordingError, SetupError};
