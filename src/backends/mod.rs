// SPDX-License-Identifier: GPL-3.0-only

//! Capture backends
//!
//! - [`camera`]: the capture source, its frame data model and device discovery
//! - [`audio`]: the microphone branch of the capture pipeline

pub mod audio;
pub mod camera;
