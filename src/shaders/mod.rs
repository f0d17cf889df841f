// SPDX-License-Identifier: GPL-3.0-only

//! GPU image store, filter kernels and the filter chain
//!
//! All filters are WGSL compute kernels with a 16x16 workgroup. They read
//! one texture, write another, and take one uniform buffer per parameter.

pub mod filter_chain;
pub mod filter_stage;
pub mod image_store;
pub mod readback;

pub use filter_chain::{FilterChain, parameter_contents};
pub use filter_stage::{FilterKind, FilterParameters, FilterStage, KernelLibrary};
pub use image_store::{GPU_IMAGE_FORMAT, GpuImage, GpuImageStore};
pub use readback::ReadbackBuffer;

/// Fullscreen present shader used by the preview stage
pub const PRESENT_SHADER: &str = include_str!("kernels/present.wgsl");
