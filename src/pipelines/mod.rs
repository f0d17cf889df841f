// SPDX-License-Identifier: GPL-3.0-only

//! Frame pipelines downstream of the capture source
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ FrameBuffer  │ ──▶ │  FrameProcessor  │ ──▶ │ LatestImage slot │ ──▶ RenderStage
//! │ (BGRA/audio) │     │  - decode        │     └──────────────────┘
//! │              │     │  - filter chain  │     ┌──────────────────┐
//! │              │     │  - encode        │ ──▶ │  RecordingSink   │ ──▶ MP4 file
//! └──────────────┘     └──────────────────┘     └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`processing`]: the frame path run on the capture thread
//! - [`preview`]: render stage, drawable surfaces and the display link
//! - [`video`]: recording state machine and MP4 writer

pub mod preview;
pub mod processing;
pub mod video;
