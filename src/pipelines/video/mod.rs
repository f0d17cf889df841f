// SPDX-License-Identifier: GPL-3.0-only

//! Recording: the state machine, container writers and encoder selection

pub mod encoder_selection;
pub mod muxer;
pub mod recorder;

pub use encoder_selection::{AudioSettings, ScalingMode, TrackSettings, VideoSettings};
pub use muxer::{ContainerWriter, FinishCallback, GstMp4Writer, GstMp4WriterFactory, WriterFactory};
pub use recorder::{Completion, ExpectedTracks, RecordingSink, RecordingState, TrackWriter};
