// SPDX-License-Identifier: GPL-3.0-only

//! Frame path: capture sink that runs the filter chain and fans out
//!
//! ```text
//! video: decode ─> FilterChain ─┬─> LatestImage slot (preview)
//!                               └─> encode ─> outputs (recording)
//! audio: ─────────────────────────────────> outputs
//! ```
//!
//! Video in a format the GPU path cannot map is forwarded untouched.

use crate::backends::camera::{FrameBuffer, FrameSink, MediaKind};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::FrameError;
use crate::pipelines::preview::LatestImage;
use crate::shaders::{FilterChain, GpuImageStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Runs every video frame through the filter chain
pub struct FrameProcessor {
    store: Arc<GpuImageStore>,
    chain: Arc<FilterChain>,
    latest: Arc<LatestImage>,
    outputs: Vec<Arc<dyn FrameSink>>,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl FrameProcessor {
    pub fn new(store: Arc<GpuImageStore>, chain: Arc<FilterChain>, latest: Arc<LatestImage>) -> Self {
        Self {
            store,
            chain,
            latest,
            outputs: Vec::new(),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Add a downstream sink receiving filtered video and raw audio
    pub fn with_output(mut self, output: Arc<dyn FrameSink>) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn processed_frames(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Filter one video frame.
    ///
    /// Publishes the filtered image for the preview and, when there are
    /// outputs, returns it read back into a new frame buffer.
    pub fn process_video(&self, frame: FrameBuffer) -> Result<Option<FrameBuffer>, FrameError> {
        let input = match self.store.decode(&frame) {
            Ok(image) => image,
            Err(FrameError::UnsupportedFormat(reason)) => {
                debug!(%reason, "Bypassing filter chain");
                return Ok(Some(frame));
            }
            Err(e) => return Err(e),
        };

        let filtered = self.chain.filter(&self.store, input);

        let encoded = if self.outputs.is_empty() {
            None
        } else {
            Some(self.store.encode(&filtered, &frame)?)
        };

        self.latest.publish(filtered);

        let count = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if count % FRAME_LOG_INTERVAL == 0 {
            debug!(
                frames = count,
                dropped = self.dropped_frames(),
                stages = self.chain.len(),
                "Frames processed"
            );
        }

        Ok(encoded)
    }

    fn fan_out(&self, frame: FrameBuffer) {
        for output in &self.outputs {
            output.on_frame(frame.clone());
        }
    }
}

impl FrameSink for FrameProcessor {
    fn on_frame(&self, frame: FrameBuffer) {
        match frame.kind() {
            MediaKind::Audio => self.fan_out(frame),
            MediaKind::Video => match self.process_video(frame) {
                Ok(Some(filtered)) => self.fan_out(filtered),
                Ok(None) => {}
                Err(e) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Dropping frame");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{PixelFormat, SampleFormat};
    use crate::gpu::GpuContext;
    use std::sync::Mutex;
    use std::time::Duration;

    fn collector() -> (Arc<dyn FrameSink>, Arc<Mutex<Vec<FrameBuffer>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink_frames = Arc::clone(&frames);
        let sink: Arc<dyn FrameSink> = Arc::new(move |frame: FrameBuffer| {
            sink_frames.lock().unwrap().push(frame);
        });
        (sink, frames)
    }

    #[test]
    fn test_audio_and_unmappable_video_bypass_chain() {
        let ctx = match GpuContext::new_blocking("processing_test") {
            Ok(ctx) => ctx,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let (sink, frames) = collector();
        let latest = Arc::new(LatestImage::default());
        let processor = FrameProcessor::new(
            Arc::new(GpuImageStore::new(ctx)),
            Arc::new(FilterChain::new()),
            Arc::clone(&latest),
        )
        .with_output(sink);

        processor.on_frame(FrameBuffer::audio(
            vec![1u8, 2, 3, 4],
            SampleFormat::S16LE,
            44_100,
            1,
            Duration::from_millis(5),
        ));
        processor.on_frame(FrameBuffer::video(
            vec![7u8; 24],
            PixelFormat::NV12,
            4,
            4,
            4,
            Duration::from_millis(10),
        ));

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].data[..], &[1, 2, 3, 4]);
        assert_eq!(&frames[1].data[..], &[7u8; 24][..]);
        assert!(latest.acquire().is_none());
        assert_eq!(processor.processed_frames(), 0);
    }

    #[test]
    fn test_bgra_frame_is_published_and_forwarded() {
        let ctx = match GpuContext::new_blocking("processing_test") {
            Ok(ctx) => ctx,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let (sink, frames) = collector();
        let latest = Arc::new(LatestImage::default());
        let processor = FrameProcessor::new(
            Arc::new(GpuImageStore::new(ctx)),
            Arc::new(FilterChain::new()),
            Arc::clone(&latest),
        )
        .with_output(sink);

        let frame = FrameBuffer::video(vec![9u8; 8 * 2 * 4], PixelFormat::BGRA, 8, 2, 32, Duration::from_millis(33));
        processor.on_frame(frame);

        let published = latest.acquire();
        let image = published.as_ref().expect("published image");
        assert_eq!((image.width(), image.height()), (8, 2));

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, Duration::from_millis(33));
        assert_eq!(&frames[0].data[..], &[9u8; 64][..]);
    }
}
