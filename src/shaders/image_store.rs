// SPDX-License-Identifier: GPL-3.0-only

//! Conversion between frame buffers and GPU-resident images
//!
//! Video frames are uploaded into `Rgba8Unorm` textures without reordering,
//! so texels hold BGRA bytes. Every kernel and the present shader account for
//! that channel order. Readback produces tightly packed BGRA rows.

use crate::backends::camera::types::{FrameBuffer, PixelFormat};
use crate::constants::gpu::BYTES_PER_PIXEL;
use crate::errors::FrameError;
use crate::gpu::{GpuContext, wgpu};
use crate::shaders::readback::ReadbackBuffer;
use std::sync::{Arc, Mutex};

/// Texture format backing every [`GpuImage`]
pub const GPU_IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A device-resident 2D image with fixed size and format
#[derive(Debug)]
pub struct GpuImage {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl GpuImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> wgpu::TextureView {
        self.texture
            .create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Owns the upload/readback path between frame buffers and GPU images
pub struct GpuImageStore {
    ctx: Arc<GpuContext>,
    readback: Mutex<ReadbackBuffer>,
}

impl GpuImageStore {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self {
            ctx,
            readback: Mutex::new(ReadbackBuffer::new()),
        }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Upload a video frame into a new GPU image.
    ///
    /// Only BGRA video maps onto the GPU path; everything else returns
    /// [`FrameError::UnsupportedFormat`] and the caller forwards the frame untouched.
    pub fn decode(&self, frame: &FrameBuffer) -> Result<GpuImage, FrameError> {
        let format = frame
            .video_format()
            .ok_or_else(|| FrameError::UnsupportedFormat(format!("{} buffer", frame.kind())))?;

        if format.pixel_format != PixelFormat::BGRA {
            return Err(FrameError::UnsupportedFormat(
                format.pixel_format.gst_name().to_string(),
            ));
        }

        let row_bytes = format.width * BYTES_PER_PIXEL;
        if format.width == 0 || format.height == 0 || format.stride < row_bytes {
            return Err(FrameError::UnsupportedFormat(format!(
                "invalid layout {}x{} stride {}",
                format.width, format.height, format.stride
            )));
        }

        let required = format.stride as usize * (format.height as usize - 1) + row_bytes as usize;
        if frame.data.len() < required {
            return Err(FrameError::UnsupportedFormat(format!(
                "payload too short: {} < {} bytes",
                frame.data.len(),
                required
            )));
        }

        let image = self.create_image(format.width, format.height, format.pixel_format)?;

        self.ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data[..required],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(format.stride),
                rows_per_image: Some(format.height),
            },
            image.extent(),
        );

        Ok(image)
    }

    /// Allocate an empty image with the same size and format as `image`
    pub fn allocate_like(&self, image: &GpuImage) -> Result<GpuImage, FrameError> {
        self.create_image(image.width, image.height, image.pixel_format)
    }

    /// Read `image` back into a newly allocated frame buffer.
    ///
    /// The result is sized to the texture and reuses the template's timing
    /// and orientation.
    pub fn encode(&self, image: &GpuImage, template: &FrameBuffer) -> Result<FrameBuffer, FrameError> {
        let packed = self
            .readback
            .lock()
            .map_err(|_| FrameError::EncodeFailure("readback buffer poisoned".to_string()))?
            .read_texture(&self.ctx, &image.texture, image.width, image.height)?;

        Ok(FrameBuffer::video(
            packed,
            image.pixel_format,
            image.width,
            image.height,
            image.width * BYTES_PER_PIXEL,
            template.pts,
        )
        .with_duration(template.duration)
        .with_orientation(template.orientation))
    }

    fn create_image(
        &self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Result<GpuImage, FrameError> {
        let device = &self.ctx.device;
        let max = device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(FrameError::AllocationFailed(format!(
                "{}x{} exceeds texture limit {}",
                width, height, max
            )));
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gpu_image"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: GPU_IMAGE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            return Err(FrameError::AllocationFailed(err.to_string()));
        }

        Ok(GpuImage {
            texture,
            width,
            height,
            pixel_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::SampleFormat;
    use std::time::Duration;

    fn bgra_frame(width: u32, height: u32) -> FrameBuffer {
        let data: Vec<u8> = (0..width * height)
            .flat_map(|i| [(i % 251) as u8, 64, 128, 255])
            .collect();
        FrameBuffer::video(
            data,
            PixelFormat::BGRA,
            width,
            height,
            width * 4,
            Duration::from_millis(40),
        )
    }

    #[test]
    fn test_decode_encode_preserves_pixels_and_timing() {
        let ctx = match GpuContext::new_blocking("image_store_test") {
            Ok(ctx) => ctx,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let store = GpuImageStore::new(ctx);
        // Width not a multiple of 64 pixels exercises row padding
        let frame = bgra_frame(37, 5);

        let image = store.decode(&frame).expect("decode");
        assert_eq!((image.width(), image.height()), (37, 5));

        let out = store.encode(&image, &frame).expect("encode");
        assert_eq!(out.pts, frame.pts);
        assert_eq!(&out.data[..], &frame.data[..]);
    }

    #[test]
    fn test_decode_rejects_non_bgra() {
        let ctx = match GpuContext::new_blocking("image_store_test") {
            Ok(ctx) => ctx,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let store = GpuImageStore::new(ctx);

        let nv12 = FrameBuffer::video(vec![0u8; 24], PixelFormat::NV12, 4, 4, 4, Duration::ZERO);
        assert!(matches!(
            store.decode(&nv12),
            Err(FrameError::UnsupportedFormat(_))
        ));

        let audio = FrameBuffer::audio(vec![0u8; 8], SampleFormat::S16LE, 44_100, 1, Duration::ZERO);
        assert!(matches!(
            store.decode(&audio),
            Err(FrameError::UnsupportedFormat(_))
        ));

        let mut short = bgra_frame(8, 8);
        short.data = vec![0u8; 10].into();
        assert!(matches!(
            store.decode(&short),
            Err(FrameError::UnsupportedFormat(_))
        ));
    }
}
