// SPDX-License-Identifier: GPL-3.0-only

//! GPU to CPU transfers and dispatch math shared by the filter path

use crate::constants::gpu::BYTES_PER_PIXEL;
use crate::errors::FrameError;
use crate::gpu::{GpuContext, wgpu};
use tracing::debug;

/// Workgroups needed to cover `dimension` texels
///
/// Rounds up; kernels discard invocations outside the image.
#[inline]
pub fn workgroups_for(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}

/// Row pitch of a BGRA texture copied into a buffer (multiple of 256 bytes)
#[inline]
pub fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Mappable staging buffer, reallocated only when the image size changes
#[derive(Debug, Default)]
pub struct ReadbackBuffer {
    buffer: Option<wgpu::Buffer>,
    width: u32,
    height: u32,
}

impl ReadbackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the images the current buffer fits, `(0, 0)` before first use
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn buffer_for(&mut self, device: &wgpu::Device, width: u32, height: u32) -> &wgpu::Buffer {
        if (self.width, self.height) != (width, height) {
            self.buffer = None;
        }
        if self.buffer.is_none() {
            debug!(width, height, "Allocating readback buffer");
            self.width = width;
            self.height = height;
        }
        self.buffer.get_or_insert_with(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback_buffer"),
                size: padded_row_bytes(width) as u64 * height as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        })
    }

    /// Copy a whole texture into CPU memory with tightly packed rows.
    ///
    /// Blocks until the GPU has finished every submission before the copy.
    pub fn read_texture(
        &mut self,
        ctx: &GpuContext,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, FrameError> {
        let padded_row = padded_row_bytes(width);
        let row_bytes = (width * BYTES_PER_PIXEL) as usize;
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let buffer = self.buffer_for(&ctx.device, width, height);

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent,
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let padded = pollster::block_on(map_read(&ctx.device, buffer))?;

        let mut packed = Vec::with_capacity(row_bytes * height as usize);
        for row in padded.chunks_exact(padded_row as usize) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        Ok(packed)
    }
}

/// Map `buffer` for reading, copy its contents out and unmap it
async fn map_read(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u8>, FrameError> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| FrameError::EncodeFailure("buffer mapping was cancelled".to_string()))?
        .map_err(|e| FrameError::EncodeFailure(format!("failed to map buffer: {}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}
