// SPDX-License-Identifier: GPL-3.0-only

//! Preview: present the latest filtered image once per display refresh
//!
//! The frame path publishes into a [`FrameSlot`]; the [`RenderStage`] reads it
//! on every [`DisplayLink`] tick. When the slot is empty, or no drawable is
//! available, the tick is a no-op and that display frame is dropped.

pub mod display_link;
pub mod slot;
pub mod surface;

pub use display_link::DisplayLink;
pub use slot::{FrameSlot, SlotGuard};
pub use surface::{Drawable, DrawableSurface, OffscreenSurface, SURFACE_FORMAT, WindowSurface};

use crate::gpu::{GpuContext, wgpu};
use crate::shaders::{GpuImage, PRESENT_SHADER};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// The single latest image shared between the frame and render paths
pub type LatestImage = FrameSlot<Option<GpuImage>>;

/// Called once per display refresh
pub trait RenderTick: Send + Sync {
    fn tick(&self);
}

/// Draws the latest image onto a drawable surface
pub struct RenderStage<S: DrawableSurface> {
    ctx: Arc<GpuContext>,
    latest: Arc<LatestImage>,
    surface: Mutex<S>,
    pipeline: Option<wgpu::RenderPipeline>,
    sampler: wgpu::Sampler,
    drawn: AtomicU64,
}

impl<S: DrawableSurface> RenderStage<S> {
    /// Build the present pipeline for `surface`.
    ///
    /// If the present shader fails to compile the stage still exists but every
    /// tick is a no-op.
    pub fn new(ctx: Arc<GpuContext>, latest: Arc<LatestImage>, surface: S) -> Self {
        let pipeline = Self::create_pipeline(&ctx, surface.format());

        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("present_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            ctx,
            latest,
            surface: Mutex::new(surface),
            pipeline,
            sampler,
            drawn: AtomicU64::new(0),
        }
    }

    fn create_pipeline(
        ctx: &GpuContext,
        format: wgpu::TextureFormat,
    ) -> Option<wgpu::RenderPipeline> {
        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("present_shader"),
            source: wgpu::ShaderSource::Wgsl(PRESENT_SHADER.into()),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("present_pipeline"),
            layout: None,
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("map_texture"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("display_texture"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => {
                warn!(error = %err, "Present pipeline unavailable");
                None
            }
            None => {
                info!(?format, "Present pipeline ready");
                Some(pipeline)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Number of ticks that actually drew and presented
    pub fn drawn_frames(&self) -> u64 {
        self.drawn.load(Ordering::Relaxed)
    }
}

impl<S: DrawableSurface> RenderTick for RenderStage<S> {
    fn tick(&self) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };

        let mut surface = self.surface.lock().unwrap_or_else(|e| e.into_inner());
        let slot = self.latest.acquire();

        let Some(image) = slot.as_ref() else {
            return;
        };
        let Some(drawable) = surface.acquire_next_drawable() else {
            debug!("No drawable available, dropping display frame");
            return;
        };

        let source_view = image.view();
        let target_view = drawable.target_view();

        let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("present_bind_group"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present_encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, Some(&bind_group), &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        drop(slot);

        surface.present(drawable);
        self.drawn.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{FrameBuffer, PixelFormat};
    use crate::shaders::GpuImageStore;
    use std::time::Duration;

    #[test]
    fn test_present_shader_validates() {
        let module = naga::front::wgsl::parse_str(PRESENT_SHADER).expect("parse present shader");
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .expect("validate present shader");
    }

    #[test]
    fn test_empty_slot_draws_nothing() {
        let ctx = match GpuContext::new_blocking("render_stage_test") {
            Ok(ctx) => ctx,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let latest = Arc::new(LatestImage::default());
        let surface = OffscreenSurface::new(&ctx, 64, 64);
        let presented = surface.presented_counter();
        let stage = RenderStage::new(ctx, latest, surface);

        stage.tick();
        stage.tick();

        assert_eq!(stage.drawn_frames(), 0);
        assert_eq!(presented.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_published_image_is_drawn_each_tick() {
        let ctx = match GpuContext::new_blocking("render_stage_test") {
            Ok(ctx) => ctx,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let store = GpuImageStore::new(Arc::clone(&ctx));
        let frame = FrameBuffer::video(
            vec![255u8; 32 * 32 * 4],
            PixelFormat::BGRA,
            32,
            32,
            32 * 4,
            Duration::ZERO,
        );
        let image = store.decode(&frame).expect("decode");

        let latest = Arc::new(LatestImage::default());
        let surface = OffscreenSurface::new(&ctx, 64, 64);
        let presented = surface.presented_counter();
        let stage = RenderStage::new(ctx, Arc::clone(&latest), surface);
        if !stage.is_ready() {
            println!("Skipping test (present pipeline unavailable)");
            return;
        }

        assert!(latest.publish(image).is_none());
        stage.tick();
        assert_eq!(stage.drawn_frames(), 1);
        assert_eq!(presented.load(Ordering::Relaxed), 1);

        // The image stays in the slot until replaced
        stage.tick();
        assert_eq!(stage.drawn_frames(), 2);
        assert_eq!(presented.load(Ordering::Relaxed), 2);
        assert!(latest.acquire().is_some());
    }
}
