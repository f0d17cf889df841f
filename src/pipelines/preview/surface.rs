// SPDX-License-Identifier: GPL-3.0-only

//! Drawable surfaces the render stage presents into

use crate::errors::SetupError;
use crate::gpu::{GpuContext, wgpu};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// 32-bit BGRA, the format every surface presents in
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

/// One image the render stage can draw into
pub enum Drawable {
    Window(wgpu::SurfaceTexture),
    Offscreen(wgpu::Texture),
}

impl Drawable {
    /// View used as the render pass target
    pub fn target_view(&self) -> wgpu::TextureView {
        let texture = match self {
            Drawable::Window(frame) => &frame.texture,
            Drawable::Offscreen(texture) => texture,
        };
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }
}

/// A presentable target, such as a window or an offscreen texture
pub trait DrawableSurface: Send {
    fn format(&self) -> wgpu::TextureFormat;

    /// Next drawable, or `None` if none is available this tick
    fn acquire_next_drawable(&mut self) -> Option<Drawable>;

    fn present(&mut self, drawable: Drawable);
}

/// Window surface configured for BGRA presentation
pub struct WindowSurface {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    config: wgpu::SurfaceConfiguration,
}

impl WindowSurface {
    /// Configure `surface` (created from [`GpuContext::instance`]) for presenting
    pub fn new(
        ctx: &GpuContext,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Result<Self, SetupError> {
        let caps = surface.get_capabilities(ctx.adapter());
        if !caps.formats.contains(&SURFACE_FORMAT) {
            return Err(SetupError::Backend(format!(
                "surface does not support {:?}",
                SURFACE_FORMAT
            )));
        }

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: SURFACE_FORMAT,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&ctx.device, &config);

        info!(width = config.width, height = config.height, "Window surface configured");

        Ok(Self {
            surface,
            device: ctx.device.clone(),
            config,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
    }
}

impl DrawableSurface for WindowSurface {
    fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn acquire_next_drawable(&mut self) -> Option<Drawable> {
        match self.surface.get_current_texture() {
            Ok(frame) => Some(Drawable::Window(frame)),
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                debug!("Surface outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                self.surface.get_current_texture().ok().map(Drawable::Window)
            }
            Err(wgpu::SurfaceError::Timeout) => None,
            Err(e) => {
                warn!(error = %e, "Failed to acquire drawable");
                None
            }
        }
    }

    fn present(&mut self, drawable: Drawable) {
        if let Drawable::Window(frame) = drawable {
            frame.present();
        }
    }
}

/// Headless render target; counts presented frames
pub struct OffscreenSurface {
    texture: wgpu::Texture,
    presented: Arc<AtomicU64>,
}

impl OffscreenSurface {
    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_surface"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        Self {
            texture,
            presented: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of presented frames
    pub fn presented_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.presented)
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

impl DrawableSurface for OffscreenSurface {
    fn format(&self) -> wgpu::TextureFormat {
        SURFACE_FORMAT
    }

    fn acquire_next_drawable(&mut self) -> Option<Drawable> {
        Some(Drawable::Offscreen(self.texture.clone()))
    }

    fn present(&mut self, _drawable: Drawable) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }
}
