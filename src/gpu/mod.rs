// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide GPU context
//!
//! The wgpu instance, adapter, device and queue are created once at start-up
//! and shared (via `Arc`) by the image store, the filter chain and the render
//! stage.

use crate::errors::SetupError;
use std::sync::Arc;
use tracing::{debug, info};

pub use wgpu;

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
}

/// Shared GPU device and queue
pub struct GpuContext {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: GpuDeviceInfo,
}

impl GpuContext {
    /// Create the GPU context.
    ///
    /// Fails with [`SetupError::NoGpuDevice`] when no adapter or device is
    /// available; callers treat this as fatal.
    pub async fn new(label: &str) -> Result<Arc<Self>, SetupError> {
        info!(label = label, "Creating GPU context");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SetupError::NoGpuDevice(format!("no suitable adapter: {}", e)))?;

        let adapter_info = adapter.get_info();

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| SetupError::NoGpuDevice(format!("failed to create device: {}", e)))?;

        debug!(label = label, "GPU device created");

        let info = GpuDeviceInfo {
            adapter_name: adapter_info.name.clone(),
            backend: adapter_info.backend,
        };

        Ok(Arc::new(Self {
            instance,
            adapter,
            device,
            queue,
            info,
        }))
    }

    /// Blocking variant of [`GpuContext::new`] for synchronous start-up code
    pub fn new_blocking(label: &str) -> Result<Arc<Self>, SetupError> {
        pollster::block_on(Self::new(label))
    }

    /// Instance used to create window surfaces
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Adapter, for surface capability queries
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext").field("info", &self.info).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_gpu_context() {
        // This test requires a GPU, so it may be skipped in CI
        match GpuContext::new("test_device").await {
            Ok(ctx) => {
                println!("Created device: {:?}", ctx.info);
                assert!(!ctx.info.adapter_name.is_empty());
            }
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }
}
