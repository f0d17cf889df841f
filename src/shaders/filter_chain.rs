// SPDX-License-Identifier: GPL-3.0-only

//! Ordered chain of filter stages
//!
//! Each stage reads the current image and writes a freshly allocated scratch
//! image, which then becomes current. The current image is always owned by
//! the chain, so a failed stage leaves its input in place.

use crate::constants::gpu::{PARAMETER_BUFFER_SIZE, WORKGROUP_SIZE};
use crate::gpu::wgpu::{self, util::DeviceExt};
use crate::shaders::filter_stage::FilterStage;
use crate::shaders::image_store::{GpuImage, GpuImageStore};
use crate::shaders::readback::workgroups_for;
use tracing::{debug, warn};

/// Append-only sequence of filter stages
///
/// Built during set-up, then shared read-only with the frame path.
#[derive(Debug, Default)]
pub struct FilterChain {
    stages: Vec<FilterStage>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage to the end of the chain
    pub fn push(&mut self, stage: FilterStage) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// First stage with the given name
    pub fn stage(&self, name: &str) -> Option<&FilterStage> {
        self.stages
            .iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(name))
    }

    /// Run every stage over `input`.
    ///
    /// The result always has the input's dimensions and pixel format; an empty
    /// chain returns the input unchanged. Stages without a kernel, or whose
    /// scratch allocation fails, are skipped.
    ///
    /// Each stage is its own queue submission. Submissions execute in order,
    /// so a stage never reads its predecessor's output before it is written.
    pub fn filter(&self, store: &GpuImageStore, input: GpuImage) -> GpuImage {
        let ctx = store.context();
        let mut current = input;

        for stage in &self.stages {
            let Some(kernel) = stage.kernel() else {
                debug!(stage = stage.name(), "No kernel, skipping stage");
                continue;
            };

            let scratch = match store.allocate_like(&current) {
                Ok(image) => image,
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "Skipping stage");
                    continue;
                }
            };

            let parameter_buffers: Vec<wgpu::Buffer> = stage
                .factors()
                .into_iter()
                .map(|factor| {
                    let contents = parameter_contents(factor);
                    ctx.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("filter_parameter_buffer"),
                            contents: &contents,
                            usage: wgpu::BufferUsages::UNIFORM,
                        })
                })
                .collect();

            let input_view = current.view();
            let output_view = scratch.view();

            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&output_view),
                },
            ];
            entries.extend(parameter_buffers.iter().enumerate().map(|(i, buffer)| {
                wgpu::BindGroupEntry {
                    binding: 2 + i as u32,
                    resource: buffer.as_entire_binding(),
                }
            }));

            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("filter_bind_group"),
                layout: &kernel.get_bind_group_layout(0),
                entries: &entries,
            });

            let mut encoder = ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(stage.name()),
                });

            {
                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(stage.name()),
                    timestamp_writes: None,
                });

                compute_pass.set_pipeline(kernel);
                compute_pass.set_bind_group(0, Some(&bind_group), &[]);

                let workgroups_x = workgroups_for(current.width(), WORKGROUP_SIZE);
                let workgroups_y = workgroups_for(current.height(), WORKGROUP_SIZE);
                compute_pass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
            }

            ctx.queue.submit(std::iter::once(encoder.finish()));

            current = scratch;
        }

        current
    }
}

/// Uniform buffer contents for one kernel parameter.
///
/// The factor sits in the first four bytes; the rest pads to the minimum
/// uniform binding size.
pub fn parameter_contents(factor: f32) -> [u8; PARAMETER_BUFFER_SIZE as usize] {
    let mut contents = [0u8; PARAMETER_BUFFER_SIZE as usize];
    contents[..4].copy_from_slice(bytemuck::bytes_of(&factor));
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::filter_stage::{FilterKind, KernelLibrary};

    #[test]
    fn test_push_only_grows() {
        let library = KernelLibrary::empty();
        let mut chain = FilterChain::new();
        assert!(chain.is_empty());

        let mut previous = chain.len();
        for kind in [FilterKind::Contrast, FilterKind::Saturation, FilterKind::Brightness] {
            chain.push(FilterStage::new(kind, &library));
            assert!(chain.len() > previous);
            previous = chain.len();
        }

        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.stage("brightness").map(|s| s.kind()),
            Some(FilterKind::Brightness)
        );
    }

    #[test]
    fn test_parameter_contents_layout() {
        let contents = parameter_contents(0.5);
        assert_eq!(contents.len(), 16);
        assert_eq!(&contents[..4], &0.5f32.to_ne_bytes());
        assert!(contents[4..].iter().all(|b| *b == 0));
    }
}
