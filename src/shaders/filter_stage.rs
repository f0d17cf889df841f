// SPDX-License-Identifier: GPL-3.0-only

//! Filter stages and the compiled kernel library
//!
//! A stage is a kernel name plus a live parameter vector. All stages share one
//! type; the [`FilterKind`] tag selects kernel and parameter layout.

use crate::errors::SetupError;
use crate::gpu::{GpuContext, wgpu};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

/// Built-in filters, configured by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Brightness,
    Contrast,
    Saturation,
    /// Pass-through kernel without parameters
    Identity,
}

impl FilterKind {
    pub const ALL: [FilterKind; 4] = [
        FilterKind::Brightness,
        FilterKind::Contrast,
        FilterKind::Saturation,
        FilterKind::Identity,
    ];

    /// Look up a filter by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Stable name, also the kernel name in the library
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Brightness => "Brightness",
            FilterKind::Contrast => "Contrast",
            FilterKind::Saturation => "Saturation",
            FilterKind::Identity => "Identity",
        }
    }

    /// Initial parameter values; the length is fixed per kind
    pub fn default_factors(&self) -> &'static [f32] {
        match self {
            FilterKind::Brightness => &[0.0],
            FilterKind::Contrast => &[1.0],
            FilterKind::Saturation => &[1.0],
            FilterKind::Identity => &[],
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.default_factors().len()
    }

    fn kernel_source(&self) -> &'static str {
        match self {
            FilterKind::Brightness => include_str!("kernels/brightness.wgsl"),
            FilterKind::Contrast => include_str!("kernels/contrast.wgsl"),
            FilterKind::Saturation => include_str!("kernels/saturation.wgsl"),
            FilterKind::Identity => include_str!("kernels/identity.wgsl"),
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Live scalar parameters of one stage
///
/// Cloning yields another handle to the same values. Writes from the control
/// surface are visible to the very next frame; no range is enforced.
#[derive(Debug, Clone)]
pub struct FilterParameters {
    values: Arc<[AtomicU32]>,
}

impl FilterParameters {
    pub fn new(initial: &[f32]) -> Self {
        Self {
            values: initial.iter().map(|v| AtomicU32::new(v.to_bits())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values
            .get(index)
            .map(|v| f32::from_bits(v.load(Ordering::Relaxed)))
    }

    /// Set one value; returns false if `index` is out of range
    pub fn set(&self, index: usize, value: f32) -> bool {
        match self.values.get(index) {
            Some(slot) => {
                slot.store(value.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Current values, in order
    pub fn values(&self) -> Vec<f32> {
        self.values
            .iter()
            .map(|v| f32::from_bits(v.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Compiled compute kernels, keyed by filter name
pub struct KernelLibrary {
    kernels: HashMap<&'static str, Arc<wgpu::ComputePipeline>>,
}

impl KernelLibrary {
    /// Compile every built-in kernel.
    ///
    /// A kernel that fails validation makes the whole library unavailable,
    /// which is a fatal set-up error.
    pub fn compile(ctx: &GpuContext) -> Result<Self, SetupError> {
        let device = &ctx.device;
        let mut kernels = HashMap::new();

        for kind in FilterKind::ALL {
            device.push_error_scope(wgpu::ErrorFilter::Validation);

            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kind.name()),
                source: wgpu::ShaderSource::Wgsl(kind.kernel_source().into()),
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kind.name()),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

            if let Some(err) = pollster::block_on(device.pop_error_scope()) {
                return Err(SetupError::KernelLibrary(format!("{}: {}", kind, err)));
            }

            debug!(kernel = kind.name(), "Compiled compute kernel");
            kernels.insert(kind.name(), Arc::new(pipeline));
        }

        info!(count = kernels.len(), "Kernel library ready");
        Ok(Self { kernels })
    }

    /// An empty library; every stage built from it is skipped
    pub fn empty() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    pub fn kernel(&self, name: &str) -> Option<Arc<wgpu::ComputePipeline>> {
        self.kernels.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// One parameterized compute transform
pub struct FilterStage {
    kind: FilterKind,
    kernel: Option<Arc<wgpu::ComputePipeline>>,
    parameters: FilterParameters,
}

impl FilterStage {
    /// Create a stage with the kind's default parameters
    pub fn new(kind: FilterKind, library: &KernelLibrary) -> Self {
        Self {
            kind,
            kernel: library.kernel(kind.name()),
            parameters: FilterParameters::new(kind.default_factors()),
        }
    }

    /// Create a stage from its configured name
    pub fn by_name(name: &str, library: &KernelLibrary) -> Option<Self> {
        FilterKind::from_name(name).map(|kind| Self::new(kind, library))
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Compiled kernel, if the library provided one
    pub fn kernel(&self) -> Option<&wgpu::ComputePipeline> {
        self.kernel.as_deref()
    }

    /// Handle for the control surface
    pub fn parameters(&self) -> FilterParameters {
        self.parameters.clone()
    }

    /// Parameter vector for this invocation, read fresh on every call
    pub fn factors(&self) -> Vec<f32> {
        self.parameters.values()
    }
}

impl std::fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage")
            .field("kind", &self.kind)
            .field("compiled", &self.kernel.is_some())
            .field("factors", &self.factors())
            .finish()
    }
}
