//! Host hardware detection and launch-parameter recommendations.

use std::path::Path;

use sysinfo::System;
use tracing::{debug, info};

use crate::error::LocalError;

/// Layer count that tells llama-server to offload everything that fits.
pub const OFFLOAD_ALL_LAYERS: u32 = 99;

/// Smallest context window worth running.
pub const MIN_CONTEXT_SIZE: u32 = 2048;

/// Context used when nothing better is known.
pub const FALLBACK_CONTEXT_SIZE: u32 = 4096;

/// Rough KV-cache cost per token, scaled from model size.
const MIN_KV_BYTES_PER_TOKEN: u64 = 64 * 1024;
const KV_SIZE_DIVISOR: u64 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuKind {
    None,
    /// Apple Silicon
    Metal,
    /// NVIDIA
    Cuda,
    /// AMD
    Rocm,
    /// Generic Vulkan driver
    Vulkan,
}

impl GpuKind {
    pub fn is_gpu(self) -> bool {
        self != GpuKind::None
    }
}

/// Detected host resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemResources {
    pub cpu_count: usize,
    pub total_ram_bytes: u64,
    pub available_ram_bytes: u64,
    pub gpu: GpuKind,
}

impl SystemResources {
    /// CPU-only with modest memory; used when detection fails.
    pub fn conservative() -> Self {
        Self {
            cpu_count: 4,
            total_ram_bytes: 8 * GIB,
            available_ram_bytes: 4 * GIB,
            gpu: GpuKind::None,
        }
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_gpu()
    }
}

const GIB: u64 = 1024 * 1024 * 1024;

/// Launch parameters suggested for a model on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recommendation {
    pub context_size: u32,
    pub gpu_layers: u32,
}

pub struct ResourceProfiler;

impl ResourceProfiler {
    /// Inspect CPU count, RAM, and GPU presence.
    pub fn detect() -> Result<SystemResources, LocalError> {
        let cpu_count = std::thread::available_parallelism()
            .map_err(LocalError::Io)?
            .get();

        let mut sys = System::new();
        sys.refresh_memory();
        let total_ram_bytes = sys.total_memory();
        if total_ram_bytes == 0 {
            return Err(LocalError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "could not read system memory",
            )));
        }

        let resources = SystemResources {
            cpu_count,
            total_ram_bytes,
            available_ram_bytes: sys.available_memory(),
            gpu: detect_gpu(),
        };
        info!(
            cpus = resources.cpu_count,
            ram_gib = resources.total_ram_bytes / GIB,
            gpu = ?resources.gpu,
            "detected system resources"
        );
        Ok(resources)
    }

    /// `detect`, falling back to [`SystemResources::conservative`].
    pub fn detect_or_default() -> SystemResources {
        Self::detect().unwrap_or_else(|e| {
            debug!("hardware detection failed, using defaults: {}", e);
            SystemResources::conservative()
        })
    }

    /// Recommend a context size and GPU offload for a model.
    ///
    /// `context_limit` is the largest context worth using (the model's native
    /// length, or a fallback when unknown). The result favors that limit when
    /// RAM is plentiful and shrinks toward [`MIN_CONTEXT_SIZE`] as the model
    /// eats into memory.
    pub fn recommend(
        resources: &SystemResources,
        model_size_bytes: u64,
        context_limit: u32,
    ) -> Recommendation {
        let gpu_layers = if resources.has_gpu() {
            OFFLOAD_ALL_LAYERS
        } else {
            0
        };

        let limit = if context_limit == 0 {
            FALLBACK_CONTEXT_SIZE
        } else {
            context_limit
        };

        Recommendation {
            context_size: recommend_context(resources.total_ram_bytes, model_size_bytes, limit),
            gpu_layers,
        }
    }
}

fn recommend_context(total_ram: u64, model_size: u64, limit: u32) -> u32 {
    let floor = MIN_CONTEXT_SIZE.min(limit);
    if total_ram == 0 {
        return FALLBACK_CONTEXT_SIZE.min(limit);
    }

    // Weights plus ~10% runtime overhead; half of what remains goes to the KV cache.
    let weights = model_size + model_size / 10;
    let headroom = total_ram.saturating_sub(weights) / 2;
    let per_token = (model_size / KV_SIZE_DIVISOR).max(MIN_KV_BYTES_PER_TOKEN);
    let fits = headroom / per_token;

    let context = fits.min(limit as u64) as u32;
    // Keep sizes on 1K boundaries unless the limit itself is smaller.
    let context = if context >= 1024 && context < limit {
        context / 1024 * 1024
    } else {
        context
    };
    context.max(floor)
}

const VULKAN_LOADERS: &[&str] = &[
    "/usr/lib/x86_64-linux-gnu/libvulkan.so.1",
    "/usr/lib/aarch64-linux-gnu/libvulkan.so.1",
    "/usr/lib64/libvulkan.so.1",
    "/usr/lib/libvulkan.so.1",
];

fn detect_gpu() -> GpuKind {
    if cfg!(target_os = "macos") && std::env::consts::ARCH == "aarch64" {
        return GpuKind::Metal;
    }
    if cfg!(target_os = "windows") {
        return if Path::new("C:\\Windows\\System32\\nvcuda.dll").exists() {
            GpuKind::Cuda
        } else {
            GpuKind::None
        };
    }
    classify_gpu(|p| Path::new(p).exists(), has_render_node(Path::new("/dev/dri")))
}

/// Pick a GPU backend from device nodes. An installed toolkit or loader
/// without a device behind it does not count.
fn classify_gpu(exists: impl Fn(&str) -> bool, render_node: bool) -> GpuKind {
    if exists("/proc/driver/nvidia/version") || exists("/dev/nvidia0") {
        return GpuKind::Cuda;
    }
    if exists("/dev/kfd") && render_node {
        return GpuKind::Rocm;
    }
    if render_node && VULKAN_LOADERS.iter().any(|p| exists(p)) {
        return GpuKind::Vulkan;
    }
    GpuKind::None
}

fn has_render_node(dri: &Path) -> bool {
    std::fs::read_dir(dri)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().starts_with("renderD"))
        })
        .unwrap_or(false)
}
