//! Local inference backend for scmd using llama.cpp.
//!
//! This crate provides a self-contained local backend: scmd downloads its own
//! models, launches and supervises a llama-server process tuned to the host,
//! and sends completion requests to it.

pub mod backend;
pub mod catalog;
pub mod client;
pub mod config;
pub mod download;
mod error;
pub mod paths;
pub mod profiler;
pub mod progress;
pub mod retry;
pub mod server;

#[cfg(test)]
mod test_support;

pub use backend::{Backend, ContextSize, LocalBackend, ModelInfo};
pub use catalog::{CachedModel, ModelCatalog, ModelDescriptor};
pub use client::{CompletionParams, InferenceClient};
pub use config::Settings;
pub use download::{DownloadRequest, ResilientDownloader};
pub use error::LocalError;
pub use paths::DataLayout;
pub use profiler::{GpuKind, Recommendation, ResourceProfiler, SystemResources};
pub use retry::BackoffPolicy;
pub use server::{ServerConfig, ServerInfo, ServerSupervisor, SupervisorState, SupervisorStatus};

/// Default port for the local llama-server instance.
pub const DEFAULT_PORT: u16 = 8089;

/// Model used when none is configured.
pub const DEFAULT_MODEL_NAME: &str = "qwen2.5-1.5b";

/// Re-exported so callers can cancel long-running operations.
pub use tokio_util::sync::CancellationToken;
