//! Error types for local backend operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while acquiring models, supervising the server,
/// or running completions.
#[derive(Debug, Error)]
pub enum LocalError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not enough free space for the download and its temp file.
    #[error(
        "insufficient disk space in {}: need {} MiB, only {} MiB available",
        .path.display(),
        mib(.required),
        mib(.available)
    )]
    InsufficientDiskSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Connection or body read failed mid-transfer.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Download server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Completed file does not have the expected size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Checksum verification failed.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Every download attempt failed.
    #[error("download failed after {attempts} attempt(s): {source}")]
    DownloadFailed {
        attempts: u32,
        #[source]
        source: Box<LocalError>,
    },

    /// Neither a catalog entry nor an existing file.
    #[error("unknown model '{0}'. Run `scmd model list` to see available models")]
    UnknownModel(String),

    /// Model is known but not present in the local cache.
    #[error("model '{0}' is not downloaded. Download it with: scmd model pull {0}")]
    ModelNotCached(String),

    /// llama-server binary not found.
    #[error("llama-server binary not found (searched {} location(s))", .searched.len())]
    ServerBinaryNotFound { searched: Vec<PathBuf> },

    /// Server failed to start.
    #[error("failed to start server: {0}")]
    ServerStartFailed(String),

    /// Server never answered health checks.
    #[error("timeout after {0:?} waiting for server to become ready")]
    ServerStartTimeout(Duration),

    /// Server is not running or not reachable.
    #[error("server not running at {0}")]
    ServerNotRunning(String),

    /// Server answered 200 but produced no text.
    #[error("inference server returned an empty response")]
    EmptyResponse,

    /// Server reported an error inside the response body.
    #[error("inference error: {0}")]
    InferenceApi(String),

    /// Completion endpoint returned a non-success status.
    #[error("inference server returned HTTP {status}: {body}")]
    InferenceHttp { status: u16, body: String },

    /// Completion attempted before `initialize`.
    #[error("backend not initialized")]
    NotInitialized,

    /// Error annotated with the stage it happened in.
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<LocalError>,
    },
}

fn mib(bytes: &u64) -> u64 {
    *bytes / (1024 * 1024)
}

fn is_storage_full(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::StorageFull || is_enospc(e)
}

#[cfg(unix)]
fn is_enospc(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENOSPC)
}

#[cfg(not(unix))]
fn is_enospc(_e: &std::io::Error) -> bool {
    false
}

impl LocalError {
    /// Wrap this error with the stage it occurred in.
    pub fn context(self, stage: &'static str) -> Self {
        LocalError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping stage and retry wrappers.
    pub fn root(&self) -> &LocalError {
        match self {
            LocalError::Stage { source, .. } | LocalError::DownloadFailed { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Cancellation, integrity, and disk-space failures are final; transport
    /// and status failures are not.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            LocalError::Cancelled
            | LocalError::InsufficientDiskSpace { .. }
            | LocalError::SizeMismatch { .. }
            | LocalError::ChecksumMismatch { .. } => false,
            LocalError::Io(e) => !is_storage_full(e),
            LocalError::Transfer(_) | LocalError::HttpStatus { .. } => true,
            LocalError::Http(e) => !e.is_builder(),
            _ => false,
        }
    }

    /// Size or checksum verification failure.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self.root(),
            LocalError::SizeMismatch { .. } | LocalError::ChecksumMismatch { .. }
        )
    }

    /// The disk filled up, either at preflight or mid-write.
    pub fn is_disk_space(&self) -> bool {
        match self.root() {
            LocalError::InsufficientDiskSpace { .. } => true,
            LocalError::Io(e) => is_storage_full(e),
            _ => false,
        }
    }

    /// Ordered steps the user can take to recover, if any.
    pub fn remediation(&self) -> Vec<String> {
        match self.root() {
            LocalError::Io(e) if is_storage_full(e) => vec![
                "Free up space on the volume holding the data directory".to_string(),
                "Delete unused models with: scmd model rm <name>".to_string(),
                "Choose a smaller model or quantization variant".to_string(),
                "Point SCMD_DATA_DIR at a volume with more space".to_string(),
            ],
            LocalError::InsufficientDiskSpace { path, .. } => vec![
                format!("Free up space on the volume holding {}", path.display()),
                "Delete unused models with: scmd model rm <name>".to_string(),
                "Choose a smaller model or quantization variant".to_string(),
                "Point SCMD_DATA_DIR at a volume with more space".to_string(),
            ],
            LocalError::SizeMismatch { .. } | LocalError::ChecksumMismatch { .. } => vec![
                "The download was corrupted in transit and has been removed".to_string(),
                "Run the command again to download a fresh copy".to_string(),
            ],
            LocalError::ServerBinaryNotFound { searched } => {
                let mut steps = vec![
                    "Install llama.cpp (e.g. `brew install llama.cpp`) so llama-server is on PATH"
                        .to_string(),
                ];
                if let Some(first) = searched.first() {
                    steps.push(format!("Or place the llama-server binary at {}", first.display()));
                }
                steps
            }
            LocalError::ServerStartTimeout(_) | LocalError::ServerStartFailed(_) => vec![
                "Check the server log under <data dir>/logs/llama-server.log".to_string(),
                "Try CPU-only mode with SCMD_CPU_ONLY=1".to_string(),
                "Retry the command; large models can take a while to load".to_string(),
            ],
            LocalError::ModelNotCached(name) => {
                vec![format!("Download the model with: scmd model pull {}", name)]
            }
            _ => Vec::new(),
        }
    }
}
