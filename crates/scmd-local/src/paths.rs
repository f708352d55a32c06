//! Path utilities for the scmd data directory.

use std::path::{Path, PathBuf};

/// Name of the data directory under the user's home.
const DATA_DIR_NAME: &str = ".scmd";

/// Server log file name.
pub const SERVER_LOG_NAME: &str = "llama-server.log";

/// PID file name.
pub const PID_FILE_NAME: &str = "llama-server.pid";

/// Get the default data directory (~/.scmd/).
///
/// Falls back to a relative `.scmd` when the home directory is unknown.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME))
}

/// Platform-specific name of the llama-server executable.
pub fn server_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "llama-server.exe"
    } else {
        "llama-server"
    }
}

/// Filesystem layout rooted at a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cached model artifacts (`<root>/models/`).
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Server logs (`<root>/logs/`).
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Private binary install location (`<root>/bin/`).
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn server_log(&self) -> PathBuf {
        self.logs_dir().join(SERVER_LOG_NAME)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE_NAME)
    }

    /// Get the path to a cached model file.
    pub fn model_path(&self, filename: &str) -> PathBuf {
        self.models_dir().join(filename)
    }

    /// Ensure the data directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.models_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let layout = DataLayout::new("/data/scmd");
        assert_eq!(layout.models_dir(), PathBuf::from("/data/scmd/models"));
        assert_eq!(
            layout.server_log(),
            PathBuf::from("/data/scmd/logs/llama-server.log")
        );
        assert_eq!(layout.pid_file(), PathBuf::from("/data/scmd/llama-server.pid"));
        assert_eq!(
            layout.model_path("demo-1b-q4_k_m.gguf"),
            PathBuf::from("/data/scmd/models/demo-1b-q4_k_m.gguf")
        );
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("nested"));
        layout.ensure_dirs().unwrap();
        assert!(layout.models_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
    }
}
