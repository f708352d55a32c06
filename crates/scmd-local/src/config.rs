//! Backend configuration.

use std::path::PathBuf;

use crate::paths::{default_data_dir, DataLayout};
use crate::{DEFAULT_MODEL_NAME, DEFAULT_PORT};

/// Settings for the local backend, usually read from `SCMD_*` variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of models, logs, and the PID file
    pub data_dir: PathBuf,
    /// Model to load when none is requested
    pub model: String,
    /// Port the inference server listens on
    pub port: u16,
    /// Verbose tracing
    pub debug: bool,
    /// Force CPU-only launch arguments
    pub cpu_only: bool,
    /// Never launch the server; talk to whatever is on `port`
    pub no_autostart: bool,
    /// Suppress progress bars and human-facing messages
    pub quiet: bool,
    /// Never download; fail fast when a model is missing
    pub test_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model: DEFAULT_MODEL_NAME.to_string(),
            port: DEFAULT_PORT,
            debug: false,
            cpu_only: false,
            no_autostart: false,
            quiet: false,
            test_mode: false,
        }
    }
}

impl Settings {
    /// Create settings from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).map(|v| parse_flag(&v)).unwrap_or(false);

        let data_dir = lookup("SCMD_DATA_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let model = lookup("SCMD_MODEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());

        let port = lookup("SCMD_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            data_dir,
            model,
            port,
            debug: flag("SCMD_DEBUG"),
            cpu_only: flag("SCMD_CPU_ONLY"),
            no_autostart: flag("SCMD_NO_AUTOSTART"),
            quiet: flag("SCMD_QUIET"),
            test_mode: flag("SCMD_TEST_MODE"),
        }
    }

    /// Filesystem layout under `data_dir`.
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    /// Create a builder for settings.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Builder for backend settings.
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.data_dir = dir.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = model.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.settings.port = port;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.settings.debug = debug;
        self
    }

    pub fn cpu_only(mut self, cpu_only: bool) -> Self {
        self.settings.cpu_only = cpu_only;
        self
    }

    pub fn no_autostart(mut self, no_autostart: bool) -> Self {
        self.settings.no_autostart = no_autostart;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.settings.quiet = quiet;
        self
    }

    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.settings.test_mode = test_mode;
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}
