//! The `Backend` contract and the llama.cpp-backed implementation.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::ModelCatalog;
use crate::client::{CompletionParams, InferenceClient};
use crate::config::Settings;
use crate::error::LocalError;
use crate::profiler::FALLBACK_CONTEXT_SIZE;
use crate::server::{ServerConfig, ServerSupervisor};

/// What a text-generation backend offers to command execution.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the backend. Calling it again without a configuration change
    /// does nothing.
    async fn initialize(&mut self, cancel: &CancellationToken) -> Result<(), LocalError>;

    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, LocalError>;

    fn stream<'a>(
        &'a self,
        prompt: &'a str,
        params: &'a CompletionParams,
    ) -> BoxStream<'a, Result<String, LocalError>>;

    /// Switch models; takes effect on the next `initialize`.
    fn set_model(&mut self, name: &str);

    fn model_info(&self) -> ModelInfo;
}

/// Where the context size in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSize {
    Unset,
    /// Set by the caller; never replaced by tuning.
    Explicit(u32),
    /// Chosen from the model's native length and host memory.
    Derived(u32),
}

impl ContextSize {
    pub fn value(self) -> Option<u32> {
        match self {
            ContextSize::Unset => None,
            ContextSize::Explicit(n) | ContextSize::Derived(n) => Some(n),
        }
    }

    fn explicit(self) -> Option<u32> {
        match self {
            ContextSize::Explicit(n) => Some(n),
            _ => None,
        }
    }
}

/// Snapshot of the backend's model configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub path: Option<PathBuf>,
    pub context_size: ContextSize,
    pub native_context: Option<u32>,
    pub supports_tools: bool,
    pub server_url: Option<String>,
    pub initialized: bool,
}

#[derive(Debug)]
struct BackendState {
    model_name: String,
    model_path: Option<PathBuf>,
    context: ContextSize,
    client: Option<InferenceClient>,
    initialized: bool,
}

impl BackendState {
    fn invalidate(&mut self) {
        self.initialized = false;
        self.client = None;
    }
}

/// Backend that runs models locally through a supervised llama-server.
pub struct LocalBackend {
    settings: Settings,
    catalog: Arc<ModelCatalog>,
    supervisor: Arc<ServerSupervisor>,
    server_url: Option<String>,
    state: BackendState,
}

impl LocalBackend {
    /// Build a backend with its own catalog and supervisor.
    pub fn new(settings: Settings) -> Self {
        let layout = settings.layout();
        let catalog = ModelCatalog::new(layout.clone())
            .with_test_mode(settings.test_mode)
            .with_quiet(settings.quiet);
        let supervisor = ServerSupervisor::new(layout);
        Self::with_components(settings, Arc::new(catalog), Arc::new(supervisor))
    }

    /// Build a backend around shared components.
    pub fn with_components(
        settings: Settings,
        catalog: Arc<ModelCatalog>,
        supervisor: Arc<ServerSupervisor>,
    ) -> Self {
        let state = BackendState {
            model_name: settings.model.clone(),
            model_path: None,
            context: ContextSize::Unset,
            client: None,
            initialized: false,
        };
        Self {
            settings,
            catalog,
            supervisor,
            server_url: None,
            state,
        }
    }

    /// Talk to an existing server instead of launching one.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self.state.invalidate();
        self
    }

    pub fn supervisor(&self) -> &Arc<ServerSupervisor> {
        &self.supervisor
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn context_size(&self) -> ContextSize {
        self.state.context
    }

    /// Pin the context size; takes effect on the next `initialize`.
    pub fn set_context_size(&mut self, context_size: u32) {
        if self.state.context != ContextSize::Explicit(context_size) {
            self.state.context = ContextSize::Explicit(context_size);
            self.state.invalidate();
        }
    }

    /// Stop the supervised server, if this backend started one.
    pub async fn shutdown(&self) {
        self.supervisor.stop().await;
    }

    fn client(&self) -> Result<&InferenceClient, LocalError> {
        match &self.state.client {
            Some(client) if self.state.initialized => Ok(client),
            _ => Err(LocalError::NotInitialized),
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn initialize(&mut self, cancel: &CancellationToken) -> Result<(), LocalError> {
        if self.state.initialized {
            return Ok(());
        }

        let name = self.state.model_name.clone();
        let path = self.catalog.resolve(&name, cancel).await?;

        let context_limit = self
            .catalog
            .find(&name)
            .map(|d| d.native_context)
            .filter(|&n| n > 0)
            .unwrap_or(FALLBACK_CONTEXT_SIZE);
        let explicit = self.state.context.explicit();

        let (client, context_in_use) = if let Some(url) = &self.server_url {
            debug!(%url, "using external inference server");
            (
                InferenceClient::new(url.as_str()).with_cpu_only(self.settings.cpu_only),
                explicit.unwrap_or(context_limit),
            )
        } else if self.settings.no_autostart {
            debug!(port = self.settings.port, "autostart disabled");
            (
                InferenceClient::for_port(self.settings.port).with_cpu_only(self.settings.cpu_only),
                explicit.unwrap_or(context_limit),
            )
        } else {
            let mut config = ServerConfig::new(&path, self.settings.port)
                .with_context_limit(context_limit)
                .with_cpu_only(self.settings.cpu_only);
            if let Some(n) = explicit {
                config = config.with_context_size(n);
            }

            let server = self.supervisor.ensure(&config, cancel).await?;
            (
                InferenceClient::for_port(server.port).with_cpu_only(server.cpu_only),
                server.context_size.unwrap_or(context_limit),
            )
        };

        if explicit.is_none() {
            self.state.context = ContextSize::Derived(context_in_use);
        }
        info!(
            model = %name,
            context = ?self.state.context,
            url = client.base_url(),
            "local backend ready"
        );

        self.state.model_path = Some(path);
        self.state.client = Some(client);
        self.state.initialized = true;
        Ok(())
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, LocalError> {
        self.client()?.complete(prompt, params).await
    }

    fn stream<'a>(
        &'a self,
        prompt: &'a str,
        params: &'a CompletionParams,
    ) -> BoxStream<'a, Result<String, LocalError>> {
        match self.client() {
            Ok(client) => client.stream(prompt, params),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    fn set_model(&mut self, name: &str) {
        if self.state.model_name == name {
            return;
        }
        self.state.model_name = name.to_string();
        self.state.model_path = None;
        if let ContextSize::Derived(_) = self.state.context {
            self.state.context = ContextSize::Unset;
        }
        self.state.invalidate();
    }

    fn model_info(&self) -> ModelInfo {
        let descriptor = self.catalog.find(&self.state.model_name);
        ModelInfo {
            name: self.state.model_name.clone(),
            path: self.state.model_path.clone(),
            context_size: self.state.context,
            native_context: descriptor.map(|d| d.native_context),
            supports_tools: descriptor.map(|d| d.supports_tools).unwrap_or(false),
            server_url: self
                .state
                .client
                .as_ref()
                .map(|c| c.base_url().to_string()),
            initialized: self.state.initialized,
        }
    }
}
