//! Supervision of the llama-server subprocess.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::probe_health;
use crate::error::LocalError;
use crate::paths::{server_binary_name, DataLayout};
use crate::profiler::{ResourceProfiler, SystemResources};
use crate::retry::BackoffPolicy;

/// Logs larger than this are rotated before a new launch.
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle of the supervised subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Ready,
    Stopping,
}

/// Requested launch parameters. Unset fields are filled from the profiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub model_path: PathBuf,
    pub port: u16,
    /// Explicit context size; never replaced by a recommendation.
    pub context_size: Option<u32>,
    /// Upper bound for a recommended context (model-native length); 0 if unknown.
    pub context_limit: u32,
    pub gpu_layers: Option<u32>,
    pub cpu_only: bool,
}

impl ServerConfig {
    pub fn new(model_path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            model_path: model_path.into(),
            port,
            context_size: None,
            context_limit: 0,
            gpu_layers: None,
            cpu_only: false,
        }
    }

    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = Some(context_size);
        self
    }

    pub fn with_context_limit(mut self, limit: u32) -> Self {
        self.context_limit = limit;
        self
    }

    pub fn with_gpu_layers(mut self, layers: u32) -> Self {
        self.gpu_layers = Some(layers);
        self
    }

    pub fn with_cpu_only(mut self, cpu_only: bool) -> Self {
        self.cpu_only = cpu_only;
        self
    }

    /// Merge explicit settings with profiler recommendations.
    pub fn resolve(&self, resources: &SystemResources, model_size_bytes: u64) -> LaunchConfig {
        let rec = ResourceProfiler::recommend(resources, model_size_bytes, self.context_limit);

        let gpu_layers = if self.cpu_only {
            0
        } else {
            self.gpu_layers.unwrap_or(rec.gpu_layers)
        };
        let cpu_only = self.cpu_only || gpu_layers == 0;
        let threads = if cpu_only {
            (resources.cpu_count / 2).max(1)
        } else {
            resources.cpu_count.max(1)
        };

        LaunchConfig {
            model_path: self.model_path.clone(),
            port: self.port,
            context_size: self.context_size.unwrap_or(rec.context_size),
            gpu_layers,
            cpu_only,
            threads,
        }
    }
}

/// Fully resolved launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub model_path: PathBuf,
    pub port: u16,
    pub context_size: u32,
    pub gpu_layers: u32,
    pub cpu_only: bool,
    pub threads: usize,
}

impl LaunchConfig {
    /// Command-line arguments for llama-server.
    ///
    /// CPU-only mode passes `--device none` and leaves out flash attention,
    /// mlock, and no-mmap so the server never touches GPU initialization
    /// paths. On Metal hosts the device flag is the only switch that keeps
    /// the backend from loading.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            self.model_path.display().to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--ctx-size".to_string(),
            self.context_size.to_string(),
            "--n-gpu-layers".to_string(),
            self.gpu_layers.to_string(),
            "--threads".to_string(),
            self.threads.to_string(),
        ];

        if self.cpu_only {
            args.extend(
                [
                    "--device",
                    "none",
                    "--parallel",
                    "1",
                    "--batch-size",
                    "512",
                    "--ubatch-size",
                    "256",
                ]
                .map(String::from),
            );
        } else {
            args.extend(
                [
                    "--batch-size",
                    "2048",
                    "--ubatch-size",
                    "512",
                    "--flash-attn",
                    "--mlock",
                    "--no-mmap",
                ]
                .map(String::from),
            );
        }
        args
    }

    /// Extra environment for the subprocess. CPU-only hides every GPU.
    pub fn env(&self) -> Vec<(String, String)> {
        if self.cpu_only {
            vec![
                ("CUDA_VISIBLE_DEVICES".to_string(), String::new()),
                ("HIP_VISIBLE_DEVICES".to_string(), String::new()),
                ("GGML_VK_VISIBLE_DEVICES".to_string(), String::new()),
            ]
        } else {
            Vec::new()
        }
    }
}

/// Everything needed to spawn the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub config: LaunchConfig,
}

/// A running subprocess.
pub trait ManagedProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit. Returns `false` when the platform has no
    /// interrupt signal.
    fn interrupt(&mut self) -> std::io::Result<bool>;

    fn has_exited(&mut self) -> std::io::Result<bool>;

    /// Kill and reap.
    fn kill(&mut self) -> std::io::Result<()>;

    /// Let the process outlive this handle.
    fn detach(self: Box<Self>);
}

/// Spawns the server subprocess.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec, log: File) -> std::io::Result<Box<dyn ManagedProcess>>;
}

/// Answers whether something healthy is listening on a port.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self, port: u16) -> bool;
}

/// Launches real processes with stdout/stderr going to the log file.
pub struct CommandLauncher;

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, spec: &LaunchSpec, log: File) -> std::io::Result<Box<dyn ManagedProcess>> {
        let stderr = log.try_clone()?;
        let child = Command::new(&spec.binary)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .spawn()?;
        debug!("llama-server process started with PID: {}", child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl ManagedProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    #[cfg(unix)]
    fn interrupt(&mut self) -> std::io::Result<bool> {
        send_signal(self.child.id(), libc::SIGINT)?;
        Ok(true)
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) -> std::io::Result<bool> {
        Ok(false)
    }

    fn has_exited(&mut self) -> std::io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.child.wait()?;
        Ok(())
    }

    fn detach(self: Box<Self>) {}
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Probes `GET /health` on localhost.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(2),
        }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self, port: u16) -> bool {
        let base_url = format!("http://127.0.0.1:{}", port);
        probe_health(&self.client, &base_url, self.timeout)
            .await
            .is_ok()
    }
}

/// Ordered list of places the server binary may live.
#[derive(Debug, Clone)]
pub struct BinaryLocator {
    candidates: Vec<PathBuf>,
    search_path: bool,
}

impl BinaryLocator {
    /// Next to the scmd binary, the data dir's `bin/`, common install
    /// prefixes, then `PATH`.
    pub fn for_layout(layout: &DataLayout) -> Self {
        let name = server_binary_name();
        let mut candidates = Vec::new();

        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(dir.join(name));
        }
        candidates.push(layout.bin_dir().join(name));
        if cfg!(unix) {
            for prefix in ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"] {
                candidates.push(Path::new(prefix).join(name));
            }
        }

        Self {
            candidates,
            search_path: true,
        }
    }

    /// Only the given paths, no `PATH` lookup.
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            search_path: false,
        }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    pub fn locate(&self) -> Result<PathBuf, LocalError> {
        if let Some(found) = self.candidates.iter().find(|p| p.is_file()) {
            return Ok(found.clone());
        }
        if self.search_path {
            if let Ok(found) = which::which(server_binary_name()) {
                return Ok(found);
            }
        }
        Err(LocalError::ServerBinaryNotFound {
            searched: self.candidates.clone(),
        })
    }
}

/// Supervisor timing knobs.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Overall bound on health polling after spawn.
    pub health_timeout: Duration,
    /// Time between interrupt and kill.
    pub grace_period: Duration,
    /// Delay schedule between health polls.
    pub poll: BackoffPolicy,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(120),
            grace_period: Duration::from_secs(5),
            poll: BackoffPolicy::new(Duration::from_millis(50), u32::MAX)
                .with_max_delay(Duration::from_millis(500)),
        }
    }
}

/// Public view of the live server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub port: u16,
    pub model_path: PathBuf,
    pub pid: Option<u32>,
    pub context_size: Option<u32>,
    pub cpu_only: bool,
    /// Found already listening rather than spawned by us.
    pub adopted: bool,
}

impl ServerInfo {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// The supervised subprocess plus its log file and PID file.
///
/// Dropping a handle kills the process, closes the log, and removes the PID
/// file; `shutdown` does the same gracefully.
pub struct ServerHandle {
    process: Option<Box<dyn ManagedProcess>>,
    info: ServerInfo,
    log: Option<File>,
    pid_file: Option<PathBuf>,
}

impl ServerHandle {
    fn spawned(process: Box<dyn ManagedProcess>, launch: &LaunchConfig, log: File) -> Self {
        let info = ServerInfo {
            port: launch.port,
            model_path: launch.model_path.clone(),
            pid: process.id(),
            context_size: Some(launch.context_size),
            cpu_only: launch.cpu_only,
            adopted: false,
        };
        Self {
            process: Some(process),
            info,
            log: Some(log),
            pid_file: None,
        }
    }

    fn adopted(config: &ServerConfig) -> Self {
        Self {
            process: None,
            info: ServerInfo {
                port: config.port,
                model_path: config.model_path.clone(),
                pid: None,
                context_size: config.context_size,
                cpu_only: config.cpu_only,
                adopted: true,
            },
            log: None,
            pid_file: None,
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    fn serves(&self, config: &ServerConfig) -> bool {
        self.info.model_path == config.model_path
            && self.info.port == config.port
            && (self.info.adopted
                || config.context_size.is_none()
                || config.context_size == self.info.context_size)
    }

    fn is_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => matches!(process.has_exited(), Ok(false)),
            None => self.info.adopted,
        }
    }

    fn write_pid_file(&mut self, path: PathBuf) {
        let Some(pid) = self.info.pid else {
            return;
        };
        match fs::write(&path, format!("{}\n", pid)) {
            Ok(()) => self.pid_file = Some(path),
            Err(e) => warn!("could not write PID file {}: {}", path.display(), e),
        }
    }

    /// Interrupt, wait up to `grace`, then kill.
    async fn shutdown(mut self, grace: Duration) {
        if let Some(mut process) = self.process.take() {
            info!("Stopping llama-server (PID: {:?})", process.id());

            let interrupted = process.interrupt().unwrap_or_else(|e| {
                warn!("failed to interrupt llama-server: {}", e);
                false
            });

            let mut exited = false;
            if interrupted {
                let deadline = Instant::now() + grace;
                loop {
                    match process.has_exited() {
                        Ok(true) => {
                            exited = true;
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!("Error checking server status: {}", e);
                            break;
                        }
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
                }
            }

            if exited {
                debug!("llama-server exited after interrupt");
            } else {
                warn!("Server didn't exit gracefully, killing...");
                if let Err(e) = process.kill() {
                    warn!("failed to kill llama-server: {}", e);
                }
            }
        }
        self.release();
    }

    /// Kill without a grace period.
    fn kill_now(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill() {
                warn!("failed to kill llama-server: {}", e);
            }
        }
        self.release();
    }

    /// Leave the process running and the PID file in place.
    fn detach(mut self) {
        if let Some(process) = self.process.take() {
            process.detach();
        }
        self.log.take();
        self.pid_file = None;
    }

    fn release(&mut self) {
        self.log.take();
        if let Some(path) = self.pid_file.take() {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not remove PID file {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.process.is_some() {
            self.kill_now();
        } else {
            self.release();
        }
    }
}

/// Snapshot returned by [`ServerSupervisor::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub server: Option<ServerInfo>,
}

/// Owns at most one llama-server subprocess.
///
/// `ensure` and `stop` are serialized, so concurrent callers never spawn two
/// servers on the same port.
pub struct ServerSupervisor {
    layout: DataLayout,
    launcher: Box<dyn ProcessLauncher>,
    probe: Box<dyn HealthProbe>,
    locator: BinaryLocator,
    resources: Option<SystemResources>,
    options: SupervisorOptions,
    slot: Mutex<Option<ServerHandle>>,
    state: std::sync::Mutex<SupervisorState>,
}

impl ServerSupervisor {
    pub fn new(layout: DataLayout) -> Self {
        let locator = BinaryLocator::for_layout(&layout);
        Self {
            layout,
            launcher: Box::new(CommandLauncher),
            probe: Box::new(HttpHealthProbe::new()),
            locator,
            resources: None,
            options: SupervisorOptions::default(),
            slot: Mutex::new(None),
            state: std::sync::Mutex::new(SupervisorState::Stopped),
        }
    }

    pub fn with_launcher(mut self, launcher: Box<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_locator(mut self, locator: BinaryLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Use fixed resources instead of detecting them.
    pub fn with_resources(mut self, resources: SystemResources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_options(mut self, options: SupervisorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn state(&self) -> SupervisorState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SupervisorState::Stopped)
    }

    fn set_state(&self, next: SupervisorState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "supervisor state");
            *state = next;
        }
    }

    /// Make sure a healthy server for `config` is running.
    ///
    /// Reuses a matching server, stops a mismatched one, adopts anything
    /// already healthy on the port, and otherwise spawns a new process.
    pub async fn ensure(
        &self,
        config: &ServerConfig,
        cancel: &CancellationToken,
    ) -> Result<ServerInfo, LocalError> {
        let mut slot = self.slot.lock().await;

        if let Some(mut current) = slot.take() {
            if current.serves(config) && current.is_alive() {
                debug!(port = config.port, "reusing running llama-server");
                let info = current.info().clone();
                *slot = Some(current);
                return Ok(info);
            }

            if current.serves(config) {
                warn!("llama-server exited unexpectedly, restarting");
                current.kill_now();
            } else {
                info!(
                    from = %current.info().model_path.display(),
                    to = %config.model_path.display(),
                    "switching llama-server model"
                );
                self.set_state(SupervisorState::Stopping);
                current.shutdown(self.options.grace_period).await;
            }
            self.set_state(SupervisorState::Stopped);
        }

        if self.probe.is_healthy(config.port).await {
            info!(port = config.port, "adopting server already listening on port");
            let handle = ServerHandle::adopted(config);
            let info = handle.info().clone();
            *slot = Some(handle);
            self.set_state(SupervisorState::Ready);
            return Ok(info);
        }

        self.set_state(SupervisorState::Starting);
        match self.launch(config, cancel).await {
            Ok(handle) => {
                let info = handle.info().clone();
                *slot = Some(handle);
                self.set_state(SupervisorState::Ready);
                Ok(info)
            }
            Err(e) => {
                self.set_state(SupervisorState::Stopped);
                Err(e.context("server launch"))
            }
        }
    }

    async fn launch(
        &self,
        config: &ServerConfig,
        cancel: &CancellationToken,
    ) -> Result<ServerHandle, LocalError> {
        let binary = self.locator.locate()?;

        let model_size = fs::metadata(&config.model_path)
            .map(|m| m.len())
            .map_err(|_| {
                LocalError::ServerStartFailed(format!(
                    "model file not found: {}",
                    config.model_path.display()
                ))
            })?;

        let resources = self
            .resources
            .clone()
            .unwrap_or_else(ResourceProfiler::detect_or_default);
        let launch = config.resolve(&resources, model_size);

        self.layout.ensure_dirs()?;
        let log = open_log(&self.layout.server_log())?;

        let spec = LaunchSpec {
            binary,
            args: launch.args(),
            env: launch.env(),
            config: launch.clone(),
        };
        info!(
            "Starting llama-server on port {} with model {} (ctx {}, gpu layers {}, cpu only {})",
            launch.port,
            launch.model_path.display(),
            launch.context_size,
            launch.gpu_layers,
            launch.cpu_only
        );

        let process = self
            .launcher
            .launch(&spec, log.try_clone()?)
            .map_err(|e| {
                LocalError::ServerStartFailed(format!("{}: {}", spec.binary.display(), e))
            })?;
        let mut handle = ServerHandle::spawned(process, &launch, log);

        if let Err(e) = self.wait_ready(&mut handle, cancel).await {
            handle.kill_now();
            return Err(e);
        }

        handle.write_pid_file(self.layout.pid_file());
        Ok(handle)
    }

    /// Poll health with backoff until ready, the process dies, the deadline
    /// passes, or the token fires.
    async fn wait_ready(
        &self,
        handle: &mut ServerHandle,
        cancel: &CancellationToken,
    ) -> Result<(), LocalError> {
        let timeout = self.options.health_timeout;
        let deadline = Instant::now() + timeout;
        let port = handle.info().port;
        let mut attempt = 1;

        info!("Waiting for llama-server to become ready...");
        loop {
            let healthy = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LocalError::Cancelled),
                healthy = self.probe.is_healthy(port) => healthy,
            };
            if healthy {
                info!(port, "llama-server is ready");
                return Ok(());
            }
            if !handle.is_alive() {
                return Err(LocalError::ServerStartFailed(format!(
                    "llama-server exited during startup, see {}",
                    self.layout.server_log().display()
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(?timeout, "llama-server did not become healthy");
                return Err(LocalError::ServerStartTimeout(timeout));
            }

            let delay = self.options.poll.delay_for(attempt).min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LocalError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Stop the server: interrupt, wait out the grace period, then kill.
    pub async fn stop(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.take() {
            self.set_state(SupervisorState::Stopping);
            handle.shutdown(self.options.grace_period).await;
        }
        self.set_state(SupervisorState::Stopped);
    }

    /// Forget the server without stopping it; the PID file stays behind so
    /// later invocations can find it.
    pub async fn detach(&self) -> Option<ServerInfo> {
        let mut slot = self.slot.lock().await;
        let handle = slot.take()?;
        let info = handle.info().clone();
        handle.detach();
        self.set_state(SupervisorState::Stopped);
        Some(info)
    }

    pub async fn status(&self) -> SupervisorStatus {
        let slot = self.slot.lock().await;
        SupervisorStatus {
            state: self.state(),
            server: slot.as_ref().map(|h| h.info().clone()),
        }
    }
}

/// Open the server log for appending, rotating it first if it grew too large.
fn open_log(path: &Path) -> Result<File, LocalError> {
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() > MAX_LOG_BYTES {
            let mut rotated = path.as_os_str().to_owned();
            rotated.push(".1");
            fs::rename(path, PathBuf::from(rotated))?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Read the PID recorded by a previous invocation.
pub fn read_pid_file(layout: &DataLayout) -> Option<u32> {
    fs::read_to_string(layout.pid_file())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Stop a server started by another invocation, using its PID file.
///
/// Returns `false` when there was nothing running.
#[cfg(unix)]
pub async fn stop_by_pid_file(layout: &DataLayout, grace: Duration) -> Result<bool, LocalError> {
    let pid_file = layout.pid_file();
    let Some(pid) = read_pid_file(layout) else {
        return Ok(false);
    };

    if send_signal(pid, 0).is_err() {
        debug!(pid, "stale PID file");
        let _ = fs::remove_file(&pid_file);
        return Ok(false);
    }

    info!("Stopping llama-server (PID: {})", pid);
    send_signal(pid, libc::SIGINT)?;

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if send_signal(pid, 0).is_err() {
            break;
        }
        sleep(STOP_POLL_INTERVAL).await;
    }
    if send_signal(pid, 0).is_ok() {
        warn!("Server didn't exit gracefully, killing...");
        send_signal(pid, libc::SIGKILL)?;
    }

    let _ = fs::remove_file(&pid_file);
    Ok(true)
}

#[cfg(not(unix))]
pub async fn stop_by_pid_file(_layout: &DataLayout, _grace: Duration) -> Result<bool, LocalError> {
    Err(LocalError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "stopping a detached server is only supported on Unix",
    )))
}
