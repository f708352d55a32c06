//! llama-server control commands.

use scmd_local::server::{read_pid_file, stop_by_pid_file};
use scmd_local::{Backend, CancellationToken, InferenceClient, LocalBackend, Settings};
use std::time::Duration;

use super::diagnostic;
use crate::ServerCommand;

const STOP_GRACE: Duration = Duration::from_secs(5);

pub(crate) async fn run(
    command: ServerCommand,
    settings: &mut Settings,
    cancel: &CancellationToken,
) -> miette::Result<()> {
    match command {
        ServerCommand::Start {
            model,
            context_size,
            cpu_only,
        } => {
            if let Some(model) = model {
                settings.model = model;
            }
            settings.cpu_only |= cpu_only;
            start(settings, context_size, cancel).await
        }
        ServerCommand::Stop => stop(settings).await,
        ServerCommand::Status => status(settings).await,
    }
}

/// Launch the server and leave it running after the CLI exits.
async fn start(
    settings: &Settings,
    context_size: Option<u32>,
    cancel: &CancellationToken,
) -> miette::Result<()> {
    let mut backend = LocalBackend::new(settings.clone());
    if let Some(n) = context_size {
        backend.set_context_size(n);
    }

    backend.initialize(cancel).await.map_err(diagnostic)?;

    match backend.supervisor().detach().await {
        Some(info) if info.adopted => {
            println!("llama-server already running at {}", info.base_url());
        }
        Some(info) => {
            println!("llama-server started at {}", info.base_url());
            if let Some(pid) = info.pid {
                println!("  PID:     {}", pid);
            }
            if let Some(ctx) = info.context_size {
                println!("  Context: {}", ctx);
            }
            println!("  Model:   {}", info.model_path.display());
            println!("  Log:     {}", settings.layout().server_log().display());
        }
        None => println!("llama-server not started (autostart disabled)"),
    }
    Ok(())
}

async fn stop(settings: &Settings) -> miette::Result<()> {
    let stopped = stop_by_pid_file(&settings.layout(), STOP_GRACE)
        .await
        .map_err(diagnostic)?;
    if stopped {
        println!("llama-server stopped");
    } else {
        println!("llama-server is not running");
    }
    Ok(())
}

async fn status(settings: &Settings) -> miette::Result<()> {
    let layout = settings.layout();
    let client = InferenceClient::for_port(settings.port);

    match client.check_health().await {
        Ok(()) => println!("llama-server: running at {}", client.base_url()),
        Err(_) => println!("llama-server: not running"),
    }
    match read_pid_file(&layout) {
        Some(pid) => println!("PID:          {}", pid),
        None => println!("PID:          none (not started by scmd)"),
    }
    println!("Log:          {}", layout.server_log().display());
    Ok(())
}
