//! scmd CLI - local model management and completions.

use clap::{Parser, Subcommand};
use scmd_local::Settings;
use std::path::PathBuf;

mod commands;

/// scmd - slash commands backed by a local language model
#[derive(Parser)]
#[command(name = "scmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage downloaded models
    Model {
        #[command(subcommand)]
        command: ModelCommand,
    },

    /// Control the llama-server process
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },

    /// Run a prompt through the local model
    Complete {
        /// Prompt text
        prompt: String,
        /// Model name or path to a .gguf file
        #[arg(short, long)]
        model: Option<String>,
        /// System prompt
        #[arg(long)]
        system: Option<String>,
        /// Context window size (default: tuned to the model and host)
        #[arg(long)]
        context_size: Option<u32>,
        /// Maximum tokens to generate
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
        /// Use an existing server instead of launching one
        #[arg(long)]
        server_url: Option<String>,
        /// Leave the launched server running afterwards
        #[arg(long)]
        keep_server: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum ModelCommand {
    /// List known and downloaded models
    List,
    /// Download a model (default: the configured model)
    Pull {
        /// Model name
        name: Option<String>,
    },
    /// Delete a downloaded model
    Rm {
        /// Model name
        name: String,
    },
    /// Copy a local .gguf file into the model cache
    Import {
        /// Path to the .gguf file
        path: PathBuf,
    },
    /// Show paths, hardware, and configuration
    Info,
}

#[derive(Subcommand)]
pub(crate) enum ServerCommand {
    /// Start llama-server in the background
    Start {
        /// Model name or path to a .gguf file
        #[arg(short, long)]
        model: Option<String>,
        /// Context window size
        #[arg(long)]
        context_size: Option<u32>,
        /// Force CPU-only inference
        #[arg(long)]
        cpu_only: bool,
    },
    /// Stop a background llama-server
    Stop,
    /// Show whether llama-server is running
    Status,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::from_env();

    // Set up logging
    let filter = if cli.verbose || settings.debug {
        "debug"
    } else {
        "warn"
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let cancel = commands::cancel_on_ctrl_c();

    match cli.command {
        Commands::Model { command } => commands::model::run(command, &settings, &cancel).await,
        Commands::Server { command } => {
            commands::server::run(command, &mut settings, &cancel).await
        }
        Commands::Complete {
            prompt,
            model,
            system,
            context_size,
            max_tokens,
            temperature,
            server_url,
            keep_server,
        } => {
            let options = commands::complete::Options {
                model,
                system,
                context_size,
                max_tokens,
                temperature,
                server_url,
                keep_server,
            };
            commands::complete::run(&prompt, options, settings, &cancel).await
        }
    }
}
