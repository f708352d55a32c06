//! One-shot completion.

use futures_util::StreamExt;
use scmd_local::{
    Backend, CancellationToken, CompletionParams, LocalBackend, LocalError, Settings,
};
use std::io::Write;

use super::diagnostic;

pub(crate) struct Options {
    pub model: Option<String>,
    pub system: Option<String>,
    pub context_size: Option<u32>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub server_url: Option<String>,
    pub keep_server: bool,
}

pub(crate) async fn run(
    prompt: &str,
    options: Options,
    settings: Settings,
    cancel: &CancellationToken,
) -> miette::Result<()> {
    let mut backend = LocalBackend::new(settings);
    if let Some(url) = options.server_url {
        backend = backend.with_server_url(url);
    }
    if let Some(model) = &options.model {
        backend.set_model(model);
    }
    if let Some(n) = options.context_size {
        backend.set_context_size(n);
    }

    let params = CompletionParams {
        max_tokens: options.max_tokens,
        temperature: options.temperature,
        system: options.system,
    };

    let result = generate(&mut backend, prompt, &params, cancel).await;

    if options.keep_server {
        backend.supervisor().detach().await;
    } else {
        backend.shutdown().await;
    }

    result.map_err(diagnostic)
}

async fn generate(
    backend: &mut LocalBackend,
    prompt: &str,
    params: &CompletionParams,
    cancel: &CancellationToken,
) -> Result<(), LocalError> {
    backend.initialize(cancel).await?;

    let mut chunks = backend.stream(prompt, params);
    let mut stdout = std::io::stdout();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Err(LocalError::Cancelled),
            chunk = chunks.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        write!(stdout, "{}", chunk?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
