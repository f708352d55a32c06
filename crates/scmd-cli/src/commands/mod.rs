//! CLI commands.

pub mod complete;
pub mod model;
pub mod server;

use scmd_local::{CancellationToken, LocalError};

/// Convert a backend error into a diagnostic, with remediation steps as help.
pub(crate) fn diagnostic(err: LocalError) -> miette::Report {
    let steps = err.remediation();
    if steps.is_empty() {
        miette::miette!("{}", err)
    } else {
        let help = steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step))
            .collect::<Vec<_>>()
            .join("\n");
        miette::miette!(help = help, "{}", err)
    }
}

/// Token that fires on the first Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}
