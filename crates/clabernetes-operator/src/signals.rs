//! Root cancellation token bound to process termination signals

use tokio_util::sync::CancellationToken;

use crate::logging::Logger;

/// Create the base token, cancelled on SIGTERM or SIGINT
///
/// Must be called from within a tokio runtime.
pub fn signal_handled_token(logger: Logger) -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        logger.critical(format!("received {signal}, cancelling base context"));
        cancel.cancel();
    });

    token
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed installing SIGTERM handler, only handling SIGINT");
            wait_for_ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    wait_for_ctrl_c().await;
    "ctrl-c"
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed installing SIGINT handler");
        std::future::pending::<()>().await;
    }
}
