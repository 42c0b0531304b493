use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel a bulk run on SIGTERM or SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. The fan-out checks it between items, so the item in flight
/// still completes and is reported.
pub fn install_cancel_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Could not install signal handlers, bulk runs cannot be interrupted");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping after the current item");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping after the current item");
            }
        }

        token_clone.cancel();
    });

    token
}
