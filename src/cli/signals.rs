//! Signal handling for in-flight container transitions

use crate::cancel::CancellationToken;

/// Cancel `token` on the first SIGINT/SIGTERM (Ctrl+C elsewhere)
pub async fn setup_signal_handlers(token: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                eprintln!("\nReceived SIGINT, cancelling...");
            }
            _ = sigterm.recv() => {
                eprintln!("\nReceived SIGTERM, cancelling...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        eprintln!("\nReceived Ctrl+C, cancelling...");
    }

    token.cancel();
    Ok(())
}
