use {
    anyhow::{Context, Result},
    derive_more::Display,
    std::future::{Future, pending},
    tokio::signal::ctrl_c,
    tracing::{info, warn},
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    #[display("SIGINT")]
    Interrupt,
    #[display("SIGTERM")]
    Terminate,
}

/// Completes once the process receives SIGINT or SIGTERM.
///
/// If signal handlers can't be installed, the failure is logged and the future never
/// completes, so the server keeps running until it's killed.
pub async fn shutdown_requested() {
    match next_signal().await {
        Ok(signal) => info!(%signal, "shutdown requested"),
        Err(err) => {
            warn!(?err, "cannot listen for shutdown signals");
            pending::<()>().await;
        }
    }
}

async fn next_signal() -> Result<ShutdownSignal> {
    let terminate = terminate_signal().context("failed to install SIGTERM handler")?;
    tokio::select! {
        interrupted = ctrl_c() => {
            interrupted.context("failed to install SIGINT handler")?;
            Ok(ShutdownSignal::Interrupt)
        }
        () = terminate => Ok(ShutdownSignal::Terminate),
    }
}

#[cfg(target_family = "unix")]
fn terminate_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        terminate.recv().await;
    })
}

#[cfg(not(target_family = "unix"))]
fn terminate_signal() -> Result<impl Future<Output = ()>> {
    Ok(pending())
}
