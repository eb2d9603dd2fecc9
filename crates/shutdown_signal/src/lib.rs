use std::future::Future;
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use tokio::select;
use tracing::{error, info};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            match (ctrl_c(), ctrl_close(), ctrl_shutdown()) {
                (Ok(mut ctrl_c), Ok(mut ctrl_close), Ok(mut ctrl_shutdown)) => {
                    select! {
                        _ = ctrl_c.recv() => (),
                        _ = ctrl_close.recv() => (),
                        _ = ctrl_shutdown.recv() => (),
                    }
                }
                _ => {
                    error!("Failed to attach console shutdown handlers, only Ctrl-C will stop the worker");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            match signal(signal_kind) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(signal = ?signal_kind, error = %e, "Failed to listen to unix signal");
                    futures::future::pending::<()>().await;
                }
            }
        }

        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// Future resolving once the process is asked to stop. Cloning is cheap and
/// every clone resolves at the same time.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Resolves on SIGINT, SIGTERM or SIGHUP (console close events on windows).
pub fn shutdown_signal() -> ShutdownSignal {
    from_future(async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected. Attempting graceful shutdown...");
    })
}

/// Wraps any future as a [`ShutdownSignal`], e.g. a channel closed by a test
/// harness or an embedding application.
pub fn from_future<F>(fut: F) -> ShutdownSignal
where
    F: Future<Output = ()> + Send + 'static,
{
    fut.boxed().shared()
}
