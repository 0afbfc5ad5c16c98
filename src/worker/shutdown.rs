//! Cooperative shutdown — a settable, observable flag.
//!
//! The worker loop checks the flag only at iteration boundaries; an executing
//! job is never interrupted. How the request arrives (signal, another task)
//! is decoupled from the flag itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared shutdown flag. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent and safe to call from any task or thread.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Install a background task that trips `shutdown` on SIGTERM or SIGINT
/// (ctrl-c on non-unix platforms).
pub fn install_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, will exit after the current job");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, will exit after the current job");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received ctrl-c, will exit after the current job");
            }
        }

        shutdown.request();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        assert!(!Shutdown::new().is_requested());
    }

    #[test]
    fn request_is_idempotent_and_shared_across_clones() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        shutdown.request();
        shutdown.request();
        assert!(shutdown.is_requested());
        assert!(clone.is_requested());
    }

    #[test]
    fn concurrent_requests_are_safe() {
        let shutdown = Shutdown::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shutdown = shutdown.clone();
                std::thread::spawn(move || shutdown.request())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(shutdown.is_requested());
    }
}
