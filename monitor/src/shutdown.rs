//! Cooperative shutdown shared by the ingest loop and the notifier loop.
//!
//! `Running -> Draining` when a termination signal arrives (or the feed ends), and
//! `Draining -> Stopped` once both loops have left their iteration. Nothing is interrupted
//! mid-iteration; loops check the phase at their boundaries.

use alloc::sync::Arc;
use std::io;

use tokio::{signal, sync::watch, task::JoinHandle};
use tracing::{Instrument as _, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Stopped,
}

/// Owner of the shutdown flag.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<Phase>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Running);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.tx.borrow()
    }

    /// Requests shutdown. Only the first call has an effect.
    pub fn trigger(&self) {
        let changed = self.tx.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::Draining;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Shutdown requested, draining");
        }
    }

    /// Marks both loops as exited.
    pub fn finish(&self) {
        self.tx.send_replace(Phase::Stopped);
        info!("Monitor stopped");
    }
}

/// Observer side of [`Shutdown`], polled by each loop.
#[derive(Debug, Clone)]
pub struct ShutdownRx {
    rx: watch::Receiver<Phase>,
}

impl ShutdownRx {
    /// `true` once shutdown has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        *self.rx.borrow() != Phase::Running
    }

    /// Resolves once shutdown has been requested or the controller is gone.
    pub async fn wait(&mut self) {
        drop(self.rx.wait_for(|phase| *phase != Phase::Running).await);
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn termination_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => res,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}

/// Background task: moves `shutdown` to draining when a termination signal arrives.
///
/// The task also ends on its own once shutdown has been requested by other means.
pub fn spawn_signal_listener(shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    let mut rx = shutdown.subscribe();
    tokio::spawn(
        async move {
            tokio::select! {
                res = termination_signal() => match res {
                    Ok(()) => {
                        info!("Received termination signal");
                        shutdown.trigger();
                    }
                    Err(e) => error!("Failed to listen for termination signals: {e}"),
                },
                () = rx.wait() => {}
            }
        }
        .in_current_span(),
    )
}
