//! Operator interrupt
//!
//! The ctrl-c handler is installed before the debug session is opened, so an
//! interrupt during connect, RTT start or streaming all end the same way.
//! The first signal is latched; every clone sees it.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{oneshot, watch};
use tracing::{error, info};

use crate::error::{CaptureError, Result};

#[derive(Debug, Clone)]
pub struct Interrupt(watch::Receiver<bool>);

impl Interrupt {
    /// Listen for ctrl-c
    pub async fn ctrl_c() -> Self {
        Self::listen(tokio::signal::ctrl_c()).await
    }

    /// Latch `signal` on a background task. Returns once `signal` has been
    /// polled, which for ctrl-c is when the handler is registered.
    pub async fn listen<F>(signal: F) -> Self
    where
        F: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        let (fired_tx, fired_rx) = watch::channel(false);
        let (armed_tx, armed_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut signal = Box::pin(signal);
            let mut armed = Some(armed_tx);
            let outcome = std::future::poll_fn(|cx| {
                let poll = Pin::as_mut(&mut signal).poll(cx);
                if let Some(armed) = armed.take() {
                    let _ = armed.send(());
                }
                poll
            })
            .await;

            match outcome {
                Ok(()) => {
                    info!("Received ctrl-c");
                    let _ = fired_tx.send(true);
                }
                Err(e) => {
                    error!("Failed to listen for ctrl-c: {}", e);
                    // Keep the sender so waiters stay pending
                    std::future::pending::<()>().await;
                    drop(fired_tx);
                }
            }
        });

        let _ = armed_rx.await;
        Self(fired_rx)
    }

    pub fn is_fired(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once the signal has fired
    pub async fn wait(mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run a blocking `connect` on a worker, giving up as soon as `cancel`
/// resolves. An abandoned connection is dropped by the worker when it
/// finishes.
pub async fn connect_or_cancel<T, C, F>(connect: C, cancel: F) -> Result<T>
where
    T: Send + 'static,
    C: FnOnce() -> Result<T> + Send + 'static,
    F: Future<Output = ()>,
{
    let connecting = tokio::task::spawn_blocking(connect);
    tokio::select! {
        joined = connecting => joined
            .map_err(|e| CaptureError::InternalError(format!("connect task failed: {}", e)))?,
        _ = cancel => {
            info!("ctrl-c detected while connecting, exiting...");
            Err(CaptureError::Cancelled)
        }
    }
}
