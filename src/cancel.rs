//! Cooperative cancellation for retrieval requests.
//!
//! A [`CancelHandle`] cancels one request. The async side awaits a
//! [`CancelSignal`]; blocking store scans poll an [`Interrupt`], which also
//! carries the channel deadline, and stop with an error at the next check.

use crate::error::{RagError, Result};
use std::time::Instant;
use tokio::sync::watch;

/// Cancels an in-flight request
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the engine; cloned freely
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle cancels; never resolves if the handle is dropped
    /// without cancelling
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Stop condition polled by blocking work: a cancel signal, a deadline, or both
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    signal: Option<CancelSignal>,
    deadline: Option<Instant>,
}

impl Interrupt {
    pub fn new(signal: Option<CancelSignal>, deadline: Option<Instant>) -> Self {
        Self { signal, deadline }
    }

    /// Never fires
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.check().is_err()
    }

    /// `Err(Cancelled)` once the signal fired, `Err(DeadlineExceeded)` once the
    /// deadline passed
    pub fn check(&self) -> Result<()> {
        if self.signal.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(RagError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RagError::DeadlineExceeded);
        }
        Ok(())
    }
}
