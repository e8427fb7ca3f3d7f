//! Best-effort cancellation of in-flight generation calls.

use crate::error::{Result, StoryboardError};
use std::future::Future;
use tokio::sync::watch;

/// Trigger side. Dropping it without calling [`CancelHandle::cancel`] never cancels.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observer side, cheap to clone into every task of a batch.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle is gone.
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

    /// Runs `fut` unless cancellation wins first, in which case `fut` is dropped.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(StoryboardError::Cancelled);
        }
        let mut signal = self.clone();
        tokio::select! {
            result = fut => result,
            _ = signal.cancelled() => Err(StoryboardError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_lets_work_finish() {
        let signal = CancelSignal::never();
        let out = signal.guard(async { Ok::<_, StoryboardError>(7) }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let (handle, signal) = cancel_pair();
        let task = tokio::spawn(async move {
            signal
                .guard(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, StoryboardError>(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        let out = task.await.unwrap();
        assert_eq!(out, Err(StoryboardError::Cancelled));
    }
}
