//! FIFO serialized execution queue
//!
//! One worker task drains submitted operations strictly one at a time in
//! submission order. A failing operation only fails its own completion.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handle to a serialized execution channel
#[derive(Clone)]
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    /// Spawn the worker on the current tokio runtime
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });

        Self { tx }
    }

    /// Enqueue an operation.
    ///
    /// The operation is queued immediately; the returned future only waits for
    /// its result, so submission order is call order even if the futures are
    /// awaited in a different order.
    pub fn submit<F, T>(&self, op: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // Receiver may have been dropped; the op still ran
            let _ = done_tx.send(op.await);
        });
        let queued = self.tx.send(job).map_err(|_| Error::QueueClosed);

        async move {
            queued?;
            done_rx.await.map_err(|_| Error::QueueClosed)?
        }
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}
