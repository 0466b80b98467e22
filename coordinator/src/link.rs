use std::{future::Future, time::Duration};

use comms::{OnoReceiver, OnoSender};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{CoordinatorError, Result};

/// The coordinator's end of a single worker's channel.
pub(crate) struct WorkerLink<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub index: usize,
    pub device_id: i32,
    pub rx: OnoReceiver<R>,
    pub tx: OnoSender<W>,
    pub buf: Vec<u64>,
}

impl<R, W> WorkerLink<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(index: usize, device_id: i32, rx: R, tx: W) -> Self {
        let (rx, tx) = comms::channel(rx, tx);

        Self {
            index,
            device_id,
            rx,
            tx,
            buf: Vec::new(),
        }
    }
}

/// Bounds every receive of a round by an optional timeout and cancellation token.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecvGuard {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RecvGuard {
    /// Awaits a receive from `worker`, attributing any failure to it.
    ///
    /// # Errors
    /// * `WorkerTimeout` if the timeout elapses first.
    /// * `Cancelled` if the token is cancelled first.
    /// * Whatever `fut` fails with, mapped by `CoordinatorError::from_protocol`.
    pub async fn watch<T, F>(&self, worker: usize, fut: F) -> Result<T>
    where
        F: Future<Output = comms::Result<T>>,
    {
        let bounded = async {
            let res = match self.timeout {
                Some(after) => tokio::time::timeout(after, fut)
                    .await
                    .map_err(|_| CoordinatorError::WorkerTimeout { worker, after })?,
                None => fut.await,
            };

            res.map_err(|e| CoordinatorError::from_protocol(worker, e))
        };

        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(CoordinatorError::Cancelled { worker }),
                res = bounded => res,
            },
            None => bounded.await,
        }
    }
}
