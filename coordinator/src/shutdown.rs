use comms::task::{self, TaskRequest};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::link::WorkerLink;

/// Sends the poison pill to every worker and closes their channels.
///
/// Failures are logged and skipped, no worker is waited on.
///
/// # Returns
/// The amount of workers the sentinel was delivered to.
pub(crate) async fn broadcast<R, W>(links: &mut [WorkerLink<R, W>]) -> usize
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut delivered = 0;

    for link in links.iter_mut() {
        match task::send_request(&mut link.tx, &TaskRequest::Shutdown).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(worker = link.index; "failed to send shutdown: {e}"),
        }

        if let Err(e) = link.tx.shutdown().await {
            debug!(worker = link.index; "failed to close channel: {e}");
        }
    }

    info!("shutdown sent to {delivered} of {} worker(s)", links.len());
    delivered
}
