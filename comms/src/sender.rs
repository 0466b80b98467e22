use std::io;

use log::trace;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// The sending end of a worker channel.
///
/// Every frame is written as a big endian length prefix followed by the
/// serialized message, payloads that can be sent as is skip the staging buffer.
pub struct OnoSender<W: AsyncWrite + Unpin> {
    tx: W,
    staging: Vec<u8>,
    frames: u64,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            staging: Vec::with_capacity(64),
            frames: 0,
        }
    }

    /// The amount of frames sent so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Writes `msg` as a single frame and flushes it.
    ///
    /// # Errors
    /// Returns `io::Error` if the peer's end is gone.
    pub async fn send_frame<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { tx, staging, .. } = self;

        staging.clear();
        staging.extend_from_slice(&[0; LEN_TYPE_SIZE]);

        let body = msg.serialize(staging);
        let body_len = body.map_or(0, <[u8]>::len);
        let len = (staging.len() - LEN_TYPE_SIZE + body_len) as LenType;
        staging[..LEN_TYPE_SIZE].copy_from_slice(&len.to_be_bytes());

        tx.write_all(staging).await?;
        if let Some(body) = body {
            tx.write_all(body).await?;
        }
        tx.flush().await?;

        self.frames += 1;
        trace!(len = len, frames = self.frames; "frame written");
        Ok(())
    }

    /// Closes the writing half, the peer observes end of stream once it drains the channel.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
