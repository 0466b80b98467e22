use std::io;

use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align8, Deserialize, LEN_TYPE_SIZE, LenType, msg::HEADER_SIZE};

/// Largest frame accepted from a peer, a full partition of doubles fits well within it.
const MAX_FRAME_LEN: LenType = 1 << 36;

/// The receive buffer grows by at most this many bytes per read, so its size
/// tracks the bytes that actually arrived rather than the announced length.
const READ_CHUNK: usize = 1 << 20;

/// The receiving end of a worker channel.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    frames: u64,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx, frames: 0 }
    }

    /// The amount of frames received so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Waits for the next frame and decodes it in place.
    ///
    /// The body is read into `buf` in bounded chunks. Its elements are 8 bytes
    /// wide so that `f64` payloads can be viewed without copying. The returned
    /// `T` borrows from `buf`.
    ///
    /// # Errors
    /// * `UnexpectedEof` if the peer hangs up, even mid frame.
    /// * `InvalidData` if the announced length can't hold a frame header or
    ///   exceeds `MAX_FRAME_LEN`.
    pub async fn recv_frame<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align8,
    {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;
        let len = frame_len(LenType::from_be_bytes(len_buf))?;

        buf.clear();
        let mut filled = 0;

        while filled < len {
            let step = (len - filled).min(READ_CHUNK);
            buf.resize((filled + step).div_ceil(size_of::<B>()), B::zeroed());

            let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
            self.rx.read_exact(&mut bytes[filled..filled + step]).await?;
            filled += step;
        }

        self.frames += 1;
        trace!(len = len, frames = self.frames; "frame read");

        let bytes: &[u8] = bytemuck::cast_slice(buf.as_slice());
        T::deserialize(&bytes[..len])
    }
}

fn frame_len(announced: LenType) -> io::Result<usize> {
    if announced < HEADER_SIZE as LenType || announced > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {announced} bytes, expected between {HEADER_SIZE} and {MAX_FRAME_LEN}"),
        ));
    }

    usize::try_from(announced).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
