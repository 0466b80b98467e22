//! Framing and typed messages spoken between the coordinator and its workers.

mod align;
mod deserialize;
pub mod error;
pub mod msg;
mod receiver;
pub mod schema;
mod sender;
mod serialize;
pub mod task;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::Align8;
pub use deserialize::Deserialize;
pub use error::{ProtocolErr, Result};
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialize::Serialize;

/// Length prefix of every frame, big endian.
type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Wraps the two halves of an ordered byte stream into a protocol channel.
///
/// The coordinator passes a worker process's stdout and stdin, tests pass the
/// halves of an in memory duplex.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
