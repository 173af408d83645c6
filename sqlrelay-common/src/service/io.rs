use bytes::Bytes;
use futures::io::Error;
use futures::SinkExt;
use tokio::net::tcp::ReadHalf;
use tokio::net::tcp::WriteHalf;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::codec::LengthDelimitedCodec;

use crate::service::ServiceCodec;

/// Splits one accepted socket into a framed read half and write half under
/// a single codec, so a connection handler reads and writes whole packets
/// instead of raw bytes.
pub struct Channel<'a> {
    pub stream: FramedRead<ReadHalf<'a>, LengthDelimitedCodec>,
    pub sink: FramedWrite<WriteHalf<'a>, LengthDelimitedCodec>,
}

impl<'a> Channel<'a> {
    pub fn new<CODEC: ServiceCodec>(socket: &'a mut TcpStream, codec: CODEC) -> Self {
        let (r, w) = socket.split();
        let stream = codec.read_frame(r);
        let sink = codec.write_frame(w);
        Channel { stream, sink }
    }

    /// Sends zero or more framed payloads in order. `None` means the caller
    /// had nothing to send and is a programming error, not a transport one.
    pub async fn send(&mut self, payloads: Option<Vec<Bytes>>) -> Result<(), Error> {
        match payloads {
            Some(bytes) => {
                for payload in bytes {
                    self.sink.send(payload).await?;
                }
                Ok(())
            }
            None => Err(Error::new(
                std::io::ErrorKind::InvalidData,
                "nothing to send on this channel",
            )),
        }
    }
}
