use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::codec::LengthDelimitedCodec;

pub mod io;

/// Per-connection behavior for one accepted socket. `sqlrelay`'s
/// `GatewayHandler` is the one implementor: it drives a single MySQL
/// connection's handshake, auth, and command loop through to close.
#[async_trait]
pub trait ServiceHandler {
    async fn handle(&self, mut socket: TcpStream);
}

/// A bound listener's accept loop. `sqlrelay`'s `GatewayService` binds the
/// configured host:port and spawns a [`ServiceHandler`] per connection.
#[async_trait]
pub trait Service {
    async fn serve(&self) -> std::result::Result<(), Box<dyn std::error::Error>>;
}

/// Produces the framed read/write halves [`io::Channel`] splits a socket
/// into. `MySQLCodec` is the one implementor, configuring
/// [`LengthDelimitedCodec`] for the wire protocol's 3-byte little-endian
/// length prefix.
pub trait ServiceCodec {
    fn write_frame<T: AsyncWrite>(&self, io: T) -> FramedWrite<T, LengthDelimitedCodec>;
    fn read_frame<T: AsyncRead>(&self, io: T) -> FramedRead<T, LengthDelimitedCodec>;
}