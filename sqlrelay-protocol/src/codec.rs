use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::LengthDelimitedCodec;
use tokio_util::codec::{FramedRead, FramedWrite};

use sqlrelay_common::service::ServiceCodec;

/// Frames MySQL packets over a socket: the 3-byte little-endian payload
/// length at offset 0, one sequence byte, then payload.
pub struct MySQLCodec;

pub fn write_frame<T: AsyncWrite>(io: T) -> FramedWrite<T, LengthDelimitedCodec> {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(3)
        .length_adjustment(1)
        .little_endian()
        .num_skip(0)
        .new_write(io)
}

pub fn read_frame<T: AsyncRead>(io: T) -> FramedRead<T, LengthDelimitedCodec> {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(3)
        .length_adjustment(4)
        .little_endian()
        .num_skip(0)
        .new_read(io)
}

impl ServiceCodec for MySQLCodec {
    fn write_frame<T: AsyncWrite>(&self, io: T) -> FramedWrite<T, LengthDelimitedCodec> {
        write_frame(io)
    }

    fn read_frame<T: AsyncRead>(&self, io: T) -> FramedRead<T, LengthDelimitedCodec> {
        read_frame(io)
    }
}
