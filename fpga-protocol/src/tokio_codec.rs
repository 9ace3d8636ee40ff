//! [`tokio_util::codec`] adapters for both ends of a connection.
//!
//! [`ClientCodec`] decodes [`Packet`]s and encodes [`Request`]s,
//! [`ServerCodec`] does the opposite. Both use the same incremental decoding as
//! [`crate::codec::PacketDecoder`].
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    codec::{DEFAULT_MAX_BUFFERED_BYTES, ValueDecoder},
    error::ReadError,
    protocol::{Packet, Request},
};

#[derive(Clone, Debug)]
pub struct ClientCodec {
    values: ValueDecoder,
}

impl ClientCodec {
    pub fn new(max_buffered_bytes: usize) -> ClientCodec {
        ClientCodec {
            values: ValueDecoder::new(max_buffered_bytes),
        }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        ClientCodec::new(DEFAULT_MAX_BUFFERED_BYTES)
    }
}

impl Decoder for ClientCodec {
    type Item = Packet;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.values
            .decode(src)?
            .map(Packet::from_value)
            .transpose()
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = ReadError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(&mut dst.writer())?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ServerCodec {
    values: ValueDecoder,
}

impl ServerCodec {
    pub fn new(max_buffered_bytes: usize) -> ServerCodec {
        ServerCodec {
            values: ValueDecoder::new(max_buffered_bytes),
        }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        ServerCodec::new(DEFAULT_MAX_BUFFERED_BYTES)
    }
}

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.values
            .decode(src)?
            .map(Request::from_value)
            .transpose()
    }
}

impl Encoder<Packet> for ServerCodec {
    type Error = ReadError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(&mut dst.writer())?;
        Ok(())
    }
}
