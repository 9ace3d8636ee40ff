//! The byte transport a [`crate::Client`] talks through.
//!
//! The client needs exactly two primitives: push bytes out, and block until more bytes
//! arrive. Anything that provides them can carry the protocol, be it a socket, a pipe or
//! the read callback of an event loop.
use std::{
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
};

use crate::client::Config;

pub trait Transport {
    /// Sends a prefix of `data` and returns its length.
    ///
    /// The client calls this again with the remainder until everything is sent.
    /// `Ok(0)` means the peer is gone.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Blocks until bytes arrive and copies them into `buf`.
    ///
    /// * `Ok(0)`: the connection is closed.
    /// * `Err` of kind [`ErrorKind::WouldBlock`] or [`ErrorKind::Interrupted`]: no data
    ///   yet, the client will ask again.
    /// * any other `Err`, including [`ErrorKind::TimedOut`], is fatal.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether [`Transport::receive`] is available.
    ///
    /// Transports that are fed by an external event loop through [`crate::Client::feed`]
    /// return `false`.
    fn can_receive(&self) -> bool {
        true
    }
}

/// Blocking TCP transport.
///
/// A socket read timeout is reported as [`ErrorKind::TimedOut`], i.e. the server did not
/// respond in time.
#[derive(Debug)]
pub struct TcpTransport {
    tcp: TcpStream,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs, config: &Config) -> io::Result<TcpTransport> {
        let tcp = TcpStream::connect(addr)?;
        if let Ok(peer) = tcp.peer_addr() {
            log::info!("Connected to {}", peer);
        }
        tcp.set_read_timeout(Some(config.read_timeout))?;
        tcp.set_write_timeout(Some(config.write_timeout))?;
        tcp.set_nodelay(true)?;
        Ok(TcpTransport { tcp })
    }

    /// Wraps an already connected stream. Timeouts are left as they are.
    pub fn from_stream(tcp: TcpStream) -> TcpTransport {
        TcpTransport { tcp }
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.tcp
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.tcp.shutdown(Shutdown::Both)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.tcp.write(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.tcp.read(buf) {
            // std reports an elapsed read timeout as WouldBlock on unix
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(io::Error::new(
                ErrorKind::TimedOut,
                "no response from server",
            )),
            other => other,
        }
    }
}

/// A transport that can only send.
///
/// Received bytes are pushed into the client by whoever owns the connection, using
/// [`crate::Client::feed`].
#[derive(Debug)]
pub struct SendOnly<W> {
    writer: W,
}

impl<W: Write> SendOnly<W> {
    pub fn new(writer: W) -> SendOnly<W> {
        SendOnly { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Transport for SendOnly<W> {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.write(data)
    }

    fn receive(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "transport cannot receive",
        ))
    }

    fn can_receive(&self) -> bool {
        false
    }
}
