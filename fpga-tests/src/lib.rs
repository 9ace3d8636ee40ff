//! A scripted device server for end-to-end tests.
//!
//! [`FakeServer`] accepts a single connection and answers requests from an in-memory
//! model of its devices. Events and stream faults can be scheduled in front of the answer
//! to a given request; requests are counted from zero, starting with the `devicelist`
//! a client sends on connect.
use std::{
    collections::{BTreeMap, HashMap},
    io,
    net::SocketAddr,
};

use fpga_protocol::{Answer, Event, Packet, Request, error::ReadError, tokio_codec::ServerCodec};
use futures_util::{SinkExt, StreamExt};
use rmpv::Value;
use tokio::{io::AsyncWriteExt, net::TcpListener, task::JoinHandle};
use tokio_util::codec::Framed;

#[derive(Debug, Default)]
struct Board {
    regs: HashMap<(u8, u8), u16>,
    /// Words written with `writeregn`, consumed by `readregn`.
    blocks: HashMap<(u8, u8), Vec<u8>>,
    raw: Vec<u8>,
    rejected_writes: HashMap<(u8, u8), String>,
}

#[derive(Debug)]
enum Action {
    Send(Packet),
    Garbage(Vec<u8>),
    Close,
}

#[derive(Debug, Default)]
pub struct FakeServer {
    devices: BTreeMap<String, Board>,
    actions: BTreeMap<usize, Vec<Action>>,
}

impl FakeServer {
    pub fn new() -> FakeServer {
        FakeServer::default()
    }

    pub fn device(mut self, serial: &str) -> Self {
        self.devices.entry(serial.to_owned()).or_default();
        self
    }

    pub fn register(mut self, serial: &str, addr: u8, port: u8, value: u16) -> Self {
        self.devices
            .entry(serial.to_owned())
            .or_default()
            .regs
            .insert((addr, port), value);
        self
    }

    /// Writes to the register are answered with an error carrying `message`.
    pub fn reject_writes(mut self, serial: &str, addr: u8, port: u8, message: &str) -> Self {
        self.devices
            .entry(serial.to_owned())
            .or_default()
            .rejected_writes
            .insert((addr, port), message.to_owned());
        self
    }

    /// Sends `packet` right before the answer to request `index`.
    ///
    /// Added and removed events also change the device set the server reports.
    pub fn event_before_answer(mut self, index: usize, packet: impl Into<Packet>) -> Self {
        self.actions
            .entry(index)
            .or_default()
            .push(Action::Send(packet.into()));
        self
    }

    /// Writes raw bytes right before the answer to request `index`.
    pub fn garbage_before_answer(mut self, index: usize, bytes: &[u8]) -> Self {
        self.actions
            .entry(index)
            .or_default()
            .push(Action::Garbage(bytes.to_vec()));
        self
    }

    /// Drops the connection instead of answering request `index`.
    pub fn close_before_answer(mut self, index: usize) -> Self {
        self.actions.entry(index).or_default().push(Action::Close);
        self
    }

    /// Listens on a free local port. The task resolves to all requests received once the
    /// connection ends.
    pub async fn spawn(
        self,
    ) -> io::Result<(SocketAddr, JoinHandle<Result<Vec<Request>, ReadError>>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok((addr, tokio::spawn(self.serve(listener))))
    }

    async fn serve(mut self, listener: TcpListener) -> Result<Vec<Request>, ReadError> {
        let (tcp, peer) = listener.accept().await?;
        log::info!("Fake server accepted {}", peer);
        let mut framed = Framed::new(tcp, ServerCodec::default());
        let mut received = Vec::new();

        while let Some(request) = framed.next().await {
            let request = request?;
            log::debug!("Fake server received {}", request);
            let index = received.len();
            received.push(request.clone());

            for action in self.actions.remove(&index).unwrap_or_default() {
                match action {
                    Action::Send(packet) => {
                        self.apply(&packet);
                        framed.send(packet).await?;
                    }
                    Action::Garbage(bytes) => framed.get_mut().write_all(&bytes).await?,
                    Action::Close => return Ok(received),
                }
            }
            let answer = self.answer(&request);
            framed.send(answer.into()).await?;
        }
        Ok(received)
    }

    fn apply(&mut self, packet: &Packet) {
        match packet {
            Packet::Event(Event::DeviceAdded { serial }) => {
                self.devices.entry(serial.clone()).or_default();
            }
            Packet::Event(Event::DeviceRemoved { serial }) => {
                self.devices.remove(serial);
            }
            _ => {}
        }
    }

    fn answer(&mut self, request: &Request) -> Answer {
        if let Request::DeviceList = request {
            let serials = self.devices.keys().map(|s| Value::from(s.as_str())).collect();
            return Answer::ok(Value::Array(serials));
        }
        let Some(board) = request.serial().and_then(|s| self.devices.get_mut(s)) else {
            return Answer::error("Unknown device");
        };

        match request {
            Request::DeviceList => unreachable!(),
            Request::Reprogram { .. } => Answer::ok(true),
            Request::ReadReg { addr, port, .. } => {
                Answer::ok(board.regs.get(&(*addr, *port)).copied().unwrap_or(0))
            }
            Request::WriteReg {
                addr, port, value, ..
            } => match board.rejected_writes.get(&(*addr, *port)) {
                Some(message) => Answer::error(message.as_str()),
                None => {
                    board.regs.insert((*addr, *port), *value);
                    Answer::ok(Value::Nil)
                }
            },
            Request::WriteRegN {
                addr, port, data, ..
            } => {
                board
                    .blocks
                    .entry((*addr, *port))
                    .or_default()
                    .extend_from_slice(data);
                Answer::ok(Value::Nil)
            }
            Request::ReadRegN {
                addr, port, count, ..
            } => {
                let block = board.blocks.entry((*addr, *port)).or_default();
                let n = block.len().min(*count as usize * 2);
                Answer::ok(Value::Binary(block.drain(..n).collect()))
            }
            Request::WriteRaw { data, .. } => {
                board.raw.extend_from_slice(data);
                Answer::ok(Value::Nil)
            }
            Request::ReadRaw { count, .. } => {
                let n = board.raw.len().min(*count as usize);
                Answer::ok(Value::Binary(board.raw.drain(..n).collect()))
            }
        }
    }
}
