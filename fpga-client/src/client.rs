use std::{collections::VecDeque, io::ErrorKind, net::ToSocketAddrs, time::Duration};

use fpga_protocol::{
    Answer, Packet, Request,
    codec::{DEFAULT_MAX_BUFFERED_BYTES, PacketDecoder},
    value_as_bytes, value_as_text,
};
use rmpv::Value;

use crate::{
    capability::CapabilityMap,
    device::{Device, DeviceHandle, be_bytes_to_words, words_to_be_bytes},
    error::ClientError,
    registry::{Notification, Registry},
    transport::{TcpTransport, Transport},
};

/// TCP port device servers listen on.
pub const DEFAULT_PORT: u16 = 9002;

#[derive(Clone, Debug)]
pub struct Config {
    /// How long a blocking receive waits before the server counts as unresponsive.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Bytes requested from the transport per receive call.
    pub receive_chunk_size: usize,
    /// Upper bound for the encoded size of a single message.
    pub max_buffered_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            receive_chunk_size: 8 * 1024,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        }
    }
}

/// Builder to create a [Client] and modify configuration options
///
/// # Example
///
/// ```no_run
/// use fpga_client::Builder;
/// use std::time::Duration;
///
/// let client = Builder::new()
///     .read_timeout(Duration::from_secs(1))
///     .connect(("localhost", fpga_client::DEFAULT_PORT))?;
/// # Ok::<(), fpga_client::ClientError>(())
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
    capabilities: Option<CapabilityMap>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn receive_chunk_size(mut self, size: usize) -> Self {
        self.config.receive_chunk_size = size.max(1);
        self
    }

    /// Set the largest message the client is willing to buffer.
    pub fn max_buffered_bytes(mut self, size: usize) -> Self {
        self.config.max_buffered_bytes = size;
        self
    }

    /// Use a private capability table instead of the process-wide one.
    pub fn capabilities(mut self, capabilities: CapabilityMap) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn build<T: Transport>(self, transport: T) -> Client<T> {
        Client::with_config(transport, self.config, self.capabilities)
    }

    /// Connects over TCP and fetches the initial device list.
    pub fn connect(self, addr: impl ToSocketAddrs) -> Result<Client<TcpTransport>, ClientError> {
        let transport = TcpTransport::connect(addr, &self.config)?;
        let mut client = self.build(transport);
        client.get_device_list()?;
        Ok(client)
    }
}

/// Counters for anomalies that do not fail any operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Diagnostics {
    /// Packets with an rcode that is neither an answer nor a known event.
    pub unknown_rcodes: u64,
    /// Register-changed events for serials that are not in the registry.
    pub dropped_register_events: u64,
}

/// Client for a device server.
///
/// Every request is answered by exactly one answer, in order. Events the server sends in
/// between are applied to the registry as soon as they are decoded; the resulting
/// [`Notification`]s are queued until [`Client::take_notifications`] is called.
pub struct Client<T: Transport> {
    transport: T,
    decoder: PacketDecoder,
    answers: VecDeque<Answer>,
    registry: Registry,
    config: Config,
    receive_buf: Vec<u8>,
    ready_hook: Option<Box<dyn FnMut() + Send>>,
    unknown_rcodes: u64,
    closed: bool,
}

impl Client<TcpTransport> {
    /// Connects with the default configuration. See [`Builder::connect`].
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Client<TcpTransport>, ClientError> {
        Builder::new().connect(addr)
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Client<T> {
        Builder::new().build(transport)
    }

    pub fn with_config(
        transport: T,
        config: Config,
        capabilities: Option<CapabilityMap>,
    ) -> Client<T> {
        let registry = match capabilities {
            Some(capabilities) => Registry::with_capabilities(capabilities),
            None => Registry::new(),
        };
        Client {
            transport,
            decoder: PacketDecoder::with_max_buffered_bytes(config.max_buffered_bytes),
            answers: VecDeque::new(),
            registry,
            receive_buf: vec![0; config.receive_chunk_size.max(1)],
            config,
            ready_hook: None,
            unknown_rcodes: 0,
            closed: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Installs a hook that runs after every batch of received data that queued at
    /// least one answer or notification.
    pub fn set_ready_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.ready_hook = Some(Box::new(hook));
    }

    /// Pushes bytes received outside of the transport into the client.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.decoder.feed(data);
        self.process()
    }

    /// Decodes and dispatches every complete packet in the buffer.
    fn process(&mut self) -> Result<(), ClientError> {
        let mut produced = false;
        let result = loop {
            let packet = match self.decoder.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };
            match packet {
                Packet::Answer(answer) => {
                    log::trace!("Received answer with rcode {}", answer.rcode());
                    self.answers.push_back(answer);
                    produced = true;
                }
                Packet::Event(event) => produced |= self.registry.apply(event),
                Packet::Unknown { rcode, .. } => {
                    log::warn!("Dropping packet with unknown rcode {}", rcode);
                    self.unknown_rcodes += 1;
                }
            }
        };
        if produced {
            self.notify_ready();
        }
        result.map_err(|err| self.fail(err.into()))
    }

    fn notify_ready(&mut self) {
        if let Some(hook) = self.ready_hook.as_mut() {
            hook();
        }
    }

    /// Receives one chunk from the transport and processes it.
    /// Returns the number of bytes received, zero if none were available.
    fn receive_more(&mut self, tolerate_timeout: bool) -> Result<usize, ClientError> {
        match self.transport.receive(&mut self.receive_buf) {
            Ok(0) => Err(self.fail(ClientError::ConnectionClosed)),
            Ok(n) => {
                self.decoder.feed(&self.receive_buf[..n]);
                self.process()?;
                Ok(n)
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(err) if tolerate_timeout && err.kind() == ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(self.fail(err.into())),
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// Closes the client if `err` is fatal, and hands `err` back.
    fn fail(&mut self, err: ClientError) -> ClientError {
        if err.is_fatal() && !self.closed {
            log::error!("Closing client: {}", err);
            self.shut_down();
        }
        err
    }

    fn shut_down(&mut self) {
        self.closed = true;
        self.answers.clear();
        let pending = self.registry.pending_notifications();
        self.registry.clear();
        if self.registry.pending_notifications() > pending {
            self.notify_ready();
        }
    }

    /// Closes the client. All devices are removed and later calls fail with
    /// [`ClientError::Closed`].
    pub fn close(&mut self) {
        if !self.closed {
            log::info!("Closing client");
            self.shut_down();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Encodes `request` and sends all of it.
    pub fn send_request(&mut self, request: &Request) -> Result<(), ClientError> {
        self.ensure_open()?;
        log::debug!("Sending {}", request);
        let mut encoded = Vec::new();
        request.write_to(&mut encoded)?;

        let mut remaining = &encoded[..];
        while !remaining.is_empty() {
            match self.transport.send(remaining) {
                Ok(0) => return Err(self.fail(ClientError::ConnectionClosed)),
                Ok(n) => remaining = &remaining[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.fail(err.into())),
            }
        }
        Ok(())
    }

    /// Returns the oldest answer, receiving until one is available.
    ///
    /// Answers with a negative rcode are returned as [`ClientError::Server`].
    pub fn wait_for_answer(&mut self) -> Result<Answer, ClientError> {
        self.ensure_open()?;
        loop {
            if let Some(answer) = self.answers.pop_front() {
                if answer.rcode() < 0 {
                    return Err(ClientError::Server {
                        rcode: answer.rcode(),
                        message: answer.error_message(),
                    });
                }
                return Ok(answer);
            }
            if !self.transport.can_receive() {
                return Err(ClientError::NoDataSource);
            }
            self.receive_more(false)?;
        }
    }

    /// Sends `request` and waits for its answer.
    pub fn call(&mut self, request: &Request) -> Result<Answer, ClientError> {
        self.send_request(request)?;
        self.wait_for_answer()
    }

    /// Waits for events once and returns the notifications queued so far.
    ///
    /// Unlike [`Client::wait_for_answer`], an elapsed read timeout is not an error here.
    pub fn poll_events(&mut self) -> Result<Vec<Notification>, ClientError> {
        self.ensure_open()?;
        if self.transport.can_receive() {
            self.receive_more(true)?;
        }
        Ok(self.take_notifications())
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.registry.take_notifications()
    }

    /// Number of answers received but not yet consumed.
    pub fn pending_answers(&self) -> usize {
        self.answers.len()
    }

    /// Fetches the serials of all attached devices and updates the registry to match.
    pub fn get_device_list(&mut self) -> Result<Vec<String>, ClientError> {
        let answer = self.call(&Request::DeviceList)?;
        let serials = match answer.value() {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    value_as_text(item).map(str::to_owned).ok_or_else(|| {
                        ClientError::UnexpectedPayload(format!("device serial {}", item))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(ClientError::UnexpectedPayload(format!(
                    "device list {:?}",
                    other
                )));
            }
        };

        let pending = self.registry.pending_notifications();
        self.registry.reconcile(&serials);
        if self.registry.pending_notifications() > pending {
            self.notify_ready();
        }
        Ok(serials)
    }

    /// Loads the bitstream into the device again. Returns whether the server succeeded.
    pub fn reprogram_device(&mut self, serial: &str) -> Result<bool, ClientError> {
        let answer = self.call(&Request::Reprogram {
            serial: serial.to_owned(),
        })?;
        let value = answer.value();
        value
            .and_then(|value| {
                value
                    .as_bool()
                    .or_else(|| value.as_i64().map(|v| v != 0))
                    .or_else(|| value.as_u64().map(|v| v != 0))
            })
            .ok_or_else(|| ClientError::UnexpectedPayload(format!("reprogram result {:?}", value)))
    }

    pub fn read_reg(&mut self, serial: &str, addr: u8, port: u8) -> Result<u16, ClientError> {
        let answer = self.call(&Request::ReadReg {
            serial: serial.to_owned(),
            addr,
            port,
        })?;
        let value = answer.value();
        value
            .and_then(Value::as_u64)
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| ClientError::UnexpectedPayload(format!("register value {:?}", value)))
    }

    pub fn write_reg(
        &mut self,
        serial: &str,
        addr: u8,
        port: u8,
        value: u16,
    ) -> Result<(), ClientError> {
        self.call(&Request::WriteReg {
            serial: serial.to_owned(),
            addr,
            port,
            value,
        })?;
        Ok(())
    }

    pub fn read_reg_n(
        &mut self,
        serial: &str,
        addr: u8,
        port: u8,
        count: usize,
    ) -> Result<Vec<u16>, ClientError> {
        let answer = self.call(&Request::ReadRegN {
            serial: serial.to_owned(),
            addr,
            port,
            count: wire_count(count)?,
        })?;
        let bytes = block_payload(&answer)?;
        be_bytes_to_words(bytes, count)
    }

    pub fn write_reg_n(
        &mut self,
        serial: &str,
        addr: u8,
        port: u8,
        values: &[u16],
    ) -> Result<(), ClientError> {
        self.call(&Request::WriteRegN {
            serial: serial.to_owned(),
            addr,
            port,
            data: words_to_be_bytes(values).into_boxed_slice(),
        })?;
        Ok(())
    }

    pub fn write_raw(&mut self, serial: &str, data: &[u8]) -> Result<(), ClientError> {
        self.call(&Request::WriteRaw {
            serial: serial.to_owned(),
            data: data.into(),
        })?;
        Ok(())
    }

    pub fn read_raw(&mut self, serial: &str, count: usize) -> Result<Vec<u8>, ClientError> {
        let answer = self.call(&Request::ReadRaw {
            serial: serial.to_owned(),
            count: wire_count(count)?,
        })?;
        let bytes = block_payload(&answer)?;
        if bytes.len() != count {
            return Err(ClientError::LengthMismatch {
                expected: count,
                got: bytes.len(),
            });
        }
        Ok(bytes.to_vec())
    }

    pub fn device(&self, serial: &str) -> Option<&Device> {
        self.registry.get(serial)
    }

    /// A handle for operations on a device that is currently attached.
    pub fn device_mut(&mut self, serial: &str) -> Result<DeviceHandle<'_, T>, ClientError> {
        if !self.registry.contains(serial) {
            return Err(ClientError::UnknownDevice(serial.to_owned()));
        }
        Ok(DeviceHandle::new(self, serial.to_owned()))
    }

    /// Serials of all attached devices, sorted.
    pub fn devices(&self) -> Vec<&str> {
        self.registry.serials()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            unknown_rcodes: self.unknown_rcodes,
            dropped_register_events: self.registry.dropped_register_events(),
        }
    }
}

fn wire_count(count: usize) -> Result<u32, ClientError> {
    u32::try_from(count)
        .map_err(|_| ClientError::InvalidArgument(format!("count {} is too large", count)))
}

fn block_payload(answer: &Answer) -> Result<&[u8], ClientError> {
    let value = answer.value();
    value
        .and_then(value_as_bytes)
        .ok_or_else(|| ClientError::UnexpectedPayload(format!("byte block {:?}", value)))
}
