/// MessagePack encoding of requests and packets, and the incremental packet decoder
use std::io::{self, Write};

use bytes::BytesMut;
use rmpv::Value;

use crate::{
    error::ReadError,
    protocol::{
        Answer, Event, Packet, RCODE_ADDED, RCODE_OK, RCODE_REG_CHANGED, RCODE_REMOVED, Request,
        value_as_bytes, value_as_text,
    },
};

/// Upper bound for the encoded size of a single message.
///
/// The largest answer a board sends is a full FAOUT SDRAM read of `2^23 - 1` words, a
/// little over 16 MiB on the wire.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 64 * 1024 * 1024;

/// Size information carried by a MessagePack marker byte.
enum Marker {
    /// Marker and payload take a fixed number of bytes.
    Fixed(usize),
    /// A payload whose length is stored big-endian in the `width` bytes after the marker.
    /// `header` also counts the marker and, for ext types, the type byte.
    Sized { header: usize, width: usize },
    /// That many nested values follow the marker.
    Nested(usize),
    /// The number of entries is stored big-endian in the `width` bytes after the marker.
    SizedNested { width: usize, per_entry: usize },
}

fn marker(byte: u8) -> Result<Marker, ReadError> {
    let marker = match byte {
        0x00..=0x7f | 0xc0 | 0xc2 | 0xc3 | 0xe0..=0xff => Marker::Fixed(1),
        0x80..=0x8f => Marker::Nested(2 * usize::from(byte & 0x0f)),
        0x90..=0x9f => Marker::Nested(usize::from(byte & 0x0f)),
        0xa0..=0xbf => Marker::Fixed(1 + usize::from(byte & 0x1f)),
        0xc1 => {
            return Err(ReadError::InvalidFormat(
                "Malformed MessagePack data: reserved marker 0xc1".to_string(),
            ));
        }
        0xc4 | 0xd9 => Marker::Sized {
            header: 2,
            width: 1,
        },
        0xc5 | 0xda => Marker::Sized {
            header: 3,
            width: 2,
        },
        0xc6 | 0xdb => Marker::Sized {
            header: 5,
            width: 4,
        },
        0xc7 => Marker::Sized {
            header: 3,
            width: 1,
        },
        0xc8 => Marker::Sized {
            header: 4,
            width: 2,
        },
        0xc9 => Marker::Sized {
            header: 6,
            width: 4,
        },
        0xcc | 0xd0 => Marker::Fixed(2),
        0xcd | 0xd1 => Marker::Fixed(3),
        0xca | 0xce | 0xd2 => Marker::Fixed(5),
        0xcb | 0xcf | 0xd3 => Marker::Fixed(9),
        0xd4 => Marker::Fixed(3),
        0xd5 => Marker::Fixed(4),
        0xd6 => Marker::Fixed(6),
        0xd7 => Marker::Fixed(10),
        0xd8 => Marker::Fixed(18),
        0xdc => Marker::SizedNested {
            width: 2,
            per_entry: 1,
        },
        0xdd => Marker::SizedNested {
            width: 4,
            per_entry: 1,
        },
        0xde => Marker::SizedNested {
            width: 2,
            per_entry: 2,
        },
        0xdf => Marker::SizedNested {
            width: 4,
            per_entry: 2,
        },
    };
    Ok(marker)
}

fn read_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .fold(0usize, |len, byte| len << 8 | usize::from(*byte))
}

/// Takes complete MessagePack values off the front of a growing buffer.
///
/// Messages carry no length header, so the decoder walks the markers of the first value
/// to find where it ends. The walk is resumed where it stopped when more bytes arrive,
/// and the value is parsed once all of its bytes are buffered.
///
/// Declared lengths are checked against the size limit while walking. A message that is
/// too large fails at the same marker whether it arrives in one piece or in many.
#[derive(Clone, Debug)]
pub struct ValueDecoder {
    max_message_bytes: usize,
    /// End of the part of the current value walked so far.
    pos: usize,
    /// Values of the current message that still have to be walked.
    pending: usize,
}

impl Default for ValueDecoder {
    fn default() -> Self {
        ValueDecoder::new(DEFAULT_MAX_BUFFERED_BYTES)
    }
}

impl ValueDecoder {
    pub fn new(max_message_bytes: usize) -> ValueDecoder {
        ValueDecoder {
            max_message_bytes,
            pos: 0,
            pending: 1,
        }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Lower bound for the buffered bytes the current message needs.
    /// Once a length header has been seen this includes the whole announced payload.
    pub fn needed(&self) -> usize {
        self.pos + self.pending
    }

    /// Takes one complete value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the value is incomplete.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Value>, ReadError> {
        while self.pending > 0 {
            let Some(&byte) = buf.get(self.pos) else {
                return Ok(None);
            };
            let rest = self.pending - 1;
            let (pos, pending) = match marker(byte)? {
                Marker::Fixed(len) => (self.pos + len, rest),
                Marker::Nested(count) => (self.pos + 1, rest + count),
                Marker::Sized { header, width } => {
                    let Some(len) = buf.get(self.pos + 1..self.pos + 1 + width) else {
                        return Ok(None);
                    };
                    let end = (self.pos + header).saturating_add(read_len(len));
                    (end, rest)
                }
                Marker::SizedNested { width, per_entry } => {
                    let Some(len) = buf.get(self.pos + 1..self.pos + 1 + width) else {
                        return Ok(None);
                    };
                    let entries = read_len(len).saturating_mul(per_entry);
                    (self.pos + 1 + width, rest.saturating_add(entries))
                }
            };
            // Every pending value takes at least one byte.
            let needed = pos.saturating_add(pending);
            if needed > self.max_message_bytes {
                return Err(ReadError::TooManyBytes {
                    max: self.max_message_bytes,
                    got: needed,
                });
            }
            self.pos = pos;
            self.pending = pending;
        }
        if buf.len() < self.pos {
            return Ok(None);
        }

        let message = buf.split_to(self.pos);
        self.pos = 0;
        self.pending = 1;
        let mut rest: &[u8] = &message;
        let value = rmpv::decode::read_value(&mut rest).map_err(|err| {
            ReadError::InvalidFormat(format!("Malformed MessagePack data: {}", err))
        })?;
        Ok(Some(value))
    }
}

fn write_value(writer: &mut impl Write, value: &Value) -> io::Result<()> {
    rmpv::encode::write_value(writer, value).map_err(|err| io::Error::other(err.to_string()))
}

fn field<'a>(fields: &'a [Value], index: usize, name: &str) -> Result<&'a Value, ReadError> {
    fields
        .get(index)
        .ok_or_else(|| ReadError::InvalidFormat(format!("Missing field '{}'", name)))
}

fn text_field(fields: &[Value], index: usize, name: &str) -> Result<String, ReadError> {
    let value = field(fields, index, name)?;
    value_as_text(value).map(str::to_owned).ok_or_else(|| {
        ReadError::InvalidFormat(format!("Field '{}' is not a string: {}", name, value))
    })
}

fn uint_field<T: TryFrom<u64>>(
    fields: &[Value],
    index: usize,
    name: &str,
) -> Result<T, ReadError> {
    let value = field(fields, index, name)?;
    value
        .as_u64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| {
            ReadError::InvalidFormat(format!("Field '{}' is out of range: {}", name, value))
        })
}

fn bytes_field(fields: &[Value], index: usize, name: &str) -> Result<Box<[u8]>, ReadError> {
    let value = field(fields, index, name)?;
    value_as_bytes(value).map(Box::from).ok_or_else(|| {
        ReadError::InvalidFormat(format!("Field '{}' is not a byte block: {}", name, value))
    })
}

impl Request {
    /// The request as the array `[method, args...]`.
    pub fn to_value(&self) -> Value {
        let method = Value::from(self.method());
        let fields = match self {
            Request::DeviceList => vec![method],
            Request::Reprogram { serial } => vec![method, Value::from(serial.as_str())],
            Request::ReadReg { serial, addr, port } => vec![
                method,
                Value::from(serial.as_str()),
                Value::from(*addr),
                Value::from(*port),
            ],
            Request::WriteReg {
                serial,
                addr,
                port,
                value,
            } => vec![
                method,
                Value::from(serial.as_str()),
                Value::from(*addr),
                Value::from(*port),
                Value::from(*value),
            ],
            Request::WriteRegN {
                serial,
                addr,
                port,
                data,
            } => vec![
                method,
                Value::from(serial.as_str()),
                Value::from(*addr),
                Value::from(*port),
                Value::Binary(data.to_vec()),
            ],
            Request::ReadRegN {
                serial,
                addr,
                port,
                count,
            } => vec![
                method,
                Value::from(serial.as_str()),
                Value::from(*addr),
                Value::from(*port),
                Value::from(*count),
            ],
            Request::WriteRaw { serial, data } => vec![
                method,
                Value::from(serial.as_str()),
                Value::Binary(data.to_vec()),
            ],
            Request::ReadRaw { serial, count } => {
                vec![method, Value::from(serial.as_str()), Value::from(*count)]
            }
        };
        Value::Array(fields)
    }

    /// Parses a request the way a server receives it.
    pub fn from_value(value: Value) -> Result<Request, ReadError> {
        let fields = match value {
            Value::Array(fields) => fields,
            other => {
                return Err(ReadError::InvalidFormat(format!(
                    "Request must be an array, got {}",
                    other
                )));
            }
        };
        let method = fields
            .first()
            .and_then(value_as_text)
            .ok_or_else(|| ReadError::InvalidFormat("Request has no method".to_string()))?;

        let request = match method {
            Request::METHOD_DEVICE_LIST => Request::DeviceList,
            Request::METHOD_REPROGRAM => Request::Reprogram {
                serial: text_field(&fields, 1, "serial")?,
            },
            Request::METHOD_READ_REG => Request::ReadReg {
                serial: text_field(&fields, 1, "serial")?,
                addr: uint_field(&fields, 2, "addr")?,
                port: uint_field(&fields, 3, "port")?,
            },
            Request::METHOD_WRITE_REG => Request::WriteReg {
                serial: text_field(&fields, 1, "serial")?,
                addr: uint_field(&fields, 2, "addr")?,
                port: uint_field(&fields, 3, "port")?,
                value: uint_field(&fields, 4, "value")?,
            },
            Request::METHOD_WRITE_REG_N => Request::WriteRegN {
                serial: text_field(&fields, 1, "serial")?,
                addr: uint_field(&fields, 2, "addr")?,
                port: uint_field(&fields, 3, "port")?,
                data: bytes_field(&fields, 4, "data")?,
            },
            Request::METHOD_READ_REG_N => Request::ReadRegN {
                serial: text_field(&fields, 1, "serial")?,
                addr: uint_field(&fields, 2, "addr")?,
                port: uint_field(&fields, 3, "port")?,
                count: uint_field(&fields, 4, "count")?,
            },
            Request::METHOD_WRITE_RAW => Request::WriteRaw {
                serial: text_field(&fields, 1, "serial")?,
                data: bytes_field(&fields, 2, "data")?,
            },
            Request::METHOD_READ_RAW => Request::ReadRaw {
                serial: text_field(&fields, 1, "serial")?,
                count: uint_field(&fields, 2, "count")?,
            },
            other => return Err(ReadError::InvalidCommand(other.to_string())),
        };
        Ok(request)
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        write_value(writer, &self.to_value())
    }
}

impl Packet {
    /// The packet as the array `[rcode, fields...]`.
    pub fn to_value(&self) -> Value {
        let fields = match self {
            Packet::Answer(answer) => {
                let mut fields = Vec::with_capacity(answer.payload().len() + 1);
                fields.push(Value::from(answer.rcode()));
                fields.extend_from_slice(answer.payload());
                fields
            }
            Packet::Event(Event::DeviceAdded { serial }) => {
                vec![Value::from(RCODE_ADDED), Value::from(serial.as_str())]
            }
            Packet::Event(Event::DeviceRemoved { serial }) => {
                vec![Value::from(RCODE_REMOVED), Value::from(serial.as_str())]
            }
            Packet::Event(Event::RegisterChanged {
                serial,
                addr,
                port,
                value,
            }) => vec![
                Value::from(RCODE_REG_CHANGED),
                Value::from(serial.as_str()),
                Value::from(*addr),
                Value::from(*port),
                Value::from(*value),
            ],
            Packet::Unknown { rcode, fields } => {
                let mut all = Vec::with_capacity(fields.len() + 1);
                all.push(Value::from(*rcode));
                all.extend_from_slice(fields);
                all
            }
        };
        Value::Array(fields)
    }

    /// Classifies a decoded value by its leading rcode.
    ///
    /// A value that is not an array, an empty array, a non-integer rcode or a malformed
    /// event are protocol violations.
    pub fn from_value(value: Value) -> Result<Packet, ReadError> {
        let mut fields = match value {
            Value::Array(fields) => fields,
            other => {
                return Err(ReadError::InvalidPacket(format!(
                    "expected an array, got {}",
                    other
                )));
            }
        };
        let rcode = match fields.first() {
            Some(first) => first.as_i64().ok_or_else(|| {
                ReadError::InvalidPacket(format!("rcode {} is not an integer", first))
            })?,
            None => return Err(ReadError::InvalidPacket("empty packet".to_string())),
        };

        let packet = match rcode {
            rcode if rcode <= RCODE_OK => Packet::Answer(Answer::new(rcode, fields.split_off(1))),
            RCODE_ADDED => Packet::Event(Event::DeviceAdded {
                serial: text_field(&fields, 1, "serial")?,
            }),
            RCODE_REMOVED => Packet::Event(Event::DeviceRemoved {
                serial: text_field(&fields, 1, "serial")?,
            }),
            RCODE_REG_CHANGED => Packet::Event(Event::RegisterChanged {
                serial: text_field(&fields, 1, "serial")?,
                addr: uint_field(&fields, 2, "addr")?,
                port: uint_field(&fields, 3, "port")?,
                value: uint_field(&fields, 4, "value")?,
            }),
            rcode => Packet::Unknown {
                rcode,
                fields: fields.split_off(1),
            },
        };
        Ok(packet)
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        write_value(writer, &self.to_value())
    }
}

/// Turns an arbitrarily fragmented byte stream into packets.
///
/// Bytes are appended with [`PacketDecoder::feed`]; complete packets are taken with
/// [`PacketDecoder::next_packet`] or [`PacketDecoder::packets`]. A trailing partial packet
/// stays buffered until the next feed completes it.
///
/// The first protocol violation fails the decoder for good: the position of the next
/// message in the stream is unknown from then on.
#[derive(Debug)]
pub struct PacketDecoder {
    buf: BytesMut,
    values: ValueDecoder,
    failure: Option<String>,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        PacketDecoder::with_max_buffered_bytes(DEFAULT_MAX_BUFFERED_BYTES)
    }
}

impl PacketDecoder {
    pub fn new() -> PacketDecoder {
        PacketDecoder::default()
    }

    /// A decoder that rejects any message larger than `max_buffered_bytes`.
    pub fn with_max_buffered_bytes(max_buffered_bytes: usize) -> PacketDecoder {
        PacketDecoder {
            buf: BytesMut::with_capacity(8 * 1024),
            values: ValueDecoder::new(max_buffered_bytes),
            failure: None,
        }
    }

    /// Appends received bytes. Chunks may split messages at any position.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decodes the next complete packet, if one is buffered.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, ReadError> {
        if let Some(reason) = &self.failure {
            return Err(ReadError::InvalidFormat(format!(
                "Stream failed earlier: {}",
                reason
            )));
        }
        let result = self
            .values
            .decode(&mut self.buf)
            .and_then(|value| value.map(Packet::from_value).transpose());
        if let Err(err) = &result {
            self.failure = Some(err.to_string());
        }
        result
    }

    /// Iterates over the packets that are complete so far.
    /// The iterator ends at the first partial packet or after yielding an error.
    pub fn packets(&mut self) -> Packets<'_> {
        Packets {
            decoder: self,
            done: false,
        }
    }

    /// Number of bytes received but not yet decoded.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Iterator returned by [`PacketDecoder::packets`].
pub struct Packets<'a> {
    decoder: &'a mut PacketDecoder,
    done: bool,
}

impl Iterator for Packets<'_> {
    type Item = Result<Packet, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decoder.next_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use rmpv::Value;

    use crate::codec::{PacketDecoder, ValueDecoder};
    use crate::error::ReadError;
    use crate::protocol::{Answer, Event, Packet, Request};

    fn encode_packets(packets: &[Packet]) -> Vec<u8> {
        let mut out = Vec::new();
        for packet in packets {
            packet.write_to(&mut out).unwrap();
        }
        out
    }

    fn sample_stream() -> Vec<Packet> {
        vec![
            Answer::ok(42).into(),
            Event::RegisterChanged {
                serial: "FAOUT-01".to_string(),
                addr: 0,
                port: 1,
                value: 0x0808,
            }
            .into(),
            Answer::ok(Value::Binary(vec![0, 1, 0, 2, 0, 3])).into(),
            Event::DeviceAdded {
                serial: "FAOUT-02".to_string(),
            }
            .into(),
            Answer::error("bad address").into(),
        ]
    }

    #[test]
    fn write_readreg() {
        let mut out = Vec::new();
        Request::ReadReg {
            serial: "FAOUT-01".to_string(),
            addr: 0,
            port: 1,
        }
        .write_to(&mut out)
        .unwrap();

        let mut expected = vec![0x94, 0xa7];
        expected.extend_from_slice(b"readreg");
        expected.push(0xa8);
        expected.extend_from_slice(b"FAOUT-01");
        expected.extend_from_slice(&[0x00, 0x01]);
        assert_eq!(out, expected);
    }

    #[test]
    fn write_devicelist() {
        let mut out = Vec::new();
        Request::DeviceList.write_to(&mut out).unwrap();
        let mut expected = vec![0x91, 0xaa];
        expected.extend_from_slice(b"devicelist");
        assert_eq!(out, expected);
    }

    #[test]
    fn write_writeregn_as_binary() {
        let request = Request::WriteRegN {
            serial: "X".to_string(),
            addr: 1,
            port: 4,
            data: vec![0x00, 0x01, 0xff, 0xfe].into_boxed_slice(),
        };
        match request.to_value() {
            Value::Array(fields) => {
                assert_eq!(fields.len(), 5);
                assert_eq!(fields[4], Value::Binary(vec![0x00, 0x01, 0xff, 0xfe]));
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn read_answer() {
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x92, 0x00, 0x2a]);
        match decoder.next_packet().unwrap() {
            Some(Packet::Answer(answer)) => {
                assert!(answer.is_ok());
                assert_eq!(answer.value().and_then(Value::as_u64), Some(42));
            }
            other => panic!("expected answer, got {:?}", other),
        }
        assert!(decoder.next_packet().unwrap().is_none());
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn read_events() {
        let packets = vec![
            Packet::Event(Event::DeviceAdded {
                serial: "FAOUT-02".to_string(),
            }),
            Packet::Event(Event::DeviceRemoved {
                serial: "FAOUT-02".to_string(),
            }),
        ];
        let mut decoder = PacketDecoder::new();
        decoder.feed(&encode_packets(&packets));
        let decoded = decoder.packets().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn serial_may_be_binary() {
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x92, 0x01, 0xc4, 0x02, b'A', b'B']);
        assert_eq!(
            decoder.next_packet().unwrap(),
            Some(Packet::Event(Event::DeviceAdded {
                serial: "AB".to_string()
            }))
        );
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let packets = sample_stream();
        let wire = encode_packets(&packets);

        for split in 0..=wire.len() {
            let mut decoder = PacketDecoder::new();
            let mut decoded = Vec::new();
            for chunk in [&wire[..split], &wire[split..]] {
                decoder.feed(chunk);
                for packet in decoder.packets() {
                    decoded.push(packet.unwrap());
                }
            }
            assert_eq!(decoded, packets, "split at {}", split);
        }

        let mut decoder = PacketDecoder::new();
        let mut decoded = Vec::new();
        for byte in &wire {
            decoder.feed(std::slice::from_ref(byte));
            for packet in decoder.packets() {
                decoded.push(packet.unwrap());
            }
        }
        assert_eq!(decoded, packets);
    }

    #[test]
    fn partial_packet_stays_buffered() {
        let wire = encode_packets(&[Answer::ok("hello").into()]);
        let mut decoder = PacketDecoder::new();
        decoder.feed(&wire[..wire.len() - 2]);
        assert!(decoder.next_packet().unwrap().is_none());
        assert_eq!(decoder.buffered_len(), wire.len() - 2);

        decoder.feed(&wire[wire.len() - 2..]);
        assert_eq!(decoder.next_packet().unwrap(), Some(Answer::ok("hello").into()));
    }

    #[test]
    fn unknown_rcode_is_not_an_error() {
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x92, 0x07, 0xc0]);
        match decoder.next_packet().unwrap() {
            Some(Packet::Unknown { rcode, fields }) => {
                assert_eq!(rcode, 7);
                assert_eq!(fields, vec![Value::Nil]);
            }
            other => panic!("expected unknown packet, got {:?}", other),
        }
    }

    #[test]
    fn non_integer_rcode() {
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x91, 0xa1, b'x']);
        match decoder.next_packet() {
            Err(ReadError::InvalidPacket(_)) => {}
            other => panic!("expected InvalidPacket, got {:?}", other),
        }
    }

    #[test]
    fn packet_must_be_array() {
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x05]);
        assert!(matches!(
            decoder.next_packet(),
            Err(ReadError::InvalidPacket(_))
        ));

        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x90]);
        assert!(matches!(
            decoder.next_packet(),
            Err(ReadError::InvalidPacket(_))
        ));
    }

    #[test]
    fn malformed_event() {
        // [3, "X", "a", 0, 0]
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x95, 0x03, 0xa1, b'X', 0xa1, b'a', 0x00, 0x00]);
        assert!(matches!(
            decoder.next_packet(),
            Err(ReadError::InvalidFormat(_))
        ));

        // [1]
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x91, 0x01]);
        assert!(matches!(
            decoder.next_packet(),
            Err(ReadError::InvalidFormat(_))
        ));
    }

    #[test]
    fn register_value_out_of_range() {
        // [3, "X", 0, 1, 70000]
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0x95, 0x03, 0xa1, b'X', 0x00, 0x01, 0xce, 0x00, 0x01, 0x11, 0x70]);
        assert!(matches!(
            decoder.next_packet(),
            Err(ReadError::InvalidFormat(_))
        ));
    }

    #[test]
    fn reserved_marker_fails_stream() {
        let mut decoder = PacketDecoder::new();
        decoder.feed(&[0xc1]);
        assert!(decoder.next_packet().is_err());
        assert!(decoder.is_failed());

        // A valid packet after the violation is not decoded any more.
        decoder.feed(&[0x92, 0x00, 0x2a]);
        assert!(decoder.next_packet().is_err());
    }

    #[test]
    fn too_many_bytes_whole_or_split() {
        // [0, bin(64)]: 68 bytes on the wire
        let wire = encode_packets(&[Answer::ok(Value::Binary(vec![0xab; 64])).into()]);
        assert_eq!(wire.len(), 68);

        let mut decoder = PacketDecoder::with_max_buffered_bytes(32);
        decoder.feed(&wire);
        match decoder.next_packet() {
            Err(ReadError::TooManyBytes { max, got }) => {
                assert_eq!(max, 32);
                assert_eq!(got, 68);
            }
            other => panic!("expected TooManyBytes, got {:?}", other),
        }

        for split in 0..=wire.len() {
            let mut decoder = PacketDecoder::with_max_buffered_bytes(32);
            decoder.feed(&wire[..split]);
            let result = match decoder.next_packet() {
                Ok(None) => {
                    assert!(decoder.buffered_len() <= 32, "split at {}", split);
                    decoder.feed(&wire[split..]);
                    decoder.next_packet()
                }
                other => other,
            };
            assert!(
                matches!(result, Err(ReadError::TooManyBytes { max: 32, got: 68 })),
                "split at {}: {:?}",
                split,
                result
            );
        }
    }

    #[test]
    fn message_at_the_limit() {
        let packet: Packet = Answer::ok(Value::Binary(vec![0xab; 64])).into();
        let wire = encode_packets(std::slice::from_ref(&packet));

        for split in 0..=wire.len() {
            let mut decoder = PacketDecoder::with_max_buffered_bytes(wire.len());
            decoder.feed(&wire[..split]);
            let mut decoded = decoder.packets().collect::<Result<Vec<_>, _>>().unwrap();
            decoder.feed(&wire[split..]);
            decoded.extend(decoder.packets().map(Result::unwrap));
            assert_eq!(decoded, vec![packet.clone()], "split at {}", split);
        }
    }

    #[test]
    fn array_length_is_checked_before_the_elements() {
        // array16 announcing 1000 elements, each at least one byte long
        let mut decoder = PacketDecoder::with_max_buffered_bytes(100);
        decoder.feed(&[0xdc, 0x03, 0xe8]);
        match decoder.next_packet() {
            Err(ReadError::TooManyBytes { max, got }) => {
                assert_eq!(max, 100);
                assert_eq!(got, 1003);
            }
            other => panic!("expected TooManyBytes, got {:?}", other),
        }
    }

    #[test]
    fn waits_for_the_announced_payload() {
        // [0, bin32(65536)]
        let mut wire = vec![0x92, 0x00, 0xc6, 0x00, 0x01, 0x00, 0x00];
        wire.resize(wire.len() + 65536, 0x5a);

        let mut values = ValueDecoder::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..7]);
        assert_eq!(values.decode(&mut buf).unwrap(), None);
        assert_eq!(values.needed(), wire.len());

        for chunk in wire[7..wire.len() - 1].chunks(1000) {
            buf.extend_from_slice(chunk);
            assert_eq!(values.decode(&mut buf).unwrap(), None);
            assert_eq!(values.needed(), wire.len());
        }
        buf.extend_from_slice(&wire[wire.len() - 1..]);
        let value = values.decode(&mut buf).unwrap().unwrap();
        let fields = value.as_array().unwrap();
        assert_eq!(fields[1], Value::Binary(vec![0x5a; 65536]));
        assert!(buf.is_empty());
        assert_eq!(values.needed(), 1);
    }

    #[test]
    fn full_sdram_answer_in_chunks() {
        // 2^23 - 1 words, the largest readregn answer a board sends
        let packet: Packet = Answer::ok(Value::Binary(vec![0x5a; 2 * ((1 << 23) - 1)])).into();
        let wire = encode_packets(std::slice::from_ref(&packet));
        assert!(wire.len() > 16 * 1024 * 1024);

        let mut decoder = PacketDecoder::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(8 * 1024) {
            decoder.feed(chunk);
            for packet in decoder.packets() {
                decoded.push(packet.unwrap());
            }
        }
        assert_eq!(decoded, vec![packet]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn read_requests() {
        let requests = vec![
            Request::DeviceList,
            Request::Reprogram {
                serial: "FAOUT-01".to_string(),
            },
            Request::WriteReg {
                serial: "FAOUT-01".to_string(),
                addr: 0,
                port: 1,
                value: 99,
            },
            Request::ReadRegN {
                serial: "FAOUT-01".to_string(),
                addr: 1,
                port: 4,
                count: 3,
            },
            Request::ReadRaw {
                serial: "FAOUT-01".to_string(),
                count: 16,
            },
        ];
        for request in requests {
            assert_eq!(Request::from_value(request.to_value()).unwrap(), request);
        }
    }

    #[test]
    fn invalid_command() {
        let value = Value::Array(vec![Value::from("status"), Value::from("FAOUT-01")]);
        match Request::from_value(value) {
            Err(ReadError::InvalidCommand(cmd)) => assert_eq!(cmd, "status"),
            other => panic!("expected InvalidCommand, got {:?}", other),
        }
    }
}
