use std::fmt::Display;

use rmpv::Value;

/// Answer rcode reported by the server when a request failed.
pub const RCODE_ERROR: i64 = -1;
/// Answer rcode of a successful request.
pub const RCODE_OK: i64 = 0;
/// Event rcode: a device was attached to the server.
pub const RCODE_ADDED: i64 = 1;
/// Event rcode: a device was detached from the server.
pub const RCODE_REMOVED: i64 = 2;
/// Event rcode: a tracked register of a device changed its value.
pub const RCODE_REG_CHANGED: i64 = 3;

/// A Request is transfered from the client to the server.
///
/// Requests carry no identifier. The server answers every request with exactly one
/// [`Answer`], in the order the requests were received, so a client must not send a
/// second request before it has consumed the answer to the first one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    /// Lists the serials of all devices attached to the server.
    DeviceList,
    /// Loads the bitstream into the device again. Answers with a boolean.
    Reprogram { serial: String },
    /// Reads a single 16 bit register.
    ReadReg { serial: String, addr: u8, port: u8 },
    /// Writes a single 16 bit register.
    WriteReg {
        serial: String,
        addr: u8,
        port: u8,
        value: u16,
    },
    /// Writes a block of 16 bit words to the same register.
    WriteRegN {
        serial: String,
        addr: u8,
        port: u8,
        /// The words, each encoded as two big-endian bytes.
        data: Box<[u8]>,
    },
    /// Reads `count` 16 bit words from the same register.
    /// The answer carries `2 * count` big-endian bytes.
    ReadRegN {
        serial: String,
        addr: u8,
        port: u8,
        count: u32,
    },
    /// Writes raw bytes to the device's data pipe.
    WriteRaw { serial: String, data: Box<[u8]> },
    /// Reads `count` raw bytes from the device's data pipe.
    ReadRaw { serial: String, count: u32 },
}

impl Request {
    pub const METHOD_DEVICE_LIST: &str = "devicelist";
    pub const METHOD_REPROGRAM: &str = "reprogram";
    pub const METHOD_READ_REG: &str = "readreg";
    pub const METHOD_WRITE_REG: &str = "writereg";
    pub const METHOD_WRITE_REG_N: &str = "writeregn";
    pub const METHOD_READ_REG_N: &str = "readregn";
    pub const METHOD_WRITE_RAW: &str = "writeraw";
    pub const METHOD_READ_RAW: &str = "readraw";

    /// The method name that leads the request on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            Request::DeviceList => Self::METHOD_DEVICE_LIST,
            Request::Reprogram { .. } => Self::METHOD_REPROGRAM,
            Request::ReadReg { .. } => Self::METHOD_READ_REG,
            Request::WriteReg { .. } => Self::METHOD_WRITE_REG,
            Request::WriteRegN { .. } => Self::METHOD_WRITE_REG_N,
            Request::ReadRegN { .. } => Self::METHOD_READ_REG_N,
            Request::WriteRaw { .. } => Self::METHOD_WRITE_RAW,
            Request::ReadRaw { .. } => Self::METHOD_READ_RAW,
        }
    }

    /// The serial of the device the request targets, if any.
    pub fn serial(&self) -> Option<&str> {
        match self {
            Request::DeviceList => None,
            Request::Reprogram { serial }
            | Request::ReadReg { serial, .. }
            | Request::WriteReg { serial, .. }
            | Request::WriteRegN { serial, .. }
            | Request::ReadRegN { serial, .. }
            | Request::WriteRaw { serial, .. }
            | Request::ReadRaw { serial, .. } => Some(serial),
        }
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.serial() {
            Some(serial) => write!(f, "{}({})", self.method(), serial),
            None => write!(f, "{}", self.method()),
        }
    }
}

/// The reply to exactly one request.
///
/// An rcode of [`RCODE_OK`] denotes success, any negative rcode a failure.
/// On failure the payload holds a human readable description.
#[derive(Clone, Debug, PartialEq)]
pub struct Answer {
    rcode: i64,
    payload: Vec<Value>,
}

impl Answer {
    /// Creates an answer from an rcode and the fields that follow it.
    /// Positive rcodes belong to events, the caller is responsible for not passing one.
    pub fn new(rcode: i64, payload: Vec<Value>) -> Answer {
        Answer { rcode, payload }
    }

    /// A successful answer carrying a single value.
    pub fn ok(value: impl Into<Value>) -> Answer {
        Answer::new(RCODE_OK, vec![value.into()])
    }

    /// A failed answer carrying a description of the failure.
    pub fn error(message: impl Into<String>) -> Answer {
        Answer::new(RCODE_ERROR, vec![Value::from(message.into())])
    }

    pub fn rcode(&self) -> i64 {
        self.rcode
    }

    pub fn is_ok(&self) -> bool {
        self.rcode == RCODE_OK
    }

    /// All fields after the rcode.
    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// The first field after the rcode, which holds the result of most requests.
    pub fn value(&self) -> Option<&Value> {
        self.payload.first()
    }

    pub fn into_value(self) -> Option<Value> {
        self.payload.into_iter().next()
    }

    /// The description of a failure.
    ///
    /// Servers send a string; anything else is rendered as a whole so no information is lost.
    pub fn error_message(&self) -> String {
        match self.value().and_then(value_as_text) {
            Some(text) => text.to_owned(),
            None => format!("{:?}", self.payload),
        }
    }
}

/// An unsolicited message from the server, not correlated to any request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    DeviceAdded {
        serial: String,
    },
    DeviceRemoved {
        serial: String,
    },
    RegisterChanged {
        serial: String,
        addr: u8,
        port: u8,
        value: u16,
    },
}

impl Event {
    pub fn rcode(&self) -> i64 {
        match self {
            Event::DeviceAdded { .. } => RCODE_ADDED,
            Event::DeviceRemoved { .. } => RCODE_REMOVED,
            Event::RegisterChanged { .. } => RCODE_REG_CHANGED,
        }
    }

    pub fn serial(&self) -> &str {
        match self {
            Event::DeviceAdded { serial }
            | Event::DeviceRemoved { serial }
            | Event::RegisterChanged { serial, .. } => serial,
        }
    }
}

/// A Packet is transfered from the server to the client.
/// Its first field, the rcode, decides whether it answers a request or reports an event.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// rcode `<= 0`
    Answer(Answer),
    /// rcode `1`, `2` or `3`
    Event(Event),
    /// Any other positive rcode. Clients drop these with a warning.
    Unknown { rcode: i64, fields: Vec<Value> },
}

impl Packet {
    pub fn rcode(&self) -> i64 {
        match self {
            Packet::Answer(answer) => answer.rcode(),
            Packet::Event(event) => event.rcode(),
            Packet::Unknown { rcode, .. } => *rcode,
        }
    }
}

impl From<Answer> for Packet {
    fn from(value: Answer) -> Self {
        Packet::Answer(value)
    }
}

impl From<Event> for Packet {
    fn from(value: Event) -> Self {
        Packet::Event(value)
    }
}

/// Interprets a field as text.
///
/// Older servers send strings as MessagePack `raw`/`bin`, newer ones as `str`.
pub fn value_as_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => s.as_str(),
        Value::Binary(b) => std::str::from_utf8(b).ok(),
        _ => None,
    }
}

/// Interprets a field as a byte block, accepting both `bin` and `str` encodings.
pub fn value_as_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Binary(b) => Some(b),
        Value::String(s) => Some(s.as_bytes()),
        _ => None,
    }
}

#[test]
fn error_message_prefers_text() {
    let answer = Answer::error("bad address");
    assert_eq!(answer.rcode(), RCODE_ERROR);
    assert!(!answer.is_ok());
    assert_eq!(answer.error_message(), "bad address");

    let answer = Answer::new(-2, vec![Value::from(7)]);
    assert!(answer.error_message().contains('7'));
}

#[test]
fn text_from_binary_field() {
    let value = Value::Binary(b"FAOUT-01".to_vec());
    assert_eq!(value_as_text(&value), Some("FAOUT-01"));
    assert_eq!(value_as_text(&Value::Binary(vec![0xff, 0xfe])), None);
    assert_eq!(value_as_text(&Value::from(1)), None);
}

#[test]
fn request_display() {
    let request = Request::ReadReg {
        serial: "FAOUT-01".to_string(),
        addr: 0,
        port: 1,
    };
    assert_eq!(request.to_string(), "readreg(FAOUT-01)");
    assert_eq!(Request::DeviceList.to_string(), "devicelist");
}
