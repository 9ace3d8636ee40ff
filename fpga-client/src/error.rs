use std::{error::Error, fmt::Display, io};

use fpga_protocol::error::ReadError;

/// Errors returned by [`crate::Client`] operations.
///
/// Fatal errors ([`ClientError::is_fatal`]) end the session: the client tears down
/// all devices and answers every later call with [`ClientError::Closed`].
#[derive(Debug)]
pub enum ClientError {
    /// The transport failed while sending or receiving.
    Io(io::Error),
    /// The peer closed the connection.
    ConnectionClosed,
    /// The server sent bytes that violate the protocol.
    Protocol(ReadError),
    /// The server answered the request with a negative rcode.
    Server { rcode: i64, message: String },
    /// An answer was awaited, but the transport cannot receive and none is queued.
    NoDataSource,
    /// The answer does not have the shape the request implies.
    UnexpectedPayload(String),
    /// A block answer does not have the requested length.
    LengthMismatch { expected: usize, got: usize },
    UnknownDevice(String),
    InvalidArgument(String),
    /// The client failed earlier and can no longer be used.
    Closed,
}

impl ClientError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::ConnectionClosed | ClientError::Protocol(_)
        )
    }
}

impl From<io::Error> for ClientError {
    fn from(value: io::Error) -> Self {
        ClientError::Io(value)
    }
}

impl From<ReadError> for ClientError {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::IoError(err) => ClientError::Io(err),
            other => ClientError::Protocol(other),
        }
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(error) => write!(f, "{}", error),
            ClientError::ConnectionClosed => write!(f, "Connection closed by server"),
            ClientError::Protocol(error) => write!(f, "Protocol violation: {}", error),
            ClientError::Server { rcode, message } => {
                write!(f, "Server returned error {}: {}", rcode, message)
            }
            ClientError::NoDataSource => {
                write!(f, "Cannot wait for an answer without a receiving transport")
            }
            ClientError::UnexpectedPayload(what) => write!(f, "Unexpected answer: {}", what),
            ClientError::LengthMismatch { expected, got } => {
                write!(f, "Expected {} bytes in answer, but got {}", expected, got)
            }
            ClientError::UnknownDevice(serial) => write!(f, "Unknown device {}", serial),
            ClientError::InvalidArgument(what) => write!(f, "Invalid argument: {}", what),
            ClientError::Closed => write!(f, "Client is closed"),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientError::Io(error) => Some(error),
            ClientError::Protocol(error) => Some(error),
            _ => None,
        }
    }
}

#[test]
fn server_error_mentions_message() {
    let err = ClientError::Server {
        rcode: -1,
        message: "bad address".to_string(),
    };
    assert!(err.to_string().contains("bad address"));
    assert!(!err.is_fatal());
    assert!(ClientError::ConnectionClosed.is_fatal());
}
