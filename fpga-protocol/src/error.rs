use std::{error::Error, fmt::Display, io};

/// Errors that may occur when decoding a message from a stream.
///
/// Every variant except [`ReadError::IoError`] describes a protocol violation:
/// the stream cannot be trusted afterwards and the connection must be dropped.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    /// The decoded value is not an array starting with an integer rcode.
    InvalidPacket(String),
    /// The bytes are not valid MessagePack, or a field has the wrong type.
    InvalidFormat(String),
    /// A request names a method the protocol does not know.
    InvalidCommand(String),
    /// A message announces more bytes than the decoder accepts.
    TooManyBytes { max: usize, got: usize },
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::InvalidPacket(reason) => write!(f, "Received invalid packet: {}", reason),
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::InvalidCommand(cmd) => write!(f, "Received invalid command {}", cmd),
            ReadError::TooManyBytes { max, got } => {
                write!(
                    f,
                    "Message too large! Maximum is {} bytes, but it needs at least {}",
                    max, got
                )
            }
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::IoError(error) => Some(error),
            _ => None,
        }
    }
}
