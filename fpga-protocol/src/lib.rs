//! # FPGA Device Protocol Library
//!
//! This crate implements the wire protocol spoken between an FPGA device server and its
//! clients. The server multiplexes many physical devices, each identified by a serial
//! string, onto a single TCP stream.
//!
//! ## Overview
//!
//! Every message is a MessagePack array. There is no additional framing: the end of a
//! message is found by walking its MessagePack markers, which is why
//! [`codec::PacketDecoder`] buffers partial messages until the rest arrives.
//!
//! - **Requests** (client to server) start with a method name: `["readreg", serial, addr, port]`
//! - **Packets** (server to client) start with an integer rcode:
//!   - `rcode <= 0`: the [`Answer`] to the oldest unanswered request (`0` is success)
//!   - `1`, `2`, `3`: an [`Event`] (device added, device removed, register changed)
//!
//! Answers carry no request identifier. They are correlated to requests purely by order.
//!
//! ## Basic Usage
//!
//! ### Encoding a Request
//!
//! ```
//! use fpga_protocol::Request;
//!
//! let request = Request::ReadReg { serial: "FAOUT-01".to_string(), addr: 0, port: 1 };
//! let mut buffer = Vec::new();
//! request.write_to(&mut buffer).expect("Writing to vector shouldn't fail");
//! assert_eq!(buffer[0], 0x94); // array of four elements
//! ```
//!
//! ### Decoding Packets from Fragmented Input
//!
//! ```
//! use fpga_protocol::{Packet, codec::PacketDecoder};
//!
//! let mut decoder = PacketDecoder::new();
//! decoder.feed(&[0x92, 0x00]);
//! assert!(decoder.next_packet().unwrap().is_none());
//! decoder.feed(&[0x2a]);
//! match decoder.next_packet().unwrap() {
//!     Some(Packet::Answer(answer)) => {
//!         assert_eq!(answer.value().and_then(|v| v.as_u64()), Some(42))
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```
//!
//! ## Message Format
//!
//! | Request     | Fields                                     |
//! |-------------|--------------------------------------------|
//! | `devicelist`| -                                          |
//! | `reprogram` | serial                                     |
//! | `readreg`   | serial, addr, port                         |
//! | `writereg`  | serial, addr, port, value                  |
//! | `readregn`  | serial, addr, port, word count             |
//! | `writeregn` | serial, addr, port, big-endian 16 bit words|
//! | `readraw`   | serial, byte count                         |
//! | `writeraw`  | serial, bytes                              |
//!
//! Addresses and ports are 8 bit, register values 16 bit.
//!
//! ## Error Handling
//!
//! Decoding errors are reported as [`error::ReadError`]. Any of them except I/O errors
//! means the stream is no longer usable.
//!
//! ## Feature Flags
//!
//! - `tokio`: [`tokio_util::codec`] implementations in [`tokio_codec`].
pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
#[cfg(feature = "tokio")]
pub mod tokio_codec;
