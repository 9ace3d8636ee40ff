//! # FPGA Client
//!
//! A Rust client library for FPGA device servers. A server multiplexes many physical
//! devices, each identified by a serial string, over a single connection; this crate
//! keeps track of those devices and provides register access to them.
//!
//! ## Overview
//!
//! [`Client`] drives one connection. It sends one request at a time and hands back the
//! matching answer, while unsolicited events from the server (devices appearing or
//! disappearing, registers changing) are applied to its [`registry::Registry`] on the
//! fly. The application picks up the resulting [`Notification`]s whenever it likes.
//!
//! Devices get a [`Capability`] when they appear, selected by the prefix of their serial.
//! Capabilities keep per-device state and come with extension traits that build board
//! specific operations on [`RegisterAccess`]. See [`faout`] for an example.
//!
//! For the wire format, see the [`fpga_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ### Connecting to a Server
//!
//! ```ignore
//! use fpga_client::{Client, faout::Faout};
//!
//! Faout::register();
//! let mut client = Client::connect(("localhost", fpga_client::DEFAULT_PORT))?;
//!
//! for serial in client.devices() {
//!     println!("{}", serial);
//! }
//! ```
//!
//! ### Accessing Registers
//!
//! ```ignore
//! let value = client.read_reg("FAOUT-01", 0, 1)?;
//! client.write_reg("FAOUT-01", 2, 0, 0x8000)?;
//!
//! let samples = client.read_reg_n("FAOUT-01", 1, 4, 128)?;
//! ```
//!
//! ### Device Specific Operations
//!
//! ```ignore
//! use fpga_client::faout::FaoutRegisters;
//!
//! let mut device = client.device_mut("FAOUT-01")?;
//! device.reset()?;
//! device.write_dac(0, 0x8000)?;
//! println!("{}", device.device_status()?);
//! ```
//!
//! ### Waiting for Events
//!
//! ```ignore
//! loop {
//!     for notification in client.poll_events()? {
//!         println!("{}", notification);
//!     }
//! }
//! ```
//!
//! ## Transports
//!
//! [`TcpTransport`] covers the common case. Applications that run their own event loop
//! use [`SendOnly`] and push received bytes with [`Client::feed`]; a hook set with
//! [`Client::set_ready_hook`] tells them when answers or notifications are waiting.
//!
//! ## Related Crates
//!
//! - [`fpga_protocol`] - Protocol encoding/decoding
pub mod capability;
mod client;
pub mod device;
mod error;
pub mod faout;
pub mod registry;
pub mod transport;

pub use capability::{
    Capability, CapabilityFactory, CapabilityMap, global_capabilities, register_capability,
};
pub use client::{Builder, Client, Config, DEFAULT_PORT, Diagnostics};
pub use device::{Device, DeviceHandle, RegisterAccess};
pub use error::ClientError;
pub use registry::Notification;
pub use transport::{SendOnly, TcpTransport, Transport};
