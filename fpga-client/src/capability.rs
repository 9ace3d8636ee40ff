//! Device capabilities, selected by serial prefix.
//!
//! A capability is created once, when its device first appears, and lives as long as the
//! device handle. It receives the device's register-changed events and may keep state
//! derived from them. Operations on top of the generic register access are provided as
//! extension traits over [`crate::RegisterAccess`], see [`crate::faout`].
use std::{
    any::Any,
    sync::{PoisonError, RwLock},
};

pub trait Capability: Any + Send {
    /// Name shown in notifications and logs.
    fn name(&self) -> &str;

    /// Called for every register-changed event of the owning device.
    fn register_changed(&mut self, addr: u8, port: u8, value: u16) {
        let _ = (addr, port, value);
    }
}

/// Creates the capability for a device with the given serial.
pub type CapabilityFactory = fn(serial: &str) -> Box<dyn Capability>;

/// Ordered table of serial prefixes and the capabilities they select.
///
/// The first registered prefix matching a serial wins.
#[derive(Clone, Debug, Default)]
pub struct CapabilityMap {
    entries: Vec<(String, CapabilityFactory)>,
}

impl CapabilityMap {
    pub const fn new() -> CapabilityMap {
        CapabilityMap {
            entries: Vec::new(),
        }
    }

    /// Associates `prefix` with `factory`.
    /// Registering a prefix again replaces its factory but keeps its position.
    pub fn register(&mut self, prefix: impl Into<String>, factory: CapabilityFactory) {
        let prefix = prefix.into();
        match self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((prefix, factory)),
        }
    }

    /// The prefix and factory that apply to `serial`.
    pub fn resolve(&self, serial: &str) -> Option<(&str, CapabilityFactory)> {
        self.entries
            .iter()
            .find(|(prefix, _)| serial.starts_with(prefix.as_str()))
            .map(|(prefix, factory)| (prefix.as_str(), *factory))
    }

    /// Creates the capability for `serial`, if any prefix matches.
    pub fn instantiate(&self, serial: &str) -> Option<Box<dyn Capability>> {
        self.resolve(serial).map(|(prefix, factory)| {
            log::debug!("Device {} matches capability prefix {}", serial, prefix);
            factory(serial)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static GLOBAL_CAPABILITIES: RwLock<CapabilityMap> = RwLock::new(CapabilityMap::new());

/// Registers a capability in the process-wide table.
///
/// The table starts out empty. It is consulted whenever a client without its own table
/// creates a device, so registrations must happen before the devices appear: devices that
/// already exist keep the capability they were created with.
pub fn register_capability(prefix: impl Into<String>, factory: CapabilityFactory) {
    GLOBAL_CAPABILITIES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(prefix, factory);
}

/// A copy of the process-wide table.
pub fn global_capabilities() -> CapabilityMap {
    GLOBAL_CAPABILITIES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub(crate) fn instantiate_global(serial: &str) -> Option<Box<dyn Capability>> {
    GLOBAL_CAPABILITIES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .instantiate(serial)
}
