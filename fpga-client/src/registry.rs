use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt::Display,
};

use fpga_protocol::Event;

use crate::{
    capability::{CapabilityMap, instantiate_global},
    device::Device,
};

/// A change of the registry, queued for delivery to the application.
///
/// Notifications are never delivered from inside a running request. They pile up in the
/// registry until the application takes them with [`crate::Client::take_notifications`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Notification {
    DeviceAdded {
        serial: String,
        capability: Option<String>,
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

impl Notification {
    pub fn serial(&self) -> &str {
        match self {
            Notification::DeviceAdded { serial, .. }
            | Notification::DeviceRemoved { serial }
            | Notification::RegisterChanged { serial, .. } => serial,
        }
    }
}

impl Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::DeviceAdded {
                serial,
                capability: Some(capability),
            } => write!(f, "Device added: {} ({})", serial, capability),
            Notification::DeviceAdded {
                serial,
                capability: None,
            } => write!(f, "Device added: {}", serial),
            Notification::DeviceRemoved { serial } => write!(f, "Device removed: {}", serial),
            Notification::RegisterChanged {
                serial,
                addr,
                port,
                value,
            } => write!(
                f,
                "Register changed: {} addr={} port={} value=0x{:04x}",
                serial, addr, port, value
            ),
        }
    }
}

/// The devices currently attached to the server, by serial.
///
/// Every serial has at most one [`Device`]. It is created when the serial first shows up,
/// through an added-event or a device list, and dropped when it disappears again.
#[derive(Debug, Default)]
pub struct Registry {
    devices: HashMap<String, Device>,
    /// `None` selects the process-wide table.
    capabilities: Option<CapabilityMap>,
    notifications: VecDeque<Notification>,
    dropped_register_events: u64,
}

impl Registry {
    /// A registry that takes capabilities from the process-wide table.
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn with_capabilities(capabilities: CapabilityMap) -> Registry {
        Registry {
            capabilities: Some(capabilities),
            ..Registry::default()
        }
    }

    /// Applies a server event. Returns whether a notification was queued.
    pub fn apply(&mut self, event: Event) -> bool {
        match event {
            Event::DeviceAdded { serial } => self.handle_added(&serial),
            Event::DeviceRemoved { serial } => self.handle_removed(&serial),
            Event::RegisterChanged {
                serial,
                addr,
                port,
                value,
            } => self.handle_register_changed(&serial, addr, port, value),
        }
    }

    /// Creates the device for `serial` unless it already exists.
    pub fn handle_added(&mut self, serial: &str) -> bool {
        if self.devices.contains_key(serial) {
            return false;
        }

        let capability = match &self.capabilities {
            Some(map) => map.instantiate(serial),
            None => instantiate_global(serial),
        };
        let device = Device::new(serial.to_owned(), capability);
        let capability = device.capability_name().map(str::to_owned);
        log::info!("Device added: {}", serial);

        self.devices.insert(serial.to_owned(), device);
        self.notifications.push_back(Notification::DeviceAdded {
            serial: serial.to_owned(),
            capability,
        });
        true
    }

    /// Drops the device for `serial` if it exists.
    pub fn handle_removed(&mut self, serial: &str) -> bool {
        if self.devices.remove(serial).is_none() {
            return false;
        }
        log::info!("Device removed: {}", serial);
        self.notifications.push_back(Notification::DeviceRemoved {
            serial: serial.to_owned(),
        });
        true
    }

    /// Forwards a register change to the device's capability.
    ///
    /// Changes for unknown serials are dropped without a message; they are only counted.
    pub fn handle_register_changed(
        &mut self,
        serial: &str,
        addr: u8,
        port: u8,
        value: u16,
    ) -> bool {
        let Some(device) = self.devices.get_mut(serial) else {
            self.dropped_register_events += 1;
            return false;
        };
        log::trace!(
            "Register changed: {} addr={} port={} value=0x{:04x}",
            serial,
            addr,
            port,
            value
        );
        device.register_changed(addr, port, value);
        self.notifications.push_back(Notification::RegisterChanged {
            serial: serial.to_owned(),
            addr,
            port,
            value,
        });
        true
    }

    /// Makes the registry hold exactly the devices in `serials`.
    pub fn reconcile<S: AsRef<str>>(&mut self, serials: &[S]) {
        for serial in serials {
            self.handle_added(serial.as_ref());
        }

        let present: HashSet<&str> = serials.iter().map(AsRef::as_ref).collect();
        let mut gone: Vec<String> = self
            .devices
            .keys()
            .filter(|serial| !present.contains(serial.as_str()))
            .cloned()
            .collect();
        gone.sort();
        for serial in gone {
            self.handle_removed(&serial);
        }
    }

    /// Removes all devices, queueing a removal for each.
    pub fn clear(&mut self) {
        for serial in self.serials().into_iter().map(str::to_owned).collect::<Vec<_>>() {
            self.handle_removed(&serial);
        }
    }

    pub fn get(&self, serial: &str) -> Option<&Device> {
        self.devices.get(serial)
    }

    pub fn get_mut(&mut self, serial: &str) -> Option<&mut Device> {
        self.devices.get_mut(serial)
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.devices.contains_key(serial)
    }

    /// All serials, sorted.
    pub fn serials(&self) -> Vec<&str> {
        let mut serials: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        serials.sort_unstable();
        serials
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    /// Register-changed events that named an unknown device.
    pub fn dropped_register_events(&self) -> u64 {
        self.dropped_register_events
    }
}
