use std::{any::Any, fmt};

use crate::{
    capability::Capability,
    client::Client,
    error::ClientError,
    transport::Transport,
};

/// Generic register access every device supports.
///
/// Device specific operations are written against this trait only, so they work on a
/// [`DeviceHandle`] as well as on anything else that can reach the registers.
pub trait RegisterAccess {
    fn read_reg(&mut self, addr: u8, port: u8) -> Result<u16, ClientError>;

    fn write_reg(&mut self, addr: u8, port: u8, value: u16) -> Result<(), ClientError>;

    /// Reads `count` words from the same register.
    fn read_reg_n(&mut self, addr: u8, port: u8, count: usize) -> Result<Vec<u16>, ClientError>;

    /// Writes all `values` to the same register.
    fn write_reg_n(&mut self, addr: u8, port: u8, values: &[u16]) -> Result<(), ClientError>;
}

/// A device known to the client, owned by its [`crate::registry::Registry`].
pub struct Device {
    serial: String,
    capability: Option<Box<dyn Capability>>,
}

impl Device {
    pub(crate) fn new(serial: String, capability: Option<Box<dyn Capability>>) -> Device {
        Device { serial, capability }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Name of the capability selected at creation, `None` for a plain device.
    pub fn capability_name(&self) -> Option<&str> {
        self.capability.as_deref().map(|capability| capability.name())
    }

    /// The capability, if it is of type `C`.
    pub fn capability<C: Capability>(&self) -> Option<&C> {
        let capability: &dyn Any = self.capability.as_deref()?;
        capability.downcast_ref()
    }

    pub fn capability_mut<C: Capability>(&mut self) -> Option<&mut C> {
        let capability: &mut dyn Any = self.capability.as_deref_mut()?;
        capability.downcast_mut()
    }

    pub(crate) fn register_changed(&mut self, addr: u8, port: u8, value: u16) {
        if let Some(capability) = self.capability.as_deref_mut() {
            capability.register_changed(addr, port, value);
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("serial", &self.serial)
            .field("capability", &self.capability_name())
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serial)
    }
}

/// A device bound to the client that reaches it.
///
/// Obtained from [`Client::device_mut`]. The handle borrows the client, so it cannot
/// outlive a removal of the device.
pub struct DeviceHandle<'a, T: Transport> {
    client: &'a mut Client<T>,
    serial: String,
}

impl<'a, T: Transport> DeviceHandle<'a, T> {
    pub(crate) fn new(client: &'a mut Client<T>, serial: String) -> DeviceHandle<'a, T> {
        DeviceHandle { client, serial }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// The registry entry, `None` once the device was removed.
    pub fn device(&self) -> Option<&Device> {
        self.client.device(&self.serial)
    }

    pub fn capability<C: Capability>(&self) -> Option<&C> {
        self.device()?.capability()
    }

    pub fn reprogram(&mut self) -> Result<bool, ClientError> {
        self.client.reprogram_device(&self.serial)
    }

    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), ClientError> {
        self.client.write_raw(&self.serial, data)
    }

    pub fn read_raw(&mut self, count: usize) -> Result<Vec<u8>, ClientError> {
        self.client.read_raw(&self.serial, count)
    }
}

impl<T: Transport> RegisterAccess for DeviceHandle<'_, T> {
    fn read_reg(&mut self, addr: u8, port: u8) -> Result<u16, ClientError> {
        self.client.read_reg(&self.serial, addr, port)
    }

    fn write_reg(&mut self, addr: u8, port: u8, value: u16) -> Result<(), ClientError> {
        self.client.write_reg(&self.serial, addr, port, value)
    }

    fn read_reg_n(&mut self, addr: u8, port: u8, count: usize) -> Result<Vec<u16>, ClientError> {
        self.client.read_reg_n(&self.serial, addr, port, count)
    }

    fn write_reg_n(&mut self, addr: u8, port: u8, values: &[u16]) -> Result<(), ClientError> {
        self.client.write_reg_n(&self.serial, addr, port, values)
    }
}

/// Encodes words as the big-endian byte block of `writeregn`.
pub fn words_to_be_bytes(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// Decodes the big-endian byte block of a `readregn` answer.
pub fn be_bytes_to_words(bytes: &[u8], count: usize) -> Result<Vec<u16>, ClientError> {
    if bytes.len() != count * 2 {
        return Err(ClientError::LengthMismatch {
            expected: count * 2,
            got: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod test {
    use super::{Capability, Device, be_bytes_to_words, words_to_be_bytes};
    use crate::error::ClientError;

    #[derive(Default)]
    struct Recorder {
        changes: Vec<(u8, u8, u16)>,
    }

    impl Capability for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn register_changed(&mut self, addr: u8, port: u8, value: u16) {
            self.changes.push((addr, port, value));
        }
    }

    #[test]
    fn big_endian_words() {
        let bytes = words_to_be_bytes(&[1, 2, 0xabcd]);
        assert_eq!(bytes, vec![0x00, 0x01, 0x00, 0x02, 0xab, 0xcd]);
        assert_eq!(be_bytes_to_words(&bytes, 3).unwrap(), vec![1, 2, 0xabcd]);
    }

    #[test]
    fn word_count_mismatch() {
        match be_bytes_to_words(&[0, 1, 0], 2) {
            Err(ClientError::LengthMismatch { expected, got }) => {
                assert_eq!(expected, 4);
                assert_eq!(got, 3);
            }
            other => panic!("expected LengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn typed_capability_access() {
        let mut device = Device::new("X-1".to_string(), Some(Box::new(Recorder::default())));
        device.register_changed(0, 1, 7);

        assert_eq!(device.capability_name(), Some("recorder"));
        let recorder = device.capability::<Recorder>().unwrap();
        assert_eq!(recorder.changes, vec![(0, 1, 7)]);

        let plain = Device::new("Y-1".to_string(), None);
        assert!(plain.capability::<Recorder>().is_none());
        assert_eq!(format!("{:?}", plain), "Device { serial: \"Y-1\", capability: None }");
    }
}
