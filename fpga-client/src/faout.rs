//! Analog output boards, serials starting with `FAOUT`.
//!
//! The board exposes a command/status register block, a sample SDRAM, six DAC channels
//! and an interpolator per channel:
//!
//! | addr | port  | content                              |
//! |------|-------|--------------------------------------|
//! | 0    | 0     | command (write only, one bit each)   |
//! | 0    | 1     | status                               |
//! | 0    | 2     | config                               |
//! | 0    | 3     | firmware version                     |
//! | 1    | 0..=3 | SDRAM read/write pointers (low/high) |
//! | 1    | 4     | SDRAM data                           |
//! | 2    | 0..6  | DAC value                            |
//! | 3    | 0..6  | interpolator target value            |
//! | 3    | 6..12 | interpolator steps                   |
use std::fmt::Display;

use crate::{
    capability::{Capability, register_capability},
    device::RegisterAccess,
    error::ClientError,
};

pub const PREFIX: &str = "FAOUT";

pub const SDRAM_MAX_ADDR: u32 = (1 << 23) - 1;
pub const CHANNELS: u8 = 6;

pub const ADDR_REGS: u8 = 0;
pub const REG_CMD: u8 = 0;
pub const REG_STATUS: u8 = 1;
pub const REG_CONFIG: u8 = 2;
pub const REG_VERSION: u8 = 3;

pub const ADDR_SDRAM: u8 = 1;
pub const SDRAM_DATA_PORT: u8 = 4;
pub const ADDR_DAC: u8 = 2;
pub const ADDR_INTERP: u8 = 3;

const CMD_RESET: u16 = 1 << 0;
const CMD_SEQUENCE_START: u16 = 1 << 1;
const CMD_SEQUENCE_STOP: u16 = 1 << 2;
const CMD_SEQUENCE_HOLD: u16 = 1 << 3;
const CMD_SEQUENCE_ARM: u16 = 1 << 4;
const CMD_SDRAM_REWIND: u16 = 1 << 5;
const CMD_SDRAM_CLEAR: u16 = 1 << 6;

const CONFIG_CLOCK_EXTERN: u8 = 0;

/// Decoded status register.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FaoutStatus {
    /// Sequencer state, the lowest three bits.
    pub state: u8,
    pub running: bool,
    pub fifo_full: bool,
    pub fifo_empty: bool,
    pub sdram_empty: bool,
    pub sdram_full: bool,
    pub seq_error: bool,
    pub comm_error: bool,
    pub clk_ext_valid: bool,
    pub clk_ext_selected: bool,
}

impl From<u16> for FaoutStatus {
    fn from(value: u16) -> Self {
        let bit = |n: u16| value & (1 << n) != 0;
        FaoutStatus {
            state: (value & 0x7) as u8,
            running: bit(3),
            fifo_full: bit(4),
            fifo_empty: bit(5),
            sdram_empty: bit(6),
            sdram_full: bit(7),
            seq_error: bit(8),
            comm_error: bit(9),
            clk_ext_valid: bit(10),
            clk_ext_selected: bit(11),
        }
    }
}

impl Display for FaoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "state={}", self.state)?;
        let flags = [
            (self.running, "running"),
            (self.fifo_full, "fifo_full"),
            (self.fifo_empty, "fifo_empty"),
            (self.sdram_empty, "sdram_empty"),
            (self.sdram_full, "sdram_full"),
            (self.seq_error, "seq_error"),
            (self.comm_error, "comm_error"),
            (self.clk_ext_valid, "clk_ext_valid"),
            (self.clk_ext_selected, "clk_ext_selected"),
        ];
        for (_, name) in flags.iter().filter(|(set, _)| *set) {
            write!(f, " {}", name)?;
        }
        Ok(())
    }
}

/// Capability state of a FAOUT board.
///
/// Tracks the status register from the register-changed events the server sends.
#[derive(Debug, Default)]
pub struct Faout {
    last_status: Option<FaoutStatus>,
}

impl Faout {
    pub fn factory(_serial: &str) -> Box<dyn Capability> {
        Box::new(Faout::default())
    }

    /// Makes every client without its own capability table recognise FAOUT boards.
    pub fn register() {
        register_capability(PREFIX, Faout::factory);
    }

    /// The status last reported through a register-changed event.
    pub fn last_status(&self) -> Option<FaoutStatus> {
        self.last_status
    }
}

impl Capability for Faout {
    fn name(&self) -> &str {
        PREFIX
    }

    fn register_changed(&mut self, addr: u8, port: u8, value: u16) {
        if (addr, port) == (ADDR_REGS, REG_STATUS) {
            self.last_status = Some(FaoutStatus::from(value));
        }
    }
}

fn check_channel(index: u8) -> Result<(), ClientError> {
    if index >= CHANNELS {
        return Err(ClientError::InvalidArgument(format!(
            "channel {} out of range 0..{}",
            index, CHANNELS
        )));
    }
    Ok(())
}

/// Operations of a FAOUT board, available on anything with register access.
pub trait FaoutRegisters: RegisterAccess {
    fn device_status(&mut self) -> Result<FaoutStatus, ClientError> {
        Ok(FaoutStatus::from(self.read_reg(ADDR_REGS, REG_STATUS)?))
    }

    fn version(&mut self) -> Result<u16, ClientError> {
        self.read_reg(ADDR_REGS, REG_VERSION)
    }

    fn config_bit(&mut self, bit: u8) -> Result<bool, ClientError> {
        let config = self.read_reg(ADDR_REGS, REG_CONFIG)?;
        Ok(config & (1 << bit) != 0)
    }

    fn set_config_bit(&mut self, bit: u8, enabled: bool) -> Result<(), ClientError> {
        let mut config = self.read_reg(ADDR_REGS, REG_CONFIG)?;
        if enabled {
            config |= 1 << bit;
        } else {
            config &= !(1 << bit);
        }
        self.write_reg(ADDR_REGS, REG_CONFIG, config)
    }

    fn clock_extern(&mut self) -> Result<bool, ClientError> {
        self.config_bit(CONFIG_CLOCK_EXTERN)
    }

    fn set_clock_extern(&mut self, enabled: bool) -> Result<(), ClientError> {
        self.set_config_bit(CONFIG_CLOCK_EXTERN, enabled)
    }

    fn reset(&mut self) -> Result<(), ClientError> {
        self.write_reg(ADDR_REGS, REG_CMD, CMD_RESET)
    }

    fn sequence_start(&mut self) -> Result<(), ClientError> {
        self.write_reg(ADDR_REGS, REG_CMD, CMD_SEQUENCE_START)
    }

    fn sequence_stop(&mut self) -> Result<(), ClientError> {
        self.write_reg(ADDR_REGS, REG_CMD, CMD_SEQUENCE_STOP)
    }

    fn sequence_hold(&mut self) -> Result<(), ClientError> {
        self.write_reg(ADDR_REGS, REG_CMD, CMD_SEQUENCE_HOLD)
    }

    fn sequence_arm(&mut self) -> Result<(), ClientError> {
        self.write_reg(ADDR_REGS, REG_CMD, CMD_SEQUENCE_ARM)
    }

    fn sdram_rewind(&mut self) -> Result<(), ClientError> {
        self.write_reg(ADDR_REGS, REG_CMD, CMD_SDRAM_REWIND)
    }

    fn sdram_clear(&mut self) -> Result<(), ClientError> {
        self.write_reg(ADDR_REGS, REG_CMD, CMD_SDRAM_CLEAR)
    }

    /// Returns the SDRAM read and write pointers, in words.
    fn sdram_pointers(&mut self) -> Result<(u32, u32), ClientError> {
        let mut half = |port| self.read_reg(ADDR_SDRAM, port).map(u32::from);
        let read = half(1)? << 16 | half(0)?;
        let write = half(3)? << 16 | half(2)?;
        Ok((read, write))
    }

    /// Appends samples behind the write pointer.
    fn sdram_write(&mut self, data: &[u16]) -> Result<(), ClientError> {
        let (_, write) = self.sdram_pointers()?;
        let free = SDRAM_MAX_ADDR.saturating_sub(write) as usize;
        if data.len() > free {
            return Err(ClientError::InvalidArgument(format!(
                "{} words do not fit into {} free SDRAM words",
                data.len(),
                free
            )));
        }
        self.write_reg_n(ADDR_SDRAM, SDRAM_DATA_PORT, data)
    }

    /// Reads `count` samples from the read pointer on, or all that are available.
    fn sdram_read(&mut self, count: Option<usize>) -> Result<Vec<u16>, ClientError> {
        let (read, write) = self.sdram_pointers()?;
        let available = write.saturating_sub(read) as usize;
        let count = count.unwrap_or(available);
        if count > available {
            return Err(ClientError::InvalidArgument(format!(
                "{} words requested, but only {} in SDRAM",
                count, available
            )));
        }
        self.read_reg_n(ADDR_SDRAM, SDRAM_DATA_PORT, count)
    }

    fn write_dac(&mut self, index: u8, value: u16) -> Result<(), ClientError> {
        check_channel(index)?;
        self.write_reg(ADDR_DAC, index, value)
    }

    fn read_dac(&mut self, index: u8) -> Result<u16, ClientError> {
        check_channel(index)?;
        self.read_reg(ADDR_DAC, index)
    }

    /// Moves channel `index` to `value` in `steps` interpolation steps.
    fn write_interp(&mut self, index: u8, value: u16, steps: u16) -> Result<(), ClientError> {
        check_channel(index)?;
        self.write_reg(ADDR_INTERP, index + CHANNELS, steps)?;
        self.write_reg(ADDR_INTERP, index, value)
    }

    /// Returns the target value and the step count of channel `index`.
    fn read_interp(&mut self, index: u8) -> Result<(u16, u16), ClientError> {
        check_channel(index)?;
        let steps = self.read_reg(ADDR_INTERP, index + CHANNELS)?;
        let value = self.read_reg(ADDR_INTERP, index)?;
        Ok((value, steps))
    }
}

impl<R: RegisterAccess + ?Sized> FaoutRegisters for R {}
