//! The shared bus itself: how regions are laid out, how registers inside them behave, and how
//! several masters take turns on one slave.
//!
//! Everything here is assembled through builders and is immutable in layout once built. The
//! bus model is transaction-level: a request is a single word access and always completes in the
//! call that issues it. Slaves with autonomous behaviour (SPI shifters, the waveform engine)
//! advance one step per [`Slave::tick`].

pub mod arbiter;
pub mod bank;
pub mod board;
pub mod control_loop;
pub mod converters;
pub mod coproc;
pub mod ram;
pub mod region;
pub mod spi;
pub mod waveform;

/// A single word access. `addr` is relative to the slave's region once it has been decoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BusRequest {
    pub addr: u32,
    pub data: u32,
    pub write: bool,
    /// Byte lane enables, bit `n` covers bits `8n..8n+8` of `data`
    pub sel: u8,
}

impl BusRequest {
    #[must_use]
    pub fn read(addr: u32) -> Self {
        Self {
            addr,
            data: 0,
            write: false,
            sel: 0b1111,
        }
    }

    #[must_use]
    pub fn write(addr: u32, data: u32) -> Self {
        Self {
            addr,
            data,
            write: true,
            sel: 0b1111,
        }
    }

    /// A write touching only the byte lanes set in `sel`
    #[must_use]
    pub fn write_lanes(addr: u32, data: u32, sel: u8) -> Self {
        Self {
            addr,
            data,
            write: true,
            sel,
        }
    }

    /// The same request at a different address
    #[must_use]
    pub fn at(self, addr: u32) -> Self {
        Self { addr, ..self }
    }

    /// `sel` expanded to a bit mask over the data word
    #[must_use]
    pub fn lane_mask(&self) -> u32 {
        (0..4)
            .filter(|lane| self.sel & (1 << lane) != 0)
            .fold(0, |mask, lane| mask | (0xFF << (8 * lane)))
    }
}

/// The slave's answer to a [`BusRequest`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BusResponse {
    pub data: u32,
    pub ack: bool,
}

impl BusResponse {
    /// What a master that isn't connected to anything sees: zero data, acknowledged at once
    pub const NOP: Self = Self { data: 0, ack: true };

    #[must_use]
    pub fn ack(data: u32) -> Self {
        Self { data, ack: true }
    }
}

/// Anything that answers bus transactions
pub trait Slave {
    fn transact(&mut self, req: &BusRequest) -> BusResponse;

    /// Advance any autonomous behaviour by one step
    fn tick(&mut self) {}
}

/// The issuing end of a bus, as held by an autonomous master such as the waveform engine
pub trait MasterPort {
    fn transact(&mut self, req: &BusRequest) -> BusResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_mask() {
        assert_eq!(BusRequest::read(0).lane_mask(), u32::MAX);
        assert_eq!(BusRequest::write_lanes(0, 0, 0b0100).lane_mask(), 0x00FF_0000);
        assert_eq!(BusRequest::write_lanes(0, 0, 0b1001).lane_mask(), 0xFF00_00FF);
    }
}
