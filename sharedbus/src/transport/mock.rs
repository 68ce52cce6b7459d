//! Mock transport implementation used in testing the interface

use super::{
    Error,
    Transport,
    TransportResult,
};
use sharedbus_utils::manifest::Manifest;
use std::collections::HashMap;

/// A platform that mocks reads and writes, useful for testing.
/// Memory is plain storage: access disciplines are not enforced here.
#[derive(Debug)]
pub struct Mock {
    memory: HashMap<u32, u8>,
}

impl Mock {
    /// Construct a new mock platform backing every region in `manifest`
    #[must_use]
    pub fn new(manifest: &Manifest) -> Self {
        Self::from_ranges(
            manifest
                .regions()
                .values()
                .map(|region| (region.origin, region.size)),
        )
    }

    /// Construct a new mock platform backing each `(origin, size)` range
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        // We'll represent each address lazily instead of having a dense array
        // but it really shouldn't matter
        let mut memory: HashMap<u32, u8> = HashMap::default();
        for (origin, size) in ranges {
            for i in 0..size {
                memory.insert(origin + i, 0u8);
            }
        }
        Self { memory }
    }

    fn byte(&self, addr: u32) -> TransportResult<u8> {
        self.memory.get(&addr).copied().ok_or(Error::Unmapped(addr))
    }
}

impl Transport for Mock {
    fn read_word(&mut self, addr: u32) -> TransportResult<u32> {
        if addr % 4 != 0 {
            return Err(Error::Misaligned(addr));
        }
        let mut bytes = [0u8; 4];
        for (i, byte) in (addr..addr + 4).zip(bytes.iter_mut()) {
            *byte = self.byte(i)?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_word(&mut self, addr: u32, value: u32) -> TransportResult<()> {
        if addr % 4 != 0 {
            return Err(Error::Misaligned(addr));
        }
        // Check the whole word first so a bad write doesn't land partially
        for i in addr..addr + 4 {
            self.byte(i)?;
        }
        for (i, byte) in (addr..addr + 4).zip(value.to_le_bytes()) {
            self.memory.insert(i, byte);
        }
        Ok(())
    }

    fn read_byte(&mut self, addr: u32) -> TransportResult<u8> {
        self.byte(addr)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> TransportResult<()> {
        self.byte(addr)?;
        self.memory.insert(addr, value);
        Ok(())
    }
}
