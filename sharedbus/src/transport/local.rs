//! "Local" transport where we have access to the bus through `/dev/mem`

use super::{
    byte_lane,
    Transport,
    TransportResult,
};
use memmap2::{
    MmapMut,
    MmapOptions,
};
use nix::libc::O_SYNC;
use sharedbus_utils::manifest::Manifest;
use std::{
    fs::File,
    os::unix::fs::OpenOptionsExt,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File IO error")]
    IO(#[from] std::io::Error),
    #[error("The manifest doesn't describe any regions")]
    Empty,
}

#[derive(Debug)]
/// A local connection to the bus via `/dev/mem`
pub struct Local {
    mem: MmapMut,
    base_addr: u32,
}

impl Local {
    /// Construct a new local `/dev/mem` transport mapping every region in `manifest`.
    ///
    /// Note: This requires read/write access to `/dev/mem`, and the mapping has to start on a page
    /// boundary, so the lowest region should be page aligned.
    /// # Errors
    /// Returns errors on file IO errors
    pub fn new(manifest: &Manifest) -> Result<Self, Error> {
        // Find the min and max region addrs to determine the memory space we want to map
        let base_addr = manifest
            .regions()
            .values()
            .map(|r| r.origin)
            .min()
            .ok_or(Error::Empty)?;
        let top_addr = manifest
            .regions()
            .values()
            .map(|r| u64::from(r.origin) + u64::from(r.size))
            .max()
            .ok_or(Error::Empty)?;
        let len = usize::try_from(top_addr - u64::from(base_addr)).map_err(|_| Error::Empty)?;
        let mem = File::options()
            .read(true)
            .write(true)
            .custom_flags(O_SYNC)
            .open("/dev/mem")?;
        // SAFETY: the mapping covers device memory that nothing else in this process aliases
        let mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .offset(base_addr.into())
                .map_mut(&mem)?
        };
        tracing::debug!("mapped {len:#x} bytes of /dev/mem at {base_addr:#x}");
        Ok(Self {
            mem: mmap,
            base_addr,
        })
    }

    fn offset(&self, addr: u32, n: usize) -> TransportResult<usize> {
        let offset = addr
            .checked_sub(self.base_addr)
            .ok_or(super::Error::Unmapped(addr))? as usize;
        if offset + n > self.mem.len() {
            return Err(super::Error::Unmapped(addr));
        }
        Ok(offset)
    }
}

impl Transport for Local {
    fn read_word(&mut self, addr: u32) -> TransportResult<u32> {
        if addr % 4 != 0 {
            return Err(super::Error::Misaligned(addr));
        }
        let offset = self.offset(addr, 4)?;
        // SAFETY: in bounds and 4-byte aligned, since the map is page aligned
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { std::ptr::read_volatile(self.mem.as_ptr().add(offset).cast::<u32>()) };
        Ok(value)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> TransportResult<()> {
        if addr % 4 != 0 {
            return Err(super::Error::Misaligned(addr));
        }
        let offset = self.offset(addr, 4)?;
        // SAFETY: in bounds and 4-byte aligned, since the map is page aligned
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            std::ptr::write_volatile(self.mem.as_mut_ptr().add(offset).cast::<u32>(), value);
        }
        Ok(())
    }

    fn read_byte(&mut self, addr: u32) -> TransportResult<u8> {
        let word = self.read_word(addr & !0b11)?;
        Ok(word.to_le_bytes()[byte_lane(addr) as usize])
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> TransportResult<()> {
        let offset = self.offset(addr, 1)?;
        // SAFETY: in bounds, byte accesses have no alignment requirement
        unsafe {
            std::ptr::write_volatile(self.mem.as_mut_ptr().add(offset), value);
        }
        Ok(())
    }
}
