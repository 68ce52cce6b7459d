//! The region map: named, naturally aligned, power-of-two windows of the address space.
//!
//! Because every region is aligned to its own size, decoding an address only needs to compare
//! the address and the origin above the region's size bits.

use super::bank::RegisterLayout;
use kstring::KString;
use sharedbus_utils::manifest::{
    self,
    Manifest,
    RegionEntry,
    Regions,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("A region named `{0}` already exists")]
    DuplicateRegion(String),
    #[error("Region `{name}` has size {size:#x}, which is not a power of two")]
    NotPowerOfTwo { name: String, size: u32 },
    #[error("Region `{name}` starts at {origin:#x}, which is not a multiple of its size")]
    Misaligned { name: String, origin: u32 },
    #[error("Region `{name}` overlaps region `{other}`")]
    Overlap { name: String, other: String },
}

/// One window of the address space and whatever answers inside it
#[derive(Debug, Clone)]
pub struct Region<T> {
    name: KString,
    origin: u32,
    size: u32,
    registers: Option<RegisterLayout>,
    owner: T,
}

impl<T> Region<T> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn origin(&self) -> u32 {
        self.origin
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The register layout, for regions that are register banks
    #[must_use]
    pub fn registers(&self) -> Option<&RegisterLayout> {
        self.registers.as_ref()
    }

    /// The device answering inside this region
    pub fn owner(&self) -> &T {
        &self.owner
    }

    #[must_use]
    pub fn contains(&self, addr: u32) -> bool {
        let shift = self.size.trailing_zeros();
        u64::from(addr) >> shift == u64::from(self.origin) >> shift
    }

    /// `addr` relative to the origin
    #[must_use]
    pub fn offset_of(&self, addr: u32) -> u32 {
        addr & (self.size - 1)
    }

    fn end(&self) -> u64 {
        u64::from(self.origin) + u64::from(self.size)
    }
}

/// Collects regions, checking each one as it arrives
#[derive(Debug)]
pub struct MemoryMapBuilder<T> {
    regions: Vec<Region<T>>,
}

impl<T> Default for MemoryMapBuilder<T> {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
        }
    }
}

impl<T> MemoryMapBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region of plain memory (or anything else without a register layout)
    /// # Errors
    /// Returns an error if the name is taken, or the region is badly sized, aligned or placed
    pub fn add_region(&mut self, name: &str, origin: u32, size: u32, owner: T) -> Result<(), Error> {
        self.insert(Region {
            name: KString::from_ref(name),
            origin,
            size,
            registers: None,
            owner,
        })
    }

    /// Add a register bank, sized to fit its layout
    /// # Errors
    /// See [`MemoryMapBuilder::add_region`]
    pub fn add_registers(
        &mut self,
        name: &str,
        origin: u32,
        layout: RegisterLayout,
        owner: T,
    ) -> Result<(), Error> {
        self.insert(Region {
            name: KString::from_ref(name),
            origin,
            size: layout.size(),
            registers: Some(layout),
            owner,
        })
    }

    fn insert(&mut self, region: Region<T>) -> Result<(), Error> {
        let name = region.name.to_string();
        if self.regions.iter().any(|r| r.name == region.name) {
            return Err(Error::DuplicateRegion(name));
        }
        if !region.size.is_power_of_two() {
            return Err(Error::NotPowerOfTwo {
                name,
                size: region.size,
            });
        }
        if region.origin & (region.size - 1) != 0 {
            return Err(Error::Misaligned {
                name,
                origin: region.origin,
            });
        }
        if let Some(other) = self
            .regions
            .iter()
            .find(|r| u64::from(r.origin) < region.end() && u64::from(region.origin) < r.end())
        {
            return Err(Error::Overlap {
                name,
                other: other.name.to_string(),
            });
        }
        tracing::debug!(
            "region `{name}` at {:#x}, {:#x} bytes",
            region.origin,
            region.size
        );
        self.regions.push(region);
        Ok(())
    }

    #[must_use]
    pub fn build(mut self) -> MemoryMap<T> {
        self.regions.sort_by_key(|r| r.origin);
        MemoryMap {
            regions: self.regions,
        }
    }
}

/// A finished, read-only region map
#[derive(Debug, Clone)]
pub struct MemoryMap<T> {
    regions: Vec<Region<T>>,
}

impl<T> MemoryMap<T> {
    #[must_use]
    pub fn builder() -> MemoryMapBuilder<T> {
        MemoryMapBuilder::new()
    }

    /// The region containing `addr`, if any
    #[must_use]
    pub fn decode(&self, addr: u32) -> Option<&Region<T>> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// The name of the region containing `addr`, if any
    #[must_use]
    pub fn decode_name(&self, addr: u32) -> Option<&str> {
        self.decode(addr).map(Region::name)
    }

    #[must_use]
    pub fn region(&self, name: &str) -> Option<&Region<T>> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Regions in address order
    pub fn iter(&self) -> impl Iterator<Item = &Region<T>> {
        self.regions.iter()
    }

    /// Dump the map as a build manifest
    /// # Errors
    /// Returns an error if the manifest can't be encoded
    pub fn to_manifest(&self) -> Result<Manifest, manifest::Error> {
        let regions: Regions = self
            .regions
            .iter()
            .map(|r| {
                (
                    r.name.clone(),
                    RegionEntry {
                        origin: r.origin,
                        size: r.size,
                        registers: r.registers.as_ref().map(RegisterLayout::to_entries),
                    },
                )
            })
            .collect();
        Manifest::new(regions)
    }
}
