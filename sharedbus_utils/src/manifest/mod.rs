//! The build manifest: where every region and register of a gateware build ended up.
//!
//! The manifest is produced when the region map is assembled and consumed, read-only, by host
//! drivers and by code generation for the co-processor side.

use kstring::KString;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

pub mod json;

pub use json::{
    read_manifest_file,
    Error,
};

/// One of the two bus ports of a dual-ported register bank
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The supervisory processor (the main CPU running the host drivers)
    Supervisor,
    /// A real-time co-processor
    Coprocessor,
}

impl Side {
    /// The other party
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Side::Supervisor => Side::Coprocessor,
            Side::Coprocessor => Side::Supervisor,
        }
    }
}

/// The access discipline of a single register
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Driven by hardware, nobody can write it over the bus
    ReadOnly,
    /// Anyone on the bus can write it
    ReadWrite,
    /// Only the given side can write it, the other side can only read it
    OwnerRestricted(Side),
}

impl Access {
    /// Whether a write from `side` is allowed
    #[must_use]
    pub fn writable_by(self, side: Side) -> bool {
        match self {
            Access::ReadOnly => false,
            Access::ReadWrite => true,
            Access::OwnerRestricted(owner) => owner == side,
        }
    }
}

/// A register inside a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEntry {
    /// Byte offset from the region origin, always a multiple of 4
    pub offset: u32,
    /// Number of significant bits, 1 to 32
    pub width: u8,
    pub access: Access,
}

/// A region as allocated by the gateware build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub origin: u32,
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registers: Option<BTreeMap<KString, RegisterEntry>>,
}

/// Map from region name to its allocation
pub type Regions = BTreeMap<KString, RegionEntry>;

/// A parsed build manifest along with the hash of the bytes it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    regions: Regions,
    md5: [u8; 16],
}

impl Manifest {
    /// Build a manifest from a set of regions, fingerprinting its canonical JSON encoding
    /// # Errors
    /// Returns an error if the regions can't be encoded
    pub fn new(regions: Regions) -> Result<Self, Error> {
        let md5 = md5::compute(serde_json::to_vec_pretty(&regions)?).0;
        Ok(Self { regions, md5 })
    }

    /// All regions, ordered by name
    #[must_use]
    pub fn regions(&self) -> &Regions {
        &self.regions
    }

    /// Look up a region by name
    #[must_use]
    pub fn region(&self, name: &str) -> Option<&RegionEntry> {
        self.regions.get(name)
    }

    /// The absolute address and descriptor of `register` in `region`. `None` if either is
    /// missing or the address doesn't fit the bus.
    #[must_use]
    pub fn register(&self, region: &str, register: &str) -> Option<(u32, &RegisterEntry)> {
        let entry = self.regions.get(region)?;
        let reg = entry.registers.as_ref()?.get(register)?;
        Some((entry.origin.checked_add(reg.offset)?, reg))
    }

    /// Hash of the manifest bytes, used to check that host code and gateware agree
    #[must_use]
    pub fn md5(&self) -> &[u8; 16] {
        &self.md5
    }

    /// Get a string representation of the MD5 hash
    #[must_use]
    pub fn md5_string(&self) -> String {
        self.md5.iter().map(|v| format!("{v:02x}")).collect()
    }

    /// Encode the manifest as pretty-printed JSON
    /// # Errors
    /// Returns an error if encoding fails
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&self.regions)?)
    }
}
