//! Reading manifests from disk. Manifests are JSON, optionally gzip compressed.
use super::{
    Manifest,
    RegionEntry,
    Regions,
};
use flate2::bufread::GzDecoder;
use std::{
    io::Read,
    path::Path,
};
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Malformed manifest")]
    Json(#[from] serde_json::Error),
    #[error("Region `{0}` has a size that isn't a power of two")]
    BadSize(String),
    #[error("Region `{name}` starts at {origin:#x}, which is not a multiple of its size")]
    MisalignedRegion { name: String, origin: u32 },
    #[error("Region `{name}` overlaps region `{other}`")]
    Overlap { name: String, other: String },
    #[error("Register `{region}.{register}` is not word aligned")]
    Misaligned { region: String, register: String },
    #[error("Register `{region}.{register}` has width {width}, which doesn't fit a bus word")]
    BadWidth {
        region: String,
        register: String,
        width: u8,
    },
    #[error("Register `{region}.{register}` at offset {offset:#x} lies outside its region")]
    OutOfBounds {
        region: String,
        register: String,
        offset: u32,
    },
}

impl Manifest {
    /// Parse a manifest from (possibly gzipped) bytes
    /// # Errors
    /// Returns an error on bad gzip data, malformed JSON, or regions that couldn't have come out of
    /// a region map
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut raw = vec![];
        let bytes = if bytes.starts_with(&GZIP_MAGIC) {
            GzDecoder::new(bytes).read_to_end(&mut raw)?;
            raw.as_slice()
        } else {
            bytes
        };
        let regions: Regions = serde_json::from_slice(bytes)?;
        validate(&regions)?;
        Ok(Self {
            regions,
            md5: md5::compute(bytes).0,
        })
    }
}

/// Hold a parsed manifest to the same rules the region map enforces when it is built
fn validate(regions: &Regions) -> Result<(), Error> {
    let end = |r: &RegionEntry| u64::from(r.origin) + u64::from(r.size);
    for (i, (name, region)) in regions.iter().enumerate() {
        if !region.size.is_power_of_two() {
            return Err(Error::BadSize(name.to_string()));
        }
        if region.origin & (region.size - 1) != 0 {
            return Err(Error::MisalignedRegion {
                name: name.to_string(),
                origin: region.origin,
            });
        }
        if let Some((other, _)) = regions.iter().skip(i + 1).find(|(_, r)| {
            u64::from(r.origin) < end(region) && u64::from(region.origin) < end(r)
        }) {
            return Err(Error::Overlap {
                name: other.to_string(),
                other: name.to_string(),
            });
        }
        for (reg_name, reg) in region.registers.iter().flatten() {
            let (region_name, register) = (name.to_string(), reg_name.to_string());
            if reg.offset % 4 != 0 {
                return Err(Error::Misaligned {
                    region: region_name,
                    register,
                });
            }
            if !(1..=32).contains(&reg.width) {
                return Err(Error::BadWidth {
                    region: region_name,
                    register,
                    width: reg.width,
                });
            }
            if reg.offset >= region.size {
                return Err(Error::OutOfBounds {
                    region: region_name,
                    register,
                    offset: reg.offset,
                });
            }
        }
    }
    Ok(())
}

/// Read and parse a manifest file
/// # Errors
/// Returns errors on IO and parse failures
pub fn read_manifest_file<T>(filename: T) -> Result<Manifest, Error>
where
    T: AsRef<Path>,
{
    let bytes = std::fs::read(filename)?;
    Manifest::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        Access,
        Side,
    };
    use flate2::{
        write::GzEncoder,
        Compression,
    };
    use std::io::Write;

    const MANIFEST: &str = r#"{
  "cl_params": {
    "origin": 28672,
    "size": 32,
    "registers": {
      "cl_I": { "offset": 0, "width": 32, "access": { "owner_restricted": "supervisor" } },
      "zpos": { "offset": 20, "width": 32, "access": { "owner_restricted": "coprocessor" } }
    }
  },
  "pico0_ram": { "origin": 24576, "size": 4096 }
}"#;

    #[test]
    fn test_parse() {
        let manifest = Manifest::from_bytes(MANIFEST.as_bytes()).unwrap();
        assert_eq!(manifest.regions().len(), 2);
        let (addr, reg) = manifest.register("cl_params", "zpos").unwrap();
        assert_eq!(addr, 0x7014);
        assert_eq!(reg.access, Access::OwnerRestricted(Side::Coprocessor));
        assert_eq!(manifest.region("pico0_ram").unwrap().registers, None);
    }

    #[test]
    fn test_gzip() {
        let mut encoder = GzEncoder::new(vec![], Compression::default());
        encoder.write_all(MANIFEST.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        let plain = Manifest::from_bytes(MANIFEST.as_bytes()).unwrap();
        let gz = Manifest::from_bytes(&compressed).unwrap();
        assert_eq!(plain, gz);
    }

    #[test]
    fn test_round_trip_fingerprint() {
        let manifest = Manifest::from_bytes(MANIFEST.as_bytes()).unwrap();
        let rebuilt = Manifest::new(manifest.regions().clone()).unwrap();
        let reparsed = Manifest::from_bytes(rebuilt.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(rebuilt.md5(), reparsed.md5());
    }

    #[test]
    fn test_reject_misaligned_origin() {
        let bad = r#"{ "ram": { "origin": 2048, "size": 4096 } }"#;
        assert!(matches!(
            Manifest::from_bytes(bad.as_bytes()),
            Err(Error::MisalignedRegion { name, origin: 2048 }) if name == "ram"
        ));
    }

    #[test]
    fn test_reject_overlap() {
        let bad = r#"{
  "dac0": { "origin": 8192, "size": 16 },
  "ram": { "origin": 8192, "size": 4096 }
}"#;
        assert!(matches!(
            Manifest::from_bytes(bad.as_bytes()),
            Err(Error::Overlap { name, other }) if name == "ram" && other == "dac0"
        ));
    }

    #[test]
    fn test_reject_bad_width() {
        for width in [0, 33] {
            let bad = format!(
                r#"{{ "spi0": {{ "origin": 0, "size": 16,
                   "registers": {{ "data": {{ "offset": 0, "width": {width}, "access": "read_write" }} }} }} }}"#
            );
            assert!(matches!(
                Manifest::from_bytes(bad.as_bytes()),
                Err(Error::BadWidth { width: w, .. }) if w == width
            ));
        }
    }

    #[test]
    fn test_reject_register_outside_region() {
        // A register past the end of a region at the top of the address space
        let bad = r#"{ "top": { "origin": 4294967040, "size": 256,
          "registers": { "data": { "offset": 256, "width": 32, "access": "read_only" } } } }"#;
        assert!(matches!(
            Manifest::from_bytes(bad.as_bytes()),
            Err(Error::OutOfBounds { offset: 256, .. })
        ));
    }

    #[test]
    fn test_reject_bad_size() {
        let bad = r#"{ "ram": { "origin": 0, "size": 24 } }"#;
        assert!(matches!(
            Manifest::from_bytes(bad.as_bytes()),
            Err(Error::BadSize(name)) if name == "ram"
        ));
    }
}
