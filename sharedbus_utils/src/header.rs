//! Generation of host-side register constants from a [`Manifest`].
//!
//! Code running on a co-processor cannot consult the manifest at run time, so every register of
//! every region is flattened into a `REGION_REGISTER` constant holding its absolute address.

use crate::manifest::Manifest;
use std::fmt::Write;

/// The constant name for `register` in `region`, upper case with anything that isn't
/// alphanumeric replaced by an underscore
#[must_use]
pub fn constant_name(region: &str, register: &str) -> String {
    format!("{region}_{register}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Every (constant name, absolute address) pair in the manifest, in name order. Registers
/// whose address doesn't fit the bus are left out.
#[must_use]
pub fn constants(manifest: &Manifest) -> Vec<(String, u32)> {
    let mut out = vec![];
    for (region_name, region) in manifest.regions() {
        for reg_name in region.registers.iter().flat_map(|r| r.keys()) {
            if let Some((addr, _)) = manifest.register(region_name, reg_name) {
                out.push((constant_name(region_name, reg_name), addr));
            }
        }
    }
    out
}

/// Emit a C header defining a volatile pointer for every register
#[must_use]
pub fn c_header(manifest: &Manifest) -> String {
    let mut out = String::from("#pragma once\n");
    // Writing to a String is infallible
    let _ = writeln!(out, "/* manifest md5 {} */", manifest.md5_string());
    for (name, addr) in constants(manifest) {
        let _ = writeln!(out, "#define {name} (volatile uint32_t *)0x{addr:x}");
    }
    out
}

/// Emit Rust source defining a `u32` address constant for every register
#[must_use]
pub fn rust_constants(manifest: &Manifest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "pub const MANIFEST_MD5: &str = \"{}\";", manifest.md5_string());
    for (name, addr) in constants(manifest) {
        let _ = writeln!(out, "pub const {name}: u32 = 0x{addr:x};");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
  "dac0": {
    "origin": 8192,
    "size": 32,
    "registers": {
      "arm": { "offset": 8, "width": 1, "access": "read_write" },
      "from_slave": { "offset": 12, "width": 24, "access": "read_only" }
    }
  },
  "wf0_ram": { "origin": 16384, "size": 4096 }
}"#;

    #[test]
    fn test_constant_name() {
        assert_eq!(constant_name("cl_params", "cl_I"), "CL_PARAMS_CL_I");
        assert_eq!(constant_name("pi.0", "x-1"), "PI_0_X_1");
    }

    #[test]
    fn test_c_header() {
        let manifest = Manifest::from_bytes(MANIFEST.as_bytes()).unwrap();
        let header = c_header(&manifest);
        let mut lines = header.lines();
        assert_eq!(lines.next(), Some("#pragma once"));
        assert!(lines.next().unwrap().contains(&manifest.md5_string()));
        assert_eq!(
            lines.next(),
            Some("#define DAC0_ARM (volatile uint32_t *)0x2008")
        );
        assert_eq!(
            lines.next(),
            Some("#define DAC0_FROM_SLAVE (volatile uint32_t *)0x200c")
        );
        // Regions without registers emit nothing
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_rust_constants() {
        let manifest = Manifest::from_bytes(MANIFEST.as_bytes()).unwrap();
        let src = rust_constants(&manifest);
        assert!(src.contains("pub const DAC0_ARM: u32 = 0x2008;"));
    }
}
