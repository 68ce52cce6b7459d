//! The core types for interacting with registers on the shared bus
use crate::transport::{
    self,
    Transport,
};
use kstring::KString;
use sharedbus_utils::{
    bits::width_mask,
    manifest::{
        Access,
        Manifest,
        Side,
    },
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error("The manifest has no region `{0}`")]
    MissingRegion(String),
    #[error("The manifest has no register `{region}.{register}`")]
    MissingRegister { region: String, register: String },
    #[error("Register `{0}` is read only")]
    ReadOnlyViolation(KString),
    #[error("Register `{register}` can only be written from the {owner:?} side")]
    WrongSideViolation { register: KString, owner: Side },
}

/// A register resolved to its absolute bus address, as seen from one side of the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// `region.register`, for error messages and logs
    pub name: KString,
    /// The absolute address of this register
    pub addr: u32,
    /// The number of significant bits
    pub width: u8,
    pub access: Access,
    /// Which side of the bus we are issuing transactions from
    pub side: Side,
}

impl Register {
    /// Resolve `region.register` from the manifest, as the supervisor
    /// # Errors
    /// Returns an error if the manifest doesn't contain the register
    pub fn resolve(manifest: &Manifest, region: &str, register: &str) -> Result<Self, Error> {
        let (addr, entry) =
            manifest
                .register(region, register)
                .ok_or_else(|| Error::MissingRegister {
                    region: region.to_owned(),
                    register: register.to_owned(),
                })?;
        Ok(Self {
            name: KString::from(format!("{region}.{register}")),
            addr,
            width: entry.width,
            access: entry.access,
            side: Side::Supervisor,
        })
    }

    /// The same register, accessed from `side`
    #[must_use]
    pub fn on_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    /// Whether a write from our side would be accepted
    /// # Errors
    /// Returns the access violation a write would cause
    pub fn check_writable(&self) -> Result<(), Error> {
        match self.access {
            _ if self.access.writable_by(self.side) => Ok(()),
            Access::OwnerRestricted(owner) => Err(Error::WrongSideViolation {
                register: self.name.clone(),
                owner,
            }),
            _ => Err(Error::ReadOnlyViolation(self.name.clone())),
        }
    }

    /// Read the register, dropping bits above its width
    /// # Errors
    /// Returns an error on bad transport
    pub fn get<T>(&self, transport: &mut T) -> Result<u32, Error>
    where
        T: Transport,
    {
        Ok(transport.read_word(self.addr)? & width_mask(self.width))
    }

    /// Write the register, checking the access discipline first. Bits above the register's width
    /// are dropped, as the gateware would.
    /// # Errors
    /// Returns an error on access violations or bad transport
    pub fn set<T>(&self, transport: &mut T, value: u32) -> Result<(), Error>
    where
        T: Transport,
    {
        if let Err(e) = self.check_writable() {
            tracing::warn!("rejected write of {value:#x} to {}", self.name);
            return Err(e);
        }
        let masked = value & width_mask(self.width);
        if masked != value {
            tracing::debug!("{} truncated {value:#x} to {masked:#x}", self.name);
        }
        transport.write_word(self.addr, masked)?;
        Ok(())
    }
}

/// The origin and size of a region, from the manifest
/// # Errors
/// Returns an error if the region doesn't exist
pub fn region_bounds(manifest: &Manifest, region: &str) -> Result<(u32, u32), Error> {
    manifest
        .region(region)
        .map(|r| (r.origin, r.size))
        .ok_or_else(|| Error::MissingRegion(region.to_owned()))
}

/// A busy-wait ran out of iterations
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Gave up waiting for {what} after {iterations} polls")]
pub struct Timeout {
    pub what: &'static str,
    pub iterations: u32,
}

/// The bound on every busy-wait handshake
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PollLimit {
    pub max_iterations: u32,
}

impl Default for PollLimit {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
        }
    }
}

impl PollLimit {
    #[must_use]
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    /// Poll `condition` until it holds, at most `max_iterations` times
    /// # Errors
    /// Returns the condition's error, or a [`Timeout`] once the bound is hit
    pub fn wait<E, F>(&self, what: &'static str, mut condition: F) -> Result<(), E>
    where
        F: FnMut() -> Result<bool, E>,
        E: From<Timeout>,
    {
        for _ in 0..self.max_iterations {
            if condition()? {
                return Ok(());
            }
        }
        tracing::warn!("timed out waiting for {what}");
        Err(Timeout {
            what,
            iterations: self.max_iterations,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::Mock;
    use sharedbus_utils::manifest::{
        RegionEntry,
        RegisterEntry,
        Regions,
    };
    use std::collections::BTreeMap;

    fn manifest() -> Manifest {
        let registers = BTreeMap::from([
            (
                "setpt".into(),
                RegisterEntry {
                    offset: 0,
                    width: 32,
                    access: Access::OwnerRestricted(Side::Supervisor),
                },
            ),
            (
                "zpos".into(),
                RegisterEntry {
                    offset: 4,
                    width: 20,
                    access: Access::OwnerRestricted(Side::Coprocessor),
                },
            ),
            (
                "version".into(),
                RegisterEntry {
                    offset: 8,
                    width: 8,
                    access: Access::ReadOnly,
                },
            ),
        ]);
        Manifest::new(Regions::from([(
            "params".into(),
            RegionEntry {
                origin: 0x100,
                size: 0x10,
                registers: Some(registers),
            },
        )]))
        .unwrap()
    }

    #[test]
    fn test_resolve() {
        let manifest = manifest();
        let reg = Register::resolve(&manifest, "params", "zpos").unwrap();
        assert_eq!(reg.addr, 0x104);
        assert_eq!(reg.name.as_str(), "params.zpos");
        assert!(matches!(
            Register::resolve(&manifest, "params", "nope"),
            Err(Error::MissingRegister { .. })
        ));
        assert_eq!(region_bounds(&manifest, "params").unwrap(), (0x100, 0x10));
    }

    #[test]
    fn test_access_discipline() {
        let manifest = manifest();
        let mut transport = Mock::new(&manifest);
        let zpos = Register::resolve(&manifest, "params", "zpos").unwrap();
        assert!(matches!(
            zpos.set(&mut transport, 1),
            Err(Error::WrongSideViolation {
                owner: Side::Coprocessor,
                ..
            })
        ));
        let zpos = zpos.on_side(Side::Coprocessor);
        zpos.set(&mut transport, 0xFFF_FFFF).unwrap();
        assert_eq!(zpos.get(&mut transport).unwrap(), 0xF_FFFF);

        let version = Register::resolve(&manifest, "params", "version").unwrap();
        assert!(matches!(
            version.set(&mut transport, 3),
            Err(Error::ReadOnlyViolation(_))
        ));
        assert_eq!(version.get(&mut transport).unwrap(), 0);
    }

    #[test]
    fn test_poll_limit() {
        let mut count = 0;
        let res: Result<(), Timeout> = PollLimit::new(5).wait("count", || {
            count += 1;
            Ok(count == 3)
        });
        assert!(res.is_ok());
        assert_eq!(count, 3);
        let res: Result<(), Timeout> = PollLimit::new(5).wait("never", || Ok(false));
        assert_eq!(
            res,
            Err(Timeout {
                what: "never",
                iterations: 5
            })
        );
    }
}
