//! Register banks: a linear allocation of sub-word registers inside one region.
//!
//! Every register takes one 32-bit slot, in registration order, so the register at index `n`
//! lives at byte offset `4n`. Registers narrower than 32 bits zero-extend on read and ignore
//! bits above their width on write. A bank answers bus transactions on behalf of one or two
//! sides of the bus, and each register's [`Access`] decides which side may write it.

use super::{
    BusRequest,
    BusResponse,
    Slave,
};
use kstring::KString;
use sharedbus_utils::{
    bits::{
        round_up_to_pow_2,
        round_up_to_word,
        width_mask,
    },
    manifest::{
        Access,
        RegisterEntry,
        Side,
    },
};
use std::collections::BTreeMap;
use thiserror::Error;

/// Read from an unmapped offset through the supervisor port
pub const SUPERVISOR_UNMAPPED: u32 = 0x00ED_ACAF;
/// Read from an unmapped offset through the co-processor port
pub const COPROCESSOR_UNMAPPED: u32 = 0x00FA_CADE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Register `{0}` already exists in this bank")]
    DuplicateRegister(String),
    #[error("Register `{name}` is {width} bits wide, registers hold 1 to 32 bits")]
    Unsupported { name: String, width: u8 },
    #[error("Register `{name}` doesn't fit in the bank's {capacity} bytes")]
    RegisterOverflow { name: String, capacity: u32 },
    #[error("Register `{0}` is read only")]
    ReadOnlyViolation(KString),
    #[error("Register `{name}` can't be written from the {side:?} side")]
    WrongSideViolation { name: KString, side: Side },
    #[error("No register at offset {0:#x}")]
    Unmapped(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub name: KString,
    pub offset: u32,
    pub width: u8,
    pub access: Access,
}

/// The ordered registers of a bank
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterLayout {
    registers: Vec<RegisterDescriptor>,
    /// Bytes spanned by the slots, rounded up to a power of two
    size: u32,
}

impl RegisterLayout {
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.registers.iter().find(|r| r.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// The smallest power-of-two region that holds every slot, at least one word
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size.max(4)
    }

    /// The manifest view of these registers
    #[must_use]
    pub fn to_entries(&self) -> BTreeMap<KString, RegisterEntry> {
        self.registers
            .iter()
            .map(|r| {
                (
                    r.name.clone(),
                    RegisterEntry {
                        offset: r.offset,
                        width: r.width,
                        access: r.access,
                    },
                )
            })
            .collect()
    }

    fn index_of(&self, offset: u32) -> Option<usize> {
        let index = usize::try_from(offset / 4).ok()?;
        (offset % 4 == 0 && index < self.registers.len()).then_some(index)
    }
}

/// Typed reference to one register of a built bank
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegisterHandle {
    index: usize,
}

impl RegisterHandle {
    /// Byte offset of this register inside its region
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn offset(&self) -> u32 {
        self.index as u32 * 4
    }
}

#[derive(Debug, Default)]
pub struct RegisterBankBuilder {
    layout: RegisterLayout,
    capacity: Option<u32>,
}

impl RegisterBankBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder whose registers must fit in `bytes` bytes
    #[must_use]
    pub fn with_capacity(bytes: u32) -> Self {
        Self {
            layout: RegisterLayout::default(),
            capacity: Some(bytes),
        }
    }

    /// Allocate the next slot
    /// # Errors
    /// Returns an error on duplicate names, widths outside 1 to 32, or running out of capacity
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_register(
        &mut self,
        name: &str,
        access: Access,
        width: u8,
    ) -> Result<RegisterHandle, Error> {
        if width == 0 || round_up_to_word(u32::from(width)).is_err() {
            return Err(Error::Unsupported {
                name: name.to_owned(),
                width,
            });
        }
        if self.layout.get(name).is_some() {
            return Err(Error::DuplicateRegister(name.to_owned()));
        }
        let index = self.layout.registers.len();
        let offset = index as u32 * 4;
        let capacity = self.capacity.unwrap_or(u32::MAX);
        let overflow = || Error::RegisterOverflow {
            name: name.to_owned(),
            capacity,
        };
        let end = offset.checked_add(4).filter(|end| *end <= capacity).ok_or_else(overflow)?;
        self.layout.size = round_up_to_pow_2(end).map_err(|_| overflow())?;
        self.layout.registers.push(RegisterDescriptor {
            name: KString::from_ref(name),
            offset,
            width,
            access,
        });
        Ok(RegisterHandle { index })
    }

    #[must_use]
    pub fn build(self) -> RegisterBank {
        let values = vec![0; self.layout.len()];
        RegisterBank {
            layout: self.layout,
            values,
        }
    }
}

/// A built bank: the layout is fixed, only register values change
#[derive(Debug, Clone)]
pub struct RegisterBank {
    layout: RegisterLayout,
    values: Vec<u32>,
}

impl RegisterBank {
    #[must_use]
    pub fn builder() -> RegisterBankBuilder {
        RegisterBankBuilder::new()
    }

    #[must_use]
    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    /// Read the register at `offset`
    /// # Errors
    /// Returns an error if no register lives there
    pub fn read(&self, offset: u32) -> Result<u32, Error> {
        self.layout
            .index_of(offset)
            .map(|i| self.values[i])
            .ok_or(Error::Unmapped(offset))
    }

    /// Write the register at `offset` on behalf of `requester`
    /// # Errors
    /// Returns an error if no register lives there or `requester` may not write it
    pub fn write(&mut self, offset: u32, value: u32, requester: Side) -> Result<(), Error> {
        self.write_masked(offset, value, u32::MAX, requester)
    }

    fn write_masked(
        &mut self,
        offset: u32,
        value: u32,
        lanes: u32,
        requester: Side,
    ) -> Result<(), Error> {
        let index = self.layout.index_of(offset).ok_or(Error::Unmapped(offset))?;
        let reg = &self.layout.registers[index];
        match reg.access {
            _ if reg.access.writable_by(requester) => {}
            Access::ReadOnly => return Err(Error::ReadOnlyViolation(reg.name.clone())),
            _ => {
                return Err(Error::WrongSideViolation {
                    name: reg.name.clone(),
                    side: requester,
                })
            }
        }
        let mask = lanes & width_mask(reg.width);
        self.values[index] = (self.values[index] & !mask) | (value & mask);
        Ok(())
    }

    /// The current value of a register, as the hardware behind the bank sees it
    #[must_use]
    pub fn value(&self, handle: RegisterHandle) -> u32 {
        self.values[handle.index]
    }

    /// Set a register from the hardware side, regardless of its bus access discipline
    pub fn drive(&mut self, handle: RegisterHandle, value: u32) {
        let width = self.layout.registers[handle.index].width;
        self.values[handle.index] = value & width_mask(width);
    }

    /// Answer a bus transaction arriving through `side`'s port. Rejected writes are acknowledged
    /// and dropped, unmapped reads return the port's sentinel.
    pub fn transact_from(&mut self, side: Side, req: &BusRequest) -> BusResponse {
        if req.write {
            if let Err(e) = self.write_masked(req.addr, req.data, req.lane_mask(), side) {
                tracing::warn!("dropped bus write: {e}");
            }
            BusResponse::ack(0)
        } else {
            BusResponse::ack(self.read(req.addr).unwrap_or(match side {
                Side::Supervisor => SUPERVISOR_UNMAPPED,
                Side::Coprocessor => COPROCESSOR_UNMAPPED,
            }))
        }
    }
}

impl Slave for RegisterBank {
    fn transact(&mut self, req: &BusRequest) -> BusResponse {
        self.transact_from(Side::Supervisor, req)
    }
}

/// A dual-ported bank where every register is written by at most one side
#[derive(Debug, Clone)]
pub struct PeekPoke {
    bank: RegisterBank,
}

#[derive(Debug, Default)]
pub struct PeekPokeBuilder {
    inner: RegisterBankBuilder,
}

impl PeekPokeBuilder {
    /// Allocate the next slot, writable by `writer` or by nobody
    /// # Errors
    /// See [`RegisterBankBuilder::add_register`]
    pub fn add_register(
        &mut self,
        name: &str,
        writer: Option<Side>,
        width: u8,
    ) -> Result<RegisterHandle, Error> {
        let access = writer.map_or(Access::ReadOnly, Access::OwnerRestricted);
        self.inner.add_register(name, access, width)
    }

    #[must_use]
    pub fn build(self) -> PeekPoke {
        PeekPoke {
            bank: self.inner.build(),
        }
    }
}

impl PeekPoke {
    #[must_use]
    pub fn builder() -> PeekPokeBuilder {
        PeekPokeBuilder::default()
    }

    #[must_use]
    pub fn layout(&self) -> &RegisterLayout {
        self.bank.layout()
    }

    #[must_use]
    pub fn value(&self, handle: RegisterHandle) -> u32 {
        self.bank.value(handle)
    }

    /// The bus port facing `side`
    pub fn port(&mut self, side: Side) -> PeekPokePort<'_> {
        PeekPokePort {
            bank: &mut self.bank,
            side,
        }
    }
}

pub struct PeekPokePort<'a> {
    bank: &'a mut RegisterBank,
    side: Side,
}

impl Slave for PeekPokePort<'_> {
    fn transact(&mut self, req: &BusRequest) -> BusResponse {
        self.bank.transact_from(self.side, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_offsets() {
        let mut builder = RegisterBank::builder();
        let a = builder.add_register("a", Access::ReadWrite, 1).unwrap();
        let b = builder.add_register("b", Access::ReadOnly, 32).unwrap();
        let c = builder.add_register("c", Access::ReadWrite, 20).unwrap();
        assert_eq!((a.offset(), b.offset(), c.offset()), (0, 4, 8));
        let bank = builder.build();
        assert_eq!(bank.layout().size(), 16);
        assert_eq!(bank.layout().get("c").unwrap().offset, 8);
    }

    #[test]
    fn test_layout_size() {
        let mut builder = RegisterBank::builder();
        assert_eq!(builder.layout.size(), 4);
        let mut sizes = vec![];
        for name in ["a", "b", "c", "d", "e"] {
            builder.add_register(name, Access::ReadWrite, 32).unwrap();
            sizes.push(builder.layout.size());
        }
        assert_eq!(sizes, [4, 8, 16, 16, 32]);
    }

    #[test]
    fn test_builder_errors() {
        let mut builder = RegisterBankBuilder::with_capacity(8);
        builder.add_register("a", Access::ReadWrite, 8).unwrap();
        assert_eq!(
            builder.add_register("a", Access::ReadWrite, 8),
            Err(Error::DuplicateRegister("a".to_owned()))
        );
        assert_eq!(
            builder.add_register("wide", Access::ReadWrite, 33),
            Err(Error::Unsupported {
                name: "wide".to_owned(),
                width: 33
            })
        );
        assert!(builder.add_register("empty", Access::ReadWrite, 0).is_err());
        builder.add_register("b", Access::ReadWrite, 8).unwrap();
        assert_eq!(
            builder.add_register("c", Access::ReadWrite, 8),
            Err(Error::RegisterOverflow {
                name: "c".to_owned(),
                capacity: 8
            })
        );
    }

    #[test]
    fn test_discipline() {
        let mut builder = RegisterBank::builder();
        let status = builder.add_register("status", Access::ReadOnly, 8).unwrap();
        let ctrl = builder.add_register("ctrl", Access::ReadWrite, 4).unwrap();
        let mut bank = builder.build();
        bank.drive(status, 0x1FF);
        assert_eq!(bank.value(status), 0xFF);
        assert!(matches!(
            bank.write(0, 1, Side::Supervisor),
            Err(Error::ReadOnlyViolation(_))
        ));
        assert_eq!(bank.read(0).unwrap(), 0xFF);
        // Narrow registers drop high bits and zero extend
        bank.write(ctrl.offset(), 0xFFFF_FFFF, Side::Supervisor).unwrap();
        assert_eq!(bank.read(4).unwrap(), 0xF);
        assert_eq!(bank.read(8), Err(Error::Unmapped(8)));
        assert_eq!(bank.read(2), Err(Error::Unmapped(2)));
    }

    #[test]
    fn test_byte_lanes() {
        let mut builder = RegisterBank::builder();
        builder.add_register("word", Access::ReadWrite, 32).unwrap();
        let mut bank = builder.build();
        bank.transact(&BusRequest::write(0, 0x1122_3344));
        bank.transact(&BusRequest::write_lanes(0, 0xAABB_CCDD, 0b0010));
        assert_eq!(bank.transact(&BusRequest::read(0)).data, 0x1122_CC44);
    }

    #[test]
    fn test_sentinels() {
        let mut builder = PeekPoke::builder();
        builder.add_register("x", None, 32).unwrap();
        let mut pp = builder.build();
        assert_eq!(
            pp.port(Side::Supervisor).transact(&BusRequest::read(0x40)),
            BusResponse::ack(SUPERVISOR_UNMAPPED)
        );
        assert_eq!(
            pp.port(Side::Coprocessor).transact(&BusRequest::read(0x40)),
            BusResponse::ack(COPROCESSOR_UNMAPPED)
        );
    }

    #[test]
    fn test_peek_poke() {
        let mut builder = PeekPoke::builder();
        let setpt = builder
            .add_register("setpt", Some(Side::Supervisor), 32)
            .unwrap();
        let zpos = builder
            .add_register("zpos", Some(Side::Coprocessor), 32)
            .unwrap();
        let mut pp = builder.build();

        // Supervisor writes, co-processor reads
        pp.port(Side::Supervisor)
            .transact(&BusRequest::write(setpt.offset(), 1234));
        pp.port(Side::Coprocessor)
            .transact(&BusRequest::write(setpt.offset(), 99));
        assert_eq!(
            pp.port(Side::Coprocessor)
                .transact(&BusRequest::read(setpt.offset()))
                .data,
            1234
        );

        // And the other way around
        pp.port(Side::Coprocessor)
            .transact(&BusRequest::write(zpos.offset(), 77));
        pp.port(Side::Supervisor)
            .transact(&BusRequest::write(zpos.offset(), 1));
        assert_eq!(pp.value(zpos), 77);
        assert_eq!(
            pp.layout().get("zpos").unwrap().access,
            Access::OwnerRestricted(Side::Coprocessor)
        );
    }

    proptest! {
        #[test]
        fn prop_read_only_never_changes(
            writes in proptest::collection::vec((0u32..3, any::<u32>(), any::<bool>()), 0..64)
        ) {
            let mut builder = PeekPoke::builder();
            let locked = builder.add_register("locked", None, 32).unwrap();
            builder.add_register("a", Some(Side::Supervisor), 32).unwrap();
            builder.add_register("b", Some(Side::Coprocessor), 32).unwrap();
            let mut pp = builder.build();
            for (index, value, supervisor) in writes {
                let side = if supervisor { Side::Supervisor } else { Side::Coprocessor };
                pp.port(side).transact(&BusRequest::write(index * 4, value));
            }
            prop_assert_eq!(pp.value(locked), 0);
        }
    }
}
