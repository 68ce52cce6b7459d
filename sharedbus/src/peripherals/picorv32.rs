//! Loader and debug access for the PicoRV32 co-processor.
//!
//! The core's program RAM (`<name>_ram`) sits behind an interface shared with the supervisor.
//! Loading holds the core in reset and takes the RAM, enabling hands the RAM back and releases
//! reset.

use super::{
    arbiter::{
        Arbiter,
        SUPERVISOR,
    },
    with_transport,
    Error,
};
use crate::{
    core::{
        region_bounds,
        Register,
    },
    fabric::coproc::GP_REGISTERS,
    transport::Transport,
};
use indicatif::ProgressBar;
use kstring::KString;
use sharedbus_utils::manifest::Manifest;
use std::sync::{
    Mutex,
    Weak,
};

/// What the core last reported on its debug registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSnapshot {
    pub trap: u8,
    /// Address of the last data bus access
    pub bus_addr: u32,
    /// Data of the last data bus write
    pub bus_write_data: u32,
    pub pc: u32,
    pub opcode: u32,
    /// `x1` through `x31`
    pub registers: [u32; GP_REGISTERS],
}

#[derive(Debug)]
pub struct PicoRv32<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    name: KString,
    ram: Arbiter<T>,
    ram_origin: u32,
    ram_size: u32,
    /// The core's index on the RAM's interface
    coprocessor_master: usize,
    enable: Register,
    trap: Register,
    d_adr: Register,
    d_dat_w: Register,
    dbg_insn_addr: Register,
    dbg_insn_opcode: Register,
    gp: Vec<Register>,
}

impl<T> PicoRv32<T>
where
    T: Transport,
{
    /// The core in region `name`, its debug registers in `<name>_regs` and its RAM in
    /// `<name>_ram`
    /// # Errors
    /// Returns an error if the manifest is missing any of them
    pub fn new(
        transport: Weak<Mutex<T>>,
        manifest: &Manifest,
        name: &str,
        coprocessor_master: usize,
    ) -> Result<Self, Error> {
        let reg = |r| Register::resolve(manifest, name, r);
        let regs = format!("{name}_regs");
        let ram_name = format!("{name}_ram");
        let (ram_origin, ram_size) = region_bounds(manifest, &ram_name)?;
        let gp = (1..=GP_REGISTERS)
            .map(|n| Register::resolve(manifest, &regs, &format!("x{n}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ram: Arbiter::new(transport.clone(), manifest, &ram_name)?,
            transport,
            name: KString::from_ref(name),
            ram_origin,
            ram_size,
            coprocessor_master,
            enable: reg("enable")?,
            trap: reg("trap")?,
            d_adr: reg("d_adr")?,
            d_dat_w: reg("d_dat_w")?,
            dbg_insn_addr: reg("dbg_insn_addr")?,
            dbg_insn_opcode: reg("dbg_insn_opcode")?,
            gp,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the program RAM in bytes
    #[must_use]
    pub fn ram_size(&self) -> u32 {
        self.ram_size
    }

    /// # Errors
    /// Returns an error on bad transport
    pub fn is_enabled(&self) -> Result<bool, Error> {
        with_transport(&self.transport, |t| Ok(self.enable.get(t)? == 1))
    }

    /// Write `program` to the start of the core's RAM and verify it. The core is left in reset.
    /// # Errors
    /// Returns [`Error::Running`] if the core is enabled and `force` isn't set,
    /// [`Error::TooLarge`] if the program doesn't fit, [`Error::VerifyFailed`] on the first byte
    /// that doesn't read back
    pub fn load(&self, program: &[u8], force: bool) -> Result<(), Error> {
        if program.len() > self.ram_size as usize {
            return Err(Error::TooLarge {
                len: program.len(),
                capacity: self.ram_size,
            });
        }
        with_transport(&self.transport, |t| {
            if !force && self.enable.get(t)? == 1 {
                return Err(Error::Running(self.name.to_string()));
            }
            self.enable.set(t, 0)?;
            self.ram.acquire_with(t, SUPERVISOR)?;

            let bar = ProgressBar::new(program.len() as u64);
            bar.set_message("Writing program");
            for (addr, byte) in (self.ram_origin..).zip(program) {
                t.write_byte(addr, *byte)?;
                bar.inc(1);
            }
            bar.finish();

            for (addr, byte) in (self.ram_origin..).zip(program) {
                let read = t.read_byte(addr)?;
                if read != *byte {
                    tracing::warn!("{}: program verification failed at {addr:#x}", self.name);
                    return Err(Error::VerifyFailed {
                        addr,
                        expected: *byte,
                        read,
                    });
                }
            }
            Ok(())
        })?;
        tracing::info!("{}: loaded {} byte program", self.name, program.len());
        Ok(())
    }

    /// Give the RAM to the core and release it from reset
    /// # Errors
    /// Returns an error on bad transport or if the RAM interface refuses the core
    pub fn enable(&self) -> Result<(), Error> {
        with_transport(&self.transport, |t| {
            self.ram.acquire_with(t, self.coprocessor_master)?;
            Ok(self.enable.set(t, 1)?)
        })?;
        tracing::info!("{}: enabled", self.name);
        Ok(())
    }

    /// Hold the core in reset
    /// # Errors
    /// Returns an error on bad transport
    pub fn disable(&self) -> Result<(), Error> {
        with_transport(&self.transport, |t| Ok(self.enable.set(t, 0)?))?;
        tracing::info!("{}: disabled", self.name);
        Ok(())
    }

    /// # Errors
    /// Returns an error on bad transport
    #[allow(clippy::cast_possible_truncation)]
    pub fn dump(&self) -> Result<DebugSnapshot, Error> {
        with_transport(&self.transport, |t| {
            let mut registers = [0; GP_REGISTERS];
            for (value, reg) in registers.iter_mut().zip(&self.gp) {
                *value = reg.get(t)?;
            }
            Ok(DebugSnapshot {
                trap: self.trap.get(t)? as u8,
                bus_addr: self.d_adr.get(t)?,
                bus_write_data: self.d_dat_w.get(t)?,
                pc: self.dbg_insn_addr.get(t)?,
                opcode: self.dbg_insn_opcode.get(t)?,
                registers,
            })
        })
    }
}
