//! The co-processor's control and debug banks.
//!
//! Instruction execution is outside this model: the core only comes out of reset, fetches its
//! first instruction through its RAM port, and reports what it saw on the debug registers.
//! Tests can inject traps, bus activity and register contents through the `inject_*` methods.

use super::{
    bank::{
        self,
        RegisterBank,
        RegisterHandle,
    },
    BusRequest,
    BusResponse,
    MasterPort,
};
use sharedbus_utils::manifest::{
    Access,
    Side,
};

/// Where the core starts fetching after reset, in its own view of the bus
pub const RESET_VECTOR: u32 = 0x10000;

/// Number of debug-visible general purpose registers, `x1` through `x31`
pub const GP_REGISTERS: usize = 31;

#[derive(Debug, Clone)]
pub struct Coprocessor {
    control: RegisterBank,
    debug: RegisterBank,
    was_enabled: bool,
    enable: RegisterHandle,
    trap: RegisterHandle,
    d_adr: RegisterHandle,
    d_dat_w: RegisterHandle,
    dbg_insn_addr: RegisterHandle,
    dbg_insn_opcode: RegisterHandle,
    gp: Vec<RegisterHandle>,
}

impl Coprocessor {
    /// # Errors
    /// Never in practice, the layout is fixed
    pub fn new() -> Result<Self, bank::Error> {
        let mut control = RegisterBank::builder();
        let enable = control.add_register("enable", Access::ReadWrite, 1)?;
        let trap = control.add_register("trap", Access::ReadOnly, 8)?;
        let d_adr = control.add_register("d_adr", Access::ReadOnly, 32)?;
        let d_dat_w = control.add_register("d_dat_w", Access::ReadOnly, 32)?;
        let dbg_insn_addr = control.add_register("dbg_insn_addr", Access::ReadOnly, 32)?;
        let dbg_insn_opcode = control.add_register("dbg_insn_opcode", Access::ReadOnly, 32)?;
        let mut debug = RegisterBank::builder();
        let gp = (1..=GP_REGISTERS)
            .map(|n| debug.add_register(&format!("x{n}"), Access::ReadOnly, 32))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            control: control.build(),
            debug: debug.build(),
            was_enabled: false,
            enable,
            trap,
            d_adr,
            d_dat_w,
            dbg_insn_addr,
            dbg_insn_opcode,
            gp,
        })
    }

    #[must_use]
    pub fn control_bank(&self) -> &RegisterBank {
        &self.control
    }

    #[must_use]
    pub fn debug_bank(&self) -> &RegisterBank {
        &self.debug
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.control.value(self.enable) == 1
    }

    pub fn control_transact(&mut self, req: &BusRequest) -> BusResponse {
        self.control.transact_from(Side::Supervisor, req)
    }

    pub fn debug_transact(&mut self, req: &BusRequest) -> BusResponse {
        self.debug.transact_from(Side::Supervisor, req)
    }

    /// Latch a trap code, as the core does on an illegal instruction or bus error
    pub fn inject_trap(&mut self, code: u8) {
        self.control.drive(self.trap, code.into());
    }

    /// Record a data bus write by the core
    pub fn inject_bus_write(&mut self, addr: u32, data: u32) {
        self.control.drive(self.d_adr, addr);
        self.control.drive(self.d_dat_w, data);
    }

    /// Set general purpose register `x{n}`. `x0` is hardwired to zero and ignored.
    pub fn inject_register(&mut self, n: usize, value: u32) {
        if let Some(handle) = n.checked_sub(1).and_then(|i| self.gp.get(i)) {
            self.debug.drive(*handle, value);
        }
    }

    /// Advance one step. Coming out of reset the core fetches from the reset vector.
    pub fn tick(&mut self, ram: &mut impl MasterPort) {
        let enabled = self.is_enabled();
        if enabled && !self.was_enabled {
            // The RAM is the first thing in the core's own address map
            let opcode = ram.transact(&BusRequest::read(0)).data;
            self.control.drive(self.dbg_insn_addr, RESET_VECTOR);
            self.control.drive(self.dbg_insn_opcode, opcode);
            tracing::debug!("co-processor out of reset, first opcode {opcode:#010x}");
        } else if !enabled && self.was_enabled {
            self.control.drive(self.trap, 0);
            for handle in &self.gp {
                self.debug.drive(*handle, 0);
            }
        }
        self.was_enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{
        ram::Ram,
        Slave,
    };

    struct Direct<'a>(&'a mut Ram);

    impl MasterPort for Direct<'_> {
        fn transact(&mut self, req: &BusRequest) -> BusResponse {
            self.0.transact(req)
        }
    }

    #[test]
    fn test_reset_fetch() {
        let mut ram = Ram::new(0x100);
        ram.transact(&BusRequest::write(0, 0x0000_0013));
        let mut core = Coprocessor::new().unwrap();
        assert_eq!(core.debug_bank().layout().len(), GP_REGISTERS);
        assert_eq!(core.debug_bank().layout().size(), 0x80);
        core.control_transact(&BusRequest::write(0, 1));
        core.tick(&mut Direct(&mut ram));
        let addr = core.control_bank().layout().get("dbg_insn_addr").unwrap().offset;
        let opcode = core.control_bank().layout().get("dbg_insn_opcode").unwrap().offset;
        assert_eq!(core.control_transact(&BusRequest::read(addr)).data, RESET_VECTOR);
        assert_eq!(core.control_transact(&BusRequest::read(opcode)).data, 0x13);
    }

    #[test]
    fn test_injection() {
        let mut core = Coprocessor::new().unwrap();
        core.inject_register(0, 5);
        core.inject_register(31, 7);
        core.inject_register(32, 9);
        assert_eq!(core.debug_transact(&BusRequest::read(30 * 4)).data, 7);
        core.inject_trap(3);
        let trap = core.control_bank().layout().get("trap").unwrap().offset;
        assert_eq!(core.control_transact(&BusRequest::read(trap)).data, 3);
        // Trap registers are driven by the core only
        core.control_transact(&BusRequest::write(trap, 0));
        assert_eq!(core.control_transact(&BusRequest::read(trap)).data, 3);
    }
}
