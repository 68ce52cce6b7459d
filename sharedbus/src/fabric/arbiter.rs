//! The preemptive interface: N masters, one slave, one of them connected at a time.
//!
//! Masters that are not selected still get an answer in the same step, a zero read that is
//! acknowledged immediately, so nobody ever blocks on a peripheral they don't own. The
//! selection itself lives in a one-register control region (`master_select`) that only the
//! supervisor can reach.

use super::{
    bank::{
        self,
        RegisterBank,
        RegisterLayout,
    },
    BusRequest,
    BusResponse,
    MasterPort,
    Slave,
};
use kstring::KString;
use sharedbus_utils::{
    bits::minbits,
    manifest::Access,
};
use thiserror::Error;

/// Name of the selection register in an arbiter's control region
pub const MASTER_SELECT: &str = "master_select";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Master {index} doesn't exist, this interface has {count}")]
    NoSuchMaster { index: usize, count: usize },
    #[error("An interface needs at least one master")]
    NoMasters,
    #[error("A master named `{0}` already exists")]
    DuplicateMaster(String),
    #[error(transparent)]
    Layout(#[from] bank::Error),
}

/// Typed reference to one master of a built interface
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MasterHandle(usize);

impl MasterHandle {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct PreemptiveInterfaceBuilder<S> {
    slave: S,
    masters: Vec<KString>,
}

impl<S> PreemptiveInterfaceBuilder<S> {
    /// Add the next master. The first master added is the one connected at reset.
    /// # Errors
    /// Returns an error if the name is already taken
    pub fn add_master(&mut self, name: &str) -> Result<MasterHandle, Error> {
        if self.masters.iter().any(|m| m == name) {
            return Err(Error::DuplicateMaster(name.to_owned()));
        }
        self.masters.push(KString::from_ref(name));
        Ok(MasterHandle(self.masters.len() - 1))
    }

    /// # Errors
    /// Returns an error if no masters were added
    pub fn build(self) -> Result<PreemptiveInterface<S>, Error> {
        if self.masters.is_empty() {
            return Err(Error::NoMasters);
        }
        #[allow(clippy::cast_possible_truncation)]
        let width = minbits(self.masters.len() as u32 - 1).max(1) as u8;
        let mut control = RegisterBank::builder();
        control.add_register(MASTER_SELECT, Access::ReadWrite, width)?;
        Ok(PreemptiveInterface {
            slave: self.slave,
            masters: self.masters,
            control: control.build(),
        })
    }
}

/// A built interface. The number of masters is fixed, only the selection changes.
#[derive(Debug)]
pub struct PreemptiveInterface<S> {
    slave: S,
    masters: Vec<KString>,
    control: RegisterBank,
}

impl<S: Slave> PreemptiveInterface<S> {
    #[must_use]
    pub fn builder(slave: S) -> PreemptiveInterfaceBuilder<S> {
        PreemptiveInterfaceBuilder {
            slave,
            masters: Vec::new(),
        }
    }

    #[must_use]
    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    #[must_use]
    pub fn master_name(&self, index: usize) -> Option<&str> {
        self.masters.get(index).map(KString::as_str)
    }

    /// The currently connected master
    #[must_use]
    pub fn active_master(&self) -> usize {
        // The control bank has exactly one register, at offset 0
        self.control.read(0).map_or(0, |v| v as usize)
    }

    /// Connect `master`, effective from the next transaction
    /// # Errors
    /// Returns an error if there is no such master
    #[allow(clippy::cast_possible_truncation)]
    pub fn select(&mut self, master: usize) -> Result<(), Error> {
        if master >= self.masters.len() {
            return Err(Error::NoSuchMaster {
                index: master,
                count: self.masters.len(),
            });
        }
        self.set_selection(master as u32);
        Ok(())
    }

    fn set_selection(&mut self, master: u32) {
        let previous = self.active_master();
        self.control.transact(&BusRequest::write(0, master));
        tracing::debug!(
            "interface handed from `{}` to `{}`",
            self.master_name(previous).unwrap_or("?"),
            self.master_name(master as usize).unwrap_or("?")
        );
    }

    /// Issue `req` on behalf of `master`
    pub fn transact(&mut self, master: usize, req: &BusRequest) -> BusResponse {
        if master == self.active_master() {
            self.slave.transact(req)
        } else {
            BusResponse::NOP
        }
    }

    /// Answer a transaction on the control region. Out of range selections connect master 0.
    pub fn control(&mut self, req: &BusRequest) -> BusResponse {
        if req.write && req.addr == 0 {
            let requested = req.data & req.lane_mask();
            if requested as usize >= self.masters.len() {
                tracing::warn!(
                    "master {requested} doesn't exist, connecting `{}`",
                    self.masters[0]
                );
                self.set_selection(0);
            } else {
                self.set_selection(requested);
            }
            BusResponse::ack(0)
        } else {
            self.control.transact(req)
        }
    }

    /// Layout of the control region, for placing it in a region map
    #[must_use]
    pub fn control_layout(&self) -> &RegisterLayout {
        self.control.layout()
    }

    /// The issuing end of the bus for `master`
    pub fn port(&mut self, master: MasterHandle) -> ArbiterPort<'_, S> {
        ArbiterPort {
            interface: self,
            master: master.0,
        }
    }

    pub fn slave(&self) -> &S {
        &self.slave
    }

    pub fn slave_mut(&mut self) -> &mut S {
        &mut self.slave
    }

    /// Advance the slave, whoever is connected
    pub fn tick(&mut self) {
        self.slave.tick();
    }
}

/// A master's connection to a [`PreemptiveInterface`]
pub struct ArbiterPort<'a, S> {
    interface: &'a mut PreemptiveInterface<S>,
    master: usize,
}

impl<S: Slave> MasterPort for ArbiterPort<'_, S> {
    fn transact(&mut self, req: &BusRequest) -> BusResponse {
        self.interface.transact(self.master, req)
    }
}
