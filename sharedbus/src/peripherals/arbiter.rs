//! Ownership of arbitrated peripherals.
//!
//! Selecting a master is done by writing the `master_select` register of the arbiter's control
//! region (`<name>_pi`). [`Arbiter::acquire`] performs that write, confirms it by reading it
//! back, and returns a [`Grant`] which driver operations take as proof of ownership.

use super::{
    with_transport,
    Error,
};
use crate::{
    core::Register,
    fabric::arbiter::MASTER_SELECT,
    transport::Transport,
};
use kstring::KString;
use sharedbus_utils::manifest::Manifest;
use std::sync::{
    Mutex,
    Weak,
};

/// The master index of the supervisor on every interface
pub const SUPERVISOR: usize = 0;

#[derive(Debug)]
pub struct Arbiter<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    /// Name of the slave behind the interface
    name: KString,
    select: Register,
}

impl<T> Arbiter<T>
where
    T: Transport,
{
    /// The interface in front of the region `name`
    /// # Errors
    /// Returns an error if the manifest has no `<name>_pi.master_select`
    pub fn new(transport: Weak<Mutex<T>>, manifest: &Manifest, name: &str) -> Result<Self, Error> {
        Ok(Self {
            transport,
            name: KString::from_ref(name),
            select: Register::resolve(manifest, &format!("{name}_pi"), MASTER_SELECT)?,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The currently connected master
    /// # Errors
    /// Returns an error on bad transport
    pub fn active_master(&self) -> Result<usize, Error> {
        with_transport(&self.transport, |t| self.active_master_with(t))
    }

    pub(crate) fn active_master_with(&self, transport: &mut T) -> Result<usize, Error> {
        Ok(self.select.get(transport)? as usize)
    }

    /// Connect `master` to the peripheral
    /// # Errors
    /// Returns [`Error::NotOwner`] if the interface didn't take the selection, e.g. because
    /// `master` doesn't exist
    pub fn acquire(&self, master: usize) -> Result<Grant<'_, T>, Error> {
        with_transport(&self.transport, |t| self.acquire_with(t, master))
    }

    pub(crate) fn acquire_with(
        &self,
        transport: &mut T,
        master: usize,
    ) -> Result<Grant<'_, T>, Error> {
        let value =
            u32::try_from(master).map_err(|_| Error::OutOfRange(format!("master {master}")))?;
        self.select.set(transport, value)?;
        let owner = self.active_master_with(transport)?;
        if owner != master {
            tracing::warn!(
                "`{}` refused master {master}, master {owner} is connected",
                self.name
            );
            return Err(Error::NotOwner {
                peripheral: self.name.to_string(),
                owner,
                requester: master,
            });
        }
        tracing::debug!("`{}` handed to master {master}", self.name);
        Ok(Grant {
            arbiter: self,
            master,
        })
    }

    /// Check that `grant` was issued by this arbiter, is held by `requester`, and is still
    /// current. Only the control region is read, never the peripheral.
    pub(crate) fn check_with(
        &self,
        transport: &mut T,
        grant: &Grant<'_, T>,
        requester: usize,
    ) -> Result<(), Error> {
        let owner = self.active_master_with(transport)?;
        if !std::ptr::eq(grant.arbiter, self) || grant.master != requester || owner != requester {
            tracing::warn!(
                "`{}` is connected to master {owner}, refusing master {requester}",
                self.name
            );
            return Err(Error::NotOwner {
                peripheral: self.name.to_string(),
                owner,
                requester,
            });
        }
        Ok(())
    }
}

/// Proof that a master was connected to a peripheral by [`Arbiter::acquire`]
#[derive(Debug)]
pub struct Grant<'a, T> {
    arbiter: &'a Arbiter<T>,
    master: usize,
}

impl<'a, T> Grant<'a, T>
where
    T: Transport,
{
    /// The master holding this grant
    #[must_use]
    pub fn master(&self) -> usize {
        self.master
    }

    #[must_use]
    pub fn arbiter(&self) -> &'a Arbiter<T> {
        self.arbiter
    }

    /// Whether the interface is still connected to this grant's master
    /// # Errors
    /// Returns an error on bad transport
    pub fn is_current(&self) -> Result<bool, Error> {
        Ok(self.arbiter.active_master()? == self.master)
    }

    /// Give the peripheral to `master`, consuming this grant
    /// # Errors
    /// See [`Arbiter::acquire`]
    pub fn hand_off(self, master: usize) -> Result<Grant<'a, T>, Error> {
        self.arbiter.acquire(master)
    }

    pub(crate) fn hand_off_with(
        self,
        transport: &mut T,
        master: usize,
    ) -> Result<Grant<'a, T>, Error> {
        self.arbiter.acquire_with(transport, master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::testing::board;
    use std::sync::Arc;

    #[test]
    fn test_acquire() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let dac0 = Arbiter::new(Arc::downgrade(&board), &manifest, "dac0").unwrap();
        assert_eq!(dac0.active_master().unwrap(), SUPERVISOR);
        let grant = dac0.acquire(2).unwrap();
        assert_eq!(grant.master(), 2);
        assert!(grant.is_current().unwrap());
        let grant = grant.hand_off(SUPERVISOR).unwrap();
        assert_eq!(dac0.active_master().unwrap(), SUPERVISOR);
        assert_eq!(grant.arbiter().name(), "dac0");
    }

    #[test]
    fn test_no_such_master() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let dac0 = Arbiter::new(Arc::downgrade(&board), &manifest, "dac0").unwrap();
        dac0.acquire(1).unwrap();
        // Three masters only, the interface falls back to master 0
        assert!(matches!(
            dac0.acquire(3),
            Err(Error::NotOwner {
                owner: 0,
                requester: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_stale_grant() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let dac0 = Arbiter::new(Arc::downgrade(&board), &manifest, "dac0").unwrap();
        let stale = dac0.acquire(SUPERVISOR).unwrap();
        dac0.acquire(1).unwrap();
        assert!(!stale.is_current().unwrap());
        let mut guard = board.lock().unwrap();
        assert!(dac0.check_with(&mut guard, &stale, SUPERVISOR).is_err());
    }

    #[test]
    fn test_missing_interface() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        assert!(Arbiter::new(Arc::downgrade(&board), &manifest, "cl").is_err());
    }
}
