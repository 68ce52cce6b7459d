//! The host side of the SPI arm/finish handshake

use super::{
    arbiter::{
        Arbiter,
        Grant,
        SUPERVISOR,
    },
    with_transport,
    Error,
};
use crate::{
    core::{
        PollLimit,
        Register,
    },
    transport::Transport,
};
pub use crate::fabric::spi::SessionState;
use kstring::KString;
use sharedbus_utils::manifest::Manifest;
use std::sync::{
    Mutex,
    Weak,
};

/// An SPI master behind a preemptive interface
#[derive(Debug)]
pub struct Spi<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    name: KString,
    arbiter: Arbiter<T>,
    ready_to_arm: Register,
    finished: Register,
    arm: Register,
    from_slave: Register,
    to_slave: Register,
    poll: PollLimit,
}

impl<T> Spi<T>
where
    T: Transport,
{
    /// The SPI master in region `name`, with its interface at `<name>_pi`
    /// # Errors
    /// Returns an error if the manifest is missing any of the master's registers
    pub fn new(transport: Weak<Mutex<T>>, manifest: &Manifest, name: &str) -> Result<Self, Error> {
        let reg = |r| Register::resolve(manifest, name, r);
        Ok(Self {
            arbiter: Arbiter::new(transport.clone(), manifest, name)?,
            transport,
            name: KString::from_ref(name),
            ready_to_arm: reg("ready_to_arm")?,
            finished: reg("finished")?,
            arm: reg("arm")?,
            from_slave: reg("from_slave")?,
            to_slave: reg("to_slave")?,
            poll: PollLimit::default(),
        })
    }

    /// Bound the handshake's busy-waits differently
    #[must_use]
    pub fn with_poll_limit(mut self, poll: PollLimit) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn arbiter(&self) -> &Arbiter<T> {
        &self.arbiter
    }

    /// Connect `master` to this SPI master
    /// # Errors
    /// See [`Arbiter::acquire`]
    pub fn acquire(&self, master: usize) -> Result<Grant<'_, T>, Error> {
        self.arbiter.acquire(master)
    }

    /// Shift one frame out and return the frame shifted in
    /// # Errors
    /// Returns [`Error::NotOwner`] without touching the peripheral if `grant` isn't the
    /// supervisor's current grant on this interface, [`Error::Timeout`] if the handshake stalls
    pub fn send(&self, grant: &Grant<'_, T>, word: u32) -> Result<u32, Error> {
        with_transport(&self.transport, |t| self.send_with(t, grant, word))
    }

    pub(crate) fn send_with(
        &self,
        transport: &mut T,
        grant: &Grant<'_, T>,
        word: u32,
    ) -> Result<u32, Error> {
        self.arbiter.check_with(transport, grant, SUPERVISOR)?;
        self.arm.set(transport, 0)?;
        self.poll.wait("ready_to_arm", || -> Result<bool, Error> {
            Ok(self.ready_to_arm.get(transport)? == 1)
        })?;
        self.to_slave.set(transport, word)?;
        self.arm.set(transport, 1)?;
        self.poll.wait("finished", || -> Result<bool, Error> {
            Ok(self.finished.get(transport)? == 1)
        })?;
        let received = self.from_slave.get(transport)?;
        self.arm.set(transport, 0)?;
        tracing::debug!("{}: sent {word:#x}, received {received:#x}", self.name);
        Ok(received)
    }

    /// Where the master is in its handshake, as far as the bus shows it
    /// # Errors
    /// Returns an error on bad transport
    pub fn session_state(&self) -> Result<SessionState, Error> {
        with_transport(&self.transport, |t| {
            Ok(
                match (self.finished.get(t)? == 1, self.arm.get(t)? == 1) {
                    (true, _) => SessionState::Finished,
                    (false, true) => SessionState::Armed,
                    (false, false) => SessionState::Idle,
                },
            )
        })
    }
}
