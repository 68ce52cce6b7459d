//! Drivers for the peripherals on the shared bus.
//!
//! Drivers hold a weak pointer to the transport, so they can be handed out freely while the
//! owner of the `Arc<Mutex<T>>` decides the transport's lifetime. Every public operation takes
//! the transport lock exactly once.

pub mod ad5791;
pub mod arbiter;
pub mod control_loop;
pub mod ltc_adc;
pub mod picorv32;
pub mod register;
pub mod spi;
pub mod waveform;

use crate::transport;
use packed_struct::PackingError;
use sharedbus_utils::fixed_point;
use std::sync::{
    Mutex,
    Weak,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Register(#[from] crate::core::Error),
    #[error(transparent)]
    Timeout(#[from] crate::core::Timeout),
    #[error("`{peripheral}` is connected to master {owner}, not master {requester}")]
    NotOwner {
        peripheral: String,
        owner: usize,
        requester: usize,
    },
    #[error("`{0}` is running, stop it first or force the operation")]
    Running(String),
    #[error("Readback mismatch at {addr:#x}: wrote {expected:#04x}, read {read:#04x}")]
    VerifyFailed { addr: u32, expected: u8, read: u8 },
    #[error("{len} bytes don't fit in {capacity} bytes of RAM")]
    TooLarge { len: usize, capacity: u32 },
    #[error("Control register wrote {written:#x} but read back {read:#x}")]
    EchoMismatch { written: u32, read: u32 },
    #[error(transparent)]
    Fixed(#[from] fixed_point::Error),
    #[error(transparent)]
    Packing(#[from] PackingError),
    #[error("{0} is out of range")]
    OutOfRange(String),
    #[error("The transport has been dropped")]
    TransportGone,
    #[error("The transport lock is poisoned")]
    Poisoned,
}

/// Registers that live at a device-side address, behind a serial interface
pub trait Address {
    fn addr() -> u8;
}

/// Run `f` with the transport locked
pub(crate) fn with_transport<T, R, F>(transport: &Weak<Mutex<T>>, f: F) -> Result<R, Error>
where
    F: FnOnce(&mut T) -> Result<R, Error>,
{
    let tarc = transport.upgrade().ok_or(Error::TransportGone)?;
    let mut transport = tarc.lock().map_err(|_| Error::Poisoned)?;
    f(&mut transport)
}
