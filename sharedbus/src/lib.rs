//! # sharedbus
//!
//! The control plane of a multi-core instrument controller. A supervisory CPU, small real-time
//! co-processors and an autonomous waveform engine take turns driving a handful of SPI
//! converters and a shared control-loop parameter block.
//!
//! - [`fabric`] describes the bus: region maps and their decoders, register banks with
//!   per-register access discipline, and the preemptive interface that connects exactly one
//!   master to a shared slave. It also contains an executable model of the standard board used
//!   by the tests and demos.
//! - [`transport`] moves words between the host and the bus (`/dev/mem`, a mock, or the model).
//! - [`peripherals`] holds the drivers. Any operation on an arbitrated peripheral requires a
//!   [`peripherals::arbiter::Grant`], obtained by writing the arbiter's select register.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod core;
pub mod fabric;
pub mod peripherals;
pub mod prelude;
pub mod transport;
