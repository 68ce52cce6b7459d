//! # sharedbus utilities
//!
//! Format-level helpers shared by the `sharedbus` control plane and its procedural macros: the
//! build manifest describing where every region and register landed, generation of host-side
//! constant headers from that manifest, the decimal fixed-point codec used for control-loop
//! constants, and a few bit-sizing helpers.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bits;
pub mod fixed_point;
pub mod header;
pub mod manifest;
