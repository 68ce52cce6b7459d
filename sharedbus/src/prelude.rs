//! Prelude (helpful reexports) for this package

pub use crate::{
    core::PollLimit,
    fabric::board::Board,
    peripherals::{
        ad5791::{
            Ad5791,
            DacCoding,
        },
        arbiter::Grant,
        control_loop::{
            ControlLoop,
            Parameters,
        },
        ltc_adc::LtcAdc,
        picorv32::PicoRv32,
        waveform::Waveform,
    },
    transport::Transport,
};
pub use fixed::prelude::*;
pub use sharedbus_derive::bus_constants;
pub use sharedbus_utils::{
    fixed_point::{
        fixed_to_string,
        string_to_fixed,
    },
    manifest::{
        read_manifest_file,
        Manifest,
    },
};
