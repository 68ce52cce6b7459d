//! The control loop: a command RPC for its parameters, and the parameter block it shares with
//! the co-processor.
//!
//! An RPC writes the 64-bit word and the opcode, raises `start_cmd`, waits for `finish_cmd`,
//! reads the 64-bit answer and drops `start_cmd` again. Every command answers with the current
//! value of its parameter; setting [`WRITE_BIT`] on the opcode writes it first.

pub use crate::fabric::control_loop::{
    Command,
    WRITE_BIT,
};

use super::{
    register::SoftwareRegister,
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
use fixed::{
    types::extra::U43,
    FixedI64,
};
use kstring::KString;
use sharedbus_utils::{
    fixed_point::{
        fixed_to_string,
        string_to_fixed,
    },
    manifest::{
        Manifest,
        Side,
    },
};
use std::sync::{
    Mutex,
    Weak,
};

/// Fractional bits of the loop's gains
pub const GAIN_FRACBITS: u32 = 43;

/// A proportional or integral gain
pub type Gain = FixedI64<U43>;

/// Parse a decimal string into a gain, exactly as far as 43 fractional bits allow
/// # Errors
/// Returns an error if `s` isn't a decimal number or doesn't fit a gain
pub fn parse_gain(s: &str) -> Result<Gain, Error> {
    let bits = string_to_fixed(s, GAIN_FRACBITS)?;
    let bits = i64::try_from(bits).map_err(|_| Error::OutOfRange(format!("gain {s}")))?;
    Ok(Gain::from_bits(bits))
}

/// # Errors
/// Never in practice, every gain has a decimal expansion
pub fn gain_to_string(gain: Gain) -> Result<String, Error> {
    Ok(fixed_to_string(i128::from(gain.to_bits()), GAIN_FRACBITS)?)
}

#[derive(Debug)]
pub struct ControlLoop<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    name: KString,
    cmd: Register,
    word_in_hi: Register,
    word_in_lo: Register,
    start_cmd: Register,
    word_out_hi: Register,
    word_out_lo: Register,
    finish_cmd: Register,
    in_loop: Register,
    poll: PollLimit,
}

impl<T> ControlLoop<T>
where
    T: Transport,
{
    /// The command block in region `name`
    /// # Errors
    /// Returns an error if the manifest is missing any of its registers
    pub fn new(transport: Weak<Mutex<T>>, manifest: &Manifest, name: &str) -> Result<Self, Error> {
        let reg = |r| Register::resolve(manifest, name, r);
        Ok(Self {
            transport,
            name: KString::from_ref(name),
            cmd: reg("cmd")?,
            word_in_hi: reg("word_in_hi")?,
            word_in_lo: reg("word_in_lo")?,
            start_cmd: reg("start_cmd")?,
            word_out_hi: reg("word_out_hi")?,
            word_out_lo: reg("word_out_lo")?,
            finish_cmd: reg("finish_cmd")?,
            in_loop: reg("in_loop")?,
            poll: PollLimit::default(),
        })
    }

    #[must_use]
    pub fn with_poll_limit(mut self, poll: PollLimit) -> Self {
        self.poll = poll;
        self
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn rpc(&self, opcode: u8, value: i64) -> Result<i64, Error> {
        let word = value as u64;
        let answer = with_transport(&self.transport, |t| {
            self.word_in_hi.set(t, (word >> 32) as u32)?;
            self.word_in_lo.set(t, word as u32)?;
            self.cmd.set(t, u32::from(opcode))?;
            self.start_cmd.set(t, 1)?;
            self.poll.wait("finish_cmd", || -> Result<bool, Error> {
                Ok(self.finish_cmd.get(t)? == 1)
            })?;
            let hi = self.word_out_hi.get(t)?;
            let lo = self.word_out_lo.get(t)?;
            self.start_cmd.set(t, 0)?;
            self.poll.wait("finish_cmd release", || -> Result<bool, Error> {
                Ok(self.finish_cmd.get(t)? == 0)
            })?;
            Ok((u64::from(hi) << 32) | u64::from(lo))
        })? as i64;
        tracing::debug!("{}: command {opcode:#04x}({value}) -> {answer}", self.name);
        Ok(answer)
    }

    /// Set a parameter, returning the value the loop now holds
    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn write(&self, command: Command, value: i64) -> Result<i64, Error> {
        self.rpc(WRITE_BIT | command.code(), value)
    }

    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn read(&self, command: Command) -> Result<i64, Error> {
        self.rpc(command.code(), 0)
    }

    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn set_gains(&self, proportional: Gain, integral: Gain) -> Result<(), Error> {
        self.write(Command::Proportional, proportional.to_bits())?;
        self.write(Command::Integral, integral.to_bits())?;
        Ok(())
    }

    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn gains(&self) -> Result<(Gain, Gain), Error> {
        Ok((
            Gain::from_bits(self.read(Command::Proportional)?),
            Gain::from_bits(self.read(Command::Integral)?),
        ))
    }

    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn set_setpoint(&self, setpoint: i64) -> Result<(), Error> {
        self.write(Command::Setpoint, setpoint)?;
        Ok(())
    }

    /// Start the loop, resetting its cycle count
    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn start(&self) -> Result<(), Error> {
        self.write(Command::Status, 1)?;
        tracing::info!("{}: started", self.name);
        Ok(())
    }

    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn stop(&self) -> Result<(), Error> {
        self.write(Command::Status, 0)?;
        tracing::info!("{}: stopped", self.name);
        Ok(())
    }

    /// # Errors
    /// Returns an error on bad transport
    pub fn is_running(&self) -> Result<bool, Error> {
        with_transport(&self.transport, |t| Ok(self.in_loop.get(t)? == 1))
    }

    /// Loop iterations since the loop was last started
    /// # Errors
    /// Returns an error on bad transport or if the loop doesn't answer
    pub fn cycles(&self) -> Result<i64, Error> {
        self.read(Command::Cycles)
    }
}

/// The parameter block shared by the supervisor and the co-processor. The supervisor writes the
/// gains, timing and setpoint, the co-processor writes the measured values.
#[derive(Debug)]
pub struct Parameters<T> {
    pub integral: SoftwareRegister<T, i32>,
    pub proportional: SoftwareRegister<T, i32>,
    pub delta_t: SoftwareRegister<T, u32>,
    pub setpoint: SoftwareRegister<T, i32>,
    pub z_setpoint: SoftwareRegister<T, i32>,
    pub z_position: SoftwareRegister<T, i32>,
}

impl<T> Parameters<T>
where
    T: Transport,
{
    /// The block in region `region`, accessed from `side`
    /// # Errors
    /// Returns an error if the manifest is missing any of the parameters
    pub fn new(
        transport: &Weak<Mutex<T>>,
        manifest: &Manifest,
        region: &str,
        side: Side,
    ) -> Result<Self, Error> {
        let reg = |name| SoftwareRegister::new(transport.clone(), manifest, region, name, side);
        Ok(Self {
            integral: reg("cl_I")?,
            proportional: reg("cl_P")?,
            delta_t: SoftwareRegister::new(transport.clone(), manifest, region, "deltaT", side)?,
            setpoint: reg("setpt")?,
            z_setpoint: reg("zset")?,
            z_position: reg("zpos")?,
        })
    }
}
