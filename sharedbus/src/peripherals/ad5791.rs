//! Driver for the AD5791 20-bit DAC from Analog Devices.
//!
//! Every SPI frame is 24 bits: a read bit (23), a three bit register address (20..=22) and 20
//! bits of data. Reads are answered on the frame following the read command.

use super::{
    arbiter::Grant,
    spi::Spi,
    with_transport,
    Address,
    Error,
};
use crate::transport::{
    Deserialize,
    Serialize,
    Transport,
};
use packed_struct::prelude::*;
use sharedbus_derive::{
    address,
    BusSerde,
};
use sharedbus_utils::{
    bits::sign_extend,
    manifest::Manifest,
};
use std::sync::{
    Mutex,
    Weak,
};

/// Number of bits of the DAC register
pub const DAC_BITS: u8 = 20;
const DATA_MASK: u32 = (1 << DAC_BITS) - 1;
const READ: u32 = 1 << 23;
/// Most negative code
pub const LSB_MIN: i32 = -(1 << (DAC_BITS - 1));
/// Most positive code
pub const LSB_MAX: i32 = (1 << (DAC_BITS - 1)) - 1;

/// Register addresses that carry plain 20-bit data
const READBACK: u8 = 0x0;
const DAC: u8 = 0x1;
const CLEARCODE: u8 = 0x3;

/// How the DAC register codes a signed value. This also decides the control register's `BIN2sC`
/// bit, so it is fixed when the driver is built.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DacCoding {
    #[default]
    TwosComplement,
    OffsetBinary,
}

impl DacCoding {
    /// Clamp `lsb` to the DAC's range and code it for the DAC register
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn encode(self, lsb: i32) -> u32 {
        let clamped = lsb.clamp(LSB_MIN, LSB_MAX);
        match self {
            DacCoding::TwosComplement => clamped as u32 & DATA_MASK,
            DacCoding::OffsetBinary => (clamped - LSB_MIN) as u32,
        }
    }

    /// Recover the signed value from a DAC register code
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode(self, raw: u32) -> i32 {
        match self {
            DacCoding::TwosComplement => sign_extend(raw, DAC_BITS),
            DacCoding::OffsetBinary => (raw & DATA_MASK) as i32 + LSB_MIN,
        }
    }
}

#[derive(Debug, PrimitiveEnum, Default, Copy, Clone, PartialEq, Eq)]
/// Linearity compensation for the reference span
pub enum LinComp {
    #[default]
    /// Span up to 10 V
    Upto10V = 0,
    /// Span from 10 V to 12 V
    Upto12V = 9,
    /// Span from 12 V to 16 V
    Upto16V = 10,
    /// Span from 16 V to 19 V
    Upto19V = 11,
    /// Span from 19 V to 20 V
    Upto20V = 12,
}

#[derive(Debug, PackedStruct, BusSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
#[address(0x2)]
pub struct Control {
    #[packed_field(bits = "1")]
    /// Use the internal amplifier as a unity-gain buffer
    pub rbuf: bool,
    #[packed_field(bits = "2")]
    /// Clamp the output to ground through a resistor
    pub opgnd: bool,
    #[packed_field(bits = "3")]
    /// Tristate the output
    pub dactri: bool,
    #[packed_field(bits = "4")]
    /// Offset binary coding, otherwise two's complement
    pub bin2sc: bool,
    #[packed_field(bits = "5")]
    /// Disable the serial data output
    pub sdodis: bool,
    #[packed_field(bits = "6..=9", ty = "enum")]
    pub lincomp: LinComp,
}

impl Control {
    /// The state the DAC comes out of reset in
    #[must_use]
    pub fn reset_state() -> Self {
        Self {
            opgnd: true,
            dactri: true,
            ..Default::default()
        }
    }

    /// Output driven through the buffer, everything else off
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            rbuf: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, PackedStruct, BusSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
#[address(0x4)]
/// Self-clearing software commands
pub struct SwControl {
    #[packed_field(bits = "0")]
    /// Load the DAC register to the output
    pub ldac: bool,
    #[packed_field(bits = "1")]
    /// Load the clear code into the DAC register
    pub clr: bool,
    #[packed_field(bits = "2")]
    /// Return to the power-on state
    pub reset: bool,
}

fn frame(addr: u8, data: u32) -> u32 {
    (u32::from(addr) << 20) | (data & DATA_MASK)
}

/// An AD5791 behind an arbitrated SPI master
#[derive(Debug)]
pub struct Ad5791<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    spi: Spi<T>,
    coding: DacCoding,
    vref_n: f64,
    vref_p: f64,
}

impl<T> Ad5791<T>
where
    T: Transport,
{
    /// The DAC on the SPI master in region `name`, coded as `coding`, with references of ±10 V
    /// # Errors
    /// Returns an error if the manifest is missing the SPI master
    pub fn new(
        transport: Weak<Mutex<T>>,
        manifest: &Manifest,
        name: &str,
        coding: DacCoding,
    ) -> Result<Self, Error> {
        Ok(Self {
            spi: Spi::new(transport.clone(), manifest, name)?,
            transport,
            coding,
            vref_n: -10.0,
            vref_p: 10.0,
        })
    }

    /// Use different reference voltages for conversions
    #[must_use]
    pub fn with_vref(mut self, vref_n: f64, vref_p: f64) -> Self {
        self.vref_n = vref_n;
        self.vref_p = vref_p;
        self
    }

    #[must_use]
    pub fn coding(&self) -> DacCoding {
        self.coding
    }

    #[must_use]
    pub fn spi(&self) -> &Spi<T> {
        &self.spi
    }

    /// Connect `master` to the DAC
    /// # Errors
    /// See [`super::arbiter::Arbiter::acquire`]
    pub fn acquire(&self, master: usize) -> Result<Grant<'_, T>, Error> {
        self.spi.acquire(master)
    }

    /// Convert volts to a signed code, clamped to the DAC's range
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn volts_to_lsb(&self, volts: f64) -> i32 {
        let fraction = (volts - self.vref_n) / (self.vref_p - self.vref_n);
        let lsb = (fraction * f64::from(DATA_MASK)) as i64 + i64::from(LSB_MIN);
        lsb.clamp(i64::from(LSB_MIN), i64::from(LSB_MAX)) as i32
    }

    /// Convert a signed code to volts
    #[must_use]
    pub fn lsb_to_volts(&self, lsb: i32) -> f64 {
        (self.vref_p - self.vref_n) / f64::from(DATA_MASK) * f64::from(lsb - LSB_MIN) + self.vref_n
    }

    fn read_raw(&self, transport: &mut T, grant: &Grant<'_, T>, addr: u8) -> Result<u32, Error> {
        self.spi.send_with(transport, grant, READ | frame(addr, 0))?;
        Ok(self.spi.send_with(transport, grant, frame(READBACK, 0))? & DATA_MASK)
    }

    /// Write the control register and confirm it by reading it back. `BIN2sC` is always set
    /// from the driver's coding. Returns what was written.
    /// # Errors
    /// Returns [`Error::EchoMismatch`] if the readback differs
    pub fn write_control(&self, grant: &Grant<'_, T>, control: Control) -> Result<Control, Error> {
        let control = Control {
            bin2sc: self.coding == DacCoding::OffsetBinary,
            ..control
        };
        let written = control.serialize()? & DATA_MASK;
        with_transport(&self.transport, |t| {
            self.spi.send_with(t, grant, frame(Control::addr(), written))?;
            let read = self.read_raw(t, grant, Control::addr())?;
            if read != written {
                tracing::warn!("{}: control readback {read:#x}, wrote {written:#x}", self.spi.name());
                return Err(Error::EchoMismatch { written, read });
            }
            Ok(())
        })?;
        tracing::debug!("{}: control set to {control:?}", self.spi.name());
        Ok(control)
    }

    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn read_control(&self, grant: &Grant<'_, T>) -> Result<Control, Error> {
        let raw = with_transport(&self.transport, |t| self.read_raw(t, grant, Control::addr()))?;
        Ok(Control::deserialize(raw)?)
    }

    /// Issue a software control command
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn sw_control(&self, grant: &Grant<'_, T>, command: SwControl) -> Result<(), Error> {
        let word = command.serialize()?;
        self.spi.send(grant, frame(SwControl::addr(), word))?;
        Ok(())
    }

    /// Return the DAC to its power-on state
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn reset(&self, grant: &Grant<'_, T>) -> Result<(), Error> {
        tracing::info!("{}: reset", self.spi.name());
        self.sw_control(
            grant,
            SwControl {
                reset: true,
                ..Default::default()
            },
        )
    }

    /// Load the clear code into the DAC register
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn clear(&self, grant: &Grant<'_, T>) -> Result<(), Error> {
        self.sw_control(
            grant,
            SwControl {
                clr: true,
                ..Default::default()
            },
        )
    }

    /// Update the output from the DAC register
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn load(&self, grant: &Grant<'_, T>) -> Result<(), Error> {
        self.sw_control(
            grant,
            SwControl {
                ldac: true,
                ..Default::default()
            },
        )
    }

    /// Reset the DAC and drive its output through the buffer
    /// # Errors
    /// Returns an error on bad transport, ownership or a control echo mismatch
    pub fn configure(&self, grant: &Grant<'_, T>) -> Result<Control, Error> {
        self.reset(grant)?;
        self.write_control(grant, Control::enabled())
    }

    /// Write a signed code to the DAC register, clamping it to the DAC's range
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn set_lsb(&self, grant: &Grant<'_, T>, lsb: i32) -> Result<(), Error> {
        self.spi.send(grant, frame(DAC, self.coding.encode(lsb)))?;
        Ok(())
    }

    /// Read the signed code in the DAC register
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn lsb(&self, grant: &Grant<'_, T>) -> Result<i32, Error> {
        let raw = with_transport(&self.transport, |t| self.read_raw(t, grant, DAC))?;
        Ok(self.coding.decode(raw))
    }

    /// Set the output voltage, returning the code that was written
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn set_volts(&self, grant: &Grant<'_, T>, volts: f64) -> Result<i32, Error> {
        let lsb = self.volts_to_lsb(volts);
        self.set_lsb(grant, lsb)?;
        Ok(lsb)
    }

    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn volts(&self, grant: &Grant<'_, T>) -> Result<f64, Error> {
        Ok(self.lsb_to_volts(self.lsb(grant)?))
    }

    /// Set the code loaded by [`Ad5791::clear`]
    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn set_clearcode(&self, grant: &Grant<'_, T>, lsb: i32) -> Result<(), Error> {
        self.spi
            .send(grant, frame(CLEARCODE, self.coding.encode(lsb)))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error on bad transport or ownership
    pub fn clearcode(&self, grant: &Grant<'_, T>) -> Result<i32, Error> {
        let raw = with_transport(&self.transport, |t| self.read_raw(t, grant, CLEARCODE))?;
        Ok(self.coding.decode(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::{
        arbiter::SUPERVISOR,
        testing::board,
    };
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_coding() {
        let twos = DacCoding::TwosComplement;
        let offset = DacCoding::OffsetBinary;
        assert_eq!(twos.encode(-1), 0xF_FFFF);
        assert_eq!(twos.encode(-1_000_000), 0x8_0000);
        assert_eq!(offset.encode(0), 0x8_0000);
        assert_eq!(offset.encode(LSB_MIN), 0);
        assert_eq!(offset.encode(i32::MAX), 0xF_FFFF);
        assert_eq!(twos.decode(0x8_0000), LSB_MIN);
        assert_eq!(offset.decode(0x7_FFFF), -1);
    }

    #[test]
    fn test_packing() {
        assert_eq!(Control::reset_state().serialize().unwrap(), 0b1100);
        let control = Control {
            lincomp: LinComp::Upto12V,
            bin2sc: true,
            ..Default::default()
        };
        assert_eq!(control.serialize().unwrap(), 9 << 6 | 1 << 4);
        assert_eq!(Control::deserialize(9 << 6 | 1 << 4).unwrap(), control);
        assert_eq!(Control::addr(), 2);
        assert_eq!(SwControl::addr(), 4);
    }

    #[test]
    fn test_volts() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let dac = Ad5791::new(
            Arc::downgrade(&board),
            &manifest,
            "dac0",
            DacCoding::TwosComplement,
        )
        .unwrap();
        assert_eq!(dac.volts_to_lsb(-10.0), LSB_MIN);
        assert_eq!(dac.volts_to_lsb(11.0), LSB_MAX);
        assert_eq!(dac.volts_to_lsb(0.0), -1);
        assert!((dac.lsb_to_volts(LSB_MIN) + 10.0).abs() < 1e-9);
        let dac = dac.with_vref(0.0, 5.0);
        assert_eq!(dac.volts_to_lsb(0.0), LSB_MIN);
    }

    #[test]
    fn test_configure_and_write() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let dac = Ad5791::new(
            Arc::downgrade(&board),
            &manifest,
            "dac0",
            DacCoding::OffsetBinary,
        )
        .unwrap();
        let grant = dac.acquire(SUPERVISOR).unwrap();
        let control = dac.configure(&grant).unwrap();
        assert!(control.rbuf && control.bin2sc);
        assert_eq!(dac.read_control(&grant).unwrap(), control);
        assert!(!board.lock().unwrap().dac().output_disabled());

        dac.set_lsb(&grant, -5).unwrap();
        assert_eq!(board.lock().unwrap().dac().dac(), 0x8_0000 - 5);
        assert_eq!(dac.lsb(&grant).unwrap(), -5);

        let lsb = dac.set_volts(&grant, 2.5).unwrap();
        assert!((dac.volts(&grant).unwrap() - dac.lsb_to_volts(lsb)).abs() < 1e-12);

        dac.set_clearcode(&grant, 100).unwrap();
        assert_eq!(dac.clearcode(&grant).unwrap(), 100);
        dac.clear(&grant).unwrap();
        assert_eq!(dac.lsb(&grant).unwrap(), 100);
    }

    #[test]
    fn test_coding_bit() {
        for (coding, bin2sc) in [
            (DacCoding::TwosComplement, 0),
            (DacCoding::OffsetBinary, 1),
        ] {
            let board = board();
            let manifest = board.lock().unwrap().manifest().clone();
            let dac = Ad5791::new(Arc::downgrade(&board), &manifest, "dac0", coding).unwrap();
            let grant = dac.acquire(SUPERVISOR).unwrap();
            dac.write_control(&grant, Control::enabled()).unwrap();
            let control = board.lock().unwrap().dac().control();
            assert_eq!((control >> 4) & 1, bin2sc, "{coding:?}");
            assert_eq!(control & 0b10, 0b10);
        }
    }

    #[test]
    fn test_echo_mismatch() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let dac = Ad5791::new(
            Arc::downgrade(&board),
            &manifest,
            "dac0",
            DacCoding::TwosComplement,
        )
        .unwrap();
        let grant = dac.acquire(SUPERVISOR).unwrap();
        // With the serial output disabled nothing can be read back
        let control = Control {
            sdodis: true,
            ..Control::enabled()
        };
        assert!(matches!(
            dac.write_control(&grant, control),
            Err(Error::EchoMismatch { read: 0, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_coding_round_trip(lsb in LSB_MIN..=LSB_MAX, twos in any::<bool>()) {
            let coding = if twos { DacCoding::TwosComplement } else { DacCoding::OffsetBinary };
            prop_assert_eq!(coding.decode(coding.encode(lsb)), lsb);
        }
    }
}
