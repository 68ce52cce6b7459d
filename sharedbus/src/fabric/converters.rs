//! Behavioural models of the converters hanging off the SPI masters

use super::spi::SpiDevice;
use sharedbus_utils::bits::width_mask;

const READ: u32 = 1 << 23;
const DATA: u32 = 0xF_FFFF;

const REG_DAC: u32 = 1;
const REG_CONTROL: u32 = 2;
const REG_CLEARCODE: u32 = 3;
const REG_SW_CONTROL: u32 = 4;

const CTRL_OPGND: u32 = 1 << 2;
const CTRL_DACTRI: u32 = 1 << 3;
const CTRL_SDODIS: u32 = 1 << 5;
/// Bits 1 through 9 of the control register are implemented
const CTRL_MASK: u32 = 0x3FE;
const CTRL_RESET: u32 = CTRL_OPGND | CTRL_DACTRI;

const SW_CLR: u32 = 1 << 1;
const SW_RESET: u32 = 1 << 2;

/// An AD5791 20-bit DAC. Readback data comes out on the frame following the read command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ad5791Model {
    dac: u32,
    control: u32,
    clearcode: u32,
    sdo: u32,
}

impl Default for Ad5791Model {
    fn default() -> Self {
        Self {
            dac: 0,
            control: CTRL_RESET,
            clearcode: 0,
            sdo: 0,
        }
    }
}

impl Ad5791Model {
    /// The raw code in the DAC register
    #[must_use]
    pub fn dac(&self) -> u32 {
        self.dac
    }

    #[must_use]
    pub fn control(&self) -> u32 {
        self.control
    }

    #[must_use]
    pub fn clearcode(&self) -> u32 {
        self.clearcode
    }

    /// Whether the output is clamped to ground or tristated
    #[must_use]
    pub fn output_disabled(&self) -> bool {
        self.control & (CTRL_OPGND | CTRL_DACTRI) != 0
    }

    fn register(&self, addr: u32) -> u32 {
        match addr {
            REG_DAC => self.dac,
            REG_CONTROL => self.control,
            REG_CLEARCODE => self.clearcode,
            _ => 0,
        }
    }
}

impl SpiDevice for Ad5791Model {
    fn exchange(&mut self, mosi: u32) -> u32 {
        let miso = if self.control & CTRL_SDODIS == 0 {
            self.sdo
        } else {
            0
        };
        let addr = (mosi >> 20) & 0b111;
        let data = mosi & DATA;
        self.sdo = 0;
        if mosi & READ != 0 {
            self.sdo = (mosi & !DATA) | self.register(addr);
        } else {
            match addr {
                REG_DAC => self.dac = data,
                REG_CONTROL => self.control = data & CTRL_MASK,
                REG_CLEARCODE => self.clearcode = data,
                REG_SW_CONTROL if data & SW_RESET != 0 => *self = Self::default(),
                REG_SW_CONTROL if data & SW_CLR != 0 => self.dac = self.clearcode,
                _ => {}
            }
        }
        miso
    }
}

/// An LTC2336 style ADC: every frame returns the last conversion, ignoring MOSI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ltc2336Model {
    bits: u8,
    sample: u32,
}

impl Ltc2336Model {
    #[must_use]
    pub fn new(bits: u8) -> Self {
        Self { bits, sample: 0 }
    }

    /// Present a new conversion result, in two's complement
    #[allow(clippy::cast_sign_loss)]
    pub fn set_input(&mut self, raw: i32) {
        self.sample = raw as u32 & width_mask(self.bits);
    }
}

impl SpiDevice for Ltc2336Model {
    fn exchange(&mut self, _mosi: u32) -> u32 {
        self.sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ad5791_readback() {
        let mut dac = Ad5791Model::default();
        assert!(dac.output_disabled());
        dac.exchange(REG_DAC << 20 | 0x12345);
        dac.exchange(READ | REG_DAC << 20);
        assert_eq!(dac.exchange(0), READ | REG_DAC << 20 | 0x12345);
        // Control writes clear the ground/tristate bits
        dac.exchange(REG_CONTROL << 20 | 1 << 1);
        assert!(!dac.output_disabled());
    }

    #[test]
    fn test_ad5791_sw_control() {
        let mut dac = Ad5791Model::default();
        dac.exchange(REG_CLEARCODE << 20 | 0x80000);
        dac.exchange(REG_DAC << 20 | 0x1);
        dac.exchange(REG_SW_CONTROL << 20 | SW_CLR);
        assert_eq!(dac.dac(), 0x80000);
        dac.exchange(REG_SW_CONTROL << 20 | SW_RESET);
        assert_eq!(dac, Ad5791Model::default());
    }

    #[test]
    fn test_ad5791_sdo_disable() {
        let mut dac = Ad5791Model::default();
        dac.exchange(REG_CONTROL << 20 | CTRL_SDODIS);
        dac.exchange(READ | REG_CONTROL << 20);
        assert_eq!(dac.exchange(0), 0);
    }

    #[test]
    fn test_ltc() {
        let mut adc = Ltc2336Model::new(18);
        adc.set_input(-1);
        assert_eq!(adc.exchange(0), 0x3_FFFF);
    }
}
