//! Driver for the LTC2336 family of SAR ADCs. Every SPI frame starts a conversion and returns
//! the previous result in two's complement.

use super::{
    arbiter::Grant,
    spi::Spi,
    Error,
};
use crate::transport::Transport;
use sharedbus_utils::{
    bits::sign_extend,
    manifest::Manifest,
};
use std::sync::{
    Mutex,
    Weak,
};

#[derive(Debug)]
pub struct LtcAdc<T> {
    spi: Spi<T>,
    bits: u8,
    /// Differential input range in volts
    range: f64,
    single_ended: bool,
}

impl<T> LtcAdc<T>
where
    T: Transport,
{
    /// An 18-bit, 10.24 V, single-ended ADC on the SPI master in region `name`
    /// # Errors
    /// Returns an error if the manifest is missing the SPI master
    pub fn new(transport: Weak<Mutex<T>>, manifest: &Manifest, name: &str) -> Result<Self, Error> {
        Ok(Self {
            spi: Spi::new(transport, manifest, name)?,
            bits: 18,
            range: 10.24,
            single_ended: true,
        })
    }

    /// # Errors
    /// Returns [`Error::OutOfRange`] unless `bits` is between 2 and 32
    pub fn with_bits(mut self, bits: u8) -> Result<Self, Error> {
        if !(2..=32).contains(&bits) {
            return Err(Error::OutOfRange(format!("ADC width of {bits} bits")));
        }
        self.bits = bits;
        Ok(self)
    }

    #[must_use]
    pub fn with_range(mut self, volts: f64) -> Self {
        self.range = volts;
        self
    }

    /// Whether the negative input is the inverted positive input
    #[must_use]
    pub fn single_ended(mut self, single_ended: bool) -> Self {
        self.single_ended = single_ended;
        self
    }

    #[must_use]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    #[must_use]
    pub fn spi(&self) -> &Spi<T> {
        &self.spi
    }

    /// Connect `master` to the ADC
    /// # Errors
    /// See [`super::arbiter::Arbiter::acquire`]
    pub fn acquire(&self, master: usize) -> Result<Grant<'_, T>, Error> {
        self.spi.acquire(master)
    }

    #[must_use]
    pub fn volts_per_lsb(&self) -> f64 {
        let lsb = self.range / 2f64.powi(i32::from(self.bits));
        if self.single_ended {
            lsb * 2.0
        } else {
            lsb
        }
    }

    /// Run a conversion cycle and return the sign-extended result
    /// # Errors
    /// Returns an error on bad transport, ownership or a stalled handshake
    pub fn read_lsb(&self, grant: &Grant<'_, T>) -> Result<i32, Error> {
        let raw = self.spi.send(grant, 0)?;
        Ok(sign_extend(raw, self.bits))
    }

    /// # Errors
    /// See [`LtcAdc::read_lsb`]
    pub fn read_volts(&self, grant: &Grant<'_, T>) -> Result<f64, Error> {
        Ok(f64::from(self.read_lsb(grant)?) * self.volts_per_lsb())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::{
        arbiter::SUPERVISOR,
        testing::board,
    };
    use std::sync::Arc;

    #[test]
    fn test_read() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let adc = LtcAdc::new(Arc::downgrade(&board), &manifest, "adc0").unwrap();
        let grant = adc.acquire(SUPERVISOR).unwrap();

        board.lock().unwrap().adc_mut().set_input(-1000);
        assert_eq!(adc.read_lsb(&grant).unwrap(), -1000);

        board.lock().unwrap().adc_mut().set_input(1 << 16);
        let volts = adc.read_volts(&grant).unwrap();
        assert!((volts - 5.12).abs() < 1e-9);
    }

    #[test]
    fn test_conversion() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let adc = LtcAdc::new(Arc::downgrade(&board), &manifest, "adc0")
            .unwrap()
            .single_ended(false);
        assert!((adc.volts_per_lsb() - 10.24 / f64::from(1 << 18)).abs() < 1e-15);
        let adc = adc.with_bits(16).unwrap().with_range(4.096);
        assert!((adc.volts_per_lsb() - 4.096 / 65536.0).abs() < 1e-15);
        assert!(adc.with_bits(40).is_err());
    }

    #[test]
    fn test_coprocessor_owns_adc() {
        let board = board();
        let manifest = board.lock().unwrap().manifest().clone();
        let adc = LtcAdc::new(Arc::downgrade(&board), &manifest, "adc0").unwrap();
        let grant = adc.acquire(1).unwrap();
        assert!(matches!(
            adc.read_lsb(&grant),
            Err(Error::NotOwner { owner: 1, .. })
        ));
    }
}
