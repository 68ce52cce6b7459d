//! Defines the transport mechanisms that move words between the host and the shared bus

#[cfg(feature = "local")]
pub mod local;
pub mod mock;

use packed_struct::PackingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No region decodes address {0:#x}")]
    Unmapped(u32),
    #[error("Word access at unaligned address {0:#x}")]
    Misaligned(u32),
    #[error("Bus transaction at {0:#x} was never acknowledged")]
    NoAck(u32),
    #[error(transparent)]
    Packing(#[from] PackingError),
    #[cfg(feature = "local")]
    #[error(transparent)]
    Local(#[from] local::Error),
}

pub type TransportResult<T> = Result<T, Error>;

/// Types that implement this trait can be packed into one bus word
pub trait Serialize {
    /// # Errors
    /// Returns an error if the value can't be represented as a bus word
    fn serialize(&self) -> Result<u32, PackingError>;
}

/// Types that implement this trait can be unpacked from one bus word
pub trait Deserialize: Sized {
    /// # Errors
    /// Returns an error if the word isn't a valid encoding of `Self`
    fn deserialize(word: u32) -> Result<Self, PackingError>;
}

macro_rules! serde_unsigned {
    ($num:ty) => {
        impl Serialize for $num {
            fn serialize(&self) -> Result<u32, PackingError> {
                Ok(u32::from(*self))
            }
        }

        impl Deserialize for $num {
            #[allow(clippy::cast_possible_truncation)]
            fn deserialize(word: u32) -> Result<Self, PackingError> {
                Ok(word as $num)
            }
        }
    };
}

macro_rules! serde_signed {
    ($num:ty) => {
        impl Serialize for $num {
            #[allow(clippy::cast_sign_loss)]
            fn serialize(&self) -> Result<u32, PackingError> {
                Ok(i32::from(*self) as u32)
            }
        }

        impl Deserialize for $num {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            fn deserialize(word: u32) -> Result<Self, PackingError> {
                Ok(word as $num)
            }
        }
    };
}

// Everything that fits in a bus word
serde_unsigned!(u8);
serde_unsigned!(u16);
serde_unsigned!(u32);
serde_signed!(i8);
serde_signed!(i16);
serde_signed!(i32);

impl Serialize for f32 {
    fn serialize(&self) -> Result<u32, PackingError> {
        Ok(self.to_bits())
    }
}

impl Deserialize for f32 {
    fn deserialize(word: u32) -> Result<Self, PackingError> {
        Ok(f32::from_bits(word))
    }
}

impl Serialize for bool {
    fn serialize(&self) -> Result<u32, PackingError> {
        Ok(u32::from(*self))
    }
}

impl Deserialize for bool {
    fn deserialize(word: u32) -> Result<Self, PackingError> {
        Ok(word & 1 == 1)
    }
}

/// The trait implemented by everything that can issue transactions on the supervisor's side of
/// the bus. Addresses are absolute byte addresses; word accesses must be 4-byte aligned.
pub trait Transport {
    /// Read the 32-bit word at `addr`
    /// # Errors
    /// Returns an error on unmapped or unaligned addresses
    fn read_word(&mut self, addr: u32) -> TransportResult<u32>;

    /// Write the 32-bit word at `addr`
    /// # Errors
    /// Returns an error on unmapped or unaligned addresses
    fn write_word(&mut self, addr: u32, value: u32) -> TransportResult<()>;

    /// Read the single byte at `addr`
    /// # Errors
    /// Returns an error on unmapped addresses
    fn read_byte(&mut self, addr: u32) -> TransportResult<u8>;

    /// Write the single byte at `addr`, leaving the other lanes of its word untouched
    /// # Errors
    /// Returns an error on unmapped addresses
    fn write_byte(&mut self, addr: u32, value: u8) -> TransportResult<()>;

    /// Generically read a `Deserialize` type `T` from the word at `addr`
    /// # Example
    /// ```
    /// # use sharedbus::transport::{mock::Mock, Transport};
    /// # let mut transport = Mock::from_ranges([(0x100, 4)]);
    /// let my_num: u32 = transport.read(0x100).unwrap();
    /// ```
    /// # Errors
    /// Returns an error on bad transport or an invalid encoding
    fn read<T>(&mut self, addr: u32) -> TransportResult<T>
    where
        T: Deserialize,
    {
        Ok(T::deserialize(self.read_word(addr)?)?)
    }

    /// Generically write a `Serialize` type `T` to the word at `addr`
    /// # Example
    /// ```
    /// # use sharedbus::transport::{mock::Mock, Transport};
    /// # let mut transport = Mock::from_ranges([(0x100, 4)]);
    /// let my_num = 3.14f32;
    /// transport.write(0x100, &my_num).unwrap();
    /// ```
    /// # Errors
    /// Returns an error on bad transport or if the value can't be packed
    fn write<T>(&mut self, addr: u32, data: &T) -> TransportResult<()>
    where
        T: Serialize,
    {
        self.write_word(addr, data.serialize()?)
    }

    /// Read `n` consecutive words starting at `addr`
    /// # Errors
    /// Returns an error on bad transport
    fn read_words(&mut self, addr: u32, n: usize) -> TransportResult<Vec<u32>> {
        (0..n)
            .map(|i| self.read_word(word_addr(addr, i)))
            .collect()
    }

    /// Write `data` to consecutive words starting at `addr`
    /// # Errors
    /// Returns an error on bad transport
    fn write_words(&mut self, addr: u32, data: &[u32]) -> TransportResult<()> {
        for (i, word) in data.iter().enumerate() {
            self.write_word(word_addr(addr, i), *word)?;
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn word_addr(base: u32, index: usize) -> u32 {
    base.wrapping_add((index as u32).wrapping_mul(4))
}

/// Which byte lane of a little-endian bus word `addr` falls in
#[must_use]
pub fn byte_lane(addr: u32) -> u32 {
    addr & 0b11
}
