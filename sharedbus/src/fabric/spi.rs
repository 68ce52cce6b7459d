//! SPI master with an arm/finish handshake, as seen on the bus.
//!
//! The master shifts one frame per armed session. Its bus interface is a register bank:
//!
//! | offset | register       | access | width |
//! |--------|----------------|--------|-------|
//! | 0x00   | `ready_to_arm` | RO     | 1     |
//! | 0x04   | `finished`     | RO     | 1     |
//! | 0x08   | `arm`          | RW     | 1     |
//! | 0x0C   | `from_slave`   | RO     | frame |
//! | 0x10   | `to_slave`     | RW     | frame |

use super::{
    bank::{
        self,
        RegisterBank,
        RegisterHandle,
    },
    BusRequest,
    BusResponse,
    Slave,
};
use sharedbus_utils::{
    bits::width_mask,
    manifest::Access,
};

pub const READY_TO_ARM: u32 = 0x0;
pub const FINISHED: u32 = 0x4;
pub const ARM: u32 = 0x8;
pub const FROM_SLAVE: u32 = 0xC;
pub const TO_SLAVE: u32 = 0x10;

/// Something on the far end of the SPI wires. Each exchange shifts one full frame each way.
pub trait SpiDevice {
    /// Clock out `mosi`, returning what the device drove on MISO during the same frame
    fn exchange(&mut self, mosi: u32) -> u32;
}

/// Where a session is in the arm/finish handshake
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed,
    Finished,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Transfer {
    Idle,
    Busy(u32),
    Done,
}

#[derive(Debug, Clone)]
pub struct SpiMaster<D> {
    device: D,
    bank: RegisterBank,
    frame_width: u8,
    cycles: u32,
    transfer: Transfer,
    ready_to_arm: RegisterHandle,
    finished: RegisterHandle,
    arm: RegisterHandle,
    from_slave: RegisterHandle,
    to_slave: RegisterHandle,
}

impl<D: SpiDevice> SpiMaster<D> {
    /// A master shifting `frame_width` bit frames, each taking `cycles` ticks once armed
    /// # Errors
    /// Returns an error if the frame doesn't fit in a register
    pub fn new(device: D, frame_width: u8, cycles: u32) -> Result<Self, bank::Error> {
        let mut builder = RegisterBank::builder();
        let ready_to_arm = builder.add_register("ready_to_arm", Access::ReadOnly, 1)?;
        let finished = builder.add_register("finished", Access::ReadOnly, 1)?;
        let arm = builder.add_register("arm", Access::ReadWrite, 1)?;
        let from_slave = builder.add_register("from_slave", Access::ReadOnly, frame_width)?;
        let to_slave = builder.add_register("to_slave", Access::ReadWrite, frame_width)?;
        let mut bank = builder.build();
        bank.drive(ready_to_arm, 1);
        Ok(Self {
            device,
            bank,
            frame_width,
            cycles,
            transfer: Transfer::Idle,
            ready_to_arm,
            finished,
            arm,
            from_slave,
            to_slave,
        })
    }

    #[must_use]
    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        match self.transfer {
            Transfer::Done => SessionState::Finished,
            _ if self.bank.value(self.arm) == 1 => SessionState::Armed,
            _ => SessionState::Idle,
        }
    }
}

impl<D: SpiDevice> Slave for SpiMaster<D> {
    fn transact(&mut self, req: &BusRequest) -> BusResponse {
        self.bank.transact(req)
    }

    fn tick(&mut self) {
        let armed = self.bank.value(self.arm) == 1;
        self.transfer = match self.transfer {
            Transfer::Idle if armed => {
                self.bank.drive(self.ready_to_arm, 0);
                Transfer::Busy(self.cycles)
            }
            Transfer::Idle => Transfer::Idle,
            Transfer::Busy(0) => {
                let mask = width_mask(self.frame_width);
                let mosi = self.bank.value(self.to_slave) & mask;
                let miso = self.device.exchange(mosi) & mask;
                tracing::trace!("spi frame {mosi:#x} -> {miso:#x}");
                self.bank.drive(self.from_slave, miso);
                self.bank.drive(self.finished, 1);
                Transfer::Done
            }
            Transfer::Busy(n) => Transfer::Busy(n - 1),
            Transfer::Done if !armed => {
                self.bank.drive(self.finished, 0);
                self.bank.drive(self.ready_to_arm, 1);
                Transfer::Idle
            }
            Transfer::Done => Transfer::Done,
        };
    }
}
