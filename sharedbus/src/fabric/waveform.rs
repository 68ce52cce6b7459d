//! The waveform engine: replays samples from its RAM into a DAC, one every `timer_spacing` ticks.
//!
//! The engine is itself a bus master on two arbiters, the sample RAM and the DAC's SPI master,
//! and it only makes progress while both have it selected.

use super::{
    bank::{
        self,
        RegisterBank,
        RegisterHandle,
    },
    spi,
    BusRequest,
    BusResponse,
    MasterPort,
};
use sharedbus_utils::manifest::{
    Access,
    Side,
};

/// Frame sent to the DAC for each sample: a write to the DAC register
const DAC_WRITE: u32 = 1 << 20;
const SAMPLE: u32 = 0xF_FFFF;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaveformState {
    Ready,
    Running,
    Finished,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Load,
    Transfer,
    AwaitDac,
    Wait(u32),
}

#[derive(Debug, Clone)]
pub struct WaveformEngine {
    bank: RegisterBank,
    state: WaveformState,
    phase: Phase,
    run: RegisterHandle,
    force_stop: RegisterHandle,
    do_loop: RegisterHandle,
    wform_width: RegisterHandle,
    timer_spacing: RegisterHandle,
    finished_or_ready: RegisterHandle,
    finished: RegisterHandle,
    cursor: RegisterHandle,
}

impl WaveformEngine {
    /// # Errors
    /// Never in practice, the layout is fixed
    pub fn new() -> Result<Self, bank::Error> {
        let mut builder = RegisterBank::builder();
        let run = builder.add_register("run", Access::ReadWrite, 1)?;
        let force_stop = builder.add_register("force_stop", Access::ReadWrite, 1)?;
        let do_loop = builder.add_register("do_loop", Access::ReadWrite, 1)?;
        let wform_width = builder.add_register("wform_width", Access::ReadWrite, 16)?;
        let timer_spacing = builder.add_register("timer_spacing", Access::ReadWrite, 32)?;
        let finished_or_ready = builder.add_register("finished_or_ready", Access::ReadOnly, 1)?;
        let finished = builder.add_register("finished", Access::ReadOnly, 1)?;
        let cursor = builder.add_register("cursor", Access::ReadOnly, 16)?;
        let mut bank = builder.build();
        bank.drive(finished_or_ready, 1);
        Ok(Self {
            bank,
            state: WaveformState::Ready,
            phase: Phase::Load,
            run,
            force_stop,
            do_loop,
            wform_width,
            timer_spacing,
            finished_or_ready,
            finished,
            cursor,
        })
    }

    #[must_use]
    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    #[must_use]
    pub fn state(&self) -> WaveformState {
        self.state
    }

    /// Answer a transaction on the control bank
    pub fn transact(&mut self, req: &BusRequest) -> BusResponse {
        self.bank.transact_from(Side::Supervisor, req)
    }

    fn enter(&mut self, state: WaveformState) {
        if state != self.state {
            tracing::debug!("waveform engine {:?} -> {state:?}", self.state);
        }
        self.state = state;
        self.phase = Phase::Load;
        self.bank.drive(
            self.finished_or_ready,
            u32::from(state != WaveformState::Running),
        );
        self.bank
            .drive(self.finished, u32::from(state == WaveformState::Finished));
    }

    /// Advance one step, issuing at most a few transactions on the RAM and DAC ports
    pub fn tick(&mut self, ram: &mut impl MasterPort, dac: &mut impl MasterPort) {
        let run = self.bank.value(self.run) == 1;
        if self.bank.value(self.force_stop) == 1 {
            if self.state == WaveformState::Running {
                dac.transact(&BusRequest::write(spi::ARM, 0));
                self.bank.drive(self.cursor, 0);
            }
            self.enter(WaveformState::Ready);
            return;
        }
        match self.state {
            WaveformState::Ready if run => {
                self.bank.drive(self.cursor, 0);
                self.enter(WaveformState::Running);
            }
            WaveformState::Finished if !run => self.enter(WaveformState::Ready),
            WaveformState::Ready | WaveformState::Finished => {}
            WaveformState::Running => self.step(run, ram, dac),
        }
    }

    fn step(&mut self, run: bool, ram: &mut impl MasterPort, dac: &mut impl MasterPort) {
        if !run {
            // A frame already shifting still completes inside the SPI master
            dac.transact(&BusRequest::write(spi::ARM, 0));
            self.enter(WaveformState::Ready);
            return;
        }
        let cursor = self.bank.value(self.cursor);
        self.phase = match self.phase {
            Phase::Load => {
                let sample = ram.transact(&BusRequest::read(cursor * 4)).data;
                dac.transact(&BusRequest::write(
                    spi::TO_SLAVE,
                    DAC_WRITE | (sample & SAMPLE),
                ));
                Phase::Transfer
            }
            Phase::Transfer => {
                let ready = dac.transact(&BusRequest::read(spi::READY_TO_ARM));
                if ready.data == 1 {
                    dac.transact(&BusRequest::write(spi::ARM, 1));
                    Phase::AwaitDac
                } else {
                    Phase::Transfer
                }
            }
            Phase::AwaitDac => {
                let finished = dac.transact(&BusRequest::read(spi::FINISHED));
                if finished.data == 1 {
                    dac.transact(&BusRequest::write(spi::ARM, 0));
                    Phase::Wait(0)
                } else {
                    Phase::AwaitDac
                }
            }
            Phase::Wait(elapsed) if elapsed < self.bank.value(self.timer_spacing) => {
                Phase::Wait(elapsed + 1)
            }
            Phase::Wait(_) => {
                let next = cursor + 1;
                if next < self.bank.value(self.wform_width) {
                    self.bank.drive(self.cursor, next);
                } else if self.bank.value(self.do_loop) == 1 {
                    self.bank.drive(self.cursor, 0);
                } else {
                    self.enter(WaveformState::Finished);
                    return;
                }
                Phase::Load
            }
        };
    }
}
