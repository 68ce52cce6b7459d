//! An executable model of the standard controller gateware.
//!
//! The board wires the fabric pieces together the way the gateware build does: a DAC and an ADC
//! behind SPI masters, a waveform engine with its own sample RAM, a co-processor with program
//! RAM, and the control loop's parameter and command blocks. Every shared slave sits behind a
//! [`PreemptiveInterface`] whose `master_select` register is reachable from the supervisor.
//!
//! Two views of the bus are exposed. The supervisor's view is the [`Transport`] implementation
//! on [`Board`] itself; the co-processor's view is [`Board::coprocessor`]. Every access first
//! advances the whole model by one step.

use super::{
    arbiter::{
        self,
        MasterHandle,
        PreemptiveInterface,
    },
    bank::{
        self,
        PeekPoke,
    },
    control_loop::ControlLoopEngine,
    converters::{
        Ad5791Model,
        Ltc2336Model,
    },
    coproc::Coprocessor,
    ram::Ram,
    region::{
        self,
        MemoryMap,
    },
    spi::SpiMaster,
    waveform::{
        WaveformEngine,
        WaveformState,
    },
    BusRequest,
    BusResponse,
    Slave,
};
use crate::transport::{
    self,
    byte_lane,
    Transport,
    TransportResult,
};
use sharedbus_utils::manifest::{
    self,
    Manifest,
    Side,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Region(#[from] region::Error),
    #[error(transparent)]
    Bank(#[from] bank::Error),
    #[error(transparent)]
    Arbiter(#[from] arbiter::Error),
    #[error(transparent)]
    Manifest(#[from] manifest::Error),
}

/// Tunables of the simulated gateware
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Ticks an SPI frame takes once armed
    pub spi_cycles: u32,
    /// Significant bits of each ADC conversion
    pub adc_bits: u8,
    /// Bytes in each of the waveform and co-processor RAMs, a power of two
    pub ram_bytes: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            spi_cycles: 4,
            adc_bits: 18,
            ram_bytes: 0x1000,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Target {
    Dac0,
    Adc0,
    Dac0Select,
    Adc0Select,
    Wf0RamSelect,
    Pico0RamSelect,
    Wf0,
    Wf0Ram,
    Pico0,
    Pico0Regs,
    Pico0Ram,
    ClParams,
    Cl,
}

#[derive(Debug)]
struct Masters {
    dac0_coprocessor: MasterHandle,
    dac0_waveform: MasterHandle,
    adc0_coprocessor: MasterHandle,
    wf0_ram_player: MasterHandle,
    pico0_ram_coprocessor: MasterHandle,
}

#[derive(Debug)]
pub struct Board {
    supervisor_map: MemoryMap<Target>,
    coprocessor_map: MemoryMap<Target>,
    manifest: Manifest,
    coprocessor_manifest: Manifest,
    masters: Masters,
    dac0: PreemptiveInterface<SpiMaster<Ad5791Model>>,
    adc0: PreemptiveInterface<SpiMaster<Ltc2336Model>>,
    wf0: WaveformEngine,
    wf0_ram: PreemptiveInterface<Ram>,
    pico0: Coprocessor,
    pico0_ram: PreemptiveInterface<Ram>,
    cl_params: PeekPoke,
    cl: ControlLoopEngine,
}

/// Frame width of the AD5791's SPI port
const DAC_FRAME: u8 = 24;

fn interface<S: Slave>(
    slave: S,
    masters: &[&str],
) -> Result<(PreemptiveInterface<S>, Vec<MasterHandle>), arbiter::Error> {
    let mut builder = PreemptiveInterface::builder(slave);
    let handles = masters
        .iter()
        .map(|name| builder.add_master(name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((builder.build()?, handles))
}

fn control_loop_params() -> Result<PeekPoke, bank::Error> {
    let mut builder = PeekPoke::builder();
    for name in ["cl_I", "cl_P", "deltaT", "setpt"] {
        builder.add_register(name, Some(Side::Supervisor), 32)?;
    }
    for name in ["zset", "zpos"] {
        builder.add_register(name, Some(Side::Coprocessor), 32)?;
    }
    Ok(builder.build())
}

impl Board {
    /// Assemble the gateware model and allocate both views of the bus
    /// # Errors
    /// Returns an error if the configuration yields an invalid region map
    pub fn new(config: BoardConfig) -> Result<Self, Error> {
        let (dac0, dac0_masters) = interface(
            SpiMaster::new(Ad5791Model::default(), DAC_FRAME, config.spi_cycles)?,
            &["supervisor", "coprocessor", "waveform"],
        )?;
        let (adc0, adc0_masters) = interface(
            SpiMaster::new(Ltc2336Model::new(config.adc_bits), config.adc_bits, config.spi_cycles)?,
            &["supervisor", "coprocessor"],
        )?;
        let (wf0_ram, wf0_ram_masters) =
            interface(Ram::new(config.ram_bytes), &["supervisor", "player"])?;
        let (pico0_ram, pico0_ram_masters) =
            interface(Ram::new(config.ram_bytes), &["supervisor", "coprocessor"])?;
        let wf0 = WaveformEngine::new()?;
        let pico0 = Coprocessor::new()?;
        let cl_params = control_loop_params()?;
        let cl = ControlLoopEngine::new()?;

        let mut sup = MemoryMap::builder();
        sup.add_registers("dac0", 0x2000, dac0.slave().bank().layout().clone(), Target::Dac0)?;
        sup.add_registers("adc0", 0x2100, adc0.slave().bank().layout().clone(), Target::Adc0)?;
        sup.add_registers("dac0_pi", 0x2200, dac0.control_layout().clone(), Target::Dac0Select)?;
        sup.add_registers("adc0_pi", 0x2204, adc0.control_layout().clone(), Target::Adc0Select)?;
        sup.add_registers(
            "wf0_ram_pi",
            0x2208,
            wf0_ram.control_layout().clone(),
            Target::Wf0RamSelect,
        )?;
        sup.add_registers(
            "pico0_ram_pi",
            0x220C,
            pico0_ram.control_layout().clone(),
            Target::Pico0RamSelect,
        )?;
        sup.add_registers("wf0", 0x3000, wf0.bank().layout().clone(), Target::Wf0)?;
        sup.add_region("wf0_ram", 0x4000, config.ram_bytes, Target::Wf0Ram)?;
        sup.add_registers("pico0", 0x5000, pico0.control_bank().layout().clone(), Target::Pico0)?;
        sup.add_registers(
            "pico0_regs",
            0x5100,
            pico0.debug_bank().layout().clone(),
            Target::Pico0Regs,
        )?;
        sup.add_region("pico0_ram", 0x6000, config.ram_bytes, Target::Pico0Ram)?;
        sup.add_registers("cl_params", 0x7000, cl_params.layout().clone(), Target::ClParams)?;
        sup.add_registers("cl", 0x7100, cl.bank().layout().clone(), Target::Cl)?;
        let supervisor_map = sup.build();

        let mut cop = MemoryMap::builder();
        cop.add_region(
            "pico0_ram",
            super::coproc::RESET_VECTOR,
            config.ram_bytes,
            Target::Pico0Ram,
        )?;
        cop.add_registers("dac0", 0x20000, dac0.slave().bank().layout().clone(), Target::Dac0)?;
        cop.add_registers("adc0", 0x20100, adc0.slave().bank().layout().clone(), Target::Adc0)?;
        cop.add_registers("cl_params", 0x10_0000, cl_params.layout().clone(), Target::ClParams)?;
        let coprocessor_map = cop.build();

        let manifest = supervisor_map.to_manifest()?;
        let coprocessor_manifest = coprocessor_map.to_manifest()?;
        tracing::info!("board assembled, manifest {}", manifest.md5_string());

        Ok(Self {
            supervisor_map,
            coprocessor_map,
            manifest,
            coprocessor_manifest,
            masters: Masters {
                dac0_coprocessor: dac0_masters[1],
                dac0_waveform: dac0_masters[2],
                adc0_coprocessor: adc0_masters[1],
                wf0_ram_player: wf0_ram_masters[1],
                pico0_ram_coprocessor: pico0_ram_masters[1],
            },
            dac0,
            adc0,
            wf0,
            wf0_ram,
            pico0,
            pico0_ram,
            cl_params,
            cl,
        })
    }

    /// The supervisor's build manifest
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The manifest of the co-processor's view, for generating its header
    #[must_use]
    pub fn coprocessor_manifest(&self) -> &Manifest {
        &self.coprocessor_manifest
    }

    /// The index of `master` on the interface in front of `slave`
    #[must_use]
    pub fn master_index(&self, slave: &str, master: &str) -> Option<usize> {
        let names: Vec<Option<&str>> = match slave {
            "dac0" => (0..self.dac0.master_count())
                .map(|i| self.dac0.master_name(i))
                .collect(),
            "adc0" => (0..self.adc0.master_count())
                .map(|i| self.adc0.master_name(i))
                .collect(),
            "wf0_ram" => (0..self.wf0_ram.master_count())
                .map(|i| self.wf0_ram.master_name(i))
                .collect(),
            "pico0_ram" => (0..self.pico0_ram.master_count())
                .map(|i| self.pico0_ram.master_name(i))
                .collect(),
            _ => return None,
        };
        names.iter().position(|n| *n == Some(master))
    }

    #[must_use]
    pub fn dac(&self) -> &Ad5791Model {
        self.dac0.slave().device()
    }

    pub fn adc_mut(&mut self) -> &mut Ltc2336Model {
        self.adc0.slave_mut().device_mut()
    }

    #[must_use]
    pub fn waveform_state(&self) -> WaveformState {
        self.wf0.state()
    }

    #[must_use]
    pub fn coprocessor_core(&self) -> &Coprocessor {
        &self.pico0
    }

    pub fn coprocessor_core_mut(&mut self) -> &mut Coprocessor {
        &mut self.pico0
    }

    /// The co-processor's view of the bus
    pub fn coprocessor(&mut self) -> CoprocessorView<'_> {
        CoprocessorView { board: self }
    }

    /// Advance every autonomous block by one step
    pub fn tick(&mut self) {
        self.dac0.tick();
        self.adc0.tick();
        self.wf0.tick(
            &mut self.wf0_ram.port(self.masters.wf0_ram_player),
            &mut self.dac0.port(self.masters.dac0_waveform),
        );
        self.pico0
            .tick(&mut self.pico0_ram.port(self.masters.pico0_ram_coprocessor));
        self.cl.tick();
    }

    fn supervisor_transact(&mut self, target: Target, req: &BusRequest) -> BusResponse {
        match target {
            Target::Dac0 => self.dac0.transact(0, req),
            Target::Adc0 => self.adc0.transact(0, req),
            Target::Dac0Select => self.dac0.control(req),
            Target::Adc0Select => self.adc0.control(req),
            Target::Wf0RamSelect => self.wf0_ram.control(req),
            Target::Pico0RamSelect => self.pico0_ram.control(req),
            Target::Wf0 => self.wf0.transact(req),
            Target::Wf0Ram => self.wf0_ram.transact(0, req),
            Target::Pico0 => self.pico0.control_transact(req),
            Target::Pico0Regs => self.pico0.debug_transact(req),
            Target::Pico0Ram => self.pico0_ram.transact(0, req),
            Target::ClParams => self.cl_params.port(Side::Supervisor).transact(req),
            Target::Cl => self.cl.transact(req),
        }
    }

    fn coprocessor_transact(&mut self, target: Target, req: &BusRequest) -> Option<BusResponse> {
        Some(match target {
            Target::Dac0 => self.dac0.transact(self.masters.dac0_coprocessor.index(), req),
            Target::Adc0 => self.adc0.transact(self.masters.adc0_coprocessor.index(), req),
            Target::Pico0Ram => self
                .pico0_ram
                .transact(self.masters.pico0_ram_coprocessor.index(), req),
            Target::ClParams => self.cl_params.port(Side::Coprocessor).transact(req),
            _ => return None,
        })
    }

    /// Decode, step the model, and dispatch one request from `side`
    fn access(&mut self, side: Side, req: BusRequest) -> TransportResult<u32> {
        let addr = req.addr;
        let map = match side {
            Side::Supervisor => &self.supervisor_map,
            Side::Coprocessor => &self.coprocessor_map,
        };
        let region = map.decode(addr).ok_or(transport::Error::Unmapped(addr))?;
        let target = *region.owner();
        let req = req.at(region.offset_of(addr));
        self.tick();
        let response = match side {
            Side::Supervisor => Some(self.supervisor_transact(target, &req)),
            Side::Coprocessor => self.coprocessor_transact(target, &req),
        }
        .ok_or(transport::Error::Unmapped(addr))?;
        if !response.ack {
            return Err(transport::Error::NoAck(addr));
        }
        Ok(response.data)
    }

    fn read_word_from(&mut self, side: Side, addr: u32) -> TransportResult<u32> {
        if addr % 4 != 0 {
            return Err(transport::Error::Misaligned(addr));
        }
        self.access(side, BusRequest::read(addr))
    }

    fn write_word_from(&mut self, side: Side, addr: u32, value: u32) -> TransportResult<()> {
        if addr % 4 != 0 {
            return Err(transport::Error::Misaligned(addr));
        }
        self.access(side, BusRequest::write(addr, value))?;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_byte_from(&mut self, side: Side, addr: u32) -> TransportResult<u8> {
        let word = self.access(side, BusRequest::read(addr & !0b11))?;
        Ok((word >> (8 * byte_lane(addr))) as u8)
    }

    fn write_byte_from(&mut self, side: Side, addr: u32, value: u8) -> TransportResult<()> {
        let lane = byte_lane(addr);
        let req = BusRequest::write_lanes(addr & !0b11, u32::from(value) << (8 * lane), 1 << lane);
        self.access(side, req)?;
        Ok(())
    }
}

impl Transport for Board {
    fn read_word(&mut self, addr: u32) -> TransportResult<u32> {
        self.read_word_from(Side::Supervisor, addr)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> TransportResult<()> {
        self.write_word_from(Side::Supervisor, addr, value)
    }

    fn read_byte(&mut self, addr: u32) -> TransportResult<u8> {
        self.read_byte_from(Side::Supervisor, addr)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> TransportResult<()> {
        self.write_byte_from(Side::Supervisor, addr, value)
    }
}

/// The board as seen by software running on the co-processor
pub struct CoprocessorView<'a> {
    board: &'a mut Board,
}

impl Transport for CoprocessorView<'_> {
    fn read_word(&mut self, addr: u32) -> TransportResult<u32> {
        self.board.read_word_from(Side::Coprocessor, addr)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> TransportResult<()> {
        self.board.write_word_from(Side::Coprocessor, addr, value)
    }

    fn read_byte(&mut self, addr: u32) -> TransportResult<u8> {
        self.board.read_byte_from(Side::Coprocessor, addr)
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> TransportResult<()> {
        self.board.write_byte_from(Side::Coprocessor, addr, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::bank::{
        COPROCESSOR_UNMAPPED,
        SUPERVISOR_UNMAPPED,
    };

    fn board() -> Board {
        Board::new(BoardConfig::default()).unwrap()
    }

    #[test]
    fn test_layout() {
        let board = board();
        let manifest = board.manifest();
        assert_eq!(manifest.region("dac0").unwrap().size, 0x20);
        assert_eq!(manifest.register("dac0_pi", "master_select").unwrap().0, 0x2200);
        assert_eq!(manifest.register("pico0_regs", "x31").unwrap().0, 0x5100 + 30 * 4);
        assert_eq!(manifest.register("cl_params", "zpos").unwrap().0, 0x7014);
        assert_eq!(
            board.coprocessor_manifest().region("pico0_ram").unwrap().origin,
            0x10000
        );
        assert_eq!(board.master_index("dac0", "waveform"), Some(2));
        assert_eq!(board.master_index("wf0_ram", "player"), Some(1));
        assert_eq!(board.master_index("nope", "player"), None);
    }

    #[test]
    fn test_unmapped() {
        let mut board = board();
        assert!(matches!(
            board.read_word(0x8000),
            Err(transport::Error::Unmapped(0x8000))
        ));
        assert!(matches!(
            board.read_word(0x2002),
            Err(transport::Error::Misaligned(0x2002))
        ));
        // Inside a bank's region but past its last register
        assert_eq!(board.read_word(0x7018 + 4).unwrap(), SUPERVISOR_UNMAPPED);
        assert_eq!(
            board.coprocessor().read_word(0x10_001C).unwrap(),
            COPROCESSOR_UNMAPPED
        );
        // The co-processor can't see the supervisor-only regions
        assert!(board.coprocessor().read_word(0x2200).is_err());
    }

    #[test]
    fn test_ram_arbitration() {
        let mut board = board();
        board.write_word(0x6000, 0xCAFE).unwrap();
        // Still connected to the supervisor, the co-processor sees zeros
        assert_eq!(board.coprocessor().read_word(0x10000).unwrap(), 0);
        board.write_word(0x220C, 1).unwrap();
        assert_eq!(board.coprocessor().read_word(0x10000).unwrap(), 0xCAFE);
        assert_eq!(board.read_word(0x6000).unwrap(), 0);
    }

    #[test]
    fn test_peek_poke_sides() {
        let mut board = board();
        board.write_word(0x700C, 1234).unwrap();
        board.coprocessor().write_word(0x10_000C, 1).unwrap();
        assert_eq!(board.coprocessor().read_word(0x10_000C).unwrap(), 1234);
        board.coprocessor().write_word(0x10_0014, 99).unwrap();
        board.write_word(0x7014, 5).unwrap();
        assert_eq!(board.read_word(0x7014).unwrap(), 99);
    }

    #[test]
    fn test_bytes() {
        let mut board = board();
        board.write_word(0x4000, 0x0403_0201).unwrap();
        assert_eq!(board.read_byte(0x4002).unwrap(), 3);
        board.write_byte(0x4001, 0xAA).unwrap();
        assert_eq!(board.read_word(0x4000).unwrap(), 0x0403_AA01);
    }
}
