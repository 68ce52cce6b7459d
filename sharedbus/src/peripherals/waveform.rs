//! Driver for the waveform player, which replays a buffer of DAC codes at a fixed spacing.
//!
//! The player sits behind two arbiters: its sample RAM (`<name>_ram`) and the DAC it drives.
//! Loading a waveform needs the RAM for the supervisor, playing it needs both for the player.

pub use crate::fabric::waveform::WaveformState;

use super::{
    arbiter::{
        Arbiter,
        Grant,
        SUPERVISOR,
    },
    with_transport,
    Error,
};
use crate::{
    core::{
        region_bounds,
        PollLimit,
        Register,
    },
    transport::Transport,
};
use kstring::KString;
use sharedbus_utils::manifest::Manifest;
use std::sync::{
    Mutex,
    Weak,
};

/// The width register counts samples in 16 bits
const MAX_SAMPLES: usize = 0xFFFF;

#[derive(Debug)]
pub struct Waveform<T> {
    /// Upwards pointer to the parent class' transport
    transport: Weak<Mutex<T>>,
    name: KString,
    ram: Arbiter<T>,
    ram_origin: u32,
    ram_size: u32,
    /// The player's index on the RAM's interface
    ram_master: usize,
    /// The player's index on the DAC's interface
    dac_master: usize,
    run: Register,
    force_stop: Register,
    do_loop: Register,
    wform_width: Register,
    timer_spacing: Register,
    finished_or_ready: Register,
    finished: Register,
    cursor: Register,
    poll: PollLimit,
}

impl<T> Waveform<T>
where
    T: Transport,
{
    /// The player in region `name`, with its samples in `<name>_ram`
    /// # Errors
    /// Returns an error if the manifest is missing any of the player's registers or regions
    pub fn new(
        transport: Weak<Mutex<T>>,
        manifest: &Manifest,
        name: &str,
        ram_master: usize,
        dac_master: usize,
    ) -> Result<Self, Error> {
        let reg = |r| Register::resolve(manifest, name, r);
        let ram_name = format!("{name}_ram");
        let (ram_origin, ram_size) = region_bounds(manifest, &ram_name)?;
        Ok(Self {
            ram: Arbiter::new(transport.clone(), manifest, &ram_name)?,
            transport,
            name: KString::from_ref(name),
            ram_origin,
            ram_size,
            ram_master,
            dac_master,
            run: reg("run")?,
            force_stop: reg("force_stop")?,
            do_loop: reg("do_loop")?,
            wform_width: reg("wform_width")?,
            timer_spacing: reg("timer_spacing")?,
            finished_or_ready: reg("finished_or_ready")?,
            finished: reg("finished")?,
            cursor: reg("cursor")?,
            poll: PollLimit::default(),
        })
    }

    #[must_use]
    pub fn with_poll_limit(mut self, poll: PollLimit) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The player's master index on the DAC's interface, for [`Arbiter::acquire`]
    #[must_use]
    pub fn dac_master(&self) -> usize {
        self.dac_master
    }

    /// How many samples fit in the player's RAM
    #[must_use]
    pub fn capacity(&self) -> usize {
        (self.ram_size as usize / 4).min(MAX_SAMPLES)
    }

    /// Load `samples` (raw DAC codes) and start playing them, one every `spacing` cycles.
    /// `dac` must be the player's current grant on the DAC interface.
    /// # Errors
    /// Returns [`Error::NotOwner`] if the player doesn't own the DAC, [`Error::TooLarge`] if the
    /// samples don't fit, [`Error::Timeout`] if a running waveform doesn't stop
    pub fn start(
        &self,
        dac: &Grant<'_, T>,
        samples: &[u32],
        spacing: u32,
        do_loop: bool,
    ) -> Result<(), Error> {
        if samples.is_empty() {
            return Err(Error::OutOfRange("an empty waveform".to_owned()));
        }
        if samples.len() > self.capacity() {
            return Err(Error::TooLarge {
                len: samples.len() * 4,
                capacity: self.ram_size,
            });
        }
        let width = u32::try_from(samples.len())
            .map_err(|_| Error::OutOfRange(format!("{} samples", samples.len())))?;
        with_transport(&self.transport, |t| {
            dac.arbiter().check_with(t, dac, self.dac_master)?;
            self.stop_with(t)?;
            let ram = self.ram.acquire_with(t, SUPERVISOR)?;
            t.write_words(self.ram_origin, samples)?;
            self.wform_width.set(t, width)?;
            self.timer_spacing.set(t, spacing)?;
            self.do_loop.set(t, u32::from(do_loop))?;
            ram.hand_off_with(t, self.ram_master)?;
            Ok(self.run.set(t, 1)?)
        })?;
        tracing::info!(
            "{}: playing {width} samples every {spacing} cycles{}",
            self.name,
            if do_loop { ", looping" } else { "" }
        );
        Ok(())
    }

    /// Stop after the current sample and wait for the player to become ready
    /// # Errors
    /// Returns [`Error::Timeout`] if the player never reports ready
    pub fn stop(&self) -> Result<(), Error> {
        with_transport(&self.transport, |t| self.stop_with(t))?;
        tracing::info!("{}: stopped", self.name);
        Ok(())
    }

    fn stop_with(&self, transport: &mut T) -> Result<(), Error> {
        self.run.set(transport, 0)?;
        self.do_loop.set(transport, 0)?;
        self.poll.wait("finished_or_ready", || -> Result<bool, Error> {
            Ok(self.finished_or_ready.get(transport)? == 1)
        })
    }

    /// Abort playback immediately, without waiting for the current sample
    /// # Errors
    /// Returns an error on bad transport
    pub fn force_stop(&self) -> Result<(), Error> {
        with_transport(&self.transport, |t| {
            self.force_stop.set(t, 1)?;
            self.run.set(t, 0)?;
            self.do_loop.set(t, 0)?;
            Ok(self.force_stop.set(t, 0)?)
        })?;
        tracing::info!("{}: forced to stop", self.name);
        Ok(())
    }

    /// # Errors
    /// Returns an error on bad transport
    pub fn status(&self) -> Result<WaveformState, Error> {
        with_transport(&self.transport, |t| {
            Ok(if self.finished.get(t)? == 1 {
                WaveformState::Finished
            } else if self.finished_or_ready.get(t)? == 1 {
                WaveformState::Ready
            } else {
                WaveformState::Running
            })
        })
    }

    /// Index of the sample being played
    /// # Errors
    /// Returns an error on bad transport
    pub fn cursor(&self) -> Result<u32, Error> {
        with_transport(&self.transport, |t| Ok(self.cursor.get(t)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fabric::board::Board,
        peripherals::{
            spi::Spi,
            testing::board,
        },
    };
    use std::sync::Arc;

    struct Fixture {
        board: Arc<Mutex<Board>>,
        dac: Spi<Board>,
        wf: Waveform<Board>,
    }

    fn fixture() -> Fixture {
        let board = board();
        let (manifest, ram_master, dac_master) = {
            let b = board.lock().unwrap();
            (
                b.manifest().clone(),
                b.master_index("wf0_ram", "player").unwrap(),
                b.master_index("dac0", "waveform").unwrap(),
            )
        };
        let dac = Spi::new(Arc::downgrade(&board), &manifest, "dac0").unwrap();
        let wf = Waveform::new(
            Arc::downgrade(&board),
            &manifest,
            "wf0",
            ram_master,
            dac_master,
        )
        .unwrap();
        Fixture { board, dac, wf }
    }

    fn wait_for(wf: &Waveform<Board>, state: WaveformState) {
        for _ in 0..1000 {
            if wf.status().unwrap() == state {
                return;
            }
        }
        panic!("waveform never reached {state:?}");
    }

    #[test]
    fn test_one_shot() {
        let Fixture { board, dac, wf } = fixture();
        let grant = dac.acquire(wf.dac_master()).unwrap();
        wf.start(&grant, &[0x10, 0x20, 0x30], 2, false).unwrap();
        wait_for(&wf, WaveformState::Finished);
        assert_eq!(board.lock().unwrap().dac().dac(), 0x30);
        wf.stop().unwrap();
        assert_eq!(wf.status().unwrap(), WaveformState::Ready);
    }

    #[test]
    fn test_loop_and_force_stop() {
        let Fixture { board: _board, dac, wf } = fixture();
        let grant = dac.acquire(wf.dac_master()).unwrap();
        wf.start(&grant, &[1, 2, 3, 4], 0, true).unwrap();
        for _ in 0..200 {
            assert_eq!(wf.status().unwrap(), WaveformState::Running);
        }
        wf.force_stop().unwrap();
        assert_eq!(wf.status().unwrap(), WaveformState::Ready);
        assert_eq!(wf.cursor().unwrap(), 0);
    }

    #[test]
    fn test_restart_stops_first() {
        let Fixture { board, dac, wf } = fixture();
        let grant = dac.acquire(wf.dac_master()).unwrap();
        wf.start(&grant, &[7; 8], 0, true).unwrap();
        wf.start(&grant, &[9], 0, false).unwrap();
        wait_for(&wf, WaveformState::Finished);
        assert_eq!(board.lock().unwrap().dac().dac(), 9);
    }

    #[test]
    fn test_needs_dac() {
        let Fixture { board, dac, wf } = fixture();
        let grant = dac.acquire(SUPERVISOR).unwrap();
        assert!(matches!(
            wf.start(&grant, &[1], 0, false),
            Err(Error::NotOwner { .. })
        ));
        // A stale grant for the player is refused too
        let grant = dac.acquire(wf.dac_master()).unwrap();
        dac.acquire(SUPERVISOR).unwrap();
        assert!(wf.start(&grant, &[1], 0, false).is_err());
        assert_eq!(board.lock().unwrap().waveform_state(), WaveformState::Ready);
    }

    #[test]
    fn test_too_large() {
        let Fixture { board: _board, dac, wf } = fixture();
        let grant = dac.acquire(wf.dac_master()).unwrap();
        let samples = vec![0; wf.capacity() + 1];
        assert!(matches!(
            wf.start(&grant, &samples, 0, false),
            Err(Error::TooLarge { .. })
        ));
        assert!(matches!(
            wf.start(&grant, &[], 0, false),
            Err(Error::OutOfRange(_))
        ));
        // Nothing was started
        assert_eq!(wf.status().unwrap(), WaveformState::Ready);
    }
}
