//! Play a ramp through the simulated waveform engine and watch the DAC follow it.

use sharedbus::{
    peripherals::waveform::WaveformState,
    prelude::*,
};
use std::sync::{
    Arc,
    Mutex,
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let board = Arc::new(Mutex::new(Board::new(Default::default())?));
    let (manifest, player, waveform) = {
        let b = board.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        (
            b.manifest().clone(),
            b.master_index("wf0_ram", "player"),
            b.master_index("dac0", "waveform"),
        )
    };
    let (Some(player), Some(waveform)) = (player, waveform) else {
        anyhow::bail!("the board has no waveform engine");
    };

    let dac = Ad5791::new(
        Arc::downgrade(&board),
        &manifest,
        "dac0",
        DacCoding::TwosComplement,
    )?;
    let wf = Waveform::new(Arc::downgrade(&board), &manifest, "wf0", player, waveform)?;

    let ramp: Vec<u32> = (-8..8)
        .map(|v| DacCoding::TwosComplement.encode(v * 0x1000))
        .collect();
    let grant = dac.acquire(wf.dac_master())?;
    wf.start(&grant, &ramp, 4, false)?;
    while wf.status()? == WaveformState::Running {
        let code = board.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.dac().dac();
        println!("sample {:>2}: DAC holds {code:#07x}", wf.cursor()?);
    }
    wf.stop()?;
    Ok(())
}
