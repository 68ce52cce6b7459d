//! Drive the simulated board's DAC and read its ADC as the supervisor, then hand the DAC to the
//! co-processor and show that the supervisor is locked out.

use sharedbus::{
    peripherals::arbiter::SUPERVISOR,
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
    let manifest = board.lock().map_err(|_| anyhow::anyhow!("poisoned"))?.manifest().clone();
    println!("manifest {}", manifest.md5_string());

    let dac = Ad5791::new(
        Arc::downgrade(&board),
        &manifest,
        "dac0",
        DacCoding::TwosComplement,
    )?;
    let adc = LtcAdc::new(Arc::downgrade(&board), &manifest, "adc0")?;

    let grant = dac.acquire(SUPERVISOR)?;
    let control = dac.configure(&grant)?;
    println!("DAC control: {control:?}");
    for volts in [-5.0, 0.0, 2.5, 9.99] {
        let lsb = dac.set_volts(&grant, volts)?;
        println!("{volts:>6.2} V -> {lsb:>8} LSB, reads back {:.6} V", dac.volts(&grant)?);
    }

    let adc_grant = adc.acquire(SUPERVISOR)?;
    println!("ADC reads {:.6} V", adc.read_volts(&adc_grant)?);

    // The co-processor takes the DAC, our grant goes stale
    let _cop = dac.acquire(1)?;
    match dac.set_volts(&grant, 1.0) {
        Err(e) => println!("as expected: {e}"),
        Ok(_) => anyhow::bail!("a stale grant was honoured"),
    }
    Ok(())
}
