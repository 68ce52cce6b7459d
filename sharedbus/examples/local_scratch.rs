//! Talk to real hardware through `/dev/mem`: read the DAC's arbiter and, if the supervisor can
//! take it, write a code. Needs the `local` feature and root.
//!
//! Usage: `local_scratch <manifest.json>`

use sharedbus::{
    peripherals::arbiter::SUPERVISOR,
    prelude::*,
    transport::local::Local,
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
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: local_scratch <manifest.json>"))?;
    let manifest = read_manifest_file(path)?;
    let transport = Arc::new(Mutex::new(Local::new(&manifest)?));

    let dac = Ad5791::new(
        Arc::downgrade(&transport),
        &manifest,
        "dac0",
        DacCoding::TwosComplement,
    )?;
    println!("dac0 is connected to master {}", dac.spi().arbiter().active_master()?);
    let grant = dac.acquire(SUPERVISOR)?;
    dac.set_lsb(&grant, 0)?;
    println!("dac0 reads back {}", dac.lsb(&grant)?);
    Ok(())
}
