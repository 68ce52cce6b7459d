//! Load a program into the co-processor, tune the control loop and inspect the shared parameter
//! block from both sides of the bus.
//!
//! Usage: `coprocessor [program.bin] [P gain] [I gain]`

use sharedbus::{
    peripherals::control_loop::{
        gain_to_string,
        parse_gain,
    },
    prelude::*,
};
use sharedbus_utils::manifest::Side;
use std::sync::{
    Arc,
    Mutex,
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();
    let mut args = std::env::args().skip(1);
    let program = match args.next() {
        Some(path) => std::fs::read(path)?,
        // A single `nop`
        None => vec![0x13, 0x00, 0x00, 0x00],
    };
    let p = parse_gain(&args.next().unwrap_or_else(|| "0.0006".to_owned()))?;
    let i = parse_gain(&args.next().unwrap_or_else(|| "0.00001".to_owned()))?;

    let board = Arc::new(Mutex::new(Board::new(Default::default())?));
    let (manifest, core) = {
        let b = board.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        (b.manifest().clone(), b.master_index("pico0_ram", "coprocessor"))
    };
    let core = core.ok_or_else(|| anyhow::anyhow!("the board has no co-processor"))?;

    let pico = PicoRv32::new(Arc::downgrade(&board), &manifest, "pico0", core)?;
    pico.load(&program, true)?;
    pico.enable()?;
    println!("{:#x?}", pico.dump()?);

    let cl = ControlLoop::new(Arc::downgrade(&board), &manifest, "cl")?;
    cl.set_gains(p, i)?;
    cl.set_setpoint(1000)?;
    cl.start()?;
    let (p, i) = cl.gains()?;
    println!("P = {}, I = {}", gain_to_string(p)?, gain_to_string(i)?);
    println!("loop ran {} cycles", cl.cycles()?);
    cl.stop()?;

    let params = Parameters::new(&Arc::downgrade(&board), &manifest, "cl_params", Side::Supervisor)?;
    params.setpoint.write(&-250)?;
    if let Err(e) = params.z_position.write(&0) {
        println!("supervisor can't write zpos: {e}");
    }
    println!("setpt = {}, zpos = {}", params.setpoint.read()?, params.z_position.read()?);
    Ok(())
}
