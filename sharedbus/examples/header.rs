//! Print the simulated board's manifest, or a C header / Rust constants generated from it.
//!
//! Usage: `header [json|c|rust] [manifest.json]`. Without a manifest file the board's own
//! manifest is used.

use sharedbus::prelude::*;
use sharedbus_utils::header::{
    c_header,
    rust_constants,
};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let format = args.next().unwrap_or_else(|| "c".to_owned());
    let manifest = match args.next() {
        Some(path) => read_manifest_file(path)?,
        None => Board::new(Default::default())?.manifest().clone(),
    };
    match format.as_str() {
        "json" => println!("{}", manifest.to_json()?),
        "c" => print!("{}", c_header(&manifest)),
        "rust" => print!("{}", rust_constants(&manifest)),
        other => anyhow::bail!("unknown format `{other}`, expected json, c or rust"),
    }
    Ok(())
}
