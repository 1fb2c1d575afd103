use std::path::Path;

use anyhow::Result;
use strata_engine::{EngineConfig, StrataEngine};

/// Opens a world, optionally runs a full legacy conversion, and prints the
/// engine status as JSON. Pass a TOML config path to override defaults and
/// `--convert` to force conversion regardless of the configured mode.
fn main() -> Result<()> {
    env_logger::init();

    let mut config = EngineConfig::default();
    let mut convert = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--convert" => convert = true,
            path => config = EngineConfig::load(Path::new(path))?,
        }
    }

    let engine = StrataEngine::open(config)?;
    if convert {
        let report = engine.convert_legacy()?;
        println!(
            "converted {} chunks in {} regions in {:.2?}",
            report.chunks, report.regions, report.elapsed
        );
    }

    let status = engine.status()?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    engine.shutdown()?;
    Ok(())
}
