use std::path::PathBuf;

use anyhow::Context;
use phobz_live::VisualizerConfig;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args_os().skip(1);
    let (Some(path), None) = (args.next(), args.next()) else {
        eprintln!("usage: phobz-live <audio file>");
        std::process::exit(1);
    };

    let config = VisualizerConfig::from_env().context("loading configuration")?;
    phobz_live::app::run(PathBuf::from(path), config)?;
    Ok(())
}
