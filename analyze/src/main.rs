use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use leak_analysis::{read_dump, LeakAnalyzer};

/// Re-run leak analysis over an event log dumped at shutdown
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the bincode event log dump
    dump: PathBuf,
    /// Write the report here instead of stdout
    #[clap(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let args = Args::parse();
    let dump = read_dump(&args.dump)
        .with_context(|| format!("reading event log {}", args.dump.display()))?;
    log::info!("loaded {} events from {}", dump.events.len(), args.dump.display());

    let report = LeakAnalyzer::default()
        .run(&dump.events)
        .context("analyzer already ran")?;

    match args.output {
        Some(path) => std::fs::write(&path, report.to_string())
            .with_context(|| format!("writing report to {}", path.display()))?,
        None => {
            let stdout = std::io::stdout();
            let mut stdout = stdout.lock();
            write!(stdout, "{}", report)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
