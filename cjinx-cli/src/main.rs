mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info};

use cjinx_core::config::{Config, CONFIG_ENV, DEFAULT_CONFIG_FILE};
use cjinx_core::engine::{Engine, RecoverySummary, RevertOutcome};
use cjinx_core::select::{corrupt_files, corrupt_from_directory, ProbabilityGate, Selection};
use cjinx_core::watch::{wait_for_arrival, ArrivalFilter};

#[derive(Parser)]
#[command(
    name = "cjinx",
    version,
    about = "[WARNING!] cjinx corrupts file(s) on disk, please use it with CAUTION!"
)]
struct Cli {
    /// Settings file (default: $CJINX_CONFIG, then ./cjinx.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Record store to use instead of paths.database_file
    #[arg(long = "db", global = true)]
    db: Option<PathBuf>,
    /// Be quiet
    #[arg(short, long, global = true, default_value_t = false)]
    quiet: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Corrupt the given files, or one random match of a pattern under -d
    Corrupt {
        /// Target files, or a single file-name pattern when -d is given (e.g. "*.bin")
        #[arg(short = 'f', num_args = 1.., required = true)]
        targets: Vec<String>,
        /// Directory to pick a random matching file from
        #[arg(short = 'd')]
        dir: Option<PathBuf>,
        /// Match files in the directory's entire subtree
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
        /// Probability of corrupting anything at all (default: 1.0)
        #[arg(short = 'p')]
        probability: Option<f64>,
    },
    /// Wait for a file matching -f to be written under -d, then corrupt it
    Wait {
        #[arg(short = 'd')]
        dir: PathBuf,
        #[arg(short = 'f')]
        pattern: String,
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
    /// Revert the given files, or every recorded file when -f is omitted
    Revert {
        #[arg(short = 'f', num_args = 1..)]
        files: Vec<PathBuf>,
    },
    /// Show stored corruption records
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg_path = config_path(cli.config.as_deref());
    let cfg = Config::load(&cfg_path)?.with_database_file(cli.db.clone());
    cfg.validate().with_context(|| format!("config {}", cfg_path.display()))?;
    logging::init(&cfg.debug_log_path()?, cli.quiet)?;

    let mut engine = cfg.open_engine(StdRng::from_entropy())?;
    let recovered = engine.recover()?;
    if recovered != RecoverySummary::default() {
        info!(
            "settled staged records: committed {}, dropped {}, unresolved {}",
            recovered.committed, recovered.dropped, recovered.unresolved
        );
    }

    match cli.cmd {
        Cmd::Corrupt { targets, dir, recursive, probability } => {
            corrupt(&mut engine, &targets, dir.as_deref(), recursive, probability)?
        }
        Cmd::Wait { dir, pattern, recursive } => wait(&mut engine, &dir, &pattern, recursive)?,
        Cmd::Revert { files } => revert(&mut engine, &files)?,
        Cmd::List => list(&engine)?,
    }
    Ok(())
}

fn config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(p) = flag {
        return p.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

fn corrupt(
    engine: &mut Engine,
    targets: &[String],
    dir: Option<&Path>,
    recursive: bool,
    probability: Option<f64>,
) -> Result<()> {
    let gate = ProbabilityGate::new(probability);
    info!("probability = {}", gate.probability());
    if !gate.roll(engine.rng_mut()) {
        info!("Nothing happened this time");
        return Ok(());
    }

    if let Some(dir) = dir {
        let [pattern] = targets else {
            bail!("-d takes exactly one file pattern via -f, got {}", targets.len());
        };
        match corrupt_from_directory(engine, dir, pattern, recursive)? {
            Selection::Corrupted(rec) => info!("corrupted {}", rec.path.display()),
            Selection::NoCandidates => info!("no file matching {pattern} to corrupt under {}", dir.display()),
        }
        return Ok(());
    }

    let files: Vec<PathBuf> = targets.iter().map(PathBuf::from).collect();
    let results = corrupt_files(engine, &files);
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        bail!("{} of {} file(s) not corrupted", failed, results.len());
    }
    Ok(())
}

fn wait(engine: &mut Engine, dir: &Path, pattern: &str, recursive: bool) -> Result<()> {
    let filter = ArrivalFilter::new(dir, pattern, recursive)?;
    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&shutdown)).context("install signal handler")?;
    }
    info!("waiting for file {pattern} to arrive ...");
    match wait_for_arrival(&filter, &shutdown)? {
        Some(path) => {
            engine.corrupt(&path)?;
        }
        None => info!("stopped waiting; nothing corrupted"),
    }
    Ok(())
}

fn revert(engine: &mut Engine, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        let summary = engine.revert_all()?;
        info!(
            "reverted {}, not found {}, failed {}",
            summary.reverted, summary.not_found, summary.failed
        );
        if summary.failed > 0 {
            bail!("{} record(s) could not be reverted", summary.failed);
        }
        return Ok(());
    }

    let mut failed = 0usize;
    for f in files {
        match engine.revert(f) {
            Ok(RevertOutcome::Reverted(_)) | Ok(RevertOutcome::NotFound) => {}
            Err(e) => {
                error!("{e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} file(s) not reverted", failed, files.len());
    }
    Ok(())
}

fn list(engine: &Engine) -> Result<()> {
    let records = engine.store().get_all()?;
    for r in &records {
        println!(
            "{:9}  {:>12}  {:>4}  {:#04x}->{:#04x}  {}",
            format!("{:?}", r.state).to_lowercase(),
            r.block,
            r.offset,
            r.original,
            r.modified,
            r.path.display()
        );
    }
    eprintln!("{} record(s)", records.len());
    Ok(())
}
