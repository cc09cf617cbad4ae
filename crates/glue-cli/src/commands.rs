//! Subcommand definitions and handlers.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glue_core::{CacheConfig, Store};
use tracing::info;

#[derive(Parser)]
#[command(name = "glue", about = "Manage per-rank transport-property cache stores", version)]
pub struct Cli {
    /// Optional JSON config file (tolerance digits, capacity, ...)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create (or reset with --force) a rank's cache store
    Init {
        /// Path of the SQLite store file
        #[arg(long)]
        db: PathBuf,
        /// Rank that will own this store
        #[arg(long, default_value_t = 0)]
        rank: u32,
        /// Delete any existing store at the path first
        #[arg(long)]
        force: bool,
    },
    /// Show entry and hit counts for a store
    Stats {
        #[arg(long)]
        db: PathBuf,
    },
    /// Dump all entries as whitespace columns (training-data extraction)
    Export {
        #[arg(long)]
        db: PathBuf,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub fn dispatch(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => CacheConfig::from_json_file(path)?,
        None => CacheConfig::default(),
    };

    match cli.command {
        Command::Init { db, rank, force } => init(&db, rank, force, &config),
        Command::Stats { db } => stats(&db, &config),
        Command::Export { db, output } => export(&db, output.as_deref(), &config),
    }
}

fn init(db: &Path, rank: u32, force: bool, config: &CacheConfig) -> Result<()> {
    if db.exists() {
        if !force {
            bail!("{} already exists (use --force to reset it)", db.display());
        }
        fs::remove_file(db).with_context(|| format!("failed to remove {}", db.display()))?;
        // stale WAL sidecars would resurrect the old contents
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                fs::remove_file(&sidecar)
                    .with_context(|| format!("failed to remove {}", sidecar.display()))?;
            }
        }
    }
    let store = Store::open(rank, db, config)?;
    store.close()?;
    info!(rank, db = %db.display(), "store initialized");
    println!("initialized store for rank {rank} at {}", db.display());
    Ok(())
}

fn stats(db: &Path, config: &CacheConfig) -> Result<()> {
    if !db.exists() {
        bail!("no store at {}", db.display());
    }
    let store = Store::open(0, db, config)?;
    let entries = store.export_entries()?;
    let total_hits: u64 = entries.iter().map(|e| e.hit_count).sum();
    println!("entries: {}", entries.len());
    println!("total hits: {total_hits}");
    match config.max_entries {
        Some(cap) => println!("capacity: {cap}"),
        None => println!("capacity: unbounded"),
    }
    Ok(())
}

fn export(db: &Path, output: Option<&Path>, config: &CacheConfig) -> Result<()> {
    if !db.exists() {
        bail!("no store at {}", db.display());
    }
    let store = Store::open(0, db, config)?;
    let entries = store.export_entries()?;

    let mut out = String::new();
    out.push_str(&header());
    out.push('\n');
    for entry in &entries {
        let mut fields: Vec<String> = Vec::new();
        fields.push(entry.state.temperature.to_string());
        fields.extend(entry.state.density.iter().map(f64::to_string));
        fields.extend(entry.state.charges.iter().map(f64::to_string));
        fields.push(entry.value.viscosity.to_string());
        fields.push(entry.value.thermal_conductivity.to_string());
        fields.extend(entry.value.diffusion.iter().map(f64::to_string));
        out.push_str(&fields.join(" "));
        out.push('\n');
    }

    match output {
        Some(path) => {
            let mut file = fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            file.write_all(out.as_bytes())?;
            info!(rows = entries.len(), path = %path.display(), "exported entries");
        }
        None => print!("{out}"),
    }
    Ok(())
}

fn header() -> String {
    let mut fields = vec!["#InTemperature".to_string()];
    for i in 0..glue_core::MAX_SPECIES {
        fields.push(format!("InDensity[{i}]"));
    }
    for i in 0..glue_core::MAX_SPECIES {
        fields.push(format!("InCharges[{i}]"));
    }
    fields.push("OutViscosity".to_string());
    fields.push("OutThermalConductivity".to_string());
    for i in 0..glue_core::DIFFUSION_LEN {
        fields.push(format!("OutDiffusionCoefficient[{i}]"));
    }
    fields.join(" ")
}
