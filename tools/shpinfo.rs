// SPDX-License-Identifier: MIT
//! Inspect shapefile sets: header summaries or a JSON dump of features

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use shapefile_codec::logging::{init_logging, LogFormat};
use shapefile_codec::{
    CodecConfig, IndexReader, InputItem, ShapeHeader, ShapefileInput, ShapefileReader,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "shpinfo", about = "Inspect ESRI shapefile sets")]
struct Cli {
    /// TOML settings file; SHAPEFILE_* variables are used otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Header, shape type, extent and record count of every set
    Info { path: PathBuf },
    /// One JSON line per schema and feature
    Dump { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    init_logging(format).context("failed to install log subscriber")?;

    let config = match &cli.config {
        Some(path) => CodecConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CodecConfig::from_env(),
    };
    config.validate()?;

    match cli.command {
        Command::Info { path } => info_command(&path, &config),
        Command::Dump { path } => dump_command(&path, &config),
    }
}

fn open_input(path: &Path, config: &CodecConfig) -> anyhow::Result<ShapefileInput> {
    let input = if path.is_file() && !has_shp_extension(path) {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        ShapefileInput::from_reader(BufReader::new(file), config.scratch_dir.as_deref())?
    } else {
        ShapefileInput::open(path)?
    };
    Ok(input.with_strict_datum(config.strict_datum))
}

fn has_shp_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("shp"))
}

fn info_command(path: &Path, config: &CodecConfig) -> anyhow::Result<()> {
    let input = open_input(path, config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for shp in input.shapefiles() {
        let file = File::open(shp).with_context(|| format!("failed to open {}", shp.display()))?;
        let mut reader = match ShapefileReader::new(BufReader::new(file)) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(path = %shp.display(), error = %e, "Skipping unreadable shapefile");
                continue;
            }
        };
        let header: ShapeHeader = *reader.header();
        let mut records = 0usize;
        let mut nulls = 0usize;
        for record in reader.by_ref() {
            match record {
                Ok(r) if r.geometry.is_none() => {
                    records += 1;
                    nulls += 1;
                }
                Ok(_) => records += 1,
                Err(e) => {
                    warn!(path = %shp.display(), record = records + 1, error = %e, "Stopped at bad record");
                    break;
                }
            }
        }

        let index_entries = ["shx", "SHX"]
            .iter()
            .map(|ext| shp.with_extension(ext))
            .find(|p| p.is_file())
            .and_then(|p| File::open(p).ok())
            .and_then(|f| IndexReader::from_reader(BufReader::new(f)).ok())
            .map(|index| index.len());

        let bbox = header.bbox;
        writeln!(out, "{}", shp.display())?;
        writeln!(out, "  shape type:   {}", header.shape_type)?;
        writeln!(out, "  file length:  {} words", header.file_length)?;
        writeln!(
            out,
            "  extent:       ({}, {}) - ({}, {})",
            bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat
        )?;
        if let Some((lo, hi)) = bbox.z_range {
            writeln!(out, "  elevation:    {lo} - {hi}")?;
        }
        writeln!(out, "  records:      {records} ({nulls} null)")?;
        match index_entries {
            Some(n) => writeln!(out, "  index:        {n} entries")?,
            None => writeln!(out, "  index:        missing")?,
        }
    }

    let schemata = input.enumerate_schemata()?;
    info!(sets = input.shapefiles().len(), schemata = schemata.len(), "Inspected input");
    input.close()?;
    Ok(())
}

fn dump_command(path: &Path, config: &CodecConfig) -> anyhow::Result<()> {
    let mut input = open_input(path, config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut features = 0usize;

    for item in input.by_ref() {
        let line = match item {
            Ok(InputItem::Schema(schema)) => json!({ "schema": schema }),
            Ok(InputItem::Feature(feature)) => {
                features += 1;
                json!({ "feature": feature })
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Skipping shapefile set");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
    }

    info!(features, "Dump complete");
    input.close()?;
    Ok(())
}
