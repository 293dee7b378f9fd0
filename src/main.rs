use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use wasm_counter::{graph, Config};

#[derive(Parser, Debug)]
#[command(version, about = "Instrument WASM modules with work counters")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Instrument a .wasm/.wat module and write the rewritten module
    Instrument {
        /// Input module (.wasm or .wat)
        input: PathBuf,
        /// Output module (.wasm or .wat)
        output: PathBuf,
    },
    /// Instrument a module and write its per-function adjacency lists as JSON
    AdjJson {
        /// Input module (.wasm or .wat)
        input: PathBuf,
        /// Output JSON file
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,wasm_counter=info"),
    )
    .init();

    let args = Args::parse();
    match args.command {
        Commands::Instrument { input, output } => {
            let wasm = read_module(&input)?;
            let instrumented = wasm_counter::instrument(&wasm, &Config::default())?;
            write_module(&output, &instrumented)
        }
        Commands::AdjJson { input, output } => {
            let wasm = read_module(&input)?;
            let (_, graphs) =
                wasm_counter::instrument_with_graphs(&wasm, &Config::default())?;
            let json = serde_json::to_string_pretty(&graph::graphs_to_json(&graphs))?;
            fs::write(&output, json)
                .with_context(|| format!("can't write {}", output.display()))
        }
    }
}

/// Reads a module in binary or text form, selected by file extension.
fn read_module(path: &Path) -> Result<Vec<u8>> {
    match extension(path)? {
        "wat" => wat::parse_file(path)
            .with_context(|| format!("can't parse {}", path.display())),
        _ => fs::read(path).with_context(|| format!("can't read {}", path.display())),
    }
}

fn write_module(path: &Path, wasm: &[u8]) -> Result<()> {
    let bytes = match extension(path)? {
        "wat" => wasmprinter::print_bytes(wasm)?.into_bytes(),
        _ => wasm.to_vec(),
    };
    fs::write(path, bytes).with_context(|| format!("can't write {}", path.display()))
}

fn extension(path: &Path) -> Result<&str> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext @ ("wat" | "wasm")) => Ok(ext),
        _ => bail!("{} must end in .wat or .wasm", path.display()),
    }
}
