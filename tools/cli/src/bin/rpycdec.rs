use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rpycdec::{disasm, Profile, Schema};
use rpycdec_cli::{archive, batch, envelope, load_registry, save, write_output};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Ren'Py compiled script and archive tool")]
struct Cli {
    /// Log more (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Extra class catalog (TOML) appended to the builtin one.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Regenerate source from a compiled script or a directory of them.
    Decompile {
        path: PathBuf,
        /// Output file, or output root for a directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Rendering rules to use instead of the inferred ones.
        #[arg(long)]
        schema: Option<Schema>,
    },
    /// Unpack an RPA-3.0 archive.
    Extract {
        archive: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the member listing as JSON instead of extracting.
        #[arg(long, default_value_t = false)]
        list: bool,
    },
    /// Dump the opcode listing of a compiled script or a raw stream.
    Dis {
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert a save log to editable JSON.
    SaveExtract {
        log: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert edited JSON back to a save log.
    SaveRestore {
        json: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let catalog = cli.catalog.as_deref();
    match cli.command {
        Command::Decompile {
            path,
            output,
            schema,
        } => decompile(&path, output.as_deref(), schema, catalog),
        Command::Extract {
            archive,
            output,
            list,
        } => extract(&archive, output.as_deref(), list),
        Command::Dis { file, output } => dis(&file, output.as_deref()),
        Command::SaveExtract { log, output } => save_extract(&log, output.as_deref(), catalog),
        Command::SaveRestore { json, output } => save_restore(&json, output.as_deref(), catalog),
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn decompile(
    path: &Path,
    output: Option<&Path>,
    schema: Option<Schema>,
    catalog: Option<&Path>,
) -> Result<()> {
    let registry = load_registry(Profile::Script, catalog)?;
    let report = batch::decompile_path(path, output, &registry, schema)?;
    if report.is_clean() {
        info!(files = report.written.len(), "done");
        return Ok(());
    }
    for (path, err) in &report.failed {
        error!(path = %path.display(), "{err:#}");
    }
    bail!(
        "{} of {} file(s) failed",
        report.failed.len(),
        report.failed.len() + report.written.len()
    )
}

fn extract(path: &Path, output: Option<&Path>, list: bool) -> Result<()> {
    if list {
        let members = archive::list(path)?;
        println!("{}", serde_json::to_string_pretty(&members)?);
        return Ok(());
    }
    let out_dir = output.unwrap_or_else(|| Path::new("."));
    let report = archive::extract(path, out_dir)?;
    info!(
        written = report.written.len(),
        skipped = report.skipped.len(),
        "archive extracted"
    );
    Ok(())
}

fn dis(path: &Path, output: Option<&Path>) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let payload = if batch::is_compiled_script(path) || envelope::is_rpc2(&data) {
        envelope::script_payload(&data)?
    } else {
        data
    };
    let listing = disasm(&payload).context("disassemble")?;
    match output {
        Some(output) => write_output(output, listing),
        None => {
            print!("{listing}");
            Ok(())
        }
    }
}

fn save_extract(path: &Path, output: Option<&Path>, catalog: Option<&Path>) -> Result<()> {
    let registry = load_registry(Profile::Save, catalog)?;
    let log = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let json = save::log_to_json(&log, &registry)?;
    let dest = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.with_extension("json"));
    write_output(&dest, serde_json::to_string_pretty(&json)?)?;
    info!(path = %dest.display(), "save log extracted");
    Ok(())
}

fn save_restore(path: &Path, output: Option<&Path>, catalog: Option<&Path>) -> Result<()> {
    let registry = load_registry(Profile::Save, catalog)?;
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    let log = save::json_to_log(&json, &registry)?;
    let dest = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.with_extension(""));
    write_output(&dest, log)?;
    info!(path = %dest.display(), "save log restored");
    Ok(())
}
