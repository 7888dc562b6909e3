//! Command-line glue over `opl-formats`: convert between supported file
//! formats, identify a file, and dump its parsed event list.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use opl_formats::handler::Content;
use opl_formats::registry::Registry;

#[derive(Parser, Debug)]
#[command(version, about = "Convert, identify and dump OPL/MIDI music files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every registered format and what it can represent.
    Formats,

    /// Identify a file's format.
    Identify {
        /// File to inspect.
        path: PathBuf,
    },

    /// Parse a file and print its tags, track layout and events.
    Dump {
        /// File to parse.
        path: PathBuf,

        /// Format id to parse with (see `formats`). Autodetected if omitted.
        #[arg(long)]
        format: Option<String>,
    },

    /// Convert a file from one format to another.
    Convert {
        /// Input file.
        input: PathBuf,

        /// Output file.
        output: PathBuf,

        /// Input format id. Autodetected if omitted.
        #[arg(long)]
        from: Option<String>,

        /// Output format id.
        #[arg(long)]
        to: String,
    },
}

fn load(path: &PathBuf) -> Result<Content> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Content::from_bytes(bytes))
}

fn filename_of(path: &PathBuf) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn resolve_input_handler<'a>(registry: &'a Registry, content: &Content, filename: &str, explicit: Option<&str>) -> Result<&'a dyn opl_formats::FormatHandler> {
    if let Some(id) = explicit {
        return registry
            .by_id(id)
            .ok_or_else(|| anyhow::anyhow!("unknown format id {id:?}; see `opl-cli formats`"));
    }
    let report = registry.identify(content, filename);
    match report.confirmed {
        Some(idx) => Ok(registry.handlers()[idx].as_ref()),
        None => {
            let maybes: Vec<String> = report
                .verdicts
                .iter()
                .filter(|(_, id)| id.valid == opl_formats::Validity::Maybe)
                .map(|(idx, id)| format!("{} ({})", registry.handlers()[*idx].metadata().id, id.reason))
                .collect();
            if maybes.is_empty() {
                bail!("no registered format recognized this file");
            }
            bail!("ambiguous format, pass --from explicitly; candidates: {}", maybes.join(", "));
        }
    }
}

fn run_formats(registry: &Registry) {
    for handler in registry.handlers() {
        let meta = handler.metadata();
        println!("{:<14} {}", meta.id, meta.title);
        if !meta.glob.is_empty() {
            println!("{:<14} glob: {}", "", meta.glob.join(", "));
        }
    }
}

fn run_identify(registry: &Registry, path: &PathBuf) -> Result<()> {
    let content = load(path)?;
    let filename = filename_of(path);
    let report = registry.identify(&content, &filename);
    for (idx, verdict) in &report.verdicts {
        let id = registry.handlers()[*idx].metadata().id;
        println!("{id:<14} {:?}: {}", verdict.valid, verdict.reason);
    }
    match report.confirmed {
        Some(idx) => println!("\nconfirmed: {}", registry.handlers()[idx].metadata().id),
        None => println!("\nno unambiguous match"),
    }
    Ok(())
}

fn run_dump(registry: &Registry, path: &PathBuf, format: Option<&str>) -> Result<()> {
    let content = load(path)?;
    let filename = filename_of(path);
    let handler = resolve_input_handler(registry, &content, &filename, format)?;
    let music = handler.parse(&content)?;

    println!("tags: {}", serde_json::to_string(&music.tags)?);
    println!("initial tempo: {} bpm, {} ticks/quarter", music.initial_tempo.bpm(), music.initial_tempo.ticks_per_quarter_note());
    println!("patches: {}", music.patches.len());
    println!("tracks: {:?}", music.track_config);

    for (p, pattern) in music.patterns.iter().enumerate() {
        println!("pattern {p}:");
        for (t, track) in pattern.iter().enumerate() {
            println!("  track {t}:");
            for event in track {
                println!("    {event:?}");
            }
        }
    }
    Ok(())
}

fn run_convert(registry: &Registry, input: &PathBuf, output: &PathBuf, from: Option<&str>, to: &str) -> Result<()> {
    let content = load(input)?;
    let filename = filename_of(input);
    let input_handler = resolve_input_handler(registry, &content, &filename, from)?;
    let music = input_handler.parse(&content)?;
    music.validate().context("parsed music failed its own invariants")?;

    let output_handler = registry
        .by_id(to)
        .ok_or_else(|| anyhow::anyhow!("unknown output format id {to:?}; see `opl-cli formats`"))?;

    for issue in output_handler.check_limits(&music) {
        tracing::warn!(%issue, "generate precondition not met");
        bail!("cannot convert to {to}: {issue}");
    }

    let (out_content, warnings) = output_handler.generate(&music)?;
    for w in &warnings {
        tracing::warn!(%w, "lossy conversion");
    }
    fs::write(output, &out_content.main).with_context(|| format!("writing {}", output.display()))?;
    println!("wrote {} ({} bytes)", output.display(), out_content.main.len());
    if !warnings.is_empty() {
        println!("{} warning(s):", warnings.len());
        for w in warnings {
            println!("  - {w}");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let registry = Registry::with_builtin_formats();

    match cli.command {
        Commands::Formats => {
            run_formats(&registry);
            Ok(())
        }
        Commands::Identify { path } => run_identify(&registry, &path),
        Commands::Dump { path, format } => run_dump(&registry, &path, format.as_deref()),
        Commands::Convert { input, output, from, to } => run_convert(&registry, &input, &output, from.as_deref(), &to),
    }
}
