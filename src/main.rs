//! Tensched Command Line Interface
//!
//! Usage:
//!   tensched [OPTIONS] <input-file>
//!   tensched --help
//!
//! Examples:
//!   tensched fused.json                         # Design space with auto-inline
//!   tensched --tile=16,32 matmul.json           # Add a two-level tiling rule
//!   tensched --no-inline --tile=8 --emit=ir mm.json
//!   tensched --emit=json -o space.json fused.json

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tensched::ir::Function;
use tensched::schedule::{Schedule, Trace};
use tensched::space::{AutoInline, SpaceConfig, Target, TileSplit, TuneContext};

/// Tensched - Tensor Program Scheduling
#[derive(Parser, Debug)]
#[command(name = "tensched")]
#[command(author = "Tensched Contributors")]
#[command(version)]
#[command(about = "Generate the schedule design space of a tensor function", long_about = None)]
struct Cli {
    /// Input function (.json format)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Disable the auto-inline rule
    #[arg(long)]
    no_inline: bool,

    /// Let auto-inline also fold consumers into producers
    #[arg(long)]
    reverse_inline: bool,

    /// Inner tile factors (comma-separated); enables the tiling rule
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    tile: Option<Vec<i64>>,

    /// Target handed to the rules
    #[arg(short, long, default_value = "llvm")]
    target: String,

    /// Task name used in logs
    #[arg(long)]
    task: Option<String>,

    /// What to emit
    #[arg(long, default_value = "traces")]
    emit: EmitKind,

    /// Verify every candidate schedule
    #[arg(long)]
    verify: bool,

    /// Expand the design space on all cores
    #[arg(long)]
    parallel: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Trace of every candidate
    Traces,
    /// Scheduled function of every candidate
    Ir,
    /// Traces and functions as JSON
    Json,
}

#[derive(Serialize)]
struct Candidate<'a> {
    index: usize,
    trace: &'a Trace,
    func: Function,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("Tensched v{}", tensched::VERSION);
    debug!("Input file: {:?}", cli.input);

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;
    let func = tensched::parse_function(&source)
        .with_context(|| format!("Failed to parse function from {:?}", cli.input))?;

    let context = build_context(&cli, &func);
    let config = SpaceConfig::new().parallel(cli.parallel).debug_verify(cli.verify);
    debug!("Tune context: {:?}", context);
    debug!("Space config: {:?}", config);

    info!("Generating design space...");
    let space = tensched::generate_design_space(&func, &context, &config)
        .with_context(|| format!("Design space generation failed for \"{}\"", func.name))?;
    info!("{} candidate(s)", space.len());

    let output = render(&space, cli.emit)?;
    write_output(&cli.output, &output)
}

fn build_context(cli: &Cli, func: &Function) -> TuneContext {
    let task = cli.task.clone().unwrap_or_else(|| func.name.clone());
    let mut context = TuneContext::new(task).target(Target::new(cli.target.clone()));
    if !cli.no_inline {
        context = context.rule(AutoInline::new().with_reverse(cli.reverse_inline));
    }
    if let Some(ref factors) = cli.tile {
        context = context.rule(TileSplit::new(factors.clone()));
    }
    context
}

fn render(space: &[Schedule], emit: EmitKind) -> Result<String> {
    let mut out = String::new();
    match emit {
        EmitKind::Traces => {
            for (i, sch) in space.iter().enumerate() {
                out.push_str(&format!("# candidate {}\n{}\n", i, sch.trace().simplified()));
            }
        }
        EmitKind::Ir => {
            for (i, sch) in space.iter().enumerate() {
                out.push_str(&format!("# candidate {}\n{}\n", i, sch.func()));
            }
        }
        EmitKind::Json => {
            let candidates: Vec<Candidate> = space
                .iter()
                .enumerate()
                .map(|(index, sch)| Candidate { index, trace: sch.trace(), func: sch.func() })
                .collect();
            out = serde_json::to_string_pretty(&candidates)?;
        }
    }
    Ok(out)
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
