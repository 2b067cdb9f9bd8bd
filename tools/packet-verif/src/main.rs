use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use packet_gen::{ProgramSections, ProgramTemplate, TEMPLATE_FILE_NAME};
use packet_harness::{
    normalize, ConfigOptions, StatsDocument, TestConfig, Toolchain, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_TRIAL_TIMEOUT,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "packet-verif",
    about = "Differential tester for Hexagon packet semantics: random packets, two engines, one diff."
)]
struct Cli {
    /// Log verbosity: 0=error, 1=warn, 2=info, 3=debug (RUST_LOG overrides)
    #[arg(
        short = 'l',
        long = "logging",
        global = true,
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=3)
    )]
    logging: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate random packet programs and compare the reference and candidate engines
    Run(RunArgs),
    /// Sum the instruction counts of several statistics files
    CombineStats(CombineStatsArgs),
    /// Re-render a trial program from the section files in its directory
    Subst(SubstArgs),
    /// Normalize a raw debugger transcript in place
    Normalize(NormalizeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Number of tests to attempt
    #[arg(short = 'n', long, default_value_t = 500)]
    test_count: usize,

    /// Where failing test directories are archived (defaults to "packet_test_<timestamp>")
    #[arg(short = 'o', long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Concurrent tests (defaults to 85% of the available CPUs)
    #[arg(short = 'j', long)]
    proc_count: Option<usize>,

    /// Packets per generated program
    #[arg(short = 'p', long, default_value_t = 5)]
    packets_per_case: usize,

    /// Times each program runs its packets, with a state mutation in between
    #[arg(short = 'i', long, default_value_t = 40)]
    iters_per_case: usize,

    /// Maximum instructions drawn per packet (synthesized memory accesses come on top)
    #[arg(short = 'k', long, default_value_t = 6)]
    max_insts_per_packet: usize,

    /// Candidate QEMU binary
    #[arg(short = 'q', long, value_name = "PATH", env = "PACKET_VERIF_QEMU")]
    qemu_bin: PathBuf,

    /// Reference QEMU binary (the toolchain simulator is the reference when omitted)
    #[arg(short = 'b', long, value_name = "PATH")]
    base_qemu: Option<PathBuf>,

    /// Instruction-set descriptor (JSON)
    #[arg(short = 't', long, value_name = "PATH", env = "PACKET_VERIF_ISET")]
    iset: PathBuf,

    /// Architecture revision, e.g. 73 or v73 (defaults to the descriptor's)
    #[arg(short = 'r', long)]
    hex_rev: Option<String>,

    /// Directory holding hexagon-clang and hexagon-lldb (defaults to a PATH lookup)
    #[arg(long, value_name = "DIR", env = "PACKET_VERIF_TOOLCHAIN")]
    toolchain_path: Option<PathBuf>,

    /// Program template (defaults to the built-in one)
    #[arg(long, value_name = "PATH")]
    template: Option<PathBuf>,

    /// Compiler flags (defaults to the HVX/HMX flag set for the architecture)
    #[arg(long, allow_hyphen_values = true)]
    cflags: Option<String>,

    /// Parent directory of the per-test scratch directories (defaults to the system temp dir)
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,

    /// Run seed, decimal or 0x-prefixed hex (random when omitted)
    #[arg(long, value_parser = parse_seed)]
    seed: Option<u64>,

    /// Timeout for each compiler or debugger invocation
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_COMMAND_TIMEOUT.as_secs())]
    command_timeout_secs: u64,

    /// Timeout for a whole test, after which it is abandoned
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TRIAL_TIMEOUT.as_secs())]
    trial_timeout_secs: u64,

    /// Where the verif_stats_<stamp>.json file is written
    #[arg(long, value_name = "DIR", default_value = ".")]
    stats_dir: PathBuf,

    /// Exit with a non-zero status when any test fails
    #[arg(short = 'e', long, action = clap::ArgAction::SetTrue)]
    exit_code: bool,
}

#[derive(Args, Debug)]
struct CombineStatsArgs {
    /// Statistics files to sum
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(short = 'o', long, default_value = "combined_stats.json")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct SubstArgs {
    /// Trial directory holding one file per section
    dir: PathBuf,

    /// Output program (defaults to "<dir>/out_repro.S")
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Template to render (defaults to "<dir>/test_case.tmpl", then the built-in one)
    #[arg(long, value_name = "PATH")]
    template: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.logging);

    let result = match cli.command {
        Command::Run(args) => run(args, cli.logging).await,
        Command::CombineStats(args) => combine_stats(&args).map(|()| ExitCode::SUCCESS),
        Command::Subst(args) => subst(&args).map(|()| ExitCode::SUCCESS),
        Command::Normalize(args) => normalize_file(&args.file).map(|()| ExitCode::SUCCESS),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logging: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(logging)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn level_for_verbosity(logging: u8) -> &'static str {
    match logging {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|err| format!("invalid seed `{raw}`: {err}"))
}

fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((cpus as f64 * 0.85) as usize).max(1)
}

async fn run(args: RunArgs, logging: u8) -> anyhow::Result<ExitCode> {
    let toolchain = Toolchain::locate(args.toolchain_path.as_deref()).context("locate toolchain")?;
    let seed = args.seed.unwrap_or_else(rand::random);
    let output_dir = args.output_dir.unwrap_or_else(|| {
        PathBuf::from(format!(
            "packet_test_{}",
            Utc::now().format("%Y%b%d_%H%M%S")
        ))
    });
    let verif_exe =
        std::env::current_exe().unwrap_or_else(|_| PathBuf::from(env!("CARGO_PKG_NAME")));

    let cfg = TestConfig::from_options(ConfigOptions {
        iset_path: args.iset,
        arch: args.hex_rev,
        iters_per_case: args.iters_per_case,
        packets_per_case: args.packets_per_case,
        max_insts_per_packet: args.max_insts_per_packet,
        cflags: args.cflags,
        template_path: args.template,
        output_dir,
        scratch_root: args.scratch_dir,
        toolchain,
        candidate_qemu: args.qemu_bin,
        reference_qemu: args.base_qemu,
        command_timeout: Duration::from_secs(args.command_timeout_secs),
        trial_timeout: Duration::from_secs(args.trial_timeout_secs),
        verif_exe,
        seed,
    })
    .context("invalid configuration")?;

    println!("Comparing:");
    println!("  BASE: {}", cfg.reference.describe(&cfg.toolchain).display());
    println!("  NEW:  {}", cfg.candidate.describe(&cfg.toolchain).display());

    let workers = args.proc_count.unwrap_or_else(default_worker_count).max(1);
    info!(
        seed = %format!("{seed:#x}"),
        workers,
        tests = args.test_count,
        arch = %cfg.arch,
        "starting run"
    );

    let progress = progress_bar(args.test_count, logging)?;
    let cfg = Arc::new(cfg);
    let report = packet_harness::run(Arc::clone(&cfg), args.test_count, workers, progress)
        .await
        .context("run tests")?;

    for failure in &report.failures {
        println!(
            "case {}: {}{}",
            failure.index,
            failure.dir.display(),
            if failure.timed_out { " (timed out)" } else { "" }
        );
    }
    println!("{} passes out of {} runs", report.passes, report.trials);
    println!("test rate: {:.2} packets/sec", report.throughput());

    let stats_path = args.stats_dir.join(format!(
        "verif_stats_{}.json",
        Utc::now().format("%Y%d%b_%H%M")
    ));
    report
        .stats_document()
        .write(&stats_path)
        .with_context(|| format!("write {}", stats_path.display()))?;
    info!(path = %stats_path.display(), "wrote statistics");

    if args.exit_code && !report.passed() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn progress_bar(len: usize, logging: u8) -> anyhow::Result<ProgressBar> {
    if logging == 0 {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "Running tests [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta})",
        )?
        .progress_chars("##-"),
    );
    Ok(pb)
}

fn combine_stats(args: &CombineStatsArgs) -> anyhow::Result<()> {
    let combined = StatsDocument::combine(&args.files).context("combine statistics")?;
    combined
        .write(&args.output)
        .with_context(|| format!("write {}", args.output.display()))?;
    println!(
        "combined {} files ({} instructions, {} samples) into {}",
        args.files.len(),
        combined.inst_counts.len(),
        combined.inst_counts.total(),
        args.output.display()
    );
    Ok(())
}

fn subst(args: &SubstArgs) -> anyhow::Result<()> {
    let template = load_subst_template(args.template.as_deref(), &args.dir)?;
    let sections = ProgramSections::read_from_dir(&args.dir)
        .with_context(|| format!("read sections from {}", args.dir.display()))?;
    let program = template.render(&sections).context("render program")?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.dir.join("out_repro.S"));
    fs::write(&output, program).with_context(|| format!("write {}", output.display()))?;
    Ok(())
}

fn load_subst_template(explicit: Option<&Path>, dir: &Path) -> anyhow::Result<ProgramTemplate> {
    let in_dir = dir.join(TEMPLATE_FILE_NAME);
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None if in_dir.is_file() => in_dir,
        None => return Ok(ProgramTemplate::builtin()),
    };
    let source =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    ProgramTemplate::parse(&source).with_context(|| format!("parse {}", path.display()))
}

fn normalize_file(path: &Path) -> anyhow::Result<()> {
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    fs::write(path, normalize(&raw)).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
