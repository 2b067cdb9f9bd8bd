//! One differential trial: generate a program, compile it, run it on both engines and compare
//! the normalized register dumps.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use packet_gen::{ProgramSections, TEMPLATE_FILE_NAME};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::TestConfig;
use crate::error::{HarnessError, Result};
use crate::exec::{self, Invocation};
use crate::normalize::{last_line, normalize};
use crate::repro::{ReproScript, REPRO_FILE_NAME};
use crate::script::{debugger_script, SCRIPT_FILE_NAME};
use crate::stats::TagCounts;
use crate::toolchain::Engine;

pub const PROGRAM_FILE_NAME: &str = "out.S";
pub const REPRO_PROGRAM_FILE_NAME: &str = "out_repro.S";
pub const EXE_FILE_NAME: &str = "test_out";

const REFERENCE_LABEL: &str = "base";
const CANDIDATE_LABEL: &str = "new";

#[derive(Clone, Debug)]
pub struct TrialOutcome {
    pub index: usize,
    pub dir: PathBuf,
    pub passed: bool,
    /// An engine run hit the command timeout.
    pub timed_out: bool,
    /// Both engines were run a second time after a suspected debugger race.
    pub retried: bool,
    pub compile_attempts: usize,
    /// Source tags of every packet in the program.
    pub tag_counts: TagCounts,
    pub packets: usize,
}

/// Runs trial `index` inside `dir`, which the trial owns. The directory is removed when the
/// engines agree and left in place otherwise.
pub async fn run_trial<R>(
    cfg: &TestConfig,
    index: usize,
    rng: &mut R,
    dir: &Path,
) -> Result<TrialOutcome>
where
    R: Rng + Send,
{
    let exe = dir.join(EXE_FILE_NAME);
    write(&dir.join(TEMPLATE_FILE_NAME), cfg.template_source.as_bytes())?;

    let started = Instant::now();
    let (tag_counts, packets, compile_attempts) = build_program(cfg, rng, dir, &exe).await?;
    info!(
        attempts = compile_attempts,
        secs = started.elapsed().as_secs_f64(),
        "test creation done"
    );

    let script = dir.join(SCRIPT_FILE_NAME);
    write(&script, debugger_script().as_bytes())?;

    let started = Instant::now();
    let mut pair = run_pair(cfg, dir, &script, &exe).await?;
    info!(secs = started.elapsed().as_secs_f64(), "test run done");

    let mut retried = false;
    if !pair.matches() && !pair.timed_out() && pair.candidate_stopped_at_run() {
        info!("mismatch, re-trying");
        retried = true;
        let started = Instant::now();
        pair = run_pair(cfg, dir, &script, &exe).await?;
        info!(secs = started.elapsed().as_secs_f64(), "test repeat run done");
    }

    let passed = pair.matches();
    if passed {
        fs::remove_dir_all(dir)
            .map_err(|err| HarnessError::io(format!("remove {}", dir.display()), err))?;
    }

    Ok(TrialOutcome {
        index,
        dir: dir.to_path_buf(),
        passed,
        timed_out: pair.timed_out(),
        retried,
        compile_attempts,
        tag_counts,
        packets,
    })
}

/// Generates programs until one compiles. Returns the tag counts, the packet count and the
/// number of attempts.
async fn build_program<R>(
    cfg: &TestConfig,
    rng: &mut R,
    dir: &Path,
    exe: &Path,
) -> Result<(TagCounts, usize, usize)>
where
    R: Rng + Send,
{
    let generator = cfg.generator()?;
    let source = dir.join(PROGRAM_FILE_NAME);
    let compile = cfg.toolchain.compile(exe, &cfg.cflags, &source);

    let mut attempts = 0;
    loop {
        attempts += 1;
        let packets = generator.generate_set(rng, cfg.packets_per_case);
        let sections = ProgramSections::generate(rng, &packets, cfg.iters_per_case);
        let program = cfg.template.render(&sections)?;
        write(&source, program.as_bytes())?;
        sections.write_to_dir(dir)?;

        let result = exec::run(&compile, cfg.command_timeout)
            .await
            .map_err(|err| HarnessError::io(format!("spawn {}", compile.program.display()), err))?;
        if result.success() {
            let tags = packets
                .iter()
                .flat_map(|packet| packet.source_tags.iter())
                .collect();
            return Ok((tags, packets.len(), attempts));
        }

        debug!(
            attempt = attempts,
            timed_out = result.timed_out,
            stdout = %String::from_utf8_lossy(&result.stdout),
            stderr = %String::from_utf8_lossy(&result.stderr),
            "compilation failed"
        );
    }
}

struct EngineRun {
    invocation: Invocation,
    /// False when the debugger could not be started.
    spawned: bool,
    timed_out: bool,
    /// Exited with a zero status.
    succeeded: bool,
    /// Normalized stdout.
    output: Vec<u8>,
}

struct RunPair {
    reference: EngineRun,
    candidate: EngineRun,
}

impl RunPair {
    fn matches(&self) -> bool {
        self.reference.succeeded
            && self.candidate.succeeded
            && self.reference.output == self.candidate.output
    }

    fn timed_out(&self) -> bool {
        self.reference.timed_out || self.candidate.timed_out
    }

    /// The debugger sometimes reports a final `run` as if a breakpoint was never hit; such
    /// mismatches are not treated as defects until they reproduce.
    fn candidate_stopped_at_run(&self) -> bool {
        last_line(&self.candidate.output)
            .windows(3)
            .any(|w| w == b"run")
    }
}

async fn run_pair(cfg: &TestConfig, dir: &Path, script: &Path, exe: &Path) -> Result<RunPair> {
    let reference = run_engine(cfg, dir, script, exe, &cfg.reference, REFERENCE_LABEL).await?;
    let candidate = run_engine(cfg, dir, script, exe, &cfg.candidate, CANDIDATE_LABEL).await?;

    let recompile = cfg.toolchain.compile(
        &dir.join(EXE_FILE_NAME),
        &cfg.cflags,
        &dir.join(REPRO_PROGRAM_FILE_NAME),
    );
    ReproScript {
        verif_exe: &cfg.verif_exe,
        trial_dir: dir,
        compile: &recompile,
        base: reference.spawned.then_some(&reference.invocation),
        new: candidate.spawned.then_some(&candidate.invocation),
    }
    .write(&dir.join(REPRO_FILE_NAME))
    .map_err(|err| HarnessError::io("write repro script", err))?;

    Ok(RunPair {
        reference,
        candidate,
    })
}

async fn run_engine(
    cfg: &TestConfig,
    dir: &Path,
    script: &Path,
    exe: &Path,
    engine: &Engine,
    label: &str,
) -> Result<EngineRun> {
    let invocation = cfg.toolchain.debug(script, exe, engine, &cfg.arch);
    let result = match exec::run(&invocation, cfg.command_timeout).await {
        Ok(result) => result,
        Err(err) => {
            warn!(engine = label, error = %err, "failed to start debugger");
            return Ok(EngineRun {
                invocation,
                spawned: false,
                timed_out: false,
                succeeded: false,
                output: Vec::new(),
            });
        }
    };

    if result.timed_out {
        warn!(
            engine = label,
            timeout_secs = cfg.command_timeout.as_secs_f64(),
            "engine run timed out"
        );
        let mut report = format!(
            "command `{}` timed out after {} seconds",
            invocation.command_line(),
            cfg.command_timeout.as_secs_f64()
        )
        .into_bytes();
        report.extend_from_slice(b"\n\n\n");
        report.extend_from_slice(&result.stdout);
        report.extend_from_slice(b"\n\n\n");
        report.extend_from_slice(&result.stderr);
        write(&dir.join(format!("timeout_{label}.txt")), &report)?;
        return Ok(EngineRun {
            invocation,
            spawned: true,
            timed_out: true,
            succeeded: false,
            output: Vec::new(),
        });
    }

    let normalized = normalize(&result.stdout);
    write(&dir.join(format!("output_{label}.txt")), &normalized)?;
    write(&dir.join(format!("output_{label}_err.txt")), &result.stderr)?;
    let succeeded = result.success();
    if !succeeded {
        debug!(engine = label, status = ?result.status, "engine exited with failure");
    }

    Ok(EngineRun {
        invocation,
        spawned: true,
        timed_out: false,
        succeeded,
        output: normalized,
    })
}

fn write(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).map_err(|err| HarnessError::io(format!("write {}", path.display()), err))
}
