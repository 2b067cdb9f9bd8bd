//! Bounded worker pool running trials and folding their results.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use indicatif::ProgressBar;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::Semaphore;
use tracing::{info, info_span, warn, Instrument};
use walkdir::WalkDir;

use crate::config::TestConfig;
use crate::error::{HarnessError, Result};
use crate::repro::{patch_placeholder, REPRO_FILE_NAME};
use crate::stats::{FailureRecord, RunReport};
use crate::trial::{run_trial, TrialOutcome};

pub const TRIAL_DIR_PREFIX: &str = "pkt_";

enum TrialResult {
    Completed(TrialOutcome),
    Errored {
        index: usize,
        dir: Option<PathBuf>,
        error: HarnessError,
    },
    /// Exceeded the trial timeout; its directory is left where it is.
    Abandoned { index: usize, dir: PathBuf },
}

/// RNG for trial `index`. Every trial gets its own ChaCha stream of the run seed.
pub fn trial_rng(seed: u64, index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(index as u64);
    rng
}

/// Runs `trials` trials with at most `workers` in flight.
///
/// Results are consumed in submission order. Failing trial directories are moved into the
/// configured output directory. Individual trial failures never abort the run.
pub async fn run(
    cfg: Arc<TestConfig>,
    trials: usize,
    workers: usize,
    progress: ProgressBar,
) -> Result<RunReport> {
    let started = Instant::now();
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    let mut handles = Vec::with_capacity(trials);
    for index in 0..trials {
        let cfg = Arc::clone(&cfg);
        let permits = Arc::clone(&permits);
        handles.push(tokio::spawn(
            async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        return TrialResult::Errored {
                            index,
                            dir: None,
                            error: HarnessError::Worker(err.to_string()),
                        }
                    }
                };
                execute(&cfg, index).await
            }
            .instrument(info_span!("trial", index)),
        ));
    }

    let mut report = RunReport {
        trials,
        ..RunReport::default()
    };
    for (index, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap_or_else(|err| TrialResult::Errored {
            index,
            dir: None,
            error: HarnessError::Worker(err.to_string()),
        });
        fold(&cfg, &mut report, result);
        progress.inc(1);
    }
    progress.finish();

    report.elapsed = started.elapsed();
    info!(
        passes = report.passes,
        trials = report.trials,
        failures = report.failures.len(),
        "run complete"
    );
    Ok(report)
}

async fn execute(cfg: &TestConfig, index: usize) -> TrialResult {
    let dir = match tempfile::Builder::new()
        .prefix(TRIAL_DIR_PREFIX)
        .keep(true)
        .tempdir_in(&cfg.scratch_root)
    {
        Ok(dir) => dir.path().to_path_buf(),
        Err(err) => {
            return TrialResult::Errored {
                index,
                dir: None,
                error: HarnessError::io(
                    format!("create trial directory in {}", cfg.scratch_root.display()),
                    err,
                ),
            }
        }
    };

    let mut rng = trial_rng(cfg.seed, index);
    match tokio::time::timeout(cfg.trial_timeout, run_trial(cfg, index, &mut rng, &dir)).await {
        Ok(Ok(outcome)) => TrialResult::Completed(outcome),
        Ok(Err(error)) => TrialResult::Errored {
            index,
            dir: Some(dir),
            error,
        },
        Err(_) => TrialResult::Abandoned { index, dir },
    }
}

fn fold(cfg: &TestConfig, report: &mut RunReport, result: TrialResult) {
    match result {
        TrialResult::Completed(outcome) => {
            report.stats.merge(&outcome.tag_counts);
            report.packets_executed += (outcome.packets * cfg.iters_per_case) as u64;
            if outcome.timed_out {
                report.timeouts += 1;
            }
            if outcome.passed {
                report.passes += 1;
                return;
            }
            let dir = relocate(cfg, &outcome.dir);
            warn!(index = outcome.index, dir = %dir.display(), "trial failed");
            report.failures.push(FailureRecord {
                index: outcome.index,
                dir,
                timed_out: outcome.timed_out,
            });
        }
        TrialResult::Errored { index, dir, error } => {
            warn!(index, error = %error, "trial aborted");
            let dir = match dir {
                Some(dir) if dir.exists() => relocate(cfg, &dir),
                Some(dir) => dir,
                None => PathBuf::new(),
            };
            report.failures.push(FailureRecord {
                index,
                dir,
                timed_out: false,
            });
        }
        TrialResult::Abandoned { index, dir } => {
            warn!(
                index,
                dir = %dir.display(),
                timeout_secs = cfg.trial_timeout.as_secs_f64(),
                "timed out waiting for a result"
            );
            report.timeouts += 1;
            report.failures.push(FailureRecord {
                index,
                dir,
                timed_out: true,
            });
        }
    }
}

/// Moves a failing trial directory into the output directory. On error the directory stays
/// where it was and that location is returned.
fn relocate(cfg: &TestConfig, dir: &Path) -> PathBuf {
    match archive(dir, &cfg.output_dir) {
        Ok(dest) => dest,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "failed to archive trial directory");
            dir.to_path_buf()
        }
    }
}

fn archive(dir: &Path, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .map_err(|err| HarnessError::io(format!("create {}", output_dir.display()), err))?;
    let name = dir.file_name().ok_or_else(|| {
        HarnessError::io(
            format!("archive {}", dir.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "trial directory has no name"),
        )
    })?;
    let dest = output_dir.join(name);

    // Scratch and output directories may live on different filesystems.
    if fs::rename(dir, &dest).is_err() {
        copy_tree(dir, &dest)?;
        fs::remove_dir_all(dir)
            .map_err(|err| HarnessError::io(format!("remove {}", dir.display()), err))?;
    }

    let repro = dest.join(REPRO_FILE_NAME);
    if repro.exists() {
        patch_placeholder(&repro, &dest)
            .map_err(|err| HarnessError::io(format!("patch {}", repro.display()), err))?;
    }
    Ok(dest)
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|err| HarnessError::io(format!("walk {}", src.display()), err.into()))?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(rel);
        let copied = if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
        } else {
            fs::copy(entry.path(), &target).map(|_| ())
        };
        copied.map_err(|err| HarnessError::io(format!("copy to {}", target.display()), err))?;
    }
    Ok(())
}
