//! Differential execution harness: runs generated packet programs on a reference and a candidate
//! engine and archives every trial whose register dumps diverge.

pub mod config;
pub mod error;
pub mod exec;
pub mod normalize;
pub mod repro;
pub mod scheduler;
pub mod script;
pub mod stats;
pub mod toolchain;
pub mod trial;

pub use config::{ConfigOptions, TestConfig, DEFAULT_COMMAND_TIMEOUT, DEFAULT_TRIAL_TIMEOUT};
pub use error::{ConfigError, HarnessError, Result};
pub use normalize::normalize;
pub use scheduler::{run, trial_rng};
pub use stats::{FailureRecord, RunReport, StatsDocument, TagCounts};
pub use toolchain::{Arch, Engine, Toolchain};
pub use trial::{run_trial, TrialOutcome};
