use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use packet_gen::{
    load_descriptor, EmptyUniverse, InstructionSet, OperandSynthesizer, PacketGenerator,
    ProgramTemplate, TagFilter, DEFAULT_TEMPLATE,
};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::toolchain::{ensure_executable, Arch, Engine, Toolchain};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(225);
pub const DEFAULT_TRIAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Raw settings, as collected from the command line.
#[derive(Clone, Debug)]
pub struct ConfigOptions {
    pub iset_path: PathBuf,
    /// Overrides the descriptor's own architecture revision.
    pub arch: Option<String>,
    pub iters_per_case: usize,
    pub packets_per_case: usize,
    pub max_insts_per_packet: usize,
    /// Compiler flags; defaults to the flag set for the architecture.
    pub cflags: Option<String>,
    pub template_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Parent of the per-trial scratch directories; defaults to the system temp directory.
    pub scratch_root: Option<PathBuf>,
    pub toolchain: Toolchain,
    pub candidate_qemu: PathBuf,
    /// Reference QEMU; the simulator is the reference when absent.
    pub reference_qemu: Option<PathBuf>,
    pub command_timeout: Duration,
    pub trial_timeout: Duration,
    /// `packet-verif` binary referenced by repro scripts.
    pub verif_exe: PathBuf,
    pub seed: u64,
}

/// Validated, read-only configuration shared by every trial.
#[derive(Debug)]
pub struct TestConfig {
    pub iset: InstructionSet,
    pub arch: Arch,
    /// Eligible tags, sorted.
    pub tags: Vec<String>,
    pub iters_per_case: usize,
    pub packets_per_case: usize,
    pub max_insts_per_packet: usize,
    pub cflags: String,
    pub template: ProgramTemplate,
    /// Template text, copied into every trial directory for `subst`.
    pub template_source: String,
    pub output_dir: PathBuf,
    pub scratch_root: PathBuf,
    pub toolchain: Toolchain,
    pub reference: Engine,
    pub candidate: Engine,
    pub command_timeout: Duration,
    pub trial_timeout: Duration,
    pub verif_exe: PathBuf,
    pub seed: u64,
}

impl TestConfig {
    pub fn from_options(opts: ConfigOptions) -> Result<Self, ConfigError> {
        if opts.iters_per_case == 0 {
            return Err(ConfigError::Invalid("iterations per case must be at least 1"));
        }
        if opts.packets_per_case == 0 {
            return Err(ConfigError::Invalid("packets per case must be at least 1"));
        }
        if opts.max_insts_per_packet == 0 {
            return Err(ConfigError::Invalid(
                "max instructions per packet must be at least 1",
            ));
        }

        ensure_executable(&opts.candidate_qemu)?;
        if let Some(reference) = &opts.reference_qemu {
            ensure_executable(reference)?;
        }

        let iset = load_descriptor(&opts.iset_path)?;
        let arch = match opts.arch.as_deref().or(iset.arch.as_deref()) {
            Some(raw) => Arch::parse(raw)?,
            None => return Err(ConfigError::MissingArch),
        };

        let tags = TagFilter::default().eligible_tags(&iset);
        if tags.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        let operands = OperandSynthesizer::new();
        for tag in &tags {
            let malformed = iset
                .get(tag)
                .and_then(|inst| operands.malformed_immediate(&inst.syntax));
            if let Some(token) = malformed {
                return Err(ConfigError::MalformedOperand {
                    tag: tag.clone(),
                    token: token.to_string(),
                });
            }
        }
        if PacketGenerator::new(&iset, &tags, opts.max_insts_per_packet).is_err() {
            return Err(ConfigError::NoNonSoloInstructions);
        }
        info!(
            arch = %arch,
            eligible = tags.len(),
            total = iset.len(),
            "loaded instruction set"
        );

        let template_source = match &opts.template_path {
            Some(path) => fs::read_to_string(path).map_err(|source| ConfigError::TemplateIo {
                path: path.clone(),
                source,
            })?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        let template = ProgramTemplate::parse(&template_source)?;
        debug!(sections = template.sections().len(), "parsed program template");

        let cflags = opts.cflags.unwrap_or_else(|| arch.default_cflags());
        let reference = match opts.reference_qemu {
            Some(path) => Engine::Qemu(path),
            None => Engine::Simulator,
        };

        Ok(TestConfig {
            iset,
            arch,
            tags,
            iters_per_case: opts.iters_per_case,
            packets_per_case: opts.packets_per_case,
            max_insts_per_packet: opts.max_insts_per_packet,
            cflags,
            template,
            template_source,
            output_dir: opts.output_dir,
            scratch_root: opts.scratch_root.unwrap_or_else(std::env::temp_dir),
            toolchain: opts.toolchain,
            reference,
            candidate: Engine::Qemu(opts.candidate_qemu),
            command_timeout: opts.command_timeout,
            trial_timeout: opts.trial_timeout,
            verif_exe: opts.verif_exe,
            seed: opts.seed,
        })
    }

    pub fn generator(&self) -> Result<PacketGenerator<'_>, EmptyUniverse> {
        PacketGenerator::new(&self.iset, &self.tags, self.max_insts_per_packet)
    }
}
