//! Compiler, debugger and execution-engine command lines.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::exec::Invocation;

pub const CC_NAME: &str = "hexagon-clang";
pub const LLDB_NAME: &str = "hexagon-lldb";
pub const SIM_NAME: &str = "hexagon-sim";

/// QEMU machine names per architecture revision.
const QEMU_MACHINES: [(&str, &str); 8] = [
    ("v68", "V68N_1024"),
    ("v69", "V69NA_1024"),
    ("v73", "V73M"),
    ("v75", "V75NA_1024"),
    ("v79", "V79NA_1"),
    ("v81", "V81QA_1"),
    ("v83", "V83H_1"),
    ("v85", "V85QA_1"),
];

/// A validated architecture revision such as `v73`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arch {
    rev: &'static str,
    qemu_machine: &'static str,
}

impl Arch {
    /// Accepts `73`, `v73` or `V73`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let rev = format!("v{digits}");
        QEMU_MACHINES
            .iter()
            .find(|(known, _)| *known == rev)
            .map(|&(rev, qemu_machine)| Arch { rev, qemu_machine })
            .ok_or_else(|| ConfigError::UnknownArch(raw.to_string()))
    }

    pub fn rev(&self) -> &'static str {
        self.rev
    }

    pub fn qemu_machine(&self) -> &'static str {
        self.qemu_machine
    }

    /// Machine name understood by `hexagon-sim --m<name>`.
    pub fn sim_machine(&self) -> String {
        match self.rev {
            "v69" => "v69na".to_string(),
            "v75" => "v75na_1".to_string(),
            _ => self.qemu_machine.to_lowercase(),
        }
    }

    pub fn default_cflags(&self) -> String {
        format!(
            "-g -m{} -mhvx-ieee-fp -mhvx-qfloat -mhvx -mhmx",
            self.rev
        )
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rev)
    }
}

/// Execution engine driven through the debugger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    /// The instruction-set simulator bundled with the toolchain.
    Simulator,
    Qemu(PathBuf),
}

impl Engine {
    /// Arguments passed to the debugged program after `--`.
    pub fn program_args(&self, arch: &Arch) -> Vec<String> {
        match self {
            Engine::Simulator => vec![
                format!("--m{}", arch.sim_machine()),
                "--pmu_statsfile".to_string(),
                "/dev/null".to_string(),
            ],
            Engine::Qemu(_) => vec!["-M".to_string(), arch.qemu_machine().to_string()],
        }
    }

    pub fn env(&self) -> Vec<(String, String)> {
        match self {
            Engine::Simulator => Vec::new(),
            Engine::Qemu(path) => vec![
                ("LLDB_HEXAGON_USE_QEMU".to_string(), "1".to_string()),
                (
                    "LLDB_HEXAGON_QEMU_PATH".to_string(),
                    path.display().to_string(),
                ),
            ],
        }
    }

    /// Path shown in the `Comparing:` banner.
    pub fn describe<'a>(&'a self, toolchain: &'a Toolchain) -> &'a Path {
        match self {
            Engine::Simulator => &toolchain.sim,
            Engine::Qemu(path) => path,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolchain {
    pub cc: PathBuf,
    pub lldb: PathBuf,
    pub sim: PathBuf,
}

impl Toolchain {
    /// Finds the toolchain in `dir`, or on `PATH` when no directory is given.
    ///
    /// The compiler and debugger must exist and be executable; the simulator is only run
    /// indirectly by the debugger and is not checked.
    pub fn locate(dir: Option<&Path>) -> Result<Self, ConfigError> {
        let find = |name: &str| -> Result<PathBuf, ConfigError> {
            match dir {
                Some(dir) => Ok(dir.join(name)),
                None => which::which(name).map_err(|err| ConfigError::MissingTool {
                    name: name.to_string(),
                    detail: err.to_string(),
                }),
            }
        };

        let toolchain = Toolchain {
            cc: find(CC_NAME)?,
            lldb: find(LLDB_NAME)?,
            sim: find(SIM_NAME).unwrap_or_else(|_| PathBuf::from(SIM_NAME)),
        };
        ensure_executable(&toolchain.cc)?;
        ensure_executable(&toolchain.lldb)?;
        Ok(toolchain)
    }

    /// `<cc> -g -o <output> <cflags...> <input>`
    pub fn compile(&self, output: &Path, cflags: &str, input: &Path) -> Invocation {
        let mut args = vec![
            "-g".to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ];
        args.extend(cflags.split_whitespace().map(str::to_string));
        args.push(input.display().to_string());
        Invocation::new(&self.cc, args)
    }

    /// `<lldb> --batch --source <script> <exe> -- <engine args...>`
    pub fn debug(&self, script: &Path, exe: &Path, engine: &Engine, arch: &Arch) -> Invocation {
        let mut args = vec![
            "--batch".to_string(),
            "--source".to_string(),
            script.display().to_string(),
            exe.display().to_string(),
            "--".to_string(),
        ];
        args.extend(engine.program_args(arch));
        Invocation::new(&self.lldb, args).with_env(engine.env())
    }
}

/// Fails unless `path` is a regular file with an execute bit set.
pub fn ensure_executable(path: &Path) -> Result<(), ConfigError> {
    let not_executable = || ConfigError::NotExecutable {
        path: path.to_path_buf(),
    };
    let meta = fs::metadata(path).map_err(|_| not_executable())?;
    if !meta.is_file() {
        return Err(not_executable());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(not_executable());
        }
    }

    Ok(())
}
