use std::io;
use std::path::PathBuf;

use packet_gen::{DescriptorError, EmptyUniverse, TemplateError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Failure of the harness machinery itself, as opposed to a test that ran and diverged.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    EmptyUniverse(#[from] EmptyUniverse),

    #[error("failed to encode statistics: {0}")]
    Json(#[from] serde_json::Error),

    #[error("trial worker failed: {0}")]
    Worker(String),
}

impl HarnessError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Problems detected before any trial starts. These are fatal for the whole run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required tool `{name}` not found ({detail})")]
    MissingTool { name: String, detail: String },

    #[error("`{}` is not an executable file", path.display())]
    NotExecutable { path: PathBuf },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("instruction-set descriptor has no eligible instructions after filtering")]
    EmptyUniverse,

    #[error("instruction `{tag}` has an operand that cannot be generated: `{token}`")]
    MalformedOperand { tag: String, token: String },

    #[error("every eligible instruction is solo; no packet can be formed")]
    NoNonSoloInstructions,

    #[error("unknown architecture revision `{0}` (expected one of v68, v69, v73, v75, v79, v81, v83, v85)")]
    UnknownArch(String),

    #[error("architecture revision unknown: the descriptor names none and no override was given")]
    MissingArch,

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("failed to read program template {}: {source}", path.display())]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),
}
