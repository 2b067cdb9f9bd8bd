use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Register-conflict dead end while building a packet.
///
/// The packet under construction can no longer be trusted; callers discard it and generate a new
/// one from scratch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("packet generation exhausted: {reason}")]
pub struct GenerationExhausted {
    pub reason: &'static str,
}

impl GenerationExhausted {
    pub(crate) fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read instruction-set descriptor {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed instruction-set descriptor: {0}")]
    Json(#[from] serde_json::Error),

    #[error("instruction-set descriptor contains no instructions")]
    Empty,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("program template is missing required section `${0}`")]
    MissingSection(String),

    #[error("program template references unknown section `${0}`")]
    UnknownPlaceholder(String),

    #[error("invalid `$` placeholder at byte {0} of program template")]
    InvalidPlaceholder(usize),

    #[error("section file {}: {source}", path.display())]
    SectionIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The eligible tag universe holds no instruction that may share a packet.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no eligible instruction may share a packet (all are solo or the universe is empty)")]
pub struct EmptyUniverse;
