//! Instruction-set descriptor and the eligibility filter applied to it.
//!
//! The descriptor is a plain JSON document:
//!
//! ```json
//! {
//!   "arch": "v73",
//!   "instructions": {
//!     "A2_add": { "syntax": "Rd32=add(Rs32,Rt32)", "attrs": "A_ARCHV2,A_ROTATE" }
//!   }
//! }
//! ```
//!
//! `attrs` may be either a comma-separated string or a JSON array of strings.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::DescriptorError;

/// Instructions carrying this attribute may never share a packet.
pub const ATTR_SOLO: &str = "A_RESTRICT_SOLO";
/// Atomic memory operations; their source-address operand must point at valid memory.
pub const ATTR_ATOMIC: &str = "A_ATOMIC";
/// Instructions that always need a constant extender word.
pub const ATTR_MUST_EXTEND: &str = "A_MUST_EXTEND";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InstructionDescriptor {
    pub syntax: String,
    #[serde(default, deserialize_with = "deserialize_attrs")]
    pub attrs: BTreeSet<String>,
}

impl InstructionDescriptor {
    pub fn new(syntax: impl Into<String>, attrs: &[&str]) -> Self {
        Self {
            syntax: syntax.into(),
            attrs: attrs.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn has_attr(&self, attr: &str) -> bool {
        self.attrs.contains(attr)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct InstructionSet {
    /// Architecture revision the descriptor was produced for (`v73`, ...).
    #[serde(default)]
    pub arch: Option<String>,
    pub instructions: BTreeMap<String, InstructionDescriptor>,
}

impl InstructionSet {
    pub fn get(&self, tag: &str) -> Option<&InstructionDescriptor> {
        self.instructions.get(tag)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl FromIterator<(String, InstructionDescriptor)> for InstructionSet {
    fn from_iter<T: IntoIterator<Item = (String, InstructionDescriptor)>>(iter: T) -> Self {
        Self {
            arch: None,
            instructions: iter.into_iter().collect(),
        }
    }
}

/// Loads an instruction-set descriptor from a JSON file.
pub fn load_descriptor(path: &Path) -> Result<InstructionSet, DescriptorError> {
    let text = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_descriptor(&text)
}

pub fn parse_descriptor(text: &str) -> Result<InstructionSet, DescriptorError> {
    let iset: InstructionSet = serde_json::from_str(text)?;
    if iset.is_empty() {
        return Err(DescriptorError::Empty);
    }
    Ok(iset)
}

fn deserialize_attrs<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AttrList {
        Joined(String),
        List(Vec<String>),
    }

    let attrs = match AttrList::deserialize(deserializer)? {
        AttrList::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect(),
        AttrList::List(list) => list.into_iter().collect(),
    };
    Ok(attrs)
}

/// Decides which descriptor entries may be fed to the generator.
///
/// Excluded are instruction forms the harness cannot run deterministically: control flow that
/// leaves the test body, cache/TLB maintenance, privileged or experimental forms, memory forms
/// the generator does not point at valid memory, and anything touching the stack/frame/link
/// registers.
#[derive(Clone, Debug)]
pub struct TagFilter {
    pub skip_terms: Vec<String>,
    pub omit_attrs: Vec<String>,
}

const DEFAULT_SKIP_TERMS: &[&str] = &[
    "mem", "swi", "trap", "scatter", "gather", ":raw", "call", "callr", "jumpr", "nmi", "stop",
    "rte", "wait", "icinv", "tlbw", "tlbp", "tlbinvasid", "k0lock", "k0unlock", "tlblock",
    "tlbunlock", "vhist", "vwhist", "dealloc", "loop", "dcclean", "dcinv", "l2lock", "l2unlock",
    "l2fetch", "release", "dmlink", "start", "setprio", "diag", "dczero", "resume", "sfmax",
    "sfmin", "dfmin", "dfmax", "vshuff", "vdeal", "vcombine", "allocframe", "pause", "r29", "r30",
    "r31",
];

const DEFAULT_OMIT_ATTRS: &[&str] = &[
    "A_FAKEINSN",
    "A_MAPPING",
    "A_VECX",
    "A_EXPERIMENTAL",
    "A_CVI_VS_3SRC",
    "A_HMX",
    "A_AUDIO",
    "A_PRIV",
    "A_IMPLICIT_READS_Z",
    "A_IMPLICIT_WRITES_Z",
    "A_CABAC",
    "A_HVX_IEEE_FP",
    "A_EXTENSION_AUDIO",
];

impl Default for TagFilter {
    fn default() -> Self {
        Self {
            skip_terms: DEFAULT_SKIP_TERMS.iter().map(|s| s.to_string()).collect(),
            omit_attrs: DEFAULT_OMIT_ATTRS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TagFilter {
    pub fn accepts(&self, tag: &str, inst: &InstructionDescriptor) -> bool {
        if tag.starts_with("dep_") || tag.contains("alloc") {
            return false;
        }
        if self.omit_attrs.iter().any(|attr| inst.has_attr(attr)) {
            return false;
        }
        !self
            .skip_terms
            .iter()
            .any(|term| inst.syntax.contains(term.as_str()))
    }

    /// Eligible tags in sorted order.
    pub fn eligible_tags(&self, iset: &InstructionSet) -> Vec<String> {
        iset.instructions
            .iter()
            .filter(|(tag, inst)| self.accepts(tag, inst))
            .map(|(tag, _)| tag.clone())
            .collect()
    }
}
