//! Test program assembly.
//!
//! A program is a text template with `$name` / `${name}` placeholders, one per section listed in
//! [`SECTION_NAMES`] (`$$` is a literal dollar). [`ProgramSections::generate`] makes every random
//! decision; [`ProgramTemplate::render`] is a pure substitution, so a trial can be re-rendered
//! byte for byte from the section files it wrote.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;

use crate::error::TemplateError;
use crate::init::{self, JUMP_TARGET_COUNT, MEM_PADDING_REPEAT, MEM_REPEAT};
use crate::mutate::{self, MutationKind};
use crate::packet::Packet;

/// Built-in program template.
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/test_case.tmpl");

/// Name of the template copy stored next to the section files of a trial.
pub const TEMPLATE_FILE_NAME: &str = "test_case.tmpl";

pub const SECTION_NAMES: [&str; 15] = [
    "gpr_brev",
    "gpr_flip",
    "gpr_init",
    "gpr_rot",
    "gpr_xor",
    "hvx_init",
    "hvx_mutate",
    "invalid_packet",
    "jump_targets",
    "pred_init",
    "mem_padding_repeat",
    "mem_init",
    "mem_repeat",
    "test_cases",
    "test_packets",
];

/// Encoding that no engine accepts; padding after every jump-target stub.
pub const INVALID_PACKET: &str = ".word 0x6fffdffc";

/// Largest `.skip` placed after a jump-target stub.
const MAX_JUMP_TARGET_SKIP: u32 = 4192;

const INDENT: &str = "\n    ";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramSections {
    sections: BTreeMap<String, String>,
}

impl ProgramSections {
    /// Draws every section of a program running `packets` `iters` times.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, packets: &[Packet], iters: usize) -> Self {
        let mut sections = Self::default();

        sections.insert("test_packets", test_packets(rng, packets));
        sections.insert("gpr_init", init::gpr_init(rng).join(INDENT));
        sections.insert("hvx_init", init::hvx_init(rng).join(INDENT));
        sections.insert("pred_init", init::pred_init(rng).join(INDENT));
        sections.insert("mem_init", init::mem_words(rng).join(INDENT));
        sections.insert("mem_repeat", MEM_REPEAT.to_string());
        sections.insert("mem_padding_repeat", MEM_PADDING_REPEAT.to_string());

        sections.insert("hvx_mutate", mutate::hvx_rot().join(INDENT));
        sections.insert("gpr_xor", mutate::gpr_xor(rng).join(INDENT));
        sections.insert("gpr_flip", mutate::gpr_flip().join(INDENT));
        sections.insert("gpr_brev", mutate::gpr_brev().join(INDENT));
        sections.insert("gpr_rot", mutate::gpr_rot().join(INDENT));
        sections.insert("invalid_packet", INVALID_PACKET.to_string());
        sections.insert("jump_targets", jump_targets(rng));
        sections.insert("test_cases", test_cases(iters));

        sections
    }

    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.sections.insert(name.into(), text.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Writes one file per section, named after the section.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(), TemplateError> {
        for (name, text) in &self.sections {
            let path = dir.join(name);
            fs::write(&path, text).map_err(|source| TemplateError::SectionIo { path, source })?;
        }
        Ok(())
    }

    /// Reads back every section in [`SECTION_NAMES`] from `dir`.
    pub fn read_from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut sections = Self::default();
        for name in SECTION_NAMES {
            let path = dir.join(name);
            let text = fs::read_to_string(&path)
                .map_err(|source| TemplateError::SectionIo { path, source })?;
            sections.insert(name, text);
        }
        Ok(sections)
    }
}

fn test_packets<R: Rng + ?Sized>(rng: &mut R, packets: &[Packet]) -> String {
    let mut blocks = Vec::with_capacity(packets.len());
    for (index, packet) in packets.iter().enumerate() {
        let attrs: Vec<&str> = packet
            .optional_attrs
            .iter()
            .filter(|_| rng.gen_bool(0.5))
            .map(String::as_str)
            .collect();
        let attrs = if attrs.is_empty() {
            String::new()
        } else {
            format!(":{}", attrs.join(","))
        };
        let insts: Vec<&str> = packet.instructions().collect();

        blocks.push(format!(
            "\n    {pre}\n    {index}:\n    // tags: {tags}\n    {{\n      {insts}\n    }}{attrs}\n",
            pre = packet.pre.join(INDENT),
            tags = packet.source_tags.join(", "),
            insts = insts.join("\n      "),
        ));
    }
    blocks.join("\n")
}

fn jump_targets<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..JUMP_TARGET_COUNT)
        .map(|i| {
            let skip = rng.gen_range(1..=MAX_JUMP_TARGET_SKIP);
            format!(
                "\n.p2align 4\n.Ljump_target_{i}:\n    r{i} = brev(r{i})\n    jumpr r31\n{INVALID_PACKET}\n.skip 0x{skip:x}\n"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn test_cases(iters: usize) -> String {
    (0..iters)
        .map(|i| {
            format!(
                "    call test_case\n    call mutate_{}",
                MutationKind::for_iteration(i).name()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Piece {
    Text(String),
    Section(String),
}

/// A parsed program template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramTemplate {
    pieces: Vec<Piece>,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$(?:(?P<escaped>\$)|(?P<named>[_A-Za-z][_A-Za-z0-9]*)|\{(?P<braced>[_A-Za-z][_A-Za-z0-9]*)\}|(?P<invalid>))")
            .expect("static regex must compile")
    })
}

impl ProgramTemplate {
    /// Parses `source`, which must reference every section in [`SECTION_NAMES`].
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(source) {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            text.push_str(&source[last..whole.start]);
            last = whole.end;

            if caps.name("escaped").is_some() {
                text.push('$');
                continue;
            }
            let Some(name) = caps.name("named").or_else(|| caps.name("braced")) else {
                return Err(TemplateError::InvalidPlaceholder(whole.start));
            };
            let name = name.as_str();
            if !SECTION_NAMES.contains(&name) {
                return Err(TemplateError::UnknownPlaceholder(name.to_string()));
            }
            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut text)));
            }
            pieces.push(Piece::Section(name.to_string()));
        }
        text.push_str(&source[last..]);
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }

        let template = Self { pieces };
        let used = template.sections();
        if let Some(missing) = SECTION_NAMES.iter().find(|name| !used.contains(*name)) {
            return Err(TemplateError::MissingSection(missing.to_string()));
        }
        Ok(template)
    }

    pub fn builtin() -> Self {
        Self::parse(DEFAULT_TEMPLATE).expect("built-in template must parse")
    }

    /// Section names the template refers to.
    pub fn sections(&self) -> BTreeSet<&str> {
        self.pieces
            .iter()
            .filter_map(|piece| match piece {
                Piece::Section(name) => Some(name.as_str()),
                Piece::Text(_) => None,
            })
            .collect()
    }

    /// Substitutes every placeholder. A section the template needs but `sections` lacks is an
    /// error; nothing is rendered partially.
    pub fn render(&self, sections: &ProgramSections) -> Result<String, TemplateError> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Section(name) => {
                    let text = sections
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingSection(name.clone()))?;
                    out.push_str(text);
                }
            }
        }
        Ok(out)
    }
}
