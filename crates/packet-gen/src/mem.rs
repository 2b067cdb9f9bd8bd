//! Synthetic loads and stores injected into packets.
//!
//! Every access goes through one of the address registers `r1..r3`, initialized to the scratch
//! region right before the packet. The synthesizer must never pick a register that an earlier
//! instruction of the same packet already writes, and never reuse an address or offset register
//! already claimed by an earlier access's setup.

use std::sync::OnceLock;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::error::GenerationExhausted;
use crate::init::{ACCESS_WINDOW_BYTES, HVX_VECTOR_BYTES, MEMORY_ACCESS_LABEL};
use crate::regs::{components, filter_conflicts, RegisterClass, MEM_ADDR_REGS, MEM_OFFSET_REGS};

/// Registers a store may take its value from in addition to the packet's `.new` producers.
const STORE_VALUE_FALLBACK: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
    Double,
    Vector,
}

impl AccessWidth {
    pub const ALL: [AccessWidth; 5] = [
        AccessWidth::Byte,
        AccessWidth::Half,
        AccessWidth::Word,
        AccessWidth::Double,
        AccessWidth::Vector,
    ];

    pub fn bytes(self) -> u32 {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Half => 2,
            AccessWidth::Word => 4,
            AccessWidth::Double => 8,
            AccessWidth::Vector => HVX_VECTOR_BYTES,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AccessWidth::Byte => "memb",
            AccessWidth::Half => "memh",
            AccessWidth::Word => "memw",
            AccessWidth::Double => "memd",
            AccessWidth::Vector => "vmem",
        }
    }

    pub fn value_class(self) -> RegisterClass {
        match self {
            AccessWidth::Byte | AccessWidth::Half | AccessWidth::Word => RegisterClass::General,
            AccessWidth::Double => RegisterClass::DoubleGeneral,
            AccessWidth::Vector => RegisterClass::Vector,
        }
    }

    pub fn is_subword(self) -> bool {
        matches!(self, AccessWidth::Byte | AccessWidth::Half)
    }

    pub fn is_vector(self) -> bool {
        self == AccessWidth::Vector
    }

    /// Immediate offsets of vector accesses count whole vectors, scalar ones count bytes.
    fn immediate_scale(self) -> u32 {
        if self.is_vector() {
            HVX_VECTOR_BYTES
        } else {
            1
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressingMode {
    /// `base+#imm`
    Offset,
    /// `base+idx<<#s`
    RegisterSum,
    /// `base++#imm` or `base++mN`; writes the base register.
    PostIncrement,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    /// Setup instructions that must run before the packet.
    pub pre: Vec<String>,
    pub text: String,
    pub width: AccessWidth,
    pub mode: AddressingMode,
    pub is_store: bool,
}

fn lhs_register_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([rvpqcgm]\d+(?::[rvpqcgm]?\d+)?)").expect("static regex must compile")
    })
}

fn predication_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^if \(.*\) +").expect("static regex must compile"))
}

fn post_increment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((r\d+)\+\+").expect("static regex must compile"))
}

/// Single registers written by `insts`, in order of appearance.
///
/// Covers assignment destinations (pairs decomposed, predication stripped) and base registers of
/// post-increment addressing. Entries may contain several newline-separated instructions.
pub fn written_registers<S: AsRef<str>>(insts: &[S]) -> Vec<String> {
    let mut regs: Vec<String> = Vec::new();
    for line in insts.iter().flat_map(|inst| inst.as_ref().lines()) {
        if let Some((lhs, _)) = line.split_once('=') {
            let lhs = predication_regex().replace(lhs.trim(), "");
            if let Some(dst) = lhs_register_regex().captures(&lhs) {
                for reg in components(&dst[1]) {
                    push_unique(&mut regs, reg);
                }
            }
        }
        for post in post_increment_regex().captures_iter(line) {
            push_unique(&mut regs, post[1].to_string());
        }
    }
    regs
}

fn push_unique(regs: &mut Vec<String>, reg: String) {
    if !regs.contains(&reg) {
        regs.push(reg);
    }
}

/// Predicate registers assigned by `insts`.
pub fn written_predicates<S: AsRef<str>>(insts: &[S]) -> Vec<String> {
    written_registers(insts)
        .into_iter()
        .filter(|reg| RegisterClass::Predicate.contains(reg))
        .collect()
}

/// Builds one memory access that fits the packet built so far.
///
/// `inits` are the setup instructions already queued for the packet (earlier accesses claim
/// their address and offset registers there); `packet` holds the packet's resolved instructions.
pub fn synthesize<R, S, T>(
    rng: &mut R,
    inits: &[S],
    packet: &[T],
) -> Result<MemoryAccess, GenerationExhausted>
where
    R: Rng + ?Sized,
    S: AsRef<str>,
    T: AsRef<str>,
{
    let width = *AccessWidth::ALL
        .choose(rng)
        .unwrap_or(&AccessWidth::Word);
    let init_written = written_registers(inits);
    let packet_written = written_registers(packet);

    let mut modes = vec![AddressingMode::Offset, AddressingMode::PostIncrement];
    if !width.is_vector() {
        modes.push(AddressingMode::RegisterSum);
    }

    let mut addr_pool: Vec<String> = MEM_ADDR_REGS.iter().map(|r| r.to_string()).collect();
    let mut offset_pool: Vec<String> = Vec::new();
    let mode = loop {
        let Some(&mode) = modes.choose(rng) else {
            return Err(GenerationExhausted::new("no addressing mode available"));
        };
        let usable = match mode {
            AddressingMode::Offset => true,
            AddressingMode::PostIncrement => {
                let pool = filter_conflicts(&MEM_ADDR_REGS, &packet_written);
                let usable = !pool.is_empty();
                if usable {
                    addr_pool = pool;
                }
                usable
            }
            AddressingMode::RegisterSum => {
                offset_pool = filter_conflicts(&MEM_OFFSET_REGS, &init_written);
                !offset_pool.is_empty()
            }
        };
        if usable {
            break mode;
        }
        modes.retain(|m| *m != mode);
    };

    let addr_pool = filter_conflicts(&addr_pool, &init_written);
    let Some(base) = addr_pool.choose(rng).cloned() else {
        return Err(GenerationExhausted::new(
            "no more registers available for memory addressing",
        ));
    };

    let bytes = width.bytes();
    let scale = width.immediate_scale();
    let mut pre = vec![format!("{base} = #{MEMORY_ACCESS_LABEL}")];
    let mut reads = vec![base.clone()];
    let location = match mode {
        AddressingMode::Offset => {
            let mut offset = rng.gen_range(0..4) * bytes;
            if offset + bytes > ACCESS_WINDOW_BYTES {
                offset = 0;
            }
            format!("{base}+#{}", offset / scale)
        }
        AddressingMode::PostIncrement => match rng.gen_range(0..3) {
            0 => format!("{base}++#{}", rng.gen_range(0..4) * bytes / scale),
            1 => format!("{base}++m0"),
            _ => format!("{base}++m1"),
        },
        AddressingMode::RegisterSum => {
            let index = offset_pool
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| MEM_OFFSET_REGS[0].to_string());
            let shift = rng.gen_range(0..2u32);
            let mut offset = rng.gen_range(0..4) * bytes;
            if (offset << shift) + bytes > ACCESS_WINDOW_BYTES {
                offset = 0;
            }
            pre.push(format!("{index} = #{offset}"));
            let location = format!("{base}+{index}<<#{shift}");
            reads.push(index);
            location
        }
    };

    let is_store = rng.gen_bool(0.5);
    let new_values: Vec<String> = packet_written
        .iter()
        .filter(|reg| RegisterClass::General.contains(reg))
        .map(|reg| format!("{reg}.new"))
        .collect();

    let narrow = matches!(
        width,
        AccessWidth::Byte | AccessWidth::Half | AccessWidth::Word
    );
    let value = if is_store && narrow && !new_values.is_empty() {
        let mut choices = new_values;
        choices.extend(
            RegisterClass::General.registers()[..STORE_VALUE_FALLBACK]
                .iter()
                .cloned(),
        );
        choices.choose(rng).cloned().unwrap_or_else(|| "r0".to_string())
    } else {
        let mut exclude = packet_written.clone();
        if !is_store {
            exclude.extend(reads.iter().cloned());
        }
        let choices = filter_conflicts(width.value_class().registers(), &exclude);
        match choices.choose(rng) {
            Some(reg) => reg.clone(),
            None => {
                return Err(GenerationExhausted::new(
                    "no more registers available for loading",
                ))
            }
        }
    };

    let mut mnemonic = width.mnemonic().to_string();
    if !is_store && width.is_subword() && rng.gen_bool(0.5) {
        mnemonic = mnemonic.replacen("mem", "memu", 1);
    }
    let (hint, usage) = if width.is_vector() {
        if rng.gen_bool(0.5) {
            mnemonic.push('u');
        }
        let hint = if rng.gen_bool(0.5) { ":nt" } else { "" };
        let usage = match (is_store, rng.gen_range(0..3)) {
            (false, 0) => ".tmp",
            (false, 1) => ".cur",
            _ => "",
        };
        (hint, usage)
    } else {
        ("", "")
    };

    let access = if is_store {
        format!("{mnemonic}({location}){hint} = {value}")
    } else {
        format!("{value}{usage} = {mnemonic}({location}){hint}")
    };

    let text = if rng.gen_bool(0.5) {
        let negate = if rng.gen_bool(0.5) { "!" } else { "" };
        let new_preds: Vec<String> = written_predicates(packet)
            .into_iter()
            .map(|p| format!("{p}.new"))
            .collect();
        let pred = if new_preds.is_empty() {
            RegisterClass::Predicate.registers().choose(rng).cloned()
        } else {
            new_preds.choose(rng).cloned()
        }
        .unwrap_or_else(|| "p0".to_string());
        format!("if ({negate}{pred}) {access}")
    } else {
        access
    };

    Ok(MemoryAccess {
        pre,
        text,
        width,
        mode,
        is_store,
    })
}
