//! Architectural state set up before the first packet runs.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::regs::{RegisterClass, MEM_ADDR_REGS};

/// Label of the scratch region every synthesized memory access points into.
pub const MEMORY_ACCESS_LABEL: &str = "memory_access";

/// Random words in one repetition of the scratch block.
pub const MEM_WORDS: u32 = 16;
/// How many times the scratch block is repeated.
pub const MEM_REPEAT: u32 = 128;
pub const MEM_BYTES: u32 = MEM_WORDS * MEM_REPEAT * 4;

pub const HVX_VECTOR_BYTES: u32 = 128;

/// Repetitions of the scratch block appended after the region so that an unaligned vector read
/// at the very end stays inside mapped data.
pub const MEM_PADDING_REPEAT: u32 = (HVX_VECTOR_BYTES * 8) / (MEM_WORDS * 4);

/// Span, measured from the base register, that synthesized accesses must stay inside.
pub const ACCESS_WINDOW_BYTES: u32 = MEM_WORDS * 2 * 4;

/// Number of `.Ljump_target_<i>` stubs in every program.
pub const JUMP_TARGET_COUNT: usize = 6;

/// Boundary values that tend to shake out saturation and sign-extension bugs.
pub const INTERESTING_VALUES: [u32; 25] = [
    0xffff_ff80,
    0xffff_ffff,
    0x0000_0000,
    0x0000_0001,
    0x0000_0010,
    0x0000_0020,
    0x0000_0040,
    0x0000_007f,
    0xffff_8000,
    0xffff_ff7f,
    0x0000_0080,
    0x0000_00ff,
    0x0000_0100,
    0x0000_0200,
    0x0000_0400,
    0x0000_1000,
    0x0000_7fff,
    0x8000_0000,
    0xfa00_00fa,
    0xffff_7fff,
    0x0000_8000,
    0x0000_ffff,
    0x0001_0000,
    0x05ff_ff05,
    0x7fff_ffff,
];

/// Draws an initial register value: near zero, uniform, or one of [`INTERESTING_VALUES`].
pub fn state_value<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    match rng.gen_range(0..3) {
        0 => rng.gen_range(0..256),
        1 => rng.gen(),
        _ => *INTERESTING_VALUES
            .choose(rng)
            .unwrap_or(&INTERESTING_VALUES[0]),
    }
}

pub fn gpr_init<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    RegisterClass::General
        .registers()
        .iter()
        .map(|reg| format!("{reg} = #0x{:08x}", state_value(rng)))
        .collect()
}

/// Points the HVX address registers into the scratch region, then fills every vector register
/// and the four-entry vector predicates.
pub fn hvx_init<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    let mut lines = Vec::new();
    for reg in MEM_ADDR_REGS {
        let offset = rng.gen_range(0..MEM_BYTES - HVX_VECTOR_BYTES);
        lines.push(format!("{reg} = #{MEMORY_ACCESS_LABEL}"));
        lines.push(format!("{reg} = add({reg}, #{offset})"));
    }

    for v in 0..RegisterClass::Vector.registers().len() {
        let line = if rng.gen_bool(0.5) {
            format!("v{v} = vsplat(r{})", v % 29)
        } else {
            // `vmemu` takes a signed 4-bit vector-unit offset.
            let offset: i32 = rng.gen_range(-8..7);
            let base = MEM_ADDR_REGS.choose(rng).copied().unwrap_or(MEM_ADDR_REGS[0]);
            format!("v{v} = vmemu({base} + #{offset})")
        };
        lines.push(line);
    }

    for q in RegisterClass::VectorPredicate4.registers() {
        let cmp = if rng.gen_bool(0.5) {
            "vcmp.eq(v0.b,v0.b)"
        } else {
            "vcmp.eq(v0.b,v1.b)"
        };
        lines.push(format!("{q} = {cmp}"));
    }
    lines
}

pub fn pred_init<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    RegisterClass::Predicate
        .registers()
        .iter()
        .map(|p| {
            let cmp = if rng.gen_bool(0.5) {
                "cmp.eq(r0,r0)"
            } else {
                "cmp.eq(r0,r1)"
            };
            format!("{p} = {cmp}")
        })
        .collect()
}

/// Contents of one repetition of the scratch block.
pub fn mem_words<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    (0..MEM_WORDS)
        .map(|_| format!(".word 0x{:08x}", rng.gen::<u32>()))
        .collect()
}
