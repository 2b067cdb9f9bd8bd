//! Register catalogs for the packet generator.
//!
//! Every register class is a fixed, ordered list of register names as they are spelled in
//! assembly source. Paired registers use the `hi:lo` form (`r1:0`, `v3:0`); conflict checks must
//! always go through [`components`] so that a pair is treated as the set of single registers it
//! occupies.

use std::sync::OnceLock;

/// Address-modifier registers usable by post-increment addressing (`Rx++Mu`).
pub const MODIFIER_REGS: [&str; 2] = ["m0", "m1"];

/// Registers holding the scratch memory pointer for synthesized memory accesses.
pub const MEM_ADDR_REGS: [&str; 3] = ["r1", "r2", "r3"];

/// Registers used as the index operand of register-sum addressing.
pub const MEM_OFFSET_REGS: [&str; 3] = ["r4", "r5", "r6"];

/// Number of general registers the generated code may touch (`r0..=r28`).
///
/// `r29..r31` hold the stack, frame and link registers of the test program.
pub const GPR_COUNT: u32 = 29;

/// Number of HVX vector registers.
pub const VEC_COUNT: u32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterClass {
    Modifier,
    Control,
    DoubleControl,
    Predicate,
    General,
    GeneralLow,
    GeneralDuplex,
    DoubleGeneral,
    DoubleGeneralDuplex,
    VectorPredicate4,
    VectorPredicate,
    VectorPredicatePair,
    Vector,
    VectorPair,
    VectorQuad,
    Guest,
    DoubleGuest,
}

impl RegisterClass {
    pub const ALL: [RegisterClass; 17] = [
        RegisterClass::Modifier,
        RegisterClass::Control,
        RegisterClass::DoubleControl,
        RegisterClass::Predicate,
        RegisterClass::General,
        RegisterClass::GeneralLow,
        RegisterClass::GeneralDuplex,
        RegisterClass::DoubleGeneral,
        RegisterClass::DoubleGeneralDuplex,
        RegisterClass::VectorPredicate4,
        RegisterClass::VectorPredicate,
        RegisterClass::VectorPredicatePair,
        RegisterClass::Vector,
        RegisterClass::VectorPair,
        RegisterClass::VectorQuad,
        RegisterClass::Guest,
        RegisterClass::DoubleGuest,
    ];

    /// Register names in this class, in catalog order.
    pub fn registers(self) -> &'static [String] {
        static TABLES: OnceLock<Vec<Vec<String>>> = OnceLock::new();
        let tables =
            TABLES.get_or_init(|| RegisterClass::ALL.iter().map(|class| class.build()).collect());
        &tables[self as usize]
    }

    pub fn contains(self, name: &str) -> bool {
        self.registers().iter().any(|reg| reg == name)
    }

    fn build(self) -> Vec<String> {
        match self {
            RegisterClass::Modifier => MODIFIER_REGS.iter().map(|r| r.to_string()).collect(),
            // c4 (p3:0), c8 (usr) and c11 are written by the harness itself or are unstable
            // between engines.
            RegisterClass::Control => singles('c', (0..16).filter(|i| ![4, 8, 11].contains(i))),
            RegisterClass::DoubleControl => {
                pairs('c', (0..16).step_by(2).filter(|i| ![4, 8, 10].contains(i)))
            }
            RegisterClass::Predicate => singles('p', 0..4),
            RegisterClass::General => singles('r', 0..GPR_COUNT),
            RegisterClass::GeneralLow => singles('r', 0..8),
            RegisterClass::GeneralDuplex => singles('r', (0..8).chain(16..24)),
            RegisterClass::DoubleGeneral => pairs('r', (0..28).step_by(2)),
            RegisterClass::DoubleGeneralDuplex => pairs('r', (0..8).step_by(2)),
            RegisterClass::VectorPredicate4 => singles('q', 0..4),
            RegisterClass::VectorPredicate => singles('q', 0..8),
            RegisterClass::VectorPredicatePair => pairs('q', (0..4).step_by(2)),
            RegisterClass::Vector => singles('v', 0..VEC_COUNT),
            RegisterClass::VectorPair => pairs('v', (0..29).step_by(2)),
            RegisterClass::VectorQuad => (0..29)
                .step_by(4)
                .map(|lo| format!("v{}:{lo}", lo + 3))
                .collect(),
            RegisterClass::Guest => singles('g', 0..4),
            RegisterClass::DoubleGuest => pairs('g', (0..3).step_by(2)),
        }
    }
}

fn singles(prefix: char, indices: impl Iterator<Item = u32>) -> Vec<String> {
    indices.map(|i| format!("{prefix}{i}")).collect()
}

fn pairs(prefix: char, low_indices: impl Iterator<Item = u32>) -> Vec<String> {
    low_indices
        .map(|lo| format!("{prefix}{}:{lo}", lo + 1))
        .collect()
}

/// Decomposes a register reference into the single registers it occupies.
///
/// Accepts single registers (`r7`), short pairs (`r3:2`), spelled-out pairs (`r3:r2`) and
/// quads (`v7:4`). Anything that does not look like a register range is returned unchanged as
/// its own single component.
pub fn components(name: &str) -> Vec<String> {
    let Some((hi, lo)) = name.split_once(':') else {
        return vec![name.to_string()];
    };

    let prefix_len = hi
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(hi.len());
    let (prefix, hi_digits) = hi.split_at(prefix_len);
    let lo_digits = lo.strip_prefix(prefix).unwrap_or(lo);

    match (hi_digits.parse::<u32>(), lo_digits.parse::<u32>()) {
        (Ok(hi), Ok(lo)) if !prefix.is_empty() => {
            let (first, last) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            (first..=last).map(|i| format!("{prefix}{i}")).collect()
        }
        _ => vec![hi.to_string(), lo.to_string()],
    }
}

/// Returns true when the two register references share at least one single register.
pub fn overlaps(a: &str, b: &str) -> bool {
    let a = components(a);
    components(b).iter().any(|reg| a.contains(reg))
}

/// Keeps the candidates that share no single register with any of `exclude`.
pub fn filter_conflicts<S: AsRef<str>>(candidates: &[S], exclude: &[String]) -> Vec<String> {
    let excluded: Vec<String> = exclude.iter().flat_map(|reg| components(reg)).collect();
    candidates
        .iter()
        .map(AsRef::as_ref)
        .filter(|cand| !components(cand).iter().any(|reg| excluded.contains(reg)))
        .map(str::to_string)
        .collect()
}
