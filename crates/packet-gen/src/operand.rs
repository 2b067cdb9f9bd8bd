//! Operand placeholder substitution.
//!
//! Instruction syntax in the descriptor spells operands as placeholders: `Rd32` (a general
//! register), `Rss32` (a general register pair), `Pt4`, `Vu32`, `#s8`, and so on. The
//! [`OperandSynthesizer`] replaces every placeholder with a concrete register or immediate.

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::descriptor::{InstructionDescriptor, ATTR_ATOMIC};
use crate::imm::ImmediateRule;
use crate::init::{JUMP_TARGET_COUNT, MEMORY_ACCESS_LABEL};
use crate::regs::RegisterClass;

/// Letters the descriptor uses to name operands (`Rd`, `Rs`, `Rtt`, ...).
const IDENTS: &str = "[edstuvwxy]";

/// What a matched placeholder is replaced with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Substitution {
    /// Any register of the class.
    Register(RegisterClass),
    /// A register of the class with a `.l`/`.h` half selector.
    HalfRegister(RegisterClass),
    /// A random value following the placeholder's [`ImmediateRule`].
    Immediate,
    /// One of the program's jump-target stubs.
    JumpTarget,
}

#[derive(Debug)]
pub struct OperandPattern {
    pub name: &'static str,
    regex: Regex,
    pub substitution: Substitution,
}

/// Resolved form of one instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulatedInstruction {
    /// Initialization that must run before the packet (atomic source addresses).
    pub pre: Option<String>,
    pub text: String,
}

#[derive(Debug)]
pub struct OperandSynthesizer {
    patterns: Vec<OperandPattern>,
}

impl Default for OperandSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl OperandSynthesizer {
    pub fn new() -> Self {
        use RegisterClass as C;
        use Substitution::{HalfRegister, Immediate, JumpTarget, Register};

        let i1 = IDENTS;
        let i2 = format!("{IDENTS}{{2}}");
        let i4 = format!("{IDENTS}{{4}}");

        // Order matters: narrower forms must be tried before the general register form would
        // get a chance to consume part of them.
        let table: Vec<(&'static str, String, Substitution)> = vec![
            ("jump", r"jump(:t|:nt)? #r[0-9]+(:[0-9]+)?".to_string(), JumpTarget),
            ("pred", format!("P{i1}4"), Register(C::Predicate)),
            ("gpr_pair_duplex", format!("R{i2}8"), Register(C::DoubleGeneralDuplex)),
            ("gpr", format!("R{i1}32"), Register(C::General)),
            ("gpr_half", format!(r"R{i1}\.[LH]32"), HalfRegister(C::General)),
            ("gpr_pair", format!("R{i2}32"), Register(C::DoubleGeneral)),
            ("gpr_duplex", format!("R{i1}16"), Register(C::GeneralDuplex)),
            ("vec", format!("V{i1}32"), Register(C::Vector)),
            ("vec_pair", format!("V{i2}32"), Register(C::VectorPair)),
            ("vec_quad", format!("V{i4}32"), Register(C::VectorQuad)),
            ("vec_pred4", format!("Q{i1}4"), Register(C::VectorPredicate4)),
            ("vec_pred", format!("Q{i1}8"), Register(C::VectorPredicate)),
            ("gpr_low", format!("[NR]{i1}8"), Register(C::GeneralLow)),
            ("ctrl", format!("C{i1}32"), Register(C::Control)),
            ("ctrl_pair", format!("C{i2}32"), Register(C::DoubleControl)),
            ("modifier", format!("M{i1}2"), Register(C::Modifier)),
            ("guest", format!("G{i1}32"), Register(C::Guest)),
            ("guest_pair", format!("G{i2}32"), Register(C::DoubleGuest)),
            ("imm", r"#[UuSsr][0-9]+(:[0-9]+)?".to_string(), Immediate),
        ];

        let patterns = table
            .into_iter()
            .map(|(name, pattern, substitution)| OperandPattern {
                name,
                regex: Regex::new(&pattern).expect("static operand pattern must compile"),
                substitution,
            })
            .collect();
        Self { patterns }
    }

    pub fn patterns(&self) -> &[OperandPattern] {
        &self.patterns
    }

    /// Resolves every operand placeholder of `inst`.
    pub fn populate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        inst: &InstructionDescriptor,
    ) -> PopulatedInstruction {
        let atomic = inst.has_attr(ATTR_ATOMIC);
        let mut text = inst.syntax.clone();
        let mut pre = None;

        for pattern in &self.patterns {
            let mut start = 0;
            while let Some(found) = pattern.regex.find_at(&text, start) {
                let range = found.range();
                let token = found.as_str();
                // Unusable tokens stay in the text for `unresolved` to report.
                let Some(replacement) = substitute(rng, pattern.substitution, token) else {
                    start = range.end;
                    continue;
                };
                if atomic && token.starts_with("Rs") {
                    pre = Some(format!("{replacement} = #{MEMORY_ACCESS_LABEL}"));
                }
                start = range.start + replacement.len();
                text.replace_range(range, &replacement);
            }
        }

        PopulatedInstruction { pre, text }
    }

    /// First immediate placeholder in `syntax` that cannot be drawn from, such as a field wider
    /// than 32 bits.
    pub fn malformed_immediate<'s>(&self, syntax: &'s str) -> Option<&'s str> {
        self.patterns
            .iter()
            .filter(|p| p.substitution == Substitution::Immediate)
            .flat_map(|p| p.regex.find_iter(syntax))
            .map(|found| found.as_str())
            .find(|token| ImmediateRule::parse(token).is_none())
    }

    /// Name of the first pattern still present in `text`, if any.
    pub fn unresolved(&self, text: &str) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(text))
            .map(|p| p.name)
    }
}

fn substitute<R: Rng + ?Sized>(
    rng: &mut R,
    substitution: Substitution,
    token: &str,
) -> Option<String> {
    let replacement = match substitution {
        Substitution::Register(class) => pick(rng, class).to_string(),
        Substitution::HalfRegister(class) => {
            let half = if rng.gen_bool(0.5) { ".l" } else { ".h" };
            format!("{}{half}", pick(rng, class))
        }
        Substitution::Immediate => ImmediateRule::render(ImmediateRule::parse(token)?.draw(rng)),
        Substitution::JumpTarget => {
            let mnemonic = token.split(' ').next().unwrap_or("jump");
            let target = rng.gen_range(0..JUMP_TARGET_COUNT);
            format!("{mnemonic} .Ljump_target_{target}")
        }
    };
    Some(replacement)
}

fn pick<R: Rng + ?Sized>(rng: &mut R, class: RegisterClass) -> &'static str {
    class
        .registers()
        .choose(rng)
        .map(String::as_str)
        .unwrap_or("r0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn populate(syntax: &str, attrs: &[&str], seed: u64) -> PopulatedInstruction {
        let synth = OperandSynthesizer::new();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        synth.populate(&mut rng, &InstructionDescriptor::new(syntax, attrs))
    }

    #[test]
    fn general_registers_and_immediates_are_resolved() {
        let re = Regex::new(r"^r(\d+) = add\(r(\d+), #0x[0-9a-f]{2,8}\)$").unwrap();
        for seed in 0..64 {
            let out = populate("Rd32 = add(Rs32, #s8)", &[], seed);
            assert!(re.is_match(&out.text), "{}", out.text);
            assert_eq!(out.pre, None);
        }
    }

    #[test]
    fn pair_patterns_win_over_single_patterns() {
        let out = populate("Rdd32 = combine(Rs32, Rt32)", &[], 3);
        let dst = out.text.split(' ').next().unwrap();
        assert!(RegisterClass::DoubleGeneral.contains(dst), "{}", out.text);

        let out = populate("Vdddd32 = vmpy(Vuu32, Rt32)", &[], 4);
        let dst = out.text.split(' ').next().unwrap();
        assert!(RegisterClass::VectorQuad.contains(dst), "{}", out.text);
    }

    #[test]
    fn half_registers_get_a_selector() {
        let out = populate("Rd32 = add(Rt.L32, Rs.H32)", &[], 11);
        assert!(out.text.contains(".l") || out.text.contains(".h"), "{}", out.text);
        assert!(!out.text.contains("32"), "{}", out.text);
    }

    #[test]
    fn atomic_source_address_gets_a_pre_instruction() {
        let out = populate("Rd32 = memw_locked(Rs32)", &["A_ATOMIC"], 5);
        let pre = out.pre.expect("atomic instruction needs its address initialized");
        let reg = pre.split(' ').next().unwrap();
        assert_eq!(pre, format!("{reg} = #memory_access"));
        assert!(out.text.ends_with(&format!("({reg})")), "{}", out.text);
    }

    #[test]
    fn oversized_immediates_are_left_unresolved() {
        let synth = OperandSynthesizer::new();
        let syntax = "Rd32 = add(Rs32, #u99999999999)";
        assert_eq!(synth.malformed_immediate(syntax), Some("#u99999999999"));
        assert_eq!(synth.malformed_immediate("Rd32 = add(Rs32, #s16)"), None);

        let out = populate("Rd32 = add(Rs32, #u99999999999) ; Rx32 = #s8", &[], 2);
        assert!(out.text.contains("#u99999999999"), "{}", out.text);
        assert!(!out.text.contains("#s8"), "{}", out.text);
        assert_eq!(synth.unresolved(&out.text), Some("imm"));
    }

    #[test]
    fn jumps_land_on_stub_labels() {
        let out = populate("if (Pu4) jump:nt #r15:2", &[], 9);
        let re = Regex::new(r"^if \(p[0-3]\) jump:nt \.Ljump_target_[0-5]$").unwrap();
        assert!(re.is_match(&out.text), "{}", out.text);
    }

    #[test]
    fn populated_syntax_has_no_placeholders_left() {
        let synth = OperandSynthesizer::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for syntax in [
            "Rdd8 = combine(#u2, #U2)",
            "Cdd32 = Rss32",
            "Gd32 = Rs32",
            "Gdd32 = Rss32",
            "Rx32 += mpyi(Rs32, #u8)",
            "Qd4 = vcmp.eq(Vu32.b, Vv32.b)",
            "Rd16 = memw(Rs16+#u4:2)",
            "Rx32 = add(Rx32, Mu2)",
            "Nt8 = Rs32",
        ] {
            let out = synth.populate(&mut rng, &InstructionDescriptor::new(syntax, &[]));
            assert_eq!(synth.unresolved(&out.text), None, "{syntax} -> {}", out.text);
        }
    }
}
