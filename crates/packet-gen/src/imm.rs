use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signedness {
    Signed,
    Unsigned,
    /// PC-relative operand; drawn like an unsigned field.
    Relative,
}

/// Encoding of an immediate operand placeholder such as `#s8`, `#u6:2` or `#r9:2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImmediateRule {
    pub signedness: Signedness,
    pub bits: u32,
    pub shift: u32,
}

impl ImmediateRule {
    /// Parses a placeholder token (`#s8`, `#U16`, `#u6:2`, `#r15:2`). Widths or shifts past
    /// 32 bits are rejected.
    pub fn parse(token: &str) -> Option<Self> {
        let rest = token.strip_prefix('#')?;
        let mut chars = rest.chars();
        let signedness = match chars.next()? {
            'S' | 's' => Signedness::Signed,
            'U' | 'u' => Signedness::Unsigned,
            'r' => Signedness::Relative,
            _ => return None,
        };
        let rest = chars.as_str();
        let (bits, shift) = match rest.split_once(':') {
            Some((bits, shift)) => (bits, Some(shift)),
            None => (rest, None),
        };
        if bits.is_empty() || !bits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let bits = field_width(bits)?;
        let shift = match shift {
            Some(shift) if !shift.is_empty() && shift.bytes().all(|b| b.is_ascii_digit()) => {
                field_width(shift)?
            }
            Some(_) => return None,
            None => 0,
        };
        Some(Self {
            signedness,
            bits,
            shift,
        })
    }

    pub fn is_signed(&self) -> bool {
        self.signedness == Signedness::Signed
    }

    /// Index of the highest magnitude bit: `bits + shift - (1 if signed)`, capped at 32.
    pub fn max_bit(&self) -> u32 {
        let width = self.bits.saturating_add(self.shift);
        let width = if self.is_signed() {
            width.saturating_sub(1)
        } else {
            width
        };
        width.min(32)
    }

    pub fn min_val(&self) -> i64 {
        if self.is_signed() {
            -(1i64 << self.max_bit())
        } else {
            0
        }
    }

    pub fn max_val(&self) -> i64 {
        (1i64 << self.max_bit()) - 1
    }

    /// Draws a value in `[min_val, max_val]`.
    ///
    /// Shifted fields only encode multiples of `1 << shift`, so the draw is made over those
    /// multiples; unaligned values would just be rejected by the assembler.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        let shift = self.shift.min(self.max_bit());
        let lo = self.min_val() >> shift;
        let hi = self.max_val() >> shift;
        rng.gen_range(lo..=hi) << shift
    }

    /// Masks a drawn value to the 32-bit pattern written into the source.
    pub fn encode(value: i64) -> u32 {
        value as u32
    }

    pub fn render(value: i64) -> String {
        format!("#0x{:02x}", Self::encode(value))
    }
}

fn field_width(digits: &str) -> Option<u32> {
    digits.parse::<u32>().ok().filter(|&n| n <= 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn parses_placeholder_forms() {
        assert_eq!(
            ImmediateRule::parse("#s8"),
            Some(ImmediateRule {
                signedness: Signedness::Signed,
                bits: 8,
                shift: 0
            })
        );
        assert_eq!(
            ImmediateRule::parse("#u6:2"),
            Some(ImmediateRule {
                signedness: Signedness::Unsigned,
                bits: 6,
                shift: 2
            })
        );
        assert_eq!(
            ImmediateRule::parse("#r15:2").map(|r| r.signedness),
            Some(Signedness::Relative)
        );
        assert_eq!(ImmediateRule::parse("#0x10"), None);
        assert_eq!(ImmediateRule::parse("#s"), None);
        assert_eq!(ImmediateRule::parse("#u6:"), None);
    }

    #[test]
    fn oversized_fields_are_rejected() {
        assert_eq!(ImmediateRule::parse("#u99999999999"), None);
        assert_eq!(ImmediateRule::parse("#s33"), None);
        assert_eq!(ImmediateRule::parse("#u6:40"), None);
        let widest = ImmediateRule::parse("#u32:32").unwrap();
        assert_eq!(widest.max_bit(), 32);
        assert_eq!(widest.max_val(), u32::MAX as i64);
    }

    #[test]
    fn ranges_follow_width_and_shift() {
        let s8 = ImmediateRule::parse("#s8").unwrap();
        assert_eq!((s8.min_val(), s8.max_val()), (-128, 127));

        let u6_2 = ImmediateRule::parse("#u6:2").unwrap();
        assert_eq!(u6_2.max_bit(), 8);
        assert_eq!((u6_2.min_val(), u6_2.max_val()), (0, 255));

        let u32_ = ImmediateRule::parse("#u32").unwrap();
        assert_eq!(u32_.max_val(), u32::MAX as i64);
    }

    #[test]
    fn shifted_draws_are_aligned() {
        let rule = ImmediateRule::parse("#s4:2").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..256 {
            let v = rule.draw(&mut rng);
            assert_eq!(v % 4, 0);
            assert!((rule.min_val()..=rule.max_val()).contains(&v));
        }
    }

    #[test]
    fn negative_values_render_as_32_bit_patterns() {
        assert_eq!(ImmediateRule::render(-1), "#0xffffffff");
        assert_eq!(ImmediateRule::render(5), "#0x05");
        assert_eq!(ImmediateRule::render(-128), "#0xffffff80");
    }
}
