//! Whole-register-file perturbations run between invocations of the packet body.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::regs::{GPR_COUNT, VEC_COUNT};

/// General-register mutations, in the round-robin order the control section calls them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Xor,
    Rot,
    Flip,
    Brev,
}

impl MutationKind {
    pub const ROUND_ROBIN: [MutationKind; 4] = [
        MutationKind::Xor,
        MutationKind::Rot,
        MutationKind::Flip,
        MutationKind::Brev,
    ];

    /// Mutation that follows the `iteration`-th call of the packet body.
    pub fn for_iteration(iteration: usize) -> Self {
        Self::ROUND_ROBIN[iteration % Self::ROUND_ROBIN.len()]
    }

    /// Suffix of the `mutate_<name>` routine in the program template.
    pub fn name(self) -> &'static str {
        match self {
            MutationKind::Xor => "xor",
            MutationKind::Rot => "rot",
            MutationKind::Flip => "flip",
            MutationKind::Brev => "brev",
        }
    }
}

/// Mutations leave `r28` alone except through the xor mix, which covers `r0..=r28`.
const MUTATED_GPRS: u32 = GPR_COUNT - 1;

pub fn gpr_brev() -> Vec<String> {
    (0..MUTATED_GPRS)
        .map(|r| format!("r{r} = brev(r{r})"))
        .collect()
}

pub fn gpr_flip() -> Vec<String> {
    (0..MUTATED_GPRS)
        .map(|r| format!("r{r} = togglebit(r{r}, #{})", 29 - r))
        .collect()
}

pub fn gpr_rot() -> Vec<String> {
    (0..MUTATED_GPRS)
        .map(|r| format!("r{r} = rol(r{r}, #1)"))
        .collect()
}

/// `r_dst = xor(r_src, r_{28-src})` over `r0..=r28` with the destinations shuffled.
pub fn gpr_xor<R: Rng + ?Sized>(rng: &mut R) -> Vec<String> {
    let mut dests: Vec<u32> = (0..GPR_COUNT).collect();
    dests.shuffle(rng);
    dests
        .into_iter()
        .zip(0..GPR_COUNT)
        .map(|(dst, src)| format!("r{dst} = xor(r{src}, r{})", GPR_COUNT - 1 - src))
        .collect()
}

/// Rotates every vector register by whatever happens to be in `r0`.
pub fn hvx_rot() -> Vec<String> {
    (0..VEC_COUNT)
        .map(|v| format!("v{v} = vrol(v{v}, r0)"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn round_robin_cycles_through_every_kind() {
        let names: Vec<_> = (0..6)
            .map(|i| MutationKind::for_iteration(i).name())
            .collect();
        assert_eq!(names, ["xor", "rot", "flip", "brev", "xor", "rot"]);
    }

    #[test]
    fn fixed_sequences() {
        assert_eq!(gpr_brev().len(), 28);
        assert_eq!(gpr_flip()[0], "r0 = togglebit(r0, #29)");
        assert_eq!(gpr_flip()[27], "r27 = togglebit(r27, #2)");
        assert_eq!(gpr_rot()[5], "r5 = rol(r5, #1)");
        assert_eq!(hvx_rot().len(), 32);
        assert_eq!(hvx_rot()[31], "v31 = vrol(v31, r0)");
    }

    #[test]
    fn xor_mix_writes_each_register_once() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let lines = gpr_xor(&mut rng);
        assert_eq!(lines.len(), 29);

        let mut dests: Vec<u32> = lines
            .iter()
            .map(|l| l[1..l.find(' ').unwrap()].parse().unwrap())
            .collect();
        dests.sort_unstable();
        assert_eq!(dests, (0..29).collect::<Vec<_>>());
        assert!(lines.iter().any(|l| l.ends_with("xor(r0, r28)")));
    }
}
