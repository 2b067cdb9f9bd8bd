#![cfg(not(target_arch = "wasm32"))]

use packet_harness::{StatsDocument, TagCounts};
use proptest::prelude::*;

fn tag_counts() -> impl Strategy<Value = TagCounts> {
    let tags = vec!["A2_add", "A2_sub", "J2_jump", "V6_vadd"];
    prop::collection::vec(prop::sample::select(tags), 0..32)
        .prop_map(|tags| tags.into_iter().collect::<TagCounts>())
}

fn merged(a: &TagCounts, b: &TagCounts) -> TagCounts {
    let mut out = a.clone();
    out.merge(b);
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0x57a7_5eed),
        ..ProptestConfig::default()
    })]

    #[test]
    fn merge_is_commutative(a in tag_counts(), b in tag_counts()) {
        prop_assert_eq!(merged(&a, &b), merged(&b, &a));
    }

    #[test]
    fn merge_is_associative(a in tag_counts(), b in tag_counts(), c in tag_counts()) {
        prop_assert_eq!(merged(&merged(&a, &b), &c), merged(&a, &merged(&b, &c)));
    }

    #[test]
    fn merge_preserves_totals(a in tag_counts(), b in tag_counts()) {
        prop_assert_eq!(merged(&a, &b).total(), a.total() + b.total());
    }

    #[test]
    fn documents_survive_the_file_format(counts in tag_counts()) {
        let doc = StatsDocument { inst_counts: counts };
        let text = doc.to_json().unwrap();
        let parsed: StatsDocument = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(parsed, doc);
    }
}
