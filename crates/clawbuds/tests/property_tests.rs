//! Property tests over the pure domain functions.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;

use clawbuds::pearl::luster;
use clawbuds::relationship::dunbar;
use clawbuds::trust::composite_score;

proptest! {
    /// Luster stays within [0.1, 1.0] for any endorsement set and citation
    /// count.
    #[test]
    fn luster_bounds(
        scores in prop::collection::vec((0.0f64..=1.0, 0.0f64..=1.0), 0..64),
        citations in 0u32..10_000,
    ) {
        let value = luster(&scores, citations);
        prop_assert!(value >= 0.1);
        prop_assert!(value <= 1.0);
    }

    /// The stored composite is a pure function of Q/H/N/W and clamped.
    #[test]
    fn composite_identity(
        q in 0.0f64..=1.0,
        h in prop::option::of(0.0f64..=1.0),
        n in 0.0f64..=1.0,
        w in 0.0f64..=1.0,
    ) {
        let once = composite_score(q, h, n, w);
        let twice = composite_score(q, h, n, w);
        prop_assert_eq!(once.to_bits(), twice.to_bits());
        prop_assert!((0.0..=1.0).contains(&once));
    }

    /// With H unset and Q = N = W = v, composite equals v.
    #[test]
    fn composite_h_unset_equivalence(v in 0.0f64..=1.0) {
        let composite = composite_score(v, None, v, v);
        prop_assert!((composite - v).abs() < 1e-9);
    }

    /// Without boosts, strength never grows as time passes, and the decay
    /// is reproducible.
    #[test]
    fn decay_monotonicity(
        strength in 0.0f64..=1.0,
        earlier in 0.0f64..2_000_000.0,
        extra in 0.0f64..2_000_000.0,
    ) {
        let half_life = 7.0;
        let at_earlier = dunbar::decay(strength, earlier, half_life);
        let at_later = dunbar::decay(strength, earlier + extra, half_life);
        prop_assert!(at_later <= at_earlier + 1e-12);
        prop_assert!(at_earlier <= strength + 1e-12);
        prop_assert_eq!(
            dunbar::decay(strength, earlier, half_life).to_bits(),
            at_earlier.to_bits()
        );
    }

    /// Layer transitions happen exactly at the band thresholds.
    #[test]
    fn layer_bands_partition_the_unit_interval(strength in 0.0f64..=1.0) {
        use clawbuds::model::DunbarLayer;
        let layer = dunbar::layer_for(strength);
        let expected = if strength >= 0.75 {
            DunbarLayer::Core
        } else if strength >= 0.50 {
            DunbarLayer::Sympathy
        } else if strength >= 0.25 {
            DunbarLayer::Active
        } else {
            DunbarLayer::Casual
        };
        prop_assert_eq!(layer, expected);
    }

    /// Message ids order lexically by timestamp.
    #[test]
    fn message_ids_time_ordered(a in 0i64..=(1i64 << 41), b in 0i64..=(1i64 << 41)) {
        let id_a = clawbuds::ids::message_id(a);
        let id_b = clawbuds::ids::message_id(b);
        if a < b {
            prop_assert!(id_a < id_b);
        }
        prop_assert_eq!(id_a.len(), 32);
    }
}
