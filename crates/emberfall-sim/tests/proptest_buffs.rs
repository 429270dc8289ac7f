//! Property tests for buff stacking, resets and defense resolution.
//!
//! Random sequences of reapplications and advances run against a single
//! buff definition while a small model tracks how many ticks the current
//! attachment may still fire.

use emberfall_sim::buff::{BuffApplied, BuffDef, BuffSet};
use emberfall_sim::combat::resolve_damage;
use proptest::prelude::*;

const ID: i64 = 3;

#[derive(Debug, Clone)]
enum BuffOp {
    Apply,
    Advance(u64),
}

fn buff_op_strategy() -> impl Strategy<Value = BuffOp> {
    prop_oneof![
        1 => Just(BuffOp::Apply),
        3 => (0..1_500u64).prop_map(BuffOp::Advance),
    ]
}

fn def_strategy() -> impl Strategy<Value = BuffDef> {
    (
        prop_oneof![-10..0i32, 1..20i32],
        1..400u64,
        0..200u64,
        1..6u32,
        any::<bool>(),
    )
        .prop_map(|(damage, duration_ms, gap_ms, count, stackable)| BuffDef {
            id: ID,
            name: "test".into(),
            damage,
            duration_ms,
            gap_ms,
            count,
            stackable,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn reapply_sequences_keep_tick_budget(
        def in def_strategy(),
        defense in 0..30i32,
        ops in prop::collection::vec(buff_op_strategy(), 1..80),
    ) {
        let per_tick = resolve_damage(def.damage, defense);
        let mut set = BuffSet::new();
        // Ticks the current attachment may fire, and ticks it has fired.
        let mut budget = 0u32;
        let mut fired = 0u32;

        for op in ops {
            match op {
                BuffOp::Apply => {
                    let applied = set.add(def.clone());
                    match applied {
                        BuffApplied::Attached => {
                            budget = def.count;
                            fired = 0;
                        }
                        BuffApplied::Stacked => {
                            prop_assert!(def.stackable);
                            budget += def.count;
                        }
                        BuffApplied::Reset => {
                            prop_assert!(!def.stackable);
                            fired = 0;
                        }
                    }
                    let buff = set.get(ID).expect("attached");
                    prop_assert_eq!(buff.count(), budget);
                    prop_assert_eq!(buff.total_ms(), u64::from(budget) * def.period_ms());
                }
                BuffOp::Advance(ms) => {
                    let report = set.advance(ms, defense);
                    for (id, total) in report.effects {
                        prop_assert_eq!(id, ID);
                        prop_assert_eq!(total % per_tick, 0);
                        let fires = total / per_tick;
                        prop_assert!(fires >= 1);
                        fired += fires as u32;
                    }
                    prop_assert!(fired <= budget, "fired {} of {}", fired, budget);
                    if report.removed.contains(&ID) {
                        prop_assert_eq!(fired, budget);
                        prop_assert!(set.get(ID).is_none());
                    }
                }
            }
        }
    }

    #[test]
    fn harmful_ticks_always_land_and_heals_pass_through(
        def in def_strategy(),
        defense in 0..100i32,
    ) {
        let mut set = BuffSet::new();
        set.add(def.clone());
        let report = set.advance(0, defense);
        prop_assert_eq!(report.effects.len(), 1);
        let (_, total) = report.effects[0];
        if def.damage > 0 {
            prop_assert_eq!(total, (def.damage - defense).max(1));
        } else {
            prop_assert_eq!(total, def.damage);
        }
    }
}
