//! Timed status effects.
//!
//! A buff applies `damage` once per effect tick, `count` times, with ticks
//! spaced `duration_ms + gap_ms` apart. The first tick lands on the first
//! advance after the buff is attached. Each harmful tick is reduced by the
//! holder's defense like any other hit; negative damage heals in full.
//!
//! Reapplying a buff that is already attached either stacks (adds the new
//! count and stretches the total duration) or resets progress, depending on
//! the definition's `stackable` flag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::combat::resolve_damage;

// ---------------------------------------------------------------------------
// BuffDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuffDef {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Life change per effect tick.
    pub damage: i32,
    pub duration_ms: u64,
    #[serde(default)]
    pub gap_ms: u64,
    pub count: u32,
    #[serde(default)]
    pub stackable: bool,
}

impl BuffDef {
    /// Time between effect ticks, never zero.
    pub fn period_ms(&self) -> u64 {
        (self.duration_ms + self.gap_ms).max(1)
    }
}

// ---------------------------------------------------------------------------
// Buff
// ---------------------------------------------------------------------------

/// One attached buff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buff {
    def: BuffDef,
    count: u32,
    current: u32,
    elapsed_ms: u64,
    total_ms: u64,
}

/// What one advance did to a buff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuffStep {
    /// Effect ticks crossed during this advance.
    pub fires: u32,
    pub expired: bool,
}

impl Buff {
    pub fn new(def: BuffDef) -> Self {
        let count = def.count;
        let total_ms = u64::from(count) * def.period_ms();
        Self {
            def,
            count,
            current: 0,
            elapsed_ms: 0,
            total_ms,
        }
    }

    pub fn def(&self) -> &BuffDef {
        &self.def
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Effect ticks already applied.
    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    /// Apply `def` again on top of this buff.
    pub fn reapply(&mut self, def: &BuffDef) {
        if self.def.stackable {
            self.count += def.count;
            self.total_ms = u64::from(self.count) * self.def.period_ms();
        } else {
            self.elapsed_ms = 0;
            self.current = 0;
        }
    }

    pub fn advance(&mut self, elapsed_ms: u64) -> BuffStep {
        self.elapsed_ms += elapsed_ms;
        let index = (self.elapsed_ms / self.def.period_ms() + 1).min(u64::from(self.count)) as u32;
        let fires = index.saturating_sub(self.current);
        self.current = self.current.max(index);
        BuffStep {
            fires,
            expired: self.elapsed_ms > self.total_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// BuffSet
// ---------------------------------------------------------------------------

/// Result of [`BuffSet::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuffApplied {
    Attached,
    Stacked,
    Reset,
}

/// Net effect of advancing every attached buff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuffReport {
    /// `(buff id, summed life change)` for every buff that ticked.
    pub effects: Vec<(i64, i32)>,
    /// Buffs that ran out and were detached.
    pub removed: Vec<i64>,
}

/// Active buffs of one actor, keyed by buff id.
#[derive(Debug, Clone, Default)]
pub struct BuffSet {
    buffs: BTreeMap<i64, Buff>,
}

impl BuffSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, def: BuffDef) -> BuffApplied {
        match self.buffs.get_mut(&def.id) {
            Some(existing) => {
                existing.reapply(&def);
                if existing.def.stackable {
                    BuffApplied::Stacked
                } else {
                    BuffApplied::Reset
                }
            }
            None => {
                self.buffs.insert(def.id, Buff::new(def));
                BuffApplied::Attached
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<&Buff> {
        self.buffs.get(&id)
    }

    pub fn remove(&mut self, id: i64) -> Option<Buff> {
        self.buffs.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.buffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffs.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffs.clear();
    }

    /// Advance every buff by `elapsed_ms` for a holder with `defense`.
    pub fn advance(&mut self, elapsed_ms: u64, defense: i32) -> BuffReport {
        let mut report = BuffReport::default();
        for (id, buff) in &mut self.buffs {
            let step = buff.advance(elapsed_ms);
            if step.fires > 0 {
                let per_tick = resolve_damage(buff.def.damage, defense);
                let total = per_tick.saturating_mul(step.fires as i32);
                report.effects.push((*id, total));
            }
            if step.expired {
                report.removed.push(*id);
            }
        }
        for id in &report.removed {
            self.buffs.remove(id);
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn poison(stackable: bool) -> BuffDef {
        BuffDef {
            id: 7,
            name: "poison".into(),
            damage: 5,
            duration_ms: 200,
            gap_ms: 100,
            count: 3,
            stackable,
        }
    }

    #[test]
    fn total_is_count_times_period() {
        let buff = Buff::new(poison(false));
        assert_eq!(buff.total_ms(), 900);
    }

    #[test]
    fn non_stackable_reapply_resets_progress() {
        let mut set = BuffSet::new();
        set.add(poison(false));
        set.advance(400, 0);
        assert_eq!(set.get(7).unwrap().current(), 2);
        assert_eq!(set.add(poison(false)), BuffApplied::Reset);
        let buff = set.get(7).unwrap();
        assert_eq!(buff.elapsed_ms(), 0);
        assert_eq!(buff.current(), 0);
        assert_eq!(buff.count(), 3);
        assert_eq!(buff.total_ms(), 900);
    }

    #[test]
    fn stackable_reapply_adds_count_and_stretches_total() {
        let mut set = BuffSet::new();
        set.add(poison(true));
        set.advance(100, 0);
        assert_eq!(set.add(poison(true)), BuffApplied::Stacked);
        let buff = set.get(7).unwrap();
        assert_eq!(buff.count(), 6);
        assert_eq!(buff.total_ms(), 6 * 300);
        assert_eq!(buff.elapsed_ms(), 100);
    }

    #[test]
    fn fires_once_per_boundary_then_expires() {
        let mut set = BuffSet::new();
        set.add(poison(false));
        let mut applied = 0;
        let mut removed = false;
        for _ in 0..12 {
            let report = set.advance(100, 0);
            applied += report.effects.iter().map(|(_, d)| d).sum::<i32>();
            if report.removed.contains(&7) {
                removed = true;
                break;
            }
        }
        assert_eq!(applied, 15);
        assert!(removed);
        assert!(set.is_empty());
    }

    #[test]
    fn harmful_ticks_are_reduced_by_defense() {
        let mut set = BuffSet::new();
        set.add(poison(false));
        let report = set.advance(100, 2);
        assert_eq!(report.effects, vec![(7, 3)]);
        // A single step covering every tick still resolves each one.
        let report = set.advance(1_000, 10);
        assert_eq!(report.effects, vec![(7, 2)]);
    }

    #[test]
    fn healing_ticks_ignore_defense() {
        let mut set = BuffSet::new();
        let mut regen = poison(false);
        regen.damage = -4;
        set.add(regen);
        assert_eq!(set.advance(100, 50).effects, vec![(7, -4)]);
    }

    #[test]
    fn large_step_never_exceeds_count() {
        let mut buff = Buff::new(poison(false));
        let step = buff.advance(10_000);
        assert_eq!(step.fires, 3);
        assert!(step.expired);
    }
}
