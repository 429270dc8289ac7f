//! Damage resolution and vitals.

use serde::{Deserialize, Serialize};

use crate::actor::{Actor, ActorKind};

/// Life lost by a target with `defense` when hit for `raw`.
///
/// Positive values are damage and never drop below 1. Zero or negative values
/// are heals and pass through untouched.
///
/// ```
/// use emberfall_sim::combat::resolve_damage;
///
/// assert_eq!(resolve_damage(22, 30), 1);
/// assert_eq!(resolve_damage(50, 10), 40);
/// assert_eq!(resolve_damage(-20, 10), -20);
/// ```
pub fn resolve_damage(raw: i32, defense: i32) -> i32 {
    if raw > 0 {
        (raw - defense).max(1)
    } else {
        raw
    }
}

/// Can an actor of kind `attacker` legally aim at `target`?
///
/// Monsters attack players that are alive, connected and not destroyed.
/// Players attack live monsters. Nothing attacks spells.
pub fn can_target(attacker: ActorKind, target: &dyn Actor) -> bool {
    let core = target.core();
    if core.is_destroyed() || !core.is_alive() {
        return false;
    }
    match (attacker, core.kind()) {
        (ActorKind::Monster, ActorKind::Player) => !core.is_offline(),
        (ActorKind::Player, ActorKind::Monster) => true,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Vitals
// ---------------------------------------------------------------------------

/// Outcome of a life change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifeChange {
    pub before: i32,
    pub after: i32,
    /// Set only on the change that took life from positive to zero.
    pub died: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vitals {
    pub life: i32,
    pub max_life: i32,
    pub mana: i32,
    pub max_mana: i32,
}

impl Vitals {
    pub fn full(max_life: i32, max_mana: i32) -> Self {
        Self {
            life: max_life,
            max_life,
            mana: max_mana,
            max_mana,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.life > 0
    }

    /// Subtract `amount` from life, clamped to `[0, max_life]`.
    pub fn apply(&mut self, amount: i32) -> LifeChange {
        let before = self.life;
        self.life = (i64::from(before) - i64::from(amount)).clamp(0, i64::from(self.max_life)) as i32;
        LifeChange {
            before,
            after: self.life,
            died: before > 0 && self.life == 0,
        }
    }

    /// Pay `cost` mana. Fails without change when there is not enough.
    pub fn spend_mana(&mut self, cost: i32) -> bool {
        if cost > self.mana {
            return false;
        }
        self.mana -= cost.max(0);
        true
    }

    /// Current life as a fraction of max life.
    pub fn life_ratio(&self) -> f64 {
        if self.max_life <= 0 {
            0.0
        } else {
            f64::from(self.life) / f64::from(self.max_life)
        }
    }
}

// ---------------------------------------------------------------------------
// ActionState
// ---------------------------------------------------------------------------

/// What a movable actor is doing right now. Drives step timing and what
/// clients animate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    #[default]
    Idle,
    Walk,
    Run,
    Chase,
    Escape,
    Attack,
    Die,
}

impl ActionState {
    pub fn is_moving(self) -> bool {
        matches!(self, Self::Walk | Self::Run | Self::Chase | Self::Escape)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
