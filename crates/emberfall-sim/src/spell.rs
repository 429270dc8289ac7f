//! Spell projectiles.
//!
//! A cast spawns a short-lived actor that flies from the caster towards its
//! target (or a fixed cell) at `fly_step_ms` per cell. If the target moves,
//! the flight is re-planned from the projectile's current interpolated
//! position. On arrival the spell hits its target, or every legal target
//! around the impact cell for area spells, then destroys itself and leaves
//! the zone.

use std::sync::{Arc, Weak};

use emberfall_grid::geom::{GridPos, Vec3};
use tokio::time::Instant;
use tracing::debug;

use crate::actor::{live, Actor, ActorCore, ActorHandle, ActorKind, ActorRef, ActorState, ActorToken, WeakActor};
use crate::boundary::Persistence;
use crate::buff::BuffDef;
use crate::combat::{can_target, resolve_damage};
use crate::mailbox::Mailbox;
use crate::records::{SpellDef, SpellTarget};
use crate::zone::ZoneLink;
use crate::SimError;

pub type SpellHandle = ActorHandle<SpellState>;

/// A spell definition with its buff resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SpellCard {
    pub def: SpellDef,
    pub buff: Option<BuffDef>,
}

impl SpellCard {
    pub fn load(persistence: &dyn Persistence, id: i64) -> Result<Self, SimError> {
        let def = persistence.query_spell(id)?;
        let buff = def.buff.map(|b| persistence.query_buff_definition(b)).transpose()?;
        Ok(Self { def, buff })
    }

    pub fn is_self_cast(&self) -> bool {
        self.def.target == SpellTarget::SelfCast
    }
}

/// Flight time between two cells.
pub fn flight_ms(from: GridPos, to: GridPos, step_ms: u64) -> u64 {
    (from.distance(to) * step_ms as f64).round() as u64
}

pub struct SpellState {
    this: Weak<SpellHandle>,
    core: Arc<ActorCore>,
    card: SpellCard,
    caster: WeakActor,
    caster_token: ActorToken,
    caster_kind: ActorKind,
    target: Option<WeakActor>,
    /// Where the current leg of the flight started, and when.
    from: GridPos,
    from_elapsed: u64,
    aim: GridPos,
    elapsed: u64,
    total: u64,
    zone: ZoneLink,
    landed: bool,
}

impl SpellState {
    /// Spawn a projectile cast by `caster` and register it with the zone.
    /// Without a target it flies to `aim`.
    pub fn launch(
        caster: &ActorRef,
        target: Option<ActorRef>,
        aim: GridPos,
        card: SpellCard,
        zone: ZoneLink,
    ) -> Arc<SpellHandle> {
        let origin = caster.pos();
        let aim = target.as_ref().map_or(aim, |t| t.pos());
        let total = flight_ms(origin, aim, card.def.fly_step_ms);

        let core = Arc::new(ActorCore::new(
            card.def.id,
            ActorKind::Spell,
            card.def.name.clone(),
            Vec3::new(origin.x, origin.y, 0),
        ));
        core.set_zone(zone.id());
        let capacity = zone.config().mailbox.spell;
        let (mailbox, inbox) = Mailbox::channel(capacity, "spell");
        let handle = Arc::new(ActorHandle::new(Arc::clone(&core), mailbox));

        debug!(
            spell = card.def.id,
            caster = %caster.token(),
            from = %origin,
            to = %aim,
            flight_ms = total,
            "spell launched"
        );
        let state = SpellState {
            this: Arc::downgrade(&handle),
            core,
            card,
            caster: Arc::downgrade(caster),
            caster_token: caster.token(),
            caster_kind: caster.kind(),
            target: target.as_ref().map(Arc::downgrade),
            from: origin,
            from_elapsed: 0,
            aim,
            elapsed: 0,
            total,
            zone: zone.clone(),
            landed: false,
        };
        tokio::spawn(inbox.run(state));
        zone.add_spell(Arc::clone(&handle));
        handle
    }

    /// Interpolated position at the current elapsed time.
    fn position(&self) -> GridPos {
        if self.total <= self.from_elapsed || self.elapsed >= self.total {
            return self.aim;
        }
        let t = (self.elapsed - self.from_elapsed) as f64 / (self.total - self.from_elapsed) as f64;
        let lerp = |a: i32, b: i32| a + ((b - a) as f64 * t).round() as i32;
        GridPos::new(lerp(self.from.x, self.aim.x), lerp(self.from.y, self.aim.y))
    }

    /// Re-plan the flight if the target moved.
    fn follow_target(&mut self) {
        let Some(target) = self.target.as_ref().and_then(live) else {
            return;
        };
        let pos = target.pos();
        if pos == self.aim {
            return;
        }
        let here = self.position();
        self.from = here;
        self.from_elapsed = self.elapsed;
        self.aim = pos;
        self.total = self.elapsed + flight_ms(here, pos, self.card.def.fly_step_ms);
    }

    fn land(&mut self) {
        self.landed = true;
        self.core.publish_pos(self.aim);
        let caster = live(&self.caster);

        if self.card.def.area > 0 {
            let card = self.card.clone();
            let (token, kind) = (self.caster_token, self.caster_kind);
            self.zone.query_range(self.aim, self.card.def.area, move |found| {
                for victim in found {
                    if victim.token() != token && can_target(kind, victim.as_ref()) {
                        strike(&card, caster.clone(), &victim);
                    }
                }
            });
        } else if let Some(target) = self.target.as_ref().and_then(live) {
            if target.token() == self.caster_token {
                strike(&self.card, None, &target);
            } else if can_target(self.caster_kind, target.as_ref()) {
                strike(&self.card, caster, &target);
            }
        }

        debug!(spell = self.card.def.id, at = %self.aim, "spell landed");
        self.zone.remove_spell(self.core.token());
    }
}

/// Damage (or heal) `target`, then attach the spell's buff.
fn strike(card: &SpellCard, caster: Option<ActorRef>, target: &ActorRef) {
    let amount = resolve_damage(card.def.damage, target.defense());
    if amount != 0 {
        target.apply_damage(amount, caster);
    }
    if let Some(buff) = &card.buff {
        target.add_buff(buff.clone());
    }
}

impl ActorState for SpellState {
    fn advance(&mut self, _now: Instant, elapsed_ms: u64) {
        if self.landed {
            return;
        }
        self.elapsed += elapsed_ms;
        self.follow_target();
        if self.elapsed >= self.total {
            self.land();
            if let Some(handle) = self.this.upgrade() {
                handle.destroy();
            }
        } else {
            self.core.publish_pos(self.position());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_time_scales_with_distance() {
        assert_eq!(flight_ms(GridPos::new(0, 0), GridPos::new(10, 0), 50), 500);
        assert_eq!(flight_ms(GridPos::new(3, 3), GridPos::new(3, 3), 50), 0);
        assert_eq!(flight_ms(GridPos::new(0, 0), GridPos::new(3, 4), 10), 50);
    }
}
