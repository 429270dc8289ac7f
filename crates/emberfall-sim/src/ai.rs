//! Monster decision making.
//!
//! Three states:
//!
//! - `Idle`: scan for players every `scan_ms`, occasionally wander or walk
//!   the next patrol leg, and head home if pushed outside the leash.
//! - `Attack`: chase the target to a stand position within attack range,
//!   then alternate melee hits (every attack duration plus recovery) with
//!   spells. A target that dies, logs off or leaves the leash, or a chase
//!   that strays too far from where it started, ends the fight.
//! - `Return`: run back to the spot the fight started from and go idle.
//!
//! [`MonsterAi::update`] runs once per decision period on the monster's own
//! loop. Scans are answered asynchronously by the zone.

use std::sync::Arc;
use std::time::Duration;

use emberfall_grid::geom::{Coord, GridPos, Rect};
use emberfall_grid::walk::WalkGrid;
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::actor::{live, ActorKind, ActorRef, WeakActor};
use crate::combat::{can_target, ActionState};
use crate::config::AiTuning;
use crate::monster::MonsterState;
use crate::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiState {
    Idle,
    Attack,
    Return,
}

#[derive(Debug)]
pub struct MonsterAi {
    state: AiState,
    target: Option<WeakActor>,
    /// Where the current fight started; `Return` walks back here.
    origin: GridPos,
    since_scan: u64,
    since_wander: u64,
    scanning: bool,
    next_melee: Option<Instant>,
}

impl MonsterAi {
    /// The first decision scans right away.
    pub fn new(origin: GridPos, tuning: &AiTuning) -> Self {
        Self {
            state: AiState::Idle,
            target: None,
            origin,
            since_scan: tuning.scan_ms,
            since_wander: 0,
            scanning: false,
            next_melee: None,
        }
    }

    pub fn state(&self) -> AiState {
        self.state
    }

    pub fn origin(&self) -> GridPos {
        self.origin
    }

    pub fn target(&self) -> Option<ActorRef> {
        self.target.as_ref().and_then(live)
    }

    /// One decision. `elapsed_ms` is the time since the previous one.
    pub fn update(&mut self, m: &mut MonsterState, elapsed_ms: u64) -> Result<(), SimError> {
        match self.state {
            AiState::Idle => self.idle(m, elapsed_ms),
            AiState::Attack => self.attack(m),
            AiState::Return => self.go_home(m),
        }
    }

    fn idle(&mut self, m: &mut MonsterState, elapsed_ms: u64) -> Result<(), SimError> {
        if !m.leash.contains(m.core.pos()) {
            self.origin = m.born;
            self.state = AiState::Return;
            return self.go_home(m);
        }

        let tuning = m.config().ai.clone();
        self.since_scan += elapsed_ms;
        if self.since_scan >= tuning.scan_ms && !self.scanning {
            self.since_scan = 0;
            self.scanning = true;
            request_scan(m);
        }

        if m.trace.is_none() {
            self.since_wander += elapsed_ms;
            if self.since_wander >= tuning.wander_ms {
                self.since_wander = 0;
                if m.rng.gen_range(0..100) < tuning.wander_chance {
                    wander(m, tuning.wander_attempts)?;
                }
            }
        }
        Ok(())
    }

    /// The zone answered a scan.
    pub fn scan_result(&mut self, m: &mut MonsterState, found: Vec<ActorRef>) {
        self.scanning = false;
        if self.state != AiState::Idle {
            return;
        }
        let alert = m.pack.ai.alert_range;
        if let Some(target) = nearest_enemy(m.core.pos(), alert, m.leash, &found) {
            self.engage(m, &target);
        }
    }

    /// Hit by `attacker`: fight back if configured and not already busy.
    pub fn retaliate(&mut self, m: &mut MonsterState, attacker: ActorRef) {
        if !m.pack.ai.auto_retaliate || self.state != AiState::Idle {
            return;
        }
        if can_target(ActorKind::Monster, attacker.as_ref()) {
            self.engage(m, &attacker);
        }
    }

    fn engage(&mut self, m: &mut MonsterState, target: &ActorRef) {
        debug!(monster = %m.token(), target = %target.token(), "target acquired");
        self.target = Some(Arc::downgrade(target));
        self.origin = m.core.pos();
        self.state = AiState::Attack;
    }

    fn disengage(&mut self, m: &mut MonsterState) -> Result<(), SimError> {
        self.target = None;
        self.next_melee = None;
        if !m.leash.contains(self.origin) {
            self.origin = m.born;
        }
        m.stop_moving();
        self.state = AiState::Return;
        self.go_home(m)
    }

    fn attack(&mut self, m: &mut MonsterState) -> Result<(), SimError> {
        let Some(target) = self.target() else {
            return self.disengage(m);
        };
        let pos = m.core.pos();
        if !can_target(ActorKind::Monster, target.as_ref()) || !m.leash.contains(target.pos()) || !m.leash.contains(pos)
        {
            return self.disengage(m);
        }
        let chase = m.pack.ai.chase_range;
        if m.action == ActionState::Chase && !Rect::around(self.origin, chase, chase).contains(pos) {
            return self.disengage(m);
        }

        if let Some(index) = m.pick_spell(&target) {
            m.cast_spell(index, &target);
            return Ok(());
        }

        let range = m.pack.template.attack_range.max(1);
        let target_pos = target.pos();
        if pos.chebyshev(target_pos) <= range {
            m.stop_moving();
            m.action = ActionState::Attack;
            if self.next_melee.map_or(true, |at| m.now >= at) {
                m.melee(&target);
                let pause = m.pack.template.attack_duration_ms + m.config().ai.attack_recovery_ms;
                self.next_melee = Some(m.now + Duration::from_millis(pause));
            }
            return Ok(());
        }

        // Already heading somewhere close enough.
        if let Some(trace) = &m.trace {
            if trace.target().chebyshev(target_pos) <= range {
                return Ok(());
            }
        }
        let attempts = m.config().ai.stand_search;
        let stand = stand_position(m.grid(), pos, target_pos, range, attempts)?;
        let steps = m.path_to(stand)?;
        m.start_trace(steps, ActionState::Chase);
        Ok(())
    }

    fn go_home(&mut self, m: &mut MonsterState) -> Result<(), SimError> {
        let pos = m.core.pos();
        if pos == self.origin {
            m.trace = None;
            m.action = ActionState::Idle;
            self.state = AiState::Idle;
            self.since_wander = 0;
            return Ok(());
        }
        if m.trace.as_ref().is_some_and(|t| t.target() == self.origin) {
            return Ok(());
        }
        match m.path_to(self.origin) {
            Ok(steps) => m.start_trace(steps, ActionState::Run),
            Err(e) => {
                warn!(monster = %m.token(), error = %e, origin = %self.origin, "no way home, teleporting");
                m.teleport(self.origin);
            }
        }
        Ok(())
    }
}

fn request_scan(m: &MonsterState) {
    let me = m.weak_self();
    m.zone.query_range(m.core.pos(), m.pack.ai.alert_range, move |found| {
        if let Some(me) = me.upgrade() {
            me.submit(move |m| m.on_scan(found));
        }
    });
}

/// Walk the next patrol leg, or to a random cell inside the leash.
fn wander(m: &mut MonsterState, attempts: u32) -> Result<(), SimError> {
    let pos = m.core.pos();
    if let Some(route) = m.route.and_then(|r| m.pack.routes.get(r)).cloned() {
        let Some(leg) = route.leg(m.leg) else {
            return Ok(());
        };
        let steps = if pos == leg.start() {
            m.leg += 1;
            leg.cells.clone()
        } else {
            m.path_to(leg.start())?
        };
        m.start_trace(steps, ActionState::Walk);
        return Ok(());
    }
    let grid = Arc::clone(m.grid());
    let dest = grid.random_walkable(m.leash, attempts, &mut m.rng)?;
    if dest == pos {
        return Ok(());
    }
    let steps = m.path_to(dest)?;
    m.start_trace(steps, ActionState::Walk);
    Ok(())
}

/// Closest legal player within `range` of `pos` that is inside `leash`.
/// Ties go to the lower token.
pub fn nearest_enemy(pos: GridPos, range: Coord, leash: Rect, candidates: &[ActorRef]) -> Option<ActorRef> {
    candidates
        .iter()
        .filter(|c| {
            can_target(ActorKind::Monster, c.as_ref()) && pos.chebyshev(c.pos()) <= range && leash.contains(c.pos())
        })
        .min_by_key(|c| (pos.chebyshev(c.pos()), c.token()))
        .cloned()
}

/// A walkable cell exactly `range` away (Chebyshev) from `target`, as
/// close to `from` as possible. At most `attempts` ring cells are tried,
/// nearest first.
pub fn stand_position(
    grid: &WalkGrid,
    from: GridPos,
    target: GridPos,
    range: Coord,
    attempts: usize,
) -> Result<GridPos, SimError> {
    let range = range.max(1);
    let mut ring = Vec::with_capacity((8 * range) as usize);
    for dy in -range..=range {
        for dx in -range..=range {
            if dx.abs().max(dy.abs()) == range {
                ring.push(GridPos::new(target.x + dx, target.y + dy));
            }
        }
    }
    ring.sort_by_key(|c| {
        let (dx, dy) = (i64::from(c.x - from.x), i64::from(c.y - from.y));
        (c.chebyshev(from), dx * dx + dy * dy, c.y, c.x)
    });
    ring.into_iter()
        .take(attempts)
        .find(|c| grid.is_walkable(*c))
        .ok_or(SimError::NoStandPosition { target, range })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stand_position_is_on_the_ring_nearest_the_attacker() {
        let grid = WalkGrid::open(20, 20);
        let stand = stand_position(&grid, GridPos::new(0, 10), GridPos::new(10, 10), 1, 20).unwrap();
        assert_eq!(stand, GridPos::new(9, 10));

        let stand = stand_position(&grid, GridPos::new(10, 0), GridPos::new(10, 10), 3, 20).unwrap();
        assert_eq!(stand, GridPos::new(10, 7));
    }

    #[test]
    fn stand_position_skips_blocked_cells() {
        let grid = WalkGrid::from_ascii(&[
            ".....", //
            ".###.", //
            ".#.#.", //
            ".###.", //
            ".....",
        ]);
        // Every ring cell at range 1 around the centre is a wall.
        let err = stand_position(&grid, GridPos::new(0, 0), GridPos::new(2, 2), 1, 20).unwrap_err();
        assert!(matches!(err, SimError::NoStandPosition { range: 1, .. }));
        let stand = stand_position(&grid, GridPos::new(0, 0), GridPos::new(2, 2), 2, 20).unwrap();
        assert_eq!(stand, GridPos::new(0, 0));
    }

    #[test]
    fn stand_search_is_bounded() {
        let grid = WalkGrid::from_ascii(&[
            "....", //
            ".##.", //
            ".#..", //
            "....",
        ]);
        // Only two blocked cells would be tried before giving up.
        let err = stand_position(&grid, GridPos::new(1, 1), GridPos::new(2, 2), 1, 2).unwrap_err();
        assert!(matches!(err, SimError::NoStandPosition { .. }));
    }

    #[test]
    fn first_decision_scans() {
        let ai = MonsterAi::new(GridPos::new(3, 3), &AiTuning::default());
        assert_eq!(ai.state(), AiState::Idle);
        assert!(ai.since_scan >= AiTuning::default().scan_ms);
    }
}
