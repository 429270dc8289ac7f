//! Monster actors.
//!
//! A monster is spawned by its zone from a [`MonsterPack`] (template, AI
//! config, spells, patrol routes and spawn config). Each tick it advances
//! buffs and movement. Every `decision_ms` it hands control to its
//! [`MonsterAi`]. When it dies it reports a [`RespawnSnapshot`] to the zone
//! and destroys itself.

use std::sync::{Arc, Weak};
use std::time::Duration;

use emberfall_grid::geom::{GridPos, Rect, Vec3};
use emberfall_grid::path::PathFinder;
use emberfall_grid::patrol::PatrolRoute;
use emberfall_grid::walk::WalkGrid;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use tokio::time::Instant;
use tracing::debug;

use crate::actor::{Actor, ActorCore, ActorHandle, ActorKind, ActorRef, ActorState, ActorToken};
use crate::ai::MonsterAi;
use crate::buff::{BuffDef, BuffSet};
use crate::combat::{resolve_damage, ActionState, Vitals};
use crate::config::SimConfig;
use crate::mailbox::Mailbox;
use crate::movement::MoveTrace;
use crate::outbound::Outbound;
use crate::records::{AiConfig, MonsterSpawnConfig, MonsterTemplate};
use crate::spell::{SpellCard, SpellState};
use crate::view::ViewState;
use crate::zone::ZoneLink;
use crate::SimError;

pub type MonsterHandle = ActorHandle<MonsterState>;

/// Everything needed to (re)spawn a monster of one spawn config.
#[derive(Debug, Clone)]
pub struct MonsterPack {
    pub template: MonsterTemplate,
    pub ai: AiConfig,
    pub spells: Vec<SpellCard>,
    pub routes: Vec<PatrolRoute>,
    pub spawn: MonsterSpawnConfig,
}

/// Queued by the zone when a monster dies.
#[derive(Debug, Clone)]
pub struct RespawnSnapshot {
    pub pack: Arc<MonsterPack>,
    pub due: Instant,
}

pub struct MonsterState {
    this: Weak<MonsterHandle>,
    pub(crate) core: Arc<ActorCore>,
    pub(crate) pack: Arc<MonsterPack>,
    pub(crate) leash: Rect,
    pub(crate) born: GridPos,
    pub(crate) vitals: Vitals,
    pub(crate) action: ActionState,
    view: ViewState,
    buffs: BuffSet,
    pub(crate) trace: Option<MoveTrace>,
    finder: PathFinder,
    /// When each of `pack.spells` is next usable.
    spell_ready: Vec<Option<Instant>>,
    /// Patrol route being followed and the next leg on it.
    pub(crate) route: Option<usize>,
    pub(crate) leg: usize,
    ai: Option<MonsterAi>,
    pub(crate) rng: Pcg32,
    pub(crate) zone: ZoneLink,
    pub(crate) now: Instant,
    since_decision: u64,
}

impl MonsterState {
    /// Start a monster at `pos`, following patrol route `route` if set.
    pub fn spawn(
        pack: Arc<MonsterPack>,
        pos: GridPos,
        route: Option<usize>,
        zone: ZoneLink,
        seed: u64,
    ) -> Arc<MonsterHandle> {
        let config = zone.config();
        let template = &pack.template;
        let core = Arc::new(ActorCore::new(
            template.id,
            ActorKind::Monster,
            template.name.clone(),
            Vec3::new(pos.x, pos.y, pack.spawn.born.z),
        ));
        let vitals = Vitals::full(template.life, template.mana);
        core.publish_life(vitals.life, vitals.max_life);
        core.publish_defense(template.defense);
        core.set_zone(zone.id());

        let mut view = ViewState::new(&config.view, false);
        view.update(pos);
        core.publish_sticky(view.sticky());

        let ai = MonsterAi::new(pos, &config.ai);
        let finder = PathFinder::new(Arc::clone(&zone.shared().grid));
        let (mailbox, inbox) = Mailbox::channel(config.mailbox.monster, "monster");
        let handle = Arc::new(ActorHandle::new(Arc::clone(&core), mailbox));
        let state = MonsterState {
            this: Arc::downgrade(&handle),
            leash: pack.spawn.leash(),
            born: pack.spawn.born.grid(),
            vitals,
            action: ActionState::Idle,
            view,
            buffs: BuffSet::new(),
            trace: None,
            finder,
            spell_ready: vec![None; pack.spells.len()],
            route,
            leg: 0,
            ai: Some(ai),
            rng: Pcg32::seed_from_u64(seed),
            now: Instant::now(),
            since_decision: 0,
            core,
            pack,
            zone,
        };
        tokio::spawn(inbox.run(state));
        handle
    }

    pub(crate) fn me(&self) -> Option<ActorRef> {
        self.this.upgrade().map(|h| h as ActorRef)
    }

    pub(crate) fn weak_self(&self) -> Weak<MonsterHandle> {
        Weak::clone(&self.this)
    }

    pub(crate) fn token(&self) -> ActorToken {
        self.core.token()
    }

    pub(crate) fn config(&self) -> &SimConfig {
        self.zone.config()
    }

    pub(crate) fn grid(&self) -> &Arc<WalkGrid> {
        self.finder.grid()
    }

    pub fn ai(&self) -> Option<&MonsterAi> {
        self.ai.as_ref()
    }

    /// Run `f` against the AI with the state borrowed mutably alongside it.
    fn with_ai<R>(&mut self, f: impl FnOnce(&mut MonsterAi, &mut MonsterState) -> R) -> Option<R> {
        let mut ai = self.ai.take()?;
        let out = f(&mut ai, self);
        self.ai = Some(ai);
        Some(out)
    }

    // -- movement -----------------------------------------------------------

    pub(crate) fn set_cell(&mut self, pos: GridPos) {
        let old = self.core.pos();
        self.core.publish_pos(pos);
        if self.view.update(pos) {
            self.core.publish_sticky(self.view.sticky());
        }
        self.zone.entity_moved(self.token(), pos, old);
    }

    pub(crate) fn path_to(&mut self, target: GridPos) -> Result<Arc<[GridPos]>, SimError> {
        let from = self.core.pos();
        Ok(self.finder.find_path(from, target)?.steps)
    }

    fn step_ms(&self, action: ActionState) -> u64 {
        match action {
            ActionState::Walk => self.pack.template.walk_step_ms,
            _ => self.pack.template.run_step_ms,
        }
    }

    /// Follow `steps` with movement style `action`.
    pub(crate) fn start_trace(&mut self, steps: Arc<[GridPos]>, action: ActionState) {
        let Some(trace) = MoveTrace::new(steps, self.step_ms(action)) else {
            return;
        };
        if trace.start() != self.core.pos() {
            self.set_cell(trace.start());
        }
        self.action = action;
        self.broadcast(
            Outbound::MoveTrace {
                entity_id: self.token(),
                action,
                step_ms: trace.step_ms(),
                cells: trace.remaining(),
            },
            false,
        );
        self.trace = Some(trace);
    }

    pub(crate) fn stop_moving(&mut self) {
        if self.trace.take().is_some() {
            self.broadcast(
                Outbound::MoveStopped {
                    entity_id: self.token(),
                    pos: self.core.pos(),
                },
                false,
            );
        }
    }

    /// Jump straight to `pos` (used when no path home exists).
    pub(crate) fn teleport(&mut self, pos: GridPos) {
        self.trace = None;
        self.set_cell(pos);
        self.broadcast(
            Outbound::MoveStopped {
                entity_id: self.token(),
                pos,
            },
            false,
        );
    }

    fn step(&mut self, elapsed_ms: u64) {
        let Some(trace) = self.trace.as_mut() else {
            return;
        };
        let step = trace.advance(elapsed_ms);
        let done = trace.is_done();
        if let Some(pos) = step {
            self.set_cell(pos);
        }
        if done {
            self.trace = None;
            if self.action.is_moving() {
                self.action = ActionState::Idle;
            }
        }
    }

    // -- combat -------------------------------------------------------------

    /// One melee hit on `target`.
    pub(crate) fn melee(&mut self, target: &ActorRef) {
        let damage = resolve_damage(self.pack.template.attack, target.defense());
        target.apply_damage(damage, self.me());
        let msg = Outbound::Attack {
            attacker: self.token(),
            target: target.token(),
            damage,
        };
        if !self.view.seen_by(target.token()) {
            target.deliver(msg.clone());
        }
        self.broadcast(msg, false);
    }

    /// Index of a spell worth casting now: a self spell when life is low,
    /// otherwise the first ready enemy spell in range of `target`.
    pub(crate) fn pick_spell(&self, target: &ActorRef) -> Option<usize> {
        let ready = |i: usize| {
            self.spell_ready[i].map_or(true, |at| self.now >= at) && self.vitals.mana >= self.pack.spells[i].def.mana
        };
        let low = self.vitals.life_ratio() < self.config().ai.self_cast_below;
        if low {
            if let Some(i) = (0..self.pack.spells.len()).find(|&i| self.pack.spells[i].is_self_cast() && ready(i)) {
                return Some(i);
            }
        }
        let dist = self.core.pos().chebyshev(target.pos());
        (0..self.pack.spells.len())
            .find(|&i| !self.pack.spells[i].is_self_cast() && ready(i) && dist <= self.pack.spells[i].def.range)
    }

    pub(crate) fn cast_spell(&mut self, index: usize, target: &ActorRef) {
        let card = self.pack.spells[index].clone();
        let Some(me) = self.me() else {
            return;
        };
        if !self.vitals.spend_mana(card.def.mana) {
            return;
        }
        self.spell_ready[index] = Some(self.now + Duration::from_millis(card.def.cooldown_ms));
        let target = if card.is_self_cast() { me.clone() } else { target.clone() };
        let aim = target.pos();
        self.broadcast(
            Outbound::ReleaseSpell {
                caster: self.token(),
                spell_id: card.def.id,
                target: Some(target.token()),
                pos: aim,
            },
            false,
        );
        SpellState::launch(&me, Some(target), aim, card, self.zone.clone());
    }

    fn hurt(&mut self, amount: i32) -> bool {
        if !self.vitals.is_alive() {
            return false;
        }
        let change = self.vitals.apply(amount);
        self.core.publish_life(self.vitals.life, self.vitals.max_life);
        self.broadcast(
            Outbound::LifeChanged {
                entity_id: self.token(),
                damage: amount,
                life: change.after,
                max_life: self.vitals.max_life,
            },
            false,
        );
        if change.died {
            self.die();
        }
        change.died
    }

    fn die(&mut self) {
        self.action = ActionState::Die;
        self.trace = None;
        self.buffs.clear();
        self.broadcast(Outbound::EntityDie { entity_id: self.token() }, false);
        let due = Instant::now() + Duration::from_secs(self.pack.spawn.respawn_secs);
        debug!(monster = %self.token(), id = self.pack.template.id, "monster died");
        self.zone.monster_died(
            self.token(),
            RespawnSnapshot {
                pack: Arc::clone(&self.pack),
                due,
            },
        );
        if let Some(handle) = self.this.upgrade() {
            handle.destroy();
        }
    }

    /// Reply to an AI range scan.
    pub(crate) fn on_scan(&mut self, found: Vec<ActorRef>) {
        if !self.vitals.is_alive() {
            return;
        }
        self.with_ai(|ai, m| ai.scan_result(m, found));
    }
}

impl ActorState for MonsterState {
    fn advance(&mut self, now: Instant, elapsed_ms: u64) {
        self.now = now;
        if !self.vitals.is_alive() {
            return;
        }

        let report = self.buffs.advance(elapsed_ms, self.core.defense());
        for (_, amount) in report.effects {
            if self.hurt(amount) {
                return;
            }
        }
        for buff_id in report.removed {
            self.broadcast(
                Outbound::BuffRemove {
                    entity_id: self.token(),
                    buff_id,
                },
                false,
            );
        }

        self.step(elapsed_ms);

        self.since_decision += elapsed_ms;
        let decision = self.config().ai.decision_ms;
        if self.since_decision >= decision {
            let elapsed = std::mem::take(&mut self.since_decision);
            let token = self.token();
            if let Some(Err(e)) = self.with_ai(|ai, m| ai.update(m, elapsed)) {
                debug!(monster = %token, error = %e, "ai decision failed");
            }
        }
    }

    fn refresh_view(&mut self, candidates: Vec<ActorRef>) {
        if let Some(me) = self.me() {
            self.view.refresh(&me, &candidates);
        }
    }

    fn drop_observer(&mut self, observer: ActorToken) {
        self.view.drop_observer(observer);
    }

    fn entered_by(&mut self, observer: ActorRef) {
        self.view.entered_by(&observer);
    }

    fn apply_damage(&mut self, amount: i32, source: Option<ActorRef>) {
        if self.hurt(amount) {
            return;
        }
        if let Some(source) = source {
            self.with_ai(|ai, m| ai.retaliate(m, source));
        }
    }

    fn add_buff(&mut self, def: BuffDef) {
        if !self.vitals.is_alive() {
            return;
        }
        let (buff_id, name) = (def.id, def.name.clone());
        self.buffs.add(def);
        let count = self.buffs.get(buff_id).map_or(0, |b| b.count());
        self.broadcast(
            Outbound::BuffAdd {
                entity_id: self.token(),
                buff_id,
                name,
                count,
            },
            false,
        );
    }

    fn broadcast(&mut self, msg: Outbound, _include_self: bool) {
        for observer in self.view.observers() {
            observer.deliver(msg.clone());
        }
    }

    fn send_trace_to(&mut self, viewer: ActorRef) {
        if let Some(trace) = &self.trace {
            viewer.deliver(Outbound::MoveTrace {
                entity_id: self.token(),
                action: self.action,
                step_ms: trace.step_ms(),
                cells: trace.remaining(),
            });
        }
    }

    fn teardown(&mut self) {
        self.view.teardown(self.token());
        self.trace = None;
    }
}

impl ActorHandle<MonsterState> {
    /// Current AI state, for inspection.
    pub async fn ai_state(&self) -> Result<Option<crate::ai::AiState>, SimError> {
        self.ask(|m| m.ai().map(MonsterAi::state)).await
    }

    pub async fn action(&self) -> Result<ActionState, SimError> {
        self.ask(|m| m.action).await
    }
}
