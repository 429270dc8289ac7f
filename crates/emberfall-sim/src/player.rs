//! Player actors.
//!
//! A player is driven by its client session: click-to-move, stop, view
//! range changes, chat and spell casts arrive through the inherent methods on
//! [`PlayerHandle`]. Everything else (ticks, visibility and damage) arrives
//! through the [`Actor`](crate::actor::Actor) capabilities like any other
//! actor. Outbound messages go through the player's [`Outbox`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use emberfall_grid::geom::{Coord, GridPos, Vec3};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actor::{ActorCore, ActorHandle, ActorKind, ActorRef, ActorState, ActorToken};
use crate::boundary::{Persistence, Session};
use crate::buff::{BuffDef, BuffSet};
use crate::combat::{can_target, ActionState, Vitals};
use crate::config::SimConfig;
use crate::delivery::Outbox;
use crate::mailbox::Mailbox;
use crate::movement::MoveTrace;
use crate::outbound::{EntitySummary, Outbound};
use crate::records::PlayerRecord;
use crate::spell::{SpellCard, SpellState};
use crate::view::{ViewEvent, ViewState};
use crate::zone::ZoneLink;
use crate::SimError;

pub type PlayerHandle = ActorHandle<PlayerState>;

pub struct PlayerState {
    this: Weak<PlayerHandle>,
    core: Arc<ActorCore>,
    record: PlayerRecord,
    vitals: Vitals,
    action: ActionState,
    view: ViewState,
    buffs: BuffSet,
    trace: Option<MoveTrace>,
    spells: HashMap<i64, SpellCard>,
    cooldowns: HashMap<i64, Instant>,
    zone: Option<ZoneLink>,
    outbox: Option<Outbox>,
    persistence: Arc<dyn Persistence>,
}

impl PlayerState {
    /// Build a player actor from its saved record and start its loop. The
    /// player is not in any zone until a zone attaches it.
    pub fn spawn(
        record: PlayerRecord,
        session: Option<Arc<dyn Session>>,
        persistence: Arc<dyn Persistence>,
        config: &SimConfig,
    ) -> Result<Arc<PlayerHandle>, SimError> {
        let spells = record
            .spells
            .iter()
            .map(|id| SpellCard::load(persistence.as_ref(), *id).map(|card| (*id, card)))
            .collect::<Result<HashMap<_, _>, SimError>>()?;

        let core = Arc::new(ActorCore::new(record.id, ActorKind::Player, record.name.clone(), record.pos));
        let vitals = Vitals {
            life: record.life.clamp(0, record.max_life),
            max_life: record.max_life,
            mana: record.mana.clamp(0, record.max_mana),
            max_mana: record.max_mana,
        };
        core.publish_life(vitals.life, vitals.max_life);
        core.publish_defense(record.defense);

        let (mailbox, inbox) = Mailbox::channel(config.mailbox.player, "player");
        let handle = Arc::new(ActorHandle::new(Arc::clone(&core), mailbox));
        let outbox = session.map(|s| Outbox::spawn(s, config.delivery.clone(), config.mailbox.outbound));
        let mut view = ViewState::new(&config.view, true);
        view.update(record.pos.grid());
        core.publish_sticky(view.sticky());

        let state = PlayerState {
            this: Arc::downgrade(&handle),
            core,
            record,
            vitals,
            action: ActionState::Idle,
            view,
            buffs: BuffSet::new(),
            trace: None,
            spells,
            cooldowns: HashMap::new(),
            zone: None,
            outbox,
            persistence,
        };
        tokio::spawn(inbox.run(state));
        Ok(handle)
    }

    fn me(&self) -> Option<ActorRef> {
        self.this.upgrade().map(|h| h as ActorRef)
    }

    fn token(&self) -> ActorToken {
        self.core.token()
    }

    pub fn record(&self) -> &PlayerRecord {
        &self.record
    }

    pub fn action(&self) -> ActionState {
        self.action
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn buffs(&self) -> &BuffSet {
        &self.buffs
    }

    // -- zone membership ----------------------------------------------------

    /// Placed in a zone at `pos`.
    pub fn attach(&mut self, zone: ZoneLink, pos: Vec3) {
        self.core.set_zone(zone.id());
        self.core.publish_pos(pos.grid());
        self.core.publish_z(pos.z);
        self.record.zone_id = zone.id();
        self.record.pos = pos;
        self.trace = None;
        self.action = ActionState::Idle;
        self.view.update(pos.grid());
        self.core.publish_sticky(self.view.sticky());

        let shared = Arc::clone(zone.shared());
        self.zone = Some(zone);
        self.deliver(Outbound::EnterScene {
            zone_id: shared.id,
            zone_name: shared.record.name.clone(),
            me: EntitySummary::of(&self.core),
            doors: shared.doors.clone(),
        });
    }

    /// Taken out of the zone without being destroyed.
    pub fn detach_zone(&mut self) {
        self.view.teardown(self.token());
        self.trace = None;
        self.action = ActionState::Idle;
        self.zone = None;
        self.core.set_zone(0);
    }

    /// Point the saved record at another zone ahead of a transfer.
    /// The actor stops tracking its cell so the next save keeps `pos`.
    pub fn relocate(&mut self, zone_id: i64, pos: Option<Vec3>) {
        self.sync_record();
        self.zone = None;
        self.record.zone_id = zone_id;
        if let Some(pos) = pos {
            self.record.pos = pos;
        }
    }

    pub fn save(&mut self) {
        self.sync_record();
        if let Err(e) = self.persistence.update_actor_record(&self.record) {
            warn!(player = self.record.id, error = %e, "failed to save player");
        }
    }

    fn sync_record(&mut self) {
        self.record.life = self.vitals.life;
        self.record.mana = self.vitals.mana;
        if self.zone.is_some() {
            self.record.pos = self.record.pos.with_grid(self.core.pos());
        }
    }

    pub fn snapshot(&mut self) -> PlayerRecord {
        self.sync_record();
        self.record.clone()
    }

    // -- movement -----------------------------------------------------------

    fn set_cell(&mut self, pos: GridPos) {
        let old = self.core.pos();
        self.core.publish_pos(pos);
        if self.view.update(pos) {
            self.core.publish_sticky(self.view.sticky());
        }
        if let Some(zone) = &self.zone {
            zone.entity_moved(self.token(), pos, old);
        }
    }

    /// Start walking along `steps`. The player snaps to the first cell;
    /// a path that ends where the current one ends is ignored.
    pub fn move_by_path(&mut self, steps: Vec<GridPos>) {
        if !self.vitals.is_alive() || self.zone.is_none() {
            return;
        }
        let Some(&last) = steps.last() else {
            return;
        };
        if self.trace.as_ref().is_some_and(|t| t.target() == last) {
            return;
        }
        let Some(trace) = MoveTrace::new(steps.into(), self.record.step_ms) else {
            return;
        };
        if trace.start() != self.core.pos() {
            self.set_cell(trace.start());
        }
        self.action = ActionState::Walk;
        self.broadcast(
            Outbound::MoveTrace {
                entity_id: self.token(),
                action: self.action,
                step_ms: trace.step_ms(),
                cells: trace.remaining(),
            },
            false,
        );
        self.trace = Some(trace);
    }

    /// Path to `target` with the zone's solver pool, then walk it.
    pub fn walk_to(&mut self, target: GridPos) -> Result<usize, SimError> {
        let zone = self.zone.as_ref().ok_or(SimError::ZoneUnavailable { zone: self.record.zone_id })?;
        let path = zone.shared().pool.find_path(self.core.pos(), target)?;
        let len = path.steps.len();
        self.move_by_path(path.steps.to_vec());
        Ok(len)
    }

    /// Stop where the client says it is.
    pub fn move_stop(&mut self, pos: GridPos) {
        self.trace = None;
        if self.action.is_moving() {
            self.action = ActionState::Idle;
        }
        let walkable = self
            .zone
            .as_ref()
            .is_some_and(|z| z.shared().grid.is_walkable(pos));
        if walkable && pos != self.core.pos() {
            self.set_cell(pos);
        }
        self.broadcast(
            Outbound::MoveStopped {
                entity_id: self.token(),
                pos: self.core.pos(),
            },
            false,
        );
    }

    pub fn set_view_range(&mut self, half_w: Coord, half_h: Coord) {
        self.view.set_range(half_w, half_h);
        self.view.update(self.core.pos());
        self.core.publish_sticky(self.view.sticky());
        if let Some(zone) = &self.zone {
            zone.mark_dirty(self.token());
        }
    }

    pub fn say(&mut self, text: String) {
        self.broadcast(
            Outbound::TextMessage {
                entity_id: self.token(),
                name: self.record.name.clone(),
                text,
            },
            true,
        );
    }

    // -- combat -------------------------------------------------------------

    /// Cast `spell_id` at `target`, or at cell `at` for untargeted area
    /// spells.
    pub fn cast(&mut self, spell_id: i64, target: Option<ActorRef>, at: GridPos) -> Result<(), SimError> {
        let card = self
            .spells
            .get(&spell_id)
            .cloned()
            .ok_or(SimError::UnknownSpell { spell: spell_id })?;
        let zone = self
            .zone
            .clone()
            .ok_or(SimError::ZoneUnavailable { zone: self.record.zone_id })?;
        let me = self.me().ok_or_else(|| SimError::ActorDestroyed {
            actor: self.token().to_string(),
        })?;
        if !self.vitals.is_alive() {
            return Err(SimError::TargetInvalid);
        }

        let now = Instant::now();
        if let Some(ready) = self.cooldowns.get(&spell_id) {
            if now < *ready {
                return Err(SimError::SpellOnCooldown {
                    spell: spell_id,
                    remaining_ms: (*ready - now).as_millis() as u64,
                });
            }
        }

        let pos = self.core.pos();
        let target = if card.is_self_cast() {
            Some(me.clone())
        } else {
            match target {
                Some(t) if can_target(ActorKind::Player, t.as_ref()) && pos.chebyshev(t.pos()) <= card.def.range => {
                    Some(t)
                }
                Some(_) => return Err(SimError::TargetInvalid),
                None if card.def.area > 0 && pos.chebyshev(at) <= card.def.range => None,
                None => return Err(SimError::TargetInvalid),
            }
        };

        if !self.vitals.spend_mana(card.def.mana) {
            return Err(SimError::InsufficientMana {
                spell: spell_id,
                needed: card.def.mana,
                available: self.vitals.mana,
            });
        }
        self.cooldowns
            .insert(spell_id, now + std::time::Duration::from_millis(card.def.cooldown_ms));
        self.broadcast(
            Outbound::ManaChanged {
                entity_id: self.token(),
                mana: self.vitals.mana,
                max_mana: self.vitals.max_mana,
            },
            true,
        );
        let aim = target.as_ref().map_or(at, |t| t.pos());
        self.broadcast(
            Outbound::ReleaseSpell {
                caster: self.token(),
                spell_id,
                target: target.as_ref().map(|t| t.token()),
                pos: aim,
            },
            true,
        );
        SpellState::launch(&me, target, aim, card, zone);
        Ok(())
    }

    fn hurt(&mut self, amount: i32) {
        if !self.vitals.is_alive() {
            return;
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
            true,
        );
        if change.died {
            self.action = ActionState::Die;
            self.trace = None;
            self.buffs.clear();
            info!(player = self.record.id, "player died");
            self.broadcast(Outbound::EntityDie { entity_id: self.token() }, true);
        }
    }

    fn handle_view_events(&mut self, events: Vec<ViewEvent>) {
        let Some(me) = self.me() else {
            return;
        };
        for event in events {
            match event {
                ViewEvent::Entered(target) => {
                    self.deliver(Outbound::EnterView(EntitySummary::of(target.core())));
                    target.send_trace_to(me.clone());
                }
                ViewEvent::Exited { token, .. } => {
                    self.deliver(Outbound::ExitView { entity_id: token });
                }
            }
        }
    }
}

impl ActorState for PlayerState {
    fn advance(&mut self, _now: Instant, elapsed_ms: u64) {
        if !self.vitals.is_alive() {
            return;
        }

        let report = self.buffs.advance(elapsed_ms, self.core.defense());
        for (_, amount) in report.effects {
            self.hurt(amount);
        }
        for buff_id in report.removed {
            self.broadcast(
                Outbound::BuffRemove {
                    entity_id: self.token(),
                    buff_id,
                },
                true,
            );
        }

        if let Some(trace) = self.trace.as_mut() {
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
    }

    fn refresh_view(&mut self, candidates: Vec<ActorRef>) {
        let Some(me) = self.me() else {
            return;
        };
        let events = self.view.refresh(&me, &candidates);
        self.handle_view_events(events);
    }

    fn observe(&mut self, target: ActorRef) {
        let Some(me) = self.me() else {
            return;
        };
        if let Some(event) = self.view.observe(&me, &target) {
            self.handle_view_events(vec![event]);
        }
    }

    fn exit_view(&mut self, target: ActorToken) {
        if let Some(event) = self.view.exit_view(target) {
            self.handle_view_events(vec![event]);
        }
    }

    fn drop_observer(&mut self, observer: ActorToken) {
        self.view.drop_observer(observer);
    }

    fn entered_by(&mut self, observer: ActorRef) {
        self.view.entered_by(&observer);
    }

    fn apply_damage(&mut self, amount: i32, _source: Option<ActorRef>) {
        self.hurt(amount);
    }

    fn add_buff(&mut self, def: BuffDef) {
        if !self.vitals.is_alive() {
            return;
        }
        let (buff_id, name) = (def.id, def.name.clone());
        let applied = self.buffs.add(def);
        let count = self.buffs.get(buff_id).map_or(0, |b| b.count());
        debug!(player = self.record.id, buff = buff_id, ?applied, "buff applied");
        self.broadcast(
            Outbound::BuffAdd {
                entity_id: self.token(),
                buff_id,
                name,
                count,
            },
            true,
        );
    }

    fn deliver(&mut self, msg: Outbound) {
        if let Some(outbox) = &self.outbox {
            outbox.send(msg);
        }
    }

    fn broadcast(&mut self, msg: Outbound, include_self: bool) {
        for observer in self.view.observers() {
            observer.deliver(msg.clone());
        }
        if include_self {
            self.deliver(msg);
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
        self.save();
        self.trace = None;
        self.zone = None;
        self.outbox = None;
        debug!(player = self.record.id, "player actor stopped");
    }
}

// ---------------------------------------------------------------------------
// Handle API
// ---------------------------------------------------------------------------

impl ActorHandle<PlayerState> {
    pub fn move_by_path(&self, steps: Vec<GridPos>) {
        self.submit(move |p| p.move_by_path(steps));
    }

    /// Path to `target` and start walking. Returns the path length.
    pub async fn move_to(&self, target: GridPos) -> Result<usize, SimError> {
        self.ask(move |p| p.walk_to(target)).await?
    }

    pub fn move_stop(&self, pos: GridPos) {
        self.submit(move |p| p.move_stop(pos));
    }

    pub fn set_view_range(&self, half_w: Coord, half_h: Coord) {
        self.submit(move |p| p.set_view_range(half_w, half_h));
    }

    pub fn say(&self, text: impl Into<String>) {
        let text = text.into();
        self.submit(move |p| p.say(text));
    }

    pub async fn cast(&self, spell_id: i64, target: Option<ActorRef>, at: GridPos) -> Result<(), SimError> {
        self.ask(move |p| p.cast(spell_id, target, at)).await?
    }

    pub fn save(&self) {
        self.submit(PlayerState::save);
    }

    pub async fn snapshot(&self) -> Result<PlayerRecord, SimError> {
        self.ask(PlayerState::snapshot).await
    }

    pub async fn action(&self) -> Result<ActionState, SimError> {
        self.ask(|p| p.action()).await
    }

    /// Tokens currently in this player's view.
    pub async fn visible(&self) -> Result<usize, SimError> {
        self.ask(|p| p.view().sees_count()).await
    }

    pub async fn relocate(&self, zone_id: i64, pos: Option<Vec3>) -> Result<(), SimError> {
        self.ask(move |p| p.relocate(zone_id, pos)).await
    }

    /// The session went away. The zone removes the player on its next tick.
    pub fn go_offline(&self) {
        self.core().set_offline(true);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
