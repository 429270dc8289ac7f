//! One simulated zone: registry, interest index and tick loop.
//!
//! A [`Zone`] is itself an actor. Its state (actor registries, the
//! [`SpatialIndex`], the dirty set and the respawn queue) is only touched by
//! tasks running on the zone's own loop. That loop reacts to three sources:
//!
//! 1. the tick interval (default 100 ms), which hands every player, monster
//!    and spell an `advance(now, elapsed)` task and, every 500 ms of
//!    accumulated time, runs one visibility pass over the dirty set followed
//!    by a respawn scan;
//! 2. the save interval (default 5 s), which asks every player to persist;
//! 3. its mailbox, through which actors report moves, deaths and queries.
//!
//! Destroying the mailbox is the stop signal: queued tasks drain, every actor
//! is destroyed and the loop exits.
//!
//! Actors reach the zone through a [`ZoneLink`], which holds only a weak
//! mailbox reference. The zone owns its actors; actors never own the zone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use emberfall_grid::aoi::SpatialIndex;
use emberfall_grid::geom::{Coord, GridPos, Vec3};
use emberfall_grid::patrol::parse_routes;
use emberfall_grid::pool::SolverPool;
use emberfall_grid::walk::WalkGrid;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::Serialize;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::actor::{Actor, ActorRef, ActorToken};
use crate::boundary::{Persistence, ResourceLoader};
use crate::config::SimConfig;
use crate::mailbox::{execute, Mailbox, WeakMailbox};
use crate::monster::{MonsterHandle, MonsterPack, MonsterState, RespawnSnapshot};
use crate::player::{PlayerHandle, PlayerState};
use crate::records::{DoorRecord, MonsterSpawnConfig, ZoneRecord};
use crate::spell::{SpellCard, SpellHandle};
use crate::SimError;

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Collaborators every zone in a process shares.
#[derive(Clone)]
pub struct ZoneDeps {
    pub persistence: Arc<dyn Persistence>,
    pub resources: Arc<dyn ResourceLoader>,
    pub config: Arc<SimConfig>,
}

impl ZoneDeps {
    pub fn new(persistence: Arc<dyn Persistence>, resources: Arc<dyn ResourceLoader>, config: SimConfig) -> Self {
        Self {
            persistence,
            resources,
            config: Arc::new(config),
        }
    }
}

/// Immutable zone data, readable from any actor.
pub struct ZoneShared {
    pub id: i64,
    pub record: ZoneRecord,
    pub doors: Vec<DoorRecord>,
    pub grid: Arc<WalkGrid>,
    /// Solvers for ad-hoc searches (player click-to-move).
    pub pool: SolverPool,
    pub config: Arc<SimConfig>,
    pub persistence: Arc<dyn Persistence>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneStats {
    pub id: i64,
    pub name: String,
    pub players: usize,
    pub monsters: usize,
    pub spells: usize,
    pub respawn_pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterInfo {
    pub token: ActorToken,
    pub id: i64,
    pub name: String,
    pub pos: GridPos,
    pub life: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnEntry {
    pub monster_id: i64,
    pub spawn_id: i64,
    pub due: Instant,
}

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

/// Zone state, owned by the zone loop.
pub struct Zone {
    shared: Arc<ZoneShared>,
    link: ZoneLink,
    packs: Vec<Arc<MonsterPack>>,
    players: BTreeMap<i64, Arc<PlayerHandle>>,
    monsters: BTreeMap<ActorToken, Arc<MonsterHandle>>,
    spells: BTreeMap<ActorToken, Arc<SpellHandle>>,
    aoi: SpatialIndex<ActorToken, ActorRef>,
    dirty: BTreeSet<ActorToken>,
    respawn: Vec<RespawnSnapshot>,
    rng: Pcg32,
    last_tick: Instant,
    since_visibility: u64,
}

impl Zone {
    /// Load zone `zone_id` and start its loop. Any missing record or
    /// resource aborts start-up.
    pub fn start(zone_id: i64, deps: &ZoneDeps) -> Result<ZoneHandle, SimError> {
        let persistence = deps.persistence.as_ref();
        let record = persistence.query_zone_config(zone_id)?;
        let doors = persistence.query_zone_doors(zone_id)?;
        let spawns = persistence.query_zone_monster_config(zone_id)?;
        let grid = Arc::new(WalkGrid::from_bytes(&deps.resources.map_bytes(&record.map_file)?)?);

        let packs = spawns
            .into_iter()
            .map(|spawn| load_pack(deps, &record.map_file, spawn).map(Arc::new))
            .collect::<Result<Vec<_>, SimError>>()?;

        let config = Arc::clone(&deps.config);
        let shared = Arc::new(ZoneShared {
            id: zone_id,
            record,
            doors,
            pool: SolverPool::new(Arc::clone(&grid)),
            grid,
            config: Arc::clone(&config),
            persistence: Arc::clone(&deps.persistence),
        });

        let (mailbox, inbox) = Mailbox::channel(config.mailbox.zone, "zone");
        let link = ZoneLink {
            id: zone_id,
            mailbox: mailbox.downgrade(),
            shared: Arc::clone(&shared),
        };
        let width = Coord::from(shared.grid.cols());
        let height = Coord::from(shared.grid.rows());
        let mut zone = Zone {
            shared: Arc::clone(&shared),
            link,
            packs,
            players: BTreeMap::new(),
            monsters: BTreeMap::new(),
            spells: BTreeMap::new(),
            aoi: SpatialIndex::new(width, height, config.aoi_cell_size),
            dirty: BTreeSet::new(),
            respawn: Vec::new(),
            rng: Pcg32::seed_from_u64(config.zone_seed(zone_id)),
            last_tick: Instant::now(),
            since_visibility: 0,
        };
        let spawned = zone.populate();
        info!(
            zone = zone_id,
            name = %shared.record.name,
            cols = shared.grid.cols(),
            rows = shared.grid.rows(),
            monsters = spawned,
            "zone started"
        );

        tokio::spawn(zone.run(inbox));
        Ok(ZoneHandle {
            id: zone_id,
            mailbox,
            shared,
        })
    }

    async fn run(mut self, mut inbox: crate::mailbox::Inbox<Zone>) {
        let timing = self.shared.config.timing.clone();
        let mut tick = interval(timing.tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut save = interval_at(Instant::now() + timing.save(), timing.save());
        save.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.last_tick = Instant::now();

        loop {
            tokio::select! {
                biased;
                now = tick.tick() => self.tick(now),
                _ = save.tick() => self.save_players(),
                task = inbox.recv() => match task {
                    Some(task) => execute(inbox.label(), task, &mut self),
                    None => break,
                },
            }
        }
        self.shutdown();
        info!(zone = self.shared.id, "zone stopped");
    }

    pub fn id(&self) -> i64 {
        self.shared.id
    }

    pub fn shared(&self) -> &Arc<ZoneShared> {
        &self.shared
    }

    // -- tick ---------------------------------------------------------------

    fn tick(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick).as_millis() as u64;
        self.last_tick = now;

        let gone: Vec<i64> = self
            .players
            .iter()
            .filter(|(_, p)| p.core().is_offline() || p.core().is_destroyed())
            .map(|(id, _)| *id)
            .collect();
        for id in gone {
            debug!(zone = self.shared.id, player = id, "removing offline player");
            self.remove_player(id, true);
        }

        for player in self.players.values() {
            player.advance(now, elapsed);
        }
        for monster in self.monsters.values() {
            monster.advance(now, elapsed);
        }
        for spell in self.spells.values() {
            spell.advance(now, elapsed);
        }

        self.since_visibility += elapsed;
        if self.since_visibility >= self.shared.config.timing.visibility_ms {
            self.since_visibility = 0;
            self.refresh_visibility();
            self.respawn_due(now);
        }
    }

    /// One visibility pass over every actor that moved since the last one.
    fn refresh_visibility(&mut self) {
        for token in std::mem::take(&mut self.dirty) {
            let Some(actor) = self.aoi.get(&token).cloned() else {
                continue;
            };
            let candidates = self.aoi.search(actor.pos());
            actor.refresh_view(candidates);
        }
    }

    fn respawn_due(&mut self, now: Instant) {
        if self.respawn.is_empty() {
            return;
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.respawn)
            .into_iter()
            .partition(|snapshot| snapshot.due <= now);
        self.respawn = waiting;
        for snapshot in due {
            self.spawn_monster(snapshot.pack);
        }
    }

    fn save_players(&self) {
        for player in self.players.values() {
            player.save();
        }
    }

    // -- players ------------------------------------------------------------

    /// Register `player`, placing it at `at`, the zone's enter point or its
    /// saved position (first one set).
    pub fn add_player(&mut self, player: Arc<PlayerHandle>, at: Option<Vec3>) {
        let core = Arc::clone(player.core());
        let pos = at.or(self.shared.record.enter).unwrap_or_else(|| core.pos3());
        let token = core.token();
        if let Some(previous) = self.players.insert(core.id(), Arc::clone(&player)) {
            if previous.core().token() != token {
                warn!(zone = self.shared.id, player = core.id(), "replacing stale player actor");
                self.aoi.delete(previous.core().pos(), &previous.core().token());
                previous.destroy();
            }
        }
        let actor: ActorRef = player.clone();
        self.aoi.add(pos.grid(), token, actor);
        self.dirty.insert(token);
        let link = self.link.clone();
        player.submit(move |p: &mut PlayerState| p.attach(link, pos));
        info!(zone = self.shared.id, player = core.id(), pos = %pos.grid(), "player entered");
    }

    /// Unregister player `id`. With `destroy` the actor is shut down (which
    /// saves it); otherwise it is only detached so another zone can take it.
    pub fn remove_player(&mut self, id: i64, destroy: bool) -> Option<Arc<PlayerHandle>> {
        let player = self.players.remove(&id)?;
        let token = player.core().token();
        self.aoi.delete(player.core().pos(), &token);
        self.dirty.remove(&token);
        if destroy {
            player.destroy();
        } else {
            player.submit(|p: &mut PlayerState| p.detach_zone());
        }
        info!(zone = self.shared.id, player = id, "player left");
        Some(player)
    }

    // -- monsters -----------------------------------------------------------

    fn populate(&mut self) -> usize {
        let packs = self.packs.clone();
        let mut spawned = 0;
        for pack in packs {
            for _ in 0..pack.spawn.total {
                self.spawn_monster(Arc::clone(&pack));
                spawned += 1;
            }
        }
        spawned
    }

    fn spawn_monster(&mut self, pack: Arc<MonsterPack>) {
        let born = pack.spawn.born.grid();
        let (pos, route) = if pack.routes.is_empty() {
            let attempts = self.shared.config.ai.spawn_attempts;
            let pos = self
                .shared
                .grid
                .random_walkable(pack.spawn.leash(), attempts, &mut self.rng)
                .unwrap_or(born);
            (pos, None)
        } else {
            let index = self.rng.gen_range(0..pack.routes.len());
            let pos = pack.routes[index].spawn_point().unwrap_or(born);
            (pos, Some(index))
        };
        let seed = self.rng.gen();
        let monster = MonsterState::spawn(pack, pos, route, self.link.clone(), seed);
        let token = monster.core().token();
        let actor: ActorRef = monster.clone();
        self.aoi.add(pos, token, actor);
        self.monsters.insert(token, monster);
        self.dirty.insert(token);
    }

    /// A monster reported its death. It leaves the registry and the index,
    /// and its snapshot waits for the respawn scan.
    pub fn monster_died(&mut self, token: ActorToken, snapshot: RespawnSnapshot) {
        let Some(monster) = self.monsters.remove(&token) else {
            return;
        };
        self.aoi.delete(monster.core().pos(), &token);
        self.dirty.remove(&token);
        debug!(
            zone = self.shared.id,
            monster = %token,
            spawn = snapshot.pack.spawn.id,
            "monster queued for respawn"
        );
        self.respawn.push(snapshot);
    }

    /// Replace every monster with `per_spawn` fresh ones per spawn config
    /// (capped). Pending respawns are discarded.
    pub fn reset_monsters(&mut self, per_spawn: u32) -> usize {
        let per_spawn = per_spawn.min(self.shared.config.ai.reset_cap);
        for (token, monster) in std::mem::take(&mut self.monsters) {
            self.aoi.delete(monster.core().pos(), &token);
            self.dirty.remove(&token);
            monster.destroy();
        }
        self.respawn.clear();
        let packs = self.packs.clone();
        for pack in &packs {
            for _ in 0..per_spawn {
                self.spawn_monster(Arc::clone(pack));
            }
        }
        info!(zone = self.shared.id, per_spawn, total = self.monsters.len(), "monsters reset");
        self.monsters.len()
    }

    // -- spells -------------------------------------------------------------

    pub fn add_spell(&mut self, spell: Arc<SpellHandle>) {
        self.spells.insert(spell.core().token(), spell);
    }

    pub fn remove_spell(&mut self, token: ActorToken) {
        self.spells.remove(&token);
    }

    // -- index --------------------------------------------------------------

    /// Record a move. A no-op when the position did not change.
    pub fn entity_moved(&mut self, token: ActorToken, new: GridPos, old: GridPos) {
        if new == old {
            return;
        }
        if let Some(actor) = self.aoi.get(&token).cloned() {
            self.aoi.moved(new, old, token, actor);
            self.dirty.insert(token);
        }
    }

    pub fn mark_dirty(&mut self, token: ActorToken) {
        if self.aoi.contains(&token) {
            self.dirty.insert(token);
        }
    }

    /// Live actors within Chebyshev distance `range` of `center`.
    pub fn query_range(&self, center: GridPos, range: Coord) -> Vec<ActorRef> {
        self.aoi
            .search(center)
            .into_iter()
            .filter(|actor| !actor.is_destroyed() && actor.pos().chebyshev(center) <= range)
            .collect()
    }

    pub fn actor(&self, token: ActorToken) -> Option<ActorRef> {
        self.aoi.get(&token).cloned()
    }

    // -- reports ------------------------------------------------------------

    pub fn stats(&self) -> ZoneStats {
        ZoneStats {
            id: self.shared.id,
            name: self.shared.record.name.clone(),
            players: self.players.len(),
            monsters: self.monsters.len(),
            spells: self.spells.len(),
            respawn_pending: self.respawn.len(),
        }
    }

    fn monster_infos(&self) -> Vec<MonsterInfo> {
        self.monsters
            .values()
            .map(|m| {
                let core = m.core();
                MonsterInfo {
                    token: core.token(),
                    id: core.id(),
                    name: core.name().to_owned(),
                    pos: core.pos(),
                    life: core.life(),
                }
            })
            .collect()
    }

    fn respawn_entries(&self) -> Vec<RespawnEntry> {
        self.respawn
            .iter()
            .map(|s| RespawnEntry {
                monster_id: s.pack.template.id,
                spawn_id: s.pack.spawn.id,
                due: s.due,
            })
            .collect()
    }

    fn shutdown(&mut self) {
        let ids: Vec<i64> = self.players.keys().copied().collect();
        for id in ids {
            self.remove_player(id, true);
        }
        for monster in std::mem::take(&mut self.monsters).into_values() {
            monster.destroy();
        }
        for spell in std::mem::take(&mut self.spells).into_values() {
            spell.destroy();
        }
        self.respawn.clear();
        self.dirty.clear();
    }
}

/// Resolve everything a spawn config refers to.
fn load_pack(deps: &ZoneDeps, map: &str, spawn: MonsterSpawnConfig) -> Result<MonsterPack, SimError> {
    let persistence = deps.persistence.as_ref();
    let template = persistence.query_actor_template(spawn.monster_id)?;
    let ai = persistence.query_ai_config(template.ai_id)?;
    let spells = ai
        .spells
        .iter()
        .map(|id| SpellCard::load(persistence, *id))
        .collect::<Result<Vec<_>, SimError>>()?;
    let routes = match deps.resources.patrol_bytes(&spawn.patrol_resource(map))? {
        Some(bytes) => parse_routes(&bytes)?,
        None => Vec::new(),
    };
    debug!(
        spawn = spawn.id,
        monster = template.id,
        spells = spells.len(),
        routes = routes.len(),
        "spawn config loaded"
    );
    Ok(MonsterPack {
        template,
        ai,
        spells,
        routes,
        spawn,
    })
}

// ---------------------------------------------------------------------------
// ZoneLink
// ---------------------------------------------------------------------------

/// An actor's non-owning reference to its zone.
#[derive(Clone)]
pub struct ZoneLink {
    id: i64,
    mailbox: WeakMailbox<Zone>,
    shared: Arc<ZoneShared>,
}

impl ZoneLink {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn shared(&self) -> &Arc<ZoneShared> {
        &self.shared
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Run `task` on the zone loop. Returns `false` once the zone has stopped.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut Zone) + Send + 'static,
    {
        self.mailbox.submit(task)
    }

    pub fn entity_moved(&self, token: ActorToken, new: GridPos, old: GridPos) {
        self.submit(move |z| z.entity_moved(token, new, old));
    }

    pub fn mark_dirty(&self, token: ActorToken) {
        self.submit(move |z| z.mark_dirty(token));
    }

    /// Range query answered from the zone loop. `reply` runs there, so it
    /// should only submit work elsewhere.
    pub fn query_range<F>(&self, center: GridPos, range: Coord, reply: F)
    where
        F: FnOnce(Vec<ActorRef>) + Send + 'static,
    {
        self.submit(move |z| reply(z.query_range(center, range)));
    }

    pub fn monster_died(&self, token: ActorToken, snapshot: RespawnSnapshot) {
        self.submit(move |z| z.monster_died(token, snapshot));
    }

    pub fn add_spell(&self, spell: Arc<SpellHandle>) {
        self.submit(move |z| z.add_spell(spell));
    }

    pub fn remove_spell(&self, token: ActorToken) {
        self.submit(move |z| z.remove_spell(token));
    }
}

// ---------------------------------------------------------------------------
// ZoneHandle
// ---------------------------------------------------------------------------

/// Owning handle to a running zone.
#[derive(Clone)]
pub struct ZoneHandle {
    id: i64,
    mailbox: Mailbox<Zone>,
    shared: Arc<ZoneShared>,
}

impl ZoneHandle {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn shared(&self) -> &Arc<ZoneShared> {
        &self.shared
    }

    pub fn is_stopped(&self) -> bool {
        self.mailbox.is_destroyed()
    }

    async fn ask<R, F>(&self, f: F) -> Result<R, SimError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Zone) -> R + Send + 'static,
    {
        if self.mailbox.is_destroyed() {
            return Err(SimError::ZoneUnavailable { zone: self.id });
        }
        self.mailbox
            .ask(f)
            .await
            .map_err(|_| SimError::ZoneUnavailable { zone: self.id })
    }

    /// Add a player, at `at` when given.
    pub async fn enter(&self, player: Arc<PlayerHandle>, at: Option<Vec3>) -> Result<(), SimError> {
        self.ask(move |z| z.add_player(player, at)).await
    }

    /// Remove a player. See [`Zone::remove_player`].
    pub async fn leave(&self, player_id: i64, destroy: bool) -> Result<Option<Arc<PlayerHandle>>, SimError> {
        self.ask(move |z| z.remove_player(player_id, destroy)).await
    }

    pub async fn stats(&self) -> Result<ZoneStats, SimError> {
        self.ask(|z| z.stats()).await
    }

    pub async fn monsters(&self) -> Result<Vec<MonsterInfo>, SimError> {
        self.ask(|z| z.monster_infos()).await
    }

    pub async fn players(&self) -> Result<Vec<i64>, SimError> {
        self.ask(|z| z.players.keys().copied().collect()).await
    }

    pub async fn respawn_queue(&self) -> Result<Vec<RespawnEntry>, SimError> {
        self.ask(|z| z.respawn_entries()).await
    }

    pub async fn reset_monsters(&self, per_spawn: u32) -> Result<usize, SimError> {
        self.ask(move |z| z.reset_monsters(per_spawn)).await
    }

    pub async fn query_range(&self, center: GridPos, range: Coord) -> Result<Vec<ActorRef>, SimError> {
        self.ask(move |z| z.query_range(center, range)).await
    }

    pub async fn actor(&self, token: ActorToken) -> Result<Option<ActorRef>, SimError> {
        self.ask(move |z| z.actor(token)).await
    }

    pub async fn monster(&self, token: ActorToken) -> Result<Option<Arc<MonsterHandle>>, SimError> {
        self.ask(move |z| z.monsters.get(&token).cloned()).await
    }

    /// Whether `token` is still in the interest index.
    pub async fn indexed(&self, token: ActorToken) -> Result<bool, SimError> {
        self.ask(move |z| z.aoi.contains(&token)).await
    }

    pub fn link(&self) -> ZoneLink {
        ZoneLink {
            id: self.id,
            mailbox: self.mailbox.downgrade(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the zone. Queued work drains first; every actor is destroyed.
    pub fn stop(&self) {
        self.mailbox.destroy();
    }
}
