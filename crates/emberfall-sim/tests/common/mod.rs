//! Shared fixtures for the zone integration tests.
//!
//! Every test builds a small world in memory: one open 200x200 zone, a
//! player or two, and optionally a monster spawn. Clients are replaced by
//! [`Recorder`] sessions that keep every push as JSON.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use emberfall_sim::boundary::StoreSeed;
use emberfall_sim::buff::BuffDef;
use emberfall_sim::prelude::*;
use serde_json::{json, Value};
use tokio::time::Instant;

pub const ZONE: i64 = 1;
pub const MAP: &str = "meadow";
pub const WOLF: i64 = 10;
pub const FIREBALL: i64 = 1;
pub const HEAL: i64 = 2;
pub const POISON: i64 = 3;
pub const FROST_NOVA: i64 = 4;

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// A session that records every push.
#[derive(Debug, Default)]
pub struct Recorder {
    id: i64,
    pushes: Mutex<Vec<(String, Value, Instant)>>,
    rpcs: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
}

impl Recorder {
    pub fn new(id: i64) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Self::default()
        })
    }

    pub fn routes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().iter().map(|(r, _, _)| r.clone()).collect()
    }

    /// Bodies pushed on `route`, merged batches unpacked.
    pub fn messages(&self, route: &str) -> Vec<Value> {
        self.timed(route).into_iter().map(|(body, _)| body).collect()
    }

    /// Like [`Recorder::messages`], with the time each push arrived.
    pub fn timed(&self, route: &str) -> Vec<(Value, Instant)> {
        let mut out = Vec::new();
        for (r, body, at) in self.pushes.lock().unwrap().iter() {
            if r == route {
                out.push((body.clone(), *at));
            } else if r == "onMergeMessages" {
                for inner in body["messages"].as_array().into_iter().flatten() {
                    if inner["route"] == route {
                        out.push((inner["body"].clone(), *at));
                    }
                }
            }
        }
        out
    }

    /// Messages on `route` about entity `token`.
    pub fn about(&self, route: &str, token: ActorToken) -> Vec<Value> {
        let raw = json!(token);
        self.messages(route)
            .into_iter()
            .filter(|m| m["entityId"] == raw)
            .collect()
    }

    pub fn count(&self, route: &str) -> usize {
        self.messages(route).len()
    }

    pub fn rpcs(&self) -> Vec<(String, Value)> {
        self.rpcs.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.pushes.lock().unwrap().clear();
    }
}

impl Session for Recorder {
    fn id(&self) -> i64 {
        self.id
    }

    fn push(&self, route: &'static str, msg: &Outbound) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed { session: self.id });
        }
        let body = serde_json::to_value(msg).map_err(|e| TransportError::Rpc {
            method: route.into(),
            details: e.to_string(),
        })?;
        self.pushes.lock().unwrap().push((route.to_owned(), body, Instant::now()));
        Ok(())
    }

    fn rpc(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
        self.rpcs.lock().unwrap().push((method.to_owned(), payload));
        Ok(json!({ "ok": true }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// In-memory world description, turned into [`ZoneDeps`] by [`World::build`].
pub struct World {
    pub seed: StoreSeed,
    pub resources: MemoryResources,
    pub config: SimConfig,
}

impl World {
    /// One empty open zone with the standard spells and the wolf template.
    pub fn meadow() -> Self {
        let seed = StoreSeed {
            zones: vec![ZoneRecord {
                id: ZONE,
                name: "Meadow".into(),
                map_file: MAP.into(),
                enter: None,
            }],
            doors: vec![DoorRecord {
                id: 1,
                zone_id: ZONE,
                pos: Vec3::new(0, 0, 0),
                target_zone: 2,
                target_pos: Vec3::new(5, 5, 0),
            }],
            templates: vec![wolf()],
            ai: vec![AiConfig {
                id: 1,
                alert_range: 8,
                chase_range: 30,
                auto_retaliate: true,
                spells: Vec::new(),
            }],
            spells: vec![
                spell(FIREBALL, "Fireball", SpellTarget::Enemy, 10, 30, 10, 0, 0, None),
                spell(HEAL, "Heal", SpellTarget::SelfCast, 10, -20, 0, 0, 0, None),
                spell(POISON, "Poison", SpellTarget::Enemy, 5, 0, 10, 0, 0, Some(1)),
                spell(FROST_NOVA, "Frost Nova", SpellTarget::Enemy, 5, 12, 10, 3, 2000, None),
            ],
            buffs: vec![BuffDef {
                id: 1,
                name: "Poisoned".into(),
                damage: 5,
                duration_ms: 500,
                gap_ms: 0,
                count: 3,
                stackable: false,
            }],
            ..StoreSeed::default()
        };
        let resources = MemoryResources::new().with_map(MAP, WalkGrid::open(200, 200).to_bytes());
        Self {
            seed,
            resources,
            config: SimConfig::default(),
        }
    }

    pub fn with_player(mut self, id: i64, x: i32, y: i32) -> Self {
        self.seed.players.push(player(id, x, y));
        self
    }

    pub fn with_spawn(mut self, total: u32, x: i32, y: i32, range: i32) -> Self {
        let id = self.seed.spawns.len() as i64 + 1;
        self.seed.spawns.push(MonsterSpawnConfig {
            id,
            zone_id: ZONE,
            monster_id: WOLF,
            total,
            born: Vec3::new(x, y, 0),
            range,
            respawn_secs: 3,
        });
        self
    }

    pub fn template(mut self, mut f: impl FnMut(&mut MonsterTemplate)) -> Self {
        for t in &mut self.seed.templates {
            f(t);
        }
        self
    }

    pub fn ai(mut self, mut f: impl FnMut(&mut AiConfig)) -> Self {
        for a in &mut self.seed.ai {
            f(a);
        }
        self
    }

    pub fn player_mut(mut self, id: i64, f: impl FnOnce(&mut PlayerRecord)) -> Self {
        if let Some(p) = self.seed.players.iter_mut().find(|p| p.id == id) {
            f(p);
        }
        self
    }

    pub fn tune(mut self, f: impl FnOnce(&mut SimConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> (Arc<MemoryStore>, ZoneDeps) {
        let store = Arc::new(MemoryStore::from_seed(self.seed));
        let deps = ZoneDeps::new(store.clone(), Arc::new(self.resources), self.config);
        (store, deps)
    }

    pub async fn start(self) -> (Arc<MemoryStore>, ZoneRegistry) {
        let (store, deps) = self.build();
        let registry = ZoneRegistry::start(deps, &[ZONE]).await.expect("zone starts");
        (store, registry)
    }
}

pub fn wolf() -> MonsterTemplate {
    MonsterTemplate {
        id: WOLF,
        name: "Wolf".into(),
        life: 60,
        mana: 0,
        attack: 15,
        defense: 2,
        attack_range: 1,
        attack_duration_ms: 1000,
        walk_step_ms: 500,
        run_step_ms: 250,
        ai_id: 1,
    }
}

pub fn player(id: i64, x: i32, y: i32) -> PlayerRecord {
    PlayerRecord {
        id,
        name: format!("player-{id}"),
        zone_id: ZONE,
        pos: Vec3::new(x, y, 0),
        life: 1000,
        max_life: 1000,
        mana: 100,
        max_mana: 100,
        attack: 10,
        defense: 0,
        step_ms: 100,
        spells: vec![FIREBALL, HEAL, POISON, FROST_NOVA],
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spell(
    id: i64,
    name: &str,
    target: SpellTarget,
    mana: i32,
    damage: i32,
    range: i32,
    area: i32,
    cooldown_ms: u64,
    buff: Option<i64>,
) -> SpellDef {
    SpellDef {
        id,
        name: name.into(),
        target,
        mana,
        damage,
        range,
        area,
        fly_step_ms: 50,
        cooldown_ms,
        buff,
    }
}

/// Let simulated time pass.
pub async fn wait_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// A recorder as the session type the registry takes.
/// The single monster of a one-spawn world.
pub async fn only_monster(registry: &ZoneRegistry) -> std::sync::Arc<MonsterHandle> {
    let zone = registry.zone(ZONE).expect("zone");
    let infos = zone.monsters().await.unwrap();
    assert_eq!(infos.len(), 1);
    zone.monster(infos[0].token).await.unwrap().expect("monster alive")
}

pub fn session(recorder: &Arc<Recorder>) -> Option<Arc<dyn Session>> {
    let session: Arc<dyn Session> = recorder.clone();
    Some(session)
}
