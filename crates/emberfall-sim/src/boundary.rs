//! Collaborators at the edge of the simulation.
//!
//! - [`Persistence`]: configuration tables and character rows.
//! - [`ResourceLoader`]: map and patrol resources by name.
//! - [`Session`]: one connected client.
//!
//! Each trait comes with an in-process implementation. [`MemoryStore`] can be
//! seeded from JSON and backs both the test suite and the headless server.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::buff::BuffDef;
use crate::outbound::Outbound;
use crate::records::{
    AiConfig, DoorRecord, MonsterSpawnConfig, MonsterTemplate, PlayerRecord, SpellDef, ZoneRecord,
};
use crate::{PersistenceError, SimError, TransportError};

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Storage for configuration and character rows.
pub trait Persistence: Send + Sync {
    fn query_actor_template(&self, id: i64) -> Result<MonsterTemplate, PersistenceError>;
    fn query_actor_record(&self, id: i64) -> Result<PlayerRecord, PersistenceError>;
    fn query_ai_config(&self, id: i64) -> Result<AiConfig, PersistenceError>;
    /// Store a new character and return its id.
    fn insert_actor_record(&self, record: &PlayerRecord) -> Result<i64, PersistenceError>;
    fn update_actor_record(&self, record: &PlayerRecord) -> Result<(), PersistenceError>;
    fn query_zone_config(&self, id: i64) -> Result<ZoneRecord, PersistenceError>;
    fn query_zone_doors(&self, zone: i64) -> Result<Vec<DoorRecord>, PersistenceError>;
    fn query_zone_monster_config(&self, zone: i64) -> Result<Vec<MonsterSpawnConfig>, PersistenceError>;
    fn query_spell(&self, id: i64) -> Result<SpellDef, PersistenceError>;
    fn query_buff_definition(&self, id: i64) -> Result<BuffDef, PersistenceError>;
}

/// JSON layout accepted by [`MemoryStore::from_json`]. Every table is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreSeed {
    pub templates: Vec<MonsterTemplate>,
    pub players: Vec<PlayerRecord>,
    pub ai: Vec<AiConfig>,
    pub zones: Vec<ZoneRecord>,
    pub doors: Vec<DoorRecord>,
    pub spawns: Vec<MonsterSpawnConfig>,
    pub spells: Vec<SpellDef>,
    pub buffs: Vec<BuffDef>,
}

/// In-process [`Persistence`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    templates: DashMap<i64, MonsterTemplate>,
    players: DashMap<i64, PlayerRecord>,
    ai: DashMap<i64, AiConfig>,
    zones: DashMap<i64, ZoneRecord>,
    doors: DashMap<i64, DoorRecord>,
    spawns: DashMap<i64, MonsterSpawnConfig>,
    spells: DashMap<i64, SpellDef>,
    buffs: DashMap<i64, BuffDef>,
    next_player: AtomicI64,
    read_only: AtomicBool,
}

fn check_id(id: i64) -> Result<(), PersistenceError> {
    if id <= 0 {
        return Err(PersistenceError::InvalidParameter {
            details: format!("id must be positive, got {id}"),
        });
    }
    Ok(())
}

fn fetch<T: Clone>(table: &DashMap<i64, T>, name: &'static str, id: i64) -> Result<T, PersistenceError> {
    check_id(id)?;
    table
        .get(&id)
        .map(|row| row.value().clone())
        .ok_or(PersistenceError::NotFound { table: name, id })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_player: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn from_seed(seed: StoreSeed) -> Self {
        let store = Self::new();
        for row in seed.templates {
            store.templates.insert(row.id, row);
        }
        for row in seed.players {
            store.next_player.fetch_max(row.id + 1, Ordering::Relaxed);
            store.players.insert(row.id, row);
        }
        for row in seed.ai {
            store.ai.insert(row.id, row);
        }
        for row in seed.zones {
            store.zones.insert(row.id, row);
        }
        for row in seed.doors {
            store.doors.insert(row.id, row);
        }
        for row in seed.spawns {
            store.spawns.insert(row.id, row);
        }
        for row in seed.spells {
            store.spells.insert(row.id, row);
        }
        for row in seed.buffs {
            store.buffs.insert(row.id, row);
        }
        store
    }

    pub fn from_json(text: &str) -> Result<Self, PersistenceError> {
        let seed: StoreSeed = serde_json::from_str(text).map_err(|e| PersistenceError::DbOperation {
            details: format!("seed decode: {e}"),
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Refuse every write with `PermissionDenied`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    /// Every zone id in the store, ascending.
    pub fn zone_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.zones.iter().map(|z| *z.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.read_only.load(Ordering::Relaxed) {
            return Err(PersistenceError::PermissionDenied {
                details: "store is read-only".into(),
            });
        }
        Ok(())
    }
}

impl Persistence for MemoryStore {
    fn query_actor_template(&self, id: i64) -> Result<MonsterTemplate, PersistenceError> {
        fetch(&self.templates, "monster template", id)
    }

    fn query_actor_record(&self, id: i64) -> Result<PlayerRecord, PersistenceError> {
        fetch(&self.players, "player", id)
    }

    fn query_ai_config(&self, id: i64) -> Result<AiConfig, PersistenceError> {
        fetch(&self.ai, "ai config", id)
    }

    fn insert_actor_record(&self, record: &PlayerRecord) -> Result<i64, PersistenceError> {
        self.check_writable()?;
        if record.name.is_empty() {
            return Err(PersistenceError::InvalidParameter {
                details: "player name is empty".into(),
            });
        }
        if record.id > 0 && self.players.contains_key(&record.id) {
            return Err(PersistenceError::IllegalParameter {
                details: format!("player {} already exists", record.id),
            });
        }
        let id = if record.id > 0 {
            self.next_player.fetch_max(record.id + 1, Ordering::Relaxed);
            record.id
        } else {
            self.next_player.fetch_add(1, Ordering::Relaxed)
        };
        let mut row = record.clone();
        row.id = id;
        self.players.insert(id, row);
        Ok(id)
    }

    fn update_actor_record(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        self.check_writable()?;
        check_id(record.id)?;
        match self.players.get_mut(&record.id) {
            Some(mut row) => {
                *row = record.clone();
                Ok(())
            }
            None => Err(PersistenceError::NotFound {
                table: "player",
                id: record.id,
            }),
        }
    }

    fn query_zone_config(&self, id: i64) -> Result<ZoneRecord, PersistenceError> {
        fetch(&self.zones, "zone", id)
    }

    fn query_zone_doors(&self, zone: i64) -> Result<Vec<DoorRecord>, PersistenceError> {
        check_id(zone)?;
        let mut rows: Vec<DoorRecord> = self
            .doors
            .iter()
            .filter(|d| d.zone_id == zone)
            .map(|d| d.value().clone())
            .collect();
        rows.sort_by_key(|d| d.id);
        Ok(rows)
    }

    fn query_zone_monster_config(&self, zone: i64) -> Result<Vec<MonsterSpawnConfig>, PersistenceError> {
        check_id(zone)?;
        let mut rows: Vec<MonsterSpawnConfig> = self
            .spawns
            .iter()
            .filter(|s| s.zone_id == zone)
            .map(|s| s.value().clone())
            .collect();
        rows.sort_by_key(|s| s.id);
        Ok(rows)
    }

    fn query_spell(&self, id: i64) -> Result<SpellDef, PersistenceError> {
        fetch(&self.spells, "spell", id)
    }

    fn query_buff_definition(&self, id: i64) -> Result<BuffDef, PersistenceError> {
        fetch(&self.buffs, "buff", id)
    }
}

// ---------------------------------------------------------------------------
// ResourceLoader
// ---------------------------------------------------------------------------

/// Read-only access to zone resources.
pub trait ResourceLoader: Send + Sync {
    /// Raw walk-grid resource for `map`.
    fn map_bytes(&self, map: &str) -> Result<Vec<u8>, SimError>;

    /// Patrol resource named `name`, or `None` when the area has none.
    fn patrol_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, SimError>;
}

/// Resources held in memory, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct MemoryResources {
    maps: HashMap<String, Vec<u8>>,
    patrols: HashMap<String, Vec<u8>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.maps.insert(name.into(), bytes);
        self
    }

    pub fn with_patrol(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.patrols.insert(name.into(), bytes);
        self
    }
}

impl ResourceLoader for MemoryResources {
    fn map_bytes(&self, map: &str) -> Result<Vec<u8>, SimError> {
        self.maps.get(map).cloned().ok_or_else(|| SimError::Resource {
            name: map.to_owned(),
            details: "no such map".into(),
        })
    }

    fn patrol_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, SimError> {
        Ok(self.patrols.get(name).cloned())
    }
}

/// Resources under a data directory: `blocks/<map>.block` for maps and
/// `blocks/<name>` for patrol files.
#[derive(Debug, Clone)]
pub struct DirResources {
    root: PathBuf,
}

impl DirResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blocks(&self) -> PathBuf {
        self.root.join("blocks")
    }
}

impl ResourceLoader for DirResources {
    fn map_bytes(&self, map: &str) -> Result<Vec<u8>, SimError> {
        let path = self.blocks().join(format!("{map}.block"));
        std::fs::read(&path).map_err(|e| SimError::Resource {
            name: path.display().to_string(),
            details: e.to_string(),
        })
    }

    fn patrol_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, SimError> {
        let path = self.blocks().join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no patrol resource");
                Ok(None)
            }
            Err(e) => Err(SimError::Resource {
                name: path.display().to_string(),
                details: e.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One connected client, as seen by the simulation.
pub trait Session: Send + Sync {
    fn id(&self) -> i64;

    /// Best-effort delivery of one message.
    fn push(&self, route: &'static str, msg: &Outbound) -> Result<(), TransportError>;

    /// Synchronous call to another server process.
    fn rpc(&self, method: &str, payload: serde_json::Value) -> Result<serde_json::Value, TransportError>;

    fn close(&self);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
