//! Emberfall Sim -- the actor layer of a game zone.
//!
//! Every player, monster and spell projectile is an actor: a private state
//! value driven by its own task queue ([`mailbox::Mailbox`]). Nothing outside
//! the actor touches that state; other actors and the zone submit closures
//! instead. A [`zone::Zone`] owns the actor registry, the interest index and
//! the tick loop, and a [`registry::ZoneRegistry`] is the entry point a
//! transport layer calls into.
//!
//! - [`mailbox`] / [`actor`]: task queues, the shared actor core and the
//!   object-safe [`actor::Actor`] capability trait.
//! - [`view`]: the two visibility sets and the enter/exit protocol.
//! - [`combat`] / [`buff`]: damage resolution and timed status effects.
//! - [`player`] / [`monster`] / [`ai`] / [`spell`]: the three actor kinds.
//! - [`zone`] / [`registry`]: the tick loop and the zone directory.
//! - [`boundary`] / [`records`] / [`delivery`] / [`outbound`]: collaborators
//!   at the edge (storage, resources, client sessions).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use emberfall_sim::prelude::*;
//!
//! # async fn demo() -> Result<(), SimError> {
//! let store = Arc::new(MemoryStore::from_json(r#"{"zones": [{"id": 1, "name": "vale", "mapFile": "vale"}]}"#)?);
//! let resources = Arc::new(DirResources::new("data"));
//! let deps = ZoneDeps::new(store, resources, SimConfig::default());
//! let registry = ZoneRegistry::start(deps, &[1]).await?;
//! println!("{:?}", registry.zone_info().await);
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod actor;
pub mod ai;
pub mod boundary;
pub mod buff;
pub mod combat;
pub mod config;
pub mod delivery;
pub mod mailbox;
pub mod monster;
pub mod movement;
pub mod outbound;
pub mod player;
pub mod records;
pub mod registry;
pub mod spell;
pub mod view;
pub mod zone;

use emberfall_grid::geom::GridPos;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures reported by a [`boundary::Persistence`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// The requested row does not exist.
    #[error("{table} {id} not found")]
    NotFound { table: &'static str, id: i64 },

    /// The request itself is malformed (e.g. a non-positive id).
    #[error("invalid parameter: {details}")]
    InvalidParameter { details: String },

    /// The request is well formed but conflicts with stored state.
    #[error("illegal parameter: {details}")]
    IllegalParameter { details: String },

    /// The store refuses writes.
    #[error("permission denied: {details}")]
    PermissionDenied { details: String },

    /// The backing store failed.
    #[error("database operation failed: {details}")]
    DbOperation { details: String },
}

/// Failures reported by a client [`boundary::Session`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The outbound buffer is saturated; the message may be retried.
    #[error("session {session} is congested")]
    Congested { session: i64 },

    /// The session is gone. Nothing sent to it will arrive.
    #[error("session {session} is closed")]
    Closed { session: i64 },

    /// A remote call failed.
    #[error("rpc {method} failed: {details}")]
    Rpc { method: String, details: String },
}

/// Errors produced by the simulation layer.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// No walkable route between two cells.
    #[error("no path from {from} to {to}")]
    NoPath { from: GridPos, to: GridPos },

    /// No free cell at attack range around a target.
    #[error("no stand position within range {range} of {target}")]
    NoStandPosition { target: GridPos, range: i32 },

    /// The target of an action is gone, dead, offline or not attackable.
    #[error("target is not valid for this action")]
    TargetInvalid,

    /// The zone does not exist in this process or has stopped.
    #[error("zone {zone} is unavailable")]
    ZoneUnavailable { zone: i64 },

    /// The actor has been destroyed and no longer accepts work.
    #[error("actor {actor} has been destroyed")]
    ActorDestroyed { actor: String },

    /// The caster cannot pay for the spell.
    #[error("spell {spell} needs {needed} mana, caster has {available}")]
    InsufficientMana {
        spell: i64,
        needed: i32,
        available: i32,
    },

    /// The spell was used too recently.
    #[error("spell {spell} is on cooldown for another {remaining_ms} ms")]
    SpellOnCooldown { spell: i64, remaining_ms: u64 },

    /// The caster does not know the spell.
    #[error("spell {spell} is not known")]
    UnknownSpell { spell: i64 },

    /// The player is not registered with any zone in this process.
    #[error("player {player} is not online")]
    PlayerNotFound { player: i64 },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Grid(#[from] emberfall_grid::GridError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A zone resource (map or patrol file) could not be read.
    #[error("resource {name}: {details}")]
    Resource { name: String, details: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {details}")]
    Config { details: String },
}

impl From<emberfall_grid::PathError> for SimError {
    fn from(err: emberfall_grid::PathError) -> Self {
        match err {
            emberfall_grid::PathError::NoPath { from, to } => SimError::NoPath { from, to },
            emberfall_grid::PathError::OutOfBounds { pos, .. } => SimError::NoPath { from: pos, to: pos },
        }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::actor::{Actor, ActorCore, ActorHandle, ActorKind, ActorRef, ActorToken, WeakActor};
    pub use crate::boundary::{DirResources, MemoryResources, MemoryStore, Persistence, ResourceLoader, Session};
    pub use crate::buff::{Buff, BuffDef, BuffSet};
    pub use crate::combat::{resolve_damage, ActionState, Vitals};
    pub use crate::config::SimConfig;
    pub use crate::mailbox::{Inbox, Mailbox};
    pub use crate::monster::MonsterHandle;
    pub use crate::outbound::{EntitySummary, Outbound};
    pub use crate::player::PlayerHandle;
    pub use crate::records::{
        AiConfig, DoorRecord, MonsterSpawnConfig, MonsterTemplate, PlayerRecord, SpellDef, SpellTarget, ZoneRecord,
    };
    pub use crate::registry::ZoneRegistry;
    pub use crate::zone::{Zone, ZoneDeps, ZoneHandle, ZoneStats};
    pub use crate::{PersistenceError, SimError, TransportError};
    pub use emberfall_grid::prelude::*;
}
