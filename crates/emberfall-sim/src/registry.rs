//! Process-wide zone and player registry.
//!
//! This is what a gateway talks to: it maps player ids to their actors,
//! routes client requests to them and moves players between zones. Zones
//! hosted by another process are reached through the player's session RPC.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use emberfall_grid::geom::{Coord, GridPos, Vec3};
use serde_json::json;
use tracing::{info, warn};

use crate::actor::{Actor, ActorRef, ActorToken};
use crate::boundary::Session;
use crate::player::{PlayerHandle, PlayerState};
use crate::zone::{Zone, ZoneDeps, ZoneHandle, ZoneStats};
use crate::SimError;

pub struct ZoneRegistry {
    deps: ZoneDeps,
    zones: BTreeMap<i64, ZoneHandle>,
    players: DashMap<i64, Arc<PlayerHandle>>,
    sessions: DashMap<i64, Arc<dyn Session>>,
}

impl ZoneRegistry {
    /// Validate the configuration and start every zone in `zone_ids`.
    pub async fn start(deps: ZoneDeps, zone_ids: &[i64]) -> Result<Self, SimError> {
        deps.config.validate()?;
        let mut zones: BTreeMap<i64, ZoneHandle> = BTreeMap::new();
        for &id in zone_ids {
            let zone = match Zone::start(id, &deps) {
                Ok(zone) => zone,
                Err(e) => {
                    for started in zones.values() {
                        started.stop();
                    }
                    return Err(e);
                }
            };
            zones.insert(id, zone);
        }
        info!(zones = zones.len(), "zone registry started");
        Ok(Self {
            deps,
            zones,
            players: DashMap::new(),
            sessions: DashMap::new(),
        })
    }

    pub fn zone(&self, id: i64) -> Option<&ZoneHandle> {
        self.zones.get(&id)
    }

    pub fn zone_ids(&self) -> Vec<i64> {
        self.zones.keys().copied().collect()
    }

    pub fn player(&self, id: i64) -> Result<Arc<PlayerHandle>, SimError> {
        self.players
            .get(&id)
            .map(|p| Arc::clone(p.value()))
            .ok_or(SimError::PlayerNotFound { player: id })
    }

    pub fn online(&self) -> usize {
        self.players.len()
    }

    fn zone_of(&self, player: &PlayerHandle) -> Result<&ZoneHandle, SimError> {
        let id = player.core().zone_id();
        self.zones.get(&id).ok_or(SimError::ZoneUnavailable { zone: id })
    }

    // -- session lifecycle --------------------------------------------------

    /// Load player `player_id` and place it in its saved zone. A player that
    /// is already online is kicked out first.
    pub async fn enter(&self, player_id: i64, session: Option<Arc<dyn Session>>) -> Result<Arc<PlayerHandle>, SimError> {
        if self.players.contains_key(&player_id) {
            warn!(player = player_id, "player already online, replacing");
            self.leave(player_id).await?;
        }
        let record = self.deps.persistence.query_actor_record(player_id)?;
        let zone = self
            .zones
            .get(&record.zone_id)
            .ok_or(SimError::ZoneUnavailable { zone: record.zone_id })?;
        let player = PlayerState::spawn(
            record,
            session.clone(),
            Arc::clone(&self.deps.persistence),
            &self.deps.config,
        )?;
        if let Err(e) = zone.enter(Arc::clone(&player), None).await {
            player.destroy();
            return Err(e);
        }
        self.players.insert(player_id, Arc::clone(&player));
        if let Some(session) = session {
            self.sessions.insert(player_id, session);
        }
        Ok(player)
    }

    /// Remove the player from its zone and stop its actor (which saves it).
    pub async fn leave(&self, player_id: i64) -> Result<(), SimError> {
        let (_, player) = self
            .players
            .remove(&player_id)
            .ok_or(SimError::PlayerNotFound { player: player_id })?;
        self.sessions.remove(&player_id);
        match self.zone_of(&player) {
            Ok(zone) => {
                if zone.leave(player_id, true).await?.is_none() {
                    player.destroy();
                }
            }
            Err(_) => player.destroy(),
        }
        Ok(())
    }

    /// The transport lost the session. The zone drops the player on its
    /// next tick.
    pub fn on_disconnected(&self, player_id: i64) {
        if let Some((_, player)) = self.players.remove(&player_id) {
            self.sessions.remove(&player_id);
            player.go_offline();
            info!(player = player_id, "player disconnected");
        }
    }

    // -- client requests ----------------------------------------------------

    pub async fn move_player(&self, player_id: i64, target: GridPos) -> Result<usize, SimError> {
        self.player(player_id)?.move_to(target).await
    }

    pub fn move_by_path(&self, player_id: i64, steps: Vec<GridPos>) -> Result<(), SimError> {
        self.player(player_id)?.move_by_path(steps);
        Ok(())
    }

    pub fn move_stop(&self, player_id: i64, pos: GridPos) -> Result<(), SimError> {
        self.player(player_id)?.move_stop(pos);
        Ok(())
    }

    /// Client screens report full width and height; views use half sizes.
    pub fn set_view_range(&self, player_id: i64, width: Coord, height: Coord) -> Result<(), SimError> {
        self.player(player_id)?.set_view_range(width / 2, height / 2);
        Ok(())
    }

    pub fn text_message(&self, player_id: i64, text: impl Into<String>) -> Result<(), SimError> {
        self.player(player_id)?.say(text);
        Ok(())
    }

    /// Cast a spell at the actor `target`, or at cell `at`.
    pub async fn cast(
        &self,
        player_id: i64,
        spell_id: i64,
        target: Option<ActorToken>,
        at: GridPos,
    ) -> Result<(), SimError> {
        let player = self.player(player_id)?;
        let target: Option<ActorRef> = match target {
            Some(token) => Some(self.zone_of(&player)?.actor(token).await?.ok_or(SimError::TargetInvalid)?),
            None => None,
        };
        player.cast(spell_id, target, at).await
    }

    // -- zones --------------------------------------------------------------

    pub async fn zone_info(&self) -> Vec<ZoneStats> {
        let mut stats = Vec::with_capacity(self.zones.len());
        for zone in self.zones.values() {
            match zone.stats().await {
                Ok(s) => stats.push(s),
                Err(e) => warn!(zone = zone.id(), error = %e, "zone did not answer"),
            }
        }
        stats
    }

    pub async fn reset_monsters(&self, zone_id: i64, per_spawn: u32) -> Result<usize, SimError> {
        self.zones
            .get(&zone_id)
            .ok_or(SimError::ZoneUnavailable { zone: zone_id })?
            .reset_monsters(per_spawn)
            .await
    }

    /// Move a player to `zone_id`. Local zones take the same actor; remote
    /// ones are asked over the session and the local actor is retired.
    pub async fn transfer(&self, player_id: i64, zone_id: i64, pos: Option<Vec3>) -> Result<(), SimError> {
        let player = self.player(player_id)?;
        let from = player.core().zone_id();

        if let Some(target) = self.zones.get(&zone_id) {
            if from != 0 {
                if let Some(zone) = self.zones.get(&from) {
                    zone.leave(player_id, false).await?;
                }
            }
            target.enter(Arc::clone(&player), pos).await?;
            info!(player = player_id, from, to = zone_id, "player transferred");
            return Ok(());
        }

        let session = self
            .sessions
            .get(&player_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(SimError::ZoneUnavailable { zone: zone_id })?;
        let payload = json!({ "playerId": player_id, "zoneId": zone_id, "pos": pos });
        session.rpc("zone.transfer", payload)?;
        player.relocate(zone_id, pos).await?;
        self.leave(player_id).await?;
        info!(player = player_id, from, to = zone_id, "player handed to remote zone");
        Ok(())
    }

    /// Save and drop every player, then stop every zone.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.players.iter().map(|p| *p.key()).collect();
        for id in ids {
            if let Err(e) = self.leave(id).await {
                warn!(player = id, error = %e, "leave during shutdown failed");
            }
        }
        for zone in self.zones.values() {
            zone.stop();
        }
        info!("zone registry stopped");
    }
}
