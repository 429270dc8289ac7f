//! Rows exchanged with the persistence boundary.
//!
//! These mirror the configuration tables a zone reads at start-up and the
//! character row a player is loaded from and saved to. All of them are
//! plain serde structs in camelCase so a JSON seed file can fill them.

use emberfall_grid::geom::{Coord, Rect, Vec3};
use serde::{Deserialize, Serialize};

/// Stats shared by every monster spawned from one template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterTemplate {
    pub id: i64,
    pub name: String,
    pub life: i32,
    #[serde(default)]
    pub mana: i32,
    pub attack: i32,
    #[serde(default)]
    pub defense: i32,
    /// Chebyshev distance from which melee lands.
    #[serde(default = "default_attack_range")]
    pub attack_range: Coord,
    /// Length of one melee swing.
    #[serde(default = "default_attack_duration")]
    pub attack_duration_ms: u64,
    /// Time per cell while walking.
    #[serde(default = "default_walk_step")]
    pub walk_step_ms: u64,
    /// Time per cell while running, chasing or returning.
    #[serde(default = "default_run_step")]
    pub run_step_ms: u64,
    pub ai_id: i64,
}

fn default_attack_range() -> Coord {
    1
}

fn default_attack_duration() -> u64 {
    1_000
}

fn default_walk_step() -> u64 {
    500
}

fn default_run_step() -> u64 {
    250
}

/// The persisted character row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: i64,
    pub name: String,
    pub zone_id: i64,
    pub pos: Vec3,
    pub life: i32,
    pub max_life: i32,
    #[serde(default)]
    pub mana: i32,
    #[serde(default)]
    pub max_mana: i32,
    pub attack: i32,
    #[serde(default)]
    pub defense: i32,
    #[serde(default = "default_walk_step")]
    pub step_ms: u64,
    /// Spells the character can cast.
    #[serde(default)]
    pub spells: Vec<i64>,
}

/// Monster behaviour settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    pub id: i64,
    /// Scan radius while idle.
    pub alert_range: Coord,
    /// Half size of the rectangle around the attack origin a chase may not
    /// leave.
    pub chase_range: Coord,
    #[serde(default)]
    pub auto_retaliate: bool,
    #[serde(default)]
    pub spells: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRecord {
    pub id: i64,
    pub name: String,
    /// Resource name of the walk grid.
    pub map_file: String,
    /// Where entering players are placed. Players keep their saved position
    /// when unset.
    #[serde(default)]
    pub enter: Option<Vec3>,
}

/// A transfer point between zones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorRecord {
    pub id: i64,
    pub zone_id: i64,
    pub pos: Vec3,
    pub target_zone: i64,
    pub target_pos: Vec3,
}

/// One spawn area of a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterSpawnConfig {
    pub id: i64,
    pub zone_id: i64,
    pub monster_id: i64,
    pub total: u32,
    /// Centre of the spawn area.
    pub born: Vec3,
    /// Half size of the leash rectangle around `born`.
    pub range: Coord,
    pub respawn_secs: u64,
}

impl MonsterSpawnConfig {
    pub fn leash(&self) -> Rect {
        Rect::around(self.born.grid(), self.range, self.range)
    }

    /// Name of the precomputed patrol resource for this area.
    pub fn patrol_resource(&self, map: &str) -> String {
        format!("{map}_{},{},{}.paths", self.born.x, self.born.y, self.range)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpellTarget {
    /// Aimed at a hostile actor or an impact point.
    Enemy,
    /// Cast on the caster itself.
    SelfCast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellDef {
    pub id: i64,
    pub name: String,
    pub target: SpellTarget,
    #[serde(default)]
    pub mana: i32,
    /// Life change on impact; negative heals.
    pub damage: i32,
    /// Maximum cast distance.
    pub range: Coord,
    /// Impact radius. Zero hits only the bound target.
    #[serde(default)]
    pub area: Coord,
    /// Flight time per cell of distance.
    #[serde(default = "default_fly_step")]
    pub fly_step_ms: u64,
    pub cooldown_ms: u64,
    /// Buff applied on impact.
    #[serde(default)]
    pub buff: Option<i64>,
}

fn default_fly_step() -> u64 {
    50
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use emberfall_grid::geom::GridPos;

    #[test]
    fn spawn_config_derives_leash_and_patrol_name() {
        let spawn: MonsterSpawnConfig = serde_json::from_str(
            r#"{"id": 1, "zoneId": 2, "monsterId": 3, "total": 4,
                "born": {"x": 50, "y": 60, "z": 0}, "range": 20, "respawnSecs": 30}"#,
        )
        .unwrap();
        assert_eq!(spawn.leash(), Rect::new(30, 40, 40, 40));
        assert!(spawn.leash().contains(GridPos::new(50, 60)));
        assert_eq!(spawn.patrol_resource("vale"), "vale_50,60,20.paths");
    }

    #[test]
    fn template_defaults_fill_timing() {
        let template: MonsterTemplate = serde_json::from_str(
            r#"{"id": 1, "name": "wolf", "life": 50, "attack": 12, "aiId": 1}"#,
        )
        .unwrap();
        assert_eq!(template.attack_range, 1);
        assert_eq!(template.run_step_ms, 250);
        assert_eq!(template.defense, 0);
    }

    #[test]
    fn spell_target_uses_camel_case() {
        let spell: SpellDef = serde_json::from_str(
            r#"{"id": 9, "name": "mend", "target": "selfCast", "damage": -30, "range": 0, "cooldownMs": 5000}"#,
        )
        .unwrap();
        assert_eq!(spell.target, SpellTarget::SelfCast);
        assert_eq!(spell.fly_step_ms, 50);
        assert_eq!(spell.buff, None);
    }
}
