//! Runtime configuration for zones and their actors.
//!
//! Every field has a default, so a config file only needs the values it wants
//! to change:
//!
//! ```
//! use emberfall_sim::config::SimConfig;
//!
//! let config = SimConfig::from_json(r#"{"timing": {"tickMs": 50}, "seed": 7}"#).unwrap();
//! assert_eq!(config.timing.tick_ms, 50);
//! assert_eq!(config.timing.visibility_ms, 500);
//! assert_eq!(config.seed, 7);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SimError;

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Top-level simulation settings shared by every zone in a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimConfig {
    pub timing: ZoneTiming,
    pub mailbox: MailboxCapacity,
    pub view: ViewConfig,
    pub ai: AiTuning,
    pub delivery: DeliveryConfig,
    /// Side length of one interest-index cell. Must cover the sticky view
    /// range so the 3x3 search sees every candidate.
    pub aoi_cell_size: i32,
    /// Base seed for zone random streams; each zone mixes in its own id.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timing: ZoneTiming::default(),
            mailbox: MailboxCapacity::default(),
            view: ViewConfig::default(),
            ai: AiTuning::default(),
            delivery: DeliveryConfig::default(),
            aoi_cell_size: 40,
            seed: 0x5eed_e3be_7fa1,
        }
    }
}

impl SimConfig {
    /// Parse a JSON document, filling unspecified fields with defaults, and
    /// validate the result.
    pub fn from_json(text: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(text).map_err(|e| SimError::Config {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the zone loop cannot run with.
    pub fn validate(&self) -> Result<(), SimError> {
        let fail = |details: String| Err(SimError::Config { details });
        if self.timing.tick_ms == 0 {
            return fail("timing.tickMs must be positive".into());
        }
        if self.timing.visibility_ms < self.timing.tick_ms {
            return fail(format!(
                "timing.visibilityMs ({}) must be at least one tick ({})",
                self.timing.visibility_ms, self.timing.tick_ms
            ));
        }
        if self.timing.save_ms == 0 {
            return fail("timing.saveMs must be positive".into());
        }
        let caps = &self.mailbox;
        if [caps.player, caps.monster, caps.spell, caps.zone, caps.outbound].contains(&0) {
            return fail("mailbox capacities must be positive".into());
        }
        if self.view.half_width <= 0 || self.view.half_height <= 0 || self.view.margin < 0 {
            return fail("view ranges must be positive".into());
        }
        let sticky = self.view.half_width.max(self.view.half_height) + self.view.margin;
        if self.aoi_cell_size < sticky {
            return fail(format!(
                "aoiCellSize ({}) is smaller than the sticky view range ({sticky})",
                self.aoi_cell_size
            ));
        }
        if self.ai.wander_chance > 100 {
            return fail("ai.wanderChance is a percentage".into());
        }
        if !(0.0..=1.0).contains(&self.ai.self_cast_below) {
            return fail("ai.selfCastBelow must be a fraction of max life".into());
        }
        if self.delivery.merge_flush_threshold == 0 || self.delivery.max_retries == 0 {
            return fail("delivery thresholds must be positive".into());
        }
        Ok(())
    }

    /// Seed for zone `zone_id`.
    pub fn zone_seed(&self, zone_id: i64) -> u64 {
        self.seed ^ (zone_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Zone loop cadences, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ZoneTiming {
    /// Simulation tick. Default 100.
    pub tick_ms: u64,
    /// Aggregated visibility pass and respawn scan. Default 500.
    pub visibility_ms: u64,
    /// Periodic player save. Default 5000.
    pub save_ms: u64,
}

impl Default for ZoneTiming {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            visibility_ms: 500,
            save_ms: 5_000,
        }
    }
}

impl ZoneTiming {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn save(&self) -> Duration {
        Duration::from_millis(self.save_ms)
    }
}

/// Bounded queue sizes per actor kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MailboxCapacity {
    pub player: usize,
    pub monster: usize,
    pub spell: usize,
    pub zone: usize,
    /// Per-player outbound delivery queue.
    pub outbound: usize,
}

impl Default for MailboxCapacity {
    fn default() -> Self {
        Self {
            player: 2048,
            monster: 128,
            spell: 64,
            zone: 2048,
            outbound: 2048,
        }
    }
}

/// Default view rectangle for newly created actors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewConfig {
    pub half_width: i32,
    pub half_height: i32,
    /// Extra border of the sticky rectangle around the screen rectangle.
    pub margin: i32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            half_width: 30,
            half_height: 30,
            margin: 10,
        }
    }
}

/// Monster behaviour timers and search bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AiTuning {
    /// Decision cadence. Default 200.
    pub decision_ms: u64,
    /// Hostile scan cadence while idle. Default 1200.
    pub scan_ms: u64,
    /// Wander roll cadence while idle. Default 5000.
    pub wander_ms: u64,
    /// Percent chance that a wander roll starts a walk. Default 5.
    pub wander_chance: u32,
    /// Added to a template's attack duration to get the melee cooldown.
    pub attack_recovery_ms: u64,
    /// Self-targeted spells are preferred below this fraction of max life.
    pub self_cast_below: f64,
    /// Random-point draws when picking a wander destination.
    pub wander_attempts: u32,
    /// Random-point draws when placing a spawned monster.
    pub spawn_attempts: u32,
    /// Cells examined when looking for a place to attack from.
    pub stand_search: usize,
    /// Upper bound on monsters per spawn config for a dynamic reset.
    pub reset_cap: u32,
}

impl Default for AiTuning {
    fn default() -> Self {
        Self {
            decision_ms: 200,
            scan_ms: 1_200,
            wander_ms: 5_000,
            wander_chance: 5,
            attack_recovery_ms: 50,
            self_cast_below: 0.3,
            wander_attempts: 20,
            spawn_attempts: 100,
            stand_search: 20,
            reset_cap: 5_000,
        }
    }
}

/// Degrade-to-batching policy for outbound client messages.
///
/// A player's delivery queue normally pushes each message on its own. After
/// a failed push it switches to merge mode: messages are held for up to
/// `merge_window_ms` (or until `merge_flush_threshold` are queued) and sent
/// as one merged push, retried up to `max_retries` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeliveryConfig {
    pub merge_window_ms: u64,
    pub merge_flush_threshold: usize,
    pub max_retries: u32,
    /// Retries after which each further failure is logged as a warning.
    pub warn_after_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            merge_window_ms: 100,
            merge_flush_threshold: 50,
            max_retries: 100,
            warn_after_retries: 10,
            retry_backoff_ms: 20,
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
    fn defaults_validate() {
        SimConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(SimConfig::from_json("{}").unwrap(), SimConfig::default());
    }

    #[test]
    fn nested_sections_merge_with_defaults() {
        let config = SimConfig::from_json(
            r#"{"ai": {"scanMs": 600}, "delivery": {"maxRetries": 3}, "mailbox": {"monster": 16}}"#,
        )
        .unwrap();
        assert_eq!(config.ai.scan_ms, 600);
        assert_eq!(config.ai.decision_ms, 200);
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(config.delivery.merge_flush_threshold, 50);
        assert_eq!(config.mailbox.monster, 16);
        assert_eq!(config.mailbox.player, 2048);
    }

    #[test]
    fn rejects_cells_smaller_than_sticky_range() {
        let err = SimConfig::from_json(r#"{"aoiCellSize": 20}"#).unwrap_err();
        assert!(matches!(err, SimError::Config { .. }), "{err}");
    }

    #[test]
    fn rejects_zero_tick_and_bad_fractions() {
        assert!(SimConfig::from_json(r#"{"timing": {"tickMs": 0}}"#).is_err());
        assert!(SimConfig::from_json(r#"{"ai": {"selfCastBelow": 1.5}}"#).is_err());
        assert!(SimConfig::from_json(r#"{"mailbox": {"spell": 0}}"#).is_err());
        assert!(SimConfig::from_json("not json").is_err());
    }

    #[test]
    fn zone_seeds_differ_per_zone() {
        let config = SimConfig::default();
        assert_ne!(config.zone_seed(1), config.zone_seed(2));
        assert_eq!(config.zone_seed(3), config.zone_seed(3));
    }
}
