//! Messages pushed to clients.
//!
//! Each variant carries its own client route. Payloads serialize as plain
//! camelCase JSON objects; the route travels separately.

use serde::Serialize;

use crate::actor::{ActorCore, ActorKind, ActorToken};
use crate::combat::ActionState;
use crate::records::DoorRecord;
use emberfall_grid::geom::{GridPos, Vec3};

/// What a client needs to draw another actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    pub entity_id: ActorToken,
    pub id: i64,
    pub kind: ActorKind,
    pub name: String,
    pub pos: Vec3,
    pub life: i32,
    pub max_life: i32,
}

impl EntitySummary {
    /// Built from published state only, so it can be taken from any actor.
    pub fn of(core: &ActorCore) -> Self {
        Self {
            entity_id: core.token(),
            id: core.id(),
            kind: core.kind(),
            name: core.name().to_owned(),
            pos: core.pos3(),
            life: core.life(),
            max_life: core.max_life(),
        }
    }
}

/// One message in a merged push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Routed {
    pub route: &'static str,
    pub body: Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    EnterScene {
        zone_id: i64,
        zone_name: String,
        me: EntitySummary,
        doors: Vec<DoorRecord>,
    },
    EnterView(EntitySummary),
    #[serde(rename_all = "camelCase")]
    ExitView { entity_id: ActorToken },
    #[serde(rename_all = "camelCase")]
    MoveTrace {
        entity_id: ActorToken,
        action: ActionState,
        step_ms: u64,
        cells: Vec<GridPos>,
    },
    #[serde(rename_all = "camelCase")]
    MoveStopped { entity_id: ActorToken, pos: GridPos },
    #[serde(rename_all = "camelCase")]
    LifeChanged {
        entity_id: ActorToken,
        damage: i32,
        life: i32,
        max_life: i32,
    },
    #[serde(rename_all = "camelCase")]
    ManaChanged {
        entity_id: ActorToken,
        mana: i32,
        max_mana: i32,
    },
    #[serde(rename_all = "camelCase")]
    EntityDie { entity_id: ActorToken },
    #[serde(rename_all = "camelCase")]
    BuffAdd {
        entity_id: ActorToken,
        buff_id: i64,
        name: String,
        count: u32,
    },
    #[serde(rename_all = "camelCase")]
    BuffRemove { entity_id: ActorToken, buff_id: i64 },
    #[serde(rename_all = "camelCase")]
    Attack {
        attacker: ActorToken,
        target: ActorToken,
        damage: i32,
    },
    #[serde(rename_all = "camelCase")]
    ReleaseSpell {
        caster: ActorToken,
        spell_id: i64,
        target: Option<ActorToken>,
        pos: GridPos,
    },
    #[serde(rename_all = "camelCase")]
    TextMessage {
        entity_id: ActorToken,
        name: String,
        text: String,
    },
    /// Several messages delivered in one push while the session is congested.
    Merged { messages: Vec<Routed> },
}

impl Outbound {
    pub fn route(&self) -> &'static str {
        match self {
            Self::EnterScene { .. } => "onEnterScene",
            Self::EnterView(_) => "onEnterView",
            Self::ExitView { .. } => "onExitView",
            Self::MoveTrace { .. } => "onMoveTrace",
            Self::MoveStopped { .. } => "onMoveStopped",
            Self::LifeChanged { .. } => "onLifeChanged",
            Self::ManaChanged { .. } => "onManaChanged",
            Self::EntityDie { .. } => "onEntityDie",
            Self::BuffAdd { .. } => "onBufferAdd",
            Self::BuffRemove { .. } => "onBufferRemove",
            Self::Attack { .. } => "onAttack",
            Self::ReleaseSpell { .. } => "onReleaseSpell",
            Self::TextMessage { .. } => "onTextMessage",
            Self::Merged { .. } => "onMergeMessages",
        }
    }

    /// The actor this message is about, if any.
    pub fn subject(&self) -> Option<ActorToken> {
        match self {
            Self::EnterView(summary) => Some(summary.entity_id),
            Self::EnterScene { me, .. } => Some(me.entity_id),
            Self::ExitView { entity_id }
            | Self::MoveTrace { entity_id, .. }
            | Self::MoveStopped { entity_id, .. }
            | Self::LifeChanged { entity_id, .. }
            | Self::ManaChanged { entity_id, .. }
            | Self::EntityDie { entity_id }
            | Self::BuffAdd { entity_id, .. }
            | Self::BuffRemove { entity_id, .. }
            | Self::TextMessage { entity_id, .. } => Some(*entity_id),
            Self::Attack { attacker, .. } => Some(*attacker),
            Self::ReleaseSpell { caster, .. } => Some(*caster),
            Self::Merged { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payloads_are_flat_camel_case_objects() {
        let token = ActorToken::allocate();
        let msg = Outbound::LifeChanged {
            entity_id: token,
            damage: 12,
            life: 88,
            max_life: 100,
        };
        assert_eq!(msg.route(), "onLifeChanged");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"entityId": token.raw(), "damage": 12, "life": 88, "maxLife": 100})
        );
    }

    #[test]
    fn summary_reads_published_state() {
        let core = ActorCore::new(42, ActorKind::Monster, "wolf", Vec3::new(3, 4, 1));
        core.publish_life(30, 50);
        let summary = EntitySummary::of(&core);
        assert_eq!(summary.id, 42);
        assert_eq!(summary.pos, Vec3::new(3, 4, 1));
        let value = serde_json::to_value(Outbound::EnterView(summary)).unwrap();
        assert_eq!(value["kind"], "monster");
        assert_eq!(value["maxLife"], 50);
    }

    #[test]
    fn merged_push_keeps_inner_routes() {
        let token = ActorToken::allocate();
        let msg = Outbound::Merged {
            messages: vec![Routed {
                route: "onEntityDie",
                body: Outbound::EntityDie { entity_id: token },
            }],
        };
        assert_eq!(msg.route(), "onMergeMessages");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["messages"][0]["route"], "onEntityDie");
        assert_eq!(value["messages"][0]["body"]["entityId"], token.raw());
    }
}
