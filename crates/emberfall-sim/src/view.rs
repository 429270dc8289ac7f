//! Visibility bookkeeping for movable actors.
//!
//! Each actor keeps two sets keyed by [`ActorToken`]:
//!
//! - `sees`: actors this one currently has on screen (players only).
//! - `seen_by`: actors that have this one on screen.
//!
//! Both hold weak links, so membership never keeps an actor alive. The sets
//! are only touched from the owning actor's task loop; changes that concern
//! another actor are sent to it as tasks (`observe`, `entered_by`,
//! `exit_view`, `drop_observer`). Every insert and removal is keyed by
//! membership, so an enter or exit event is produced at most once per change
//! however many paths report it.
//!
//! Two rectangles drive the tests. The screen rectangle follows the actor
//! exactly. The sticky rectangle is larger by a margin and only recentres when
//! the screen rectangle pokes out of it, so small moves do not churn the
//! sets. Containment checks use the sticky rectangle.

use std::collections::BTreeMap;

use emberfall_grid::geom::{Coord, GridPos, Rect};

use crate::actor::{live, ActorKind, ActorRef, ActorToken, WeakActor};
use crate::config::ViewConfig;

/// One member of a visibility set.
#[derive(Debug, Clone)]
pub struct ViewEntry {
    link: WeakActor,
    pub id: i64,
    pub kind: ActorKind,
}

impl ViewEntry {
    fn of(actor: &ActorRef) -> Self {
        Self {
            link: std::sync::Arc::downgrade(actor),
            id: actor.core().id(),
            kind: actor.kind(),
        }
    }

    pub fn get(&self) -> Option<ActorRef> {
        live(&self.link)
    }
}

/// Visibility change produced for the owning actor's client.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    Entered(ActorRef),
    Exited { token: ActorToken, id: i64, kind: ActorKind },
}

#[derive(Debug)]
pub struct ViewState {
    half_w: Coord,
    half_h: Coord,
    margin: Coord,
    screen: Rect,
    sticky: Rect,
    /// Whether this actor keeps a `sees` set at all.
    observes: bool,
    sees: BTreeMap<ActorToken, ViewEntry>,
    seen_by: BTreeMap<ActorToken, ViewEntry>,
}

impl ViewState {
    pub fn new(config: &ViewConfig, observes: bool) -> Self {
        Self {
            half_w: config.half_width,
            half_h: config.half_height,
            margin: config.margin,
            screen: Rect::default(),
            sticky: Rect::default(),
            observes,
            sees: BTreeMap::new(),
            seen_by: BTreeMap::new(),
        }
    }

    pub fn screen(&self) -> Rect {
        self.screen
    }

    pub fn sticky(&self) -> Rect {
        self.sticky
    }

    pub fn observes(&self) -> bool {
        self.observes
    }

    pub fn sees(&self, token: ActorToken) -> bool {
        self.sees.contains_key(&token)
    }

    pub fn seen_by(&self, token: ActorToken) -> bool {
        self.seen_by.contains_key(&token)
    }

    pub fn sees_count(&self) -> usize {
        self.sees.len()
    }

    /// Live observers, for broadcasting.
    pub fn observers(&self) -> impl Iterator<Item = ActorRef> + '_ {
        self.seen_by.values().filter_map(ViewEntry::get)
    }

    /// Change the view half sizes. The sticky rectangle is rebuilt on the
    /// next [`ViewState::update`].
    pub fn set_range(&mut self, half_w: Coord, half_h: Coord) {
        self.half_w = half_w.max(1);
        self.half_h = half_h.max(1);
        self.sticky = Rect::default();
    }

    /// Recompute the rectangles for position `pos`. Returns `true` when the
    /// sticky rectangle moved.
    pub fn update(&mut self, pos: GridPos) -> bool {
        self.screen = Rect::around(pos, self.half_w, self.half_h);
        if self.sticky.contains_rect(&self.screen) {
            return false;
        }
        self.sticky = Rect::around(pos, self.half_w + self.margin, self.half_h + self.margin);
        true
    }

    /// Full refresh for actor `me` against interest-index `candidates`.
    pub fn refresh(&mut self, me: &ActorRef, candidates: &[ActorRef]) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        let my_token = me.token();
        let my_zone = me.core().zone_id();
        let my_pos = me.pos();

        // Exit: targets this actor no longer sees.
        if self.observes {
            let sticky = self.sticky;
            let gone: Vec<ActorToken> = self
                .sees
                .iter()
                .filter(|(_, entry)| match entry.get() {
                    None => true,
                    Some(t) => t.core().zone_id() != my_zone || !sticky.contains(t.pos()),
                })
                .map(|(token, _)| *token)
                .collect();
            for token in gone {
                if let Some(entry) = self.sees.remove(&token) {
                    if let Some(target) = entry.link.upgrade() {
                        target.drop_observer(my_token);
                    }
                    events.push(ViewEvent::Exited {
                        token,
                        id: entry.id,
                        kind: entry.kind,
                    });
                }
            }
        }

        // Exit: observers that no longer see this actor.
        let lost: Vec<ActorToken> = self
            .seen_by
            .iter()
            .filter(|(_, entry)| match entry.get() {
                None => true,
                Some(o) => o.core().zone_id() != my_zone || !o.core().sticky().contains(my_pos),
            })
            .map(|(token, _)| *token)
            .collect();
        for token in lost {
            if let Some(entry) = self.seen_by.remove(&token) {
                if let Some(observer) = entry.link.upgrade() {
                    observer.exit_view(my_token);
                }
            }
        }

        // Enter.
        for candidate in candidates {
            let token = candidate.token();
            if token == my_token || candidate.is_destroyed() || candidate.core().zone_id() != my_zone {
                continue;
            }
            if let Some(event) = self.observe(me, candidate) {
                events.push(event);
            }
            if candidate.kind() == ActorKind::Player
                && !self.seen_by.contains_key(&token)
                && candidate.core().sticky().contains(my_pos)
            {
                candidate.observe(me.clone());
            }
        }
        events
    }

    /// Membership-checked insert of `target` into `sees`.
    pub fn observe(&mut self, me: &ActorRef, target: &ActorRef) -> Option<ViewEvent> {
        if !self.observes
            || target.token() == me.token()
            || target.is_destroyed()
            || self.sees.contains_key(&target.token())
            || !self.sticky.contains(target.pos())
        {
            return None;
        }
        self.sees.insert(target.token(), ViewEntry::of(target));
        target.entered_by(me.clone());
        Some(ViewEvent::Entered(target.clone()))
    }

    pub fn entered_by(&mut self, observer: &ActorRef) {
        self.seen_by
            .entry(observer.token())
            .or_insert_with(|| ViewEntry::of(observer));
    }

    /// `target` reported leaving. Produces the exit event only if it was seen.
    pub fn exit_view(&mut self, target: ActorToken) -> Option<ViewEvent> {
        self.sees.remove(&target).map(|entry| ViewEvent::Exited {
            token: target,
            id: entry.id,
            kind: entry.kind,
        })
    }

    pub fn drop_observer(&mut self, observer: ActorToken) {
        self.seen_by.remove(&observer);
    }

    /// Tell everyone on both sides that this actor is leaving, then forget
    /// them all.
    pub fn teardown(&mut self, me: ActorToken) {
        for entry in std::mem::take(&mut self.sees).into_values() {
            if let Some(target) = entry.link.upgrade() {
                target.drop_observer(me);
            }
        }
        for entry in std::mem::take(&mut self.seen_by).into_values() {
            if let Some(observer) = entry.link.upgrade() {
                observer.exit_view(me);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use emberfall_grid::geom::Vec3;
    use tokio::time::Instant;

    use crate::actor::{Actor, ActorCore};
    use crate::buff::BuffDef;
    use crate::outbound::Outbound;

    /// Records calls instead of queueing them.
    struct Probe {
        core: ActorCore,
        calls: Mutex<Vec<String>>,
    }

    impl Probe {
        fn new(kind: ActorKind, pos: GridPos, sticky: Rect) -> Arc<Self> {
            let core = ActorCore::new(1, kind, "probe", Vec3::new(pos.x, pos.y, 0));
            core.publish_sticky(sticky);
            core.set_zone(1);
            core.publish_life(10, 10);
            Arc::new(Self {
                core,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Actor for Probe {
        fn core(&self) -> &ActorCore {
            &self.core
        }
        fn advance(&self, _now: Instant, _elapsed_ms: u64) {}
        fn refresh_view(&self, _candidates: Vec<ActorRef>) {}
        fn observe(&self, target: ActorRef) {
            self.log(format!("observe {}", target.token()));
        }
        fn exit_view(&self, target: ActorToken) {
            self.log(format!("exit_view {target}"));
        }
        fn drop_observer(&self, observer: ActorToken) {
            self.log(format!("drop_observer {observer}"));
        }
        fn entered_by(&self, observer: ActorRef) {
            self.log(format!("entered_by {}", observer.token()));
        }
        fn apply_damage(&self, _amount: i32, _source: Option<ActorRef>) {}
        fn add_buff(&self, _def: BuffDef) {}
        fn deliver(&self, _msg: Outbound) {}
        fn broadcast(&self, _msg: Outbound, _include_self: bool) {}
        fn send_trace_to(&self, _viewer: ActorRef) {}
        fn destroy(&self) {
            self.core.mark_destroyed();
        }
    }

    fn r(probe: &Arc<Probe>) -> ActorRef {
        probe.clone()
    }

    fn player_view(pos: GridPos) -> ViewState {
        let mut view = ViewState::new(&ViewConfig::default(), true);
        view.update(pos);
        view
    }

    fn entered(events: &[ViewEvent]) -> usize {
        events.iter().filter(|e| matches!(e, ViewEvent::Entered(_))).count()
    }

    fn exited(events: &[ViewEvent]) -> usize {
        events.iter().filter(|e| matches!(e, ViewEvent::Exited { .. })).count()
    }

    #[test]
    fn sticky_rect_only_recentres_when_screen_leaves_it() {
        let mut view = ViewState::new(&ViewConfig::default(), true);
        assert!(view.update(GridPos::new(100, 100)));
        assert_eq!(view.sticky(), Rect::new(60, 60, 80, 80));
        assert!(!view.update(GridPos::new(105, 95)));
        assert_eq!(view.screen(), Rect::new(75, 65, 60, 60));
        assert!(view.update(GridPos::new(111, 100)));
        assert_eq!(view.sticky(), Rect::new(71, 60, 80, 80));
    }

    #[test]
    fn enter_is_reported_once_across_refreshes() {
        let me_pos = GridPos::new(100, 100);
        let mut view = player_view(me_pos);
        let me: ActorRef = Probe::new(ActorKind::Player, me_pos, view.sticky());
        let wolf = Probe::new(ActorKind::Monster, GridPos::new(110, 110), Rect::default());
        let candidates = vec![me.clone(), r(&wolf)];

        let first = view.refresh(&me, &candidates);
        let second = view.refresh(&me, &candidates);
        assert_eq!(entered(&first), 1);
        assert!(second.is_empty());
        assert!(view.sees(wolf.token()));
        assert_eq!(wolf.calls(), vec![format!("entered_by {}", me.token())]);
    }

    #[test]
    fn leaving_the_sticky_rect_exits_once() {
        let me_pos = GridPos::new(100, 100);
        let mut view = player_view(me_pos);
        let me: ActorRef = Probe::new(ActorKind::Player, me_pos, view.sticky());
        let wolf = Probe::new(ActorKind::Monster, GridPos::new(110, 110), Rect::default());
        let candidates = vec![r(&wolf)];
        view.refresh(&me, &candidates);

        wolf.core.publish_pos(GridPos::new(300, 300));
        let events = view.refresh(&me, &candidates);
        assert_eq!(exited(&events), 1);
        assert!(view.refresh(&me, &candidates).is_empty());
        assert!(wolf.calls().contains(&format!("drop_observer {}", me.token())));
        // An exit report arriving by the other route is ignored.
        assert!(view.exit_view(wolf.token()).is_none());
    }

    #[test]
    fn players_whose_sticky_rect_covers_me_are_asked_to_observe() {
        let me_pos = GridPos::new(100, 100);
        let mut view = ViewState::new(&ViewConfig::default(), false);
        view.update(me_pos);
        let me: ActorRef = Probe::new(ActorKind::Monster, me_pos, view.sticky());
        let near = Probe::new(ActorKind::Player, GridPos::new(120, 100), Rect::new(80, 60, 80, 80));
        let far = Probe::new(ActorKind::Player, GridPos::new(135, 100), Rect::new(101, 60, 80, 80));
        let events = view.refresh(&me, &[r(&near), r(&far)]);

        assert!(events.is_empty(), "monsters never get view events");
        assert_eq!(near.calls(), vec![format!("observe {}", me.token())]);
        assert!(far.calls().is_empty());
    }

    #[test]
    fn departed_observers_are_told_to_exit() {
        let me_pos = GridPos::new(100, 100);
        let mut view = ViewState::new(&ViewConfig::default(), false);
        view.update(me_pos);
        let me: ActorRef = Probe::new(ActorKind::Monster, me_pos, view.sticky());
        let hero = Probe::new(ActorKind::Player, GridPos::new(120, 100), Rect::new(80, 60, 80, 80));
        view.entered_by(&r(&hero));
        assert!(view.seen_by(hero.token()));

        hero.core.publish_sticky(Rect::new(200, 200, 80, 80));
        view.refresh(&me, &[]);
        assert!(!view.seen_by(hero.token()));
        assert_eq!(hero.calls(), vec![format!("exit_view {}", me.token())]);
    }

    #[test]
    fn destroyed_targets_exit_and_teardown_notifies_both_sides() {
        let me_pos = GridPos::new(100, 100);
        let mut view = player_view(me_pos);
        let me: ActorRef = Probe::new(ActorKind::Player, me_pos, view.sticky());
        let a = Probe::new(ActorKind::Monster, GridPos::new(101, 101), Rect::default());
        let b = Probe::new(ActorKind::Monster, GridPos::new(102, 102), Rect::default());
        view.refresh(&me, &[r(&a), r(&b)]);
        assert_eq!(view.sees_count(), 2);

        a.destroy();
        let events = view.refresh(&me, &[]);
        assert_eq!(exited(&events), 1);

        let watcher: ActorRef = Probe::new(ActorKind::Player, GridPos::new(90, 90), Rect::new(50, 50, 80, 80));
        view.entered_by(&watcher);
        view.teardown(me.token());
        assert_eq!(view.sees_count(), 0);
        assert!(b.calls().contains(&format!("drop_observer {}", me.token())));
        assert!(!view.seen_by(watcher.token()));
    }
}
