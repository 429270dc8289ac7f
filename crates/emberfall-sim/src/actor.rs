//! Actor identity, published state and the capability trait.
//!
//! An actor is split in two:
//!
//! - [`ActorCore`] is shared (`Arc`) and holds identity plus the handful of
//!   values other actors read without asking: position, sticky view
//!   rectangle, life, defense, offline flag and zone id. Only the owning
//!   actor writes them, through atomics, so reads never block.
//! - The private state `S` lives inside the actor's task loop and is only
//!   reachable through its [`Mailbox`].
//!
//! [`ActorHandle`] ties the two together. Through the blanket
//! `impl Actor for ActorHandle<S>`, every kind of actor is usable as an
//! [`ActorRef`] (`Arc<dyn Actor>`). Combat, spells and visibility then talk to
//! "an actor" with one virtual call and never switch on the concrete kind.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use emberfall_grid::geom::{GridPos, Rect, Vec3};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::buff::BuffDef;
use crate::mailbox::Mailbox;
use crate::outbound::Outbound;

/// Strong reference to any actor.
pub type ActorRef = Arc<dyn Actor>;

/// Membership-only reference held in visibility sets.
pub type WeakActor = Weak<dyn Actor>;

// ---------------------------------------------------------------------------
// ActorKind / ActorToken
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Player,
    Monster,
    Spell,
}

/// Process-local unique actor key. Never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl ActorToken {
    pub fn allocate() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ActorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ActorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ActorCore
// ---------------------------------------------------------------------------

/// Identity plus the lock-free published view of an actor.
#[derive(Debug)]
pub struct ActorCore {
    id: i64,
    token: ActorToken,
    kind: ActorKind,
    name: String,
    pos: AtomicU64,
    z: AtomicI32,
    sticky: AtomicU64,
    life: AtomicI32,
    max_life: AtomicI32,
    defense: AtomicI32,
    offline: AtomicBool,
    destroyed: AtomicBool,
    zone: AtomicI64,
}

impl ActorCore {
    pub fn new(id: i64, kind: ActorKind, name: impl Into<String>, pos: Vec3) -> Self {
        Self {
            id,
            token: ActorToken::allocate(),
            kind,
            name: name.into(),
            pos: AtomicU64::new(pos.grid().to_bits()),
            z: AtomicI32::new(pos.z),
            sticky: AtomicU64::new(Rect::default().to_bits()),
            life: AtomicI32::new(0),
            max_life: AtomicI32::new(0),
            defense: AtomicI32::new(0),
            offline: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            zone: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn token(&self) -> ActorToken {
        self.token
    }

    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pos(&self) -> GridPos {
        GridPos::from_bits(self.pos.load(Ordering::Acquire))
    }

    pub fn pos3(&self) -> Vec3 {
        let p = self.pos();
        Vec3::new(p.x, p.y, self.z.load(Ordering::Relaxed))
    }

    pub fn sticky(&self) -> Rect {
        Rect::from_bits(self.sticky.load(Ordering::Acquire))
    }

    pub fn life(&self) -> i32 {
        self.life.load(Ordering::Acquire)
    }

    pub fn max_life(&self) -> i32 {
        self.max_life.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.life() > 0
    }

    pub fn defense(&self) -> i32 {
        self.defense.load(Ordering::Relaxed)
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Zone the actor is registered with, `0` when none.
    pub fn zone_id(&self) -> i64 {
        self.zone.load(Ordering::Acquire)
    }

    // -- owner-only writers --------------------------------------------------

    pub fn publish_pos(&self, pos: GridPos) {
        self.pos.store(pos.to_bits(), Ordering::Release);
    }

    pub fn publish_z(&self, z: i32) {
        self.z.store(z, Ordering::Relaxed);
    }

    pub fn publish_sticky(&self, rect: Rect) {
        self.sticky.store(rect.to_bits(), Ordering::Release);
    }

    pub fn publish_life(&self, life: i32, max_life: i32) {
        self.max_life.store(max_life, Ordering::Relaxed);
        self.life.store(life, Ordering::Release);
    }

    pub fn publish_defense(&self, defense: i32) {
        self.defense.store(defense, Ordering::Relaxed);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn set_zone(&self, zone: i64) {
        self.zone.store(zone, Ordering::Release);
    }

    /// Returns `true` for the call that flipped the flag.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }
}

// ---------------------------------------------------------------------------
// ActorState
// ---------------------------------------------------------------------------

/// Behaviour of an actor's private state. Every method runs inside the
/// actor's own task loop; the defaults ignore the request.
#[allow(unused_variables)]
pub trait ActorState: Send + 'static {
    /// One zone tick. `elapsed_ms` is the time since the previous tick.
    fn advance(&mut self, now: Instant, elapsed_ms: u64) {}

    /// Zone-driven visibility pass with fresh interest-index candidates.
    fn refresh_view(&mut self, candidates: Vec<ActorRef>) {}

    /// Start seeing `target` if not already.
    fn observe(&mut self, target: ActorRef) {}

    /// `target` left this actor's view.
    fn exit_view(&mut self, target: ActorToken) {}

    /// `observer` no longer sees this actor.
    fn drop_observer(&mut self, observer: ActorToken) {}

    /// `observer` started seeing this actor.
    fn entered_by(&mut self, observer: ActorRef) {}

    /// Apply an already-resolved life change. Positive hurts, negative heals.
    fn apply_damage(&mut self, amount: i32, source: Option<ActorRef>) {}

    fn add_buff(&mut self, def: BuffDef) {}

    /// Hand a message to this actor's client, if it has one.
    fn deliver(&mut self, msg: Outbound) {}

    /// Send `msg` to every observer, and to this actor's own client when
    /// `include_self` is set.
    fn broadcast(&mut self, msg: Outbound, include_self: bool) {}

    /// Replay the rest of the current move to a new viewer.
    fn send_trace_to(&mut self, viewer: ActorRef) {}

    /// Final cleanup, queued by [`Actor::destroy`].
    fn teardown(&mut self) {}
}

// ---------------------------------------------------------------------------
// ActorHandle
// ---------------------------------------------------------------------------

/// Shared core plus the mailbox of an actor with state `S`.
pub struct ActorHandle<S> {
    core: Arc<ActorCore>,
    mailbox: Mailbox<S>,
}

impl<S> fmt::Debug for ActorHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("token", &self.core.token())
            .field("kind", &self.core.kind())
            .field("id", &self.core.id())
            .finish()
    }
}

impl<S: ActorState> ActorHandle<S> {
    pub fn new(core: Arc<ActorCore>, mailbox: Mailbox<S>) -> Self {
        Self { core, mailbox }
    }

    pub fn core(&self) -> &Arc<ActorCore> {
        &self.core
    }

    pub fn mailbox(&self) -> &Mailbox<S> {
        &self.mailbox
    }

    /// Queue `task` unless the actor has been destroyed. Tasks that were
    /// queued before destruction see the flag and skip.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.mailbox.submit(move |state| {
            if !core.is_destroyed() {
                task(state);
            }
        });
    }

    /// Run `f` in the actor and wait for the result.
    pub async fn ask<R, F>(&self, f: F) -> Result<R, crate::SimError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.core.is_destroyed() {
            return Err(crate::SimError::ActorDestroyed {
                actor: self.core.token().to_string(),
            });
        }
        self.mailbox.ask(f).await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// What one actor may ask of another. Object safe; see [`ActorRef`].
pub trait Actor: Send + Sync + 'static {
    fn core(&self) -> &ActorCore;

    fn token(&self) -> ActorToken {
        self.core().token()
    }

    fn kind(&self) -> ActorKind {
        self.core().kind()
    }

    fn pos(&self) -> GridPos {
        self.core().pos()
    }

    fn defense(&self) -> i32 {
        self.core().defense()
    }

    fn is_destroyed(&self) -> bool {
        self.core().is_destroyed()
    }

    fn advance(&self, now: Instant, elapsed_ms: u64);
    fn refresh_view(&self, candidates: Vec<ActorRef>);
    fn observe(&self, target: ActorRef);
    fn exit_view(&self, target: ActorToken);
    fn drop_observer(&self, observer: ActorToken);
    fn entered_by(&self, observer: ActorRef);
    fn apply_damage(&self, amount: i32, source: Option<ActorRef>);
    fn add_buff(&self, def: BuffDef);
    fn deliver(&self, msg: Outbound);
    fn broadcast(&self, msg: Outbound, include_self: bool);
    fn send_trace_to(&self, viewer: ActorRef);

    /// Stop the actor. Idempotent: the first call queues the final cleanup
    /// and closes the mailbox, later calls do nothing.
    fn destroy(&self);
}

impl<S: ActorState> Actor for ActorHandle<S> {
    fn core(&self) -> &ActorCore {
        &self.core
    }

    fn advance(&self, now: Instant, elapsed_ms: u64) {
        self.submit(move |s| s.advance(now, elapsed_ms));
    }

    fn refresh_view(&self, candidates: Vec<ActorRef>) {
        self.submit(move |s| s.refresh_view(candidates));
    }

    fn observe(&self, target: ActorRef) {
        self.submit(move |s| s.observe(target));
    }

    fn exit_view(&self, target: ActorToken) {
        self.submit(move |s| s.exit_view(target));
    }

    fn drop_observer(&self, observer: ActorToken) {
        self.submit(move |s| s.drop_observer(observer));
    }

    fn entered_by(&self, observer: ActorRef) {
        self.submit(move |s| s.entered_by(observer));
    }

    fn apply_damage(&self, amount: i32, source: Option<ActorRef>) {
        self.submit(move |s| s.apply_damage(amount, source));
    }

    fn add_buff(&self, def: BuffDef) {
        self.submit(move |s| s.add_buff(def));
    }

    fn deliver(&self, msg: Outbound) {
        self.submit(move |s| s.deliver(msg));
    }

    fn broadcast(&self, msg: Outbound, include_self: bool) {
        self.submit(move |s| s.broadcast(msg, include_self));
    }

    fn send_trace_to(&self, viewer: ActorRef) {
        self.submit(move |s| s.send_trace_to(viewer));
    }

    fn destroy(&self) {
        if self.core.mark_destroyed() {
            // Bypasses the destroyed guard in `submit` on purpose.
            self.mailbox.submit(|s: &mut S| s.teardown());
            self.mailbox.destroy();
        }
    }
}

impl fmt::Debug for dyn Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{}", self.kind(), self.token())
    }
}

/// Upgrade a weak actor reference, treating destroyed actors as gone.
pub fn live(link: &WeakActor) -> Option<ActorRef> {
    link.upgrade().filter(|actor| !actor.is_destroyed())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
