//! Per-actor task queues.
//!
//! A [`Mailbox`] is the only way to touch an actor's state. Callers submit
//! closures; the actor's [`Inbox`] runs them one at a time, in submission
//! order, on a single tokio task. Because nothing else ever holds `&mut S`,
//! the state needs no locks.
//!
//! Submission never blocks and never drops work: when the bounded queue is
//! full, the task is handed to a freshly spawned tokio task that waits for
//! room. This keeps an actor that submits to itself (or to a saturated peer)
//! from deadlocking.
//!
//! A task that panics is caught and logged. The loop carries on with the next
//! task.
//!
//! # Example
//!
//! ```
//! use emberfall_sim::mailbox::Mailbox;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (mailbox, inbox) = Mailbox::<Vec<u32>>::channel(8, "demo");
//! let worker = tokio::spawn(inbox.run(Vec::new()));
//! for n in 0..3 {
//!     mailbox.submit(move |log| log.push(n));
//! }
//! mailbox.destroy();
//! assert_eq!(worker.await.unwrap(), vec![0, 1, 2]);
//! # }
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, warn};

use crate::SimError;

/// A unit of work for an actor with state `S`.
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Lifecycle {
    label: &'static str,
    destroyed: AtomicBool,
    stop: Notify,
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Sending half of an actor's task queue. Cheap to clone.
pub struct Mailbox<S> {
    tx: mpsc::Sender<Task<S>>,
    life: Arc<Lifecycle>,
}

impl<S> Clone for Mailbox<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            life: Arc::clone(&self.life),
        }
    }
}

impl<S: 'static> std::fmt::Debug for Mailbox<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("label", &self.life.label)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<S: 'static> Mailbox<S> {
    /// Create a queue holding at most `capacity` pending tasks.
    pub fn channel(capacity: usize, label: &'static str) -> (Self, Inbox<S>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let life = Arc::new(Lifecycle {
            label,
            destroyed: AtomicBool::new(false),
            stop: Notify::new(),
        });
        (
            Self {
                tx,
                life: Arc::clone(&life),
            },
            Inbox { rx, life },
        )
    }

    /// Queue `task`. A no-op once the mailbox has been destroyed.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.submit_boxed(Box::new(task));
    }

    /// [`Mailbox::submit`] for a task that is already boxed.
    pub fn submit_boxed(&self, task: Task<S>) {
        if self.is_destroyed() {
            return;
        }
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                warn!(mailbox = self.life.label, "mailbox full, deferring submission");
                let tx = self.tx.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            let _ = tx.send(task).await;
                        });
                    }
                    Err(_) => {
                        std::thread::spawn(move || {
                            let _ = tx.blocking_send(task);
                        });
                    }
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(mailbox = self.life.label, "submission to a closed mailbox");
            }
        }
    }

    /// Run `f` inside the actor and wait for its result.
    pub async fn ask<R, F>(&self, f: F) -> Result<R, SimError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        self.submit(move |state| {
            let _ = reply.send(f(state));
        });
        answer.await.map_err(|_| SimError::ActorDestroyed {
            actor: self.life.label.to_owned(),
        })
    }

    /// Stop accepting work. Tasks already queued still run. Returns `true`
    /// for the call that actually destroyed the mailbox.
    pub fn destroy(&self) -> bool {
        let first = !self.life.destroyed.swap(true, Ordering::AcqRel);
        if first {
            self.life.stop.notify_one();
        }
        first
    }

    /// Set once [`Mailbox::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.life.destroyed.load(Ordering::Acquire)
    }

    /// Name used in log lines.
    pub fn label(&self) -> &'static str {
        self.life.label
    }

    /// A handle that does not keep the queue open.
    pub fn downgrade(&self) -> WeakMailbox<S> {
        WeakMailbox {
            tx: self.tx.downgrade(),
            life: Arc::clone(&self.life),
        }
    }
}

// ---------------------------------------------------------------------------
// WeakMailbox
// ---------------------------------------------------------------------------

/// Non-owning mailbox reference. Used for back-references (actor to zone)
/// so the owner's lifetime alone decides when its queue closes.
pub struct WeakMailbox<S> {
    tx: mpsc::WeakSender<Task<S>>,
    life: Arc<Lifecycle>,
}

impl<S> Clone for WeakMailbox<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            life: Arc::clone(&self.life),
        }
    }
}

impl<S> std::fmt::Debug for WeakMailbox<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakMailbox").field("label", &self.life.label).finish()
    }
}

impl<S: 'static> WeakMailbox<S> {
    pub fn upgrade(&self) -> Option<Mailbox<S>> {
        if self.life.destroyed.load(Ordering::Acquire) {
            return None;
        }
        self.tx.upgrade().map(|tx| Mailbox {
            tx,
            life: Arc::clone(&self.life),
        })
    }

    /// Submit if the owner is still alive. Returns whether the task was queued.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        match self.upgrade() {
            Some(mailbox) => {
                mailbox.submit(task);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Receiving half of an actor's task queue.
pub struct Inbox<S> {
    rx: mpsc::Receiver<Task<S>>,
    life: Arc<Lifecycle>,
}

impl<S: 'static> Inbox<S> {
    /// Next task, or `None` once the mailbox is destroyed and drained (or
    /// every sender is gone).
    pub async fn recv(&mut self) -> Option<Task<S>> {
        if self.life.destroyed.load(Ordering::Acquire) {
            self.rx.close();
            return self.rx.recv().await;
        }
        tokio::select! {
            biased;
            _ = self.life.stop.notified() => {
                self.rx.close();
                self.rx.recv().await
            }
            task = self.rx.recv() => task,
        }
    }

    /// Name of the mailbox feeding this inbox.
    pub fn label(&self) -> &'static str {
        self.life.label
    }

    /// Process tasks until the mailbox is destroyed and drained, then hand the
    /// state back.
    pub async fn run(mut self, mut state: S) -> S {
        while let Some(task) = self.recv().await {
            execute(self.life.label, task, &mut state);
        }
        debug!(mailbox = self.life.label, "mailbox drained");
        state
    }
}

/// Run one task, containing any panic it raises.
pub fn execute<S>(label: &'static str, task: Task<S>, state: &mut S) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task(state))) {
        error!(mailbox = label, panic = panic_message(payload.as_ref()), "task panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Poll the log length until it reaches `want` or the retries run out.
    async fn settle(mailbox: &Mailbox<Vec<u32>>, want: usize) -> usize {
        let mut len = 0;
        for _ in 0..100 {
            len = mailbox.ask(|log: &mut Vec<u32>| log.len()).await.unwrap();
            if len == want {
                break;
            }
            tokio::task::yield_now().await;
        }
        len
    }

    #[tokio::test]
    async fn debug_output_shows_label_and_lifecycle() {
        let (mailbox, _inbox) = Mailbox::<Vec<u32>>::channel(4, "debug");
        assert_eq!(format!("{mailbox:?}"), r#"Mailbox { label: "debug", destroyed: false }"#);
        mailbox.destroy();
        assert!(format!("{mailbox:?}").contains("destroyed: true"));
        assert_eq!(mailbox.label(), "debug");
    }

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let (mailbox, inbox) = Mailbox::<Vec<u32>>::channel(64, "order");
        let worker = tokio::spawn(inbox.run(Vec::new()));
        for n in 0..50 {
            mailbox.submit(move |log| log.push(n));
        }
        mailbox.destroy();
        let log = worker.await.unwrap();
        assert_eq!(log, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_task_does_not_stop_the_loop() {
        let (mailbox, inbox) = Mailbox::<Vec<&'static str>>::channel(8, "panic");
        let worker = tokio::spawn(inbox.run(Vec::new()));
        mailbox.submit(|log| log.push("before"));
        mailbox.submit(|_| panic!("boom"));
        mailbox.submit(|log| log.push("after"));
        mailbox.destroy();
        assert_eq!(worker.await.unwrap(), vec!["before", "after"]);
    }

    #[tokio::test]
    async fn submit_after_destroy_is_a_noop() {
        let (mailbox, inbox) = Mailbox::<u32>::channel(8, "destroy");
        let worker = tokio::spawn(inbox.run(0));
        mailbox.submit(|n| *n += 1);
        assert!(mailbox.destroy());
        assert!(!mailbox.destroy());
        mailbox.submit(|n| *n += 100);
        assert_eq!(worker.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn full_queue_defers_instead_of_dropping() {
        let (mailbox, inbox) = Mailbox::<Vec<u32>>::channel(2, "full");
        // Nothing is draining yet, so most of these overflow.
        for n in 0..10 {
            mailbox.submit(move |log| log.push(n));
        }
        let worker = tokio::spawn(inbox.run(Vec::new()));
        let total = settle(&mailbox, 10).await;
        mailbox.destroy();
        let mut log = worker.await.unwrap();
        log.sort_unstable();
        assert_eq!(total, 10);
        assert_eq!(log, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn self_submission_from_a_full_queue_does_not_deadlock() {
        let (mailbox, inbox) = Mailbox::<Vec<u32>>::channel(1, "self");
        let worker = tokio::spawn(inbox.run(Vec::new()));
        let inner = mailbox.clone();
        mailbox.submit(move |log| {
            log.push(0);
            for n in 1..5 {
                inner.submit(move |log| log.push(n));
            }
        });
        assert_eq!(settle(&mailbox, 5).await, 5);
        mailbox.destroy();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn ask_on_destroyed_mailbox_fails() {
        let (mailbox, inbox) = Mailbox::<u32>::channel(4, "ask");
        let worker = tokio::spawn(inbox.run(7));
        assert_eq!(mailbox.ask(|n: &mut u32| *n).await.unwrap(), 7);
        mailbox.destroy();
        worker.await.unwrap();
        assert!(matches!(
            mailbox.ask(|n: &mut u32| *n).await,
            Err(SimError::ActorDestroyed { .. })
        ));
    }

    #[tokio::test]
    async fn weak_mailbox_stops_upgrading_after_destroy() {
        let (mailbox, inbox) = Mailbox::<u32>::channel(4, "weak");
        let worker = tokio::spawn(inbox.run(0));
        let weak = mailbox.downgrade();
        assert!(weak.submit(|n| *n += 1));
        mailbox.destroy();
        assert!(!weak.submit(|n| *n += 1));
        assert_eq!(worker.await.unwrap(), 1);
    }
}
