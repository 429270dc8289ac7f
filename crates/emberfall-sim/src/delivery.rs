//! Outbound delivery to one client session.
//!
//! Each player owns a delivery task fed through a bounded queue. Messages are
//! pushed one by one while the session keeps up. The first failed push flips
//! the task into merge mode: messages accumulate and are sent as a single
//! `onMergeMessages` push once the merge window closes or enough of them are
//! queued. A merged push is retried with a fixed backoff. When it finally
//! lands the task goes back to direct pushes.
//!
//! All thresholds come from [`DeliveryConfig`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::boundary::Session;
use crate::config::DeliveryConfig;
use crate::outbound::{Outbound, Routed};
use crate::TransportError;

/// Sending side of a player's delivery queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

impl Outbox {
    /// Start a delivery task for `session`.
    pub fn spawn(session: Arc<dyn Session>, config: DeliveryConfig, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(Delivery::new(session, config).run(rx));
        Self { tx }
    }

    /// Queue a message. A full queue defers the send to a background task
    /// rather than blocking the caller.
    pub fn send(&self, msg: Outbound) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(msg).await;
                });
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

struct Delivery {
    session: Arc<dyn Session>,
    config: DeliveryConfig,
    pending: Vec<Routed>,
    /// Set while in merge mode: when the current batch must go out.
    flush_at: Option<Instant>,
}

enum Flow {
    Continue,
    Stop,
}

impl Delivery {
    fn new(session: Arc<dyn Session>, config: DeliveryConfig) -> Self {
        Self {
            session,
            config,
            pending: Vec::new(),
            flush_at: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Outbound>) {
        loop {
            let flow = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.accept(msg).await,
                    None => {
                        if !self.pending.is_empty() {
                            self.flush().await;
                        }
                        Flow::Stop
                    }
                },
                _ = sleep_until(self.flush_at.unwrap_or_else(Instant::now)), if self.flush_at.is_some() => {
                    self.flush().await
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        debug!(session = self.session.id(), "delivery stopped");
    }

    async fn accept(&mut self, msg: Outbound) -> Flow {
        let route = msg.route();
        if self.flush_at.is_some() {
            self.pending.push(Routed { route, body: msg });
            if self.pending.len() >= self.config.merge_flush_threshold {
                return self.flush().await;
            }
            return Flow::Continue;
        }
        match self.session.push(route, &msg) {
            Ok(()) => Flow::Continue,
            Err(TransportError::Closed { .. }) => Flow::Stop,
            Err(e) => {
                warn!(session = self.session.id(), error = %e, "push failed, switching to merged delivery");
                self.pending.push(Routed { route, body: msg });
                self.flush_at = Some(Instant::now() + Duration::from_millis(self.config.merge_window_ms));
                Flow::Continue
            }
        }
    }

    /// Send everything pending as one merged push.
    async fn flush(&mut self) -> Flow {
        let batch = Outbound::Merged {
            messages: std::mem::take(&mut self.pending),
        };
        let route = batch.route();
        let mut attempt = 0u32;
        loop {
            match self.session.push(route, &batch) {
                Ok(()) => {
                    self.flush_at = None;
                    return Flow::Continue;
                }
                Err(TransportError::Closed { .. }) => return Flow::Stop,
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        error!(
                            session = self.session.id(),
                            error = %e,
                            attempts = attempt,
                            "dropping merged batch"
                        );
                        self.flush_at = None;
                        return Flow::Continue;
                    }
                    if attempt > self.config.warn_after_retries {
                        warn!(session = self.session.id(), error = %e, attempt, "merged push still failing");
                    }
                    sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
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
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::actor::ActorToken;

    /// Fails the first `failures` pushes, records the rest.
    struct Flaky {
        failures: AtomicU32,
        routes: Mutex<Vec<(&'static str, usize)>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                routes: Mutex::new(Vec::new()),
            })
        }
    }

    impl Session for Flaky {
        fn id(&self) -> i64 {
            1
        }

        fn push(&self, route: &'static str, msg: &Outbound) -> Result<(), TransportError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::Congested { session: 1 });
            }
            let size = match msg {
                Outbound::Merged { messages } => messages.len(),
                _ => 1,
            };
            self.routes.lock().unwrap().push((route, size));
            Ok(())
        }

        fn rpc(&self, method: &str, _payload: serde_json::Value) -> Result<serde_json::Value, TransportError> {
            Err(TransportError::Rpc {
                method: method.into(),
                details: "unsupported".into(),
            })
        }

        fn close(&self) {}
    }

    fn die() -> Outbound {
        Outbound::EntityDie {
            entity_id: ActorToken::allocate(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn direct_pushes_while_the_session_keeps_up() {
        let session = Flaky::new(0);
        let outbox = Outbox::spawn(session.clone(), DeliveryConfig::default(), 16);
        outbox.send(die());
        outbox.send(die());
        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            *session.routes.lock().unwrap(),
            vec![("onEntityDie", 1), ("onEntityDie", 1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_switches_to_merged_batches() {
        let session = Flaky::new(1);
        let outbox = Outbox::spawn(session.clone(), DeliveryConfig::default(), 16);
        for _ in 0..4 {
            outbox.send(die());
        }
        sleep(Duration::from_millis(50)).await;
        assert!(session.routes.lock().unwrap().is_empty());
        sleep(Duration::from_millis(100)).await;
        assert_eq!(*session.routes.lock().unwrap(), vec![("onMergeMessages", 4)]);

        // Back to direct pushes afterwards.
        outbox.send(die());
        sleep(Duration::from_millis(10)).await;
        assert_eq!(session.routes.lock().unwrap().last(), Some(&("onEntityDie", 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_flushes_before_the_window() {
        let session = Flaky::new(1);
        let config = DeliveryConfig {
            merge_flush_threshold: 3,
            merge_window_ms: 10_000,
            ..DeliveryConfig::default()
        };
        let outbox = Outbox::spawn(session.clone(), config, 16);
        for _ in 0..3 {
            outbox.send(die());
        }
        sleep(Duration::from_millis(5)).await;
        assert_eq!(*session.routes.lock().unwrap(), vec![("onMergeMessages", 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn merged_push_retries_with_backoff() {
        // One failure triggers merge mode, three more fail the merged push.
        let session = Flaky::new(4);
        let outbox = Outbox::spawn(session.clone(), DeliveryConfig::default(), 16);
        outbox.send(die());
        outbox.send(die());
        sleep(Duration::from_millis(100 + 3 * 20 + 10)).await;
        assert_eq!(*session.routes.lock().unwrap(), vec![("onMergeMessages", 2)]);
    }
}
