//! Reply correlation — matching asynchronous `responce` packets to
//! outstanding requests.
//!
//! Every send-with-reply registers its fresh `pID` here and gets back a
//! [`PendingReply`] awaitable. A one-shot timer task races the matching
//! `responce`: whichever removes the map entry first delivers the terminal
//! outcome, so exactly one of resolve/timeout ever fires and the loser is a
//! no-op. The awaitable is cloneable, so several observers can wait on the
//! same outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

use wslink_core::PacketId;

/// Terminal failure of an awaited reply.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// No matching `responce` arrived within the timeout window.
    #[error("no reply before timeout")]
    TimedOut,
    /// The request was abandoned before any outcome was delivered.
    #[error("request abandoned before reply")]
    Abandoned,
}

type ReplyOutcome = Result<Option<Value>, ReplyError>;
type ReplyTx = oneshot::Sender<ReplyOutcome>;

/// The awaiting set: outstanding requests keyed by their `pID`.
///
/// Mutations (new sends, resolution, timeout) go through the inner mutex, so
/// they are serialized regardless of which task performs them. Entries that
/// outlive their connection are not cancelled early — their own timers still
/// time them out.
pub struct ReplyRegistry {
    pending: Arc<Mutex<HashMap<PacketId, ReplyTx>>>,
}

impl ReplyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register an outstanding request and start its timeout clock.
    ///
    /// Must be called from within a tokio runtime (the timeout is a spawned
    /// one-shot task).
    pub fn register(&self, pid: PacketId, timeout: Duration) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(pid.clone(), tx);

        let pending = Arc::clone(&self.pending);
        let _ = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = pending.lock().remove(&pid) {
                trace!(pid = %pid, "reply timed out");
                let _ = tx.send(Err(ReplyError::TimedOut));
            }
        });

        PendingReply::new(rx)
    }

    /// Try to resolve an outstanding request with an incoming reply.
    ///
    /// Returns `true` and delivers `data` to the awaiter if `org_pid` matches
    /// an outstanding request; otherwise leaves the set untouched and returns
    /// `false`.
    pub fn resolve(&self, org_pid: &str, data: Option<Value>) -> bool {
        let key = PacketId::from(org_pid);
        match self.pending.lock().remove(&key) {
            Some(tx) => {
                let _ = tx.send(Ok(data));
                true
            }
            None => false,
        }
    }

    /// Drop an outstanding request without delivering an outcome.
    ///
    /// Used when the transmission itself failed and the caller is told
    /// synchronously instead.
    pub fn discard(&self, pid: &PacketId) {
        let _ = self.pending.lock().remove(pid);
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no requests are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for ReplyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable handle for one outstanding request.
///
/// Cloneable: any number of observers may attach before (or after) the
/// outcome lands, and every clone resolves to the same outcome.
#[derive(Clone)]
pub struct PendingReply {
    outcome: Shared<BoxFuture<'static, ReplyOutcome>>,
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").finish_non_exhaustive()
    }
}

impl PendingReply {
    fn new(rx: oneshot::Receiver<ReplyOutcome>) -> Self {
        let outcome = async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(ReplyError::Abandoned),
            }
        }
        .boxed()
        .shared();
        Self { outcome }
    }

    /// Suspend until the reply arrives or the timeout fires.
    pub async fn await_reply(&self) -> Result<Option<Value>, ReplyError> {
        self.outcome.clone().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(5000);

    #[tokio::test]
    async fn resolve_delivers_payload() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let pending = registry.register(pid.clone(), TIMEOUT);

        assert!(registry.resolve(pid.as_str(), Some(json!("hello"))));
        let data = pending.await_reply().await.unwrap();
        assert_eq!(data, Some(json!("hello")));
    }

    #[tokio::test]
    async fn resolve_removes_from_awaiting_set() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let _pending = registry.register(pid.clone(), TIMEOUT);
        assert_eq!(registry.len(), 1);

        assert!(registry.resolve(pid.as_str(), None));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_org_pid_is_noop() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let _pending = registry.register(pid, TIMEOUT);

        assert!(!registry.resolve("no-such-request", Some(json!(1))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_without_reply() {
        let registry = ReplyRegistry::new();
        let pending = registry.register(PacketId::new(), TIMEOUT);

        let err = pending.await_reply().await.unwrap_err();
        assert_eq!(err, ReplyError::TimedOut);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_after_timeout_is_noop() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let pending = registry.register(pid.clone(), TIMEOUT);

        assert_eq!(pending.await_reply().await, Err(ReplyError::TimedOut));
        assert!(!registry.resolve(pid.as_str(), Some(json!(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_after_resolve_is_noop() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let pending = registry.register(pid.clone(), TIMEOUT);

        assert!(registry.resolve(pid.as_str(), Some(json!(42))));
        // Let the timer fire; the entry is already gone.
        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;
        assert_eq!(pending.await_reply().await, Ok(Some(json!(42))));
    }

    #[tokio::test]
    async fn double_resolve_second_returns_false() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let _pending = registry.register(pid.clone(), TIMEOUT);

        assert!(registry.resolve(pid.as_str(), None));
        assert!(!registry.resolve(pid.as_str(), None));
    }

    #[tokio::test]
    async fn many_outstanding_no_crosstalk() {
        let registry = ReplyRegistry::new();
        let pid_a = PacketId::new();
        let pid_b = PacketId::new();
        let pending_a = registry.register(pid_a.clone(), TIMEOUT);
        let pending_b = registry.register(pid_b.clone(), TIMEOUT);

        assert!(registry.resolve(pid_b.as_str(), Some(json!("b"))));
        assert_eq!(pending_b.await_reply().await, Ok(Some(json!("b"))));
        assert_eq!(registry.len(), 1);

        assert!(registry.resolve(pid_a.as_str(), Some(json!("a"))));
        assert_eq!(pending_a.await_reply().await, Ok(Some(json!("a"))));
    }

    #[tokio::test]
    async fn discard_abandons_the_awaitable() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let pending = registry.register(pid.clone(), TIMEOUT);

        registry.discard(&pid);
        assert!(registry.is_empty());
        assert_eq!(pending.await_reply().await, Err(ReplyError::Abandoned));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_survive_and_time_out_on_their_own_clock() {
        // A correlator abandoned by its connection still reaches a terminal
        // outcome via its own timer.
        let registry = ReplyRegistry::new();
        let pending = registry.register(PacketId::new(), Duration::from_millis(100));
        drop(registry);
        assert_eq!(pending.await_reply().await, Err(ReplyError::TimedOut));
    }

    #[tokio::test]
    async fn multiple_observers_see_the_same_outcome() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let pending = registry.register(pid.clone(), TIMEOUT);
        let second = pending.clone();

        // One observer parks before the reply lands
        let waiter = tokio::spawn(async move { second.await_reply().await });
        tokio::task::yield_now().await;

        assert!(registry.resolve(pid.as_str(), Some(json!("shared"))));
        assert_eq!(pending.await_reply().await, Ok(Some(json!("shared"))));
        assert_eq!(waiter.await.unwrap(), Ok(Some(json!("shared"))));
    }

    #[tokio::test]
    async fn observer_attached_after_completion_gets_outcome() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let pending = registry.register(pid.clone(), TIMEOUT);

        assert!(registry.resolve(pid.as_str(), Some(json!(7))));
        assert_eq!(pending.await_reply().await, Ok(Some(json!(7))));

        let late = pending.clone();
        assert_eq!(late.await_reply().await, Ok(Some(json!(7))));
    }

    #[tokio::test]
    async fn resolve_with_no_data_delivers_none() {
        let registry = ReplyRegistry::new();
        let pid = PacketId::new();
        let pending = registry.register(pid.clone(), TIMEOUT);

        assert!(registry.resolve(pid.as_str(), None));
        assert_eq!(pending.await_reply().await, Ok(None));
    }
}
