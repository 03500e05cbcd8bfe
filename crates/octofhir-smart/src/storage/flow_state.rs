//! Flow state storage.
//!
//! Holds in-flight authorization attempts between the redirect and the
//! callback. Entries expire lazily on read; an optional sweeper evicts the
//! ones nobody comes back for.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::SmartResult;
use crate::error::SmartError;
use crate::oauth::FlowState;

/// Predicate deciding whether a stored flow may be taken.
pub type FlowPredicate<'p> = dyn for<'a> Fn(&'a FlowState) -> bool + Send + Sync + 'p;

/// Result of a conditional take.
#[derive(Debug)]
pub enum TakeOutcome {
    /// The entry matched and has been removed.
    Taken(FlowState),
    /// The entry exists but the predicate rejected it. It is left in place.
    Rejected,
    /// No live entry for the id.
    NotFound,
}

/// Storage trait for in-flight authorization flows.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    /// Stores a new flow under its `flow_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if a live flow already exists under the same id.
    async fn put(&self, flow: FlowState) -> SmartResult<()>;

    /// Returns the flow if it exists and has not expired.
    async fn get(&self, flow_id: &Uuid) -> SmartResult<Option<FlowState>>;

    /// Removes a flow. Returns `true` if something was removed.
    async fn delete(&self, flow_id: &Uuid) -> SmartResult<bool>;

    /// Atomically removes and returns the flow if `predicate` accepts it.
    ///
    /// Of several concurrent callers for the same id at most one gets
    /// `Taken`.
    async fn take_if(
        &self,
        flow_id: &Uuid,
        predicate: &FlowPredicate<'_>,
    ) -> SmartResult<TakeOutcome>;

    /// Removes all expired flows. Returns the number removed.
    async fn cleanup_expired(&self) -> SmartResult<usize>;
}

/// In-memory [`FlowStateStore`] backed by a sharded concurrent map.
///
/// Operations on different flow ids never contend on a global lock.
#[derive(Debug, Default)]
pub struct InMemoryFlowStateStore {
    flows: DashMap<Uuid, FlowState>,
}

impl InMemoryFlowStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    fn put_at(&self, flow: FlowState, now: OffsetDateTime) -> SmartResult<()> {
        match self.flows.entry(flow.flow_id) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired_at(now) {
                    existing.insert(flow);
                    Ok(())
                } else {
                    Err(SmartError::invalid_request(format!(
                        "Flow {} already exists",
                        flow.flow_id
                    )))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(flow);
                Ok(())
            }
        }
    }

    fn get_at(&self, flow_id: &Uuid, now: OffsetDateTime) -> Option<FlowState> {
        let flow = self.flows.get(flow_id)?.clone();
        if flow.is_expired_at(now) {
            self.flows
                .remove_if(flow_id, |_, f| f.is_expired_at(now));
            tracing::debug!("Evicted expired flow {}", flow_id);
            return None;
        }
        Some(flow)
    }

    fn take_if_at(
        &self,
        flow_id: &Uuid,
        now: OffsetDateTime,
        predicate: &FlowPredicate<'_>,
    ) -> TakeOutcome {
        // Expired entries are evicted without consulting the predicate.
        if self
            .flows
            .remove_if(flow_id, |_, f| f.is_expired_at(now))
            .is_some()
        {
            tracing::debug!("Evicted expired flow {}", flow_id);
            return TakeOutcome::NotFound;
        }

        match self.flows.remove_if(flow_id, |_, f| predicate(f)) {
            Some((_, flow)) => TakeOutcome::Taken(flow),
            None if self.flows.contains_key(flow_id) => TakeOutcome::Rejected,
            None => TakeOutcome::NotFound,
        }
    }

    fn cleanup_at(&self, now: OffsetDateTime) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, f| !f.is_expired_at(now));
        before.saturating_sub(self.flows.len())
    }
}

#[async_trait]
impl FlowStateStore for InMemoryFlowStateStore {
    async fn put(&self, flow: FlowState) -> SmartResult<()> {
        self.put_at(flow, OffsetDateTime::now_utc())
    }

    async fn get(&self, flow_id: &Uuid) -> SmartResult<Option<FlowState>> {
        Ok(self.get_at(flow_id, OffsetDateTime::now_utc()))
    }

    async fn delete(&self, flow_id: &Uuid) -> SmartResult<bool> {
        Ok(self.flows.remove(flow_id).is_some())
    }

    async fn take_if(
        &self,
        flow_id: &Uuid,
        predicate: &FlowPredicate<'_>,
    ) -> SmartResult<TakeOutcome> {
        Ok(self.take_if_at(flow_id, OffsetDateTime::now_utc(), predicate))
    }

    async fn cleanup_expired(&self) -> SmartResult<usize> {
        Ok(self.cleanup_at(OffsetDateTime::now_utc()))
    }
}

/// Spawns a task that calls `cleanup_expired` every `interval`.
///
/// The task runs until the returned handle is aborted.
pub fn spawn_flow_sweeper(store: Arc<dyn FlowStateStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Swept expired authorization flows"),
                Err(e) => tracing::warn!("Flow sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::flow::tests::sample_flow;
    use time::Duration as TimeDuration;

    fn accept_all(_: &FlowState) -> bool {
        true
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryFlowStateStore::new();
        let flow = sample_flow(TimeDuration::minutes(5));
        let id = flow.flow_id;

        store.put(flow).await.unwrap();
        let found = store.get(&id).await.unwrap().unwrap();
        assert_eq!(found.client_id, "abc");

        assert!(store.delete(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_put_is_rejected() {
        let store = InMemoryFlowStateStore::new();
        let flow = sample_flow(TimeDuration::minutes(5));
        store.put(flow.clone()).await.unwrap();
        assert!(matches!(
            store.put(flow).await,
            Err(SmartError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_get_exactly_at_expiry_is_not_found() {
        let store = InMemoryFlowStateStore::new();
        let flow = sample_flow(TimeDuration::minutes(5));
        let id = flow.flow_id;
        let expires_at = flow.expires_at;
        store.put_at(flow, OffsetDateTime::now_utc()).unwrap();

        assert!(
            store
                .get_at(&id, expires_at - TimeDuration::milliseconds(1))
                .is_some()
        );
        assert!(store.get_at(&id, expires_at).is_none());
        // Lazy eviction removed the entry.
        assert!(store.is_empty());
    }

    #[test]
    fn test_take_after_expiry_is_not_found() {
        let store = InMemoryFlowStateStore::new();
        let flow = sample_flow(TimeDuration::minutes(5));
        let id = flow.flow_id;
        let expires_at = flow.expires_at;
        store.put_at(flow, OffsetDateTime::now_utc()).unwrap();

        assert!(matches!(
            store.take_if_at(&id, expires_at + TimeDuration::seconds(1), &accept_all),
            TakeOutcome::NotFound
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_take_leaves_entry() {
        let store = InMemoryFlowStateStore::new();
        let flow = sample_flow(TimeDuration::minutes(5));
        let id = flow.flow_id;
        store.put(flow).await.unwrap();

        let outcome = store.take_if(&id, &|_| false).await.unwrap();
        assert!(matches!(outcome, TakeOutcome::Rejected));
        assert!(store.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = InMemoryFlowStateStore::new();
        let flow = sample_flow(TimeDuration::minutes(5));
        let id = flow.flow_id;
        store.put(flow).await.unwrap();

        assert!(matches!(
            store.take_if(&id, &accept_all).await.unwrap(),
            TakeOutcome::Taken(_)
        ));
        assert!(matches!(
            store.take_if(&id, &accept_all).await.unwrap(),
            TakeOutcome::NotFound
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_succeeds_once() {
        let store = Arc::new(InMemoryFlowStateStore::new());
        let flow = sample_flow(TimeDuration::minutes(5));
        let id = flow.flow_id;
        store.put(flow).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                matches!(
                    store.take_if(&id, &accept_all).await.unwrap(),
                    TakeOutcome::Taken(_)
                )
            }));
        }

        let mut taken = 0;
        for handle in handles {
            if handle.await.unwrap() {
                taken += 1;
            }
        }
        assert_eq!(taken, 1);
    }

    #[tokio::test]
    async fn test_flows_are_independent() {
        let store = InMemoryFlowStateStore::new();
        let a = sample_flow(TimeDuration::minutes(5));
        let b = sample_flow(TimeDuration::minutes(5));
        let (a_id, b_id) = (a.flow_id, b.flow_id);
        store.put(a).await.unwrap();
        store.put(b).await.unwrap();

        store.take_if(&a_id, &accept_all).await.unwrap();
        assert!(store.get(&a_id).await.unwrap().is_none());
        assert!(store.get(&b_id).await.unwrap().is_some());
    }

    #[test]
    fn test_cleanup_expired() {
        let store = InMemoryFlowStateStore::new();
        let now = OffsetDateTime::now_utc();
        store
            .put_at(sample_flow(TimeDuration::seconds(10)), now)
            .unwrap();
        store
            .put_at(sample_flow(TimeDuration::minutes(5)), now)
            .unwrap();

        assert_eq!(store.cleanup_at(now + TimeDuration::minutes(1)), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_flows() {
        let store = Arc::new(InMemoryFlowStateStore::new());
        store
            .put(sample_flow(TimeDuration::milliseconds(10)))
            .await
            .unwrap();

        let handle = spawn_flow_sweeper(store.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
