//! Result cache and the caching dispatcher.
//!
//! [`CheckCache`] is the process-wide memo table. It is shared by handle
//! between every [`CachedDispatcher`] of a node, so checks arriving from
//! clients and checks forwarded by peers populate the same map.
//!
//! # Single-flight
//!
//! Concurrent identical checks are coalesced: the first caller becomes the
//! leader and runs the delegate, later callers subscribe to the leader's
//! outcome. In-flight slots are keyed on the cache key *and* the remaining
//! depth, so a rewrite cycle (`viewer -> editor -> viewer`) never waits on
//! itself; it runs down its depth budget instead.
//!
//! A leader that is cancelled or dropped releases its slot without
//! publishing, and its followers retry (one of them becomes the new leader).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::context::DispatchContext;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{CacheKey, CheckRequest, CheckResult, Consistency};

type Outcome = DispatchResult<CheckResult>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
    key: CacheKey,
    depth_remaining: u32,
}

impl FlightKey {
    fn for_request(req: &CheckRequest) -> Self {
        Self {
            key: req.cache_key(),
            depth_remaining: req.meta.depth_remaining,
        }
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

#[derive(Default)]
pub struct CheckCache {
    results: DashMap<CacheKey, CheckResult>,
    /// Subject-less seeds; the only entries consulted for other subjects.
    axioms: DashMap<CacheKey, CheckResult>,
    inflight: DashMap<FlightKey, broadcast::Sender<Outcome>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

enum Flight<'a> {
    Leader(FlightGuard<'a>),
    Follower(broadcast::Receiver<Outcome>),
}

/// Owns an in-flight slot; the slot is released on completion or drop.
struct FlightGuard<'a> {
    inflight: &'a DashMap<FlightKey, broadcast::Sender<Outcome>>,
    key: FlightKey,
    tx: Option<broadcast::Sender<Outcome>>,
}

impl FlightGuard<'_> {
    fn complete(mut self, outcome: Outcome) {
        self.inflight.remove(&self.key);
        if let Some(tx) = self.tx.take() {
            // no receivers is fine: nobody was waiting
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.inflight.remove(&self.key);
        }
    }
}

impl CheckCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache pre-populated with known facts.
    ///
    /// Seeded keys without a subject act as subject-independent axioms: they
    /// answer every subject's check on that object and relation.
    pub fn with_seed(entries: impl IntoIterator<Item = (CacheKey, CheckResult)>) -> Self {
        let cache = Self::new();
        for (key, result) in entries {
            cache.seed(key, result);
        }
        cache
    }

    /// Inserts a known fact. A key without a subject also becomes an axiom.
    pub fn seed(&self, key: CacheKey, result: CheckResult) {
        if !key.has_subject() {
            self.axioms.insert(key.clone(), result);
        }
        self.results.insert(key, result);
    }

    /// Looks up a request, falling back to a seeded subject-independent axiom.
    ///
    /// Results memoized for anonymous checks are never used as the fallback:
    /// "some fact exists" says nothing about a particular subject.
    pub fn lookup(&self, req: &CheckRequest) -> Option<CheckResult> {
        let found = self.results.get(&req.cache_key()).map(|e| *e.value());
        let found = match (found, &req.subject) {
            (None, Some(_)) => self
                .axioms
                .get(&CacheKey::object_relation(req))
                .map(|e| *e.value()),
            (found, _) => found,
        };
        found.map(|mut result| {
            result.meta.cached = true;
            result
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<CheckResult> {
        self.results.get(key).map(|e| *e.value())
    }

    pub fn insert(&self, key: CacheKey, result: CheckResult) {
        self.results.insert(key, result);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.results.contains_key(key)
    }

    /// Drops a memoized result. Stale entries are never evicted on their own.
    pub fn invalidate(&self, key: &CacheKey) -> Option<CheckResult> {
        self.axioms.remove(key);
        self.results.remove(key).map(|(_, result)| result)
    }

    pub fn clear(&self) {
        self.axioms.clear();
        self.results.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.results.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.results.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    fn join_or_lead(&self, key: &FlightKey) -> Flight<'_> {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(slot) => Flight::Follower(slot.get().subscribe()),
            Entry::Vacant(slot) => {
                let (tx, _) = broadcast::channel(1);
                slot.insert(tx.clone());
                Flight::Leader(FlightGuard {
                    inflight: &self.inflight,
                    key: key.clone(),
                    tx: Some(tx),
                })
            }
        }
    }
}

/// Dispatcher that memoizes its delegate's answers.
pub struct CachedDispatcher {
    cache: Arc<CheckCache>,
    delegate: Arc<dyn Dispatcher>,
}

impl CachedDispatcher {
    pub fn new(cache: Arc<CheckCache>, delegate: Arc<dyn Dispatcher>) -> Self {
        Self { cache, delegate }
    }

    pub fn cache(&self) -> &Arc<CheckCache> {
        &self.cache
    }

    fn hit(&self, req: &CheckRequest) -> Option<CheckResult> {
        let hit = self.cache.lookup(req)?;
        self.cache.hits.fetch_add(1, Ordering::Relaxed);
        debug!(check = %req, allowed = hit.allowed, "serving from cache");
        Some(hit)
    }
}

#[async_trait]
impl Dispatcher for CachedDispatcher {
    #[instrument(skip(self, ctx), fields(check = %req), level = "debug")]
    async fn dispatch_check(
        &self,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        ctx.check()?;

        if req.consistency == Consistency::FullyConsistent {
            debug!("bypassing cache for fully consistent check");
            return self.delegate.dispatch_check(ctx, req).await;
        }

        if let Some(hit) = self.hit(req) {
            return Ok(hit);
        }

        let flight = FlightKey::for_request(req);
        loop {
            match self.cache.join_or_lead(&flight) {
                Flight::Follower(mut rx) => {
                    self.cache.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!("joining in-flight check");
                    let received = ctx.guard(async { Ok(rx.recv().await) }).await?;
                    match received {
                        Ok(outcome) => return outcome,
                        Err(_) => {
                            // leader gave up without publishing
                            if let Some(hit) = self.hit(req) {
                                return Ok(hit);
                            }
                        }
                    }
                }
                Flight::Leader(guard) => {
                    // a previous leader may have finished between the lookup and the slot
                    if let Some(hit) = self.hit(req) {
                        guard.complete(Ok(hit));
                        return Ok(hit);
                    }

                    self.cache.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("cache miss");
                    let outcome = self.delegate.dispatch_check(ctx, req).await;

                    match &outcome {
                        Ok(result) if result.meta.cacheable => {
                            self.cache.insert(flight.key.clone(), *result);
                        }
                        Err(DispatchError::Cancelled(_)) => {
                            // our cancellation is not the followers' answer
                            drop(guard);
                            return outcome;
                        }
                        _ => {}
                    }
                    guard.complete(outcome.clone());
                    return outcome;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::MockDispatcher;
    use crate::model::SubjectRef;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cached(mock: MockDispatcher) -> (CachedDispatcher, Arc<CheckCache>) {
        let cache = Arc::new(CheckCache::new());
        (CachedDispatcher::new(cache.clone(), Arc::new(mock)), cache)
    }

    /// Delegate that counts invocations and takes a while to answer.
    struct SlowDispatcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Dispatcher for SlowDispatcher {
        async fn dispatch_check(
            &self,
            _ctx: &DispatchContext,
            _req: &CheckRequest,
        ) -> DispatchResult<CheckResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(CheckResult::allowed())
        }
    }

    #[tokio::test]
    async fn test_second_dispatch_is_served_from_cache() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch_check()
            .times(1)
            .returning(|_, _| Ok(CheckResult::allowed()));
        let (dispatcher, cache) = cached(mock);
        let ctx = DispatchContext::new();
        let req = CheckRequest::new("document", "1", "viewer");

        let first = dispatcher.dispatch_check(&ctx, &req).await.unwrap();
        let second = dispatcher.dispatch_check(&ctx, &req).await.unwrap();

        assert_eq!(first.allowed, second.allowed);
        assert!(!first.meta.cached);
        assert!(second.meta.cached);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_errors_are_propagated_and_not_cached() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch_check()
            .times(2)
            .returning(|_, _| Err(DispatchError::UpstreamUnavailable("peer down".into())));
        let (dispatcher, cache) = cached(mock);
        let ctx = DispatchContext::new();
        let req = CheckRequest::new("document", "1", "viewer");

        for _ in 0..2 {
            let err = dispatcher.dispatch_check(&ctx, &req).await.unwrap_err();
            assert_eq!(err, DispatchError::UpstreamUnavailable("peer down".into()));
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_seeded_entry_short_circuits_delegate() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch_check().never();
        let cache = Arc::new(CheckCache::with_seed([(
            "document:1#editor".parse().unwrap(),
            CheckResult::allowed(),
        )]));
        let dispatcher = CachedDispatcher::new(cache, Arc::new(mock));

        // the subject-less seed answers for any subject
        let req = CheckRequest::new("document", "1", "editor")
            .with_subject(SubjectRef::new("user", "alice"));
        let result = dispatcher
            .dispatch_check(&DispatchContext::new(), &req)
            .await
            .unwrap();
        assert!(result.allowed);
        assert!(result.meta.cached);
    }

    #[tokio::test]
    async fn test_subject_specific_results_do_not_leak() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch_check()
            .times(2)
            .returning(|_, req| {
                let alice = req.subject.as_ref().map(|s| s.object_id == "alice");
                Ok(CheckResult::new(alice == Some(true)))
            });
        let (dispatcher, _) = cached(mock);
        let ctx = DispatchContext::new();
        let base = CheckRequest::new("document", "1", "viewer");

        let alice = base.clone().with_subject(SubjectRef::new("user", "alice"));
        let bob = base.with_subject(SubjectRef::new("user", "bob"));
        assert!(dispatcher.dispatch_check(&ctx, &alice).await.unwrap().allowed);
        assert!(!dispatcher.dispatch_check(&ctx, &bob).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_anonymous_result_does_not_answer_for_subjects() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch_check()
            .times(3)
            .returning(|_, req| {
                let alice = req.subject.as_ref().map(|s| s.object_id == "alice");
                // a fact exists for alice, so the anonymous check is true
                Ok(CheckResult::new(alice != Some(false)))
            });
        let (dispatcher, cache) = cached(mock);
        let ctx = DispatchContext::new();
        let base = CheckRequest::new("document", "1", "editor");
        let mallory = base.clone().with_subject(SubjectRef::new("user", "mallory"));

        assert!(!dispatcher.dispatch_check(&ctx, &mallory).await.unwrap().allowed);
        cache.invalidate(&mallory.cache_key());

        assert!(dispatcher.dispatch_check(&ctx, &base).await.unwrap().allowed);
        assert!(cache.contains(&base.cache_key()));

        let after = dispatcher.dispatch_check(&ctx, &mallory).await.unwrap();
        assert!(!after.allowed);
        assert!(!after.meta.cached);
    }

    #[tokio::test]
    async fn test_non_cacheable_results_are_not_stored() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch_check()
            .times(2)
            .returning(|_, _| Ok(CheckResult::allowed().non_cacheable()));
        let (dispatcher, cache) = cached(mock);
        let ctx = DispatchContext::new();
        let req = CheckRequest::new("document", "1", "viewer");

        dispatcher.dispatch_check(&ctx, &req).await.unwrap();
        dispatcher.dispatch_check(&ctx, &req).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_fully_consistent_bypasses_cache() {
        let mut mock = MockDispatcher::new();
        mock.expect_dispatch_check()
            .times(1)
            .returning(|_, _| Ok(CheckResult::denied()));
        let cache = Arc::new(CheckCache::with_seed([(
            "document:1#viewer".parse().unwrap(),
            CheckResult::allowed(),
        )]));
        let dispatcher = CachedDispatcher::new(cache.clone(), Arc::new(mock));

        let req = CheckRequest::new("document", "1", "viewer")
            .with_consistency(Consistency::FullyConsistent);
        let result = dispatcher
            .dispatch_check(&DispatchContext::new(), &req)
            .await
            .unwrap();
        assert!(!result.allowed);
        assert_eq!(cache.get(&req.cache_key()), Some(CheckResult::allowed()));
    }

    #[tokio::test]
    async fn test_concurrent_identical_checks_coalesce() {
        let delegate = Arc::new(SlowDispatcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
        });
        let cache = Arc::new(CheckCache::new());
        let dispatcher = Arc::new(CachedDispatcher::new(cache.clone(), delegate.clone()));
        let req = CheckRequest::new("document", "1", "viewer");

        let num_callers = 32;
        let barrier = Arc::new(tokio::sync::Barrier::new(num_callers));
        let mut handles = Vec::with_capacity(num_callers);
        for _ in 0..num_callers {
            let dispatcher = dispatcher.clone();
            let barrier = barrier.clone();
            let req = req.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                dispatcher
                    .dispatch_check(&DispatchContext::new(), &req)
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert!(result.allowed);
        }
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_hands_over_to_follower() {
        let delegate = Arc::new(SlowDispatcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let cache = Arc::new(CheckCache::new());
        let dispatcher = Arc::new(CachedDispatcher::new(cache.clone(), delegate.clone()));
        let req = CheckRequest::new("document", "1", "viewer");

        let leader_ctx = DispatchContext::new();
        let leader = {
            let dispatcher = dispatcher.clone();
            let req = req.clone();
            let ctx = leader_ctx.clone();
            tokio::spawn(async move {
                ctx.guard(dispatcher.dispatch_check(&ctx, &req)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let follower = {
            let dispatcher = dispatcher.clone();
            let req = req.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch_check(&DispatchContext::new(), &req)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader_ctx.cancel();

        let leader_result = leader.await.unwrap();
        assert!(matches!(leader_result, Err(DispatchError::Cancelled(_))));
        let follower_result = follower.await.unwrap().unwrap();
        assert!(follower_result.allowed);
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let key: CacheKey = "document:1#viewer".parse().unwrap();
        let cache = CheckCache::with_seed([(key.clone(), CheckResult::allowed())]);
        assert!(cache.contains(&key));
        assert_eq!(cache.invalidate(&key), Some(CheckResult::allowed()));
        assert!(!cache.contains(&key));

        // an invalidated axiom no longer answers for subjects
        let alice = CheckRequest::new("document", "1", "viewer")
            .with_subject(SubjectRef::new("user", "alice"));
        assert_eq!(cache.lookup(&alice), None);

        cache.insert(key.clone(), CheckResult::denied());
        cache.clear();
        assert!(cache.is_empty());
    }
}
