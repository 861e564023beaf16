//! Assembly of a node's dispatch chain.
//!
//! ```text
//! entry:        CachedDispatcher -> PeerDispatcher -> LocalDispatcher
//! owned_entry:  CachedDispatcher -> LocalDispatcher
//! ```
//!
//! Both chains share one [`CheckCache`]. The local evaluator re-enters
//! through `entry`, so its derived checks are cached and routed. Checks that
//! a peer forwarded here are served through `owned_entry`: this node already
//! owns them and routing them again could bounce between nodes whose ring
//! snapshots disagree.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{CachedDispatcher, CheckCache};
use crate::config::{ConfigError, ConfigResult, NodeConfig};
use crate::context::DispatchContext;
use crate::dispatcher::{Dispatcher, EntryPoint};
use crate::error::DispatchResult;
use crate::local::LocalDispatcher;
use crate::membership::Membership;
use crate::model::{CacheKey, CheckRequest, CheckResult, Peer, DEFAULT_MAX_DEPTH};
use crate::peer::{NoPeerClient, PeerClient, PeerDispatcher};
use crate::ring::DEFAULT_VIRTUAL_NODES;
use crate::schema::Schema;
use crate::store::{InMemoryTupleStore, TupleStore};

pub struct Pipeline {
    entry: Arc<dyn Dispatcher>,
    owned_entry: Arc<dyn Dispatcher>,
    cache: Arc<CheckCache>,
    membership: Membership,
    schema: Arc<Schema>,
    max_depth: u32,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn builder(local: Peer) -> PipelineBuilder {
        PipelineBuilder::new(local)
    }

    /// Builds a node from its config, with an in-memory store holding the
    /// configured tuples.
    pub fn from_config(config: &NodeConfig, client: Arc<dyn PeerClient>) -> ConfigResult<Self> {
        config.validate()?;
        let store = InMemoryTupleStore::new();
        for tuple in config.parsed_tuples()? {
            store.write(tuple);
        }
        Self::builder(config.local_peer())
            .peers(config.peers.clone())
            .virtual_nodes(config.ring.virtual_nodes)
            .schema(config.schema.clone())
            .store(Arc::new(store))
            .client(client)
            .cache_enabled(config.cache.enabled)
            .seed(config.seed_entries()?)
            .max_depth(config.dispatch.max_depth)
            .request_timeout(config.dispatch.request_timeout)
            .build()
    }

    /// Context bounded by the configured request timeout.
    pub fn context(&self) -> DispatchContext {
        DispatchContext::with_timeout(self.request_timeout)
    }

    /// Serves a check that arrived from a client.
    pub async fn check(
        &self,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        let req = self.admit(req)?;
        ctx.guard(self.entry.dispatch_check(ctx, &req)).await
    }

    /// Serves a check a peer forwarded to this node.
    pub async fn check_owned(
        &self,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        let req = self.admit(req)?;
        ctx.guard(self.owned_entry.dispatch_check(ctx, &req)).await
    }

    fn admit(&self, req: &CheckRequest) -> DispatchResult<CheckRequest> {
        req.validate()?;
        let mut req = req.clone();
        req.meta.depth_remaining = req.meta.depth_remaining.min(self.max_depth);
        debug!(check = %req, depth = req.meta.depth_remaining, "admitted");
        Ok(req)
    }

    pub fn entry(&self) -> &Arc<dyn Dispatcher> {
        &self.entry
    }

    pub fn cache(&self) -> &Arc<CheckCache> {
        &self.cache
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn local_peer(&self) -> &Peer {
        self.membership.local()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("membership", &self.membership)
            .field("cache_entries", &self.cache.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

pub struct PipelineBuilder {
    local: Peer,
    peers: Vec<Peer>,
    virtual_nodes: usize,
    schema: Schema,
    store: Option<Arc<dyn TupleStore>>,
    client: Arc<dyn PeerClient>,
    cache: Option<Arc<CheckCache>>,
    cache_enabled: bool,
    seed: Vec<(CacheKey, CheckResult)>,
    max_depth: u32,
    request_timeout: Duration,
}

impl PipelineBuilder {
    pub fn new(local: Peer) -> Self {
        Self {
            local,
            peers: Vec::new(),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            schema: Schema::default(),
            store: None,
            client: Arc::new(NoPeerClient),
            cache: None,
            cache_enabled: true,
            seed: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            request_timeout: Duration::from_millis(5000),
        }
    }

    pub fn peers(mut self, peers: Vec<Peer>) -> Self {
        self.peers = peers;
        self
    }

    pub fn virtual_nodes(mut self, virtual_nodes: usize) -> Self {
        self.virtual_nodes = virtual_nodes;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn store(mut self, store: Arc<dyn TupleStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn client(mut self, client: Arc<dyn PeerClient>) -> Self {
        self.client = client;
        self
    }

    /// Shares an existing cache instead of creating one.
    pub fn cache(mut self, cache: Arc<CheckCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn seed(mut self, seed: Vec<(CacheKey, CheckResult)>) -> Self {
        self.seed = seed;
        self
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<Pipeline> {
        if !self.cache_enabled && !self.seed.is_empty() {
            return Err(ConfigError::Invalid(
                "seed entries require the cache to be enabled".into(),
            ));
        }
        let cache = self.cache.unwrap_or_default();
        for (key, result) in self.seed {
            cache.seed(key, result);
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTupleStore::new()));
        let schema = Arc::new(self.schema);
        let membership = Membership::new(self.local, self.peers, self.virtual_nodes);

        let entry_point = EntryPoint::new();
        let local: Arc<dyn Dispatcher> = Arc::new(LocalDispatcher::new(
            schema.clone(),
            store,
            entry_point.clone(),
        ));
        let router: Arc<dyn Dispatcher> = Arc::new(PeerDispatcher::new(
            membership.clone(),
            self.client,
            local.clone(),
        ));

        let (entry, owned_entry): (Arc<dyn Dispatcher>, Arc<dyn Dispatcher>) =
            if self.cache_enabled {
                (
                    Arc::new(CachedDispatcher::new(cache.clone(), router)),
                    Arc::new(CachedDispatcher::new(cache.clone(), local)),
                )
            } else {
                (router, local)
            };
        entry_point
            .bind(&entry)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        info!(
            local = %membership.local(),
            peers = membership.snapshot().len(),
            cache = self.cache_enabled,
            seeded = cache.len(),
            "dispatch pipeline ready"
        );

        Ok(Pipeline {
            entry,
            owned_entry,
            cache,
            membership,
            schema,
            max_depth: self.max_depth,
            request_timeout: self.request_timeout,
        })
    }
}
