//! Forwarding checks to the peer that owns them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::context::DispatchContext;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::membership::Membership;
use crate::model::{CheckRequest, CheckResult, Peer};

/// Transport used to issue a check on a remote peer.
///
/// Implementations attach `req.routing_key()` as request metadata and report
/// transport failures as [`DispatchError::UpstreamUnavailable`]. A call is
/// attempted once; retry policy belongs to the caller.
#[mockall::automock]
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn dispatch_check(
        &self,
        peer: &Peer,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult>;
}

/// Client for single-node deployments: every remote call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeerClient;

#[async_trait]
impl PeerClient for NoPeerClient {
    async fn dispatch_check(
        &self,
        peer: &Peer,
        _ctx: &DispatchContext,
        _req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        Err(DispatchError::UpstreamUnavailable(format!(
            "no transport configured to reach peer {}",
            peer
        )))
    }
}

pub struct PeerDispatcher {
    membership: Membership,
    client: Arc<dyn PeerClient>,
    local: Arc<dyn Dispatcher>,
}

impl PeerDispatcher {
    /// `local` serves checks this node owns, without a network hop.
    pub fn new(
        membership: Membership,
        client: Arc<dyn PeerClient>,
        local: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            membership,
            client,
            local,
        }
    }
}

#[async_trait]
impl Dispatcher for PeerDispatcher {
    #[instrument(skip(self, ctx), fields(check = %req), level = "debug")]
    async fn dispatch_check(
        &self,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        ctx.check()?;
        let owner = self.membership.owner_of(req.routing_key())?;

        if self.membership.is_local(&owner) {
            debug!("owned locally");
            return self.local.dispatch_check(ctx, req).await;
        }

        debug!(owner = %owner, "forwarding to owner");
        ctx.guard(self.client.dispatch_check(&owner, ctx, req)).await
    }
}
