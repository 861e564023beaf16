//! HTTP transport for peer-to-peer checks.

use std::time::Duration;

use async_trait::async_trait;
use relcheck::peer::PeerClient;
use relcheck::{CheckRequest, CheckResult, DispatchContext, DispatchError, DispatchResult, Peer};
use reqwest::Client;
use tracing::debug;

use crate::error::ErrorBody;

/// Header carrying the consistent-hash routing key of a forwarded check.
pub const ROUTING_KEY_HEADER: &str = "x-relcheck-routing-key";

/// Header carrying the caller's remaining time budget in milliseconds.
pub const DEADLINE_HEADER: &str = "x-relcheck-deadline-ms";

pub const PEER_DISPATCH_PATH: &str = "/dispatch/v1/check";

/// Forwards checks to the peer dispatch endpoint of the owning node.
///
/// Connections are pooled per peer by the underlying client.
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpPeerClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn url(peer: &Peer) -> String {
        let base = peer.address.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}{}", base, PEER_DISPATCH_PATH)
        } else {
            format!("http://{}{}", base, PEER_DISPATCH_PATH)
        }
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn dispatch_check(
        &self,
        peer: &Peer,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        ctx.check()?;

        let mut request = self
            .client
            .post(Self::url(peer))
            .header(ROUTING_KEY_HEADER, req.object_id.as_str())
            .json(req);
        if let Some(remaining) = ctx.remaining() {
            request = request
                .header(DEADLINE_HEADER, remaining.as_millis().to_string())
                .timeout(remaining.max(Duration::from_millis(1)));
        }

        debug!(peer = %peer, check = %req, "sending peer check");
        let response = request.send().await.map_err(|e| transport_error(peer, e))?;
        let status = response.status();

        if status.is_success() {
            return response
                .json::<CheckResult>()
                .await
                .map_err(|e| transport_error(peer, e));
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(DispatchError::from_kind(body.kind, body.detail)),
            Err(_) => Err(DispatchError::UpstreamUnavailable(format!(
                "peer {} answered {}",
                peer, status
            ))),
        }
    }
}

fn transport_error(peer: &Peer, err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Cancelled("deadline exceeded".into())
    } else {
        DispatchError::UpstreamUnavailable(format!("peer {}: {}", peer, err))
    }
}
