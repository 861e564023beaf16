//! The dispatch capability and the late-bound pipeline entry point.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;

use crate::context::DispatchContext;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{CheckRequest, CheckResult};

/// Evaluates a check, possibly by delegating to another dispatcher.
///
/// Every pipeline stage (cache, router, local evaluator) implements this trait
/// and holds the next stage it may delegate to. Implementations must be safe
/// for concurrent invocation and must never turn an error into
/// `allowed = false`.
#[mockall::automock]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch_check(
        &self,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult>;
}

/// Handle to the outermost dispatcher of a pipeline.
///
/// The local evaluator re-enters the pipeline through this handle so derived
/// checks get the same caching and routing as external ones. The handle is
/// bound after the pipeline is assembled and only keeps a weak reference, so
/// the evaluator does not keep its own pipeline alive.
#[derive(Clone, Default)]
pub struct EntryPoint {
    target: Arc<OnceLock<Weak<dyn Dispatcher>>>,
}

impl EntryPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the handle. Fails if it was already bound.
    pub fn bind(&self, entry: &Arc<dyn Dispatcher>) -> DispatchResult<()> {
        self.target
            .set(Arc::downgrade(entry))
            .map_err(|_| DispatchError::internal("pipeline entry point bound twice"))
    }

    pub fn is_bound(&self) -> bool {
        self.target.get().is_some()
    }

    pub fn get(&self) -> DispatchResult<Arc<dyn Dispatcher>> {
        self.target
            .get()
            .ok_or_else(|| DispatchError::internal("pipeline entry point is not bound"))?
            .upgrade()
            .ok_or_else(|| DispatchError::internal("pipeline has been dropped"))
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoint")
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[async_trait]
impl Dispatcher for EntryPoint {
    async fn dispatch_check(
        &self,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        let entry = self.get()?;
        entry.dispatch_check(ctx, req).await
    }
}
