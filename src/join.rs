//! Boolean fan-out over concurrently evaluated branches.
//!
//! Each branch runs as its own task under a child context. As soon as the
//! outcome is decided the child token is cancelled and the remaining tasks
//! are aborted; completion order never changes the answer.

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::debug;

use crate::context::DispatchContext;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{CheckResult, ResultMeta};

pub type BranchFuture = BoxFuture<'static, DispatchResult<CheckResult>>;

/// A lazily started branch; receives the fan-out context.
pub type Branch = Box<dyn FnOnce(DispatchContext) -> BranchFuture + Send>;

/// `true` as soon as any branch is `true`. Empty unions are `false`.
pub async fn union(ctx: &DispatchContext, branches: Vec<Branch>) -> DispatchResult<CheckResult> {
    fan_out(ctx, branches, |_, allowed| allowed.then_some(true), false).await
}

/// `false` as soon as any branch is `false`. Empty intersections are `false`.
pub async fn intersection(
    ctx: &DispatchContext,
    branches: Vec<Branch>,
) -> DispatchResult<CheckResult> {
    if branches.is_empty() {
        return Ok(CheckResult::denied());
    }
    fan_out(ctx, branches, |_, allowed| (!allowed).then_some(false), true).await
}

/// `base && !subtract`, both sides evaluated concurrently.
pub async fn exclusion(
    ctx: &DispatchContext,
    base: Branch,
    subtract: Branch,
) -> DispatchResult<CheckResult> {
    fan_out(
        ctx,
        vec![base, subtract],
        |index, allowed| match (index, allowed) {
            (0, false) | (1, true) => Some(false),
            _ => None,
        },
        true,
    )
    .await
}

/// Runs `branches` and folds their answers.
///
/// `decide(index, allowed)` returns `Some(answer)` when a single branch settles
/// the outcome. If every branch completes without settling it, `otherwise` is
/// the answer, unless a branch failed, in which case the first failure is
/// returned.
async fn fan_out<D>(
    ctx: &DispatchContext,
    branches: Vec<Branch>,
    decide: D,
    otherwise: bool,
) -> DispatchResult<CheckResult>
where
    D: Fn(usize, bool) -> Option<bool>,
{
    ctx.check()?;

    let fan = ctx.child();
    let mut set = JoinSet::new();
    for (index, branch) in branches.into_iter().enumerate() {
        let fut = branch(fan.clone());
        set.spawn(async move { (index, fut.await) });
    }

    let mut meta = ResultMeta::default();
    let mut first_error: Option<DispatchError> = None;

    loop {
        let next = ctx.guard(async { Ok(set.join_next().await) }).await;
        let joined = match next {
            Ok(Some(joined)) => joined,
            Ok(None) => break,
            Err(cancelled) => {
                fan.cancel();
                set.abort_all();
                return Err(cancelled);
            }
        };

        match joined {
            Ok((index, Ok(result))) => {
                meta.absorb(&result.meta);
                if let Some(answer) = decide(index, result.allowed) {
                    debug!(index, answer, pending = set.len(), "short-circuit");
                    fan.cancel();
                    set.abort_all();
                    return Ok(CheckResult {
                        allowed: answer,
                        meta,
                    });
                }
            }
            Ok((_, Err(err))) => {
                // a sibling cancelled by our own short-circuit never reaches here
                first_error.get_or_insert(err);
            }
            Err(join_err) => {
                first_error.get_or_insert(DispatchError::internal(format!(
                    "branch task failed: {}",
                    join_err
                )));
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(CheckResult {
            allowed: otherwise,
            meta,
        }),
    }
}
