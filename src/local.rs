//! Local evaluation of relation rewrite rules.
//!
//! The evaluator never recurses into itself for a derived check. Every
//! derived request goes back through the pipeline's [`EntryPoint`], so it is
//! cached and routed exactly like a request that arrived from a client.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, instrument};

use crate::context::DispatchContext;
use crate::dispatcher::{Dispatcher, EntryPoint};
use crate::error::{DispatchError, DispatchResult};
use crate::join::{self, Branch, BranchFuture};
use crate::model::{CheckRequest, CheckResult, SubjectRef};
use crate::schema::{RelationRule, Schema};
use crate::store::TupleStore;

struct Evaluator {
    schema: Arc<Schema>,
    store: Arc<dyn TupleStore>,
    entry: EntryPoint,
}

impl Evaluator {
    async fn redispatch(
        &self,
        ctx: &DispatchContext,
        derived: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        debug!(derived = %derived, "re-entering pipeline");
        self.entry
            .dispatch_check(ctx, derived)
            .await
            .map(CheckResult::from_derived)
    }

    async fn lookup(
        &self,
        ctx: &DispatchContext,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> DispatchResult<Vec<SubjectRef>> {
        ctx.guard(async {
            self.store
                .lookup(object_type, object_id, relation)
                .await
                .map_err(DispatchError::from)
        })
        .await
    }
}

/// Builds a branch that dispatches `derived` through the entry point.
fn derived_branch(evaluator: &Arc<Evaluator>, derived: CheckRequest) -> Branch {
    let evaluator = evaluator.clone();
    Box::new(move |ctx| {
        async move { evaluator.redispatch(&ctx, &derived).await }.boxed()
    })
}

fn rule_branch(evaluator: &Arc<Evaluator>, req: &CheckRequest, rule: RelationRule) -> Branch {
    let evaluator = evaluator.clone();
    let req = req.clone();
    Box::new(move |ctx| eval_rule(evaluator, ctx, req, rule))
}

fn eval_rule(
    evaluator: Arc<Evaluator>,
    ctx: DispatchContext,
    req: CheckRequest,
    rule: RelationRule,
) -> BranchFuture {
    async move {
        ctx.check()?;
        match rule {
            RelationRule::Terminal(allowed) => Ok(CheckResult::new(allowed)),
            RelationRule::Direct => eval_direct(&evaluator, &ctx, &req).await,
            RelationRule::Computed(relation) => {
                let derived = req.rewrite(relation)?;
                evaluator.redispatch(&ctx, &derived).await
            }
            RelationRule::TupleToUserset { tupleset, computed } => {
                let targets = evaluator
                    .lookup(&ctx, &req.object_type, &req.object_id, &tupleset)
                    .await?;
                let branches = targets
                    .into_iter()
                    .map(|target| {
                        req.derive(target.object_type, target.object_id, computed.as_str())
                            .map(|derived| derived_branch(&evaluator, derived))
                    })
                    .collect::<DispatchResult<Vec<_>>>()?;
                join::union(&ctx, branches).await
            }
            RelationRule::Union(children) => {
                let branches = children
                    .into_iter()
                    .map(|child| rule_branch(&evaluator, &req, child))
                    .collect();
                join::union(&ctx, branches).await
            }
            RelationRule::Intersection(children) => {
                let branches = children
                    .into_iter()
                    .map(|child| rule_branch(&evaluator, &req, child))
                    .collect();
                join::intersection(&ctx, branches).await
            }
            RelationRule::Exclusion { base, subtract } => {
                join::exclusion(
                    &ctx,
                    rule_branch(&evaluator, &req, *base),
                    rule_branch(&evaluator, &req, *subtract),
                )
                .await
            }
        }
    }
    .boxed()
}

/// Terminal lookup, expanding stored subject sets through the pipeline.
async fn eval_direct(
    evaluator: &Arc<Evaluator>,
    ctx: &DispatchContext,
    req: &CheckRequest,
) -> DispatchResult<CheckResult> {
    let stored = evaluator
        .lookup(ctx, &req.object_type, &req.object_id, &req.relation)
        .await?;

    let Some(subject) = &req.subject else {
        return Ok(CheckResult::new(!stored.is_empty()));
    };
    if stored.contains(subject) {
        return Ok(CheckResult::allowed());
    }

    let branches = stored
        .into_iter()
        .filter_map(|set| {
            let relation = set.relation?;
            Some(
                req.derive(set.object_type, set.object_id, relation)
                    .map(|derived| derived_branch(evaluator, derived)),
            )
        })
        .collect::<DispatchResult<Vec<_>>>()?;
    join::union(ctx, branches).await
}

/// Dispatcher that resolves checks against the schema and tuple store.
#[derive(Clone)]
pub struct LocalDispatcher {
    evaluator: Arc<Evaluator>,
}

impl LocalDispatcher {
    pub fn new(schema: Arc<Schema>, store: Arc<dyn TupleStore>, entry: EntryPoint) -> Self {
        Self {
            evaluator: Arc::new(Evaluator {
                schema,
                store,
                entry,
            }),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.evaluator.schema
    }
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    #[instrument(skip(self, ctx), fields(check = %req), level = "debug")]
    async fn dispatch_check(
        &self,
        ctx: &DispatchContext,
        req: &CheckRequest,
    ) -> DispatchResult<CheckResult> {
        req.validate()?;
        let rule = self
            .evaluator
            .schema
            .resolve(&req.object_type, &req.relation)?
            .clone();
        debug!(?rule, "evaluating");
        eval_rule(self.evaluator.clone(), ctx.clone(), req.clone(), rule).await
    }
}
