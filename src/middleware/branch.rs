//! Conditional sub-pipeline produced by `PipelineBuilder::use_when`.

use std::sync::Arc;

use super::{BoxFuture, Middleware, Next, Outcome, SharedMiddleware};
use crate::context::RequestContext;

/// A synchronous, side-effect-free request predicate.
pub type Predicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Routes a request through extra stages when a predicate matches.
///
/// When the predicate holds, the branch's own stages run in order and the last
/// of them continues into the outer pipeline's next stage. Otherwise the branch
/// goes straight to the outer next stage. Either way the outer `next` runs at
/// most once.
pub struct Branch {
    predicate: Predicate,
    stages: Arc<[SharedMiddleware]>,
}

impl Branch {
    pub(crate) fn new(predicate: Predicate, stages: Vec<SharedMiddleware>) -> Self {
        Self {
            predicate,
            stages: stages.into(),
        }
    }

    /// Names of the stages inside this branch.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl Middleware for Branch {
    fn name(&self) -> &'static str {
        "branch"
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        mut next: Next<'a>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if (self.predicate)(ctx) {
                let mut branch = next.branch(&self.stages);
                branch.run(ctx).await
            } else {
                next.run(ctx).await
            }
        })
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}
