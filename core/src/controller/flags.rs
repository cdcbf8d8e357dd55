use std::sync::Arc;

use super::context::RequestContext;
use crate::errors::Result;
use crate::flags::FlagEngine;

/// Evaluation surface the flag controller depends on
pub trait FlagEvaluator: Send + Sync {
    fn is_enabled(&self, flag_key: &str, user_id: i64) -> bool;
    fn refresh(&self) -> Result<usize>;
}

impl FlagEvaluator for FlagEngine {
    fn is_enabled(&self, flag_key: &str, user_id: i64) -> bool {
        FlagEngine::is_enabled(self, flag_key, user_id)
    }

    fn refresh(&self) -> Result<usize> {
        FlagEngine::refresh(self)
    }
}

/// Resolves the caller from the request context before consulting the engine
#[derive(Clone)]
pub struct FlagController {
    evaluator: Arc<dyn FlagEvaluator>,
}

impl FlagController {
    pub fn new(evaluator: Arc<dyn FlagEvaluator>) -> Self {
        Self { evaluator }
    }

    /// A caller without a user id is never enabled.
    pub fn is_enabled(&self, ctx: &RequestContext, flag_key: &str) -> bool {
        let Some(user_id) = ctx.user_id() else {
            tracing::error!(flag = flag_key, "flag evaluated without a user id; treating as disabled");
            return false;
        };
        self.evaluator.is_enabled(flag_key, user_id)
    }

    pub fn refresh(&self) -> Result<usize> {
        self.evaluator.refresh()
    }
}

impl std::fmt::Debug for FlagController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagController").finish_non_exhaustive()
    }
}
