//! Feature flag engine
//!
//! - [`source`]: where definitions are loaded from
//! - [`engine`]: the cache and evaluation path
//! - [`rollout`]: pinned percentage bucketing
//! - [`metrics`]: evaluation counters

pub mod engine;
pub mod metrics;
pub mod rollout;
pub mod source;

pub use engine::FlagEngine;
pub use metrics::{EVALUATIONS_METRIC, EvaluationRecorder, FlagEvaluationCounters, NoopRecorder};
pub use rollout::{ROLLOUT_HASH_VERSION, fnv1a_32, in_rollout, rollout_bucket};
pub use source::{FlagSource, SqliteFlagSource};
