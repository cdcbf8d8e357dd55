//! In-memory flag cache with on-demand refresh
//!
//! The cache is an immutable map behind `RwLock<Arc<..>>`. Evaluations clone
//! the `Arc` under the read lock; `refresh` queries the source with no lock
//! held and takes the write lock only to swap the pointer. A failed refresh
//! leaves the previous map in place.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::metrics::{EvaluationRecorder, NoopRecorder};
use super::rollout::in_rollout;
use super::source::FlagSource;
use crate::errors::{Result, TimetravelError};
use crate::models::FeatureFlag;

type FlagMap = HashMap<String, FeatureFlag>;

pub struct FlagEngine {
    source: Arc<dyn FlagSource>,
    cache: RwLock<Arc<FlagMap>>,
    recorder: Arc<dyn EvaluationRecorder>,
}

fn build_map(flags: Vec<FeatureFlag>) -> FlagMap {
    flags.into_iter().map(|f| (f.key.clone(), f)).collect()
}

impl FlagEngine {
    /// Load every flag from `source`; fails if the initial load fails
    pub fn new(source: Arc<dyn FlagSource>) -> Result<Self> {
        Self::with_recorder(source, Arc::new(NoopRecorder))
    }

    pub fn with_recorder(
        source: Arc<dyn FlagSource>,
        recorder: Arc<dyn EvaluationRecorder>,
    ) -> Result<Self> {
        let flags = source.load_flags()?;
        let map = build_map(flags);
        tracing::info!(flags = map.len(), "feature flags loaded");

        Ok(Self {
            source,
            cache: RwLock::new(Arc::new(map)),
            recorder,
        })
    }

    fn snapshot(&self) -> Arc<FlagMap> {
        // Writers only ever store a complete map, so a poisoned lock is still valid.
        let guard = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Reload every flag and replace the cache; returns the number cached
    pub fn refresh(&self) -> Result<usize> {
        let flags = match self.source.load_flags() {
            Ok(flags) => flags,
            Err(e) => {
                tracing::warn!(error = %e, "feature flag refresh failed; keeping previous cache");
                return Err(TimetravelError::refresh_with_source(
                    "failed to load feature flags",
                    e,
                ));
            }
        };
        let map = Arc::new(build_map(flags));
        let count = map.len();

        {
            let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            *guard = map;
        }

        tracing::info!(flags = count, "feature flags refreshed");
        Ok(count)
    }

    /// Evaluate `flag_key` for `user_id` against the cached definitions
    ///
    /// Unknown and disabled flags are `false`. Never touches storage.
    pub fn is_enabled(&self, flag_key: &str, user_id: i64) -> bool {
        let enabled = match self.snapshot().get(flag_key) {
            Some(flag) if flag.enabled => in_rollout(user_id, flag.rollout_percentage),
            _ => false,
        };

        self.recorder.record(flag_key, enabled);
        tracing::trace!(flag = flag_key, user_id, enabled, "flag evaluated");
        enabled
    }

    /// Cached definition of one flag
    pub fn flag(&self, flag_key: &str) -> Option<FeatureFlag> {
        self.snapshot().get(flag_key).cloned()
    }

    /// Every cached definition, sorted by key
    pub fn flags(&self) -> Vec<FeatureFlag> {
        let mut flags: Vec<FeatureFlag> = self.snapshot().values().cloned().collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        flags
    }
}

impl std::fmt::Debug for FlagEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagEngine")
            .field("flags", &self.snapshot().len())
            .finish()
    }
}
