use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use super::{EvaluationError, FlagEvaluator, FlagOptions};
use crate::metrics_consts::OVERRIDE_HITS_COUNTER;
use crate::overrides::{FlagValue, OverridesSource};

/// Wraps an evaluator so that stored overrides win over real evaluation.
///
/// The store is read on every call, so a freshly written or cleared bag is
/// honoured immediately. The wrapped evaluator is shared, never modified, and
/// stays reachable through [`OverrideAwareEvaluator::original`].
pub struct OverrideAwareEvaluator<E: ?Sized, S> {
    original: Arc<E>,
    overrides: S,
}

impl<E: ?Sized, S: OverridesSource> OverrideAwareEvaluator<E, S> {
    pub fn new(original: Arc<E>, overrides: S) -> Self {
        OverrideAwareEvaluator {
            original,
            overrides,
        }
    }

    pub fn original(&self) -> &E {
        &self.original
    }

    pub fn overrides(&self) -> &S {
        &self.overrides
    }
}

#[async_trait]
impl<E, S> FlagEvaluator for OverrideAwareEvaluator<E, S>
where
    E: FlagEvaluator + Send + Sync + ?Sized,
    S: OverridesSource + Send + Sync,
{
    #[instrument(skip_all, fields(key = key))]
    async fn get_flag(
        &self,
        key: &str,
        distinct_id: &str,
        options: &FlagOptions,
    ) -> Result<FlagValue, EvaluationError> {
        if let Some(bag) = self.overrides.read() {
            if let Some(value) = bag.flag(key) {
                metrics::counter!(OVERRIDE_HITS_COUNTER, "operation" => "get_flag").increment(1);
                return Ok(value.clone());
            }
        }

        self.original.get_flag(key, distinct_id, options).await
    }

    #[instrument(skip_all, fields(key = key))]
    async fn get_flag_payload(
        &self,
        key: &str,
        distinct_id: &str,
        match_value: Option<FlagValue>,
        options: &FlagOptions,
    ) -> Result<Option<Value>, EvaluationError> {
        if let Some(bag) = self.overrides.read() {
            if bag.is_overridden(key) {
                metrics::counter!(OVERRIDE_HITS_COUNTER, "operation" => "get_flag_payload")
                    .increment(1);
                // A stored JSON null means no payload.
                return Ok(bag.payload(key).filter(|v| !v.is_null()).cloned());
            }
        }

        let match_value = match match_value {
            Some(value) => value,
            None => self.original.get_flag(key, distinct_id, options).await?,
        };

        self.original
            .get_flag_payload(key, distinct_id, Some(match_value), options)
            .await
    }

    #[instrument(skip_all)]
    async fn get_all_flags(
        &self,
        distinct_id: &str,
        options: &FlagOptions,
    ) -> Result<HashMap<String, FlagValue>, EvaluationError> {
        let mut flags = self.original.get_all_flags(distinct_id, options).await?;

        if let Some(bag) = self.overrides.read() {
            if !bag.is_empty() {
                metrics::counter!(OVERRIDE_HITS_COUNTER, "operation" => "get_all_flags")
                    .increment(1);
            }
            flags.extend(bag.flags);
        }

        Ok(flags)
    }
}
