use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::api::{FlagsPreviewResponse, OverrideError, OverrideResponse};
use crate::evaluator::{FlagEvaluator, FlagOptions, OverrideAwareEvaluator};
use crate::metrics_consts::{
    OVERRIDE_CLEARS_COUNTER, OVERRIDE_REJECTED_COUNTER, OVERRIDE_WRITES_COUNTER,
};
use crate::overrides::{CookieOverridesStore, FlagValue, OverridesBag, OverridesSource};
use crate::router;

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    pub distinct_id: Option<String>,
}

/// Turns a POST body into a bag.
///
/// A body that isn't JSON at all counts as `{}`. `flags` must be an object whose
/// values are booleans, strings or null; anything else is rejected. A missing
/// or non-object `payloads` becomes an empty map.
pub fn parse_override_body(body: &[u8]) -> Result<OverridesBag, OverrideError> {
    let body = serde_json::from_slice::<Value>(body).unwrap_or_else(|e| {
        tracing::debug!("override body is not json, treating as empty: {}", e);
        Value::Object(Default::default())
    });

    let Value::Object(mut body) = body else {
        return Err(OverrideError::InvalidFlags);
    };

    let flags = match body.remove("flags") {
        Some(Value::Object(flags)) => flags
            .into_iter()
            .map(|(key, value)| {
                serde_json::from_value::<FlagValue>(value).map(|value| (key, value))
            })
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(|_| OverrideError::InvalidFlags)?,
        _ => return Err(OverrideError::InvalidFlags),
    };

    let payloads = match body.remove("payloads") {
        Some(Value::Object(payloads)) => payloads.into_iter().collect(),
        _ => HashMap::new(),
    };

    Ok(OverridesBag::new(flags, payloads))
}

#[instrument(skip_all)]
pub async fn post_overrides(
    mut store: CookieOverridesStore,
    body: Bytes,
) -> Result<(CookieOverridesStore, Json<OverrideResponse>), OverrideError> {
    let bag = parse_override_body(&body).inspect_err(|e| {
        metrics::counter!(OVERRIDE_REJECTED_COUNTER).increment(1);
        tracing::warn!("rejected flag overrides: {}", e);
    })?;

    store.write(&bag)?;

    metrics::counter!(OVERRIDE_WRITES_COUNTER).increment(1);
    tracing::info!(
        flags = bag.flags.len(),
        payloads = bag.payloads.len(),
        "stored flag overrides"
    );

    Ok((store, Json(OverrideResponse::ok())))
}

#[instrument(skip_all)]
pub async fn delete_overrides(
    mut store: CookieOverridesStore,
) -> (CookieOverridesStore, Json<OverrideResponse>) {
    store.clear();

    metrics::counter!(OVERRIDE_CLEARS_COUNTER).increment(1);
    tracing::info!("cleared flag overrides");

    (store, Json(OverrideResponse::ok()))
}

/// Evaluates every flag for a subject the way server-rendered pages would see
/// them, overrides included.
#[instrument(skip_all, fields(distinct_id))]
pub async fn preview_flags(
    State(state): State<router::State>,
    store: CookieOverridesStore,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<FlagsPreviewResponse>, OverrideError> {
    let distinct_id = query
        .distinct_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(OverrideError::MissingDistinctId)?;
    tracing::Span::current().record("distinct_id", distinct_id.as_str());

    let evaluator = OverrideAwareEvaluator::new(state.evaluator.clone(), store);
    let feature_flags = evaluator
        .get_all_flags(&distinct_id, &FlagOptions::default())
        .await?;

    let mut overridden: Vec<String> = evaluator
        .overrides()
        .read()
        .map(|bag| bag.flags.into_keys().collect())
        .unwrap_or_default();
    overridden.sort();

    Ok(Json(FlagsPreviewResponse {
        feature_flags,
        overridden,
    }))
}

pub async fn index() -> &'static str {
    "flag-overrides"
}
