use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use super::{ConfigError, EvaluationError, FlagEvaluator, FlagOptions};
use crate::config::Config;
use crate::metrics_consts::{EVALUATION_ERRORS_COUNTER, EVALUATION_REQUESTS_COUNTER};
use crate::overrides::FlagValue;

// Relative, so a host with a path prefix (e.g. a reverse proxy) keeps it.
const FLAGS_PATH: &str = "decide/";

#[derive(Debug, Serialize)]
struct FlagsRequest<'a> {
    token: &'a str,
    distinct_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    groups: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    person_properties: Option<&'a HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_properties: Option<&'a HashMap<String, HashMap<String, Value>>>,
    geoip_disable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    flag_keys_to_evaluate: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagsResponse {
    #[serde(default)]
    errors_while_computing_flags: bool,
    #[serde(default)]
    feature_flags: HashMap<String, FlagValue>,
    #[serde(default)]
    feature_flag_payloads: HashMap<String, Value>,
}

/// Evaluates flags against a PostHog-compatible `/decide` endpoint.
#[derive(Clone)]
pub struct RemoteFlagEvaluator {
    api_key: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl RemoteFlagEvaluator {
    /// Fails when either credential is missing or empty; that's a deployment
    /// mistake, not something to recover from at request time.
    pub fn new(
        api_key: Option<&str>,
        host: Option<&str>,
        timeout: Duration,
    ) -> Result<RemoteFlagEvaluator, ConfigError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let host = host
            .filter(|host| !host.trim().is_empty())
            .ok_or(ConfigError::MissingHost)?;

        let mut base = Url::parse(host)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut endpoint = base.join(FLAGS_PATH)?;
        endpoint.set_query(Some("v=3"));

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(RemoteFlagEvaluator {
            api_key: api_key.to_string(),
            endpoint,
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<RemoteFlagEvaluator, ConfigError> {
        Self::new(
            config.posthog_api_key.as_deref(),
            config.posthog_host.as_deref(),
            config.request_timeout(),
        )
    }

    async fn fetch(
        &self,
        distinct_id: &str,
        options: &FlagOptions,
        flag_keys: Option<Vec<String>>,
    ) -> Result<FlagsResponse, EvaluationError> {
        let body = FlagsRequest {
            token: &self.api_key,
            distinct_id,
            groups: options.groups.as_ref(),
            person_properties: options.person_properties.as_ref(),
            group_properties: options.group_properties.as_ref(),
            geoip_disable: options.disable_geoip,
            flag_keys_to_evaluate: flag_keys,
        };

        metrics::counter!(EVALUATION_REQUESTS_COUNTER).increment(1);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .inspect_err(|e| {
                metrics::counter!(EVALUATION_ERRORS_COUNTER, "reason" => "request").increment(1);
                tracing::warn!("flags request failed: {}", e);
            })?;

        let status = response.status();
        if !status.is_success() {
            metrics::counter!(EVALUATION_ERRORS_COUNTER, "reason" => "status").increment(1);
            tracing::warn!(status = status.as_u16(), "flags endpoint rejected request");
            return Err(EvaluationError::UnexpectedStatus(status));
        }

        let flags: FlagsResponse = response.json().await.inspect_err(|e| {
            metrics::counter!(EVALUATION_ERRORS_COUNTER, "reason" => "decode").increment(1);
            tracing::warn!("failed to decode flags response: {}", e);
        })?;

        if flags.errors_while_computing_flags {
            tracing::warn!(distinct_id, "flags endpoint reported partial evaluation");
        }

        Ok(flags)
    }
}

// Payloads come back JSON-encoded as strings; plain strings that aren't JSON stay as-is.
fn decode_payload(payload: Value) -> Value {
    match payload {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

#[async_trait]
impl FlagEvaluator for RemoteFlagEvaluator {
    #[instrument(skip_all, fields(key = key))]
    async fn get_flag(
        &self,
        key: &str,
        distinct_id: &str,
        options: &FlagOptions,
    ) -> Result<FlagValue, EvaluationError> {
        if options.only_evaluate_locally {
            tracing::debug!("no local flag definitions, skipping remote evaluation");
            return Ok(FlagValue::Null);
        }

        let mut response = self
            .fetch(distinct_id, options, Some(vec![key.to_string()]))
            .await?;

        Ok(response.feature_flags.remove(key).unwrap_or_default())
    }

    #[instrument(skip_all, fields(key = key))]
    async fn get_flag_payload(
        &self,
        key: &str,
        distinct_id: &str,
        match_value: Option<FlagValue>,
        options: &FlagOptions,
    ) -> Result<Option<Value>, EvaluationError> {
        if options.only_evaluate_locally {
            return Ok(None);
        }

        if let Some(value) = &match_value {
            if !value.is_enabled() {
                return Ok(None);
            }
        }

        let mut response = self
            .fetch(distinct_id, options, Some(vec![key.to_string()]))
            .await?;

        Ok(response.feature_flag_payloads.remove(key).map(decode_payload))
    }

    #[instrument(skip_all)]
    async fn get_all_flags(
        &self,
        distinct_id: &str,
        options: &FlagOptions,
    ) -> Result<HashMap<String, FlagValue>, EvaluationError> {
        if options.only_evaluate_locally {
            return Ok(HashMap::new());
        }

        let response = self
            .fetch(distinct_id, options, options.flag_keys.clone())
            .await?;

        Ok(response.feature_flags)
    }
}
