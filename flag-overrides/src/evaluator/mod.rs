use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::overrides::FlagValue;

pub mod patched;
pub mod remote;

pub use patched::OverrideAwareEvaluator;
pub use remote::RemoteFlagEvaluator;

/// Evaluation context passed alongside the subject's distinct id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagOptions {
    #[serde(default)]
    pub groups: Option<HashMap<String, String>>,
    #[serde(default)]
    pub person_properties: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub group_properties: Option<HashMap<String, HashMap<String, Value>>>,
    /// Never go over the network; evaluators without local definitions return nothing.
    #[serde(default)]
    pub only_evaluate_locally: bool,
    #[serde(default)]
    pub disable_geoip: bool,
    /// Restricts bulk evaluation to these keys.
    #[serde(default)]
    pub flag_keys: Option<Vec<String>>,
}

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("flags request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("flags endpoint responded with {0}")]
    UnexpectedStatus(StatusCode),
}

/// Fatal misconfiguration detected while building an evaluator.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing POSTHOG_API_KEY")]
    MissingApiKey,
    #[error("Missing POSTHOG_HOST")]
    MissingHost,
    #[error("Invalid POSTHOG_HOST: {0}")]
    InvalidHost(#[from] url::ParseError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Server-side flag evaluation for a single subject.
#[async_trait]
pub trait FlagEvaluator {
    async fn get_flag(
        &self,
        key: &str,
        distinct_id: &str,
        options: &FlagOptions,
    ) -> Result<FlagValue, EvaluationError>;

    /// `match_value` is the flag value the caller already resolved, if any.
    async fn get_flag_payload(
        &self,
        key: &str,
        distinct_id: &str,
        match_value: Option<FlagValue>,
        options: &FlagOptions,
    ) -> Result<Option<Value>, EvaluationError>;

    async fn get_all_flags(
        &self,
        distinct_id: &str,
        options: &FlagOptions,
    ) -> Result<HashMap<String, FlagValue>, EvaluationError>;
}
