use std::collections::HashMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evaluator::EvaluationError;
use crate::overrides::FlagValue;

/// Body returned by the override endpoint, `{"ok": true}` or `{"ok": false, "error": ...}`.
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverrideResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OverrideResponse {
    pub fn ok() -> Self {
        OverrideResponse {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        OverrideResponse {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagsPreviewResponse {
    pub feature_flags: HashMap<String, FlagValue>,
    pub overridden: Vec<String>,
}

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("Invalid flags")]
    InvalidFlags,
    #[error("No distinct_id in request")]
    MissingDistinctId,
    #[error("failed to serialize overrides: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("flag evaluation failed: {0}")]
    EvaluationFailed(#[from] EvaluationError),
}

impl IntoResponse for OverrideError {
    fn into_response(self) -> Response {
        let status = match self {
            OverrideError::InvalidFlags | OverrideError::MissingDistinctId => {
                StatusCode::BAD_REQUEST
            }
            OverrideError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OverrideError::EvaluationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, Json(OverrideResponse::failed(self.to_string()))).into_response()
    }
}
