use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use assert_json_diff::assert_json_include;
use mockito::Matcher;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::common::*;

use flag_overrides::overrides::{FlagValue, COOKIE_NAME};
use flag_overrides::test_utils::MockFlagEvaluator;

pub mod common;

// Answers the two evaluations made by `it_overrides_and_clears_remote_flags`.
async fn mock_decide(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/decide/")
        .match_query(Matcher::UrlEncoded("v".into(), "3".into()))
        .match_body(Matcher::PartialJson(json!({
            "token": "phc_test_token",
            "distinct_id": "user-1"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "featureFlags": {"exp-a": false, "exp-b": "control"},
                "featureFlagPayloads": {},
                "errorsWhileComputingFlags": false
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await
}

#[tokio::test]
async fn it_overrides_and_clears_remote_flags() -> Result<()> {
    let mut upstream = mockito::Server::new_async().await;
    let decide = mock_decide(&mut upstream).await;

    let mut config = DEFAULT_CONFIG.clone();
    config.posthog_host = Some(upstream.url());
    let server = ServerHandle::for_config(config).await;
    let mut cookies = HashMap::new();

    let res = server
        .post_overrides(
            json!({
                "flags": {"exp-a": true, "exp-c": "test"},
                "payloads": {"exp-c": {"copy": "hello"}}
            })
            .to_string(),
            None,
        )
        .await;
    assert_eq!(StatusCode::OK, res.status());
    apply_set_cookies(&mut cookies, &res);
    assert!(cookies.contains_key(COOKIE_NAME));
    assert_eq!(res.json::<Value>().await?, json!({"ok": true}));

    let res = server
        .preview_flags("user-1", cookie_header(&cookies).as_deref())
        .await;
    assert_eq!(StatusCode::OK, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await?,
        expected: json!({
            "featureFlags": {"exp-a": true, "exp-b": "control", "exp-c": "test"},
            "overridden": ["exp-a", "exp-c"]
        })
    );

    let res = server
        .delete_overrides(cookie_header(&cookies).as_deref())
        .await;
    assert_eq!(StatusCode::OK, res.status());
    apply_set_cookies(&mut cookies, &res);
    assert!(cookies.is_empty());

    let res = server.preview_flags("user-1", None).await;
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!(
        res.json::<Value>().await?,
        json!({
            "featureFlags": {"exp-a": false, "exp-b": "control"},
            "overridden": []
        })
    );

    decide.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn it_keeps_previous_overrides_on_invalid_post() -> Result<()> {
    let evaluator = Arc::new(
        MockFlagEvaluator::new().with_flag("exp-a", FlagValue::Boolean(false), None),
    );
    let server = ServerHandle::with_evaluator(DEFAULT_CONFIG.clone(), evaluator).await;
    let mut cookies = HashMap::new();

    let res = server
        .post_overrides(json!({"flags": {"exp-a": true}}).to_string(), None)
        .await;
    assert_eq!(StatusCode::OK, res.status());
    apply_set_cookies(&mut cookies, &res);

    let res = server
        .post_overrides(
            json!({"flags": "nope"}).to_string(),
            cookie_header(&cookies).as_deref(),
        )
        .await;
    assert_eq!(StatusCode::BAD_REQUEST, res.status());
    assert!(res.headers().get(reqwest::header::SET_COOKIE).is_none());
    assert_eq!(
        res.json::<Value>().await?,
        json!({"ok": false, "error": "Invalid flags"})
    );

    let res = server
        .preview_flags("user-1", cookie_header(&cookies).as_deref())
        .await;
    assert_eq!(
        res.json::<Value>().await?,
        json!({"featureFlags": {"exp-a": true}, "overridden": ["exp-a"]})
    );
    Ok(())
}

#[tokio::test]
async fn it_ignores_a_malformed_cookie() -> Result<()> {
    let evaluator = Arc::new(
        MockFlagEvaluator::new().with_flag("exp-a", FlagValue::Boolean(false), None),
    );
    let server = ServerHandle::with_evaluator(DEFAULT_CONFIG.clone(), evaluator).await;

    let res = server
        .preview_flags("user-1", Some(&format!("{COOKIE_NAME}=not-json")))
        .await;
    assert_eq!(StatusCode::OK, res.status());
    assert_eq!(
        res.json::<Value>().await?,
        json!({"featureFlags": {"exp-a": false}, "overridden": []})
    );
    Ok(())
}

#[tokio::test]
async fn it_reports_upstream_failures() -> Result<()> {
    let mut upstream = mockito::Server::new_async().await;
    let decide = upstream
        .mock("POST", "/decide/")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let mut config = DEFAULT_CONFIG.clone();
    config.posthog_host = Some(upstream.url());
    let server = ServerHandle::for_config(config).await;

    let res = server.preview_flags("user-1", None).await;
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await?,
        expected: json!({"ok": false})
    );

    decide.assert_async().await;
    Ok(())
}
