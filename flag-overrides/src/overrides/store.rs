use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use super::bag::OverridesBag;

pub const COOKIE_NAME: &str = "hfs_server_flag_overrides";
pub const COOKIE_PATH: &str = "/";

/// Anything the override-aware evaluator can read overrides from.
pub trait OverridesSource {
    /// Returns `None` when nothing is stored or the stored value can't be parsed.
    fn read(&self) -> Option<OverridesBag>;
}

impl OverridesSource for Option<OverridesBag> {
    fn read(&self) -> Option<OverridesBag> {
        self.clone()
    }
}

/// Overrides kept in a single cookie on the developer's browser session.
///
/// Built from the request's `Cookie` headers, and returned as part of the
/// response so that writes and clears turn into `Set-Cookie` headers.
#[derive(Debug, Clone, Default)]
pub struct CookieOverridesStore {
    jar: CookieJar,
}

impl CookieOverridesStore {
    pub fn new(jar: CookieJar) -> Self {
        CookieOverridesStore { jar }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::new(CookieJar::from_headers(headers))
    }

    /// Replaces whatever bag was stored before, in full.
    pub fn write(&mut self, bag: &OverridesBag) -> Result<(), serde_json::Error> {
        let value = bag.to_json()?;
        let cookie = Cookie::build((COOKIE_NAME, value)).path(COOKIE_PATH).build();

        self.jar = std::mem::take(&mut self.jar).add(cookie);
        Ok(())
    }

    /// Expires the cookie immediately. Always emits the removal, even if the
    /// request did not carry the cookie.
    pub fn clear(&mut self) {
        let mut cookie = Cookie::build((COOKIE_NAME, "")).path(COOKIE_PATH).build();
        cookie.make_removal();

        self.jar = std::mem::take(&mut self.jar).add(cookie);
    }

    pub fn into_jar(self) -> CookieJar {
        self.jar
    }
}

impl OverridesSource for CookieOverridesStore {
    fn read(&self) -> Option<OverridesBag> {
        let raw = self.jar.get(COOKIE_NAME)?.value();
        if raw.is_empty() {
            return None;
        }

        match OverridesBag::from_json(raw) {
            Ok(bag) => Some(bag),
            Err(e) => {
                tracing::debug!("ignoring malformed overrides cookie: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CookieOverridesStore
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

impl IntoResponseParts for CookieOverridesStore {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        self.jar.into_response_parts(res)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::HeaderValue;
    use axum::response::IntoResponse;
    use serde_json::json;

    use super::*;
    use crate::overrides::FlagValue;

    fn sample_bag() -> OverridesBag {
        OverridesBag::new(
            HashMap::from([
                ("exp-a".to_string(), FlagValue::Boolean(true)),
                ("exp-b".to_string(), FlagValue::Null),
            ]),
            HashMap::from([("exp-a".to_string(), json!({"variant": "on"}))]),
        )
    }

    fn store_with_cookie(raw: &str) -> CookieOverridesStore {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{COOKIE_NAME}={raw}")).unwrap(),
        );
        CookieOverridesStore::from_headers(&headers)
    }

    fn set_cookie_headers(store: CookieOverridesStore) -> Vec<String> {
        let response = (store, "ok").into_response();
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_read_without_cookie_is_none() {
        let store = CookieOverridesStore::default();
        assert_eq!(store.read(), None);
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let mut store = CookieOverridesStore::default();
        let bag = sample_bag();

        store.write(&bag).unwrap();

        assert_eq!(store.read(), Some(bag));
    }

    #[test]
    fn test_write_replaces_previous_bag() {
        let mut store = CookieOverridesStore::default();
        store.write(&sample_bag()).unwrap();

        let replacement = OverridesBag::new(
            HashMap::from([("exp-c".to_string(), FlagValue::from("test"))]),
            HashMap::new(),
        );
        store.write(&replacement).unwrap();

        assert_eq!(store.read(), Some(replacement));
    }

    #[test]
    fn test_malformed_cookie_reads_as_none() {
        let store = store_with_cookie("%7Bnot-json");
        assert_eq!(store.read(), None);
    }

    #[test]
    fn test_reads_percent_encoded_cookie() {
        let store = store_with_cookie("%7B%22flags%22%3A%7B%22exp-a%22%3Atrue%7D%7D");

        let bag = store.read().unwrap();
        assert_eq!(bag.flag("exp-a"), Some(&FlagValue::Boolean(true)));
        assert!(bag.payloads.is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut store = CookieOverridesStore::default();
        store.write(&sample_bag()).unwrap();

        store.clear();
        assert_eq!(store.read(), None);
        store.clear();
        assert_eq!(store.read(), None);
    }

    #[test]
    fn test_clear_emits_expired_cookie() {
        let mut store = CookieOverridesStore::default();
        store.clear();

        let headers = set_cookie_headers(store);
        assert_eq!(headers.len(), 1);
        assert!(headers[0].starts_with(&format!("{COOKIE_NAME}=;")));
        assert!(headers[0].contains("Max-Age=0"));
        assert!(headers[0].contains("Path=/"));
    }

    #[test]
    fn test_write_emits_session_cookie() {
        let mut store = CookieOverridesStore::default();
        store.write(&sample_bag()).unwrap();

        let headers = set_cookie_headers(store);
        assert_eq!(headers.len(), 1);
        assert!(headers[0].starts_with(&format!("{COOKIE_NAME}=")));
        assert!(headers[0].contains("Path=/"));
        assert!(!headers[0].contains("Max-Age"));
        assert!(!headers[0].contains("Expires"));
    }
}
