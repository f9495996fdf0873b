use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use url::Url;

use super::{OverrideTransport, SyncError};
use crate::overrides::OverridesBag;

/// Talks to the override endpoint over HTTP. No retries: a failed request
/// leaves the server with whatever it stored last.
///
/// The server keeps overrides in a cookie, so requests go through a cookie
/// jar. Share the jar with other clients to evaluate within the same session.
#[derive(Clone)]
pub struct HttpOverrideTransport {
    endpoint: Url,
    client: reqwest::Client,
    cookies: Arc<Jar>,
}

impl HttpOverrideTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_cookie_jar(endpoint, timeout, Arc::new(Jar::default()))
    }

    pub fn with_cookie_jar(
        endpoint: Url,
        timeout: Duration,
        cookies: Arc<Jar>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_provider(cookies.clone())
            .build()?;

        Ok(HttpOverrideTransport {
            endpoint,
            client,
            cookies,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.cookies.clone()
    }

    fn check(response: reqwest::Response) -> Result<(), SyncError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::UnexpectedStatus(status))
        }
    }
}

#[async_trait]
impl OverrideTransport for HttpOverrideTransport {
    async fn push(&self, bag: &OverridesBag) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(bag)
            .send()
            .await?;

        Self::check(response)
    }

    async fn clear(&self) -> Result<(), SyncError> {
        let response = self.client.delete(self.endpoint.clone()).send().await?;

        Self::check(response)
    }
}
