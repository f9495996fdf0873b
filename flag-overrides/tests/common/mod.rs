use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use flag_overrides::config::Config;
use flag_overrides::evaluator::{FlagEvaluator, RemoteFlagEvaluator};
use flag_overrides::server::serve;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| Config {
    address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
    posthog_api_key: Some("phc_test_token".to_string()),
    posthog_host: None,
    override_path: "/api/hfs/override".to_string(),
    preview_path: "/api/hfs/flags".to_string(),
    request_timeout_ms: 1000,
    enable_metrics: false,
    debug: false,
});

pub struct ServerHandle {
    pub addr: SocketAddr,
    config: Config,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Serves with a remote evaluator pointed at `config.posthog_host`.
    pub async fn for_config(config: Config) -> ServerHandle {
        let evaluator = RemoteFlagEvaluator::from_config(&config).unwrap();
        Self::with_evaluator(config, Arc::new(evaluator)).await
    }

    pub async fn with_evaluator(
        config: Config,
        evaluator: Arc<dyn FlagEvaluator + Send + Sync>,
    ) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let server_config = config.clone();

        tokio::spawn(async move {
            serve(server_config, evaluator, listener, async move {
                notify.notified().await
            })
            .await
        });
        ServerHandle {
            addr,
            config,
            shutdown,
        }
    }

    pub fn override_url(&self) -> String {
        format!("http://{:?}{}", self.addr, self.config.override_path)
    }

    pub async fn post_overrides<T: Into<reqwest::Body>>(
        &self,
        body: T,
        cookie: Option<&str>,
    ) -> reqwest::Response {
        let mut request = reqwest::Client::new()
            .post(self.override_url())
            .body(body)
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.expect("failed to send request")
    }

    pub async fn delete_overrides(&self, cookie: Option<&str>) -> reqwest::Response {
        let mut request = reqwest::Client::new().delete(self.override_url());
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.expect("failed to send request")
    }

    pub async fn preview_flags(&self, distinct_id: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = reqwest::Client::new()
            .get(format!("http://{:?}{}", self.addr, self.config.preview_path))
            .query(&[("distinct_id", distinct_id)]);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.expect("failed to send request")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

/// Applies a response's Set-Cookie headers to a browser-style cookie map.
pub fn apply_set_cookies(cookies: &mut HashMap<String, String>, response: &reqwest::Response) {
    for header in response.headers().get_all(SET_COOKIE) {
        let header = header.to_str().unwrap();
        let pair = header.split(';').next().unwrap();
        let (name, value) = pair.split_once('=').unwrap();
        if value.is_empty() || header.contains("Max-Age=0") {
            cookies.remove(name);
        } else {
            cookies.insert(name.to_string(), value.to_string());
        }
    }
}

pub fn cookie_header(cookies: &HashMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
