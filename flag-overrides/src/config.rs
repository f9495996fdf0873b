use std::net::SocketAddr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3001")]
    pub address: SocketAddr,

    // Both are required to build the remote evaluator; validated at startup, not here.
    #[envconfig(from = "POSTHOG_API_KEY")]
    pub posthog_api_key: Option<String>,

    #[envconfig(from = "POSTHOG_HOST")]
    pub posthog_host: Option<String>,

    #[envconfig(from = "OVERRIDE_PATH", default = "/api/hfs/override")]
    pub override_path: String,

    #[envconfig(from = "PREVIEW_PATH", default = "/api/hfs/flags")]
    pub preview_path: String,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "3000")]
    pub request_timeout_ms: u64,

    #[envconfig(default = "false")]
    pub enable_metrics: bool,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: bool,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
