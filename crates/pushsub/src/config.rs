// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Default Strava endpoints.
pub const DEFAULT_SUBSCRIPTION_URL: &str = "https://www.strava.com/api/v3/push_subscriptions";
pub const DEFAULT_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://www.strava.com/oauth/authorize";

/// Path the OAuth provider redirects back to after authorization.
pub const AUTH_CALLBACK_PATH: &str = "/auth/external/callback";

/// Refresh margins below this are raised to it.
pub const MIN_REFRESH_MARGIN_SECS: u64 = 60;

/// Command-line entry point.
#[derive(Debug, Parser)]
#[command(name = "pushsub", version, about = "Webhook push-subscription manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve the webhook endpoint and keep the subscription reconciled (default).
    Serve,
    /// Delete the remote subscription and forget all local state.
    Uninstall,
    /// Print the persisted subscription record.
    Status,
}

/// Configuration for the subscription service.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "PUSHSUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8123, env = "PUSHSUB_PORT")]
    pub port: u16,

    /// Bearer token for the operator API. If unset, auth is disabled.
    #[arg(long, env = "PUSHSUB_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// OAuth client ID issued by the remote API.
    #[arg(long, env = "PUSHSUB_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// OAuth client secret issued by the remote API.
    #[arg(long, env = "PUSHSUB_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub client_secret: String,

    /// Shared string the remote API echoes back during subscription verification.
    #[arg(long, default_value = "PUSHSUB_VERIFY", env = "PUSHSUB_VERIFY_TOKEN")]
    pub verify_token: String,

    /// Reject challenges whose `hub.verify_token` does not match.
    #[arg(long, env = "PUSHSUB_STRICT_VERIFY_TOKEN")]
    pub strict_verify_token: bool,

    /// Externally-visible base URL of this host (e.g. `https://home.example`).
    #[arg(long, env = "PUSHSUB_EXTERNAL_URL")]
    pub external_url: Option<String>,

    /// File holding the current externally-visible base URL. Re-read periodically.
    #[arg(long, env = "PUSHSUB_EXTERNAL_URL_FILE", conflicts_with = "external_url")]
    pub external_url_file: Option<PathBuf>,

    /// Path the webhook endpoint is served on.
    #[arg(long, default_value = "/api/strava/webhook", env = "PUSHSUB_WEBHOOK_PATH")]
    pub webhook_path: String,

    /// Remote push-subscription endpoint.
    #[arg(long, default_value = DEFAULT_SUBSCRIPTION_URL, env = "PUSHSUB_SUBSCRIPTION_URL")]
    pub subscription_url: String,

    /// OAuth token endpoint.
    #[arg(long, default_value = DEFAULT_TOKEN_URL, env = "PUSHSUB_TOKEN_URL")]
    pub token_url: String,

    /// OAuth authorization endpoint.
    #[arg(long, default_value = DEFAULT_AUTHORIZE_URL, env = "PUSHSUB_AUTHORIZE_URL")]
    pub authorize_url: String,

    /// OAuth scope requested during authorization.
    #[arg(long, default_value = "activity:read", env = "PUSHSUB_SCOPE")]
    pub scope: String,

    /// Directory for persisted subscription and token state.
    #[arg(long, env = "PUSHSUB_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Timeout for calls to the remote API in milliseconds.
    #[arg(long, default_value_t = 10000, env = "PUSHSUB_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Timeout for the callback reachability probe in milliseconds.
    #[arg(long, default_value_t = 5000, env = "PUSHSUB_REACHABILITY_TIMEOUT_MS")]
    pub reachability_timeout_ms: u64,

    /// Refresh the access token this many seconds before it expires.
    #[arg(long, default_value_t = 300, env = "PUSHSUB_REFRESH_MARGIN_SECS")]
    pub refresh_margin_secs: u64,

    /// How often to re-read the external URL source in milliseconds.
    #[arg(long, default_value_t = 30000, env = "PUSHSUB_URL_CHECK_MS")]
    pub url_check_ms: u64,

    /// Log filter (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info", env = "PUSHSUB_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: `text` or `json`.
    #[arg(long, default_value = "text", env = "PUSHSUB_LOG_FORMAT")]
    pub log_format: String,
}

impl Config {
    /// Check cross-field constraints clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_credentials()?;
        if self.external_url.is_none() && self.external_url_file.is_none() {
            anyhow::bail!("one of --external-url or --external-url-file is required");
        }
        if !self.webhook_path.starts_with('/') {
            anyhow::bail!("--webhook-path must start with '/': {}", self.webhook_path);
        }
        if self.webhook_path == AUTH_CALLBACK_PATH || self.webhook_path.starts_with("/api/v1/") {
            anyhow::bail!("--webhook-path collides with a built-in route: {}", self.webhook_path);
        }
        if self.request_timeout_ms == 0 || self.reachability_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        if self.url_check_ms == 0 {
            anyhow::bail!("--url-check-ms must be greater than zero");
        }
        match self.log_format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// The subset of [`Config::validate`] needed without serving.
    pub fn validate_credentials(&self) -> anyhow::Result<()> {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            anyhow::bail!("--client-id and --client-secret are required");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn url_check_interval(&self) -> Duration {
        Duration::from_millis(self.url_check_ms)
    }

    /// Refresh margin with the floor applied.
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs.max(MIN_REFRESH_MARGIN_SECS))
    }

    /// Resolve the state directory.
    ///
    /// Checks `--state-dir`, then `$XDG_STATE_HOME/pushsub`,
    /// then `$HOME/.local/state/pushsub`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("pushsub");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/pushsub");
        }
        PathBuf::from(".pushsub")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
