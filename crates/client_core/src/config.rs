use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::transport::ReconnectPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    /// Fixed history page size used for initial loads and backfills.
    pub page_size: u32,
    pub poll_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub near_bottom_threshold: f32,
    pub backfill_trigger: f32,
    pub title_base: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            page_size: 50,
            poll_interval: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            near_bottom_threshold: 48.0,
            backfill_trigger: 80.0,
            title_base: "Chat".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_url: Option<String>,
    page_size: Option<u32>,
    poll_interval_secs: Option<u64>,
    reconnect_base_ms: Option<u64>,
    reconnect_step_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    near_bottom_threshold_px: Option<f32>,
    backfill_trigger_px: Option<f32>,
    title_base: Option<String>,
}

/// Defaults, then `client.toml` (or `path`), then `APP__*` environment variables.
/// An explicitly named file must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::default();

    let (file_path, required): (PathBuf, bool) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&file_path) {
        Ok(raw) => {
            let file_cfg: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("invalid config file '{}'", file_path.display()))?;
            apply_file(&mut config, file_cfg);
        }
        Err(err) if required => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", file_path.display()));
        }
        Err(_) => debug!(path = %file_path.display(), "config: no config file, using defaults"),
    }

    apply_env(&mut config, |name| std::env::var(name).ok());
    Ok(normalize(config))
}

fn apply_file(config: &mut ClientConfig, file_cfg: FileConfig) {
    if let Some(v) = file_cfg.server_url {
        config.server_url = v;
    }
    if let Some(v) = file_cfg.page_size {
        config.page_size = v;
    }
    if let Some(v) = file_cfg.poll_interval_secs {
        config.poll_interval = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg.reconnect_base_ms {
        config.reconnect.base = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.reconnect_step_ms {
        config.reconnect.step = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.reconnect_max_ms {
        config.reconnect.max = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.near_bottom_threshold_px {
        config.near_bottom_threshold = v;
    }
    if let Some(v) = file_cfg.backfill_trigger_px {
        config.backfill_trigger = v;
    }
    if let Some(v) = file_cfg.title_base {
        config.title_base = v;
    }
}

fn apply_env(config: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("APP__SERVER_URL") {
        config.server_url = v;
    }
    if let Some(v) = lookup("APP__PAGE_SIZE").and_then(|v| v.parse().ok()) {
        config.page_size = v;
    }
    if let Some(v) = lookup("APP__POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.poll_interval = Duration::from_secs(v);
    }
    if let Some(v) = lookup("APP__RECONNECT_BASE_MS").and_then(|v| v.parse().ok()) {
        config.reconnect.base = Duration::from_millis(v);
    }
    if let Some(v) = lookup("APP__RECONNECT_STEP_MS").and_then(|v| v.parse().ok()) {
        config.reconnect.step = Duration::from_millis(v);
    }
    if let Some(v) = lookup("APP__RECONNECT_MAX_MS").and_then(|v| v.parse().ok()) {
        config.reconnect.max = Duration::from_millis(v);
    }
    if let Some(v) = lookup("APP__TITLE_BASE") {
        config.title_base = v;
    }
}

fn normalize(mut config: ClientConfig) -> ClientConfig {
    config.server_url = config.server_url.trim().trim_end_matches('/').to_string();
    config.page_size = config.page_size.clamp(1, MAX_PAGE_SIZE);
    if config.poll_interval.is_zero() {
        config.poll_interval = ClientConfig::default().poll_interval;
    }
    if config.reconnect.max < config.reconnect.base {
        config.reconnect.max = config.reconnect.base;
    }
    config
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
