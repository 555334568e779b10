// src/config/mod.rs
//! Config loading: file discovery, secret resolution, env overrides.

pub mod harvest;

pub use harvest::{
    CursorStoreConfig, ElasticConfig, EnrichConfig, HarvestConfig, HarvesterConfig,
    RuntimeConfig, SourceConfig, WindowConfig, MAX_LOOKBACK_DAYS,
};

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "HARVEST_CONFIG_PATH";
pub const DEFAULT_TOML_PATH: &str = "config/harvest.toml";
pub const DEFAULT_JSON_PATH: &str = "config/harvest.json";

pub const ENV_ES_URL: &str = "ES_URL";
pub const ENV_ES_USER: &str = "ES_USER";
pub const ENV_ES_PASSWORD: &str = "ES_PASSWORD";
pub const ENV_MASTODON_TOKEN: &str = "MASTODON_ACCESS_TOKEN";
pub const ENV_BLUESKY_PASSWORD: &str = "BLUESKY_APP_PASSWORD";

/// Load from an explicit path; `.json` is read as JSON, anything else as TOML.
pub fn load_from(path: &Path) -> Result<HarvestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading harvest config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = if ext == "json" {
        from_json_str(&content)
    } else {
        from_toml_str(&content)
    }
    .with_context(|| format!("parsing {}", path.display()))?;
    finish(cfg)
}

/// Load using env var + fallbacks:
/// 1) $HARVEST_CONFIG_PATH
/// 2) config/harvest.toml
/// 3) config/harvest.json
pub fn load_default() -> Result<HarvestConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!(
            "{ENV_CONFIG_PATH} points to non-existent path {}",
            pb.display()
        ));
    }
    for p in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
    }
    Err(anyhow!(
        "no harvest config found (set {ENV_CONFIG_PATH} or create {DEFAULT_TOML_PATH})"
    ))
}

pub fn from_toml_str(s: &str) -> Result<HarvestConfig> {
    Ok(toml::from_str(s)?)
}

pub fn from_json_str(s: &str) -> Result<HarvestConfig> {
    Ok(serde_json::from_str(s)?)
}

/// Resolve secrets and env overrides, then validate.
pub fn finish(mut cfg: HarvestConfig) -> Result<HarvestConfig> {
    if let Ok(url) = std::env::var(ENV_ES_URL) {
        if !url.trim().is_empty() {
            cfg.elastic.url = url.trim().to_string();
        }
    }
    if let Ok(user) = std::env::var(ENV_ES_USER) {
        if !user.trim().is_empty() {
            cfg.elastic.user = Some(user.trim().to_string());
        }
    }
    if let Some(pw) = cfg.elastic.password.take() {
        cfg.elastic.password = Some(resolve_secret(&pw, ENV_ES_PASSWORD)?);
    }

    for h in cfg.harvesters.iter_mut().filter(|h| h.enabled) {
        match &mut h.source {
            SourceConfig::Mastodon { access_token, .. } => {
                if let Some(t) = access_token.take() {
                    *access_token = Some(
                        resolve_secret(&t, ENV_MASTODON_TOKEN)
                            .with_context(|| format!("harvester `{}`", h.name))?,
                    );
                }
            }
            SourceConfig::Bluesky { app_password, .. } => {
                *app_password = resolve_secret(app_password, ENV_BLUESKY_PASSWORD)
                    .with_context(|| format!("harvester `{}`", h.name))?;
            }
            SourceConfig::Reddit { .. } => {}
        }
    }

    cfg.validate()?;
    Ok(cfg)
}

/// `"ENV"` (any case) means: read `env_key`.
pub fn resolve_secret(value: &str, env_key: &str) -> Result<String> {
    if value.trim().eq_ignore_ascii_case("env") {
        std::env::var(env_key).map_err(|_| anyhow!("Missing {env_key} env var"))
    } else {
        Ok(value.to_string())
    }
}
