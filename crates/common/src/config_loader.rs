//! Layered configuration: defaults, then the first config file found, then
//! environment overrides.
//!
//! Environment keys take the form `<PREFIX><SECTION>__<KEY>`, for example
//! `MODEL_ROUTER_RATE_LIMIT__MAX_REQUESTS=50` sets `rate_limit.max_requests`.
//! Values are parsed as JSON scalars when possible (`true`, `42`, `0.5`) and
//! fall back to plain strings.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Default,
}

pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Loader looking for `<app_name>.toml` / `<app_name>.json` in the
    /// working directory and `<config_dir>/<app_name>/config.toml`.
    pub fn new(app_name: &str) -> Self {
        Self {
            config_paths: Self::default_config_paths(app_name),
            env_prefix: format!("{}_", app_name.to_uppercase().replace('-', "_")),
        }
    }

    /// Try `path` before the default locations.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_paths.insert(0, path.into());
        self
    }

    /// Only look at the given path.
    pub fn with_only_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_paths = vec![path.into()];
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    fn default_config_paths(app_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(format!("{app_name}.toml")),
            PathBuf::from(format!("{app_name}.json")),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(app_name).join("config.toml"));
            paths.push(config_dir.join(app_name).join("config.json"));
        }

        paths
    }

    /// Load using the process environment (and `.env` if present).
    pub fn load<T>(&self) -> Result<(T, ConfigSource)>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        dotenv::dotenv().ok();
        self.load_with_env(std::env::vars())
    }

    /// Load with an explicit set of environment variables.
    pub fn load_with_env<T, I>(&self, vars: I) -> Result<(T, ConfigSource)>
    where
        T: DeserializeOwned + Serialize + Default,
        I: IntoIterator<Item = (String, String)>,
    {
        let mut tree =
            serde_json::to_value(T::default()).context("Failed to serialize default config")?;
        let mut source = ConfigSource::Default;

        if let Some(path) = self.config_paths.iter().find(|p| p.exists()) {
            let file_tree = Self::load_file(path)?;
            merge(&mut tree, file_tree);
            info!("Loaded configuration from: {}", path.display());
            source = ConfigSource::File(path.clone());
        } else {
            debug!("No configuration file found, using defaults");
        }

        self.apply_env_overrides(&mut tree, vars)?;

        let config = serde_json::from_value(tree).context("Invalid configuration")?;
        Ok((config, source))
    }

    fn load_file(path: &Path) -> Result<Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "json" => serde_json::from_str(&content).context("Failed to parse JSON config"),
            "toml" | "" => {
                let value: toml::Value =
                    toml::from_str(&content).context("Failed to parse TOML config")?;
                serde_json::to_value(value).context("Failed to convert TOML config")
            }
            other => Err(anyhow!("Unsupported config format: {other}")),
        }
    }

    fn apply_env_overrides<I>(&self, tree: &mut Value, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, raw) in vars {
            let Some(rest) = key.strip_prefix(&self.env_prefix) else {
                continue;
            };
            let path: Vec<String> = rest
                .split("__")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect();
            if path.is_empty() {
                continue;
            }

            debug!("Config override from {}", key);
            set_path(tree, &path, parse_scalar(&raw))
                .with_context(|| format!("Cannot apply override {key}"))?;
        }
        Ok(())
    }
}

fn parse_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Array(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

fn set_path(tree: &mut Value, path: &[String], value: Value) -> Result<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| anyhow!("Empty override path"))?;

    let mut node = tree;
    for segment in parents {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .ok_or_else(|| anyhow!("Parent of '{segment}' is not a section"))?
            .entry(segment.clone())
            .or_insert(Value::Null);
    }

    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut()
        .ok_or_else(|| anyhow!("Parent of '{last}' is not a section"))?
        .insert(last.clone(), value);
    Ok(())
}

/// Deep merge `overlay` into `base`; objects merge key by key, everything
/// else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
