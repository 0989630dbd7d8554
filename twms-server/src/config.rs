//! Server configuration: cache root, bind address, and the layer table.
//!
//! Mirrors `original_source/twms/config.py`'s module-level globals
//! (`deadline`, `cache_tne_ttl`, `max_ram_cached_tiles`, ...) as a single
//! typed, `serde`-deserialized JSON document instead of a Python module.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use twms::{Layer, LayerConfig, ServerDefaults, TwmsResult};

/// Errors loading or parsing a [`ServerConfig`] document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Top-level `twms-server` configuration document.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Directory tiles and TNE markers are cached under.
    pub cache_root: PathBuf,
    /// Address the HTTP server listens on, e.g. `"0.0.0.0:8080"`.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Bound on the process-global in-memory tile LRU.
    #[serde(default = "default_max_ram_tiles")]
    pub max_ram_tiles: usize,
    #[serde(default)]
    pub defaults: ServerDefaultsConfig,
    pub layers: Vec<LayerConfig>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_ram_tiles() -> usize {
    1024
}

/// Wire form of [`ServerDefaults`]; every field optional, falling back to
/// the same values as `original_source/twms/config.py`.
#[derive(Debug, Default, Deserialize)]
pub struct ServerDefaultsConfig {
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub max_height: Option<u32>,
    pub max_width: Option<u32>,
}

impl ServerDefaultsConfig {
    fn resolve(&self) -> ServerDefaults {
        let base = ServerDefaults::default();
        ServerDefaults {
            min_zoom: self.min_zoom.unwrap_or(base.min_zoom),
            max_zoom: self.max_zoom.unwrap_or(base.max_zoom),
            max_height: self.max_height.unwrap_or(base.max_height),
            max_width: self.max_width.unwrap_or(base.max_width),
            ..base
        }
    }
}

impl ServerConfig {
    /// Loads and parses a JSON config document from `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The process-wide defaults this config resolves to, for anything a
    /// [`LayerConfig`] leaves unset.
    #[must_use]
    pub fn resolved_defaults(&self) -> ServerDefaults {
        self.defaults.resolve()
    }

    /// Resolves every [`LayerConfig`] into a runtime [`Layer`], keyed by id.
    ///
    /// # Errors
    /// Returns [`twms::TwmsError`] if any layer names an unsupported
    /// projection.
    pub fn build_layers(&self) -> TwmsResult<HashMap<Arc<str>, Arc<Layer>>> {
        let defaults = self.resolved_defaults();
        let mut out = HashMap::with_capacity(self.layers.len());
        for layer_config in &self.layers {
            let layer = layer_config.clone().into_layer(&defaults)?;
            out.insert(Arc::clone(&layer.id), Arc::new(layer));
        }
        Ok(out)
    }
}
