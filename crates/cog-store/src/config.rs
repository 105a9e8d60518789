use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};

use cog_core::EngineConfig;

use crate::coglets::CogletStore;
use crate::engine::ActivationEngine;
use crate::error::{Result, StoreError};
use crate::index::VectorIndex;
use crate::local_index::{DEFAULT_DIMENSIONS, LocalIndex};
use crate::store::MetadataStore;
use crate::upstash::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS, UpstashConfig, UpstashIndex};

pub const ENV_DATA_DIR: &str = "COGLET_DATA_DIR";
pub const ENV_INDEX_BACKEND: &str = "COGLET_INDEX_BACKEND";
pub const ENV_UPSTASH_URL: &str = "UPSTASH_VECTOR_URL";
pub const ENV_UPSTASH_TOKEN: &str = "UPSTASH_VECTOR_TOKEN";

pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "coglets.db";

/// `~/.cogletnet`, falling back to the working directory without a home.
pub fn default_data_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".cogletnet")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Local,
    Upstash,
}

impl FromStr for IndexBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "upstash" => Ok(Self::Upstash),
            other => Err(StoreError::Config(format!(
                "unknown index backend '{other}' (expected local or upstash)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: IndexBackend,
    pub url: Option<String>,
    pub token: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Embedding width of the local index.
    pub dimensions: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Local,
            url: None,
            token: None,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

/// Everything needed to open an engine: where data lives, which index to
/// talk to, and the engine coefficients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: Option<PathBuf>,
    pub engine: EngineConfig,
    pub index: IndexSettings,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Resolve settings from an explicit file, else `<data_dir>/config.toml`
    /// if present, else defaults. Environment variables win over both.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => Self::load_file(path)?,
            None => {
                let dir = env::var(ENV_DATA_DIR)
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_data_dir());
                let candidate = dir.join(CONFIG_FILE);
                if candidate.is_file() {
                    tracing::debug!("loading settings from {}", candidate.display());
                    Self::load_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(backend) = lookup(ENV_INDEX_BACKEND).filter(|v| !v.is_empty()) {
            self.index.backend = backend.parse()?;
        }
        if let Some(url) = lookup(ENV_UPSTASH_URL).filter(|v| !v.is_empty()) {
            self.index.url = Some(url);
        }
        if let Some(token) = lookup(ENV_UPSTASH_TOKEN).filter(|v| !v.is_empty()) {
            self.index.token = Some(token);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.index.backend == IndexBackend::Upstash
            && (self.index.url.is_none() || self.index.token.is_none())
        {
            return Err(StoreError::Config(format!(
                "upstash backend needs {ENV_UPSTASH_URL} and {ENV_UPSTASH_TOKEN}"
            )));
        }
        if self.index.dimensions == 0 {
            return Err(StoreError::Config("index.dimensions must be > 0".into()));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(DB_FILE)
    }

    pub fn build_index(&self) -> Result<Arc<dyn VectorIndex>> {
        match self.index.backend {
            IndexBackend::Local => {
                let index = LocalIndex::open(&self.db_path(), self.index.dimensions)?;
                Ok(Arc::new(index))
            }
            IndexBackend::Upstash => {
                let config = UpstashConfig {
                    url: self.index.url.clone().unwrap_or_default(),
                    token: self.index.token.clone().unwrap_or_default(),
                    max_retries: self.index.max_retries,
                    timeout: Duration::from_secs(self.index.timeout_secs),
                };
                Ok(Arc::new(UpstashIndex::new(config)?))
            }
        }
    }

    /// Create the data directory if needed and wire store, index and engine.
    pub fn open_engine(&self) -> Result<ActivationEngine> {
        let dir = self.data_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Config(format!("cannot create data dir {}: {e}", dir.display()))
        })?;

        let meta = MetadataStore::open(&self.db_path())?;
        let index = self.build_index()?;
        tracing::info!(
            "opened coglet store at {} with {} index",
            dir.display(),
            index.name()
        );
        let store = CogletStore::new(meta, index, self.engine.clone())?;
        Ok(ActivationEngine::new(Arc::new(store)))
    }
}
