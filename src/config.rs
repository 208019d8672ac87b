use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::recommend::DEFAULT_TOP_N;

const CONFIG_FILE: &str = "kindred.toml";

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub embed: EmbedConfig,
    pub recommend: RecommendConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Embedding store file (default: embeddings.json inside the data dir)
    pub embeddings_path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Application database holding courses and progress
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedConfig {
    pub backend: EmbedBackend,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmbedBackend {
    #[serde(rename = "ollama")]
    Ollama { model: String, url: String },
    #[serde(rename = "none")]
    None,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendConfig {
    pub top_n: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                embeddings_path: None,
            },
            catalog: CatalogConfig {
                database_path: None,
            },
            embed: EmbedConfig {
                backend: EmbedBackend::Ollama {
                    model: "all-minilm".into(),
                    url: "http://localhost:11434".into(),
                },
            },
            recommend: RecommendConfig {
                top_n: DEFAULT_TOP_N,
            },
        }
    }
}

impl Config {
    /// Load config from `<data_dir>/kindred.toml`, falling back to defaults.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading config from {}", config_path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("parsing config from {}", config_path.display()))
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve the embedding store path. Relative paths are taken from the
    /// data dir.
    pub fn embeddings_path(&self, data_dir: &Path) -> PathBuf {
        match &self.storage.embeddings_path {
            Some(p) => data_dir.join(p),
            None => data_dir.join("embeddings.json"),
        }
    }

    pub fn catalog_path(&self, data_dir: &Path) -> PathBuf {
        match &self.catalog.database_path {
            Some(p) => data_dir.join(p),
            None => data_dir.join("app.db"),
        }
    }

    /// Effective result count, resolving 0 to the default.
    pub fn effective_top_n(&self) -> usize {
        if self.recommend.top_n == 0 {
            DEFAULT_TOP_N
        } else {
            self.recommend.top_n
        }
    }

    /// Write current config to disk (for `kindred init`).
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let config_path = data_dir.join(CONFIG_FILE);
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)
            .with_context(|| format!("writing config to {}", config_path.display()))?;
        Ok(())
    }
}
