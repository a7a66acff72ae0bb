//! Process settings read from a TOML file, with environment and flag
//! overrides applied by `main`.
//!
//! ```toml
//! configurations_dir = "configurations"
//! base_url = "https://qcat.example.org"
//!
//! [search]
//! url = "http://localhost:9200"
//! prefix = "qcat_"
//!
//! [store]
//! path = "qcat-store.json"
//!
//! [directory]
//! url = "https://accounts.example.org"
//! api_key = "..."
//! ```
//!
//! A search url of `memory` selects the in-process backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use qcat_core::FeatureToggles;
use qcat_engine::{DirectorySettings, EngineSettings};
use qcat_search::{Analyzers, IndexSettings};
use serde::Deserialize;

pub(crate) const MEMORY_SEARCH: &str = "memory";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub search: SearchSection,
    pub store: StoreSection,
    pub directory: DirectorySection,
    pub configurations_dir: PathBuf,
    pub languages: Vec<String>,
    /// Language code → Elasticsearch analyzer name.
    pub analyzers: BTreeMap<String, String>,
    pub lock_ttl_minutes: i64,
    pub base_url: String,
    pub features: FeatureToggles,
    pub blob_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct SearchSection {
    pub url: String,
    pub prefix: String,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct StoreSection {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DirectorySection {
    /// Unset means users are only known from the local cache.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Settings {
            search: SearchSection::default(),
            store: StoreSection::default(),
            directory: DirectorySection::default(),
            configurations_dir: PathBuf::from("configurations"),
            languages: engine.languages,
            analyzers: BTreeMap::new(),
            lock_ttl_minutes: engine.lock_ttl_minutes,
            base_url: engine.base_url,
            features: FeatureToggles::default(),
            blob_root: None,
        }
    }
}

impl Default for SearchSection {
    fn default() -> Self {
        let index = IndexSettings::default();
        SearchSection {
            url: "http://localhost:9200".to_string(),
            prefix: index.prefix,
            batch_size: index.batch_size,
            timeout_ms: 10_000,
            username: None,
            password: None,
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection {
            path: PathBuf::from("qcat-store.json"),
        }
    }
}

impl Settings {
    /// Read `path`, or fall back to the defaults when no file is given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Settings, String> {
        let Some(path) = path else {
            return Ok(Settings::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("error reading settings '{}': {}", path.display(), e))?;
        Settings::parse(&text).map_err(|e| format!("error parsing settings '{}': {}", path.display(), e))
    }

    pub(crate) fn parse(text: &str) -> Result<Settings, toml::de::Error> {
        toml::from_str(text)
    }

    pub(crate) fn with_overrides(mut self, search_url: Option<String>, prefix: Option<String>) -> Self {
        if let Some(url) = search_url {
            self.search.url = url;
        }
        if let Some(prefix) = prefix {
            self.search.prefix = prefix;
        }
        self
    }

    pub(crate) fn engine(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            lock_ttl_minutes: self.lock_ttl_minutes,
            base_url: self.base_url.clone(),
            languages: self.languages.clone(),
            directory_timeout_ms: self
                .directory
                .timeout_ms
                .unwrap_or(defaults.directory_timeout_ms),
            features: self.features,
        }
    }

    pub(crate) fn index(&self) -> IndexSettings {
        let analyzers = if self.analyzers.is_empty() {
            Analyzers::builtin()
        } else {
            Analyzers::new(self.analyzers.clone())
        };
        IndexSettings {
            prefix: self.search.prefix.clone(),
            languages: self.languages.clone(),
            analyzers,
            batch_size: self.search.batch_size.max(1),
        }
    }

    pub(crate) fn directory(&self) -> Option<DirectorySettings> {
        let url = self.directory.url.clone()?;
        Some(DirectorySettings {
            url,
            api_key: self.directory.api_key.clone(),
            username: self.directory.username.clone(),
            password: self.directory.password.clone(),
        })
    }

    pub(crate) fn in_memory_search(&self) -> bool {
        self.search.url == MEMORY_SEARCH
    }
}
