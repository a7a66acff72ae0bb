//! Process-wide configuration cache keyed by `(code, edition)`.
//!
//! Lifecycle: `load → validate → serve → reload`. Readers take a shared
//! lock on the entry map; reloads of the same key are single-flight so a
//! burst of reload signals rebuilds the configuration once.

use crate::build::build_configuration;
use crate::error::{ConfigIssue, ConfigurationError};
use crate::features::FeatureToggles;
use crate::model::{Configuration, ConfigurationRef, DeltaItem};
use crate::tables::DomainTables;
use qcat_interchange::ConfigurationDocument;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum Entry {
    Ready(Arc<Configuration>),
    /// Forms are refused; the best-effort model still renders stored
    /// documents read-only.
    Invalid {
        configuration: Arc<Configuration>,
        issues: Vec<ConfigIssue>,
    },
}

#[derive(Default)]
struct Flight {
    gate: Mutex<()>,
    generation: AtomicU64,
}

/// Outcome of loading a directory of configuration documents.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<ConfigurationRef>,
    pub invalid: Vec<(ConfigurationRef, Vec<ConfigIssue>)>,
    pub skipped: Vec<String>,
}

pub struct Registry {
    entries: RwLock<HashMap<ConfigurationRef, Entry>>,
    flights: Mutex<HashMap<ConfigurationRef, Arc<Flight>>>,
    tables: DomainTables,
    features: FeatureToggles,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(DomainTables::bundled(), FeatureToggles::default())
    }
}

impl Registry {
    pub fn new(tables: DomainTables, features: FeatureToggles) -> Self {
        Registry {
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            tables,
            features,
        }
    }

    pub fn features(&self) -> FeatureToggles {
        self.features
    }

    pub fn tables(&self) -> &DomainTables {
        &self.tables
    }

    /// Build and cache a document. An invalid document is recorded against
    /// its key and reported as `InvalidConfiguration`.
    pub fn load(&self, doc: &ConfigurationDocument) -> Result<Arc<Configuration>, ConfigurationError> {
        let key = doc.key();
        let built = build_configuration(doc, &self.tables);
        let configuration = Arc::new(built.configuration);
        if built.issues.is_empty() {
            info!(configuration = %key, "configuration loaded");
            self.write_entries()
                .insert(key, Entry::Ready(Arc::clone(&configuration)));
            Ok(configuration)
        } else {
            warn!(
                configuration = %key,
                issues = built.issues.len(),
                "configuration recorded as invalid"
            );
            self.write_entries().insert(
                key.clone(),
                Entry::Invalid {
                    configuration,
                    issues: built.issues.clone(),
                },
            );
            Err(ConfigurationError::InvalidConfiguration {
                key,
                issues: built.issues,
            })
        }
    }

    pub fn load_value(
        &self,
        value: &serde_json::Value,
    ) -> Result<Arc<Configuration>, ConfigurationError> {
        let doc = qcat_interchange::from_document(value)?;
        self.load(&doc)
    }

    /// Load every `*.json` document in `dir`. Invalid documents are
    /// reported, not fatal; unreadable ones abort.
    pub fn load_dir(&self, dir: &Path) -> Result<LoadReport, ConfigurationError> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| ConfigurationError::Io(format!("{}: {}", dir.display(), e)))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        paths.sort();

        let mut report = LoadReport::default();
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigurationError::Io(format!("{}: {}", path.display(), e)))?;
            let doc = qcat_interchange::from_str(&text)?;
            if !self.features.allows_code(&doc.code) {
                debug!(code = %doc.code, "configuration disabled by feature toggle");
                report.skipped.push(path.display().to_string());
                continue;
            }
            match self.load(&doc) {
                Ok(_) => report.loaded.push(doc.key()),
                Err(ConfigurationError::InvalidConfiguration { key, issues }) => {
                    report.invalid.push((key, issues))
                }
                Err(other) => return Err(other),
            }
        }
        Ok(report)
    }

    /// Traversal handle for serving forms.
    pub fn resolve(&self, code: &str, edition: &str) -> Result<Arc<Configuration>, ConfigurationError> {
        let key = ConfigurationRef::new(code, edition);
        match self.read_entries().get(&key) {
            Some(Entry::Ready(c)) => Ok(Arc::clone(c)),
            Some(Entry::Invalid { issues, .. }) => Err(ConfigurationError::InvalidConfiguration {
                key,
                issues: issues.clone(),
            }),
            None => Err(ConfigurationError::UnknownConfiguration(key)),
        }
    }

    /// Traversal handle for rendering stored documents, which stays
    /// available for configurations recorded as invalid.
    pub fn resolve_read_only(
        &self,
        code: &str,
        edition: &str,
    ) -> Result<Arc<Configuration>, ConfigurationError> {
        let key = ConfigurationRef::new(code, edition);
        match self.read_entries().get(&key) {
            Some(Entry::Ready(c)) | Some(Entry::Invalid { configuration: c, .. }) => {
                Ok(Arc::clone(c))
            }
            None => Err(ConfigurationError::UnknownConfiguration(key)),
        }
    }

    pub fn resolve_ref(&self, key: &ConfigurationRef) -> Result<Arc<Configuration>, ConfigurationError> {
        self.resolve(&key.code, &key.edition)
    }

    pub fn issues(&self, code: &str, edition: &str) -> Option<Vec<ConfigIssue>> {
        match self.read_entries().get(&ConfigurationRef::new(code, edition)) {
            Some(Entry::Invalid { issues, .. }) => Some(issues.clone()),
            _ => None,
        }
    }

    /// Newest valid, active edition of `code`.
    pub fn active(&self, code: &str) -> Result<Arc<Configuration>, ConfigurationError> {
        self.read_entries()
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Ready(c) if key.code == code && c.active => Some(c),
                _ => None,
            })
            .max_by(|a, b| compare_editions(&a.edition, &b.edition))
            .map(Arc::clone)
            .ok_or_else(|| ConfigurationError::UnknownConfiguration(ConfigurationRef::new(code, "active")))
    }

    /// All known editions of `code`, oldest first.
    pub fn editions(&self, code: &str) -> Vec<String> {
        let mut editions: Vec<String> = self
            .read_entries()
            .keys()
            .filter(|k| k.code == code)
            .map(|k| k.edition.clone())
            .collect();
        editions.sort_by(|a, b| compare_editions(a, b));
        editions
    }

    /// Distinct configuration codes with at least one valid edition.
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .read_entries()
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Ready(_)))
            .map(|(k, _)| k.code.clone())
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// Deltas leading from edition `from` to edition `to`, oldest first.
    /// Walks `predecessor` links back from `to`.
    pub fn edition_path(
        &self,
        code: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<(String, Vec<DeltaItem>)>, ConfigurationError> {
        let mut steps = Vec::new();
        let mut current = to.to_string();
        while current != from {
            let config = self.resolve_read_only(code, &current)?;
            let predecessor = config.predecessor.clone().ok_or_else(|| {
                ConfigurationError::NotFound {
                    element: "edition path".to_string(),
                    keyword: format!("{}: {} → {}", code, from, to),
                }
            })?;
            steps.push((current.clone(), config.delta.clone()));
            if steps.len() > 64 {
                return Err(ConfigurationError::NotFound {
                    element: "edition path".to_string(),
                    keyword: format!("{}: cycle through '{}'", code, current),
                });
            }
            current = predecessor;
        }
        steps.reverse();
        Ok(steps)
    }

    /// Replace the cached entry for `(code, edition)` with a freshly
    /// loaded document. Concurrent reloads of the same key wait for the
    /// running one and reuse its result.
    pub fn reload_with<F>(
        &self,
        code: &str,
        edition: &str,
        fetch: F,
    ) -> Result<Arc<Configuration>, ConfigurationError>
    where
        F: FnOnce() -> Result<ConfigurationDocument, ConfigurationError>,
    {
        let key = ConfigurationRef::new(code, edition);
        let flight = self.flight(&key);
        let seen = flight.generation.load(AtomicOrdering::Acquire);
        let _gate = flight.gate.lock().unwrap_or_else(|e| e.into_inner());
        if flight.generation.load(AtomicOrdering::Acquire) != seen {
            debug!(configuration = %key, "reload already performed by a concurrent caller");
            return self.resolve(code, edition);
        }

        let doc = fetch()?;
        if doc.key() != key {
            return Err(ConfigurationError::NotFound {
                element: "configuration".to_string(),
                keyword: format!("document is {} but {} was requested", doc.key(), key),
            });
        }
        let result = self.load(&doc);
        flight.generation.fetch_add(1, AtomicOrdering::AcqRel);
        info!(configuration = %key, ok = result.is_ok(), "configuration reloaded");
        result
    }

    pub fn reload(&self, doc: ConfigurationDocument) -> Result<Arc<Configuration>, ConfigurationError> {
        let key = doc.key();
        self.reload_with(&key.code, &key.edition, move || Ok(doc))
    }

    pub fn invalidate(&self, code: &str, edition: &str) {
        self.write_entries()
            .remove(&ConfigurationRef::new(code, edition));
    }

    fn flight(&self, key: &ConfigurationRef) -> Arc<Flight> {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(flights.entry(key.clone()).or_default())
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConfigurationRef, Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConfigurationRef, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Editions compare numerically when both parse, otherwise lexically.
pub fn compare_editions(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
