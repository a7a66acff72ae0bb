//! `qcat` subcommands.
//!
//! Everything except `validate-configuration` runs against an
//! [`AccessBoundary`] assembled from the settings: the configuration
//! directory, the JSON-file store, the search backend and the user
//! directory.

pub(crate) mod admin;
pub(crate) mod validate;

use std::sync::Arc;

use qcat_core::{DomainTables, Registry};
use qcat_engine::{
    AccessBoundary, BoundaryParts, HttpDirectory, StaticDirectory, SystemClock, UserDirectory,
};
use qcat_search::{ElasticsearchBackend, SearchBackend};
use qcat_storage::MemoryStore;
use tracing::{info, warn};

use crate::settings::Settings;

pub(crate) type Boundary<B> = AccessBoundary<MemoryStore, B>;

pub(crate) fn elasticsearch(settings: &Settings) -> ElasticsearchBackend {
    let search = &settings.search;
    let mut backend = ElasticsearchBackend::new(&search.url)
        .with_timeout(std::time::Duration::from_millis(search.timeout_ms));
    if let (Some(username), Some(password)) = (&search.username, &search.password) {
        backend = backend.with_basic_auth(username, password);
    }
    backend
}

/// Load the configurations, open the store and wire the boundary.
pub(crate) async fn open_boundary<B: SearchBackend>(
    settings: &Settings,
    search: Arc<B>,
) -> Result<Boundary<B>, String> {
    let registry = Registry::new(DomainTables::bundled(), settings.features);
    let report = registry
        .load_dir(&settings.configurations_dir)
        .map_err(|e| format!("error loading configurations: {}", e))?;
    for (key, issues) in &report.invalid {
        warn!(configuration = %key, issues = issues.len(), "configuration invalid");
    }
    info!(
        loaded = report.loaded.len(),
        skipped = report.skipped.len(),
        dir = %settings.configurations_dir.display(),
        "configurations loaded"
    );

    let store = MemoryStore::open(&settings.store.path)
        .await
        .map_err(|e| format!("error opening store '{}': {}", settings.store.path.display(), e))?;

    let engine = settings.engine();
    let directory: Arc<dyn UserDirectory> = match settings.directory() {
        Some(directory) => Arc::new(HttpDirectory::new(directory, engine.directory_timeout())),
        None => Arc::new(StaticDirectory::new()),
    };

    Ok(AccessBoundary::new(BoundaryParts {
        store: Arc::new(store),
        registry: Arc::new(registry),
        search,
        index: settings.index(),
        directory,
        clock: Arc::new(SystemClock),
        settings: engine,
        blob_root: settings.blob_root.clone(),
    }))
}
