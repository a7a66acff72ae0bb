//! Administrative operations behind the `qcat` commands.

use std::path::Path;
use std::sync::Arc;

use qcat_core::{Configuration, ConfigurationError};
use qcat_search::{CancellationFlag, RebuildReport, RetryReport, SearchBackend};
use qcat_storage::{AnswerStore, DocumentFilter};
use serde::Serialize;
use tracing::{info, warn};

use crate::boundary::AccessBoundary;
use crate::error::{FieldDiagnostic, QcatError};
use crate::form::validate_payload;
use crate::mail::{DispatchReport, MailDispatcher, MailTransport};
use crate::sync::SyncReport;

/// A stored payload that no longer validates against its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataIssue {
    pub document_id: String,
    pub identifier: String,
    pub version: u32,
    pub configuration: String,
    pub diagnostics: Vec<FieldDiagnostic>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexRepair {
    pub retried: RetryReport,
    pub checked: Vec<SyncReport>,
    pub repaired: usize,
}

impl<S: AnswerStore, B: SearchBackend> AccessBoundary<S, B> {
    /// Validate every stored payload against its configuration.
    pub async fn check_data(&self) -> Result<Vec<DataIssue>, QcatError> {
        let mut issues = Vec::new();
        for doc in self.store.list_documents(&DocumentFilter::default()).await? {
            let key = &doc.configuration;
            let diagnostics = match self.registry.resolve_read_only(&key.code, &key.edition) {
                Ok(config) => validate_payload(&config, &doc.payload),
                Err(e) => vec![FieldDiagnostic::group("configuration", e.to_string())],
            };
            if !diagnostics.is_empty() {
                issues.push(DataIssue {
                    document_id: doc.id.clone(),
                    identifier: doc.identifier.clone(),
                    version: doc.version,
                    configuration: key.to_string(),
                    diagnostics,
                });
            }
        }
        if !issues.is_empty() {
            warn!(count = issues.len(), "stored documents failed validation");
        }
        Ok(issues)
    }

    pub async fn clean_locks(&self) -> Result<Vec<String>, QcatError> {
        self.workflow.clean_locks().await
    }

    /// Rebuild the alias of `code` from the Public documents.
    pub async fn rebuild_index(&self, code: &str, cancel: &CancellationFlag) -> Result<RebuildReport, QcatError> {
        let report = self.sync.rebuild(code, cancel).await?;
        info!(code, index = %report.index, documents = report.documents, "index rebuilt");
        Ok(report)
    }

    /// Rebuild every code with an active edition.
    pub async fn rebuild_all(&self, cancel: &CancellationFlag) -> Result<Vec<RebuildReport>, QcatError> {
        let mut reports = Vec::new();
        for code in self.registry.codes() {
            if self.registry.active(&code).is_err() {
                continue;
            }
            reports.push(self.rebuild_index(&code, cancel).await?);
        }
        Ok(reports)
    }

    pub async fn delete_indices(&self) -> Result<Vec<String>, QcatError> {
        Ok(self.sync.indexer().delete_all().await?)
    }

    /// Replay queued index writes, then compare every alias with the store
    /// and repair what is out of step.
    pub async fn retry_index(&self) -> Result<IndexRepair, QcatError> {
        let mut repair = IndexRepair {
            retried: self.sync.indexer().retry_pending().await,
            ..IndexRepair::default()
        };
        for code in self.registry.codes() {
            let Ok(config) = self.registry.active(&code) else {
                continue;
            };
            self.sync.indexer().ensure_alias(&config).await?;
            let report = self.sync.check(&code).await?;
            if !report.in_sync() {
                repair.repaired += self.sync.repair(&report).await?;
            }
            repair.checked.push(report);
        }
        Ok(repair)
    }

    /// Re-read `<code>_<edition>` from `dir` and replace the cached entry.
    pub fn reload_configuration(
        &self,
        code: &str,
        edition: &str,
        dir: &Path,
    ) -> Result<Arc<Configuration>, QcatError> {
        let path = dir.join(format!("{}_{}.json", code, edition));
        let config = self.registry.reload_with(code, edition, || {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigurationError::Io(format!("{}: {}", path.display(), e)))?;
            Ok(qcat_interchange::from_str(&text)?)
        })?;
        Ok(config)
    }

    /// Drain up to `limit` queued notifications (0 drains all).
    pub async fn send_notifications(
        &self,
        transport: Arc<dyn MailTransport>,
        limit: usize,
    ) -> Result<DispatchReport, QcatError> {
        MailDispatcher::new(
            self.store.clone(),
            transport,
            self.clock.clone(),
            self.settings.clone(),
        )
        .dispatch(limit)
        .await
    }

    /// Delete blobs no stored payload references any more.
    pub async fn collect_blobs(&self) -> Result<Vec<String>, QcatError> {
        self.blobs.collect_unreferenced().await
    }
}
