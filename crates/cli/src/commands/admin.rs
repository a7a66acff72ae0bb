//! Administrative commands run against the access boundary.

use std::sync::Arc;

use qcat_engine::LogTransport;
use qcat_search::{CancellationFlag, MemorySearchBackend, SearchBackend};
use serde_json::{json, Value};
use tracing::warn;

use super::{elasticsearch, open_boundary, Boundary};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Task {
    Reindex { code: Option<String> },
    DeleteIndices,
    ReloadConfiguration { code: String, edition: String },
    SendNotifications { limit: usize },
    CheckData,
    CleanLocks,
    RetryIndex,
    CollectBlobs,
}

/// What a command prints: a line for text output, a value for JSON
/// output, and whether the run counts as a failure.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub text: String,
    pub json: Value,
    pub failed: bool,
}

impl Outcome {
    fn ok(text: impl Into<String>, json: Value) -> Self {
        Outcome {
            text: text.into(),
            json,
            failed: false,
        }
    }
}

pub(crate) async fn run(task: Task, settings: &Settings) -> Result<Outcome, String> {
    if settings.in_memory_search() {
        run_with(task, settings, Arc::new(MemorySearchBackend::new())).await
    } else {
        run_with(task, settings, Arc::new(elasticsearch(settings))).await
    }
}

async fn run_with<B: SearchBackend>(task: Task, settings: &Settings, search: Arc<B>) -> Result<Outcome, String> {
    let qcat = open_boundary(settings, search).await?;
    execute(&qcat, task, settings).await
}

async fn execute<B: SearchBackend>(qcat: &Boundary<B>, task: Task, settings: &Settings) -> Result<Outcome, String> {
    match task {
        Task::Reindex { code } => {
            let cancel = CancellationFlag::new();
            let on_interrupt = cancel.clone();
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted; cancelling rebuild");
                    on_interrupt.cancel();
                }
            });
            let reports = match code {
                Some(code) => qcat.rebuild_index(&code, &cancel).await.map(|r| vec![r]),
                None => qcat.rebuild_all(&cancel).await,
            };
            watcher.abort();
            let reports = reports.map_err(|e| e.to_string())?;
            let text = reports
                .iter()
                .map(|r| format!("{}: {} documents in {} batches", r.index, r.documents, r.batches))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Outcome::ok(text, json!({ "rebuilt": reports })))
        }
        Task::DeleteIndices => {
            let deleted = qcat.delete_indices().await.map_err(|e| e.to_string())?;
            Ok(Outcome::ok(
                format!("deleted {} indices", deleted.len()),
                json!({ "deleted": deleted }),
            ))
        }
        Task::ReloadConfiguration { code, edition } => {
            let config = qcat
                .reload_configuration(&code, &edition, &settings.configurations_dir)
                .map_err(|e| e.to_string())?;
            let key = config.key();
            Ok(Outcome::ok(
                format!("reloaded {}_{}", key.code, key.edition),
                json!({ "reloaded": { "code": key.code, "edition": key.edition } }),
            ))
        }
        Task::SendNotifications { limit } => {
            let report = qcat
                .send_notifications(Arc::new(LogTransport), limit)
                .await
                .map_err(|e| e.to_string())?;
            Ok(Outcome {
                text: format!(
                    "sent {}, skipped {}, failed {}",
                    report.sent, report.skipped, report.failed
                ),
                json: json!(report),
                failed: report.failed > 0,
            })
        }
        Task::CheckData => {
            let issues = qcat.check_data().await.map_err(|e| e.to_string())?;
            let mut lines = vec![format!("{} documents with issues", issues.len())];
            for issue in &issues {
                lines.push(format!(
                    "{} (version {}, {}):",
                    issue.identifier, issue.version, issue.configuration
                ));
                lines.extend(issue.diagnostics.iter().map(|d| format!("  - {}", d)));
            }
            Ok(Outcome {
                text: lines.join("\n"),
                json: json!({ "issues": issues }),
                failed: !issues.is_empty(),
            })
        }
        Task::CleanLocks => {
            let cleared = qcat.clean_locks().await.map_err(|e| e.to_string())?;
            Ok(Outcome::ok(
                format!("cleared {} expired locks", cleared.len()),
                json!({ "cleared": cleared }),
            ))
        }
        Task::RetryIndex => {
            let repair = qcat.retry_index().await.map_err(|e| e.to_string())?;
            Ok(Outcome::ok(
                format!(
                    "retried {} ({} failed), checked {} aliases, repaired {} documents",
                    repair.retried.succeeded,
                    repair.retried.failed,
                    repair.checked.len(),
                    repair.repaired
                ),
                json!(repair),
            ))
        }
        Task::CollectBlobs => {
            let removed = qcat.collect_blobs().await.map_err(|e| e.to_string())?;
            Ok(Outcome::ok(
                format!("removed {} unreferenced blobs", removed.len()),
                json!({ "removed": removed }),
            ))
        }
    }
}
