//! Content-addressed storage for uploaded files and images.
//!
//! Bytes live under `<root>/<hh>/<hh>/<sha256>`; images additionally get
//! thumbnail paths for the size tags in [`THUMBNAIL_SIZES`]. Rendering the
//! thumbnails themselves happens outside the engine.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use qcat_core::Question;
use qcat_storage::{AnswerStore, BlobRecord, DocumentFilter};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{timestamp, Clock};
use crate::error::QcatError;

pub const THUMBNAIL_SIZES: [&str; 4] = ["default", "small", "medium", "large"];

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Relative storage path of content with the given digest.
pub fn content_path(sha256: &str) -> String {
    match (sha256.get(0..2), sha256.get(2..4)) {
        (Some(a), Some(b)) => format!("{}/{}/{}", a, b, sha256),
        _ => sha256.to_string(),
    }
}

/// URL under which the web layer serves a thumbnail variant.
pub fn thumbnail_url(uuid: &str, size: &str) -> String {
    format!("/upload/{}/{}/", uuid, size)
}

pub struct BlobRegistry<S: AnswerStore> {
    store: Arc<S>,
    root: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl<S: AnswerStore> BlobRegistry<S> {
    /// `root` is where bytes are written; `None` keeps metadata only.
    pub fn new(store: Arc<S>, root: Option<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        BlobRegistry { store, root, clock }
    }

    /// Store an upload. Identical bytes return the existing record.
    pub async fn upload(&self, bytes: &[u8], content_type: &str) -> Result<BlobRecord, QcatError> {
        let sha256 = sha256_hex(bytes);
        let path = content_path(&sha256);
        let thumbnails = if content_type.starts_with("image/") {
            THUMBNAIL_SIZES
                .iter()
                .map(|size| (size.to_string(), format!("{}_{}", path, size)))
                .collect()
        } else {
            Default::default()
        };
        let candidate = BlobRecord {
            uuid: Uuid::new_v4().to_string(),
            sha256,
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            path,
            thumbnails,
            created: timestamp(self.clock.now()),
        };
        let stored = self.store.put_blob(candidate.clone()).await?;
        if stored.uuid != candidate.uuid {
            debug!(uuid = %stored.uuid, "upload matched existing content");
            return Ok(stored);
        }
        if let Some(root) = &self.root {
            let target = root.join(&stored.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| QcatError::ExternalUnavailable(format!("{}: {}", parent.display(), e)))?;
            }
            tokio::fs::write(&target, bytes)
                .await
                .map_err(|e| QcatError::ExternalUnavailable(format!("{}: {}", target.display(), e)))?;
        }
        info!(uuid = %stored.uuid, size = stored.size, "upload stored");
        Ok(stored)
    }

    /// Delete blobs that no document payload mentions. Returns their uuids.
    pub async fn collect_unreferenced(&self) -> Result<Vec<String>, QcatError> {
        let mut referenced = BTreeSet::new();
        for doc in self.store.list_documents(&DocumentFilter::default()).await? {
            collect_strings(&doc.payload, &mut referenced);
        }
        let mut deleted = Vec::new();
        for blob in self.store.list_blobs().await? {
            if referenced.contains(&blob.uuid) {
                continue;
            }
            self.store.delete_blob(&blob.uuid).await?;
            if let Some(root) = &self.root {
                let files = std::iter::once(&blob.path).chain(blob.thumbnails.values());
                for file in files {
                    if let Err(e) = tokio::fs::remove_file(root.join(file)).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(uuid = %blob.uuid, file = %file, error = %e, "could not remove blob file");
                        }
                    }
                }
            }
            deleted.push(blob.uuid);
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), "unreferenced blobs deleted");
        }
        Ok(deleted)
    }
}

/// Check an upload against the constraints of a file or image question.
pub fn check_upload(question: &Question, blob: &BlobRecord) -> Result<(), String> {
    let constraints = &question.constraints;
    if !constraints.allowed_mime.is_empty()
        && !constraints.allowed_mime.iter().any(|m| *m == blob.content_type)
    {
        return Err(format!(
            "file type {} is not allowed (allowed: {})",
            blob.content_type,
            constraints.allowed_mime.join(", ")
        ));
    }
    if let Some(max) = constraints.max_file_size {
        if blob.size > max {
            return Err(format!("file is {} bytes, at most {} allowed", blob.size, max));
        }
    }
    Ok(())
}

fn collect_strings(value: &Json, out: &mut BTreeSet<String>) {
    match value {
        Json::String(s) => {
            out.insert(s.clone());
        }
        Json::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Json::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use qcat_storage::conformance::make_document;
    use qcat_storage::MemoryStore;
    use serde_json::json;

    #[test]
    fn paths_are_sharded_by_digest() {
        let sha = sha256_hex(b"hello");
        assert_eq!(
            sha,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content_path(&sha), format!("2c/f2/{}", sha));
    }

    #[tokio::test]
    async fn uploads_deduplicate_and_unreferenced_blobs_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let blobs = BlobRegistry::new(
            store.clone(),
            Some(dir.path().to_path_buf()),
            Arc::new(SystemClock),
        );

        let image = blobs.upload(b"png-bytes", "image/png").await.unwrap();
        assert_eq!(image.thumbnails.len(), 4);
        assert!(dir.path().join(&image.path).exists());
        let again = blobs.upload(b"png-bytes", "image/png").await.unwrap();
        assert_eq!(again.uuid, image.uuid);
        let pdf = blobs.upload(b"%PDF", "application/pdf").await.unwrap();
        assert!(pdf.thumbnails.is_empty());

        let mut doc = make_document("d1", "sample_1", 1);
        doc.payload = json!({"qg_12": [{"key_17": image.uuid}]});
        let mut snap = store.begin_snapshot().await.unwrap();
        store.insert_document(&mut snap, doc).await.unwrap();
        store.commit_snapshot(snap).await.unwrap();

        let deleted = blobs.collect_unreferenced().await.unwrap();
        assert_eq!(deleted, vec![pdf.uuid.clone()]);
        assert!(store.get_blob(&pdf.uuid).await.is_err());
        assert!(store.get_blob(&image.uuid).await.is_ok());
    }
}
