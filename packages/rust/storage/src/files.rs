//! Filesystem content store for original copies and result files.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/content/original-<timestamp>-<nonce>.txt
//! <data_dir>/results/<run_id>.json
//! ```
//!
//! Every write goes to a `.tmp-` sibling first and is renamed into place, so
//! a reader never observes a partially written file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use brandlens_shared::{BrandlensError, PipelineResult, Result, RunId, StorageRef};

/// Durable storage for full-length originals and final results.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Persist the full original content, returning where it was written.
    async fn persist_original(&self, content: &str) -> Result<StorageRef>;

    /// Read back a previously persisted original.
    async fn load_original(&self, reference: &StorageRef) -> Result<String>;

    /// Persist the result document of a successful run.
    async fn save_result(&self, result: &PipelineResult) -> Result<PathBuf>;

    /// Read the result document of a run, if one was written.
    async fn load_result(&self, run_id: &RunId) -> Result<Option<PipelineResult>>;
}

/// [`ContentStore`] rooted at a data directory on local disk.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    /// Path of a result file for `run_id`.
    pub fn result_path(&self, run_id: &RunId) -> PathBuf {
        self.results_dir().join(format!("{run_id}.json"))
    }

    fn original_path(&self, reference: &StorageRef) -> Result<PathBuf> {
        let name = reference.0.as_str();
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || !name.starts_with("original-")
        {
            return Err(BrandlensError::Storage(format!(
                "invalid content reference: {name}"
            )));
        }
        Ok(self.content_dir().join(name))
    }
}

/// Write `bytes` to `target` via a temporary sibling and an atomic rename.
///
/// The write runs to completion on the blocking pool even if the returned
/// future is dropped, so a caller's timeout never strands a half-written
/// temp file.
async fn write_atomic(target: &Path, bytes: Vec<u8>) -> Result<()> {
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &bytes))
        .await
        .map_err(|e| BrandlensError::Storage(format!("write task failed: {e}")))?
}

fn write_atomic_blocking(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| BrandlensError::Storage(format!("no parent for {}", target.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| BrandlensError::io(dir, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = TempFile(dir.join(format!(".tmp-{file_name}")));

    std::fs::write(&temp.0, bytes).map_err(|e| BrandlensError::io(&temp.0, e))?;
    std::fs::rename(&temp.0, target).map_err(|e| BrandlensError::io(target, e))?;
    temp.persisted();
    Ok(())
}

/// Temp file removed on drop unless it was renamed into place.
struct TempFile(PathBuf);

impl TempFile {
    fn persisted(self) {
        std::mem::forget(self);
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn persist_original(&self, content: &str) -> Result<StorageRef> {
        let name = format!(
            "original-{}-{}.txt",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            Uuid::new_v4().simple()
        );
        let reference = StorageRef(name);
        let path = self.original_path(&reference)?;
        write_atomic(&path, content.as_bytes().to_vec()).await?;
        debug!(path = %path.display(), bytes = content.len(), "original content persisted");
        Ok(reference)
    }

    async fn load_original(&self, reference: &StorageRef) -> Result<String> {
        let path = self.original_path(reference)?;
        fs::read_to_string(&path)
            .await
            .map_err(|e| BrandlensError::io(&path, e))
    }

    async fn save_result(&self, result: &PipelineResult) -> Result<PathBuf> {
        let path = self.result_path(&result.id);
        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| BrandlensError::Storage(format!("serialize result: {e}")))?;
        write_atomic(&path, json).await?;
        debug!(path = %path.display(), "result written");
        Ok(path)
    }

    async fn load_result(&self, run_id: &RunId) -> Result<Option<PipelineResult>> {
        let path = self.result_path(run_id);
        match fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| BrandlensError::Storage(format!("invalid result file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BrandlensError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandlens_shared::{BrandProfile, CompetitorAnalysis, ProcessedContent};

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("bl_files_{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn original_roundtrip() {
        let root = temp_root();
        let store = FsContentStore::new(&root);

        let content = "Acme ".repeat(1000);
        let reference = store.persist_original(&content).await.expect("persist");
        assert!(reference.0.starts_with("original-"));
        assert!(reference.0.ends_with(".txt"));

        let loaded = store.load_original(&reference).await.expect("load");
        assert_eq!(loaded, content);

        let leftovers: Vec<_> = std::fs::read_dir(store.content_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    fn temp_leftovers(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let root = temp_root();
        let target = root.join("content").join("original-taken.txt");
        // a directory where the file should go makes the rename fail
        std::fs::create_dir_all(&target).unwrap();

        let err = write_atomic(&target, b"Acme".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), brandlens_shared::ErrorKind::IoError);
        assert_eq!(temp_leftovers(&root.join("content")), 0);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn abandoned_persist_leaves_no_temp_file() {
        let root = temp_root();
        let store = FsContentStore::new(&root);
        let content = "Acme ".repeat(200_000);

        let _ =
            tokio::time::timeout(std::time::Duration::ZERO, store.persist_original(&content)).await;

        // the detached write finishes on the blocking pool
        let mut settled = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if temp_leftovers(&store.content_dir()) == 0 {
                settled = true;
                break;
            }
        }
        assert!(settled, "temp file left in {}", store.content_dir().display());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn originals_get_distinct_references() {
        let root = temp_root();
        let store = FsContentStore::new(&root);
        let a = store.persist_original("same").await.unwrap();
        let b = store.persist_original("same").await.unwrap();
        assert_ne!(a, b);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn rejects_traversal_references() {
        let store = FsContentStore::new(temp_root());
        for bad in ["../etc/passwd", "original-../../x", "original-a/b.txt", "notes.txt", ""] {
            let result = store.load_original(&StorageRef(bad.into())).await;
            assert!(result.is_err(), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn result_roundtrip_and_missing() {
        let root = temp_root();
        let store = FsContentStore::new(&root);

        let result = PipelineResult {
            id: RunId::new(),
            url: "https://acme.example".into(),
            brand_profile: BrandProfile {
                name: "Acme".into(),
                tagline: None,
                summary: "Rockets".into(),
                industry: None,
                target_audience: vec![],
                value_propositions: vec![],
                tone_of_voice: None,
                keywords: vec![],
            },
            competitor_analysis: CompetitorAnalysis {
                competitors: vec![],
                market_summary: None,
            },
            content: ProcessedContent {
                content: "Rockets".into(),
                length: 7,
                original_length: 7,
                truncated: false,
                original_ref: StorageRef("original-x.txt".into()),
            },
            created_at: Utc::now(),
        };

        let path = store.save_result(&result).await.expect("save");
        assert!(path.ends_with(format!("{}.json", result.id)));

        let loaded = store.load_result(&result.id).await.unwrap().expect("exists");
        assert_eq!(loaded, result);

        assert!(store.load_result(&RunId::new()).await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(&root);
    }
}
