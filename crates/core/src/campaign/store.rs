//! Filesystem-backed campaign store.
//!
//! Each campaign lives in its own directory under the store root:
//!
//! ```text
//! <root>/<campaign-id>/
//!     metadata.json    campaign metadata document
//!     db.jsonl         persisted work-item table
//!     files/*.jsonl    one append-only output document per finished unit
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::record::CampaignRecord;
use super::table;
use super::types::{CampaignKind, CampaignMeta, ItemStatus, WorkItem};

const TABLE_FILE: &str = "db.jsonl";
const META_FILE: &str = "metadata.json";
const FILES_DIR: &str = "files";

/// Error type for campaign persistence.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// No campaign directory for this id.
    #[error("campaign not found: {0}")]
    NotFound(String),

    /// Create collided with an existing campaign.
    #[error("campaign already exists: {0}")]
    AlreadyExists(String),

    /// The persisted table or metadata document is missing or unparsable.
    /// Fatal for the campaign; the only automatic repairs are the `end`
    /// field migration and the legacy status normalization.
    #[error("corrupt campaign store: {0}")]
    CorruptStore(String),

    /// Malformed creation request (bad id, missing batch indices, ...).
    #[error("invalid campaign request: {0}")]
    InvalidRequest(String),

    /// Filesystem error outside the parse path.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One work item in a creation request; expands to a `free` table row.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewWorkItem {
    pub dataset: String,
    pub split: String,
    pub setup_id: String,
    pub example_idx: usize,
    #[serde(default)]
    pub batch_idx: Option<u32>,
    #[serde(default)]
    pub annotator_group: Option<u32>,
}

/// Request to create a new campaign.
#[derive(Debug, Clone)]
pub struct CreateCampaignRequest {
    /// Slug-like identifier, immutable after creation.
    pub id: String,
    pub kind: CampaignKind,
    /// Opaque configuration, stored and passed through to workers.
    pub config: Value,
    pub items: Vec<NewWorkItem>,
}

/// Filesystem-backed campaign store.
pub struct FsCampaignStore {
    root: PathBuf,
}

impl FsCampaignStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CampaignError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn campaign_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.campaign_dir(id).join(META_FILE).exists()
    }

    /// Creates a campaign directory with all items free.
    pub fn create(&self, request: CreateCampaignRequest) -> Result<CampaignRecord, CampaignError> {
        validate_id(&request.id)?;
        if request.kind.is_human() && request.items.iter().any(|it| it.batch_idx.is_none()) {
            return Err(CampaignError::InvalidRequest(
                "human campaign items must carry a batch_idx".to_string(),
            ));
        }

        let dir = self.campaign_dir(&request.id);
        if dir.exists() {
            return Err(CampaignError::AlreadyExists(request.id));
        }
        fs::create_dir_all(dir.join(FILES_DIR))?;

        let items: Vec<WorkItem> = request
            .items
            .into_iter()
            .map(|it| WorkItem {
                dataset: it.dataset,
                split: it.split,
                setup_id: it.setup_id,
                example_idx: it.example_idx,
                batch_idx: it.batch_idx,
                annotator_group: it.annotator_group,
                status: ItemStatus::Free,
                annotator_id: String::new(),
                start: None,
                end: None,
            })
            .collect();

        let meta = CampaignMeta::new(&request.id, request.kind, request.config);
        table::rewrite_table(&dir.join(TABLE_FILE), &items)?;
        self.save_meta(&meta)?;

        info!(
            "Created {} campaign {} with {} items",
            meta.kind,
            meta.id,
            items.len()
        );
        Ok(CampaignRecord { meta, items })
    }

    /// Loads a campaign, applying the `end` field migration and the legacy
    /// status normalization; either repair rewrites the affected file
    /// immediately so it is observed at most once.
    pub fn load(&self, id: &str) -> Result<CampaignRecord, CampaignError> {
        let dir = self.campaign_dir(id);
        if !dir.exists() {
            return Err(CampaignError::NotFound(id.to_string()));
        }

        let (meta, meta_dirty) = self.load_meta(id)?;
        let (items, migrated) = table::load_table(&dir.join(TABLE_FILE))?;

        if migrated {
            info!("Migrating table of campaign {}: adding end field", id);
            table::rewrite_table(&dir.join(TABLE_FILE), &items)?;
        }
        if meta_dirty {
            self.save_meta(&meta)?;
        }

        Ok(CampaignRecord { meta, items })
    }

    fn load_meta(&self, id: &str) -> Result<(CampaignMeta, bool), CampaignError> {
        let path = self.campaign_dir(id).join(META_FILE);
        let raw = fs::read_to_string(&path).map_err(|e| {
            CampaignError::CorruptStore(format!("cannot read metadata {}: {}", path.display(), e))
        })?;
        let mut doc: Value = serde_json::from_str(&raw).map_err(|e| {
            CampaignError::CorruptStore(format!("unparsable metadata {}: {}", path.display(), e))
        })?;

        // Campaigns written by old versions used "new"/"paused" statuses;
        // both collapse to idle.
        let mut dirty = false;
        if let Some(status) = doc.get("status").and_then(Value::as_str) {
            if status == "new" || status == "paused" {
                doc["status"] = Value::String("idle".to_string());
                dirty = true;
            }
        }

        let meta: CampaignMeta = serde_json::from_value(doc).map_err(|e| {
            CampaignError::CorruptStore(format!("invalid metadata {}: {}", path.display(), e))
        })?;
        Ok((meta, dirty))
    }

    /// Atomically rewrites the persisted table from the record's rows.
    pub fn save_table(&self, record: &CampaignRecord) -> Result<(), CampaignError> {
        let dir = self.campaign_dir(record.id());
        if !dir.exists() {
            return Err(CampaignError::NotFound(record.id().to_string()));
        }
        table::rewrite_table(&dir.join(TABLE_FILE), &record.items)
    }

    /// Atomically rewrites the metadata document.
    pub fn save_meta(&self, meta: &CampaignMeta) -> Result<(), CampaignError> {
        let path = self.campaign_dir(&meta.id).join(META_FILE);
        let tmp = path.with_extension("json.tmp");
        let doc = serde_json::to_string_pretty(meta).map_err(|e| {
            CampaignError::CorruptStore(format!("cannot encode metadata: {}", e))
        })?;
        fs::write(&tmp, doc)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// All campaign metadata documents, newest first. Directories that do
    /// not parse are skipped with a warning rather than failing the whole
    /// listing.
    pub fn list(&self) -> Result<Vec<CampaignMeta>, CampaignError> {
        let mut metas = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if !entry.path().join(META_FILE).exists() {
                continue;
            }
            match self.load_meta(&id) {
                Ok((meta, _)) => metas.push(meta),
                Err(e) => warn!("Skipping unreadable campaign {}: {}", id, e),
            }
        }
        metas.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(metas)
    }

    /// Deletes the campaign wholesale: table, metadata and all outputs.
    pub fn delete(&self, id: &str) -> Result<(), CampaignError> {
        let dir = self.campaign_dir(id);
        if !dir.exists() {
            return Err(CampaignError::NotFound(id.to_string()));
        }
        fs::remove_dir_all(dir)?;
        info!("Deleted campaign {}", id);
        Ok(())
    }

    /// Writes one finished-output document (a JSONL file with one row per
    /// line) as a single immutable unit. A later write under the same name
    /// supersedes the document wholesale; rows are never edited.
    pub fn write_output(
        &self,
        id: &str,
        filename: &str,
        rows: &[Value],
    ) -> Result<PathBuf, CampaignError> {
        let files_dir = self.campaign_dir(id).join(FILES_DIR);
        fs::create_dir_all(&files_dir)?;

        let mut buf = String::new();
        for row in rows {
            let line = serde_json::to_string(row).map_err(|e| {
                CampaignError::CorruptStore(format!("cannot encode output row: {}", e))
            })?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let path = files_dir.join(filename);
        fs::write(&path, buf)?;
        Ok(path)
    }

    /// All finished-output rows across the campaign's output documents.
    /// A campaign without outputs (or without a files directory at all)
    /// yields an empty list; individual unparsable lines are skipped with
    /// a warning since this feeds read-only progress views.
    pub fn finished_outputs(&self, id: &str) -> Result<Vec<Value>, CampaignError> {
        let files_dir = self.campaign_dir(id).join(FILES_DIR);
        if !files_dir.exists() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let mut paths: Vec<PathBuf> = fs::read_dir(&files_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        paths.sort();

        for path in paths {
            let raw = fs::read_to_string(&path)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(v) => rows.push(v),
                    Err(e) => warn!("Skipping bad output row in {}: {}", path.display(), e),
                }
            }
        }
        Ok(rows)
    }

    /// Removes every output document of the campaign.
    pub fn clear_outputs(&self, id: &str) -> Result<(), CampaignError> {
        let files_dir = self.campaign_dir(id).join(FILES_DIR);
        if !files_dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&files_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<(), CampaignError> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CampaignError::InvalidRequest(format!(
            "campaign id must be a slug (lowercase, digits, - or _): {:?}",
            id
        )))
    }
}

/// Output document name for one finished human batch.
pub fn batch_output_filename(batch_idx: u32, annotator_id: &str, unix_ts: i64) -> String {
    format!("{}-{}-{}.jsonl", batch_idx, annotator_id, unix_ts)
}

/// Output document name for one finished automated item.
pub fn item_output_filename(item: &WorkItem, unix_ts: i64) -> String {
    format!(
        "{}-{}-{}-{}-{}.jsonl",
        item.dataset, item.split, item.setup_id, item.example_idx, unix_ts
    )
}

impl From<super::types::TransitionError> for CampaignError {
    fn from(e: super::types::TransitionError) -> Self {
        // A transition rejection on load/mutate means the persisted state
        // disagrees with the lifecycle rules.
        CampaignError::CorruptStore(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::types::CampaignStatus;
    use serde_json::json;

    fn store() -> (FsCampaignStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCampaignStore::new(dir.path().join("campaigns")).unwrap();
        (store, dir)
    }

    fn request(id: &str, kind: CampaignKind, n: usize) -> CreateCampaignRequest {
        CreateCampaignRequest {
            id: id.to_string(),
            kind,
            config: json!({"model": "mistral-7b"}),
            items: (0..n)
                .map(|i| NewWorkItem {
                    dataset: "openweather".to_string(),
                    split: "dev".to_string(),
                    setup_id: "mistral-7b".to_string(),
                    example_idx: i,
                    batch_idx: kind.is_human().then_some((i / 2) as u32),
                    annotator_group: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_create_and_load() {
        let (store, _dir) = store();
        let created = store
            .create(request("eval-1", CampaignKind::AutoEval, 4))
            .unwrap();
        assert_eq!(created.meta.status, CampaignStatus::Idle);

        let loaded = store.load("eval-1").unwrap();
        assert_eq!(loaded.meta, created.meta);
        assert_eq!(loaded.items.len(), 4);
        assert!(loaded.items.iter().all(|it| it.status == ItemStatus::Free));
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_ids() {
        let (store, _dir) = store();
        store
            .create(request("eval-1", CampaignKind::AutoEval, 1))
            .unwrap();

        let err = store
            .create(request("eval-1", CampaignKind::AutoEval, 1))
            .unwrap_err();
        assert!(matches!(err, CampaignError::AlreadyExists(_)));

        let err = store
            .create(request("Has Spaces", CampaignKind::AutoEval, 1))
            .unwrap_err();
        assert!(matches!(err, CampaignError::InvalidRequest(_)));
    }

    #[test]
    fn test_human_campaign_requires_batch_idx() {
        let (store, _dir) = store();
        let mut req = request("crowd-1", CampaignKind::Human, 2);
        req.items[1].batch_idx = None;
        let err = store.create(req).unwrap_err();
        assert!(matches!(err, CampaignError::InvalidRequest(_)));
    }

    #[test]
    fn test_load_missing_campaign_is_not_found() {
        let (store, _dir) = store();
        assert!(matches!(
            store.load("ghost"),
            Err(CampaignError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_metadata_is_surfaced() {
        let (store, _dir) = store();
        store
            .create(request("eval-1", CampaignKind::AutoEval, 1))
            .unwrap();
        std::fs::write(store.root().join("eval-1").join(META_FILE), "{oops").unwrap();

        assert!(matches!(
            store.load("eval-1"),
            Err(CampaignError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_legacy_status_normalizes_to_idle() {
        let (store, _dir) = store();
        store
            .create(request("eval-1", CampaignKind::AutoEval, 1))
            .unwrap();

        let meta_path = store.root().join("eval-1").join(META_FILE);
        let mut doc: Value =
            serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
        doc["status"] = json!("paused");
        std::fs::write(&meta_path, serde_json::to_string(&doc).unwrap()).unwrap();

        let loaded = store.load("eval-1").unwrap();
        assert_eq!(loaded.meta.status, CampaignStatus::Idle);

        // The fix is persisted, not just applied in memory.
        let raw = std::fs::read_to_string(&meta_path).unwrap();
        assert!(raw.contains("\"idle\""));
    }

    #[test]
    fn test_list_is_sorted_newest_first() {
        let (store, _dir) = store();
        store
            .create(request("first", CampaignKind::AutoEval, 1))
            .unwrap();
        store
            .create(request("second", CampaignKind::Human, 2))
            .unwrap();

        // Force distinct creation times.
        let mut rec = store.load("second").unwrap();
        rec.meta.created = rec.meta.created + chrono::Duration::seconds(10);
        store.save_meta(&rec.meta).unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["second".to_string(), "first".to_string()]);
    }

    #[test]
    fn test_outputs_round_trip_and_clear() {
        let (store, _dir) = store();
        store
            .create(request("eval-1", CampaignKind::AutoEval, 2))
            .unwrap();

        assert!(store.finished_outputs("eval-1").unwrap().is_empty());

        store
            .write_output(
                "eval-1",
                "openweather-dev-mistral-7b-0-100.jsonl",
                &[json!({"example_idx": 0, "payload": {"out": "sunny"}})],
            )
            .unwrap();
        store
            .write_output(
                "eval-1",
                "openweather-dev-mistral-7b-1-101.jsonl",
                &[json!({"example_idx": 1, "payload": {"out": "rainy"}})],
            )
            .unwrap();

        let rows = store.finished_outputs("eval-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["payload"]["out"], "sunny");

        store.clear_outputs("eval-1").unwrap();
        assert!(store.finished_outputs("eval-1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_everything() {
        let (store, _dir) = store();
        store
            .create(request("eval-1", CampaignKind::AutoEval, 1))
            .unwrap();
        store.delete("eval-1").unwrap();
        assert!(!store.exists("eval-1"));
        assert!(matches!(
            store.delete("eval-1"),
            Err(CampaignError::NotFound(_))
        ));
    }
}
