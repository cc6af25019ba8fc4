//! Store registry and the metadata-store contract.
//!
//! The real metadata store lives outside this crate; the upload pipeline
//! only needs the narrow lookup/update surface modeled by [`Store`]. The
//! in-memory implementation backs the standalone binary and the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

/// One file's metadata as the upload pipeline sees it.
#[derive(Clone, Debug)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub uploading: bool,
    pub progress: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
            uploading: false,
            progress: None,
            created_at: Utc::now(),
        }
    }
}

/// Transient upload-state fields written back to a record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldUpdate {
    pub uploading: bool,
    pub progress: Option<f64>,
}

/// Narrow contract to the external metadata store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_by_id(&self, file_id: &str) -> Option<FileRecord>;

    /// True when `token` authorizes chunk writes to `file_id`.
    async fn validate_token(&self, token: &str, file_id: &str) -> bool;

    /// Full update: runs whatever record hooks the store has registered.
    /// Returns false when no record matched.
    async fn update_fields(&self, file_id: &str, fields: &FieldUpdate) -> bool;

    /// Same write with record hooks skipped. Used for intermediate
    /// progress state that must not re-trigger the upload workflow.
    async fn update_fields_direct(&self, file_id: &str, fields: &FieldUpdate) -> bool;
}

type UpdateHook = Box<dyn Fn(&str, &FieldUpdate) + Send + Sync>;

/// In-memory [`Store`] keyed by file id, with per-file upload tokens.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, FileRecord>>,
    tokens: Mutex<HashMap<String, String>>,
    update_hook: Option<UpdateHook>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose trigger-full updates invoke `hook`.
    pub fn with_update_hook(hook: impl Fn(&str, &FieldUpdate) + Send + Sync + 'static) -> Self {
        Self {
            update_hook: Some(Box::new(hook)),
            ..Self::default()
        }
    }

    /// Registers a record and issues its upload token.
    pub async fn insert_record(&self, record: FileRecord) -> String {
        let token = Uuid::new_v4().to_string();
        self.insert_record_with_token(record, token.clone()).await;
        token
    }

    pub async fn insert_record_with_token(&self, record: FileRecord, token: String) {
        self.tokens.lock().await.insert(record.id.clone(), token);
        self.records.lock().await.insert(record.id.clone(), record);
    }

    async fn apply(&self, file_id: &str, fields: &FieldUpdate) -> bool {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(file_id) else {
            return false;
        };
        record.uploading = fields.uploading;
        // An absent progress leaves the last recorded value in place.
        if let Some(progress) = fields.progress {
            record.progress = Some(progress);
        }
        true
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_by_id(&self, file_id: &str) -> Option<FileRecord> {
        self.records.lock().await.get(file_id).cloned()
    }

    async fn validate_token(&self, token: &str, file_id: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        let tokens = self.tokens.lock().await;
        tokens.get(file_id).is_some_and(|expected| expected == token)
    }

    async fn update_fields(&self, file_id: &str, fields: &FieldUpdate) -> bool {
        let updated = self.apply(file_id, fields).await;
        if updated && let Some(hook) = &self.update_hook {
            hook(file_id, fields);
        }
        updated
    }

    async fn update_fields_direct(&self, file_id: &str, fields: &FieldUpdate) -> bool {
        self.apply(file_id, fields).await
    }
}

/// Resolves store names to handles. Stores register once at startup.
#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<String, Arc<dyn Store>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: impl Into<String>, store: Arc<dyn Store>) {
        self.stores.write().await.insert(name.into(), store);
    }

    pub async fn get_store(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.stores.read().await.get(name).cloned()
    }
}

#[derive(Deserialize)]
struct Manifest {
    stores: Vec<ManifestStore>,
}

#[derive(Deserialize)]
struct ManifestStore {
    name: String,
    #[serde(default)]
    files: Vec<ManifestFile>,
}

#[derive(Deserialize)]
struct ManifestFile {
    id: String,
    name: String,
    #[serde(default)]
    size: u64,
    token: String,
}

/// Loads a JSON manifest of stores, file records, and their tokens.
pub async fn load_manifest(path: &Path) -> Result<StoreRegistry, std::io::Error> {
    let bytes = fs::read(path).await?;
    let manifest: Manifest = serde_json::from_slice(&bytes)
        .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err.to_string()))?;

    let registry = StoreRegistry::new();
    for store_def in manifest.stores {
        let store = MemoryStore::new();
        for file in store_def.files {
            store
                .insert_record_with_token(FileRecord::new(file.id, file.name, file.size), file.token)
                .await;
        }
        info!(store = store_def.name, "registered store");
        registry.register(store_def.name, Arc::new(store)).await;
    }
    Ok(registry)
}
