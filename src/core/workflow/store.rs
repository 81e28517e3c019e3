#![allow(clippy::result_large_err)] // Store operations return AppError to keep persistence diagnostics structured.

//! External persistence for workflow documents.
//!
//! A store only needs to load the latest snapshot and commit a new one. The persistent
//! controller wraps every mutation in load, mutate, commit against one of these.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::state::WorkflowState;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Load/commit contract shared by every persistence backend.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<WorkflowState, AppError>;

    async fn commit(&self, state: &WorkflowState) -> Result<(), AppError>;

    /// Human readable location, used in logs.
    fn describe(&self) -> String;
}

/// Where workflow state lives, parsed from `inmem`, `filebacked:<path>` or `sqlite:<url>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSpec {
    InMemory,
    File(PathBuf),
    Sqlite(String),
}

impl StateSpec {
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let text = text.trim();
        if text == "inmem" {
            return Ok(StateSpec::InMemory);
        }
        if let Some(path) = text.strip_prefix("filebacked:") {
            if !path.is_empty() {
                return Ok(StateSpec::File(PathBuf::from(path)));
            }
        }
        if let Some(rest) = text.strip_prefix("sqlite:") {
            if !rest.is_empty() {
                return Ok(StateSpec::Sqlite(text.to_string()));
            }
        }
        Err(AppError::new(
            ErrorCategory::ConfigurationError,
            format!(
                "unrecognized state spec '{}', expected inmem, filebacked:<path> or sqlite:<url>",
                text
            ),
        )
        .with_code("RF-STATE-001"))
    }
}

impl FromStr for StateSpec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateSpec::parse(s)
    }
}

impl fmt::Display for StateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSpec::InMemory => write!(f, "inmem"),
            StateSpec::File(path) => write!(f, "filebacked:{}", path.display()),
            StateSpec::Sqlite(url) => write!(f, "{}", url),
        }
    }
}

/// Open the store named by `spec`. `workflow_id` keys the document in database stores.
pub async fn open_store(spec: &StateSpec, workflow_id: &str) -> Result<Arc<dyn StateStore>, AppError> {
    match spec {
        StateSpec::InMemory => Ok(Arc::new(MemoryStore::new())),
        StateSpec::File(path) => Ok(Arc::new(FileStore::new(path.clone()))),
        StateSpec::Sqlite(url) => Ok(Arc::new(SqliteStore::connect(url, workflow_id).await?)),
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::new(
        ErrorCategory::IoError,
        format!("failed to {} {}: {}", action, path.display(), err),
    )
}

async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| io_error("create directory", parent, err))?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, data)
        .await
        .map_err(|err| io_error("write", &tmp_path, err))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|err| io_error("rename into", path, err))?;
    Ok(())
}

/// Pretty JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write `state` as the initial document and return the store.
    pub async fn create(path: impl Into<PathBuf>, state: &WorkflowState) -> Result<Self, AppError> {
        let store = Self::new(path);
        store.commit(state).await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self) -> Result<WorkflowState, AppError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| io_error("read", &self.path, err).with_code("RF-STORE-001"))?;
        WorkflowState::from_json_str(&text)
    }

    async fn commit(&self, state: &WorkflowState) -> Result<(), AppError> {
        let content = state.to_json_string()?;
        atomic_write(&self.path, content.as_bytes()).await
    }

    fn describe(&self) -> String {
        format!("filebacked:{}", self.path.display())
    }
}

/// One row per workflow in a sqlite document table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    url: String,
    workflow_id: String,
}

fn storage_error(message: String) -> AppError {
    AppError::new(ErrorCategory::StorageError, message).with_code("RF-STORE-003")
}

impl SqliteStore {
    pub async fn connect(url: &str, workflow_id: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| {
                AppError::new(
                    ErrorCategory::ConfigurationError,
                    format!("invalid sqlite url '{}': {e}", url),
                )
                .with_code("RF-STATE-001")
            })?
            .create_if_missing(true);
        // A single long-lived connection keeps `sqlite::memory:` databases alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| storage_error(format!("sqlite connect failed: {e}")))?;
        let store = Self {
            pool,
            url: url.to_string(),
            workflow_id: workflow_id.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_documents (
                workflow_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(format!("sqlite schema create failed: {e}")))?;
        Ok(())
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load(&self) -> Result<WorkflowState, AppError> {
        let row = sqlx::query("SELECT document FROM workflow_documents WHERE workflow_id = ?")
            .bind(&self.workflow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error(format!("sqlite load failed: {e}")))?;
        let Some(row) = row else {
            return Err(AppError::new(
                ErrorCategory::LookupError,
                format!("no workflow document stored for '{}'", self.workflow_id),
            )
            .with_code("RF-STORE-002"));
        };
        let document: String = row
            .try_get("document")
            .map_err(|e| storage_error(format!("sqlite decode document failed: {e}")))?;
        WorkflowState::from_json_str(&document)
    }

    async fn commit(&self, state: &WorkflowState) -> Result<(), AppError> {
        let document = state.to_json_string()?;
        sqlx::query(
            r#"
            INSERT INTO workflow_documents (workflow_id, document, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(workflow_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.workflow_id)
        .bind(document)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error(format!("sqlite commit failed: {e}")))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}#{}", self.url, self.workflow_id)
    }
}

/// Serialized document held in process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: &WorkflowState) -> Result<Self, AppError> {
        Ok(Self {
            document: RwLock::new(Some(state.to_json_string()?)),
        })
    }

    /// Raw committed document, if any.
    pub async fn document(&self) -> Option<String> {
        self.document.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<WorkflowState, AppError> {
        let guard = self.document.read().await;
        let Some(text) = guard.as_deref() else {
            return Err(AppError::new(
                ErrorCategory::LookupError,
                "no workflow document has been committed",
            )
            .with_code("RF-STORE-002"));
        };
        WorkflowState::from_json_str(text)
    }

    async fn commit(&self, state: &WorkflowState) -> Result<(), AppError> {
        let text = state.to_json_string()?;
        *self.document.write().await = Some(text);
        Ok(())
    }

    fn describe(&self) -> String {
        "inmem".to_string()
    }
}
