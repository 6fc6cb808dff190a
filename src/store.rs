use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// A row as returned by the store: cell values rendered as strings.
/// Trailing empty cells may be missing.
pub type RawRow = Vec<String>;

/// Failures reported by a document store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The service could not be reached
    #[error("service unreachable: {0}")]
    Unavailable(String),

    /// Storage quota exhausted
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Sheet, folder or file id unknown to the store
    #[error("not found: {0}")]
    NotFound(String),

    /// The service answered with an error status
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The operation is not offered by this backend
    #[error("operation not supported by this store")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Row-oriented document store used as the application's database, plus the
/// file primitives needed to publish product photos.
///
/// Ranges use A1 notation (`A2:D`, `A:I`, `A5:I5`). Reads return rows in
/// order with trailing empty cells and rows trimmed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_range(&self, sheet_id: &str, range: &str) -> StoreResult<Vec<RawRow>>;

    /// Append below the last non-empty row of the table anchored at `range`.
    async fn append_rows(&self, sheet_id: &str, range: &str, rows: Vec<RawRow>)
    -> StoreResult<()>;

    /// Overwrite cells starting at the top-left corner of `range`.
    async fn update_range(&self, sheet_id: &str, range: &str, rows: Vec<RawRow>)
    -> StoreResult<()>;

    async fn clear_range(&self, sheet_id: &str, range: &str) -> StoreResult<()>;

    async fn find_sheet(&self, name: &str, parent: Option<&str>) -> StoreResult<Option<String>>;

    async fn create_sheet(&self, name: &str, parent: Option<&str>) -> StoreResult<String>;

    async fn find_folder(&self, name: &str, parent: Option<&str>) -> StoreResult<Option<String>>;

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> StoreResult<String>;

    /// Upload a local file and return its id.
    async fn upload_file(&self, local_path: &Path, parent: Option<&str>) -> StoreResult<String>;

    /// Make a file readable by anyone and return its public URL.
    async fn grant_public_read(&self, file_id: &str) -> StoreResult<String>;

    /// Fetch the bytes of a public file. Only stores that serve their own
    /// files implement this.
    async fn download_file(&self, _file_id: &str) -> StoreResult<Vec<u8>> {
        Err(StoreError::Unsupported)
    }
}
