use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::a1::A1Range;
use crate::saving;
use crate::store::{DocumentStore, RawRow, StoreError, StoreResult};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredSheet {
    pub name: String,
    pub parent: Option<String>,
    pub rows: Vec<RawRow>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredFolder {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub parent: Option<String>,
    pub bytes: Vec<u8>,
    pub public: bool,
}

/// Everything held by a [`MemoryStore`]; this is what gets persisted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub sheets: BTreeMap<String, StoredSheet>,
    pub folders: BTreeMap<String, StoredFolder>,
    pub files: BTreeMap<String, StoredFile>,
}

impl StoreSnapshot {
    fn used_bytes(&self) -> usize {
        self.files.values().map(|f| f.bytes.len()).sum()
    }
}

/// In-process document store with the range semantics of the hosted service.
///
/// When a snapshot path is set, the whole store is written after every
/// mutation. Uploaded files are served back under `/files/{id}`.
pub struct MemoryStore {
    data: Mutex<StoreSnapshot>,
    snapshot_path: Option<PathBuf>,
    quota_bytes: Option<usize>,
    available: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::from_snapshot(StoreSnapshot::default())
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        MemoryStore {
            data: Mutex::new(snapshot),
            snapshot_path: None,
            quota_bytes: None,
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Open a store persisted at `path`, starting empty if the file is absent.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let snapshot = if path.exists() {
            saving::load_snapshot(path)?
        } else {
            StoreSnapshot::default()
        };
        let mut store = MemoryStore::from_snapshot(snapshot);
        store.snapshot_path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Limit the total size of uploaded files.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Simulate the service going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of store operations attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Create or replace a sheet under a fixed id.
    pub fn insert_sheet(&self, id: &str, name: &str, rows: Vec<RawRow>) -> StoreResult<()> {
        self.mutate(|data| {
            data.sheets.insert(
                id.to_string(),
                StoredSheet {
                    name: name.to_string(),
                    parent: None,
                    rows,
                },
            );
            Ok(())
        })
    }

    pub fn has_sheet(&self, id: &str) -> bool {
        self.lock().sheets.contains_key(id)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.lock().clone()
    }

    /// Raw rows of a sheet, untrimmed.
    pub fn sheet_rows(&self, id: &str) -> Option<Vec<RawRow>> {
        self.lock().sheets.get(id).map(|s| s.rows.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreSnapshot> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn read<T>(&self, f: impl FnOnce(&StoreSnapshot) -> StoreResult<T>) -> StoreResult<T> {
        self.enter()?;
        f(&self.lock())
    }

    /// Apply `f` to the store. With a snapshot path, the change only becomes
    /// visible once the snapshot holding it has been written.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> StoreResult<T>) -> StoreResult<T> {
        let mut data = self.lock();
        let Some(path) = &self.snapshot_path else {
            return f(&mut data);
        };

        let mut next = data.clone();
        let out = f(&mut next)?;
        saving::save_snapshot(&next, path)?;
        *data = next;
        Ok(out)
    }

    fn sheet_mut<'a>(data: &'a mut StoreSnapshot, id: &str) -> StoreResult<&'a mut StoredSheet> {
        data.sheets
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

fn parse_range(range: &str) -> StoreResult<A1Range> {
    A1Range::parse(range).ok_or_else(|| StoreError::Rejected {
        status: 400,
        message: format!("Unable to parse range: {}", range),
    })
}

/// Write `rows` into `sheet` with the top-left cell at (`row`, `col`).
fn write_block(sheet: &mut StoredSheet, row: u32, col: u32, rows: Vec<RawRow>) {
    for (i, values) in rows.into_iter().enumerate() {
        let r = (row as usize - 1) + i;
        if sheet.rows.len() <= r {
            sheet.rows.resize(r + 1, Vec::new());
        }
        let target = &mut sheet.rows[r];
        let c0 = col as usize - 1;
        if target.len() < c0 + values.len() {
            target.resize(c0 + values.len(), String::new());
        }
        for (j, value) in values.into_iter().enumerate() {
            target[c0 + j] = value;
        }
    }
}

fn trim_row(mut row: RawRow) -> RawRow {
    while row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
    row
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read_range(&self, sheet_id: &str, range: &str) -> StoreResult<Vec<RawRow>> {
        let range = parse_range(range)?;
        self.read(|data| {
            let sheet = data
                .sheets
                .get(sheet_id)
                .ok_or_else(|| StoreError::NotFound(sheet_id.to_string()))?;

            let first_row = range.first_row() as usize - 1;
            let last_row = range
                .last_row()
                .map_or(sheet.rows.len(), |r| (r as usize).min(sheet.rows.len()));
            let first_col = range.first_col() as usize - 1;

            let mut out: Vec<RawRow> = sheet
                .rows
                .iter()
                .enumerate()
                .filter(|(i, _)| *i >= first_row && *i < last_row)
                .map(|(_, row)| {
                    let last_col = range.last_col().map_or(row.len(), |c| c as usize);
                    let cells = row
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j >= first_col && *j < last_col)
                        .map(|(_, c)| c.clone())
                        .collect();
                    trim_row(cells)
                })
                .collect();

            while out.last().is_some_and(|r| r.is_empty()) {
                out.pop();
            }
            Ok(out)
        })
    }

    async fn append_rows(
        &self,
        sheet_id: &str,
        range: &str,
        rows: Vec<RawRow>,
    ) -> StoreResult<()> {
        let range = parse_range(range)?;
        self.enter()?;
        self.mutate(|data| {
            let sheet = Self::sheet_mut(data, sheet_id)?;
            let next = sheet
                .rows
                .iter()
                .rposition(|row| row.iter().any(|c| !c.is_empty()))
                .map_or(1, |i| i + 2) as u32;
            let next = next.max(range.first_row());
            write_block(sheet, next, range.first_col(), rows);
            Ok(())
        })
    }

    async fn update_range(
        &self,
        sheet_id: &str,
        range: &str,
        rows: Vec<RawRow>,
    ) -> StoreResult<()> {
        let range = parse_range(range)?;
        self.enter()?;
        self.mutate(|data| {
            let sheet = Self::sheet_mut(data, sheet_id)?;
            write_block(sheet, range.first_row(), range.first_col(), rows);
            Ok(())
        })
    }

    async fn clear_range(&self, sheet_id: &str, range: &str) -> StoreResult<()> {
        let range = parse_range(range)?;
        self.enter()?;
        self.mutate(|data| {
            let sheet = Self::sheet_mut(data, sheet_id)?;
            let first_row = range.first_row() as usize - 1;
            let last_row = range.last_row().map_or(sheet.rows.len(), |r| r as usize);
            let first_col = range.first_col() as usize - 1;
            for row in sheet.rows.iter_mut().take(last_row).skip(first_row) {
                let last_col = range.last_col().map_or(row.len(), |c| c as usize);
                for cell in row.iter_mut().take(last_col).skip(first_col) {
                    cell.clear();
                }
            }
            Ok(())
        })
    }

    async fn find_sheet(&self, name: &str, parent: Option<&str>) -> StoreResult<Option<String>> {
        self.read(|data| {
            Ok(data
                .sheets
                .iter()
                .find(|(_, s)| s.name == name && s.parent.as_deref() == parent)
                .map(|(id, _)| id.clone()))
        })
    }

    async fn create_sheet(&self, name: &str, parent: Option<&str>) -> StoreResult<String> {
        self.enter()?;
        self.mutate(|data| {
            let id = Uuid::new_v4().to_string();
            data.sheets.insert(
                id.clone(),
                StoredSheet {
                    name: name.to_string(),
                    parent: parent.map(str::to_string),
                    rows: Vec::new(),
                },
            );
            Ok(id)
        })
    }

    async fn find_folder(&self, name: &str, parent: Option<&str>) -> StoreResult<Option<String>> {
        self.read(|data| {
            Ok(data
                .folders
                .iter()
                .find(|(_, f)| f.name == name && f.parent.as_deref() == parent)
                .map(|(id, _)| id.clone()))
        })
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> StoreResult<String> {
        self.enter()?;
        self.mutate(|data| {
            let id = Uuid::new_v4().to_string();
            data.folders.insert(
                id.clone(),
                StoredFolder {
                    name: name.to_string(),
                    parent: parent.map(str::to_string),
                },
            );
            Ok(id)
        })
    }

    async fn upload_file(&self, local_path: &Path, parent: Option<&str>) -> StoreResult<String> {
        self.enter()?;
        let bytes = std::fs::read(local_path)?;
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        self.mutate(|data| {
            if let Some(quota) = self.quota_bytes {
                if data.used_bytes() + bytes.len() > quota {
                    return Err(StoreError::QuotaExceeded);
                }
            }
            let id = Uuid::new_v4().to_string();
            data.files.insert(
                id.clone(),
                StoredFile {
                    name,
                    parent: parent.map(str::to_string),
                    bytes,
                    public: false,
                },
            );
            Ok(id)
        })
    }

    async fn grant_public_read(&self, file_id: &str) -> StoreResult<String> {
        self.enter()?;
        self.mutate(|data| {
            let file = data
                .files
                .get_mut(file_id)
                .ok_or_else(|| StoreError::NotFound(file_id.to_string()))?;
            file.public = true;
            Ok(format!("/files/{}", file_id))
        })
    }

    async fn download_file(&self, file_id: &str) -> StoreResult<Vec<u8>> {
        self.read(|data| match data.files.get(file_id) {
            Some(file) if file.public => Ok(file.bytes.clone()),
            _ => Err(StoreError::NotFound(file_id.to_string())),
        })
    }
}
