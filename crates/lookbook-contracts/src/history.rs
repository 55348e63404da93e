use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::storyboard::StoryboardRequest;

/// Fixed key the persisted projection lives under.
pub const HISTORY_STORAGE_KEY: &str = "lookbook_history.json";

pub const MEMORY_HISTORY_CAP: usize = 15;
pub const PERSISTED_HISTORY_CAP: usize = 10;

/// Capacity granted to the persisted projection. Prompt-only entries are a
/// few KB each, so this stays far under any real backing-store quota.
pub const DEFAULT_PERSIST_QUOTA_BYTES: usize = 512 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("history storage quota exceeded ({size} bytes over {quota})")]
    QuotaExceeded { size: usize, quota: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Injectable key-value persistence for history. `read` is tolerant (any
/// failure reads as absent) and `clear` is best-effort.
pub trait HistoryBackend: Send {
    fn read(&self) -> Option<String>;
    fn write(&self, payload: &str) -> Result<(), PersistError>;
    fn clear(&self);
}

#[derive(Debug)]
pub struct FileHistoryBackend {
    dir: PathBuf,
    quota_bytes: usize,
}

impl FileHistoryBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes: DEFAULT_PERSIST_QUOTA_BYTES,
        }
    }

    pub fn with_quota(dir: impl Into<PathBuf>, quota_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes,
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(HISTORY_STORAGE_KEY)
    }
}

impl HistoryBackend for FileHistoryBackend {
    fn read(&self) -> Option<String> {
        std::fs::read_to_string(self.path()).ok()
    }

    fn write(&self, payload: &str) -> Result<(), PersistError> {
        if payload.len() > self.quota_bytes {
            return Err(PersistError::QuotaExceeded {
                size: payload.len(),
                quota: self.quota_bytes,
            });
        }
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(), payload)?;
        Ok(())
    }

    fn clear(&self) {
        let _ = std::fs::remove_file(self.path());
    }
}

/// In-memory backend for tests and quota-policy drills.
#[derive(Debug, Default)]
pub struct MemoryHistoryBackend {
    stored: Mutex<Option<String>>,
    quota_bytes: Option<usize>,
}

impl MemoryHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            stored: Mutex::new(None),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn seed(self, payload: &str) -> Self {
        if let Ok(mut stored) = self.stored.lock() {
            *stored = Some(payload.to_string());
        }
        self
    }
}

impl HistoryBackend for MemoryHistoryBackend {
    fn read(&self) -> Option<String> {
        self.stored.lock().ok().and_then(|stored| stored.clone())
    }

    fn write(&self, payload: &str) -> Result<(), PersistError> {
        if let Some(quota) = self.quota_bytes {
            if payload.len() > quota {
                return Err(PersistError::QuotaExceeded {
                    size: payload.len(),
                    quota,
                });
            }
        }
        if let Ok(mut stored) = self.stored.lock() {
            *stored = Some(payload.to_string());
        }
        Ok(())
    }

    fn clear(&self) {
        if let Ok(mut stored) = self.stored.lock() {
            *stored = None;
        }
    }
}

/// What happened to the persisted mirror on the last `record`/`update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    ClearedOnQuota,
}

/// Bounded most-recent-first list of past storyboard requests, mirrored to a
/// persistence backend as a storage-safe projection.
pub struct HistoryStore {
    backend: Box<dyn HistoryBackend>,
    entries: Vec<StoryboardRequest>,
}

impl HistoryStore {
    /// Reads the persisted form; unparsable data is discarded, not propagated.
    pub fn load(backend: Box<dyn HistoryBackend>) -> Self {
        let entries = match backend.read() {
            Some(raw) => match serde_json::from_str::<Vec<StoryboardRequest>>(&raw) {
                Ok(parsed) => parsed,
                Err(_) => {
                    backend.clear();
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Self { backend, entries }
    }

    pub fn entries(&self) -> &[StoryboardRequest] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepends, truncates to the in-memory cap, persists the projection.
    pub fn record(&mut self, request: StoryboardRequest) -> Result<PersistOutcome> {
        self.entries.insert(0, request);
        self.entries.truncate(MEMORY_HISTORY_CAP);
        self.persist()
    }

    /// Replaces the entry with a matching id (single-scene regeneration path).
    pub fn update(&mut self, request: &StoryboardRequest) -> Result<PersistOutcome> {
        if let Some(slot) = self.entries.iter_mut().find(|entry| entry.id == request.id) {
            *slot = request.clone();
        }
        self.persist()
    }

    fn persist(&self) -> Result<PersistOutcome> {
        let projection: Vec<StoryboardRequest> = self
            .entries
            .iter()
            .take(PERSISTED_HISTORY_CAP)
            .map(StoryboardRequest::storage_projection)
            .collect();
        let payload =
            serde_json::to_string(&projection).context("failed serializing history projection")?;
        match self.backend.write(&payload) {
            Ok(()) => Ok(PersistOutcome::Saved),
            Err(PersistError::QuotaExceeded { .. }) => {
                // Quota pressure clears the persisted key outright; in-memory
                // history stays intact.
                self.backend.clear();
                Ok(PersistOutcome::ClearedOnQuota)
            }
            Err(err) => Err(err).context("failed persisting history"),
        }
    }
}
