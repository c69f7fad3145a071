//! JSON-lines record log on disk.
//!
//! One record per line, in append order. The whole file is the canonical
//! history: it is delivered to the store when the repository starts watching
//! and again after every successful append.

use crate::error::{AppError, Result};
use foldstore_engine::{
    BoxError, CommandRecord, NewRecord, RecordId, RecordListener, RecordRepository, SaveHandle,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;

struct Inner<C, R> {
    path: PathBuf,
    next_id: AtomicU64,
    records: Mutex<Vec<CommandRecord<C, R>>>,
    listener: Mutex<Option<RecordListener<C, R>>>,
    /// Serializes appends so lines never interleave
    write: tokio::sync::Mutex<()>,
}

/// Record repository persisting to a JSON-lines file.
pub struct FileRepository<C, R> {
    inner: Arc<Inner<C, R>>,
}

impl<C, R> FileRepository<C, R>
where
    C: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Read the existing log. A missing file is an empty log.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => parse(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let next_id = records
            .iter()
            .filter_map(|r| r.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                next_id: AtomicU64::new(next_id),
                records: Mutex::new(records),
                listener: Mutex::new(None),
                write: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Start delivering the canonical history to `listener`.
    ///
    /// A non-empty log is delivered right away.
    pub fn watch(self, listener: RecordListener<C, R>) -> Self {
        let records = self.inner.records();
        *lock(&self.inner.listener) = Some(listener.clone());
        if !records.is_empty() {
            listener.notify(records.to_vec());
        }
        drop(records);
        self
    }

    /// Number of records currently in the log.
    pub fn len(&self) -> usize {
        self.inner.records().len()
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl<C, R> Inner<C, R>
where
    C: Serialize + Clone + Send + Sync + 'static,
    R: Serialize + Clone + Send + Sync + 'static,
{
    async fn append(&self, record: CommandRecord<C, R>) -> Result<()> {
        let _guard = self.write.lock().await;

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(record_id = %record.id, path = %self.path.display(), "record appended");

        let mut records = self.records();
        records.push(record);
        self.deliver(&records);
        Ok(())
    }

    fn deliver(&self, records: &[CommandRecord<C, R>]) {
        if let Some(listener) = lock(&self.listener).as_ref() {
            listener.notify(records.to_vec());
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<CommandRecord<C, R>>> {
        lock(&self.records)
    }

    fn reserve(&self) -> RecordId {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

impl<C, R> RecordRepository<C, R> for FileRepository<C, R>
where
    C: Serialize + Clone + Send + Sync + 'static,
    R: Serialize + Clone + Send + Sync + 'static,
{
    fn save(&self, record: NewRecord<C, R>) -> SaveHandle {
        let id = self.inner.reserve();
        let record = record.with_id(id.clone());
        let inner = Arc::clone(&self.inner);

        SaveHandle::new(id, async move {
            inner.append(record).await.map_err(BoxError::from)
        })
    }

    fn unwatch(&self) {
        if lock(&self.inner.listener).take().is_some() {
            tracing::debug!(path = %self.inner.path.display(), "stopped watching record log");
        }
    }

    fn resync(&self) {
        let records = self.inner.records();
        self.inner.deliver(&records);
    }
}

fn parse<C, R>(contents: &str) -> Result<Vec<CommandRecord<C, R>>>
where
    C: DeserializeOwned,
    R: DeserializeOwned,
{
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| AppError::CorruptLog {
                line: i + 1,
                source,
            })
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
