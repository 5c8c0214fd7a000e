//! JSONL record store guarded by a [`FileLock`].
//!
//! Every mutation of the backing file takes the lock EXCLUSIVE for its whole
//! read-modify-write; reads take it SHARED so they never observe a rewrite in
//! progress from a cooperating writer. Full rewrites go through
//! [`atomic_write_file`], appends are a single write in append mode.
//!
//! Consumers that only read should depend on [`RecordSource`], which an
//! [`InMemorySource`] also implements.

use crate::error::{GatewayError, Result};
use crate::fs::atomic_write_file;
use crate::locks::{FileLock, LockMode, LockOptions};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A record addressable by a string id.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Read access to a collection of records.
pub trait RecordSource<T> {
    fn list_all(&self) -> impl Future<Output = Result<Vec<T>>> + Send;

    fn get_by_id(&self, id: &str) -> impl Future<Output = Result<Option<T>>> + Send;
}

/// Records stored one JSON object per line in a file.
#[derive(Debug, Clone)]
pub struct LockedJsonStore<T> {
    path: PathBuf,
    lock_options: LockOptions,
    _record: PhantomData<fn() -> T>,
}

impl<T> LockedJsonStore<T>
where
    T: Serialize + DeserializeOwned + Identified + Send + Sync,
{
    pub fn new(path: impl Into<PathBuf>, lock_options: LockOptions) -> Self {
        Self {
            path: path.into(),
            lock_options,
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_lock(&self) -> FileLock {
        FileLock::new(&self.path, self.lock_options.clone())
    }

    /// Append one record.
    pub async fn append(&self, record: &T) -> Result<()> {
        let mut line = encode(record)?;
        line.push('\n');

        let mut lock = self.file_lock();
        lock.with_lock(LockMode::Exclusive, || async {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| store_io("open", &self.path, e))?;
            file.write_all(line.as_bytes())
                .map_err(|e| store_io("append to", &self.path, e))
        })
        .await
    }

    /// Replace the whole file with `records`.
    pub async fn replace_all(&self, records: &[T]) -> Result<()> {
        let content = encode_all(records)?;
        let mut lock = self.file_lock();
        lock.with_lock(LockMode::Exclusive, || async {
            atomic_write_file(&self.path, &content).map_err(GatewayError::from)
        })
        .await
    }

    /// Apply `f` to the record with `id` and persist the result. Returns
    /// whether a record was found.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut T),
    {
        let mut lock = self.file_lock();
        lock.with_lock(LockMode::Exclusive, || async {
            let mut records = self.read_unlocked()?;
            let Some(record) = records.iter_mut().find(|r| r.id() == id) else {
                return Ok(false);
            };
            f(record);
            atomic_write_file(&self.path, &encode_all(&records)?)?;
            Ok::<_, GatewayError>(true)
        })
        .await
    }

    /// Remove the record with `id`. Returns whether one was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut lock = self.file_lock();
        lock.with_lock(LockMode::Exclusive, || async {
            let mut records = self.read_unlocked()?;
            let before = records.len();
            records.retain(|r| r.id() != id);
            if records.len() == before {
                return Ok(false);
            }
            atomic_write_file(&self.path, &encode_all(&records)?)?;
            Ok::<_, GatewayError>(true)
        })
        .await
    }

    fn read_unlocked(&self) -> Result<Vec<T>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_io("read", &self.path, e)),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    GatewayError::StoreError(format!(
                        "invalid record at {}:{}: {}",
                        self.path.display(),
                        index + 1,
                        e
                    ))
                })
            })
            .collect()
    }
}

impl<T> RecordSource<T> for LockedJsonStore<T>
where
    T: Serialize + DeserializeOwned + Identified + Send + Sync,
{
    async fn list_all(&self) -> Result<Vec<T>> {
        let mut lock = self.file_lock();
        lock.with_lock(LockMode::Shared, || async { self.read_unlocked() })
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        Ok(self.list_all().await?.into_iter().find(|r| r.id() == id))
    }
}

/// Records held in memory.
#[derive(Debug, Default)]
pub struct InMemorySource<T> {
    records: Mutex<Vec<T>>,
}

impl<T> InMemorySource<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn push(&self, record: T) {
        self.records.lock().push(record);
    }
}

impl<T> RecordSource<T> for InMemorySource<T>
where
    T: Identified + Clone + Send + Sync,
{
    async fn list_all(&self) -> Result<Vec<T>> {
        Ok(self.records.lock().clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.lock().iter().find(|r| r.id() == id).cloned())
    }
}

fn encode<T: Serialize>(record: &T) -> Result<String> {
    serde_json::to_string(record)
        .map_err(|e| GatewayError::StoreError(format!("failed to serialize record: {}", e)))
}

fn encode_all<T: Serialize>(records: &[T]) -> Result<String> {
    let mut content = String::new();
    for record in records {
        content.push_str(&encode(record)?);
        content.push('\n');
    }
    Ok(content)
}

fn store_io(action: &str, path: &Path, e: std::io::Error) -> GatewayError {
    GatewayError::StoreError(format!("failed to {} '{}': {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Task {
        id: String,
        count: u32,
    }

    impl Identified for Task {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn task(id: &str, count: u32) -> Task {
        Task {
            id: id.to_string(),
            count,
        }
    }

    fn store(temp_dir: &TempDir) -> LockedJsonStore<Task> {
        LockedJsonStore::new(
            temp_dir.path().join("tasks.jsonl"),
            LockOptions::default()
                .with_timeout(Duration::from_secs(20))
                .with_retry_interval(Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn test_empty_store_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        assert!(store.list_all().await.unwrap().is_empty());
        assert_eq!(store.get_by_id("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_append_update_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.append(&task("a", 1)).await.unwrap();
        store.append(&task("b", 2)).await.unwrap();
        assert!(store.update("b", |t| t.count = 20).await.unwrap());
        assert!(!store.update("zz", |t| t.count = 0).await.unwrap());

        assert_eq!(
            store.list_all().await.unwrap(),
            vec![task("a", 1), task("b", 20)]
        );
        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert_eq!(store.get_by_id("b").await.unwrap(), Some(task("b", 20)));

        let lock_file = temp_dir.path().join("tasks.jsonl.lock");
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_replace_all() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.append(&task("old", 0)).await.unwrap();

        store.replace_all(&[task("x", 1), task("y", 2)]).await.unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(store.get_by_id("old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        fs::write(store.path(), "{\"id\":\"a\",\"count\":1}\nnope\n").unwrap();

        let err = store.list_all().await.unwrap_err();
        assert!(err.to_string().contains("tasks.jsonl:2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_serialized() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(store(&temp_dir));
        store.replace_all(&[task("counter", 0)]).await.unwrap();

        let mut writers = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                for _ in 0..10 {
                    store.update("counter", |t| t.count += 1).await.unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(store.get_by_id("counter").await.unwrap().unwrap().count, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_keep_every_line() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(store(&temp_dir));

        let mut writers = Vec::new();
        for w in 0..4 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                for i in 0..10 {
                    store.append(&task(&format!("{}-{}", w, i), i)).await.unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(store.list_all().await.unwrap().len(), 40);
    }

    async fn count_of<S: RecordSource<Task>>(source: &S, id: &str) -> Option<u32> {
        source.get_by_id(id).await.unwrap().map(|t| t.count)
    }

    #[tokio::test]
    async fn test_sources_are_interchangeable() {
        let temp_dir = TempDir::new().unwrap();
        let on_disk = store(&temp_dir);
        on_disk.append(&task("a", 3)).await.unwrap();

        let in_memory = InMemorySource::new(vec![task("a", 3)]);
        in_memory.push(task("b", 4));

        assert_eq!(count_of(&on_disk, "a").await, Some(3));
        assert_eq!(count_of(&in_memory, "a").await, Some(3));
        assert_eq!(count_of(&in_memory, "b").await, Some(4));
        assert_eq!(in_memory.list_all().await.unwrap().len(), 2);
    }
}
