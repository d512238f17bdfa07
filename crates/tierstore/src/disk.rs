//! Disk-backed store
//!
//! One file per entry under `<root>/data`, named by [`codec::encode`], holding
//! the JSON-serialized value. A `{first, last, size}` side file tracks the age
//! window of writes and the entry count.
//!
//! Every mutation (entry writes, unlinks, metadata writes) runs through one
//! [`SerialQueue`], so at most one filesystem mutation per store is in flight.
//! Reads go straight to the filesystem.

use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::fs::{self, ReadDir};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::codec;
use crate::config::DiskConfig;
use crate::error::{Error, Result};
use crate::metadata::{now_millis, system_time_millis, Metadata};
use crate::queue::SerialQueue;
use crate::store::Store;

#[derive(Debug, Clone)]
enum InitState {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Default)]
struct ForgetState {
    quota: usize,
    running: bool,
}

/// Clears the running flag even if a forget future is dropped mid-pass
struct ForgetGuard<'a>(&'a Mutex<ForgetState>);

impl Drop for ForgetGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().running = false;
    }
}

#[derive(Debug, Default)]
struct Pass {
    evicted: usize,
    kept: usize,
    complete: bool,
}

struct Shared {
    data_path: PathBuf,
    meta_path: PathBuf,
    metadata: Mutex<Metadata>,
    forget: Mutex<ForgetState>,
}

impl Shared {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.data_path).await?;

        let now = now_millis();
        let loaded = match fs::read(&self.meta_path).await {
            Ok(bytes) => Metadata::parse(&bytes, now),
            Err(_) => Metadata::fresh(now),
        };
        debug!(path = ?self.meta_path, size = loaded.size, "Loaded disk store metadata");
        *self.metadata.lock() = loaded;

        self.write_metadata().await
    }

    /// Write the current metadata. Callers must be running on the queue.
    async fn write_metadata(&self) -> Result<()> {
        let snapshot = *self.metadata.lock();
        let tmp = self.meta_path.with_extension("tmp");

        fs::write(&tmp, snapshot.to_json()?).await?;
        fs::rename(&tmp, &self.meta_path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.data_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.data_path).await?;

        *self.metadata.lock() = Metadata::fresh(now_millis());
        self.write_metadata().await
    }

    fn take_quota(&self) {
        let mut state = self.forget.lock();
        state.quota = state.quota.saturating_sub(1);
    }

    fn drop_quota(&self) {
        self.forget.lock().quota = 0;
    }
}

/// Entry yielded while walking the entry directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    /// Decoded id (empty if the filename is not a valid encoding)
    pub id: String,
    /// Raw filename
    pub filename: String,
    /// Position in this traversal
    pub index: usize,
    /// Full path of the entry file
    pub path: PathBuf,
}

/// Lazy cursor over the entry directory, one entry per [`Entries::next`] call
pub struct Entries {
    dir: Option<ReadDir>,
    index: usize,
}

impl Entries {
    /// Advance to the next entry file. `Ok(None)` once exhausted or stopped.
    pub async fn next(&mut self) -> Result<Option<DiskEntry>> {
        let Some(dir) = self.dir.as_mut() else {
            return Ok(None);
        };

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let filename = entry.file_name().to_string_lossy().into_owned();
            let item = DiskEntry {
                id: codec::decode(&filename),
                filename,
                index: self.index,
                path: entry.path(),
            };
            self.index += 1;
            return Ok(Some(item));
        }

        self.dir = None;
        Ok(None)
    }

    /// End the traversal early and release the directory handle
    pub fn stop(&mut self) {
        self.dir = None;
    }
}

/// Durable key/value store on the local filesystem
#[derive(Clone)]
pub struct DiskStore {
    shared: Arc<Shared>,
    queue: SerialQueue,
    ready: watch::Receiver<InitState>,
}

impl DiskStore {
    /// Create a store and queue its initialization.
    ///
    /// Directory creation, metadata load and the initial metadata write run
    /// as the first queued operation; [`DiskStore::ready`] resolves once it
    /// finishes. Must be called inside a tokio runtime.
    pub fn new(config: DiskConfig) -> Self {
        let shared = Arc::new(Shared {
            data_path: config.data_path(),
            meta_path: config.meta_path(),
            metadata: Mutex::new(Metadata::fresh(now_millis())),
            forget: Mutex::new(ForgetState::default()),
        });
        let queue = SerialQueue::new();
        let (tx, rx) = watch::channel(InitState::Pending);

        let init = Arc::clone(&shared);
        // Queued; completion is reported through `ready`
        let _ = queue.submit(async move {
            let result = init.initialize().await;
            let state = match &result {
                Ok(()) => InitState::Ready,
                Err(e) => {
                    warn!(path = ?init.data_path, error = %e, "Disk store initialization failed");
                    InitState::Failed(e.to_string())
                }
            };
            let _ = tx.send(state);
            result
        });

        Self {
            shared,
            queue,
            ready: rx,
        }
    }

    /// Create a store and wait until it is ready
    pub async fn open(config: DiskConfig) -> Result<Self> {
        let store = Self::new(config);
        store.ready().await?;
        Ok(store)
    }

    /// Resolve once initialization has completed
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.ready.clone();
        let failure = {
            let state = rx
                .wait_for(|s| !matches!(s, InitState::Pending))
                .await
                .map_err(|_| Error::Init("initializer dropped".to_string()))?;
            match &*state {
                InitState::Failed(msg) => Some(msg.clone()),
                _ => None,
            }
        };

        match failure {
            Some(msg) => Err(Error::Init(msg)),
            None => Ok(()),
        }
    }

    /// Filename used for `id`
    pub fn id(&self, id: &str) -> String {
        codec::encode(id)
    }

    /// Number of entries according to metadata
    pub fn size(&self) -> usize {
        self.shared.metadata.lock().size
    }

    /// Snapshot of the current metadata
    pub fn metadata(&self) -> Metadata {
        *self.shared.metadata.lock()
    }

    /// Directory holding the entry files
    pub fn data_path(&self) -> &Path {
        &self.shared.data_path
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.shared.data_path.join(codec::encode(id))
    }

    /// Read a value. Missing or unparsable entries are a miss.
    pub async fn get(&self, id: &str) -> Result<Option<Value>> {
        match fs::read(self.entry_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether an entry file exists for `id`
    pub async fn has(&self, id: &str) -> bool {
        fs::metadata(self.entry_path(id)).await.is_ok()
    }

    /// Write a value.
    ///
    /// The existence check and the write are separate filesystem calls; an
    /// external delete in between makes the entry count drift until the next
    /// full forget scan.
    pub async fn save(&self, id: &str, value: Value) -> Result<()> {
        if value.is_null() {
            return Err(Error::Validation(format!(
                "not saving {id:?}: value is absent"
            )));
        }

        let contents = serde_json::to_vec(&value)?;
        let path = self.entry_path(id);
        let shared = Arc::clone(&self.shared);

        self.queue
            .submit(async move {
                let existed = fs::metadata(&path).await.is_ok();
                fs::write(&path, contents).await?;

                if !existed {
                    shared.metadata.lock().grow(now_millis());
                    shared.write_metadata().await?;
                }
                Ok(())
            })
            .await
    }

    /// Remove an entry. Removing a missing entry fails with [`Error::NotFound`].
    pub async fn delete(&self, id: &str) -> Result<()> {
        let path = self.entry_path(id);
        let id = id.to_string();
        let shared = Arc::clone(&self.shared);

        self.queue
            .submit(async move {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(Error::NotFound { id });
                    }
                    Err(e) => return Err(e.into()),
                }

                shared.metadata.lock().shrink();
                shared.write_metadata().await
            })
            .await
    }

    /// Remove every entry and reset metadata to `{now, now, 0}`
    pub async fn empty(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.queue.submit(async move { shared.clear().await }).await
    }

    /// Start a lazy traversal of the entry directory
    pub async fn entries(&self) -> Result<Entries> {
        let dir = fs::read_dir(&self.shared.data_path).await?;
        Ok(Entries {
            dir: Some(dir),
            index: 0,
        })
    }

    /// Visit entries one at a time until the callback breaks or the directory
    /// is exhausted. Returns the number of entries visited.
    pub async fn walk<F>(&self, mut callback: F) -> Result<usize>
    where
        F: FnMut(&DiskEntry) -> ControlFlow<()>,
    {
        let mut entries = self.entries().await?;
        let mut visited = 0;

        while let Some(entry) = entries.next().await? {
            visited += 1;
            if callback(&entry).is_break() {
                entries.stop();
                break;
            }
        }

        Ok(visited)
    }

    /// Evict roughly the `amount` least recently written entries, using file
    /// modification time as the recency signal.
    ///
    /// A call made while a pass is running merges its quota into that pass
    /// and returns 0. Returns the number of entries evicted.
    pub async fn forget(&self, amount: usize) -> Result<usize> {
        {
            let mut state = self.shared.forget.lock();
            state.quota = state.quota.max(amount);
            if state.running || state.quota == 0 {
                return Ok(0);
            }
            state.running = true;
        }

        let _guard = ForgetGuard(&self.shared.forget);
        self.run_forget().await
    }

    async fn run_forget(&self) -> Result<usize> {
        let mut evicted = 0;
        let mut advanced = false;

        loop {
            let quota = self.shared.forget.lock().quota;
            if quota == 0 {
                return Ok(evicted);
            }

            let meta = self.metadata();
            if quota >= meta.size {
                debug!(quota, size = meta.size, "Forget quota covers the store, emptying");
                self.empty().await?;
                self.shared.drop_quota();
                return Ok(evicted + meta.size);
            }

            let threshold = meta.threshold();
            let pass = self.forget_pass(threshold).await?;
            evicted += pass.evicted;
            debug!(threshold, evicted = pass.evicted, kept = pass.kept, "Forget pass finished");

            let quota = self.shared.forget.lock().quota;
            if quota == 0 {
                return Ok(evicted);
            }
            if self.size() == 0 {
                self.shared.drop_quota();
                return Ok(evicted);
            }

            // Widen the window and go again
            let mut meta = self.shared.metadata.lock();
            if pass.evicted == 0 && meta.is_collapsed() {
                if advanced && pass.complete {
                    // Everything left is newer than now
                    debug!(quota, size = meta.size, "Forget found nothing old enough, stopping");
                    drop(meta);
                    self.shared.drop_quota();
                    return Ok(evicted);
                }
                meta.last = now_millis();
                advanced = true;
            } else {
                meta.first = threshold;
            }
        }
    }

    async fn forget_pass(&self, threshold: i64) -> Result<Pass> {
        let mut entries = self.entries().await?;
        let mut pass = Pass::default();

        loop {
            let quota = self.shared.forget.lock().quota;
            if quota == 0 || quota >= self.size() {
                entries.stop();
                break;
            }

            let Some(entry) = entries.next().await? else {
                pass.complete = true;
                break;
            };

            let modified = match fs::metadata(&entry.path).await.and_then(|m| m.modified()) {
                Ok(time) => system_time_millis(time),
                // Removed underneath us
                Err(_) => continue,
            };

            if modified > threshold {
                pass.kept += 1;
                continue;
            }

            if self.remove_for_forget(entry.path).await? {
                pass.evicted += 1;
                self.shared.take_quota();
            }
        }

        // A full scan counted every surviving file
        if pass.complete {
            self.shared.metadata.lock().size = pass.kept;
        }

        let shared = Arc::clone(&self.shared);
        self.queue
            .submit(async move { shared.write_metadata().await })
            .await?;

        Ok(pass)
    }

    async fn remove_for_forget(&self, path: PathBuf) -> Result<bool> {
        let shared = Arc::clone(&self.shared);

        self.queue
            .submit(async move {
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        shared.metadata.lock().shrink();
                        Ok(true)
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }
}

#[async_trait]
impl Store for DiskStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        DiskStore::get(self, id).await
    }

    async fn save(&self, id: &str, value: Value) -> Result<()> {
        DiskStore::save(self, id, value).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        DiskStore::delete(self, id).await
    }

    fn can_forget(&self) -> bool {
        true
    }

    async fn forget(&self, amount: usize) -> Result<usize> {
        DiskStore::forget(self, amount).await
    }
}
