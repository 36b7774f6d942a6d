use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::records::{primary_key_of, provisional_key, NewMutation, PendingMutation};
use crate::api::Method;
use crate::error::{Error, Result};

/// Directory holding one JSON file per collection.
const COLLECTIONS_DIR: &str = "collections";

/// File holding the pending-mutation queue.
const MUTATIONS_FILE: &str = "mutations.json";

/// Items of one collection, keyed by primary key.
type CollectionFile = BTreeMap<String, Value>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MutationLog {
    /// Next id to hand out. Persisted so ids never repeat, even after clears.
    next_id: u64,
    entries: Vec<PendingMutation>,
}

/// File-backed store for cached collection items and the offline queue.
///
/// Every operation takes the store lock for its whole read-modify-write, so
/// writes to the same record never interleave and a sync snapshot cannot
/// race an enqueue.
pub struct LocalStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(COLLECTIONS_DIR))
            .await
            .with_context(|| format!("Failed to create data directory: {}", root.display()))
            .map_err(Error::storage)?;
        debug!(root = %root.display(), "Local store opened");
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root
            .join(COLLECTIONS_DIR)
            .join(format!("{}.json", file_stem(collection)))
    }

    fn mutations_path(&self) -> PathBuf {
        self.root.join(MUTATIONS_FILE)
    }

    async fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => {
                return Err(Error::storage(
                    anyhow::Error::new(e).context(format!("Failed to read {}", path.display())),
                ))
            }
        };

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
            .map_err(Error::storage)
    }

    /// Write through a temp file and rename, so a crash never leaves a
    /// half-written file behind.
    async fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let contents = serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialize {}", path.display()))
            .map_err(Error::storage)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))
            .map_err(Error::storage)?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))
            .map_err(Error::storage)
    }

    async fn remove_file(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(
                anyhow::Error::new(e).context(format!("Failed to remove {}", path.display())),
            )),
        }
    }

    /// Insert items keyed by their own id; items without one are skipped.
    fn insert_keyed(collection: &str, file: &mut CollectionFile, items: &[Value]) -> usize {
        let mut stored = 0;
        for item in items {
            match primary_key_of(item) {
                Some(key) => {
                    file.insert(key, item.clone());
                    stored += 1;
                }
                None => warn!(collection, "Skipping item without an id"),
            }
        }
        stored
    }

    /// Apply one write to a loaded collection. Returns false when nothing
    /// changed and the file need not be saved.
    fn apply_to(
        collection: &str,
        file: &mut CollectionFile,
        primary_key: &str,
        method: Method,
        item: Option<Value>,
    ) -> bool {
        if method == Method::Delete {
            if file.remove(primary_key).is_none() {
                debug!(collection, primary_key, "Delete of uncached item");
                return false;
            }
            return true;
        }
        match item {
            Some(item) => {
                file.insert(primary_key.to_string(), item);
                true
            }
            None => {
                warn!(collection, primary_key, %method, "No item to apply");
                false
            }
        }
    }

    /// Append to a loaded queue and return the assigned order id.
    fn push_entry(log: &mut MutationLog, mutation: NewMutation) -> u64 {
        log.next_id += 1;
        let id = log.next_id;
        log.entries.push(PendingMutation {
            id,
            method: mutation.method,
            url: mutation.url,
            body: mutation.body,
            headers: mutation.headers,
            collection_key: mutation.collection_key,
            provisional: mutation.provisional,
            queued_at: Utc::now(),
        });
        id
    }

    // ===== Collections =====

    /// All cached items of a collection, in no particular order.
    pub async fn get_collection(&self, collection: &str) -> Result<Vec<Value>> {
        let _guard = self.lock.lock().await;
        let file: CollectionFile = Self::load(&self.collection_path(collection)).await?;
        Ok(file.into_values().collect())
    }

    pub async fn get_item(&self, collection: &str, primary_key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        let mut file: CollectionFile = Self::load(&self.collection_path(collection)).await?;
        Ok(file.remove(primary_key))
    }

    /// Bulk upsert. Returns how many items were stored.
    pub async fn put_items(&self, collection: &str, items: &[Value]) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let path = self.collection_path(collection);
        let mut file: CollectionFile = Self::load(&path).await?;
        let stored = Self::insert_keyed(collection, &mut file, items);
        Self::save(&path, &file).await?;
        debug!(collection, stored, "Items stored");
        Ok(stored)
    }

    /// Replace the whole collection with `items` in one step.
    pub async fn replace_collection(&self, collection: &str, items: &[Value]) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut file = CollectionFile::new();
        let stored = Self::insert_keyed(collection, &mut file, items);
        Self::save(&self.collection_path(collection), &file).await?;
        debug!(collection, stored, "Collection replaced");
        Ok(stored)
    }

    pub async fn clear_collection(&self, collection: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        Self::remove_file(&self.collection_path(collection)).await?;
        debug!(collection, "Collection cleared");
        Ok(())
    }

    pub async fn clear_all_collections(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let dir = self.root.join(COLLECTIONS_DIR);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::storage(
                    anyhow::Error::new(e).context(format!("Failed to remove {}", dir.display())),
                ))
            }
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to recreate {}", dir.display()))
            .map_err(Error::storage)?;
        debug!("All collections cleared");
        Ok(())
    }

    /// The single cache write path for live results and replayed mutations:
    /// DELETE removes the record, every other method upserts `item`.
    pub async fn apply_mutation(
        &self,
        collection: &str,
        primary_key: &str,
        method: Method,
        item: Option<Value>,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.collection_path(collection);
        let mut file: CollectionFile = Self::load(&path).await?;

        if !Self::apply_to(collection, &mut file, primary_key, method, item) {
            return Ok(());
        }

        Self::save(&path, &file).await?;
        debug!(collection, primary_key, %method, "Mutation applied to cache");
        Ok(())
    }

    // ===== Offline mutation queue =====

    /// Append to the tail of the queue and return the assigned order id.
    pub async fn enqueue_mutation(&self, mutation: NewMutation) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let path = self.mutations_path();
        let mut log: MutationLog = Self::load(&path).await?;
        let id = Self::push_entry(&mut log, mutation);
        Self::save(&path, &log).await?;
        debug!(mutation_id = id, "Mutation queued");
        Ok(id)
    }

    /// Queue an offline write and apply it to its collection under one lock
    /// acquisition, so no sync pass can replay the entry before the
    /// optimistic record exists.
    ///
    /// The record is keyed by `key`, or by `provisional_key(id)` for a
    /// provisional mutation. Returns the order id and the key used, if any.
    pub async fn enqueue_and_apply(
        &self,
        mutation: NewMutation,
        key: Option<String>,
    ) -> Result<(u64, Option<String>)> {
        let _guard = self.lock.lock().await;
        let queue_path = self.mutations_path();
        let collection_path = self.collection_path(&mutation.collection_key);

        let mut log: MutationLog = Self::load(&queue_path).await?;
        let mut file: CollectionFile = Self::load(&collection_path).await?;

        let collection = mutation.collection_key.clone();
        let method = mutation.method;
        let item = mutation.body.clone();
        let provisional = mutation.provisional;
        let id = Self::push_entry(&mut log, mutation);
        let key = key.or_else(|| provisional.then(|| provisional_key(id)));

        // Queue before cache.
        Self::save(&queue_path, &log).await?;
        if let Some(ref key) = key {
            if Self::apply_to(&collection, &mut file, key, method, item) {
                Self::save(&collection_path, &file).await?;
            }
        }
        debug!(mutation_id = id, key = ?key, "Mutation queued and applied");
        Ok((id, key))
    }

    /// Pending mutations, ascending by id.
    pub async fn list_mutations(&self) -> Result<Vec<PendingMutation>> {
        let _guard = self.lock.lock().await;
        let mut log: MutationLog = Self::load(&self.mutations_path()).await?;
        log.entries.sort_by_key(|m| m.id);
        Ok(log.entries)
    }

    /// Remove one entry. Returns false when it was already gone.
    pub async fn remove_mutation(&self, id: u64) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let path = self.mutations_path();
        let mut log: MutationLog = Self::load(&path).await?;
        let before = log.entries.len();
        log.entries.retain(|m| m.id != id);
        if log.entries.len() == before {
            return Ok(false);
        }
        Self::save(&path, &log).await?;
        debug!(mutation_id = id, "Mutation removed");
        Ok(true)
    }

    pub async fn clear_mutations(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.mutations_path();
        let mut log: MutationLog = Self::load(&path).await?;
        log.entries.clear();
        Self::save(&path, &log).await?;
        debug!("Mutation queue cleared");
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let log: MutationLog = Self::load(&self.mutations_path()).await?;
        Ok(log.entries.len())
    }
}

/// Map a collection key onto a safe file stem. ASCII alphanumerics, `-` and
/// `_` pass through; every other byte becomes `%XX`.
fn file_stem(collection: &str) -> String {
    let mut stem = String::with_capacity(collection.len());
    for byte in collection.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

// ============================================================================
// Tests
// ============================================================================
