//! Persisted dedup ledger.
//!
//! A JSON object on disk mapping a source partition key (SHA-256 of the
//! source's fetch URL) to the keys already seen for that source:
//!
//! ```text
//! {
//!   "3f1c…": ["Mon, 06 May 2025 10:00:00 GMT", "…"],
//!   "9ab0…": []
//! }
//! ```
//!
//! Loaded once at startup and rewritten whole on every change. All sources
//! share one [`Ledger`] handle; each read-modify-write, including the flush
//! to disk, happens under a single async mutex so concurrent sources cannot
//! interleave updates. Separate processes sharing a ledger file are not
//! coordinated: the last writer wins.

use crate::error::{DigestError, Result};
use crate::utils::digest_hex;
use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

type Partitions = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    partitions: Arc<Mutex<Partitions>>,
}

impl Ledger {
    /// Load the ledger at `path`; a missing or empty file is an empty ledger.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let partitions: Partitions = match fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Partitions::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| DigestError::LedgerFormat {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => Partitions::new(),
            Err(e) => return Err(DigestError::io(path, e)),
        };
        info!(partitions = partitions.len(), "Loaded dedup ledger");
        Ok(Self {
            path,
            partitions: Arc::new(Mutex::new(partitions)),
        })
    }

    /// Partition key of a source: stable hash of its fetch URL.
    pub fn partition_key(source: &str) -> String {
        digest_hex(source)
    }

    /// Items whose key is not yet recorded for `source`. Nothing is written.
    ///
    /// Items without a key always pass; of several items sharing a key only
    /// the first passes.
    pub async fn unseen<T, F>(&self, source: &str, items: Vec<T>, key: F) -> Vec<T>
    where
        F: Fn(&T) -> Option<&str>,
    {
        let partitions = self.partitions.lock().await;
        let seen: HashSet<&str> = partitions
            .get(&Self::partition_key(source))
            .map(|keys| keys.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let mut batch = HashSet::new();
        items
            .into_iter()
            .filter(|item| match key(item) {
                None => true,
                Some(k) => !seen.contains(k) && batch.insert(k.to_string()),
            })
            .collect()
    }

    /// Record `keys` for `source` and flush. Returns how many were new.
    pub async fn record<I>(&self, source: &str, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let mut partitions = self.partitions.lock().await;
        let partition = partitions.entry(Self::partition_key(source)).or_default();
        let mut added = 0usize;
        for key in keys {
            if !partition.contains(&key) {
                partition.push(key);
                added += 1;
            }
        }
        if added > 0 {
            self.persist(&partitions).await?;
            debug!(source, added, "Recorded dedup keys");
        }
        Ok(added)
    }

    /// Write-through filter: keep the unseen items, record their keys and
    /// flush the ledger before returning.
    #[instrument(level = "debug", skip(self, items, key))]
    pub async fn filter<T, F>(&self, source: &str, items: Vec<T>, key: F) -> Result<Vec<T>>
    where
        F: Fn(&T) -> Option<&str>,
    {
        let mut partitions = self.partitions.lock().await;
        let partition_key = Self::partition_key(source);
        let created = !partitions.contains_key(&partition_key);
        let partition = partitions.entry(partition_key).or_default();

        let mut passed = Vec::with_capacity(items.len());
        let mut added = 0usize;
        for item in items {
            match key(&item).map(str::to_string) {
                None => passed.push(item),
                Some(k) if partition.contains(&k) => {}
                Some(k) => {
                    partition.push(k);
                    added += 1;
                    passed.push(item);
                }
            }
        }

        if created || added > 0 {
            self.persist(&partitions).await?;
        }
        debug!(added, "Filtered items through ledger");
        Ok(passed)
    }

    /// Keys recorded for `source`, in insertion order.
    #[cfg(test)]
    pub async fn seen(&self, source: &str) -> Vec<String> {
        self.partitions
            .lock()
            .await
            .get(&Self::partition_key(source))
            .cloned()
            .unwrap_or_default()
    }

    async fn persist(&self, partitions: &Partitions) -> Result<()> {
        let json = serde_json::to_string_pretty(partitions).map_err(|source| {
            DigestError::LedgerFormat {
                path: self.path.clone(),
                source,
            }
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DigestError::io(parent, e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)
            .await
            .map_err(|e| DigestError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DigestError::io(&self.path, e))?;
        Ok(())
    }
}
