use crate::errors::{Result, StorageError};
use log::{debug, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Disk-backed FIFO store of opaque serialized records.
///
/// One record per file; the zero-padded sequence number in the filename is
/// the FIFO order, so a restart rebuilds the queue by listing the directory.
/// `append` does not return before the record has hit the disk.
pub struct HitStore {
    dir: PathBuf,
    index: Mutex<VecDeque<u64>>,
    next_seq: AtomicU64,
}

const HIT_EXTENSION: &str = "hit";

fn hit_file_name(seq: u64) -> String {
    format!("{seq:020}.{HIT_EXTENSION}")
}

fn parse_seq(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != HIT_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse::<u64>().ok()
}

impl HitStore {
    /// Opens (or creates) the store directory and rebuilds the record index
    /// from the files already present.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::CreateDir(Box::new(e)))?;

        let mut seqs = Vec::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::ReadFailed(Box::new(e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::ReadFailed(Box::new(e)))?
        {
            if let Some(seq) = parse_seq(&entry.path()) {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();
        let next = seqs.last().map(|s| s + 1).unwrap_or(0);
        if !seqs.is_empty() {
            debug!(
                "hit store {} recovered {} pending record(s)",
                dir.display(),
                seqs.len()
            );
        }

        Ok(Self {
            dir,
            index: Mutex::new(seqs.into()),
            next_seq: AtomicU64::new(next),
        })
    }

    /// Persists one record, fsyncing before returning so a crash between
    /// enqueue and dispatch cannot lose it.
    pub async fn append(&self, payload: &[u8]) -> Result<u64> {
        // The index lock is held across the write so records enter the index
        // in the same order their sequence numbers were assigned.
        let mut index = self.index.lock().await;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(hit_file_name(seq));

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| StorageError::WriteFailed(Box::new(e)))?;
        file.write_all(payload)
            .await
            .map_err(|e| StorageError::WriteFailed(Box::new(e)))?;
        file.flush()
            .await
            .map_err(|e| StorageError::WriteFailed(Box::new(e)))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::WriteFailed(Box::new(e)))?;

        index.push_back(seq);
        Ok(seq)
    }

    /// Oldest unacknowledged record, or `None` when the store is empty.
    /// Unreadable records are skipped with a warning rather than wedging
    /// the queue.
    pub async fn peek_oldest(&self) -> Option<(u64, Vec<u8>)> {
        loop {
            let seq = {
                let index = self.index.lock().await;
                *index.front()?
            };
            let path = self.dir.join(hit_file_name(seq));
            match fs::read(&path).await {
                Ok(payload) => return Some((seq, payload)),
                Err(e) => {
                    warn!(
                        "hit store {}: skipping unreadable record {seq}: {e}",
                        self.dir.display()
                    );
                    let mut index = self.index.lock().await;
                    if index.front() == Some(&seq) {
                        index.pop_front();
                    }
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
    }

    /// Acknowledges a record: removes it from disk and from the index.
    pub async fn remove(&self, seq: u64) -> Result<()> {
        let mut index = self.index.lock().await;
        if index.front() == Some(&seq) {
            index.pop_front();
        } else {
            index.retain(|s| *s != seq);
        }
        drop(index);

        match fs::remove_file(self.dir.join(hit_file_name(seq))).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::RemoveFailed(Box::new(e)).into()),
        }
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.is_empty()
    }
}
