use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::digest::{ContentDigest, file_digest};
use crate::fs::{FileFilter, is_descendant_of, iter_regular_files};
use crate::statusline::UpdateProgress;
use crate::store::{JsonLines, Store};
use crate::util::{format_size, relpath};
use crate::writelog::WriteLog;

/// One entry of the file cache: "as of `mtime`, the content at `path` hashed
/// to `hash`".
///
/// An `mtime` of 0 means the hash was computed while the file's modification
/// time was not strictly in the past; the file could have been written again
/// within the same timestamp tick without that being detectable, so the hash
/// is valid for display but must be recomputed on the next scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedFile {
    pub path: PathBuf,
    pub mtime: f64,
    pub hash: ContentDigest,
}

/// Files at least this large get a log line while they are hashed.
const HASH_LOG_THRESHOLD: u64 = 1 << 24;

/// Suffix of the write-log sibling of the cache store.
const LOG_SUFFIX: &str = "_log";

/// Suffix of the transient scratch file used to sample the filesystem clock.
const MTIME_TOKEN_SUFFIX: &str = "_mtime_token";

/// Keeps an up-to-date list of the content hashes of all files in a tree.
///
/// The persisted list at `store_path` is accompanied by a write log at
/// `store_path + "_log"`. During an update, every freshly computed hash is
/// appended to the log before the scan moves on, so an interrupted scan
/// loses at most the file it was working on. The log is folded back into the
/// lookup table on the next update and discarded once the full list has been
/// saved atomically.
pub struct FileCache {
    store: Store<JsonLines<CachedFile>>,
    log_path: PathBuf,
    root_path: PathBuf,
    filter: FileFilter,
    entries: Vec<CachedFile>,
}

impl FileCache {
    pub fn new(store_path: &Path, root_path: &Path, filter: FileFilter) -> Result<Self> {
        let store = Store::new(store_path, JsonLines::new());
        let entries = store.load()?;

        Ok(FileCache {
            log_path: sibling(store_path, LOG_SUFFIX),
            store,
            root_path: root_path.to_path_buf(),
            filter,
            entries,
        })
    }

    /// Replace the persisted list with an empty one.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.store.save(&self.entries)
    }

    /// The cached files below the current root. Entries recorded under a
    /// different root (e.g. before the tree was moved) are ignored but kept
    /// in the store.
    pub fn get_cached_files(&self) -> Vec<CachedFile> {
        self.entries
            .iter()
            .filter(|e| is_descendant_of(&e.path, &self.root_path))
            .cloned()
            .collect()
    }

    /// Record an optimistic prediction of a file's cache entry, e.g. after
    /// moving a file with known content. The hint only lives in the write
    /// log; the next update uses it when the `(path, mtime)` pair matches
    /// what is found on disk and drops it silently otherwise.
    pub fn add_hint(&self, cached_file: CachedFile) -> Result<()> {
        let mut log = WriteLog::open(&self.log_path)?;
        log.append(cached_file)
    }

    /// Scan the tree, reusing hashes for files whose `(path, mtime)` is
    /// already known and computing the rest, then persist the new list.
    pub fn update(&mut self, progress: &mut dyn UpdateProgress) -> Result<()> {
        // Hashes computed for files whose mtime is not strictly below this
        // value cannot be trusted on the next scan; they are stored with the
        // sentinel mtime 0 instead.
        let current_mtime = self.sample_current_mtime()?;

        let mut log = WriteLog::open(&self.log_path)?;

        // Lookup table over persisted entries and surviving log records,
        // with the log taking precedence. Sentinel entries are left out so
        // they can never satisfy a lookup.
        let mut entries_by_path_mtime: HashMap<(PathBuf, u64), CachedFile> = HashMap::new();

        for entry in self.entries.iter().chain(log.records()) {
            if entry.mtime != 0.0 {
                entries_by_path_mtime
                    .insert((entry.path.clone(), entry.mtime.to_bits()), entry.clone());
            }
        }

        let mut new_entries = Vec::new();

        for path in iter_regular_files(&self.root_path, self.filter)? {
            let metadata = fs::metadata(&path)
                .with_context(|| format!("failed to stat `{}`", path.display()))?;
            let observed_mtime = mtime_seconds(&metadata);

            // Force hashing the file again when the mtime is too recent.
            let mtime = if observed_mtime >= current_mtime {
                0.0
            } else {
                observed_mtime
            };

            let entry = match entries_by_path_mtime.get(&(path.clone(), mtime.to_bits())) {
                Some(entry) => entry.clone(),
                None => {
                    let size = metadata.len();

                    // Do not log small files.
                    if size >= HASH_LOG_THRESHOLD {
                        progress.log_message(&format!(
                            "Hashing {} ({}) ...",
                            relpath(&path),
                            format_size(size)
                        ));
                    }

                    let hash = file_digest(&path, &mut |bytes| progress.data_read(bytes))
                        .with_context(|| format!("failed to hash `{}`", path.display()))?;
                    let entry = CachedFile {
                        path: path.clone(),
                        mtime,
                        hash,
                    };

                    // Log the entry before moving on so the work survives an
                    // interrupted scan.
                    log.append(entry.clone())?;

                    entry
                }
            };

            new_entries.push(entry);
            progress.file_checked();
        }

        self.entries = new_entries;
        self.store.save(&self.entries)?;

        // The saved list now covers everything the log held.
        log.flush()?;

        Ok(())
    }

    /// Sample the filesystem clock by creating and stat'ing a scratch file
    /// beside the store. Going through a real file captures the filesystem's
    /// timestamp granularity, which may be coarser than the system clock.
    fn sample_current_mtime(&self) -> Result<f64> {
        let token_path = sibling(self.store.path(), MTIME_TOKEN_SUFFIX);

        File::create(&token_path)
            .with_context(|| format!("failed to create `{}`", token_path.display()))?;
        let metadata = fs::metadata(&token_path)?;
        fs::remove_file(&token_path)?;

        Ok(mtime_seconds(&metadata))
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn mtime_seconds(metadata: &fs::Metadata) -> f64 {
    match metadata.modified() {
        Ok(mtime) => match mtime.duration_since(UNIX_EPOCH) {
            Ok(duration) => duration.as_secs_f64(),
            // A pre-epoch mtime is older than any plausible clock sample.
            Err(_) => 0.0,
        },
        Err(_) => 0.0,
    }
}
