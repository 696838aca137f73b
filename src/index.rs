use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cache::CachedFile;
use crate::digest::ContentDigest;
use crate::store::{JsonDocument, Store};

/// One record of the file index, keyed by content hash.
///
/// `intended_path` is a path relative to the repository root where the
/// content should eventually live; it is set by the user and starts out
/// unset. `seen_paths` records every absolute path at which the content has
/// been observed, in first-sight order; it is only ever appended to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub hash: ContentDigest,
    pub intended_path: Option<PathBuf>,
    pub seen_paths: Vec<PathBuf>,
}

/// An index entry joined with the cached files currently carrying its
/// content. Session-scoped; the entry may have been synthesized for a hash
/// the index had not recorded before. An empty `cached_files` means the
/// content is known but no longer present in the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedFile {
    pub index_entry: IndexEntry,
    pub cached_files: Vec<CachedFile>,
}

/// The persistent, content-addressed table of intended paths and sighting
/// history, stored as a single JSON document.
pub struct FileIndex {
    store: Store<JsonDocument<Vec<IndexEntry>>>,
    entries: Vec<IndexEntry>,
}

impl FileIndex {
    pub fn new(store_path: &Path) -> Result<Self> {
        let store = Store::new(store_path, JsonDocument::new());
        let entries = store.load()?;

        Ok(FileIndex { store, entries })
    }

    /// Join the cached files into the index by hash.
    ///
    /// Every persisted entry appears in the result, in stored order,
    /// followed by entries synthesized for hashes seen in the cache but not
    /// in the index, in first-observation order. `seen_paths` is extended
    /// with any cache path not yet recorded.
    pub fn aggregate_files(&self, cached_files: Vec<CachedFile>) -> Vec<AggregatedFile> {
        let mut files: Vec<AggregatedFile> = self
            .entries
            .iter()
            .map(|entry| AggregatedFile {
                index_entry: entry.clone(),
                cached_files: Vec::new(),
            })
            .collect();

        let mut index_by_hash: HashMap<ContentDigest, usize> = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.index_entry.hash.clone(), i))
            .collect();

        for cached_file in cached_files {
            let i = match index_by_hash.get(&cached_file.hash) {
                Some(&i) => i,
                None => {
                    files.push(AggregatedFile {
                        index_entry: IndexEntry {
                            hash: cached_file.hash.clone(),
                            intended_path: None,
                            seen_paths: Vec::new(),
                        },
                        cached_files: Vec::new(),
                    });
                    index_by_hash.insert(cached_file.hash.clone(), files.len() - 1);
                    files.len() - 1
                }
            };

            let file = &mut files[i];

            if !file.index_entry.seen_paths.contains(&cached_file.path) {
                file.index_entry.seen_paths.push(cached_file.path.clone());
            }

            file.cached_files.push(cached_file);
        }

        files
    }

    /// Overwrite the persisted entry list.
    pub fn set(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        self.entries = entries;
        self.store.save(&self.entries)
    }
}

/// Write an empty index document, as `init` does for a new repository.
pub fn initialize_file_index(store_path: &Path) -> Result<()> {
    Store::<JsonDocument<Vec<IndexEntry>>>::new(store_path, JsonDocument::new()).save(&Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::bytes_digest;
    use std::fs;

    fn cached(path: &str, content: &[u8]) -> CachedFile {
        CachedFile {
            path: PathBuf::from(path),
            mtime: 1.0,
            hash: bytes_digest(content),
        }
    }

    fn index_with(dir: &Path, entries: Vec<IndexEntry>) -> FileIndex {
        let store_path = dir.join("fileindex");
        initialize_file_index(&store_path).unwrap();
        let mut index = FileIndex::new(&store_path).unwrap();
        index.set(entries).unwrap();
        FileIndex::new(&store_path).unwrap()
    }

    #[test]
    fn join_synthesizes_entries_for_new_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(dir.path(), vec![]);

        let files = index.aggregate_files(vec![cached("/r/a", b"a")]);

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].index_entry.hash, bytes_digest(b"a"));
        assert_eq!(files[0].index_entry.intended_path, None);
        assert_eq!(files[0].index_entry.seen_paths, [PathBuf::from("/r/a")]);
        assert_eq!(files[0].cached_files.len(), 1);
    }

    #[test]
    fn join_groups_duplicates_under_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(dir.path(), vec![]);

        let files = index.aggregate_files(vec![
            cached("/r/a", b"same"),
            cached("/r/b", b"same"),
            cached("/r/c", b"other"),
        ]);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].cached_files.len(), 2);
        assert_eq!(
            files[0].index_entry.seen_paths,
            [PathBuf::from("/r/a"), PathBuf::from("/r/b")]
        );
        assert_eq!(files[1].cached_files.len(), 1);
    }

    #[test]
    fn join_keeps_missing_entries_with_empty_cached_files() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(
            dir.path(),
            vec![IndexEntry {
                hash: bytes_digest(b"gone"),
                intended_path: Some(PathBuf::from("kept/location")),
                seen_paths: vec![PathBuf::from("/r/old")],
            }],
        );

        let files = index.aggregate_files(vec![cached("/r/a", b"here")]);

        assert_eq!(files.len(), 2);
        // Persisted entries come first, untouched.
        assert_eq!(files[0].index_entry.hash, bytes_digest(b"gone"));
        assert!(files[0].cached_files.is_empty());
        assert_eq!(files[1].index_entry.hash, bytes_digest(b"here"));
    }

    #[test]
    fn join_does_not_duplicate_seen_paths() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(
            dir.path(),
            vec![IndexEntry {
                hash: bytes_digest(b"a"),
                intended_path: None,
                seen_paths: vec![PathBuf::from("/r/a")],
            }],
        );

        let files = index.aggregate_files(vec![cached("/r/a", b"a")]);

        assert_eq!(files[0].index_entry.seen_paths, [PathBuf::from("/r/a")]);
    }

    #[test]
    fn stored_format_is_a_single_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("fileindex");
        initialize_file_index(&store_path).unwrap();

        let mut index = FileIndex::new(&store_path).unwrap();
        index
            .set(vec![IndexEntry {
                hash: bytes_digest(b"a"),
                intended_path: Some(PathBuf::from("dir/file")),
                seen_paths: vec![PathBuf::from("/r/a")],
            }])
            .unwrap();

        let raw = fs::read_to_string(&store_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert!(value.is_array());
        assert_eq!(value[0]["intended_path"], "dir/file");
        assert_eq!(value[0]["seen_paths"][0], "/r/a");

        // `null` intended paths survive a roundtrip.
        let mut index = FileIndex::new(&store_path).unwrap();
        let mut entries = index.aggregate_files(vec![]);
        entries[0].index_entry.intended_path = None;
        index
            .set(entries.into_iter().map(|f| f.index_entry).collect())
            .unwrap();

        let reloaded = FileIndex::new(&store_path).unwrap();
        let files = reloaded.aggregate_files(vec![]);
        assert_eq!(files[0].index_entry.intended_path, None);
    }
}
