use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::cache::{CachedFile, FileCache};
use crate::digest::ContentDigest;
use crate::error::{user_bail, user_error};
use crate::fs::{default_file_filter, is_descendant_of};
use crate::index::{AggregatedFile, FileIndex, initialize_file_index};
use crate::statusline::UpdateStatus;
use crate::store::{JsonLines, Store};
use crate::util::relpath;

/// Name of the marker directory identifying a repository root.
pub const FILEMASTER_DIR_NAME: &str = ".filemaster";

const FILE_CACHE_STORE_NAME: &str = "filecache";
const FILE_INDEX_STORE_NAME: &str = "fileindex";

/// A set of files described by a set of resolved, absolute root paths. A
/// path is in the set when it lies below (or at) one of the roots,
/// regardless of whether anything actually exists there.
#[derive(Debug)]
pub struct FileSet {
    root_paths: Vec<PathBuf>,
}

impl FileSet {
    pub fn new(root_paths: Vec<PathBuf>) -> Self {
        FileSet { root_paths }
    }

    /// All roots containing the given path.
    pub fn matched_roots(&self, path: &Path) -> Vec<PathBuf> {
        self.root_paths
            .iter()
            .filter(|root| is_descendant_of(path, root))
            .cloned()
            .collect()
    }
}

/// One pairing of a cached file with a file-set root that selected it.
#[derive(Clone, Debug)]
pub struct MatchedFile {
    pub path: PathBuf,
    pub matched_root: PathBuf,
    pub aggregated_file: AggregatedFile,
}

/// A repository session: the resolved root plus the aggregated file list,
/// which commands mutate in memory. The session's cache is kept around so
/// that the apply planner can record rename hints.
pub struct Repository {
    pub root_dir: PathBuf,
    pub aggregated_files: Vec<AggregatedFile>,
    cache: FileCache,
}

impl Repository {
    /// Match the aggregated files against a file set: one `MatchedFile` per
    /// combination of a selecting root and a cached file below it, sorted by
    /// current path.
    pub fn get_matched_files(&self, file_set: &FileSet) -> Vec<MatchedFile> {
        let mut matches = Vec::new();

        for aggregated in &self.aggregated_files {
            for cached in &aggregated.cached_files {
                for root in file_set.matched_roots(&cached.path) {
                    matches.push(MatchedFile {
                        path: cached.path.clone(),
                        matched_root: root,
                        aggregated_file: aggregated.clone(),
                    });
                }
            }
        }

        matches.sort_by(|a, b| (&a.path, &a.matched_root).cmp(&(&b.path, &b.matched_root)));
        matches
    }

    /// Validate and resolve user-supplied selection paths into a `FileSet`.
    /// Each path must exist, be a regular file or directory, and lie inside
    /// the repository. Symlinks are accepted here (and resolved), but are
    /// ignored when encountered while scanning the tree.
    pub fn create_file_set(&self, paths: &[PathBuf]) -> Result<FileSet> {
        let mut root_paths = Vec::new();

        for path in paths {
            let metadata = match fs::metadata(path) {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    user_bail!("Path does not exist: {}", path.display())
                }
                Err(e) => return Err(e.into()),
            };

            if !metadata.is_file() && !metadata.is_dir() {
                user_bail!("Path is not a regular file or directory: {}", path.display());
            }

            let resolved = path.canonicalize()?;

            if !is_descendant_of(&resolved, &self.root_dir) {
                user_bail!(
                    "Path is outside the repository's root directory: {}",
                    path.display()
                );
            }

            root_paths.push(resolved);
        }

        Ok(FileSet::new(root_paths))
    }

    /// Record a rename hint for a file that was just moved into place.
    /// Best-effort: a dropped hint only costs a rehash on the next scan.
    pub fn add_move_hint(&self, entry: CachedFile) {
        let _ = self.cache.add_hint(entry);
    }
}

/// Resolve the repository root, either by validating the given directory or
/// by walking upward from the current directory until a marker directory is
/// found. Also verifies that both store files are present.
pub fn find_filemaster_root(root_dir: Option<&Path>) -> Result<PathBuf> {
    let root_dir = match root_dir {
        Some(dir) => match dir.canonicalize() {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                user_bail!("Path does not exist: {}", dir.display())
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            let current_dir = env::current_dir()?;

            current_dir
                .ancestors()
                .find(|dir| dir.join(FILEMASTER_DIR_NAME).is_dir())
                .map(Path::to_path_buf)
                .ok_or_else(|| {
                    user_error!(
                        "No {FILEMASTER_DIR_NAME} directory found in the current directory or \
                         any of its parents."
                    )
                })?
        }
    };

    let filemaster_dir = root_dir.join(FILEMASTER_DIR_NAME);

    if !filemaster_dir.exists() {
        user_bail!("Repository does not exist: {}", relpath(&filemaster_dir));
    } else if !filemaster_dir.is_dir() {
        user_bail!("Repository is not a directory: {}", relpath(&filemaster_dir));
    }

    let stores_exist = filemaster_dir.join(FILE_CACHE_STORE_NAME).is_file()
        && filemaster_dir.join(FILE_INDEX_STORE_NAME).is_file();

    if !stores_exist {
        user_bail!("Not a valid repository: {}", relpath(&filemaster_dir));
    }

    Ok(root_dir)
}

/// Create the marker directory and empty store files for a new repository.
pub fn initialize_repository(root_dir: &Path) -> Result<()> {
    if !root_dir.exists() {
        user_bail!("Path does not exist: {}", root_dir.display());
    } else if !root_dir.is_dir() {
        user_bail!("Path is not a directory: {}", root_dir.display());
    }

    let filemaster_dir = root_dir.join(FILEMASTER_DIR_NAME);

    if filemaster_dir.exists() {
        user_bail!(
            "Cannot create directory at {} because the path already exists.",
            filemaster_dir.display()
        );
    }

    fs::create_dir(&filemaster_dir)?;
    Store::<JsonLines<CachedFile>>::new(
        filemaster_dir.join(FILE_CACHE_STORE_NAME),
        JsonLines::new(),
    )
    .save(&Vec::new())?;
    initialize_file_index(&filemaster_dir.join(FILE_INDEX_STORE_NAME))?;

    eprintln!("Initialized empty database at {}.", filemaster_dir.display());

    Ok(())
}

/// Run `f` inside a repository session.
///
/// The root is located (or validated), the cache is optionally cleared and
/// updated, and the aggregated file list is built for `f` to inspect and
/// mutate. When `f` returns `Ok`, the aggregated entries are written back to
/// the index; on error the index is left untouched.
pub fn with_repository<R>(
    update_cache: bool,
    root_dir: Option<&Path>,
    clear_cache: bool,
    f: impl FnOnce(&mut Repository) -> Result<R>,
) -> Result<R> {
    let root_dir = find_filemaster_root(root_dir)?;
    let filemaster_dir = root_dir.join(FILEMASTER_DIR_NAME);

    let mut cache = FileCache::new(
        &filemaster_dir.join(FILE_CACHE_STORE_NAME),
        &root_dir,
        default_file_filter,
    )?;
    let mut index = FileIndex::new(&filemaster_dir.join(FILE_INDEX_STORE_NAME))?;

    if clear_cache {
        // The message depends on whether an update follows: after a clear
        // without update, the cache genuinely ends up empty.
        if update_cache {
            eprintln!("Recreating the file cache ...");
        } else {
            eprintln!("Clearing the files cache ...");
        }

        cache.clear()?;
    }

    if update_cache {
        cache.update(&mut UpdateStatus::new())?;
    }

    let aggregated_files = index.aggregate_files(cache.get_cached_files());
    let mut repo = Repository {
        root_dir,
        aggregated_files,
        cache,
    };

    let result = f(&mut repo)?;

    index.set(
        repo.aggregated_files
            .into_iter()
            .map(|a| a.index_entry)
            .collect(),
    )?;

    Ok(result)
}

/// Print the selected files (unless `summary_only`) followed by a summary
/// line counting files, files without an intended path, and duplicates.
pub fn list_files(repo: &Repository, file_set: &FileSet, summary_only: bool) {
    let items = repo.get_matched_files(file_set);

    if !summary_only {
        for item in &items {
            println!("{}", relpath(&item.path));

            // Only display the intended path if the file is not already at
            // its intended path.
            match &item.aggregated_file.index_entry.intended_path {
                None => println!("  => ?"),
                Some(intended) => {
                    let absolute = repo.root_dir.join(intended);

                    if absolute != item.path {
                        println!("  => {}", relpath(&absolute));
                    }
                }
            }
        }

        // An empty line before the summary, unless we got no files.
        if !items.is_empty() {
            println!();
        }
    }

    let mut parts = vec![format!("{} files", items.len())];

    let without_intended_path = items
        .iter()
        .filter(|i| i.aggregated_file.index_entry.intended_path.is_none())
        .count();

    if without_intended_path > 0 {
        parts.push(format!("{without_intended_path} without intended path"));
    }

    // The number of duplicates is the number of selected files minus the
    // number of distinct hashes among them.
    let distinct_hashes: HashSet<&ContentDigest> = items
        .iter()
        .map(|i| &i.aggregated_file.index_entry.hash)
        .collect();
    let duplicates = items.len() - distinct_hashes.len();

    if duplicates > 0 {
        parts.push(format!("{duplicates} duplicates"));
    }

    println!("{}.", parts.join(", "));
}

/// Update the intended paths of all files selected by the file set.
/// `intended_path_fn` maps each matched file to its new absolute intended
/// path, or `None` to clear it.
pub fn set_intended_paths(
    repo: &mut Repository,
    file_set: &FileSet,
    intended_path_fn: impl Fn(&MatchedFile) -> Result<Option<PathBuf>>,
) -> Result<()> {
    let mut matched_by_hash: HashMap<ContentDigest, MatchedFile> = HashMap::new();

    for matched in repo.get_matched_files(file_set) {
        let hash = matched.aggregated_file.index_entry.hash.clone();

        if let Some(previous) = matched_by_hash.get(&hash) {
            // Produce a different error message when the same file is
            // selected twice.
            if previous.path == matched.path {
                user_bail!(
                    "The same file is selected through multiple command line arguments: {}",
                    relpath(&matched.path)
                );
            } else {
                user_bail!(
                    "Cannot apply an intended path for identical files simultaneously: \
                     {} and {}",
                    relpath(&previous.path),
                    relpath(&matched.path)
                );
            }
        }

        matched_by_hash.insert(hash, matched);
    }

    let root_dir = repo.root_dir.clone();

    for aggregated in &mut repo.aggregated_files {
        let Some(matched) = matched_by_hash.get(&aggregated.index_entry.hash) else {
            continue;
        };

        let new_intended_path = match intended_path_fn(matched)? {
            None => None,
            Some(absolute) => {
                let relative = absolute.strip_prefix(&root_dir).map_err(|_| {
                    user_error!(
                        "Intended path is outside the repository's root directory: {}",
                        relpath(&absolute)
                    )
                })?;

                // A file cannot be renamed to the root directory itself.
                if relative.as_os_str().is_empty() {
                    user_bail!(
                        "Intended path is the repository's root directory: {}",
                        relpath(&absolute)
                    );
                }

                Some(relative.to_path_buf())
            }
        };

        aggregated.index_entry.intended_path = new_intended_path;
    }

    Ok(())
}

/// Drop all index entries whose content is no longer present in the tree.
pub fn remove_missing_files(repo: &mut Repository) {
    repo.aggregated_files.retain(|a| !a.cached_files.is_empty());
}
