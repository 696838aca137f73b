use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

/// Predicate applied to every file and directory below the root. Returning
/// `false` for a directory prunes the whole subtree.
pub type FileFilter = fn(&Path) -> bool;

/// The default repository filter: ignore dot-entries (which also hides the
/// marker directory) and `.tsv` files.
pub fn default_file_filter(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));

    !hidden && path.extension().is_none_or(|e| e != "tsv")
}

/// Collect all regular files under `root`, sorted by basename at every
/// directory level so that scan progress is reproducible and correlates with
/// what the user expects. Symlinks below the root are skipped; the root
/// itself is expected to be resolved by the caller.
pub fn iter_regular_files(root: &Path, filter: FileFilter) -> Result<Vec<PathBuf>> {
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .parents(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        // The root is exempt from the filter; it was chosen explicitly and
        // may itself be a dot-directory.
        .filter_entry(move |entry| entry.depth() == 0 || filter(entry.path()));

    let mut files = Vec::new();

    for entry in builder.build() {
        let entry = entry.context("error walking directory tree")?;

        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Whether `path` refers to `ancestor` itself or something below it.
pub fn is_descendant_of(path: &Path, ancestor: &Path) -> bool {
    path.starts_with(ancestor)
}
