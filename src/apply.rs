use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::cache::CachedFile;
use crate::error::user_bail;
use crate::repository::{FileSet, MatchedFile, Repository};
use crate::util::relpath;

/// Move every selected file with an intended path to that path.
///
/// The plan is validated in full before the filesystem is touched; any
/// conflict aborts the whole operation. Four distinct conflicts exist:
///
/// 1. A file is to be moved to a path that already exists (as a file, a
///    directory, or anything else).
/// 2. Two files are to be moved to the exact same path.
/// 3. A directory needs to be created, but ...
///    a. ... one of its ancestors exists and is not a directory.
///    b. ... one of its ancestors is the destination of another move.
///
/// In dry-run mode validation is identical and execution is replaced by
/// `Would ...` messages.
pub fn apply_intended_paths(repo: &mut Repository, file_set: &FileSet, dry_run: bool) -> Result<()> {
    let plan = validate_moves(repo, file_set)?;

    if dry_run {
        for path in plan.directories_to_create.keys() {
            eprintln!("Would create directory: {}", relpath(path));
        }

        for (destination, moved_file) in &plan.moves {
            eprintln!(
                "Would move: {} -> {}",
                relpath(&moved_file.path),
                relpath(destination)
            );
        }

        return Ok(());
    }

    // Ascending path order gives us parents before children.
    for path in plan.directories_to_create.keys() {
        eprintln!("Creating directory: {}", relpath(path));
        fs::create_dir(path)?;
    }

    for (destination, moved_file) in &plan.moves {
        eprintln!(
            "Moving: {} -> {}",
            relpath(&moved_file.path),
            relpath(destination)
        );

        // Races with concurrent mutation cannot be prevented, but this
        // catches bugs in the validation above.
        assert!(!destination.exists(), "planned destination already exists");

        fs::rename(&moved_file.path, destination)?;

        // Let the next cache update skip rehashing the moved content. The
        // hint carries the mtime the cache recorded for the source (renames
        // preserve it); if the file was modified since the last scan, the
        // mtimes disagree and the hint falls through to a rehash.
        if let Some(cached) = moved_file
            .aggregated_file
            .cached_files
            .iter()
            .find(|c| c.path == moved_file.path)
        {
            repo.add_move_hint(CachedFile {
                path: destination.clone(),
                mtime: cached.mtime,
                hash: cached.hash.clone(),
            });
        }
    }

    Ok(())
}

/// The validated set of filesystem mutations: directories keyed in creation
/// order, moves in discovery order.
struct MovePlan {
    directories_to_create: BTreeMap<PathBuf, MatchedFile>,
    moves: Vec<(PathBuf, MatchedFile)>,
}

fn validate_moves(repo: &Repository, file_set: &FileSet) -> Result<MovePlan> {
    // Records planned changes before performing them so that conflicts are
    // detected while the filesystem is still untouched.
    let mut directories_to_create: BTreeMap<PathBuf, MatchedFile> = BTreeMap::new();
    let mut moves: Vec<(PathBuf, MatchedFile)> = Vec::new();
    let mut move_index_by_destination: HashMap<PathBuf, usize> = HashMap::new();

    for matched_file in repo.get_matched_files(file_set) {
        let Some(intended_path) = &matched_file.aggregated_file.index_entry.intended_path else {
            continue;
        };

        let destination = repo.root_dir.join(intended_path);

        if destination == matched_file.path {
            continue;
        }

        // Check for something already at the destination.
        if destination.exists() {
            user_bail!(
                "Cannot move {}, path already exists: {}",
                relpath(&matched_file.path),
                relpath(&destination)
            );
        }

        // Check that all necessary parent directories can be created.
        if let Some(parent) = destination.parent() {
            check_create_directory(parent, &matched_file, &mut directories_to_create)?;
        }

        // Check for another file headed to the same destination.
        if let Some(&i) = move_index_by_destination.get(&destination) {
            user_bail!(
                "Cannot move both {} and {} to same path: {}",
                relpath(&moves[i].1.path),
                relpath(&matched_file.path),
                relpath(&destination)
            );
        }

        move_index_by_destination.insert(destination.clone(), moves.len());
        moves.push((destination, matched_file));
    }

    // With all moves gathered, check for moves targeting a path that some
    // other file needs as a parent directory.
    for (destination, matched_file) in &moves {
        if let Some(blocked_file) = directories_to_create.get(destination) {
            user_bail!(
                "Cannot create parent directory for {}, {} will be moved to that path: {}",
                relpath(&blocked_file.path),
                relpath(&matched_file.path),
                relpath(destination)
            );
        }
    }

    Ok(MovePlan {
        directories_to_create,
        moves,
    })
}

/// Record `path` (and recursively its ancestors) as a directory to create,
/// or verify that what exists there already is a directory.
fn check_create_directory(
    path: &Path,
    matched_file: &MatchedFile,
    directories_to_create: &mut BTreeMap<PathBuf, MatchedFile>,
) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            user_bail!(
                "Cannot create parent directory for {}, path already exists: {}",
                relpath(&matched_file.path),
                relpath(path)
            );
        }
    } else if !directories_to_create.contains_key(path) {
        if let Some(parent) = path.parent() {
            check_create_directory(parent, matched_file, directories_to_create)?;
        }

        // Remember one of the files needing this directory, for the error
        // message should a move conflict with it.
        directories_to_create.insert(path.to_path_buf(), matched_file.clone());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{initialize_repository, set_intended_paths, with_repository};
    use anyhow::Result;
    use std::path::PathBuf;

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            initialize_repository(&root).unwrap();

            Harness { _dir: dir, root }
        }

        fn write(&self, name: &str, content: &[u8]) {
            let path = self.root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn read(&self, name: &str) -> Option<Vec<u8>> {
            fs::read(self.root.join(name)).ok()
        }

        /// Set the intended path of the file at `name` to `intended`
        /// (relative to the root).
        fn set(&self, name: &str, intended: &str) {
            let intended = self.root.join(intended);
            with_repository(true, Some(&self.root), false, |repo| {
                let set = repo.create_file_set(&[self.root.join(name)])?;
                set_intended_paths(repo, &set, |_| Ok(Some(intended.clone())))
            })
            .unwrap();
        }

        fn apply(&self, dry_run: bool) -> Result<()> {
            with_repository(true, Some(&self.root), false, |repo| {
                let set = repo.create_file_set(&[self.root.clone()])?;
                apply_intended_paths(repo, &set, dry_run)
            })
        }
    }

    #[test]
    fn moves_file_to_intended_path() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.set("file1", "file2");

        h.apply(false).unwrap();

        assert_eq!(h.read("file1"), None);
        assert_eq!(h.read("file2"), Some(b"a".to_vec()));
    }

    #[test]
    fn creates_missing_parent_directories() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.set("file1", "dir1/dir2/file1");

        h.apply(false).unwrap();

        assert_eq!(h.read("dir1/dir2/file1"), Some(b"a".to_vec()));
    }

    #[test]
    fn file_at_intended_path_is_left_alone() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.set("file1", "file1");

        h.apply(false).unwrap();

        assert_eq!(h.read("file1"), Some(b"a".to_vec()));
    }

    #[test]
    fn existing_destination_aborts() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.write("file2", b"b");
        h.set("file1", "file2");

        let err = h.apply(false).unwrap_err();
        assert!(err.to_string().contains("path already exists"));
        assert_eq!(h.read("file1"), Some(b"a".to_vec()));
    }

    #[test]
    fn colliding_destinations_abort() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.write("file2", b"b");
        h.set("file1", "file3");
        h.set("file2", "file3");

        let err = h.apply(false).unwrap_err();
        assert!(err.to_string().contains("to same path"));
        assert_eq!(h.read("file3"), None);
    }

    #[test]
    fn parent_over_existing_file_aborts() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.write("file2", b"b");
        h.set("file1", "file2/inner");

        let err = h.apply(false).unwrap_err();
        assert!(err.to_string().contains("Cannot create parent directory"));
        assert_eq!(h.read("file1"), Some(b"a".to_vec()));
        assert_eq!(h.read("file2"), Some(b"b".to_vec()));
    }

    #[test]
    fn parent_clashing_with_move_destination_aborts() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.write("file2", b"b");
        h.set("file1", "file3");
        h.set("file2", "file3/inner");

        let err = h.apply(false).unwrap_err();
        assert!(err.to_string().contains("will be moved to that path"));
        assert_eq!(h.read("file3"), None);
    }

    #[test]
    fn validation_failure_leaves_filesystem_untouched() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.write("file2", b"b");
        // file1's move requires creating dir1; file2's move conflicts.
        h.set("file1", "dir1/file1");
        h.set("file2", "file1/nested");

        let err = h.apply(false).unwrap_err();
        assert!(err.to_string().contains("Cannot create parent directory"));

        // Neither the directory nor any move happened.
        assert_eq!(h.read("file1"), Some(b"a".to_vec()));
        assert_eq!(h.read("file2"), Some(b"b".to_vec()));
        assert!(!h.root.join("dir1").exists());
    }

    #[test]
    fn dry_run_validates_but_does_not_mutate() {
        let h = Harness::new();
        h.write("file1", b"a");
        h.set("file1", "dir1/file1");

        h.apply(true).unwrap();

        assert_eq!(h.read("file1"), Some(b"a".to_vec()));
        assert!(!h.root.join("dir1").exists());

        // Conflicts are still detected.
        h.write("dir1/file1", b"b");
        let err = h.apply(true).unwrap_err();
        assert!(err.to_string().contains("path already exists"));
    }

    #[test]
    fn selection_limits_the_moves() {
        let h = Harness::new();
        h.write("dir1/file1", b"a");
        h.write("dir2/file2", b"b");
        h.set("dir1/file1", "file1");
        h.set("dir2/file2", "file2");

        with_repository(true, Some(&h.root), false, |repo| {
            let set = repo.create_file_set(&[h.root.join("dir1")])?;
            apply_intended_paths(repo, &set, false)
        })
        .unwrap();

        assert_eq!(h.read("file1"), Some(b"a".to_vec()));
        assert_eq!(h.read("dir2/file2"), Some(b"b".to_vec()));
    }

    #[test]
    fn applied_moves_leave_cache_hints() {
        let h = Harness::new();
        h.write("file1", b"payload");
        h.set("file1", "file2");
        h.apply(false).unwrap();

        // The write log carries a hint for the destination path.
        let log = fs::read_to_string(
            h.root.join(".filemaster").join("filecache_log"),
        )
        .unwrap();
        assert!(log.contains("file2"));
    }
}
