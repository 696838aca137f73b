pub mod apply;
pub mod cache;
pub mod cli;
pub mod digest;
pub mod error;
pub mod fs;
pub mod index;
pub mod repository;
pub mod statusline;
pub mod store;
pub mod util;
pub mod writelog;

use std::path::PathBuf;

use anyhow::Result;

use apply::apply_intended_paths;
use cli::{Cli, Command, PathWithSlash, split_set_args};
use error::user_bail;
use repository::{
    MatchedFile, initialize_repository, list_files, remove_missing_files, set_intended_paths,
    with_repository,
};
use util::absolute_normalized;

/// Run the parsed command line. User mistakes surface as `UserError` inside
/// the returned error; everything else is an environment failure.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        None => default_command(cli.update_cache),
        Some(Command::Init { path }) => init_command(cli.update_cache, path),
        Some(Command::Ls {
            summary,
            all,
            paths,
        }) => ls_command(cli.update_cache, summary, all, paths),
        Some(Command::Set { apply, args }) => {
            let (paths, intended_path) = split_set_args(&args);
            set_command(cli.update_cache, apply, paths, intended_path)
        }
        Some(Command::Reset {
            all,
            set_current,
            missing,
            cache,
            paths,
        }) => reset_command(cli.update_cache, all, set_current, missing, cache, paths),
        Some(Command::Apply {
            all,
            dry_run,
            paths,
        }) => apply_command(cli.update_cache, all, dry_run, paths),
    }
}

/// Without a sub-command, update the cache and print the repository summary.
fn default_command(update_cache: bool) -> Result<()> {
    with_repository(update_cache, None, false, |repo| {
        let file_set = repo.create_file_set(&[repo.root_dir.clone()])?;
        list_files(repo, &file_set, true);

        Ok(())
    })
}

fn init_command(update_cache: bool, path: PathBuf) -> Result<()> {
    initialize_repository(&path)?;

    // Index the existing tree right away (unless -U was given).
    with_repository(update_cache, Some(&path), false, |_| Ok(()))
}

fn ls_command(update_cache: bool, summary: bool, all: bool, paths: Vec<PathBuf>) -> Result<()> {
    with_repository(update_cache, None, false, |repo| {
        let paths = if all {
            vec![repo.root_dir.clone()]
        } else if paths.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            paths
        };

        let file_set = repo.create_file_set(&paths)?;
        list_files(repo, &file_set, summary);

        Ok(())
    })
}

fn set_command(
    update_cache: bool,
    apply: bool,
    paths: Vec<PathBuf>,
    intended_path: PathWithSlash,
) -> Result<()> {
    with_repository(update_cache, None, false, |repo| {
        let file_set = repo.create_file_set(&paths)?;
        let intended_path_base = absolute_normalized(&intended_path.path)?;

        set_intended_paths(repo, &file_set, |matched_file: &MatchedFile| {
            let mut matched_root = matched_file.matched_root.as_path();

            // With a trailing slash on the intended path, the relative path
            // appended to it is computed against the parent of the matched
            // root, so the selected file or directory keeps its name.
            if intended_path.trailing_slash {
                matched_root = matched_root.parent().unwrap_or(matched_root);
            }

            let relative = matched_file.path.strip_prefix(matched_root)?;

            // A file selected directly (no trailing slash) strips down to an
            // empty relative path; its intended path is the base itself.
            if relative.as_os_str().is_empty() {
                Ok(Some(intended_path_base.clone()))
            } else {
                Ok(Some(intended_path_base.join(relative)))
            }
        })?;

        if apply {
            apply_intended_paths(repo, &file_set, false)?;
        }

        Ok(())
    })
}

fn reset_command(
    update_cache: bool,
    all: bool,
    set_current: bool,
    missing: bool,
    cache: bool,
    paths: Vec<PathBuf>,
) -> Result<()> {
    // Paths deliberately do not default to the current directory, to prevent
    // accidentally resetting the intended path of a large number of files.
    if !cache && !missing && !all && paths.is_empty() {
        user_bail!("One of --cache, --missing, --all or paths is required.");
    }

    if set_current && !all && paths.is_empty() {
        user_bail!("--set-current requires --all or paths.");
    }

    with_repository(update_cache, None, cache, |repo| {
        if missing {
            remove_missing_files(repo);
        } else {
            let paths = if all {
                vec![repo.root_dir.clone()]
            } else {
                paths
            };

            let file_set = repo.create_file_set(&paths)?;

            set_intended_paths(repo, &file_set, |matched_file| {
                Ok(set_current.then(|| matched_file.path.clone()))
            })?;
        }

        Ok(())
    })
}

fn apply_command(update_cache: bool, all: bool, dry_run: bool, paths: Vec<PathBuf>) -> Result<()> {
    with_repository(update_cache, None, false, |repo| {
        let paths = if all {
            vec![repo.root_dir.clone()]
        } else if paths.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            paths
        };

        let file_set = repo.create_file_set(&paths)?;
        apply_intended_paths(repo, &file_set, dry_run)
    })
}
