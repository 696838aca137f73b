use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// All path separator characters significant on the current platform.
#[cfg(windows)]
const PATH_SEPARATORS: &[char] = &['/', '\\'];
#[cfg(not(windows))]
const PATH_SEPARATORS: &[char] = &['/'];

/// A path argument that remembers whether it was written with a trailing
/// separator, which `set` uses to decide whether the selected file's name is
/// appended to the intended path.
#[derive(Clone, Debug)]
pub struct PathWithSlash {
    pub path: PathBuf,
    pub trailing_slash: bool,
}

impl PathWithSlash {
    pub fn new(path_str: &str) -> Self {
        PathWithSlash {
            path: PathBuf::from(path_str),
            trailing_slash: path_str.ends_with(PATH_SEPARATORS),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "filemaster",
    version,
    about = "Track files by content hash and move them to their intended paths"
)]
pub struct Cli {
    /// Disable scanning the directory tree for changes before running the
    /// sub-command
    #[arg(
        short = 'U',
        long = "no-update-cache",
        global = true,
        action = ArgAction::SetFalse
    )]
    pub update_cache: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a .filemaster directory in the current working directory
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Print information about the files in the repository
    Ls {
        /// Instead of listing any files, just print the summary counting up
        /// the files
        #[arg(short, long)]
        summary: bool,

        /// List all files in the repository
        #[arg(short, long, conflicts_with = "paths")]
        all: bool,

        /// List files which are currently located under these paths.
        /// Defaults to the current directory
        paths: Vec<PathBuf>,
    },

    /// Set the intended path of files or directories
    Set {
        /// Move the files to their new intended paths
        #[arg(long)]
        apply: bool,

        /// The files or directories whose intended path should be set,
        /// followed by the intended path. If the intended path ends in a
        /// slash, the names of the selected files and directories are
        /// appended to it
        #[arg(required = true, num_args = 2.., value_name = "PATHS")]
        args: Vec<String>,
    },

    /// Reset the intended path property of files
    Reset {
        /// Remove the intended path of all files in the repository
        #[arg(
            short,
            long,
            conflicts_with_all = ["missing", "cache", "paths"]
        )]
        all: bool,

        /// Instead of removing the intended paths from files, set them to
        /// their current paths
        #[arg(short = 's', long = "set-current")]
        set_current: bool,

        /// Remove the intended path from files which can't be found in the
        /// directory tree anymore
        #[arg(long, conflicts_with_all = ["cache", "set_current", "paths"])]
        missing: bool,

        /// Clear the file cache instead of resetting intended paths
        #[arg(long, conflicts_with_all = ["set_current", "paths"])]
        cache: bool,

        /// Files or directories from which to remove the intended path
        paths: Vec<PathBuf>,
    },

    /// Apply the intended path to files by moving them to their intended
    /// paths
    Apply {
        /// Apply to all files in the repository
        #[arg(short, long, conflicts_with = "paths")]
        all: bool,

        /// Validate and print the planned changes without performing them
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,

        /// Apply to files currently located under these paths. Defaults to
        /// the current directory
        paths: Vec<PathBuf>,
    },
}

/// Split the positional arguments of `set` into the selection paths and the
/// trailing intended path.
pub fn split_set_args(args: &[String]) -> (Vec<PathBuf>, PathWithSlash) {
    let (paths, intended) = args.split_at(args.len() - 1);

    (
        paths.iter().map(PathBuf::from).collect(),
        PathWithSlash::new(&intended[0]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn parse_err(args: &[&str]) -> clap::Error {
        Cli::try_parse_from(args).unwrap_err()
    }

    #[test]
    fn update_cache_defaults_to_true() {
        assert!(parse(&["filemaster"]).update_cache);
        assert!(!parse(&["filemaster", "-U"]).update_cache);
    }

    #[test]
    fn update_cache_flag_is_global() {
        let cli = parse(&["filemaster", "ls", "-U"]);
        assert!(!cli.update_cache);
    }

    #[test]
    fn trailing_slash_is_detected() {
        assert!(PathWithSlash::new("dir1/").trailing_slash);
        assert!(!PathWithSlash::new("dir1").trailing_slash);
        assert!(!PathWithSlash::new("dir1/file").trailing_slash);
    }

    #[test]
    fn set_args_split() {
        let cli = parse(&["filemaster", "set", "a", "b", "dir/"]);
        let Some(Command::Set { apply, args }) = cli.command else {
            panic!("expected set");
        };

        assert!(!apply);
        let (paths, intended) = split_set_args(&args);
        assert_eq!(paths, [PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(intended.path, PathBuf::from("dir"));
        assert!(intended.trailing_slash);
    }

    #[test]
    fn set_requires_two_arguments() {
        parse_err(&["filemaster", "set", "only-one"]);
        parse_err(&["filemaster", "set"]);
    }

    #[test]
    fn reset_flag_combinations_are_rejected() {
        parse_err(&["filemaster", "reset", "--missing", "foo"]);
        parse_err(&["filemaster", "reset", "--missing", "-a"]);
        parse_err(&["filemaster", "reset", "--missing", "-s"]);
        parse_err(&["filemaster", "reset", "--cache", "foo"]);
        parse_err(&["filemaster", "reset", "--cache", "-a"]);
        parse_err(&["filemaster", "reset", "--cache", "--missing"]);
        parse_err(&["filemaster", "reset", "--cache", "-s"]);
    }

    #[test]
    fn ls_all_conflicts_with_paths() {
        parse_err(&["filemaster", "ls", "-a", "dir1"]);
    }

    #[test]
    fn apply_dry_run_flag() {
        let cli = parse(&["filemaster", "apply", "-n"]);
        let Some(Command::Apply { dry_run, .. }) = cli.command else {
            panic!("expected apply");
        };
        assert!(dry_run);
    }
}
