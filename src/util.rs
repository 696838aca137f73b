use std::env;
use std::path::{Component, Path, PathBuf};

/// Format a size in bytes into a human-readable string, e.g. "15 bytes" or
/// "12.3 TB". Uses decimal SI prefixes.
pub fn format_size(size: u64) -> String {
    if size < 1000 {
        return format!("{size} bytes");
    }

    let mut value = size as f64;

    for unit in ["KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"] {
        value /= 1000.0;

        if value < 10.0 {
            return format!("{value:.2} {unit}");
        } else if value < 100.0 {
            return format!("{value:.1} {unit}");
        } else if value < 1000.0 || unit == "YB" {
            return format!("{value:.0} {unit}");
        }
    }

    unreachable!()
}

/// Render a path relative to the current working directory, the way it is
/// shown to the user. May contain `..` components when the path lies outside
/// the working directory. Falls back to the absolute path when no relative
/// form exists (e.g. different drive).
pub fn relpath(path: &Path) -> String {
    let rel = env::current_dir()
        .ok()
        .and_then(|cwd| pathdiff::diff_paths(path, cwd));

    match rel {
        Some(p) if p.as_os_str().is_empty() => ".".to_string(),
        Some(p) => p.display().to_string(),
        None => path.display().to_string(),
    }
}

/// Make a path absolute and normalize `.` and `..` components lexically,
/// without requiring the path to exist. Used for intended paths, which
/// usually name files that are yet to be created.
pub fn absolute_normalized(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };

    let mut result = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` above the root stays at the root.
                result.pop();
            }
            c => result.push(c),
        }
    }

    Ok(result)
}
