use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

use crate::util::format_size;

/// Sink for events emitted while the file cache scans the tree. The two
/// progress channels and the message channel are bundled into one seam so
/// that log lines can interleave cleanly with the status line.
pub trait UpdateProgress {
    /// One file has been checked against the cache.
    fn file_checked(&mut self);

    /// `bytes` more bytes of file content have been read for hashing.
    fn data_read(&mut self, bytes: u64);

    /// A human-readable message, e.g. that a large file is being hashed.
    fn log_message(&mut self, message: &str);
}

/// Progress sink that ignores everything. Used when no terminal feedback is
/// wanted.
pub struct SilentProgress;

impl UpdateProgress for SilentProgress {
    fn file_checked(&mut self) {}

    fn data_read(&mut self, _bytes: u64) {}

    fn log_message(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

/// Renders a transient status line on the last line of the console while
/// still allowing normal log lines to be printed above it.
///
/// The line is not repainted more often than once every 0.2 seconds, and not
/// at all within the first second, which avoids a flicker when an update
/// finishes quickly. When stderr is not a terminal, status updates are
/// dropped and only log lines are written.
pub struct StatusLine {
    tty: bool,
    next_paint: Instant,
    last_status: String,
}

/// Floor between repaints of the status line.
const PAINT_INTERVAL: Duration = Duration::from_millis(200);

/// Grace period before the status line first appears.
const PAINT_GRACE: Duration = Duration::from_secs(1);

impl StatusLine {
    pub fn new() -> Self {
        StatusLine {
            tty: std::io::stderr().is_terminal(),
            next_paint: Instant::now() + PAINT_GRACE,
            last_status: String::new(),
        }
    }

    fn paint(&self) {
        // Erase to end of line, then return the cursor to column one so the
        // next paint or log line overwrites the status.
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{}\x1b[K\x1b[G", self.last_status);
        let _ = stderr.flush();
    }

    /// Replace the content of the status line, rate-limited.
    pub fn set(&mut self, status: String) {
        if !self.tty {
            return;
        }

        let now = Instant::now();

        if now > self.next_paint {
            self.next_paint = now + PAINT_INTERVAL;
            self.last_status = status;
            self.paint();
        }
    }

    /// Print a normal log line without disturbing the status display.
    pub fn log(&mut self, message: &str) {
        if self.tty {
            eprintln!("{message}\x1b[K");
            self.paint();
        } else {
            eprintln!("{message}");
        }
    }

    /// Remove the status line from the console.
    pub fn clear(&mut self) {
        if self.tty {
            self.last_status.clear();
            self.paint();
        }
    }
}

impl Drop for StatusLine {
    fn drop(&mut self) {
        self.clear();
    }
}

/// The standard progress sink for cache updates: counts events and renders
/// them into the status line.
pub struct UpdateStatus {
    status_line: StatusLine,
    files_checked: u64,
    data_read: u64,
}

impl UpdateStatus {
    pub fn new() -> Self {
        UpdateStatus {
            status_line: StatusLine::new(),
            files_checked: 0,
            data_read: 0,
        }
    }

    fn update_status(&mut self) {
        self.status_line.set(format!(
            "{} files checked, {} read (cancel with ^C) ...",
            self.files_checked,
            format_size(self.data_read)
        ));
    }
}

impl UpdateProgress for UpdateStatus {
    fn file_checked(&mut self) {
        self.files_checked += 1;
        self.update_status();
    }

    fn data_read(&mut self, bytes: u64) {
        self.data_read += bytes;
        self.update_status();
    }

    fn log_message(&mut self, message: &str) {
        self.status_line.log(message);
    }
}
