//! Shared utility functions for the Foreman crate.

use std::io;
use std::path::Path;

/// Write a file atomically: write to a sibling temp file, then rename over
/// the target. A crash mid-write leaves the old content intact, never a
/// half-written file.
pub fn atomic_write(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = match path.file_name() {
        Some(name) => {
            let mut n = name.to_os_string();
            n.push(".tmp");
            path.with_file_name(n)
        }
        None => return Err(io::Error::other("path has no file name")),
    };
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Truncate text to at most `max_chars`, marking the cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}\n... [truncated]")
}
