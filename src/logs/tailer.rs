//! Incremental file tailing with rotation detection.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::types::Result;

/// Upper bound on bytes consumed from one file in a single poll. A burst
/// larger than this is drained across consecutive polls instead of stalling
/// the collection loop.
const MAX_READ_PER_POLL: u64 = 1024 * 1024;

/// Cursor over one log file. Tracks the byte offset of consumed data and
/// the file's identity so rotation (new inode at the same path) and
/// truncation (size below the cursor) restart reads from the top of the
/// replacement file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    inode: Option<u64>,
    partial: String,
}

impl LogTailer {
    /// A tailer that has consumed nothing; the first poll reads the file
    /// from the beginning.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            inode: None,
            partial: String::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read newly appended data and return the complete lines in it, oldest
    /// first. A trailing fragment without a newline is held back and
    /// prepended to the next poll's data. Blank lines are dropped.
    pub fn poll(&mut self) -> Result<Vec<String>> {
        let metadata = std::fs::metadata(&self.path)?;
        let size = metadata.len();
        let current_inode = file_inode(&metadata);

        let truncated = size < self.offset;
        let rotated = matches!((self.inode, current_inode), (Some(a), Some(b)) if a != b);
        if truncated || rotated {
            debug!(path = %self.path.display(), "log_rotation_detected");
            self.offset = 0;
            self.partial.clear();
        }
        self.inode = current_inode;

        if size == self.offset {
            return Ok(Vec::new());
        }

        let to_read = (size - self.offset).min(MAX_READ_PER_POLL);
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity(to_read as usize);
        file.take(to_read).read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;

        let text = String::from_utf8_lossy(&buf);
        let mut lines = Vec::new();
        for chunk in text.split_inclusive('\n') {
            match chunk.strip_suffix('\n') {
                Some(stripped) => {
                    let stripped = stripped.strip_suffix('\r').unwrap_or(stripped);
                    let line = if self.partial.is_empty() {
                        stripped.to_string()
                    } else {
                        let mut line = std::mem::take(&mut self.partial);
                        line.push_str(stripped);
                        line
                    };
                    if !line.trim().is_empty() {
                        lines.push(line);
                    }
                }
                None => self.partial.push_str(chunk),
            }
        }
        Ok(lines)
    }
}

#[cfg(unix)]
fn file_inode(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_inode(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, data: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn test_appended_lines_are_returned_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let mut tailer = LogTailer::new(path.clone());
        assert_eq!(tailer.poll().unwrap(), vec!["one", "two"]);
        assert!(tailer.poll().unwrap().is_empty());

        append(&path, "three\n");
        assert_eq!(tailer.poll().unwrap(), vec!["three"]);
    }

    #[test]
    fn test_partial_line_is_carried_until_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "begin").unwrap();

        let mut tailer = LogTailer::new(path.clone());
        assert!(tailer.poll().unwrap().is_empty());

        append(&path, " end\nnext");
        assert_eq!(tailer.poll().unwrap(), vec!["begin end"]);

        append(&path, " part\n");
        assert_eq!(tailer.poll().unwrap(), vec!["next part"]);
    }

    #[test]
    fn test_truncation_resets_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "stale one\nstale two\n").unwrap();

        let mut tailer = LogTailer::new(path.clone());
        assert_eq!(tailer.poll().unwrap().len(), 2);

        std::fs::write(&path, "fresh\n").unwrap();
        assert_eq!(tailer.poll().unwrap(), vec!["fresh"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_rotation_to_a_new_inode_restarts_from_top() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "before rotation\n").unwrap();

        let mut tailer = LogTailer::new(path.clone());
        assert_eq!(tailer.poll().unwrap(), vec!["before rotation"]);

        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, "after rotation\n").unwrap();
        assert_eq!(tailer.poll().unwrap(), vec!["after rotation"]);
    }

    #[test]
    fn test_read_is_capped_per_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        // 1200 lines of exactly 1 KiB each, so the 1 MiB cap lands on a
        // line boundary after 1024 of them.
        let line = format!("{}\n", "x".repeat(1023));
        std::fs::write(&path, line.repeat(1200)).unwrap();

        let mut tailer = LogTailer::new(path.clone());
        assert_eq!(tailer.poll().unwrap().len(), 1024);
        assert_eq!(tailer.poll().unwrap().len(), 176);
        assert!(tailer.poll().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = LogTailer::new(dir.path().join("absent.log"));
        let err = tailer.poll().unwrap_err();
        assert_eq!(err.kind(), "io_error");
    }
}
