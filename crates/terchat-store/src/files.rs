//! Line-oriented file primitives.
//!
//! Appends go through a single `write_all` on a file opened in append mode.
//! Whole-file rewrites go to a temporary file in the same directory which is
//! then renamed over the original, so a crash leaves either the old or the
//! new contents and never a truncated file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};

/// Read every non-empty line of `path`. A missing file is [`StoreError::NotFound`].
pub(crate) fn read_lines(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| not_found_or_io(path, e))?;
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Append one line to an existing file.
pub(crate) fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| not_found_or_io(path, e))?;

    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Atomically replace the contents of `path` with `lines`.
pub(crate) fn rewrite_lines<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    for line in lines {
        tmp.write_all(line.as_ref().as_bytes())?;
        tmp.write_all(b"\n")?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Create `path` empty if it does not exist yet; existing contents are kept.
pub(crate) fn touch(path: &Path) -> Result<()> {
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

fn not_found_or_io(path: &Path, e: std::io::Error) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(path.to_path_buf())
    } else {
        StoreError::Io(e)
    }
}
