//! Local filesystem primitives used by transfer tasks

use crate::error::{IoResultExt, Result, TransferError};
use filetime::FileTime;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::SystemTime;

/// Copy buffer size for streamed writes
const BUFFER_SIZE: usize = 64 * 1024;

/// Create the parent directories of `path`
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_path(parent)?;
        }
    }
    Ok(())
}

/// Read a whole file into memory
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_path(path)
}

/// Read `length` bytes starting at `offset`
pub fn read_range(path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path).with_path(path)?;
    file.seek(SeekFrom::Start(offset)).with_path(path)?;

    let mut buffer = Vec::with_capacity(length as usize);
    file.take(length).read_to_end(&mut buffer).with_path(path)?;
    if (buffer.len() as u64) < length {
        return Err(TransferError::io(
            path,
            std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("expected {} bytes at offset {}, read {}", length, offset, buffer.len()),
            ),
        ));
    }
    Ok(buffer)
}

/// Create (or truncate) a file for writing, creating parent directories
pub fn create_file(path: &Path) -> Result<File> {
    ensure_parent(path)?;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_path(path)
}

/// Stream `reader` into a new file at `path`. Returns the bytes written.
pub fn write_stream(path: &Path, mut reader: impl Read) -> Result<u64> {
    let file = create_file(path)?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let written = std::io::copy(&mut reader, &mut writer).with_path(path)?;
    writer.flush().with_path(path)?;
    Ok(written)
}

/// Stream `reader` into `file` starting at `offset`, without moving a shared cursor.
///
/// Several parts of one download write through the same handle concurrently.
pub fn write_stream_at(file: &File, path: &Path, offset: u64, mut reader: impl Read) -> Result<u64> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::io(path, e)),
        };
        write_all_at(file, &buffer[..n], offset + written).with_path(path)?;
        written += n as u64;
    }
    Ok(written)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Apply a modification time to a file
pub fn set_mtime(path: &Path, mtime: SystemTime) -> Result<()> {
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime)).with_path(path)
}

/// Delete a file
pub fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).with_path(path)
}

/// Best-effort removal of a partially written file
pub fn discard_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove partial file {}: {}", path.display(), e),
    }
}
