//! Named pipe helpers.

use std::ffi::CString;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::IpcError;

fn fifo_error(path: &Path, source: io::Error) -> IpcError {
    IpcError::Fifo {
        path: path.to_path_buf(),
        source,
    }
}

/// Creates a FIFO at `path`. An existing FIFO is reused; any other kind of
/// file at that path is an error.
pub fn create(path: &Path) -> Result<(), IpcError> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| IpcError::InvalidName(path.display().to_string()))?;

    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) } == 0 {
        tracing::debug!(path = %path.display(), "Created fifo");
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EEXIST) {
        return Err(fifo_error(path, err));
    }

    let metadata = std::fs::metadata(path).map_err(|e| fifo_error(path, e))?;
    if !metadata.file_type().is_fifo() {
        return Err(fifo_error(
            path,
            io::Error::new(io::ErrorKind::AlreadyExists, "path exists and is not a fifo"),
        ));
    }
    tracing::info!(path = %path.display(), "Reusing existing fifo");
    Ok(())
}

/// Removes the FIFO. A FIFO that is already gone is not an error.
pub fn remove(path: &Path) -> Result<(), IpcError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(fifo_error(path, e)),
    }
}

/// Opens the read end without blocking for a writer.
pub fn open_reader(path: &Path) -> Result<File, IpcError> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| fifo_error(path, e))
}

/// Opens the write end without blocking. Fails with `ENXIO` while nobody
/// has the read end open, and refuses anything that is not a FIFO before a
/// byte is written to it.
pub fn open_writer(path: &Path) -> Result<File, IpcError> {
    let file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
        .open(path)
        .map_err(|e| fifo_error(path, e))?;

    let metadata = file.metadata().map_err(|e| fifo_error(path, e))?;
    if !metadata.file_type().is_fifo() {
        return Err(fifo_error(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a fifo"),
        ));
    }
    Ok(file)
}

/// Whether an error means the other end of the FIFO is gone for good.
pub fn is_disconnected(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EPIPE) | Some(libc::ENOENT) | Some(libc::ENOTDIR)
    ) || err.kind() == io::ErrorKind::BrokenPipe
}

/// Whether an error only means "no reader has opened the FIFO yet".
pub fn is_reader_absent(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENXIO)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn create_is_idempotent_and_remove_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests");
        create(&path).unwrap();
        create(&path).unwrap();
        remove(&path).unwrap();
        remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn create_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(create(&path), Err(IpcError::Fifo { .. })));
    }

    #[test]
    fn writer_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.conf");
        std::fs::write(&path, b"keep=me\n").unwrap();

        let IpcError::Fifo { source, .. } = open_writer(&path).unwrap_err() else {
            panic!("expected fifo error");
        };
        assert_eq!(source.kind(), io::ErrorKind::InvalidInput);
        assert!(!is_reader_absent(&source));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep=me\n");
    }

    #[test]
    fn writer_needs_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        create(&path).unwrap();

        let IpcError::Fifo { source, .. } = open_writer(&path).unwrap_err() else {
            panic!("expected fifo error");
        };
        assert!(is_reader_absent(&source));

        let mut reader = open_reader(&path).unwrap();
        let mut writer = open_writer(&path).unwrap();
        writer.write_all(b"1 2\n").unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"1 2\n");

        drop(reader);
        let err = writer.write_all(b"3 1\n").unwrap_err();
        assert!(is_disconnected(&err));
    }
}
