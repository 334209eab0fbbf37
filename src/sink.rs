//! Writing finished workbooks to disk.
//!
//! A spreadsheet application holding the report open makes a plain write fail.
//! The fallback writes a temporary file next to the destination and renames it
//! over the original, which succeeds on hosts that allow replacing a file that
//! is open for reading.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::Result;

/// Something a finished workbook can be written to.
pub trait Destination {
    fn describe(&self) -> String;

    /// Overwrites the destination in place.
    fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Writes elsewhere first, then atomically replaces the destination.
    fn write_via_replace(&self, bytes: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Direct,
    Replaced,
}

fn is_lock_error(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::PermissionDenied { return true; }
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(e.raw_os_error(), Some(32) | Some(33))
}

/// Writes `bytes`, falling back to temp-file-then-replace when the destination is locked.
pub fn commit<D: Destination + ?Sized>(dest: &D, bytes: &[u8]) -> Result<WriteOutcome> {
    match dest.write(bytes) {
        Ok(()) => Ok(WriteOutcome::Direct),
        Err(e) if is_lock_error(&e) => {
            warn!(destination = %dest.describe(), error = %e, "destination locked, writing via temporary file");
            dest.write_via_replace(bytes)?;
            info!(destination = %dest.describe(), "destination replaced");
            Ok(WriteOutcome::Replaced)
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone)]
pub struct FileDestination {
    pub path: PathBuf,
}

impl FileDestination {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

impl Destination for FileDestination {
    fn describe(&self) -> String { self.path.display().to_string() }

    fn write(&self, bytes: &[u8]) -> io::Result<()> { fs::write(&self.path, bytes) }

    fn write_via_replace(&self, bytes: &[u8]) -> io::Result<()> {
        let mut tmp = NamedTempFile::new_in(self.dir())?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Refuses direct writes the way a file held open elsewhere does.
    struct Locked {
        inner: FileDestination,
        attempts: RefCell<u32>,
    }

    impl Destination for Locked {
        fn describe(&self) -> String { self.inner.describe() }

        fn write(&self, _bytes: &[u8]) -> io::Result<()> {
            *self.attempts.borrow_mut() += 1;
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "file is open in another program"))
        }

        fn write_via_replace(&self, bytes: &[u8]) -> io::Result<()> { self.inner.write_via_replace(bytes) }
    }

    #[test]
    fn direct_write() {
        let dir = tempdir().unwrap();
        let dest = FileDestination::new(dir.path().join("out.xlsx"));
        assert_eq!(commit(&dest, b"abc").unwrap(), WriteOutcome::Direct);
        assert_eq!(fs::read(&dest.path).unwrap(), b"abc");
    }

    #[test]
    fn locked_destination_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        fs::write(&path, b"old").unwrap();
        let dest = Locked { inner: FileDestination::new(&path), attempts: RefCell::new(0) };
        assert_eq!(commit(&dest, b"new").unwrap(), WriteOutcome::Replaced);
        assert_eq!(*dest.attempts.borrow(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"new");
        // No temporary files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn other_errors_propagate() {
        let dir = tempdir().unwrap();
        let dest = FileDestination::new(dir.path().join("missing").join("out.xlsx"));
        assert!(commit(&dest, b"x").is_err());
    }
}
