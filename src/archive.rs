//! Relocation of indexed source files out of the watched directory.
//!
//! Archiving is housekeeping: callers log a failed move and leave the
//! document `indexed`.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::WatchConfig;

/// What happens to a source file once it is indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Move into this directory.
    Move(PathBuf),
    /// Leave in place; the status store alone keeps it from being rescanned.
    Keep,
}

#[derive(Debug, Clone)]
pub struct Archiver {
    mode: ArchiveMode,
}

impl Archiver {
    pub fn new(mode: ArchiveMode) -> Self {
        Self { mode }
    }

    pub fn from_config(watch: &WatchConfig) -> Self {
        if watch.archive {
            Self::new(ArchiveMode::Move(watch.archive_path()))
        } else {
            Self::new(ArchiveMode::Keep)
        }
    }

    pub fn archive_dir(&self) -> Option<&Path> {
        match &self.mode {
            ArchiveMode::Move(dir) => Some(dir),
            ArchiveMode::Keep => None,
        }
    }

    /// Moves `source` into the archive directory, replacing an older copy
    /// with the same name. Returns the new location, or `None` in
    /// [`ArchiveMode::Keep`] or when the file already lives in the archive.
    pub fn archive(&self, source: &Path) -> io::Result<Option<PathBuf>> {
        let dir = match &self.mode {
            ArchiveMode::Move(dir) => dir,
            ArchiveMode::Keep => return Ok(None),
        };
        if source.parent() == Some(dir.as_path()) {
            return Ok(None);
        }
        let name = source.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a file path: {}", source.display()),
            )
        })?;

        std::fs::create_dir_all(dir)?;
        let dest = dir.join(name);
        move_file(source, &dest)?;
        Ok(Some(dest))
    }
}

fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // Archive on another filesystem: copy, then drop the original.
            if std::fs::copy(source, dest).is_err() {
                return Err(rename_err);
            }
            std::fs::remove_file(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_mode_relocates_and_replaces() {
        let tmp = tempfile::TempDir::new().unwrap();
        let watch = tmp.path();
        let archive_dir = watch.join("indexed");
        let archiver = Archiver::new(ArchiveMode::Move(archive_dir.clone()));

        std::fs::write(watch.join("a.pdf"), b"v1").unwrap();
        let dest = archiver.archive(&watch.join("a.pdf")).unwrap().unwrap();
        assert_eq!(dest, archive_dir.join("a.pdf"));
        assert!(!watch.join("a.pdf").exists());

        std::fs::write(watch.join("a.pdf"), b"v2").unwrap();
        archiver.archive(&watch.join("a.pdf")).unwrap();
        assert_eq!(std::fs::read(archive_dir.join("a.pdf")).unwrap(), b"v2");
    }

    #[test]
    fn keep_mode_leaves_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("b.docx");
        std::fs::write(&path, b"x").unwrap();
        let archiver = Archiver::new(ArchiveMode::Keep);
        assert_eq!(archiver.archive(&path).unwrap(), None);
        assert!(path.exists());
    }

    #[test]
    fn already_archived_file_stays_put() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive_dir = tmp.path().join("indexed");
        std::fs::create_dir_all(&archive_dir).unwrap();
        let path = archive_dir.join("c.rtf");
        std::fs::write(&path, b"x").unwrap();
        let archiver = Archiver::new(ArchiveMode::Move(archive_dir));
        assert_eq!(archiver.archive(&path).unwrap(), None);
        assert!(path.exists());
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archiver = Archiver::new(ArchiveMode::Move(tmp.path().join("indexed")));
        assert!(archiver.archive(&tmp.path().join("gone.pdf")).is_err());
    }
}
