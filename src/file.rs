//! Offset-addressable block files.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
}

/// Durable storage addressed by byte offsets.
///
/// Implementations must allow concurrent positional reads and writes from
/// several threads; callers never rely on a shared cursor.
pub trait BlockFile: Send + Sync {
    fn mode(&self) -> FileMode;

    /// Current file size in bytes.
    fn size(&self) -> Result<u64>;

    /// Grow or truncate the file. New bytes read as zeros.
    fn resize(&self, new_size: u64) -> Result<()>;

    /// Fill `buf` with the bytes starting at `offset`.
    fn read_block(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at `offset`.
    fn write_block(&self, buf: &[u8], offset: u64) -> Result<()>;
}

/// A [`BlockFile`] backed by a regular file and positional I/O.
#[derive(Debug)]
pub struct PosixFile {
    file: File,
    mode: FileMode,
    path: Option<PathBuf>,
}

impl PosixFile {
    /// Opens `path`. Write mode creates the file if it does not exist.
    pub fn open(path: impl AsRef<Path>, mode: FileMode) -> Result<Self> {
        Self::open_with(path, mode, false)
    }

    /// Like [`PosixFile::open`], optionally with synchronous writes.
    pub fn open_with(path: impl AsRef<Path>, mode: FileMode, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true);
        if mode == FileMode::Write {
            options.write(true).create(true);
        }
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if sync_writes && mode == FileMode::Write {
                options.custom_flags(libc::O_SYNC);
            }
        }
        #[cfg(not(target_os = "linux"))]
        let _ = sync_writes;
        let file = options.open(path)?;
        Ok(Self {
            file,
            mode,
            path: Some(path.to_path_buf()),
        })
    }

    /// An anonymous file in write mode, removed by the OS once closed.
    pub fn temporary() -> Result<Self> {
        let file = tempfile::tempfile()?;
        Ok(Self {
            file,
            mode: FileMode::Write,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_writable(&self) -> Result<()> {
        match self.mode {
            FileMode::Write => Ok(()),
            FileMode::Read => Err(Error::ReadOnly {
                path: self
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<temporary>".to_string()),
            }),
        }
    }
}

impl BlockFile for PosixFile {
    fn mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn resize(&self, new_size: u64) -> Result<()> {
        self.check_writable()?;
        self.file.set_len(new_size)?;
        Ok(())
    }

    fn read_block(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_block(&self, buf: &[u8], offset: u64) -> Result<()> {
        self.check_writable()?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }
}
