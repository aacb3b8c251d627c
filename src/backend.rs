//! Storage backend contract.
//!
//! Two variants share one trait: a generic file/device backend (fully
//! implemented here) and the SCSI-Generic passthrough path, which is
//! out of scope to reimplement — the core only needs "byte-addressed
//! read/write", so `ScsiGenericBackend` is a stub satisfying the same
//! port with an explicit `unimplemented` error rather than a fake
//! implementation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::{Result, XddError};
use crate::platform;

/// Outcome of one read/write call: bytes transferred, or a clean EOF
/// ("returned==0 with no error on a regular file" is EOF, not an
/// error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    Transferred(usize),
    Eof,
}

/// Byte-addressed read/write port a Worker Agent issues ops against.
pub trait StorageBackend: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<IoOutcome>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<IoOutcome>;
    fn preallocate(&mut self, bytes: u64) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
}

/// Generic file or character/block device backend.
pub struct FileBackend {
    file: File,
    is_regular_file: bool,
}

impl FileBackend {
    pub fn open(path: &Path, write: bool, direct_io: bool) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true);
        if write {
            opts.write(true).create(true);
        }
        let extra_flags = platform::extra_open_flags(direct_io);
        if extra_flags != 0 {
            opts.custom_flags(extra_flags);
        }
        let file = opts.open(path).map_err(|e| {
            XddError::Resource(format!("open {} failed: {}", path.display(), e))
        })?;
        let is_regular_file = file
            .metadata()
            .map(|m| m.file_type().is_file())
            .unwrap_or(true);
        Ok(FileBackend {
            file,
            is_regular_file,
        })
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<IoOutcome> {
        self.file.seek(SeekFrom::Start(offset))?;
        match self.file.read(buf) {
            Ok(0) if self.is_regular_file => Ok(IoOutcome::Eof),
            Ok(n) => Ok(IoOutcome::Transferred(n)),
            Err(e) => Err(e.into()),
        }
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<IoOutcome> {
        self.file.seek(SeekFrom::Start(offset))?;
        let n = self.file.write(buf)?;
        Ok(IoOutcome::Transferred(n))
    }

    fn preallocate(&mut self, bytes: u64) -> Result<()> {
        #[cfg(unix)]
        {
            let fd = std::os::unix::io::AsRawFd::as_raw_fd(&self.file);
            // SAFETY: fd is owned by self.file for the duration of the call.
            let rc = unsafe { libc::ftruncate(fd, bytes as libc::off_t) };
            if rc != 0 {
                return Err(XddError::Resource(format!(
                    "preallocate({bytes}) failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// SCSI-Generic passthrough port. The core only relies on the
/// `StorageBackend` trait, never on CDB layout.
pub struct ScsiGenericBackend;

impl StorageBackend for ScsiGenericBackend {
    fn read_at(&mut self, _offset: u64, _buf: &mut [u8]) -> Result<IoOutcome> {
        Err(XddError::Resource(
            "SCSI-Generic passthrough is an external collaborator, not reimplemented".into(),
        ))
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> Result<IoOutcome> {
        Err(XddError::Resource(
            "SCSI-Generic passthrough is an external collaborator, not reimplemented".into(),
        ))
    }

    fn preallocate(&mut self, _bytes: u64) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
