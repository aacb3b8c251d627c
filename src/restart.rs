//! Restart Manifest: resume metadata for the E2E destination side.
//!
//! Plain text, newline-delimited, fsync'd after every update. Fields
//! are `key=value` pairs; unknown keys are ignored on parse so the
//! format can grow without breaking old manifests.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, XddError};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ManifestFlags: u32 {
        const ISSOURCE              = 0b001;
        const RESUME_COPY           = 0b010;
        const SUCCESSFUL_COMPLETION = 0b100;
    }
}

/// Resume state for one E2E destination target.
#[derive(Debug, Clone, Default)]
pub struct ManifestState {
    pub last_committed_op: u64,
    pub last_committed_byte_location: u64,
    pub last_committed_length: u64,
    pub source_host: String,
    pub destination_host: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub flags: u32,
}

impl ManifestState {
    pub fn flags(&self) -> ManifestFlags {
        ManifestFlags::from_bits_truncate(self.flags)
    }
}

/// A live manifest handle: the backing file plus a lock serializing updates.
pub struct RestartManifest {
    path: PathBuf,
    file: Mutex<File>,
}

impl RestartManifest {
    /// Open (creating if absent) a manifest for writing.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| XddError::Restart(format!("open {} failed: {e}", path.display())))?;
        Ok(RestartManifest {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one commit record and fsync before returning.
    pub fn update(&self, state: &ManifestState) -> Result<()> {
        let mut file = self.file.lock();
        let line = format!(
            "op={} offset={} length={} flags={:#x} src_host={} dst_host={} src_path={} dst_path={}\n",
            state.last_committed_op,
            state.last_committed_byte_location,
            state.last_committed_length,
            state.flags,
            state.source_host,
            state.destination_host,
            state.source_path.display(),
            state.destination_path.display(),
        );
        file.write_all(line.as_bytes())
            .map_err(|e| XddError::Restart(format!("write failed: {e}")))?;
        file.sync_all()
            .map_err(|e| XddError::Restart(format!("fsync failed: {e}")))?;
        Ok(())
    }

    /// On a clean finish, rewrite the manifest with a single
    /// human-readable completion record.
    pub fn mark_complete(&self, total_bytes: u64) -> Result<()> {
        let mut file = self.file.lock();
        *file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| XddError::Restart(format!("reopen for completion failed: {e}")))?;
        let line = format!("status=completed successfully total_bytes={total_bytes}\n");
        file.write_all(line.as_bytes())
            .map_err(|e| XddError::Restart(format!("write completion record failed: {e}")))?;
        file.sync_all()
            .map_err(|e| XddError::Restart(format!("fsync failed: {e}")))?;
        Ok(())
    }
}

/// Parse a manifest file into resumable state: the highest-offset
/// commit record wins.
pub fn parse(path: &Path) -> Result<ManifestState> {
    let file = File::open(path).map_err(|e| XddError::Restart(format!("open {} failed: {e}", path.display())))?;
    let reader = BufReader::new(file);
    let mut state = ManifestState::default();
    let mut found_any = false;

    for line in reader.lines() {
        let line = line.map_err(|e| XddError::Restart(format!("read failed: {e}")))?;
        if line.starts_with("status=") {
            continue;
        }
        let mut op = state.last_committed_op;
        let mut offset = state.last_committed_byte_location;
        let mut length = state.last_committed_length;
        let mut flags = state.flags;
        let mut saw_fields = false;
        for field in line.split_whitespace() {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            saw_fields = true;
            match key {
                "op" => op = value.parse().unwrap_or(op),
                "offset" => offset = value.parse().unwrap_or(offset),
                "length" => length = value.parse().unwrap_or(length),
                "flags" => {
                    let trimmed = value.trim_start_matches("0x");
                    flags = u32::from_str_radix(trimmed, 16).unwrap_or(flags);
                }
                "src_host" => state.source_host = value.to_string(),
                "dst_host" => state.destination_host = value.to_string(),
                "src_path" => state.source_path = PathBuf::from(value),
                "dst_path" => state.destination_path = PathBuf::from(value),
                _ => {}
            }
        }
        if saw_fields {
            found_any = true;
            state.last_committed_op = op;
            state.last_committed_byte_location = offset;
            state.last_committed_length = length;
            state.flags = flags;
        }
    }

    if !found_any {
        return Err(XddError::Restart(format!(
            "manifest {} contains no commit records",
            path.display()
        )));
    }
    Ok(state)
}
