//! Timestamp binary dump + offline bandwidth curve tool, grounded on
//! `examples/original_source/contrib/read_tsdumps.c`.
//!
//! Little-endian fixed records: a 4-byte magic, a header, then N
//! per-op records in native tick units. The Target Thread writes one
//! dump per target at pass end (when enabled); `xdd tsreport` reads a
//! matched source/destination pair and emits a sliding-window
//! bandwidth curve.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, XddError};
use crate::tsring::{Entry, OpKind};

pub const MAGIC: u32 = 0xDEAD_BEEF;
const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8 + 8;
const RECORD_LEN: usize = 8 + 4 + 4 + 1 + 8 + 8 + 8 + 8 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpHeader {
    pub target_id: u32,
    pub request_size: u32,
    pub sector_size: u32,
    pub timer_resolution_ps: u64,
    pub entry_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpRecord {
    pub op: u64,
    pub pass: u32,
    pub worker: u32,
    pub kind: u8,
    pub byte_location: u64,
    pub xfer_size: u64,
    pub disk_start: u64,
    pub disk_end: u64,
    pub net_start: u64,
    pub net_end: u64,
}

fn kind_byte(kind: OpKind) -> u8 {
    match kind {
        OpKind::Read => 0,
        OpKind::Write => 1,
        OpKind::Noop => 2,
        OpKind::Eof => 3,
    }
}

/// Build dump records from a target's collected `TimestampRing`
/// entries. Network start/end ticks are unavailable for a pure
/// storage-only run, so they're set equal to the disk ticks.
pub fn records_from_entries(entries: &[Entry]) -> Vec<DumpRecord> {
    entries
        .iter()
        .map(|e| DumpRecord {
            op: e.op,
            pass: e.pass,
            worker: e.worker as u32,
            kind: kind_byte(e.kind),
            byte_location: e.byte_offset,
            xfer_size: e.xfer_size as u64,
            disk_start: e.start_tick.raw() as u64,
            disk_end: e.end_tick.raw() as u64,
            net_start: 0,
            net_end: 0,
        })
        .collect()
}

pub fn write_dump(path: &Path, header: &DumpHeader, records: &[DumpRecord]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| XddError::Internal(format!("create {}: {e}", path.display())))?;
    file.write_all(&MAGIC.to_le_bytes())?;
    file.write_all(&header.target_id.to_le_bytes())?;
    file.write_all(&header.request_size.to_le_bytes())?;
    file.write_all(&header.sector_size.to_le_bytes())?;
    file.write_all(&header.timer_resolution_ps.to_le_bytes())?;
    file.write_all(&header.entry_count.to_le_bytes())?;
    for r in records {
        file.write_all(&r.op.to_le_bytes())?;
        file.write_all(&r.pass.to_le_bytes())?;
        file.write_all(&r.worker.to_le_bytes())?;
        file.write_all(&[r.kind])?;
        file.write_all(&r.byte_location.to_le_bytes())?;
        file.write_all(&r.xfer_size.to_le_bytes())?;
        file.write_all(&r.disk_start.to_le_bytes())?;
        file.write_all(&r.disk_end.to_le_bytes())?;
        file.write_all(&r.net_start.to_le_bytes())?;
        file.write_all(&r.net_end.to_le_bytes())?;
    }
    Ok(())
}

pub fn read_dump(path: &Path) -> Result<(DumpHeader, Vec<DumpRecord>)> {
    let mut file = File::open(path).map_err(|e| XddError::Internal(format!("open {}: {e}", path.display())))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    if buf.len() < 4 + HEADER_LEN {
        return Err(XddError::Internal("dump file too short for header".into()));
    }
    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(XddError::Internal(format!("bad dump magic: {magic:#x}")));
    }
    let mut pos = 4;
    let read_u32 = |b: &[u8], p: usize| u32::from_le_bytes(b[p..p + 4].try_into().unwrap());
    let read_u64 = |b: &[u8], p: usize| u64::from_le_bytes(b[p..p + 8].try_into().unwrap());

    let header = DumpHeader {
        target_id: read_u32(&buf, pos),
        request_size: read_u32(&buf, pos + 4),
        sector_size: read_u32(&buf, pos + 8),
        timer_resolution_ps: read_u64(&buf, pos + 12),
        entry_count: read_u64(&buf, pos + 20),
    };
    pos += HEADER_LEN;

    let mut records = Vec::with_capacity(header.entry_count as usize);
    for _ in 0..header.entry_count {
        if pos + RECORD_LEN > buf.len() {
            return Err(XddError::Internal("dump file truncated mid-record".into()));
        }
        records.push(DumpRecord {
            op: read_u64(&buf, pos),
            pass: read_u32(&buf, pos + 8),
            worker: read_u32(&buf, pos + 12),
            kind: buf[pos + 16],
            byte_location: read_u64(&buf, pos + 17),
            xfer_size: read_u64(&buf, pos + 25),
            disk_start: read_u64(&buf, pos + 33),
            disk_end: read_u64(&buf, pos + 41),
            net_start: read_u64(&buf, pos + 49),
            net_end: read_u64(&buf, pos + 57),
        });
        pos += RECORD_LEN;
    }
    Ok((header, records))
}

/// One point of a sliding-window bandwidth curve: (window end, secs
/// since start, MB/sec observed in the preceding window).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthPoint {
    pub time_secs: f64,
    pub mb_per_sec: f64,
}

/// Compute a sliding-window bandwidth curve from one dump's records,
/// grounded on `read_tsdumps.c`'s windowed-sum approach.
pub fn bandwidth_curve(records: &[DumpRecord], period_ps: u64, window_secs: f64) -> Vec<BandwidthPoint> {
    if records.is_empty() || period_ps == 0 {
        return Vec::new();
    }
    let to_secs = |ticks: u64| (ticks as f64 * period_ps as f64) / crate::ticker::TRILLION as f64;
    let mut sorted: Vec<&DumpRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.disk_end);

    let start = to_secs(sorted.first().unwrap().disk_start);
    let end = to_secs(sorted.last().unwrap().disk_end);
    if window_secs <= 0.0 || end <= start {
        return Vec::new();
    }

    let mut points = Vec::new();
    let mut t = start + window_secs;
    while t <= end + window_secs {
        let window_start = t - window_secs;
        let bytes: u64 = sorted
            .iter()
            .filter(|r| {
                let et = to_secs(r.disk_end);
                et > window_start && et <= t
            })
            .map(|r| r.xfer_size)
            .sum();
        let mb_per_sec = (bytes as f64 / (1024.0 * 1024.0)) / window_secs;
        points.push(BandwidthPoint {
            time_secs: t,
            mb_per_sec,
        });
        t += window_secs;
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> DumpHeader {
        DumpHeader {
            target_id: 0,
            request_size: 128,
            sector_size: 512,
            timer_resolution_ps: 1_000,
            entry_count: 2,
        }
    }

    fn sample_records() -> Vec<DumpRecord> {
        vec![
            DumpRecord {
                op: 0,
                pass: 0,
                worker: 0,
                kind: 1,
                byte_location: 0,
                xfer_size: 65536,
                disk_start: 0,
                disk_end: 1_000_000,
                net_start: 0,
                net_end: 0,
            },
            DumpRecord {
                op: 1,
                pass: 0,
                worker: 1,
                kind: 1,
                byte_location: 65536,
                xfer_size: 65536,
                disk_start: 1_000_000,
                disk_end: 2_000_000,
                net_start: 0,
                net_end: 0,
            },
        ]
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let header = sample_header();
        let records = sample_records();
        write_dump(tmp.path(), &header, &records).unwrap();
        let (h2, r2) = read_dump(tmp.path()).unwrap();
        assert_eq!(h2, header);
        assert_eq!(r2, records);
    }

    #[test]
    fn bad_magic_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), [0u8; 64]).unwrap();
        assert!(read_dump(tmp.path()).is_err());
    }

    #[test]
    fn bandwidth_curve_is_nonempty_for_nonzero_window() {
        let records = sample_records();
        let points = bandwidth_curve(&records, 1_000, 1.0);
        assert!(!points.is_empty());
        assert!(points.iter().any(|p| p.mb_per_sec > 0.0));
    }
}
