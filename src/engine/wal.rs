//! LEVEE - Write-Ahead Log (WAL)
//! Provides durability by logging every write batch to disk before it is
//! applied to the in-memory MemTable.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::BatchOp;

/// Size of the frame header: payload length + CRC32.
const FRAME_HEADER: usize = 8;

/// One logged batch. All ops share the batch's sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub ops: Vec<BatchOp>,
}

/// What recovery found in a log file.
#[derive(Debug, Default)]
pub struct Recovered {
    /// Every intact record, in log order.
    pub records: Vec<WalRecord>,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
    /// Description of the first bad frame, if the log had one.
    pub damage: Option<String>,
}

/// Write-Ahead Log for crash recovery and durability.
///
/// ## Binary Format (per frame)
/// ```text
/// [payload_len: 4 bytes (LE)][crc: 4 bytes (LE)][payload: bincode(WalRecord)]
/// ```
pub struct WriteAheadLog {
    /// Path to the WAL file on disk.
    path: PathBuf,
    /// File handle opened for appending.
    file: File,
}

impl WriteAheadLog {
    /// Open or create a WAL file at the specified path.
    pub fn open(path: PathBuf) -> EngineResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Returns the path to the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode a record into its on-disk frame.
    fn encode(record: &WalRecord) -> EngineResult<Vec<u8>> {
        let payload = bincode::serialize(record)?;
        let mut buf = Vec::with_capacity(FRAME_HEADER + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Append a batch record. With `sync` the file is fsynced before
    /// returning, so the write survives a crash once acknowledged.
    pub fn append(&mut self, record: &WalRecord, sync: bool) -> EngineResult<usize> {
        let encoded = Self::encode(record)?;
        self.file.write_all(&encoded)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(encoded.len())
    }

    /// Flush buffered data to disk.
    pub fn sync(&mut self) -> EngineResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Read every intact frame from `path`. Stops at the first torn or
    /// corrupt frame and reports it in `damage`.
    pub fn recover(path: &Path) -> EngineResult<Recovered> {
        let mut data = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut data)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Recovered::default()),
            Err(e) => return Err(e.into()),
        }

        let mut recovered = Recovered::default();
        let mut offset = 0usize;
        while offset < data.len() {
            match Self::decode_frame(&data[offset..]) {
                Ok((record, used)) => {
                    recovered.records.push(record);
                    offset += used;
                }
                Err(reason) => {
                    recovered.damage = Some(format!("{} at offset {}", reason, offset));
                    break;
                }
            }
        }
        recovered.valid_len = offset as u64;
        Ok(recovered)
    }

    fn decode_frame(buf: &[u8]) -> Result<(WalRecord, usize), String> {
        if buf.len() < FRAME_HEADER {
            return Err("truncated frame header".to_string());
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let end = FRAME_HEADER + len;
        if buf.len() < end {
            return Err("truncated frame payload".to_string());
        }
        let payload = &buf[FRAME_HEADER..end];
        if crc32fast::hash(payload) != crc {
            return Err("checksum mismatch".to_string());
        }
        let record = bincode::deserialize(payload).map_err(|e| format!("undecodable record: {}", e))?;
        Ok((record, end))
    }

    /// Cut the log back to its intact prefix so appends start clean.
    pub fn truncate_to(path: &Path, len: u64) -> EngineResult<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    /// Replace the log with a single checkpoint record.
    /// The new log is written beside the old one and renamed over it.
    pub fn rewrite(&mut self, checkpoint: &WalRecord) -> EngineResult<()> {
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            if !checkpoint.ops.is_empty() {
                file.write_all(&Self::encode(checkpoint)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        // Reopen in append mode
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }
}
