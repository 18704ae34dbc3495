//! Append-only commit log
//!
//! No WAL/data split: the log IS the ledger's durable state. Each committed
//! transaction becomes one frame, and recovery replays frames in order.
//!
//! # Frame layout
//!
//! ```text
//! [4-byte length][1-byte codec][payload][4-byte checksum]
//!  └── length covers codec + payload
//! ```
//!
//! The payload is a JSON [`CommitBatch`], optionally zstd-compressed. A torn
//! tail (crash mid-write) fails the length or checksum test; recovery keeps
//! everything before it and truncates the rest.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::compression::{compress, decompress, Compression};
use super::CommitStore;
use crate::error::{Error, Result};
use crate::ledger::Mutation;

const LOG_FILE: &str = "ledger.log";
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// The mutations of one committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// Batch sequence number (monotonically increasing)
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub mutations: Vec<Mutation>,
}

impl CommitBatch {
    pub fn new(sequence: u64, mutations: Vec<Mutation>) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            mutations,
        }
    }

    /// Encode as a checksummed frame
    pub fn to_bytes(&self, compression: Compression) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize batch: {}", e)))?;
        let body = compress(&json, compression)?;

        let mut payload = Vec::with_capacity(body.len() + 1);
        payload.push(compression.tag());
        payload.extend_from_slice(&body);

        let len = u32::try_from(payload.len())
            .map_err(|_| Error::Storage(format!("Batch of {} bytes is too large", payload.len())))?;

        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&checksum(&payload).to_le_bytes());
        Ok(frame)
    }

    /// Decode one frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::Storage("Batch too short".to_string()));
        }

        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if len == 0 || bytes.len() < len + 8 {
            return Err(Error::Storage(format!(
                "Incomplete batch: expected {} bytes, got {}",
                len + 8,
                bytes.len()
            )));
        }

        let payload = &bytes[4..4 + len];
        let stored = u32::from_le_bytes([
            bytes[4 + len],
            bytes[5 + len],
            bytes[6 + len],
            bytes[7 + len],
        ]);
        if stored != checksum(payload) {
            return Err(Error::Storage("Checksum mismatch".to_string()));
        }

        let json = decompress(&payload[1..], Compression::from_tag(payload[0])?)?;
        serde_json::from_slice(&json)
            .map_err(|e| Error::SerializationError(format!("Failed to deserialize batch: {}", e)))
    }
}

fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &b| acc.rotate_left(5) ^ u32::from(b))
}

/// Reads every intact frame; returns them with the byte length they cover.
fn read_log(path: &Path) -> Result<(Vec<CommitBatch>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }

    let file = File::open(path)
        .map_err(|e| Error::Storage(format!("Failed to open log: {}", e)))?;
    let mut reader = BufReader::new(file);
    let mut batches = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!("Error reading batch length: {}", e);
                break;
            }
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            warn!(offset = valid_len, len, "Implausible batch length in log");
            break;
        }
        let mut frame = vec![0u8; len + 8];
        frame[0..4].copy_from_slice(&len_bytes);
        if let Err(e) = reader.read_exact(&mut frame[4..]) {
            warn!(offset = valid_len, "Torn batch at end of log: {}", e);
            break;
        }

        match CommitBatch::from_bytes(&frame) {
            Ok(batch) => {
                batches.push(batch);
                valid_len += frame.len() as u64;
            }
            Err(e) => {
                warn!(offset = valid_len, "Failed to decode batch: {}", e);
                break;
            }
        }
    }

    Ok((batches, valid_len))
}

struct LogState {
    file: File,
    next_sequence: u64,
    batches: u64,
}

/// Durable [`CommitStore`] backed by a single log file
pub struct FileStore {
    log_path: PathBuf,
    compression: Compression,
    fsync: bool,
    state: Mutex<LogState>,
}

impl FileStore {
    /// Create or open the log under `dir`
    pub fn open<P: AsRef<Path>>(dir: P, compression: Compression, fsync: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("Failed to create data dir: {}", e)))?;
        let log_path = dir.join(LOG_FILE);

        let (batches, valid_len) = read_log(&log_path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| Error::Storage(format!("Failed to open log: {}", e)))?;

        let file_len = file
            .metadata()
            .map_err(|e| Error::Storage(format!("Failed to stat log: {}", e)))?
            .len();
        if file_len > valid_len {
            warn!(
                path = ?log_path,
                dropped_bytes = file_len - valid_len,
                "Truncating torn tail of commit log"
            );
            file.set_len(valid_len)
                .map_err(|e| Error::Storage(format!("Failed to truncate log: {}", e)))?;
        }

        let next_sequence = batches.last().map_or(0, |b| b.sequence + 1);
        info!(
            path = ?log_path,
            batches = batches.len(),
            next_sequence,
            %compression,
            "Opened commit log"
        );

        Ok(Self {
            log_path,
            compression,
            fsync,
            state: Mutex::new(LogState {
                file,
                next_sequence,
                batches: batches.len() as u64,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    fn sync(&self, file: &File) -> Result<()> {
        if self.fsync {
            file.sync_data()
                .map_err(|e| Error::Storage(format!("Failed to sync log: {}", e)))?;
        }
        Ok(())
    }
}

impl CommitStore for FileStore {
    fn append(&self, mutations: &[Mutation]) -> Result<u64> {
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        let bytes = CommitBatch::new(sequence, mutations.to_vec()).to_bytes(self.compression)?;

        let offset = state
            .file
            .metadata()
            .map_err(|e| Error::Storage(format!("Failed to stat log: {}", e)))?
            .len();
        let written = state
            .file
            .write_all(&bytes)
            .map_err(|e| Error::Storage(format!("Failed to write batch: {}", e)))
            .and_then(|_| self.sync(&state.file));
        if let Err(e) = written {
            // Leave no partial frame behind
            if let Err(truncate) = state.file.set_len(offset) {
                warn!(error = %truncate, "Failed to truncate log after write error");
            }
            return Err(e);
        }

        state.next_sequence += 1;
        state.batches += 1;
        debug!(sequence, mutations = mutations.len(), bytes = bytes.len(), "Appended commit batch");
        Ok(sequence)
    }

    fn load(&self) -> Result<Vec<CommitBatch>> {
        let _state = self.state.lock();
        read_log(&self.log_path).map(|(batches, _)| batches)
    }

    fn compact(&self, snapshot: Vec<Mutation>) -> Result<()> {
        let mut state = self.state.lock();
        info!(path = ?self.log_path, "Compacting commit log");

        let temp_path = self.log_path.with_extension("log.tmp");
        let mut temp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp log: {}", e)))?;

        let sequence = state.next_sequence;
        let bytes = CommitBatch::new(sequence, snapshot).to_bytes(self.compression)?;
        temp.write_all(&bytes)
            .map_err(|e| Error::Storage(format!("Failed to write compacted log: {}", e)))?;
        temp.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync compacted log: {}", e)))?;

        std::fs::rename(&temp_path, &self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to rename log: {}", e)))?;

        state.file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to reopen log: {}", e)))?;
        state.next_sequence = sequence + 1;
        state.batches = 1;

        info!(bytes = bytes.len(), sequence, "Log compaction complete");
        Ok(())
    }

    fn len(&self) -> u64 {
        self.state.lock().batches
    }
}
