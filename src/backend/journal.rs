//! Append-only record journal
//!
//! The relational backend persists every write as one journal record at
//! `<data_dir>/data/records.dat`. The journal is replayed on open: for each
//! `(entity_type, name)` the latest record wins and a tombstone removes it.
//!
//! # Record layout
//!
//! ```text
//! +--------------------+
//! | Record Length u32  |  total length including this field and the checksum
//! | Entity Type        |  u32 LE length + UTF-8
//! | Name               |  u32 LE length + UTF-8
//! | Tombstone u8       |  0 or 1
//! | Body               |  u32 LE length + JSON object (empty for tombstones)
//! | Checksum u32       |  CRC32 over every preceding byte
//! +--------------------+
//! ```
//!
//! Any checksum or framing failure is fatal; the journal is never skipped
//! past a bad record.

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde_json::Value;

use super::contract::Record;
use super::errors::{BackendError, BackendResult};
use crate::observability::{log_event, Event};

/// Length prefix + two empty strings + tombstone + empty body + checksum
const MIN_RECORD_SIZE: usize = 4 + 4 + 4 + 1 + 4 + 4;

const JOURNAL_FILE: &str = "records.dat";

/// One journal record
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub entity_type: String,
    pub name: String,
    pub tombstone: bool,
    pub body: Record,
}

impl JournalEntry {
    pub fn put(entity_type: impl Into<String>, name: impl Into<String>, body: Record) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            tombstone: false,
            body,
        }
    }

    pub fn tombstone(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            tombstone: true,
            body: Record::new(),
        }
    }

    /// Serializes the complete record, checksum included.
    pub fn encode(&self) -> BackendResult<Vec<u8>> {
        let body = if self.tombstone {
            Vec::new()
        } else {
            serde_json::to_vec(&self.body).map_err(|e| BackendError::Internal(e.to_string()))?
        };

        let mut payload = Vec::with_capacity(self.entity_type.len() + self.name.len() + body.len() + 13);
        put_bytes(&mut payload, self.entity_type.as_bytes())?;
        put_bytes(&mut payload, self.name.as_bytes())?;
        payload.push(u8::from(self.tombstone));
        put_bytes(&mut payload, &body)?;

        let record_length = u32::try_from(4 + payload.len() + 4)
            .map_err(|_| BackendError::Internal("journal record exceeds 4 GiB".to_string()))?;

        let mut record = Vec::with_capacity(record_length as usize);
        record.extend_from_slice(&record_length.to_le_bytes());
        record.extend_from_slice(&payload);
        let checksum = compute_checksum(&record);
        record.extend_from_slice(&checksum.to_le_bytes());
        Ok(record)
    }

    /// Parses one record from the front of `data`.
    ///
    /// Returns the entry and the number of bytes consumed. `offset` is the
    /// file position of `data[0]` and only feeds error messages.
    pub fn decode(data: &[u8], offset: u64) -> BackendResult<(Self, usize)> {
        let corrupt = |message: String| BackendError::Corruption { offset, message };

        if data.len() < MIN_RECORD_SIZE {
            return Err(corrupt(format!(
                "truncated record: {} bytes remaining, minimum is {}",
                data.len(),
                MIN_RECORD_SIZE
            )));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < MIN_RECORD_SIZE {
            return Err(corrupt(format!("invalid record length {}", record_length)));
        }
        if record_length > data.len() {
            return Err(corrupt(format!(
                "record length {} exceeds remaining {} bytes",
                record_length,
                data.len()
            )));
        }

        let checksum_at = record_length - 4;
        let stored = u32::from_le_bytes([
            data[checksum_at],
            data[checksum_at + 1],
            data[checksum_at + 2],
            data[checksum_at + 3],
        ]);
        let computed = compute_checksum(&data[..checksum_at]);
        if stored != computed {
            return Err(corrupt(format!(
                "checksum mismatch: computed {:08x}, stored {:08x}",
                computed, stored
            )));
        }

        let mut cursor = Cursor::new(&data[4..checksum_at]);
        let entity_type = read_string(&mut cursor).map_err(&corrupt)?;
        let name = read_string(&mut cursor).map_err(&corrupt)?;
        let mut flag = [0u8; 1];
        cursor
            .read_exact(&mut flag)
            .map_err(|e| corrupt(format!("missing tombstone flag: {}", e)))?;
        let tombstone = match flag[0] {
            0 => false,
            1 => true,
            other => return Err(corrupt(format!("invalid tombstone flag {}", other))),
        };
        let raw = read_bytes(&mut cursor).map_err(&corrupt)?;

        let body = if tombstone {
            Record::new()
        } else {
            match serde_json::from_slice::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(corrupt("record body is not a JSON object".to_string())),
                Err(e) => return Err(corrupt(format!("invalid record body: {}", e))),
            }
        };

        Ok((
            Self {
                entity_type,
                name,
                tombstone,
                body,
            },
            record_length,
        ))
    }
}

/// Journal file handle. Every append is synced before it returns.
pub struct Journal {
    path: PathBuf,
    file: File,
    records: u64,
}

impl Journal {
    /// Opens or creates `<data_dir>/data/records.dat` and replays it.
    pub fn open(data_dir: &Path) -> BackendResult<(Self, Vec<JournalEntry>)> {
        let dir = data_dir.join("data");
        fs::create_dir_all(&dir)?;
        let path = dir.join(JOURNAL_FILE);

        let entries = Self::replay(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let journal = Self {
            path,
            file,
            records: entries.len() as u64,
        };
        Ok((journal, entries))
    }

    /// Reads every record in file order.
    ///
    /// A missing file is an empty journal.
    pub fn replay(path: &Path) -> BackendResult<Vec<JournalEntry>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            match JournalEntry::decode(&data[offset..], offset as u64) {
                Ok((entry, consumed)) => {
                    entries.push(entry);
                    offset += consumed;
                }
                Err(err) => {
                    let at = offset.to_string();
                    let path_str = path.display().to_string();
                    log_event(
                        Event::JournalCorruption,
                        &[("path", &path_str), ("offset", &at), ("error", &err.to_string())],
                    );
                    return Err(err);
                }
            }
        }

        let count = entries.len().to_string();
        let path_str = path.display().to_string();
        log_event(Event::JournalReplayed, &[("path", &path_str), ("records", &count)]);
        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written or replayed through this handle
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Appends a batch of records with a single write and sync.
    pub fn append(&mut self, entries: &[JournalEntry]) -> BackendResult<()> {
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend_from_slice(&entry.encode()?);
        }
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.records += entries.len() as u64;
        Ok(())
    }
}

fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> BackendResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| BackendError::Internal("journal field exceeds 4 GiB".to_string()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, String> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|e| format!("missing length prefix: {}", e))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| format!("field shorter than its length prefix: {}", e))?;
    Ok(buf)
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, String> {
    String::from_utf8(read_bytes(reader)?).map_err(|e| format!("invalid UTF-8: {}", e))
}
