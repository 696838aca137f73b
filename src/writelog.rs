use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::digest::bytes_digest;

/// Append-only journal used by the file cache to make interrupted work
/// recoverable. Each record is one line of the form
///
/// ```text
/// sha256:<hex> <json-payload>\n
/// ```
///
/// where the digest covers the payload bytes. Records are written through an
/// unbuffered `File`, so every appended record reaches OS buffers
/// immediately. There is no durability guarantee for individual writes; a
/// record that did not make it to disk completely is ignored on the next
/// open because its digest cannot match.
///
/// On open, the file is read up to the first invalid record and truncated
/// there. A torn record in the middle therefore discards everything after
/// it; the only cost is re-doing the work those records described.
pub struct WriteLog<T> {
    file: File,
    records: Vec<T>,
}

impl<T: Serialize + DeserializeOwned> WriteLog<T> {
    /// Open the log at `path`, creating an empty file if none exists, and
    /// replay the valid records already present.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open write log `{}`", path.display()))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut valid_until = 0u64;

        for line in data.split_inclusive(|&b| b == b'\n') {
            let Some(record) = decode_record(line) else {
                break;
            };

            valid_until += line.len() as u64;
            records.push(record);
        }

        // Trim off any garbage after the last valid record. If it were left
        // in place, it would hide every record appended after it.
        file.set_len(valid_until)?;
        file.seek(SeekFrom::Start(valid_until))?;

        Ok(WriteLog { file, records })
    }

    /// The records read at open time plus those appended since.
    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Append a record to the in-memory list and to the file.
    pub fn append(&mut self, record: T) -> Result<()> {
        let payload = serde_json::to_vec(&record)?;
        let digest = bytes_digest(&payload);

        let mut line = Vec::with_capacity(digest.as_str().len() + payload.len() + 2);
        line.extend_from_slice(digest.as_str().as_bytes());
        line.push(b' ');
        line.extend_from_slice(&payload);
        line.push(b'\n');

        self.file.write_all(&line)?;
        self.records.push(record);

        Ok(())
    }

    /// Drop all records and truncate the file to zero length. Called after
    /// the logged work has been persisted elsewhere.
    pub fn flush(&mut self) -> Result<()> {
        self.records.clear();
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;

        Ok(())
    }
}

/// Decode one line of the log. Returns `None` for anything that is not a
/// complete, digest-verified record; the caller stops reading at that point.
fn decode_record<T: DeserializeOwned>(line: &[u8]) -> Option<T> {
    // A line without the trailing newline is a torn tail.
    let body = line.strip_suffix(b"\n")?;

    // Up to here the line could contain anything, so the space separator
    // cannot be trusted to exist.
    let space = body.iter().position(|&b| b == b' ')?;
    let (digest, payload) = (&body[..space], &body[space + 1..]);

    if bytes_digest(payload).as_str().as_bytes() != digest {
        return None;
    }

    serde_json::from_slice(payload).ok()
}
