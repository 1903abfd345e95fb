//! Store file records
//!
//! Every mutation the engine persists is one framed record appended to the
//! store file.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Length of the store file header
pub const MAGIC_LEN: usize = 8;

/// Magic bytes at the start of every store file
pub const MAGIC: &[u8; MAGIC_LEN] = b"KVFILE01";

/// Frame header size: payload length (4) + CRC32 of payload (4)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload accepted on replay (256 MB)
pub const MAX_RECORD_SIZE: u32 = 256 * 1024 * 1024;

/// A persisted mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    /// A named collection was created
    CreateCollection { name: String },

    /// An item was inserted or replaced
    SetItem {
        collection: String,
        key: Vec<u8>,
        val: Vec<u8>,
        priority: i32,
    },

    /// An item was removed
    Delete { collection: String, key: Vec<u8> },

    /// A named collection and all of its items were dropped
    DropCollection { name: String },
}

/// Outcome of reading one frame during replay
#[derive(Debug)]
pub enum Frame {
    /// A complete, checksummed record and its on-disk size
    Record(Record, u64),

    /// Clean end of file on a frame boundary
    End,

    /// A partial or corrupt frame; everything from here on is discarded
    Torn(String),
}

impl Record {
    /// Encode into `[len (4)][crc (4)][payload]`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        Ok(frame)
    }
}

/// Read the next frame from `reader`
///
/// Only genuine I/O failures are errors. Short reads, oversized lengths,
/// checksum mismatches and undecodable payloads are reported as
/// [`Frame::Torn`] so replay can truncate the tail.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let got = read_full(reader, &mut header)?;
    if got == 0 {
        return Ok(Frame::End);
    }
    if got < FRAME_HEADER_SIZE {
        return Ok(Frame::Torn(format!("partial frame header ({} bytes)", got)));
    }

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if len > MAX_RECORD_SIZE {
        return Ok(Frame::Torn(format!("frame length {} exceeds limit", len)));
    }

    let mut payload = vec![0u8; len as usize];
    let got = read_full(reader, &mut payload)?;
    if got < payload.len() {
        return Ok(Frame::Torn(format!(
            "partial payload ({} of {} bytes)",
            got, len
        )));
    }

    if crc32fast::hash(&payload) != crc {
        return Ok(Frame::Torn("checksum mismatch".to_string()));
    }

    match bincode::deserialize::<Record>(&payload) {
        Ok(record) => Ok(Frame::Record(record, (FRAME_HEADER_SIZE + payload.len()) as u64)),
        Err(e) => Ok(Frame::Torn(format!("undecodable payload: {}", e))),
    }
}

/// Like `read_exact`, but reports how many bytes were read before EOF
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
