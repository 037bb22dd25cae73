//! WAL Segment Management
//!
//! A segment is one log file: a fixed header followed by framed,
//! checksummed operations.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::kv::Operation;

/// Magic bytes at the start of each segment file
const SEGMENT_MAGIC: &[u8; 8] = b"WOLFKVWL";

/// Segment file version
const SEGMENT_VERSION: u32 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Frame overhead: length (4) + compression flag (1) + checksum (4)
const FRAME_OVERHEAD: usize = 9;

/// Segment file header
#[derive(Debug, Clone)]
pub struct SegmentHeader {
    /// Log index of the first entry stored in this segment
    pub first_index: u64,
}

impl SegmentHeader {
    pub fn new(first_index: u64) -> Self {
        Self { first_index }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(SEGMENT_MAGIC);
        bytes[8..12].copy_from_slice(&SEGMENT_VERSION.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.first_index.to_le_bytes());
        bytes
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &bytes[0..8] != SEGMENT_MAGIC {
            return Err(Error::Wal("Invalid segment magic bytes".into()));
        }

        let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if version != SEGMENT_VERSION {
            return Err(Error::Wal(format!(
                "Unsupported segment version: {}",
                version
            )));
        }

        let mut first_index = [0u8; 8];
        first_index.copy_from_slice(&bytes[12..20]);
        Ok(Self {
            first_index: u64::from_le_bytes(first_index),
        })
    }
}

/// Encode an operation into an on-disk frame.
///
/// Frame format: `[length: u32][compressed: u8][data][checksum: u32]`
pub fn encode_frame(op: &Operation, compression: bool) -> Result<Vec<u8>> {
    let serialized = bincode::serialize(op)?;
    let data = if compression {
        lz4_flex::compress_prepend_size(&serialized)
    } else {
        serialized
    };

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + data.len());
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.push(compression as u8);
    frame.extend_from_slice(&data);
    frame.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    Ok(frame)
}

/// A single WAL segment file
pub struct Segment {
    /// Segment ID (the index of its first entry)
    pub id: u64,
    /// File path
    pub path: PathBuf,
    file: File,
    /// End of the last complete frame
    write_pos: u64,
    /// Maximum segment size in bytes
    max_size: u64,
    entry_count: u64,
}

impl Segment {
    /// Create a new, empty segment file
    pub fn create(path: PathBuf, first_index: u64, max_size_mb: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&SegmentHeader::new(first_index).to_bytes())?;
        file.sync_all()?;

        Ok(Self {
            id: first_index,
            path,
            file,
            write_pos: HEADER_SIZE as u64,
            max_size: max_size_mb * 1024 * 1024,
            entry_count: 0,
        })
    }

    /// Open an existing segment and load its operations.
    ///
    /// A frame cut short by a crash at the end of the file is dropped and
    /// the file truncated back to the last complete frame. A complete frame
    /// with a bad checksum is corruption.
    pub fn open(path: PathBuf, max_size_mb: u64) -> Result<(Self, Vec<Operation>)> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = SegmentHeader::from_bytes(&header_bytes)?;

        let mut segment = Self {
            id: header.first_index,
            path,
            file,
            write_pos: HEADER_SIZE as u64,
            max_size: max_size_mb * 1024 * 1024,
            entry_count: 0,
        };

        let ops = segment.load()?;
        Ok((segment, ops))
    }

    fn load(&mut self) -> Result<Vec<Operation>> {
        let file_len = self.file.metadata()?.len();
        let mut ops = Vec::new();
        let mut pos = HEADER_SIZE as u64;

        self.file.seek(SeekFrom::Start(pos))?;
        loop {
            if pos == file_len {
                break;
            }
            match self.read_frame(pos, file_len)? {
                Some((op, next)) => {
                    ops.push(op);
                    pos = next;
                }
                None => {
                    tracing::warn!(
                        "WAL segment {:?}: dropping torn frame at offset {} ({} trailing bytes)",
                        self.path,
                        pos,
                        file_len - pos
                    );
                    self.file.set_len(pos)?;
                    self.file.sync_all()?;
                    break;
                }
            }
        }

        self.write_pos = pos;
        self.entry_count = ops.len() as u64;
        Ok(ops)
    }

    /// Read the frame at `pos`; `None` if the file ends inside it
    fn read_frame(&mut self, pos: u64, file_len: u64) -> Result<Option<(Operation, u64)>> {
        if file_len - pos < FRAME_OVERHEAD as u64 {
            return Ok(None);
        }

        let mut prefix = [0u8; 5];
        self.file.read_exact(&mut prefix)?;
        let data_len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as u64;
        let compressed = prefix[4] != 0;

        let frame_len = FRAME_OVERHEAD as u64 + data_len;
        if file_len - pos < frame_len {
            return Ok(None);
        }

        let mut data = vec![0u8; data_len as usize];
        self.file.read_exact(&mut data)?;
        let mut checksum = [0u8; 4];
        self.file.read_exact(&mut checksum)?;

        if u32::from_le_bytes(checksum) != crc32fast::hash(&data) {
            return Err(self.corrupted(pos, "checksum mismatch"));
        }

        let serialized = if compressed {
            lz4_flex::decompress_size_prepended(&data)
                .map_err(|e| self.corrupted(pos, &format!("decompression failed: {}", e)))?
        } else {
            data
        };

        let op: Operation = bincode::deserialize(&serialized)
            .map_err(|e| self.corrupted(pos, &format!("undecodable operation: {}", e)))?;
        Ok(Some((op, pos + frame_len)))
    }

    fn corrupted(&self, offset: u64, reason: &str) -> Error {
        Error::WalCorrupted {
            segment: self.id,
            offset,
            reason: reason.to_string(),
        }
    }

    /// Write an encoded frame at the end of the segment
    ///
    /// A failed write is cut back off the file so a later, shorter frame
    /// cannot leave its leftovers looking like a frame.
    pub fn append_frame(&mut self, frame: &[u8]) -> Result<u64> {
        let pos = self.write_pos;
        if let Err(e) = self.write_at(pos, frame) {
            self.truncate_to(pos);
            return Err(e.into());
        }
        self.write_pos += frame.len() as u64;
        self.entry_count += 1;
        Ok(pos)
    }

    fn write_at(&mut self, pos: u64, frame: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(frame)
    }

    /// Drop everything past `pos`
    fn truncate_to(&mut self, pos: u64) {
        if let Err(e) = self.file.set_len(pos) {
            tracing::error!(
                "WAL segment {:?}: cannot cut partial frame at offset {}: {}",
                self.path,
                pos,
                e
            );
        }
    }

    /// Re-read every operation in the segment
    pub fn read_all(&mut self) -> Result<Vec<Operation>> {
        let end = self.write_pos;
        let mut ops = Vec::with_capacity(self.entry_count as usize);
        let mut pos = HEADER_SIZE as u64;

        self.file.seek(SeekFrom::Start(pos))?;
        while pos < end {
            match self.read_frame(pos, end)? {
                Some((op, next)) => {
                    ops.push(op);
                    pos = next;
                }
                None => return Err(self.corrupted(pos, "frame extends past end of segment")),
            }
        }
        Ok(ops)
    }

    /// Sync segment to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Whether a frame of `len` bytes still fits.
    ///
    /// An empty segment accepts any frame so oversized entries still land.
    pub fn has_space(&self, len: usize) -> bool {
        self.entry_count == 0 || self.write_pos + len as u64 <= self.max_size
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Index the next appended entry will get
    pub fn next_index(&self) -> u64 {
        self.id + self.entry_count
    }
}

/// List all segment files in a directory, ordered by first index
pub fn list_segments(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut segments = Vec::new();

    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "log")
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .map_or(false, |s| s.starts_with("wal_"))
        {
            segments.push(path);
        }
    }

    // zero-padded names sort numerically
    segments.sort();
    Ok(segments)
}
