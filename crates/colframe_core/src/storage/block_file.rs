//! On-disk block format for column segments.
//!
//! A segment file holds the blocks of one or more columns for a contiguous
//! row range:
//!
//! ```text
//! +--------------------------------------------------+
//! | magic (8) | version (u64 LE)                     |
//! +--------------------------------------------------+
//! | block_info (42) | payload bytes | ... repeated   |
//! +--------------------------------------------------+
//! | footer: per-column block index (json)            |
//! | footer length (u64 LE)                           |
//! +--------------------------------------------------+
//! ```
//!
//! Each block is independently decodable: its payload is optionally LZ4
//! compressed and carries either a uniformly typed run of elements or a
//! per-element tagged encoding. Readers locate blocks through the footer
//! index; the inline `block_info` copy in front of every payload allows a
//! linear scanner to recover a segment with a damaged footer.

use std::io::SeekFrom;
use std::path::Path;

use colframe_error::{FrameError, Result, ResultExt};
use serde::{Deserialize, Serialize};

use super::stream::{ByteStream, FileStream};
use crate::values::{DataType, Value};

pub const SEGMENT_MAGIC: [u8; 8] = *b"CFSEG\0\0\0";
pub const SEGMENT_VERSION: u64 = 2;

/// Payload is LZ4 compressed.
pub const BLOCK_FLAG_LZ4: u64 = 1;
/// All elements in the block share `content_type`.
pub const BLOCK_FLAG_UNIFORM_TYPE: u64 = 2;
/// Elements carry individual type tags.
pub const BLOCK_FLAG_MULTIPLE_TYPE: u64 = 4;
/// Reserved for secondary encoding extensions (dictionary, frame-of-reference).
pub const BLOCK_FLAG_ENCODING_EXT: u64 = 8;

/// Sentinel for a `block_info` that has not been assigned a file position.
pub const OFFSET_UNSET: u64 = u64::MAX;

/// Size in bytes of the fixed `block_info` record preceding each payload.
pub const BLOCK_INFO_SIZE: usize = 42;

/// Per-block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Byte offset of the payload within the segment file. `OFFSET_UNSET`
    /// until the block is written.
    pub offset: u64,
    /// On-disk payload length in bytes.
    pub length: u64,
    /// Decompressed payload length. Equals `length` unless the LZ4 flag is
    /// set, in which case it is >= `length`.
    pub block_size: u64,
    /// Number of logical elements in the block.
    pub num_elem: u64,
    /// Bitfield of `BLOCK_FLAG_*`.
    pub flags: u64,
    /// Wire code of the element type when uniformly typed, 0 otherwise.
    pub content_type: u16,
}

impl BlockInfo {
    pub fn is_compressed(&self) -> bool {
        self.flags & BLOCK_FLAG_LZ4 != 0
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.num_elem.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.content_type.to_le_bytes());
    }
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Encode a run of values into a block payload.
///
/// Returns the uncompressed payload plus the flags/content_type describing
/// its encoding (compression is decided by the caller).
fn encode_values(values: &[Value]) -> (Vec<u8>, u64, u16) {
    let uniform = values
        .first()
        .map(|v| v.dtype())
        .filter(|dt| values.iter().all(|v| v.dtype() == *dt));

    let mut payload = Vec::new();
    match uniform {
        Some(dtype) => {
            for v in values {
                encode_element(v, &mut payload);
            }
            (payload, BLOCK_FLAG_UNIFORM_TYPE, dtype.content_type())
        }
        None => {
            for v in values {
                payload.push(v.dtype().content_type() as u8);
                encode_element(v, &mut payload);
            }
            (payload, BLOCK_FLAG_MULTIPLE_TYPE, 0)
        }
    }
}

fn encode_element(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => {}
        Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Float64(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::Utf8(s) => {
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }
}

fn decode_element(dtype: DataType, buf: &[u8], pos: &mut usize) -> Result<Value> {
    let remaining = buf.len() - *pos;
    let val = match dtype {
        DataType::Undefined => Value::Null,
        DataType::Int64 => {
            if remaining < 8 {
                return Err(FrameError::new("truncated int64 element"));
            }
            let v = i64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap());
            *pos += 8;
            Value::Int64(v)
        }
        DataType::Float64 => {
            if remaining < 8 {
                return Err(FrameError::new("truncated float64 element"));
            }
            let v = f64::from_bits(read_u64(buf, *pos));
            *pos += 8;
            Value::Float64(v)
        }
        DataType::Utf8 => {
            if remaining < 8 {
                return Err(FrameError::new("truncated string length"));
            }
            let len = read_u64(buf, *pos) as usize;
            *pos += 8;
            if buf.len() - *pos < len {
                return Err(FrameError::new("truncated string element"));
            }
            let s = std::str::from_utf8(&buf[*pos..*pos + len])
                .map_err(|_| FrameError::new("block contains invalid utf8"))?;
            *pos += len;
            Value::Utf8(s.to_string())
        }
    };
    Ok(val)
}

/// Decode a decompressed block payload into values.
pub fn decode_block(info: &BlockInfo, payload: &[u8]) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(info.num_elem as usize);
    let mut pos = 0;
    if info.flags & BLOCK_FLAG_UNIFORM_TYPE != 0 {
        let dtype = DataType::from_content_type(info.content_type)?;
        for _ in 0..info.num_elem {
            values.push(decode_element(dtype, payload, &mut pos)?);
        }
    } else if info.flags & BLOCK_FLAG_MULTIPLE_TYPE != 0 {
        for _ in 0..info.num_elem {
            if pos >= payload.len() {
                return Err(FrameError::new("truncated type tag"));
            }
            let dtype = DataType::from_content_type(payload[pos] as u16)?;
            pos += 1;
            values.push(decode_element(dtype, payload, &mut pos)?);
        }
    } else {
        return Err(FrameError::new(format!(
            "block has no recognized encoding (flags {:#x})",
            info.flags
        )));
    }
    Ok(values)
}

/// Footer index persisted at the end of every segment file.
#[derive(Debug, Serialize, Deserialize)]
struct SegmentFooter {
    blocks: Vec<Vec<BlockInfo>>,
}

/// Append-only writer for one segment file.
///
/// Blocks for each column are written in monotonically increasing block
/// number; `close` writes the footer and must be called exactly once.
/// Writing after close is an engine bug and panics.
#[derive(Debug)]
pub struct SegmentWriter {
    stream: Box<dyn ByteStream>,
    label: String,
    blocks: Vec<Vec<BlockInfo>>,
    pos: u64,
    closed: bool,
}

impl SegmentWriter {
    pub fn create(path: impl AsRef<Path>, num_columns: usize) -> Result<Self> {
        let path = path.as_ref();
        let stream = FileStream::create(path)?;
        SegmentWriter::from_stream(
            Box::new(stream),
            path.display().to_string(),
            num_columns,
        )
    }

    pub fn from_stream(
        mut stream: Box<dyn ByteStream>,
        label: String,
        num_columns: usize,
    ) -> Result<Self> {
        stream.write_all(&SEGMENT_MAGIC)?;
        stream.write_all(&SEGMENT_VERSION.to_le_bytes())?;
        Ok(SegmentWriter {
            stream,
            label,
            blocks: vec![Vec::new(); num_columns],
            pos: (SEGMENT_MAGIC.len() + 8) as u64,
            closed: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn num_columns(&self) -> usize {
        self.blocks.len()
    }

    /// Rows written so far for the given column.
    pub fn num_rows(&self, column: usize) -> u64 {
        self.blocks[column].iter().map(|b| b.num_elem).sum()
    }

    /// Append one block of values to a column.
    pub fn write_block(&mut self, column: usize, values: &[Value]) -> Result<()> {
        assert!(!self.closed, "write to closed segment writer");
        assert!(column < self.blocks.len(), "column {column} out of range");

        let (payload, mut flags, content_type) = encode_values(values);
        let block_size = payload.len() as u64;

        let compressed = lz4_flex::compress(&payload);
        let bytes = if compressed.len() < payload.len() {
            flags |= BLOCK_FLAG_LZ4;
            compressed
        } else {
            payload
        };

        let info = BlockInfo {
            offset: self.pos + BLOCK_INFO_SIZE as u64,
            length: bytes.len() as u64,
            block_size,
            num_elem: values.len() as u64,
            flags,
            content_type,
        };

        let mut header = Vec::with_capacity(BLOCK_INFO_SIZE);
        info.write_to(&mut header);
        self.stream.write_all(&header)?;
        self.stream.write_all(&bytes)?;
        self.pos += (BLOCK_INFO_SIZE + bytes.len()) as u64;
        self.blocks[column].push(info);
        Ok(())
    }

    /// Write the footer and flush. Consumes the writer; the segment cannot
    /// be written to again.
    pub fn close(mut self) -> Result<()> {
        assert!(!self.closed, "segment writer closed twice");
        self.closed = true;

        let footer = SegmentFooter {
            blocks: std::mem::take(&mut self.blocks),
        };
        let encoded =
            serde_json::to_vec(&footer).context("failed to encode segment footer")?;
        self.stream.write_all(&encoded)?;
        self.stream.write_all(&(encoded.len() as u64).to_le_bytes())?;
        self.stream.close()?;
        Ok(())
    }
}

/// Reader for one segment file.
#[derive(Debug)]
pub struct SegmentReader {
    stream: Box<dyn ByteStream>,
    blocks: Vec<Vec<BlockInfo>>,
}

impl SegmentReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let stream = FileStream::open(path)?;
        SegmentReader::from_stream(Box::new(stream))
    }

    pub fn from_stream(mut stream: Box<dyn ByteStream>) -> Result<Self> {
        let mut magic = [0u8; 8];
        stream.read_exact(&mut magic)?;
        if magic != SEGMENT_MAGIC {
            return Err(FrameError::new("not a segment file (bad magic)"));
        }
        let mut version = [0u8; 8];
        stream.read_exact(&mut version)?;
        let version = u64::from_le_bytes(version);
        if version != SEGMENT_VERSION {
            return Err(FrameError::new(format!(
                "unsupported segment version {version}, expected {SEGMENT_VERSION}"
            )));
        }

        stream.seek(SeekFrom::End(-8))?;
        let mut len = [0u8; 8];
        stream.read_exact(&mut len)?;
        let len = u64::from_le_bytes(len);

        stream.seek(SeekFrom::End(-8 - len as i64))?;
        let mut encoded = vec![0u8; len as usize];
        stream.read_exact(&mut encoded)?;
        let footer: SegmentFooter =
            serde_json::from_slice(&encoded).context("failed to decode segment footer")?;

        Ok(SegmentReader {
            stream,
            blocks: footer.blocks,
        })
    }

    pub fn num_columns(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_blocks(&self, column: usize) -> usize {
        self.blocks.get(column).map(|b| b.len()).unwrap_or(0)
    }

    pub fn block_info(&self, column: usize, block: usize) -> Result<&BlockInfo> {
        self.blocks
            .get(column)
            .and_then(|col| col.get(block))
            .ok_or_else(|| {
                FrameError::new(format!("block ({column}, {block}) out of range"))
            })
    }

    /// Rows stored for the given column.
    pub fn num_rows(&self, column: usize) -> u64 {
        self.blocks
            .get(column)
            .map(|col| col.iter().map(|b| b.num_elem).sum())
            .unwrap_or(0)
    }

    /// Read and decode one block. Decompression is transparent; callers
    /// never observe compressed bytes.
    pub fn read_block(&mut self, column: usize, block: usize) -> Result<Vec<Value>> {
        let info = self.block_info(column, block)?.clone();
        debug_assert_ne!(info.offset, OFFSET_UNSET);

        self.stream.seek(SeekFrom::Start(info.offset))?;
        let mut bytes = vec![0u8; info.length as usize];
        self.stream.read_exact(&mut bytes)?;

        let payload = if info.is_compressed() {
            lz4_flex::decompress(&bytes, info.block_size as usize)
                .map_err(|e| FrameError::with_source("LZ4 decompression failed", e))?
        } else {
            bytes
        };

        decode_block(&info, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::stream::MemoryStream;

    fn write_segment(columns: &[Vec<Value>]) -> crate::storage::stream::SharedBuffer {
        let stream = MemoryStream::new();
        let buffer = stream.buffer();
        let mut writer =
            SegmentWriter::from_stream(Box::new(stream), "mem".to_string(), columns.len())
                .unwrap();
        for (i, col) in columns.iter().enumerate() {
            writer.write_block(i, col).unwrap();
        }
        writer.close().unwrap();
        buffer
    }

    #[test]
    fn round_trip_uniform_types() {
        let ints: Vec<Value> = (0..100).map(Value::Int64).collect();
        let strs: Vec<Value> = (0..100).map(|i| Value::Utf8(format!("row-{i}"))).collect();
        let buffer = write_segment(&[ints.clone(), strs.clone()]);

        let mut reader =
            SegmentReader::from_stream(Box::new(MemoryStream::with_buffer(buffer))).unwrap();
        assert_eq!(reader.num_columns(), 2);
        assert_eq!(reader.read_block(0, 0).unwrap(), ints);
        assert_eq!(reader.read_block(1, 0).unwrap(), strs);
    }

    #[test]
    fn round_trip_mixed_types_with_nulls() {
        let vals = vec![
            Value::Int64(1),
            Value::Null,
            Value::Utf8("x".to_string()),
            Value::Float64(2.5),
        ];
        let buffer = write_segment(&[vals.clone()]);
        let mut reader =
            SegmentReader::from_stream(Box::new(MemoryStream::with_buffer(buffer))).unwrap();
        let info = reader.block_info(0, 0).unwrap();
        assert_ne!(info.flags & BLOCK_FLAG_MULTIPLE_TYPE, 0);
        assert_eq!(reader.read_block(0, 0).unwrap(), vals);
    }

    #[test]
    fn compression_kicks_in_for_repetitive_data() {
        let vals: Vec<Value> = (0..4096).map(|_| Value::Int64(7)).collect();
        let buffer = write_segment(&[vals.clone()]);
        let mut reader =
            SegmentReader::from_stream(Box::new(MemoryStream::with_buffer(buffer))).unwrap();
        let info = reader.block_info(0, 0).unwrap().clone();
        assert!(info.is_compressed());
        assert!(info.block_size > info.length);
        assert_eq!(info.num_elem, 4096);
        assert_eq!(reader.read_block(0, 0).unwrap(), vals);
    }

    #[test]
    fn zero_block_segment() {
        let buffer = write_segment(&[]);
        let reader =
            SegmentReader::from_stream(Box::new(MemoryStream::with_buffer(buffer))).unwrap();
        assert_eq!(reader.num_columns(), 0);
    }

    #[test]
    fn zero_row_column() {
        let buffer = write_segment(&[Vec::new()]);
        let mut reader =
            SegmentReader::from_stream(Box::new(MemoryStream::with_buffer(buffer))).unwrap();
        assert_eq!(reader.num_blocks(0), 1);
        assert_eq!(reader.read_block(0, 0).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut stream = MemoryStream::new();
        stream.write_all(b"NOTASEGMENTFILE!").unwrap();
        let buffer = stream.buffer();
        let err =
            SegmentReader::from_stream(Box::new(MemoryStream::with_buffer(buffer))).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut stream = MemoryStream::new();
        stream.write_all(&SEGMENT_MAGIC).unwrap();
        stream.write_all(&99u64.to_le_bytes()).unwrap();
        let buffer = stream.buffer();
        let err =
            SegmentReader::from_stream(Box::new(MemoryStream::with_buffer(buffer))).unwrap_err();
        assert!(err.to_string().contains("unsupported segment version"));
    }
}
