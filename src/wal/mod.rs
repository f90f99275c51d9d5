use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::types::{Label, Timestamp, VertexId};

const WAL_MAGIC: [u8; 4] = *b"ESTW";
const WAL_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 24;
const FRAME_HEADER_LEN: usize = 24;

const OP_NEW_VERTEX: u8 = 1;
const OP_PUT_VERTEX: u8 = 2;
const OP_DEL_VERTEX: u8 = 3;
const OP_PUT_EDGE: u8 = 4;
const OP_DEL_EDGE: u8 = 5;

fn crc32(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

fn encode_file_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..4].copy_from_slice(&WAL_MAGIC);
    buf[4..6].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
    let mut crc_buf = buf;
    crc_buf[16..20].fill(0);
    let crc = crc32(&[&crc_buf]);
    buf[16..20].copy_from_slice(&crc.to_be_bytes());
    buf
}

fn decode_file_header(src: &[u8]) -> Result<()> {
    if src.len() < FILE_HEADER_LEN {
        return Err(GraphError::Corruption("wal header truncated"));
    }
    if src[0..4] != WAL_MAGIC {
        return Err(GraphError::Corruption("wal magic mismatch"));
    }
    let version = u16::from_be_bytes([src[4], src[5]]);
    if version != WAL_FORMAT_VERSION {
        return Err(GraphError::Corruption("wal format version mismatch"));
    }
    let stored_crc = u32::from_be_bytes([src[16], src[17], src[18], src[19]]);
    let mut crc_buf = [0u8; FILE_HEADER_LEN];
    crc_buf.copy_from_slice(&src[..FILE_HEADER_LEN]);
    crc_buf[16..20].fill(0);
    if crc32(&[&crc_buf]) != stored_crc {
        return Err(GraphError::Corruption("wal header crc mismatch"));
    }
    Ok(())
}

struct FrameHeader {
    epoch: Timestamp,
    op_count: u32,
    payload_len: u32,
    payload_crc: u32,
}

impl FrameHeader {
    fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..8].copy_from_slice(&self.epoch.to_be_bytes());
        buf[8..12].copy_from_slice(&self.op_count.to_be_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[16..20].copy_from_slice(&self.payload_crc.to_be_bytes());
        let crc = crc32(&[&buf[..20]]);
        buf[20..24].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < FRAME_HEADER_LEN {
            return Err(GraphError::Corruption("wal frame header truncated"));
        }
        let stored_crc = u32::from_be_bytes([src[20], src[21], src[22], src[23]]);
        if crc32(&[&src[..20]]) != stored_crc {
            return Err(GraphError::Corruption("wal frame header crc mismatch"));
        }
        Ok(Self {
            epoch: i64::from_be_bytes(src[0..8].try_into().expect("slice is 8 bytes")),
            op_count: u32::from_be_bytes(src[8..12].try_into().expect("slice is 4 bytes")),
            payload_len: u32::from_be_bytes(src[12..16].try_into().expect("slice is 4 bytes")),
            payload_crc: u32::from_be_bytes(src[16..20].try_into().expect("slice is 4 bytes")),
        })
    }
}

/// One committed transaction recovered from the log.
#[derive(Debug)]
pub struct WalFrame {
    pub epoch: Timestamp,
    pub op_count: u32,
    pub payload: Vec<u8>,
}

struct WalState {
    file: File,
    append_offset: u64,
}

/// Append-only log of committed transactions.
///
/// Each frame carries the commit epoch, an op-count prefix, and a
/// CRC-checked payload of operation records. Recovery replays the valid
/// prefix and truncates a torn tail.
pub struct Wal {
    state: Mutex<WalState>,
    sync_on_commit: bool,
}

impl Wal {
    /// Opens or creates the log and returns it together with the frames
    /// already on disk, in epoch order.
    pub fn open(path: &Path, sync_on_commit: bool) -> Result<(Self, Vec<WalFrame>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let mut frames = Vec::new();
        let append_offset;
        if len < FILE_HEADER_LEN as u64 {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&encode_file_header())?;
            file.set_len(FILE_HEADER_LEN as u64)?;
            append_offset = FILE_HEADER_LEN as u64;
        } else {
            let mut bytes = Vec::with_capacity(len as usize);
            file.seek(SeekFrom::Start(0))?;
            file.read_to_end(&mut bytes)?;
            decode_file_header(&bytes)?;

            let mut offset = FILE_HEADER_LEN;
            loop {
                let Some(frame_bytes) = bytes.get(offset..) else {
                    break;
                };
                if frame_bytes.len() < FRAME_HEADER_LEN {
                    break;
                }
                let header = match FrameHeader::decode(frame_bytes) {
                    Ok(header) => header,
                    Err(_) => break,
                };
                let payload_start = offset + FRAME_HEADER_LEN;
                let payload_end = payload_start + header.payload_len as usize;
                let Some(payload) = bytes.get(payload_start..payload_end) else {
                    break;
                };
                if crc32(&[payload]) != header.payload_crc {
                    break;
                }
                frames.push(WalFrame {
                    epoch: header.epoch,
                    op_count: header.op_count,
                    payload: payload.to_vec(),
                });
                offset = payload_end;
            }
            if (offset as u64) < len {
                warn!(
                    valid = offset,
                    total = len,
                    "truncating torn wal tail"
                );
                file.set_len(offset as u64)?;
            }
            append_offset = offset as u64;
        }

        debug!(frames = frames.len(), "wal opened");
        Ok((
            Self {
                state: Mutex::new(WalState {
                    file,
                    append_offset,
                }),
                sync_on_commit,
            },
            frames,
        ))
    }

    /// Appends one committed transaction. Any failure is surfaced as a
    /// `Wal` fault and nothing is considered durable.
    pub fn append_commit(&self, epoch: Timestamp, op_count: u32, payload: &[u8]) -> Result<()> {
        let header = FrameHeader {
            epoch,
            op_count,
            payload_len: payload.len() as u32,
            payload_crc: crc32(&[payload]),
        };
        let mut state = self.state.lock();
        let offset = state.append_offset;
        let write = (|| -> std::io::Result<()> {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.write_all(&header.encode())?;
            state.file.write_all(payload)?;
            if self.sync_on_commit {
                state.file.sync_all()?;
            }
            Ok(())
        })();
        match write {
            Ok(()) => {
                state.append_offset = offset + (FRAME_HEADER_LEN + payload.len()) as u64;
                Ok(())
            }
            Err(err) => {
                // Leave the tail for open-time truncation.
                let _ = state.file.set_len(offset);
                Err(GraphError::Wal(err.to_string()))
            }
        }
    }
}

/// Decoded operation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    NewVertex {
        vertex: VertexId,
    },
    PutVertex {
        vertex: VertexId,
        data: Vec<u8>,
    },
    DelVertex {
        vertex: VertexId,
        recycle: bool,
    },
    PutEdge {
        src: VertexId,
        label: Label,
        dst: VertexId,
        force_insert: bool,
        version: Timestamp,
        data: Vec<u8>,
    },
    DelEdge {
        src: VertexId,
        label: Label,
        dst: VertexId,
    },
}

/// Per-transaction WAL accumulator: operation records plus the op-count
/// prefix, committed as a single frame payload at registration.
#[derive(Default)]
pub struct TxnWal {
    op_count: u32,
    buf: Vec<u8>,
}

impl TxnWal {
    pub fn op_count(&self) -> u32 {
        self.op_count
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.op_count == 0
    }

    pub fn clear(&mut self) {
        self.op_count = 0;
        self.buf.clear();
    }

    pub fn new_vertex(&mut self, vertex: VertexId) {
        self.op_count += 1;
        self.buf.push(OP_NEW_VERTEX);
        self.buf.extend_from_slice(&vertex.to_be_bytes());
    }

    pub fn put_vertex(&mut self, vertex: VertexId, data: &[u8]) {
        self.op_count += 1;
        self.buf.push(OP_PUT_VERTEX);
        self.buf.extend_from_slice(&vertex.to_be_bytes());
        self.buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    pub fn del_vertex(&mut self, vertex: VertexId, recycle: bool) {
        self.op_count += 1;
        self.buf.push(OP_DEL_VERTEX);
        self.buf.extend_from_slice(&vertex.to_be_bytes());
        self.buf.push(recycle as u8);
    }

    pub fn put_edge(
        &mut self,
        src: VertexId,
        label: Label,
        dst: VertexId,
        force_insert: bool,
        version: Timestamp,
        data: &[u8],
    ) {
        self.op_count += 1;
        self.buf.push(OP_PUT_EDGE);
        self.buf.extend_from_slice(&src.to_be_bytes());
        self.buf.extend_from_slice(&label.to_be_bytes());
        self.buf.extend_from_slice(&dst.to_be_bytes());
        self.buf.push(force_insert as u8);
        self.buf.extend_from_slice(&version.to_be_bytes());
        self.buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(data);
    }

    pub fn del_edge(&mut self, src: VertexId, label: Label, dst: VertexId) {
        self.op_count += 1;
        self.buf.push(OP_DEL_EDGE);
        self.buf.extend_from_slice(&src.to_be_bytes());
        self.buf.extend_from_slice(&label.to_be_bytes());
        self.buf.extend_from_slice(&dst.to_be_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(GraphError::Corruption("wal record truncated"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(
            self.take(4)?.try_into().expect("slice is 4 bytes"),
        ))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(
            self.take(8)?.try_into().expect("slice is 8 bytes"),
        ))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(
            self.take(2)?.try_into().expect("slice is 2 bytes"),
        ))
    }
}

/// Decodes a frame payload back into its operation records.
pub fn decode_ops(payload: &[u8], op_count: u32) -> Result<Vec<WalOp>> {
    let mut reader = Reader {
        bytes: payload,
        offset: 0,
    };
    let mut ops = Vec::with_capacity(op_count as usize);
    for _ in 0..op_count {
        let op = match reader.u8()? {
            OP_NEW_VERTEX => WalOp::NewVertex {
                vertex: reader.u64()?,
            },
            OP_PUT_VERTEX => {
                let vertex = reader.u64()?;
                let len = reader.u32()? as usize;
                WalOp::PutVertex {
                    vertex,
                    data: reader.take(len)?.to_vec(),
                }
            }
            OP_DEL_VERTEX => WalOp::DelVertex {
                vertex: reader.u64()?,
                recycle: reader.u8()? != 0,
            },
            OP_PUT_EDGE => {
                let src = reader.u64()?;
                let label = reader.u16()?;
                let dst = reader.u64()?;
                let force_insert = reader.u8()? != 0;
                let version = reader.i64()?;
                let len = reader.u32()? as usize;
                WalOp::PutEdge {
                    src,
                    label,
                    dst,
                    force_insert,
                    version,
                    data: reader.take(len)?.to_vec(),
                }
            }
            OP_DEL_EDGE => WalOp::DelEdge {
                src: reader.u64()?,
                label: reader.u16()?,
                dst: reader.u64()?,
            },
            _ => return Err(GraphError::Corruption("unknown wal op code")),
        };
        ops.push(op);
    }
    if reader.offset != payload.len() {
        return Err(GraphError::Corruption("trailing bytes in wal payload"));
    }
    Ok(ops)
}
