//! Framed commit log.
//!
//! Every committed write transaction appends one frame:
//!
//! ```text
//! [frame_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body: `[txnid: u64][op_count: u32][op ...]`. `frame_len` covers the CRC
//! plus the body but not itself. The CRC is computed over the body. On
//! replay a truncated tail frame (crash mid-append) is a clean end of log;
//! a CRC mismatch inside the log proper is corruption.

use crate::{Result, StorageError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

/// One logged mutation. Slots are dbi handle numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    CreateDbi { slot: u32, name: String, flags: u32 },
    DropDbi { slot: u32 },
    Clear { slot: u32 },
    Put { slot: u32, key: Vec<u8>, data: Vec<u8> },
    Del { slot: u32, key: Vec<u8>, data: Option<Vec<u8>> },
    SeqSet { slot: u32, value: u64 },
}

const OP_CREATE: u8 = 0;
const OP_DROP: u8 = 1;
const OP_CLEAR: u8 = 2;
const OP_PUT: u8 = 3;
const OP_DEL: u8 = 4;
const OP_SEQ: u8 = 5;

const MAX_FRAME: u32 = 256 * 1024 * 1024;

/// Append-only log writer with a reusable frame buffer.
pub struct WalWriter {
    file: File,
    sync: bool,
    buf: Vec<u8>,
}

impl WalWriter {
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<WalWriter> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(WalWriter {
            file,
            sync,
            buf: Vec::with_capacity(1024),
        })
    }

    /// Serializes and appends one commit frame.
    pub fn append(&mut self, txnid: u64, ops: &[WalOp]) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; 8]); // frame_len + crc, patched below
        self.buf.write_u64::<LittleEndian>(txnid)?;
        self.buf.write_u32::<LittleEndian>(ops.len() as u32)?;
        for op in ops {
            encode_op(&mut self.buf, op)?;
        }

        let body = &self.buf[8..];
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();
        let frame_len = body.len() as u64 + 4;
        if frame_len > MAX_FRAME as u64 {
            return Err(StorageError::Io("commit frame too large".into()));
        }
        let len_bytes = (frame_len as u32).to_le_bytes();
        self.buf[0..4].copy_from_slice(&len_bytes);
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    pub fn sync_to_disk(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn encode_op(buf: &mut Vec<u8>, op: &WalOp) -> io::Result<()> {
    match op {
        WalOp::CreateDbi { slot, name, flags } => {
            buf.write_u8(OP_CREATE)?;
            buf.write_u32::<LittleEndian>(*slot)?;
            buf.write_u32::<LittleEndian>(*flags)?;
            buf.write_u16::<LittleEndian>(name.len() as u16)?;
            buf.extend_from_slice(name.as_bytes());
        }
        WalOp::DropDbi { slot } => {
            buf.write_u8(OP_DROP)?;
            buf.write_u32::<LittleEndian>(*slot)?;
        }
        WalOp::Clear { slot } => {
            buf.write_u8(OP_CLEAR)?;
            buf.write_u32::<LittleEndian>(*slot)?;
        }
        WalOp::Put { slot, key, data } => {
            buf.write_u8(OP_PUT)?;
            buf.write_u32::<LittleEndian>(*slot)?;
            buf.write_u32::<LittleEndian>(key.len() as u32)?;
            buf.extend_from_slice(key);
            buf.write_u32::<LittleEndian>(data.len() as u32)?;
            buf.extend_from_slice(data);
        }
        WalOp::Del { slot, key, data } => {
            buf.write_u8(OP_DEL)?;
            buf.write_u32::<LittleEndian>(*slot)?;
            buf.write_u32::<LittleEndian>(key.len() as u32)?;
            buf.extend_from_slice(key);
            match data {
                Some(data) => {
                    buf.write_u8(1)?;
                    buf.write_u32::<LittleEndian>(data.len() as u32)?;
                    buf.extend_from_slice(data);
                }
                None => buf.write_u8(0)?,
            }
        }
        WalOp::SeqSet { slot, value } => {
            buf.write_u8(OP_SEQ)?;
            buf.write_u32::<LittleEndian>(*slot)?;
            buf.write_u64::<LittleEndian>(*value)?;
        }
    }
    Ok(())
}

/// Sequential log reader.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>> {
        Ok(WalReader {
            rdr: BufReader::new(File::open(path)?),
        })
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> WalReader<R> {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every complete frame. A truncated tail is a clean EOF; all
    /// frames before it are still applied.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<()>
    where
        F: FnMut(u64, Vec<WalOp>) -> Result<()>,
    {
        let mut body = Vec::with_capacity(1024);
        loop {
            let frame_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if frame_len <= 4 || frame_len > MAX_FRAME {
                return Err(StorageError::Corrupt);
            }
            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            body.clear();
            body.resize(frame_len as usize - 4, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(StorageError::Corrupt);
            }

            let mut rdr = &body[..];
            let txnid = rdr.read_u64::<LittleEndian>()?;
            let count = rdr.read_u32::<LittleEndian>()?;
            let mut ops = Vec::with_capacity(count as usize);
            for _ in 0..count {
                ops.push(decode_op(&mut rdr)?);
            }
            apply(txnid, ops)?;
        }
    }
}

fn decode_op(rdr: &mut &[u8]) -> Result<WalOp> {
    let read_bytes = |rdr: &mut &[u8], len: usize| -> Result<Vec<u8>> {
        if rdr.len() < len {
            return Err(StorageError::Corrupt);
        }
        let (head, tail) = rdr.split_at(len);
        let out = head.to_vec();
        *rdr = tail;
        Ok(out)
    };

    let tag = rdr.read_u8().map_err(|_| StorageError::Corrupt)?;
    Ok(match tag {
        OP_CREATE => {
            let slot = rdr.read_u32::<LittleEndian>()?;
            let flags = rdr.read_u32::<LittleEndian>()?;
            let name_len = rdr.read_u16::<LittleEndian>()? as usize;
            let name = String::from_utf8(read_bytes(rdr, name_len)?)
                .map_err(|_| StorageError::Corrupt)?;
            WalOp::CreateDbi { slot, name, flags }
        }
        OP_DROP => WalOp::DropDbi {
            slot: rdr.read_u32::<LittleEndian>()?,
        },
        OP_CLEAR => WalOp::Clear {
            slot: rdr.read_u32::<LittleEndian>()?,
        },
        OP_PUT => {
            let slot = rdr.read_u32::<LittleEndian>()?;
            let key_len = rdr.read_u32::<LittleEndian>()? as usize;
            let key = read_bytes(rdr, key_len)?;
            let data_len = rdr.read_u32::<LittleEndian>()? as usize;
            let data = read_bytes(rdr, data_len)?;
            WalOp::Put { slot, key, data }
        }
        OP_DEL => {
            let slot = rdr.read_u32::<LittleEndian>()?;
            let key_len = rdr.read_u32::<LittleEndian>()? as usize;
            let key = read_bytes(rdr, key_len)?;
            let data = match rdr.read_u8()? {
                0 => None,
                1 => {
                    let data_len = rdr.read_u32::<LittleEndian>()? as usize;
                    Some(read_bytes(rdr, data_len)?)
                }
                _ => return Err(StorageError::Corrupt),
            };
            WalOp::Del { slot, key, data }
        }
        OP_SEQ => WalOp::SeqSet {
            slot: rdr.read_u32::<LittleEndian>()?,
            value: rdr.read_u64::<LittleEndian>()?,
        },
        _ => return Err(StorageError::Corrupt),
    })
}
