//! File-backed element mapper

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ElementMapper, Result, TreeError};

/// Magic number for mapper files (ASCII "HMAP")
const MAPPER_MAGIC: u32 = 0x484D_4150;

/// Current mapper format version
const MAPPER_VERSION: u32 = 1;

/// File header size: magic + version
const FILE_HEADER: u64 = 8;

/// Record header size: key + payload length
const RECORD_HEADER: u64 = 12;

/// Payload length marking a cleared key
const TOMBSTONE: u32 = u32::MAX;

/// Append-only log of bincode-encoded payloads.
///
/// Layout: `[magic u32][version u32]` followed by records of
/// `[key u64][len u32][payload]`. A record with `len == u32::MAX` is a
/// tombstone written by `clear`. The key -> offset table is rebuilt by a
/// single scan on open, so keys stay stable across process restarts.
pub struct FileMapper<E> {
    file: File,
    path: PathBuf,
    offsets: HashMap<u64, u64>,
    next_key: u64,
    end: u64,
    closed: bool,
    _marker: PhantomData<E>,
}

impl<E: Serialize + DeserializeOwned> FileMapper<E> {
    /// Create a new mapper file, truncating any existing one.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&MAPPER_MAGIC.to_le_bytes())?;
        file.write_all(&MAPPER_VERSION.to_le_bytes())?;

        Ok(Self {
            file,
            path,
            offsets: HashMap::new(),
            next_key: 0,
            end: FILE_HEADER,
            closed: false,
            _marker: PhantomData,
        })
    }

    /// Open an existing mapper file, rebuilding the offset table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; FILE_HEADER as usize];
        file.read_exact(&mut header).map_err(|e| {
            TreeError::Corruption(format!("mapper file too short for header: {}", e))
        })?;
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if magic != MAPPER_MAGIC {
            return Err(TreeError::Corruption(format!(
                "invalid mapper magic: expected 0x{:08X}, got 0x{:08X}",
                MAPPER_MAGIC, magic
            )));
        }
        if version != MAPPER_VERSION {
            return Err(TreeError::Corruption(format!(
                "unsupported mapper version: {}",
                version
            )));
        }

        let file_len = file.metadata()?.len();
        let mut offsets = HashMap::new();
        let mut next_key = 0u64;
        let mut pos = FILE_HEADER;
        while pos < file_len {
            if file_len - pos < RECORD_HEADER {
                return Err(TreeError::Corruption(format!(
                    "truncated mapper record header at offset {}",
                    pos
                )));
            }
            let mut rec = [0u8; RECORD_HEADER as usize];
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut rec)?;
            let key = u64::from_le_bytes([
                rec[0], rec[1], rec[2], rec[3], rec[4], rec[5], rec[6], rec[7],
            ]);
            let len = u32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]);

            if len == TOMBSTONE {
                offsets.remove(&key);
                pos += RECORD_HEADER;
            } else {
                if file_len - pos - RECORD_HEADER < len as u64 {
                    return Err(TreeError::Corruption(format!(
                        "truncated mapper payload at offset {}",
                        pos
                    )));
                }
                offsets.insert(key, pos);
                pos += RECORD_HEADER + len as u64;
            }
            next_key = next_key.max(key + 1);
        }

        Ok(Self {
            file,
            path,
            offsets,
            next_key,
            end: file_len,
            closed: false,
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TreeError::Closed);
        }
        Ok(())
    }
}

impl<E: Serialize + DeserializeOwned> ElementMapper for FileMapper<E> {
    type Element = E;

    fn element(&mut self, key: u64) -> Result<E> {
        self.ensure_open()?;
        let offset = *self.offsets.get(&key).ok_or(TreeError::NotFound(key))?;

        let mut rec = [0u8; RECORD_HEADER as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut rec).map_err(|e| TreeError::IoAt {
            op: "mapper read",
            offset,
            source: e,
        })?;
        let stored_key = u64::from_le_bytes([
            rec[0], rec[1], rec[2], rec[3], rec[4], rec[5], rec[6], rec[7],
        ]);
        let len = u32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]);
        if stored_key != key || len == TOMBSTONE {
            return Err(TreeError::Corruption(format!(
                "mapper record at offset {} does not match key {}",
                offset, key
            )));
        }

        let mut payload = vec![0u8; len as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(|e| TreeError::IoAt {
                op: "mapper read",
                offset,
                source: e,
            })?;
        Ok(bincode::deserialize(&payload)?)
    }

    fn assign_key(&mut self, element: &E) -> Result<u64> {
        self.ensure_open()?;
        let payload = bincode::serialize(element)?;
        let key = self.next_key;
        let offset = self.end;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&key.to_le_bytes())?;
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&payload)?;

        self.offsets.insert(key, offset);
        self.next_key += 1;
        self.end = offset + RECORD_HEADER + payload.len() as u64;
        Ok(key)
    }

    fn clear(&mut self, key: u64) -> Result<()> {
        self.ensure_open()?;
        if self.offsets.remove(&key).is_none() {
            return Err(TreeError::NotFound(key));
        }
        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&key.to_le_bytes())?;
        self.file.write_all(&TOMBSTONE.to_le_bytes())?;
        self.end += RECORD_HEADER;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.file.sync_all()?;
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
