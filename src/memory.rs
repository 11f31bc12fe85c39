//! File bytes and the address space they are mapped into.

use serde::Serialize;

use crate::Address;

/// Random access to the bytes of a file or buffer.
pub trait ByteSource {
    /// Read up to `len` bytes starting at `offset`; short reads near the end.
    fn read_at(&self, offset: u64, len: usize) -> Vec<u8>;

    /// Total size in bytes.
    fn size(&self) -> u64;
}

impl ByteSource for [u8] {
    fn read_at(&self, offset: u64, len: usize) -> Vec<u8> {
        let Ok(start) = usize::try_from(offset) else {
            return Vec::new();
        };
        if start >= self.len() {
            return Vec::new();
        }
        let end = start.saturating_add(len).min(self.len());
        self[start..end].to_vec()
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: u64, len: usize) -> Vec<u8> {
        self.as_slice().read_at(offset, len)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

/// Container format of a loaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FileType {
    /// Headerless bytes mapped at 0
    #[default]
    Binary,
    /// DOS `.com` image, loaded at 0x100 with 16-bit wrap-around
    Com,
    Elf,
    Pe,
    MachO,
}

/// Base address of a DOS `.com` image.
pub const COM_LOAD_ADDRESS: Address = 0x100;

/// One contiguous region of the address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRecord {
    pub name: String,
    pub address: Address,
    /// File offset of the first byte, `None` for zero-fill regions
    pub offset: Option<u64>,
    pub size: u64,
}

impl MemoryRecord {
    pub fn new(name: impl Into<String>, address: Address, offset: Option<u64>, size: u64) -> Self {
        Self { name: name.into(), address, offset, size }
    }

    fn contains_address(&self, address: Address) -> bool {
        address >= self.address && address - self.address < self.size
    }

    fn contains_offset(&self, offset: u64) -> bool {
        self.offset.is_some_and(|start| offset >= start && offset - start < self.size)
    }
}

/// Translation between virtual addresses and file offsets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MemoryMap {
    pub file_type: FileType,
    pub records: Vec<MemoryRecord>,
}

impl MemoryMap {
    pub fn new(file_type: FileType, records: Vec<MemoryRecord>) -> Self {
        Self { file_type, records }
    }

    /// Identity map of `size` bytes at address 0.
    pub fn raw(size: u64) -> Self {
        Self::new(FileType::Binary, vec![MemoryRecord::new("raw", 0, Some(0), size)])
    }

    /// `.com` image of `size` bytes at [`COM_LOAD_ADDRESS`].
    pub fn com(size: u64) -> Self {
        Self::new(FileType::Com, vec![MemoryRecord::new("com", COM_LOAD_ADDRESS, Some(0), size)])
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn address_to_offset(&self, address: Address) -> Option<u64> {
        let record = self.records.iter().find(|r| r.contains_address(address))?;
        record.offset.map(|start| start + (address - record.address))
    }

    pub fn offset_to_address(&self, offset: u64) -> Option<Address> {
        let record = self.records.iter().find(|r| r.contains_offset(offset))?;
        record.offset.map(|start| record.address + (offset - start))
    }

    pub fn is_offset_valid(&self, offset: u64) -> bool {
        self.records.iter().any(|r| r.contains_offset(offset))
    }

    pub fn is_address_valid(&self, address: Address) -> bool {
        self.address_to_offset(address).is_some()
    }
}
