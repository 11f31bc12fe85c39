//! 7-Zip header properties as pseudo-instructions.
//!
//! The header of a `.7z` archive is a tree of property blocks, each opened by
//! a packed-number tag and mostly closed by `kEnd`. The backend walks that
//! grammar by recursive descent and emits one record per tag or field so the
//! header can be browsed like code.

use log::debug;

use super::Cursor;
use crate::packed::read_packed;
use crate::{Address, CancellationToken, DisasmBackend, DisasmMode, DisasmOptions, DisasmResult};

pub const K_END: u64 = 0x00;
pub const K_HEADER: u64 = 0x01;
pub const K_ARCHIVE_PROPERTIES: u64 = 0x02;
pub const K_ADDITIONAL_STREAMS_INFO: u64 = 0x03;
pub const K_MAIN_STREAMS_INFO: u64 = 0x04;
pub const K_FILES_INFO: u64 = 0x05;
pub const K_PACK_INFO: u64 = 0x06;
pub const K_UNPACK_INFO: u64 = 0x07;
pub const K_SUBSTREAMS_INFO: u64 = 0x08;
pub const K_SIZE: u64 = 0x09;
pub const K_CRC: u64 = 0x0A;
pub const K_FOLDER: u64 = 0x0B;
pub const K_CODERS_UNPACK_SIZE: u64 = 0x0C;
pub const K_NUM_UNPACK_STREAM: u64 = 0x0D;
pub const K_ENCODED_HEADER: u64 = 0x17;

const PROPERTY_NAMES: [&str; 26] = [
    "kEnd",
    "kHeader",
    "kArchiveProperties",
    "kAdditionalStreamsInfo",
    "kMainStreamsInfo",
    "kFilesInfo",
    "kPackInfo",
    "kUnPackInfo",
    "kSubStreamsInfo",
    "kSize",
    "kCRC",
    "kFolder",
    "kCodersUnPackSize",
    "kNumUnPackStream",
    "kEmptyStream",
    "kEmptyFile",
    "kAnti",
    "kName",
    "kCTime",
    "kATime",
    "kMTime",
    "kWinAttributes",
    "kComment",
    "kEncodedHeader",
    "kStartPos",
    "kDummy",
];

/// Display name of a property id.
pub fn property_name(id: u64) -> &'static str {
    usize::try_from(id)
        .ok()
        .and_then(|index| PROPERTY_NAMES.get(index))
        .copied()
        .unwrap_or("kUnknown")
}

/// What later blocks need to know about one folder.
#[derive(Debug, Clone, Copy, Default)]
struct FolderShape {
    out_streams: u64,
    crc_defined: bool,
}

/// Backend for [`DisasmMode::Custom7ZipProperties`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SevenZipProperties;

impl SevenZipProperties {
    pub fn new() -> Self {
        Self
    }
}

impl DisasmBackend for SevenZipProperties {
    fn disasm(
        &self,
        data: &[u8],
        address: Address,
        options: &DisasmOptions,
        limit: i32,
        token: &CancellationToken,
    ) -> Vec<DisasmResult> {
        let mut walker = Walker { cursor: Cursor::new(data, address, options, limit, token) };
        match walker.peek_tag() {
            Some(K_HEADER) => {
                walker.header();
            }
            Some(K_ENCODED_HEADER) => {
                walker.encoded_header();
            }
            other => debug!("7z: leading tag {:?} is not a header", other),
        }
        let results = walker.cursor.finish();
        debug!("7z: {} records at {:#x}", results.len(), address);
        results
    }

    fn mode(&self) -> DisasmMode {
        DisasmMode::Custom7ZipProperties
    }
}

struct Walker<'a> {
    cursor: Cursor<'a>,
}

impl Walker<'_> {
    fn peek_tag(&self) -> Option<u64> {
        let packed = read_packed(self.cursor.window());
        packed.is_valid.then_some(packed.value)
    }

    fn peek_is(&self, id: u64) -> bool {
        self.peek_tag() == Some(id)
    }

    /// Consume tag `id`; anything else stops the walk.
    fn expect_tag(&mut self, id: u64) -> Option<()> {
        let packed = read_packed(self.cursor.window());
        if !packed.is_valid || packed.value != id {
            return self.cursor.fail();
        }
        self.cursor.emit(packed.byte_size, property_name(id), format!("0x{:x}", id));
        Some(())
    }

    fn number(&mut self) -> Option<u64> {
        let packed = read_packed(self.cursor.window());
        if !packed.is_valid {
            return self.cursor.fail();
        }
        self.cursor.emit(packed.byte_size, "NUMBER", format!("0x{:x}", packed.value));
        Some(packed.value)
    }

    fn byte(&mut self) -> Option<u8> {
        let Some(&value) = self.cursor.window().first() else {
            return self.cursor.fail();
        };
        self.cursor.emit(1, "BYTE", format!("0x{:x}", value));
        Some(value)
    }

    fn uint32(&mut self) -> Option<u32> {
        let Some(bytes) = self.cursor.window().first_chunk::<4>() else {
            return self.cursor.fail();
        };
        let value = u32::from_le_bytes(*bytes);
        self.cursor.emit(4, "UINT32", format!("0x{:08x}", value));
        Some(value)
    }

    /// `len` raw bytes rendered as hex. An empty array emits nothing.
    fn array(&mut self, len: u64) -> Option<Vec<u8>> {
        if self.cursor.halted() {
            return None;
        }
        let window = self.cursor.window();
        let Some(bytes) = usize::try_from(len).ok().and_then(|len| window.get(..len)) else {
            return self.cursor.fail();
        };
        if !bytes.is_empty() {
            let text: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            self.cursor.emit(bytes.len(), "ARRAY", text);
        }
        Some(bytes.to_vec())
    }

    fn header(&mut self) -> Option<()> {
        self.expect_tag(K_HEADER)?;
        if self.peek_is(K_ARCHIVE_PROPERTIES) {
            self.expect_tag(K_ARCHIVE_PROPERTIES)?;
            self.property_list()?;
        }
        if self.peek_is(K_ADDITIONAL_STREAMS_INFO) {
            self.expect_tag(K_ADDITIONAL_STREAMS_INFO)?;
            self.streams_info()?;
        }
        if self.peek_is(K_MAIN_STREAMS_INFO) {
            self.expect_tag(K_MAIN_STREAMS_INFO)?;
            self.streams_info()?;
        }
        if self.peek_is(K_FILES_INFO) {
            self.expect_tag(K_FILES_INFO)?;
            self.number()?;
            self.property_list()?;
        }
        self.expect_tag(K_END)
    }

    fn encoded_header(&mut self) -> Option<()> {
        self.expect_tag(K_ENCODED_HEADER)?;
        self.streams_info()
    }

    /// `{tag NUMBER(size) ARRAY}* kEnd`
    fn property_list(&mut self) -> Option<()> {
        loop {
            let tag = self.peek_tag()?;
            self.expect_tag(tag)?;
            if tag == K_END {
                return Some(());
            }
            let size = self.number()?;
            self.array(size)?;
        }
    }

    fn streams_info(&mut self) -> Option<()> {
        let mut folders = Vec::new();
        if self.peek_is(K_PACK_INFO) {
            self.pack_info()?;
        }
        if self.peek_is(K_UNPACK_INFO) {
            folders = self.unpack_info()?;
        }
        if self.peek_is(K_SUBSTREAMS_INFO) {
            self.substreams_info(&folders)?;
        }
        self.expect_tag(K_END)
    }

    fn pack_info(&mut self) -> Option<()> {
        self.expect_tag(K_PACK_INFO)?;
        self.number()?;
        let streams = self.number()?;
        if self.peek_is(K_SIZE) {
            self.expect_tag(K_SIZE)?;
            for _ in 0..streams {
                self.number()?;
            }
        }
        if self.peek_is(K_CRC) {
            self.expect_tag(K_CRC)?;
            self.digests(streams)?;
        }
        self.expect_tag(K_END)
    }

    fn unpack_info(&mut self) -> Option<Vec<FolderShape>> {
        self.expect_tag(K_UNPACK_INFO)?;
        self.expect_tag(K_FOLDER)?;
        let count = self.number()?;
        let external = self.byte()?;
        let mut folders = Vec::new();
        if external == 0 {
            for _ in 0..count {
                folders.push(self.folder()?);
            }
        } else {
            // folders live in another stream, only its index is stored here
            self.number()?;
        }

        self.expect_tag(K_CODERS_UNPACK_SIZE)?;
        for folder in &folders {
            for _ in 0..folder.out_streams {
                self.number()?;
            }
        }
        if self.peek_is(K_CRC) {
            self.expect_tag(K_CRC)?;
            let defined = self.digests(folders.len() as u64)?;
            for (folder, defined) in folders.iter_mut().zip(defined) {
                folder.crc_defined = defined;
            }
        }
        self.expect_tag(K_END)?;
        Some(folders)
    }

    fn folder(&mut self) -> Option<FolderShape> {
        let coders = self.number()?;
        let mut in_streams = 0u64;
        let mut out_streams = 0u64;
        for _ in 0..coders {
            let flags = self.byte()?;
            self.array(u64::from(flags & 0x0F))?;
            if flags & 0x10 != 0 {
                in_streams = in_streams.saturating_add(self.number()?);
                out_streams = out_streams.saturating_add(self.number()?);
            } else {
                in_streams = in_streams.saturating_add(1);
                out_streams = out_streams.saturating_add(1);
            }
            if flags & 0x20 != 0 {
                let size = self.number()?;
                self.array(size)?;
            }
        }

        let bind_pairs = out_streams.saturating_sub(1);
        for _ in 0..bind_pairs {
            self.number()?;
            self.number()?;
        }
        let packed_streams = in_streams.saturating_sub(bind_pairs);
        if packed_streams > 1 {
            for _ in 0..packed_streams {
                self.number()?;
            }
        }
        Some(FolderShape { out_streams, crc_defined: false })
    }

    fn substreams_info(&mut self, folders: &[FolderShape]) -> Option<()> {
        self.expect_tag(K_SUBSTREAMS_INFO)?;
        let mut per_folder = vec![1u64; folders.len()];
        if self.peek_is(K_NUM_UNPACK_STREAM) {
            self.expect_tag(K_NUM_UNPACK_STREAM)?;
            for streams in per_folder.iter_mut() {
                *streams = self.number()?;
            }
        }
        if self.peek_is(K_SIZE) {
            self.expect_tag(K_SIZE)?;
            // the last size of each folder is implied by the folder size
            for &streams in &per_folder {
                for _ in 1..streams {
                    self.number()?;
                }
            }
        }
        if self.peek_is(K_CRC) {
            self.expect_tag(K_CRC)?;
            let count = per_folder
                .iter()
                .zip(folders)
                .map(|(&streams, folder)| if streams == 1 && folder.crc_defined { 0 } else { streams })
                .fold(0u64, u64::saturating_add);
            self.digests(count)?;
        }
        self.expect_tag(K_END)
    }

    /// `BYTE(all) [ARRAY bitfield] UINT32×defined`, returning the defined flags.
    fn digests(&mut self, count: u64) -> Option<Vec<bool>> {
        let all_defined = self.byte()?;
        let defined = if all_defined != 0 {
            if count > (self.cursor.window().len() / 4) as u64 {
                return self.cursor.fail();
            }
            vec![true; count as usize]
        } else {
            let bits = self.array(count.div_ceil(8))?;
            (0..count as usize).map(|i| bits[i / 8] & (0x80 >> (i % 8)) != 0).collect()
        };
        for _ in defined.iter().filter(|&&d| d) {
            self.uint32()?;
        }
        Some(defined)
    }
}
