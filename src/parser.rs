//! Goblin-based image loader: builds the memory map, picks the decode mode
//! and locates Mach-O dyld info streams.

use std::fmt;
use std::fs;
use std::path::Path;

use goblin::mach::constants::cputype;
use goblin::mach::load_command::{CommandVariant, DyldInfoCommand};
use goblin::mach::{Mach, MachO};
use goblin::{elf, pe, Object};
use log::{debug, warn};

use crate::memory::{FileType, MemoryMap, MemoryRecord, COM_LOAD_ADDRESS};
use crate::{Address, DisasmMode, DisassemblyError};

/// A byte range inside the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRange {
    pub offset: u64,
    pub size: u64,
}

/// `LC_DYLD_INFO` / `LC_DYLD_INFO_ONLY` stream locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachOStreams {
    pub rebase: Option<FileRange>,
    pub bind: Option<FileRange>,
    pub weak_bind: Option<FileRange>,
    pub lazy_bind: Option<FileRange>,
    pub export: Option<FileRange>,
}

impl MachOStreams {
    fn from_command(command: &DyldInfoCommand) -> Self {
        let range = |offset: u32, size: u32| {
            (size != 0).then_some(FileRange { offset: u64::from(offset), size: u64::from(size) })
        };
        Self {
            rebase: range(command.rebase_off, command.rebase_size),
            bind: range(command.bind_off, command.bind_size),
            weak_bind: range(command.weak_bind_off, command.weak_bind_size),
            lazy_bind: range(command.lazy_bind_off, command.lazy_bind_size),
            export: range(command.export_off, command.export_size),
        }
    }

    /// The stream decoded by `mode`. Lazy binds share the bind opcodes and
    /// are reached through [`MachOStreams::lazy_bind`] directly.
    pub fn range_for(&self, mode: DisasmMode) -> Option<FileRange> {
        match mode {
            DisasmMode::CustomMachRebase => self.rebase,
            DisasmMode::CustomMachBind => self.bind,
            DisasmMode::CustomMachWeakBind => self.weak_bind,
            DisasmMode::CustomMachExport => self.export,
            _ => None,
        }
    }
}

/// Everything the decoder needs to know about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub memory_map: MemoryMap,
    pub mode: DisasmMode,
    pub entry_point: Option<Address>,
    pub macho_streams: Option<MachOStreams>,
}

impl LoadedImage {
    fn raw(size: usize) -> Self {
        Self {
            memory_map: MemoryMap::raw(size as u64),
            mode: DisasmMode::Unknown,
            entry_point: None,
            macho_streams: None,
        }
    }
}

/// Turns file bytes into a [`LoadedImage`].
pub trait BinaryLoader {
    /// `file_name` is only used to recognise headerless formats.
    fn load(&self, data: &[u8], file_name: Option<&str>) -> Result<LoadedImage, DisassemblyError>;
}

/// A loader that handles ELF, PE, and Mach-O via Goblin, plus DOS `.com`
/// files and raw blobs.
#[derive(Debug, Default)]
pub struct GoblinLoader;

impl GoblinLoader {
    pub fn new() -> Self {
        GoblinLoader
    }

    /// Read `path` and load it. Returns the file bytes with the image.
    pub fn load_file(&self, path: &Path) -> Result<(Vec<u8>, LoadedImage), DisassemblyError> {
        let data = fs::read(path)?;
        let name = path.file_name().and_then(|n| n.to_str());
        let image = self.load(&data, name)?;
        Ok((data, image))
    }

    fn load_elf(&self, elf: elf::Elf<'_>) -> LoadedImage {
        let mode = match elf.header.e_machine {
            elf::header::EM_386 => DisasmMode::X86_32,
            elf::header::EM_X86_64 => DisasmMode::X86_64,
            elf::header::EM_ARM => DisasmMode::Arm,
            elf::header::EM_AARCH64 => DisasmMode::Arm64,
            elf::header::EM_MIPS => DisasmMode::Mips32,
            elf::header::EM_PPC => DisasmMode::Ppc32,
            elf::header::EM_RISCV => match elf.header.e_ident[elf::header::EI_CLASS] {
                elf::header::ELFCLASS32 => DisasmMode::RiscV32,
                elf::header::ELFCLASS64 => DisasmMode::RiscV64,
                _ => DisasmMode::Unknown,
            },
            _ => DisasmMode::Unknown,
        };

        let mut records: Vec<MemoryRecord> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == elf::program_header::PT_LOAD && ph.p_memsz > 0)
            .enumerate()
            .flat_map(|(index, ph)| {
                let name = format!("LOAD{}", index);
                let mut parts = vec![MemoryRecord::new(name.clone(), ph.p_vaddr, Some(ph.p_offset), ph.p_filesz)];
                if ph.p_memsz > ph.p_filesz {
                    parts.push(MemoryRecord::new(name, ph.p_vaddr + ph.p_filesz, None, ph.p_memsz - ph.p_filesz));
                }
                parts
            })
            .filter(|record| record.size > 0)
            .collect();

        // relocatable objects have no segments, fall back to sections
        if records.is_empty() {
            for sh in elf.section_headers.iter().filter(|sh| sh.sh_size > 0) {
                let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string();
                let offset = (sh.sh_type != elf::section_header::SHT_NOBITS).then_some(sh.sh_offset);
                records.push(MemoryRecord::new(name, sh.sh_addr, offset, sh.sh_size));
            }
        }

        LoadedImage {
            memory_map: MemoryMap::new(FileType::Elf, records),
            mode,
            entry_point: (elf.entry != 0).then_some(elf.entry),
            macho_streams: None,
        }
    }

    fn load_pe(&self, pe: pe::PE<'_>) -> LoadedImage {
        let mode = match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => DisasmMode::X86_32,
            pe::header::COFF_MACHINE_X86_64 => DisasmMode::X86_64,
            pe::header::COFF_MACHINE_ARMNT => DisasmMode::Thumb,
            pe::header::COFF_MACHINE_ARM64 => DisasmMode::Arm64,
            _ => DisasmMode::Unknown,
        };

        let image_base = pe.image_base as u64;
        let records = pe
            .sections
            .iter()
            .map(|section| {
                let name = section.name().unwrap_or("").to_string();
                let size = u64::from(section.virtual_size.max(section.size_of_raw_data));
                let offset = (section.size_of_raw_data != 0).then_some(u64::from(section.pointer_to_raw_data));
                MemoryRecord::new(name, image_base + u64::from(section.virtual_address), offset, size)
            })
            .collect();

        LoadedImage {
            memory_map: MemoryMap::new(FileType::Pe, records),
            mode,
            entry_point: Some(image_base + pe.entry as u64),
            macho_streams: None,
        }
    }

    fn load_macho(&self, macho: &MachO<'_>) -> LoadedImage {
        let mode = match macho.header.cputype {
            cputype::CPU_TYPE_I386 => DisasmMode::X86_32,
            cputype::CPU_TYPE_X86_64 => DisasmMode::X86_64,
            cputype::CPU_TYPE_ARM => DisasmMode::Arm,
            cputype::CPU_TYPE_ARM64 => DisasmMode::Arm64,
            cputype::CPU_TYPE_POWERPC => DisasmMode::Ppc32,
            _ => DisasmMode::Unknown,
        };

        let records = macho
            .segments
            .iter()
            .filter(|segment| segment.vmsize > 0)
            .map(|segment| {
                let name = segment.name().unwrap_or("").to_string();
                let offset = (segment.filesize > 0).then_some(segment.fileoff);
                MemoryRecord::new(name, segment.vmaddr, offset, segment.filesize.max(segment.vmsize))
            })
            .collect();

        let macho_streams = macho.load_commands.iter().find_map(|lc| match &lc.command {
            CommandVariant::DyldInfo(command) | CommandVariant::DyldInfoOnly(command) => {
                Some(MachOStreams::from_command(command))
            }
            _ => None,
        });

        LoadedImage {
            memory_map: MemoryMap::new(FileType::MachO, records),
            mode,
            entry_point: (macho.entry != 0).then_some(macho.entry),
            macho_streams,
        }
    }
}

impl fmt::Display for GoblinLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoblinLoader")
    }
}

impl BinaryLoader for GoblinLoader {
    fn load(&self, data: &[u8], file_name: Option<&str>) -> Result<LoadedImage, DisassemblyError> {
        if file_name.is_some_and(|name| name.to_ascii_lowercase().ends_with(".com")) {
            debug!("loading {} bytes as a .com image at {:#x}", data.len(), COM_LOAD_ADDRESS);
            return Ok(LoadedImage {
                memory_map: MemoryMap::com(data.len() as u64),
                mode: DisasmMode::X86_16,
                entry_point: Some(COM_LOAD_ADDRESS),
                macho_streams: None,
            });
        }

        let image = match Object::parse(data) {
            Ok(Object::Elf(elf)) => self.load_elf(elf),
            Ok(Object::PE(pe)) => self.load_pe(pe),
            Ok(Object::Mach(Mach::Binary(macho))) => self.load_macho(&macho),
            Ok(Object::Mach(Mach::Fat(_))) => {
                return Err(DisassemblyError::ParsingError("fat Mach-O archives are not supported".into()))
            }
            Ok(_) => LoadedImage::raw(data.len()),
            Err(e) => {
                warn!("not a recognised executable ({}), mapping as raw bytes", e);
                LoadedImage::raw(data.len())
            }
        };
        debug!(
            "loaded {:?} image, mode {}, {} regions",
            image.memory_map.file_type,
            image.mode,
            image.memory_map.records.len()
        );
        Ok(image)
    }
}
