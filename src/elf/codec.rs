//! Fixed-layout record codecs.
//!
//! Each on-disk record kind gets a raw struct holding its widest field
//! set; reading and writing are generic over [`byteorder::ByteOrder`] and
//! pick 32- or 64-bit field widths from the file class. The 32-bit shapes
//! narrow 64-bit values by truncation on write and widen by zero
//! extension on read. The symbol and program header records also reorder
//! fields between classes.

use std::io::{Read, Write};

use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};

use super::constants::{Class, SectionType};
use super::error::{ElfError, Result};

pub(crate) const IDENT_LEN: usize = 16;
pub(crate) const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub(crate) fn elf_header_size(class: Class) -> usize {
    // Identification bytes plus the class-dependent header body.
    if class.is_64() {
        IDENT_LEN + 48
    } else {
        IDENT_LEN + 36
    }
}

pub(crate) fn program_header_size(class: Class) -> usize {
    if class.is_64() {
        56
    } else {
        32
    }
}

pub(crate) fn section_header_size(class: Class) -> usize {
    // Only `address` and `offset` widen in the 64-bit shape.
    if class.is_64() {
        48
    } else {
        40
    }
}

pub(crate) fn symbol_size(class: Class) -> usize {
    if class.is_64() {
        24
    } else {
        16
    }
}

pub(crate) fn relocation_size(class: Class, kind: SectionType) -> usize {
    match (class.is_64(), kind == SectionType::RELA) {
        (true, true) => 24,
        (true, false) => 16,
        (false, true) => 12,
        (false, false) => 8,
    }
}

/// ELF header fields past the 16 identification bytes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawElfHeader {
    pub file_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub prog_hdr_off: u64,
    pub sec_hdr_off: u64,
    pub flags: u32,
    pub header_size: u16,
    pub prog_hdr_entry_size: u16,
    pub prog_hdr_count: u16,
    pub sec_hdr_entry_size: u16,
    pub sec_hdr_count: u16,
    pub sec_hdr_str_index: u16,
}

impl RawElfHeader {
    pub fn read<E: ByteOrder, R: Read>(r: &mut R, class: Class) -> Result<RawElfHeader> {
        let file_type = r.read_u16::<E>()?;
        let machine = r.read_u16::<E>()?;
        let version = r.read_u32::<E>()?;
        let (entry, prog_hdr_off, sec_hdr_off) = if class.is_64() {
            (r.read_u64::<E>()?, r.read_u64::<E>()?, r.read_u64::<E>()?)
        } else {
            (
                r.read_u32::<E>()? as u64,
                r.read_u32::<E>()? as u64,
                r.read_u32::<E>()? as u64,
            )
        };
        Ok(RawElfHeader {
            file_type,
            machine,
            version,
            entry,
            prog_hdr_off,
            sec_hdr_off,
            flags: r.read_u32::<E>()?,
            header_size: r.read_u16::<E>()?,
            prog_hdr_entry_size: r.read_u16::<E>()?,
            prog_hdr_count: r.read_u16::<E>()?,
            sec_hdr_entry_size: r.read_u16::<E>()?,
            sec_hdr_count: r.read_u16::<E>()?,
            sec_hdr_str_index: r.read_u16::<E>()?,
        })
    }

    pub fn write<E: ByteOrder, W: Write>(&self, w: &mut W, class: Class) -> Result<()> {
        w.write_u16::<E>(self.file_type)?;
        w.write_u16::<E>(self.machine)?;
        w.write_u32::<E>(self.version)?;
        if class.is_64() {
            w.write_u64::<E>(self.entry)?;
            w.write_u64::<E>(self.prog_hdr_off)?;
            w.write_u64::<E>(self.sec_hdr_off)?;
        } else {
            w.write_u32::<E>(self.entry as u32)?;
            w.write_u32::<E>(self.prog_hdr_off as u32)?;
            w.write_u32::<E>(self.sec_hdr_off as u32)?;
        }
        w.write_u32::<E>(self.flags)?;
        w.write_u16::<E>(self.header_size)?;
        w.write_u16::<E>(self.prog_hdr_entry_size)?;
        w.write_u16::<E>(self.prog_hdr_count)?;
        w.write_u16::<E>(self.sec_hdr_entry_size)?;
        w.write_u16::<E>(self.sec_hdr_count)?;
        w.write_u16::<E>(self.sec_hdr_str_index)?;
        Ok(())
    }
}

/// Program header record. The `flags` field sits second in the 64-bit
/// shape and next to last in the 32-bit one.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawProgramHeader {
    pub kind: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub align: u64,
}

impl RawProgramHeader {
    pub fn read<E: ByteOrder, R: Read>(r: &mut R, class: Class) -> Result<RawProgramHeader> {
        if class.is_64() {
            Ok(RawProgramHeader {
                kind: r.read_u32::<E>()?,
                flags: r.read_u32::<E>()?,
                offset: r.read_u64::<E>()?,
                vaddr: r.read_u64::<E>()?,
                paddr: r.read_u64::<E>()?,
                file_size: r.read_u64::<E>()?,
                mem_size: r.read_u64::<E>()?,
                align: r.read_u64::<E>()?,
            })
        } else {
            Ok(RawProgramHeader {
                kind: r.read_u32::<E>()?,
                offset: r.read_u32::<E>()? as u64,
                vaddr: r.read_u32::<E>()? as u64,
                paddr: r.read_u32::<E>()? as u64,
                file_size: r.read_u32::<E>()? as u64,
                mem_size: r.read_u32::<E>()? as u64,
                flags: r.read_u32::<E>()?,
                align: r.read_u32::<E>()? as u64,
            })
        }
    }

    pub fn write<E: ByteOrder, W: Write>(&self, w: &mut W, class: Class) -> Result<()> {
        if class.is_64() {
            w.write_u32::<E>(self.kind)?;
            w.write_u32::<E>(self.flags)?;
            w.write_u64::<E>(self.offset)?;
            w.write_u64::<E>(self.vaddr)?;
            w.write_u64::<E>(self.paddr)?;
            w.write_u64::<E>(self.file_size)?;
            w.write_u64::<E>(self.mem_size)?;
            w.write_u64::<E>(self.align)?;
        } else {
            w.write_u32::<E>(self.kind)?;
            w.write_u32::<E>(self.offset as u32)?;
            w.write_u32::<E>(self.vaddr as u32)?;
            w.write_u32::<E>(self.paddr as u32)?;
            w.write_u32::<E>(self.file_size as u32)?;
            w.write_u32::<E>(self.mem_size as u32)?;
            w.write_u32::<E>(self.flags)?;
            w.write_u32::<E>(self.align as u32)?;
        }
        Ok(())
    }
}

/// Section header record. Only `addr` and `offset` widen in the 64-bit
/// shape; the remaining fields stay 32-bit in both classes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawSectionHeader {
    pub name: u32,
    pub kind: u32,
    pub flags: u32,
    pub addr: u64,
    pub offset: u64,
    pub size: u32,
    pub link: u32,
    pub info: u32,
    pub addr_align: u32,
    pub entry_size: u32,
}

impl RawSectionHeader {
    pub fn read<E: ByteOrder, R: Read>(r: &mut R, class: Class) -> Result<RawSectionHeader> {
        let name = r.read_u32::<E>()?;
        let kind = r.read_u32::<E>()?;
        let flags = r.read_u32::<E>()?;
        let (addr, offset) = if class.is_64() {
            (r.read_u64::<E>()?, r.read_u64::<E>()?)
        } else {
            (r.read_u32::<E>()? as u64, r.read_u32::<E>()? as u64)
        };
        Ok(RawSectionHeader {
            name,
            kind,
            flags,
            addr,
            offset,
            size: r.read_u32::<E>()?,
            link: r.read_u32::<E>()?,
            info: r.read_u32::<E>()?,
            addr_align: r.read_u32::<E>()?,
            entry_size: r.read_u32::<E>()?,
        })
    }

    pub fn write<E: ByteOrder, W: Write>(&self, w: &mut W, class: Class) -> Result<()> {
        w.write_u32::<E>(self.name)?;
        w.write_u32::<E>(self.kind)?;
        w.write_u32::<E>(self.flags)?;
        if class.is_64() {
            w.write_u64::<E>(self.addr)?;
            w.write_u64::<E>(self.offset)?;
        } else {
            w.write_u32::<E>(self.addr as u32)?;
            w.write_u32::<E>(self.offset as u32)?;
        }
        w.write_u32::<E>(self.size)?;
        w.write_u32::<E>(self.link)?;
        w.write_u32::<E>(self.info)?;
        w.write_u32::<E>(self.addr_align)?;
        w.write_u32::<E>(self.entry_size)?;
        Ok(())
    }
}

/// Symbol record. The 32-bit shape puts `value`/`size` before the info
/// byte; the 64-bit shape puts them last.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawSymbol {
    pub name: u32,
    pub info: u8,
    pub other: u8,
    pub section_index: u16,
    pub value: u64,
    pub size: u64,
}

impl RawSymbol {
    pub fn read<E: ByteOrder, R: Read>(r: &mut R, class: Class) -> Result<RawSymbol> {
        if class.is_64() {
            Ok(RawSymbol {
                name: r.read_u32::<E>()?,
                info: r.read_u8()?,
                other: r.read_u8()?,
                section_index: r.read_u16::<E>()?,
                value: r.read_u64::<E>()?,
                size: r.read_u64::<E>()?,
            })
        } else {
            let name = r.read_u32::<E>()?;
            let value = r.read_u32::<E>()? as u64;
            let size = r.read_u32::<E>()? as u64;
            Ok(RawSymbol {
                name,
                value,
                size,
                info: r.read_u8()?,
                other: r.read_u8()?,
                section_index: r.read_u16::<E>()?,
            })
        }
    }

    pub fn write<E: ByteOrder, W: Write>(&self, w: &mut W, class: Class) -> Result<()> {
        if class.is_64() {
            w.write_u32::<E>(self.name)?;
            w.write_u8(self.info)?;
            w.write_u8(self.other)?;
            w.write_u16::<E>(self.section_index)?;
            w.write_u64::<E>(self.value)?;
            w.write_u64::<E>(self.size)?;
        } else {
            w.write_u32::<E>(self.name)?;
            w.write_u32::<E>(self.value as u32)?;
            w.write_u32::<E>(self.size as u32)?;
            w.write_u8(self.info)?;
            w.write_u8(self.other)?;
            w.write_u16::<E>(self.section_index)?;
        }
        Ok(())
    }
}

/// Relocation record, REL or RELA shape. `addend` is zero for REL.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawRelocation {
    pub offset: u64,
    pub info: u64,
    pub addend: i64,
}

impl RawRelocation {
    pub fn read<E: ByteOrder, R: Read>(
        r: &mut R,
        class: Class,
        kind: SectionType,
    ) -> Result<RawRelocation> {
        if kind != SectionType::REL && kind != SectionType::RELA {
            return Err(ElfError::UnknownRelocationType(kind.0));
        }
        let (offset, info) = if class.is_64() {
            (r.read_u64::<E>()?, r.read_u64::<E>()?)
        } else {
            (r.read_u32::<E>()? as u64, r.read_u32::<E>()? as u64)
        };
        let addend = if kind == SectionType::RELA {
            if class.is_64() {
                r.read_i64::<E>()?
            } else {
                r.read_i32::<E>()? as i64
            }
        } else {
            0
        };
        Ok(RawRelocation {
            offset,
            info,
            addend,
        })
    }

    pub fn write<E: ByteOrder, W: Write>(
        &self,
        w: &mut W,
        class: Class,
        kind: SectionType,
    ) -> Result<()> {
        if kind != SectionType::REL && kind != SectionType::RELA {
            return Err(ElfError::UnknownRelocationType(kind.0));
        }
        if class.is_64() {
            w.write_u64::<E>(self.offset)?;
            w.write_u64::<E>(self.info)?;
        } else {
            w.write_u32::<E>(self.offset as u32)?;
            w.write_u32::<E>(self.info as u32)?;
        }
        if kind == SectionType::RELA {
            if class.is_64() {
                w.write_i64::<E>(self.addend)?;
            } else {
                w.write_i32::<E>(self.addend as i32)?;
            }
        }
        Ok(())
    }
}

/// Packs a relocation info field: `(sym << 32) | type` for the 64-bit
/// class, `(sym << 8) | (type & 0xFF)` for the 32-bit one.
pub(crate) fn pack_rel_info(class: Class, symbol_index: u32, rel_type: u32) -> u64 {
    if class.is_64() {
        ((symbol_index as u64) << 32) | rel_type as u64
    } else {
        (((symbol_index as u64) << 8) | (rel_type as u64 & 0xFF)) & 0xFFFF_FFFF
    }
}

/// Splits a relocation info field into `(symbol_index, rel_type)`.
pub(crate) fn unpack_rel_info(class: Class, info: u64) -> (u32, u32) {
    if class.is_64() {
        ((info >> 32) as u32, info as u32)
    } else {
        ((info as u32) >> 8, (info as u32) & 0xFF)
    }
}

/// Reads a zero-terminated byte sequence from the stream's current
/// position. Invalid UTF-8 is replaced, never rejected.
pub(crate) fn read_cstr<R: Read>(r: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    let mut buf = [0u8; 1];
    loop {
        r.read_exact(&mut buf)?;
        if buf[0] == 0 {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.push(buf[0]);
    }
}
