//! ELF object reader.
//!
//! Parses a whole object from a seekable stream into an [`Image`]. Index
//! references are resolved into handles while the flat section table is
//! still intact; string tables, the symbol table, and relocation tables
//! are then absorbed into first-class strings, symbols, and relocations,
//! and their container sections dropped from the section list.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::codec::{
    self, RawElfHeader, RawProgramHeader, RawRelocation, RawSectionHeader, RawSymbol,
};
use super::constants::{
    Class, Endian, FileType, Machine, ProgramFlags, ProgramHeaderType, SectionFlags, SectionType,
    SymbolBinding, SymbolType, SHN_LORESERVE, SHN_UNDEF, SHN_XINDEX,
};
use super::error::{ElfError, Result};
use super::types::{
    Image, LayoutFields, ProgramHeader, Relocation, Section, SectionId, Symbol, SymbolId,
};

impl Image {
    /// Parses an ELF object from a seekable stream positioned at the
    /// start of the file.
    ///
    /// Any I/O or format error aborts the parse; no partial image is
    /// returned.
    pub fn read<R: Read + Seek>(r: &mut R) -> Result<Image> {
        let mut ident = [0u8; codec::IDENT_LEN];
        r.read_exact(&mut ident)?;
        if ident[0..4] != codec::MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        let class = match ident[4] {
            1 => Class::Elf32,
            2 => Class::Elf64,
            other => return Err(ElfError::InvalidClass(other)),
        };
        match ident[5] {
            2 => read_image::<BigEndian, R>(r, class, Endian::Big, &ident),
            _ => read_image::<LittleEndian, R>(r, class, Endian::Little, &ident),
        }
    }
}

fn read_image<E: ByteOrder, R: Read + Seek>(
    r: &mut R,
    class: Class,
    endian: Endian,
    ident: &[u8; codec::IDENT_LEN],
) -> Result<Image> {
    let fh = RawElfHeader::read::<E, _>(r, class)?;
    if fh.sec_hdr_str_index == SHN_XINDEX {
        return Err(ElfError::Unsupported(
            "SHN_XINDEX section header string table index",
        ));
    }

    let mut image = Image::new(class, endian);
    image.header_version = ident[6];
    if class.is_64() {
        image.abi = ident[7];
        image.abi_version = ident[8];
    }
    image.file_type = FileType(fh.file_type);
    image.machine = Machine(fh.machine);
    image.version = fh.version;
    image.entry = fh.entry;
    image.flags = fh.flags;
    image.layout = LayoutFields {
        prog_hdr_offset: fh.prog_hdr_off,
        sec_hdr_offset: fh.sec_hdr_off,
        header_size: fh.header_size,
        prog_hdr_entry_size: fh.prog_hdr_entry_size,
        prog_hdr_count: fh.prog_hdr_count,
        sec_hdr_entry_size: fh.sec_hdr_entry_size,
        sec_hdr_count: fh.sec_hdr_count,
        sec_hdr_str_index: fh.sec_hdr_str_index,
    };

    // Program headers first, payloads second: the records are contiguous
    // but the payloads live elsewhere in the file.
    r.seek(SeekFrom::Start(fh.prog_hdr_off))?;
    let mut file_sizes = Vec::with_capacity(fh.prog_hdr_count as usize);
    for _ in 0..fh.prog_hdr_count {
        let ph = RawProgramHeader::read::<E, _>(r, class)?;
        file_sizes.push(ph.file_size);
        image.program_headers.push(ProgramHeader {
            kind: ProgramHeaderType(ph.kind),
            flags: ProgramFlags::from_bits_retain(ph.flags),
            vaddr: ph.vaddr,
            paddr: ph.paddr,
            mem_size: ph.mem_size,
            align: ph.align,
            data: Vec::new(),
            offset: ph.offset,
        });
    }
    for (ph, &file_size) in image.program_headers.iter_mut().zip(&file_sizes) {
        if file_size > 0 {
            r.seek(SeekFrom::Start(ph.offset))?;
            let mut data = vec![0u8; file_size as usize];
            r.read_exact(&mut data)?;
            ph.data = data;
        }
    }

    // Section headers, payload slurped inline with the table position
    // saved and restored around each seek.
    let section_count = fh.sec_hdr_count as usize;
    r.seek(SeekFrom::Start(fh.sec_hdr_off))?;
    let mut symtab_index: Option<usize> = None;
    let mut name_offsets = Vec::with_capacity(section_count);
    for i in 0..section_count {
        let sh = RawSectionHeader::read::<E, _>(r, class)?;
        let kind = SectionType(sh.kind);
        if kind == SectionType::SYMTAB {
            if symtab_index.is_some() {
                return Err(ElfError::Unsupported("more than one symbol table"));
            }
            symtab_index = Some(i);
        } else if kind == SectionType::DYNSYM {
            return Err(ElfError::Unsupported("dynamic symbol table"));
        }

        let mut data = Vec::new();
        if sh.size > 0 && kind.has_data_in_file() {
            let pos = r.stream_position()?;
            r.seek(SeekFrom::Start(sh.offset))?;
            data = vec![0u8; sh.size as usize];
            r.read_exact(&mut data)?;
            r.seek(SeekFrom::Start(pos))?;
        }

        name_offsets.push(sh.name);
        image.add_section(Section {
            name: String::new(),
            kind,
            flags: SectionFlags::from_bits_retain(sh.flags),
            addr: sh.addr,
            size: sh.size,
            link: sh.link,
            link_section: None,
            info: sh.info,
            info_section: None,
            addr_align: sh.addr_align,
            entry_size: sh.entry_size,
            data,
            file_offset: sh.offset,
        });
    }

    // Resolve Link for every section, and Info where the type treats it
    // as a section reference.
    for i in 0..section_count {
        let id = SectionId(i as u32);
        let (link, info, kind) = {
            let s = image.section(id);
            (s.link, s.info, s.kind)
        };
        if link < SHN_LORESERVE as u32 {
            if link as usize >= section_count {
                return Err(ElfError::Malformed("section link out of range"));
            }
            image.section_mut(id).link_section = Some(SectionId(link));
        }
        if info < SHN_LORESERVE as u32 && kind.has_section_in_info() {
            if info as usize >= section_count {
                return Err(ElfError::Malformed("section info out of range"));
            }
            image.section_mut(id).info_section = Some(SectionId(info));
        }
    }

    // Section names from the section header string table.
    if fh.sec_hdr_str_index != SHN_UNDEF {
        let shstr = fh.sec_hdr_str_index as usize;
        if shstr >= section_count {
            return Err(ElfError::Malformed(
                "section header string table index out of range",
            ));
        }
        let base = image.section(SectionId(shstr as u32)).file_offset;
        for i in 0..section_count {
            r.seek(SeekFrom::Start(base + name_offsets[i] as u64))?;
            image.section_mut(SectionId(i as u32)).name = codec::read_cstr(r)?;
        }
    }

    // Symbols. Each record costs two seeks: the name lives in the string
    // table named by the symbol table's Link, so the table position is
    // saved and restored around the name read.
    if let Some(symtab) = symtab_index {
        let symtab = image.section(SectionId(symtab as u32));
        if symtab.entry_size == 0 {
            return Err(ElfError::Malformed("symbol table entry size is zero"));
        }
        let count = symtab.size / symtab.entry_size;
        let strtab = symtab.link as usize;
        if strtab >= section_count {
            return Err(ElfError::Malformed("symbol table string table out of range"));
        }
        let strtab_offset = image.section(SectionId(strtab as u32)).file_offset;
        r.seek(SeekFrom::Start(symtab.file_offset))?;
        for _ in 0..count {
            let raw = RawSymbol::read::<E, _>(r, class)?;
            let pos = r.stream_position()?;
            r.seek(SeekFrom::Start(strtab_offset + raw.name as u64))?;
            let name = codec::read_cstr(r)?;
            r.seek(SeekFrom::Start(pos))?;

            if raw.section_index == SHN_XINDEX {
                return Err(ElfError::Unsupported("SHN_XINDEX symbol section index"));
            }
            let mut section = None;
            let mut section_index = raw.section_index;
            if raw.section_index > 0 && raw.section_index < SHN_LORESERVE {
                if raw.section_index as usize >= section_count {
                    return Err(ElfError::Malformed("symbol section index out of range"));
                }
                section = Some(SectionId(raw.section_index as u32));
                section_index = 0;
            }
            image.add_symbol(Symbol {
                name,
                kind: SymbolType(raw.info & 0x0F),
                binding: SymbolBinding(raw.info >> 4),
                other: raw.other,
                section,
                section_index,
                value: raw.value,
                size: raw.size,
            });
        }
    }

    // Relocations, keyed by the section the relocation table's Info
    // names, with symbol indices resolved against the populated list.
    for i in 0..section_count {
        let id = SectionId(i as u32);
        let (kind, entry_size, size, file_offset, target) = {
            let s = image.section(id);
            (s.kind, s.entry_size, s.size, s.file_offset, s.info_section)
        };
        if kind != SectionType::REL && kind != SectionType::RELA {
            continue;
        }
        let target = target.ok_or(ElfError::Malformed("relocation section has no target"))?;
        if entry_size == 0 {
            return Err(ElfError::Malformed("relocation entry size is zero"));
        }
        let count = size / entry_size;
        r.seek(SeekFrom::Start(file_offset))?;
        for _ in 0..count {
            let raw = RawRelocation::read::<E, _>(r, class, kind)?;
            let (symbol_index, rel_type) = codec::unpack_rel_info(class, raw.info);
            if symbol_index as usize >= image.symbol_count() {
                return Err(ElfError::Malformed("relocation symbol index out of range"));
            }
            image.add_relocation(Relocation {
                section: target,
                symbol: Some(SymbolId(symbol_index)),
                offset: raw.offset,
                rel_type,
                addend: raw.addend,
            });
        }
    }

    // Drop the absorbed container sections. This must happen last: every
    // step above indexes sections by file position.
    let sections = &image.sections;
    image.section_list.retain(|&id| {
        !matches!(
            sections[id.0 as usize].kind,
            SectionType::REL
                | SectionType::RELA
                | SectionType::SYMTAB
                | SectionType::STRTAB
                | SectionType::SYMTAB_SHNDX
        )
    });

    Ok(image)
}
