//! ELF object writer.
//!
//! Lays out and emits a whole image: sorts the symbol list, synthesizes
//! `.shstrtab`, `.strtab`, `.symtab`, and one `.rel`/`.rela` section per
//! relocated target, computes every file offset up front, then streams
//! the records and payloads in a single sequential pass.

use std::collections::HashMap;
use std::io::Write;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::codec::{
    self, RawElfHeader, RawProgramHeader, RawRelocation, RawSectionHeader, RawSymbol,
};
use super::constants::{Endian, SectionType, SymbolBinding, MAX_SECTION_COUNT};
use super::error::{ElfError, Result};
use super::strtab::StringTable;
use super::types::{Image, SectionId, SymbolId};

impl Image {
    /// Emits the image to `w`.
    ///
    /// Reorders the symbol list (stable, locals first, then by name) and
    /// refreshes the recorded layout fields; all other image state is
    /// left as-is, so writing twice produces identical bytes.
    ///
    /// The sink may hold a truncated prefix if an error occurs mid-write.
    pub fn write<W: Write>(&mut self, w: &mut W) -> Result<()> {
        match self.endian {
            Endian::Little => self.write_image::<LittleEndian, W>(w),
            Endian::Big => self.write_image::<BigEndian, W>(w),
        }
    }

    fn write_image<E: ByteOrder, W: Write>(&mut self, w: &mut W) -> Result<()> {
        let class = self.class;

        let mut section_pos: HashMap<SectionId, usize> = HashMap::new();
        for (i, &id) in self.section_list.iter().enumerate() {
            section_pos.insert(id, i);
        }

        // Relocation groups whose target is gone have nowhere to hang
        // their Info reference; the caller (or the section GC) should
        // have pruned them.
        let mut groups: Vec<SectionId> = Vec::new();
        for &target in self.relocations.keys() {
            if section_pos.contains_key(&target) {
                groups.push(target);
            } else {
                log::warn!(
                    "dropping relocations against section {:?}: not in the section list",
                    self.sections[target.0 as usize].name
                );
            }
        }

        let live = self.section_list.len();
        let total = live + 3 + groups.len();
        if total > MAX_SECTION_COUNT {
            return Err(ElfError::TooManySections(total));
        }
        let shstrtab_pos = live;
        let strtab_pos = live + 1;
        let symtab_pos = live + 2;

        // Stable sort: locals first, then lexicographic by name within
        // each binding.
        {
            let symbols = &self.symbols;
            self.symbol_list.sort_by(|&a, &b| {
                let (sa, sb) = (&symbols[a.0 as usize], &symbols[b.0 as usize]);
                sa.binding
                    .0
                    .cmp(&sb.binding.0)
                    .then_with(|| sa.name.cmp(&sb.name))
            });
        }
        let mut symbol_pos: HashMap<SymbolId, usize> = HashMap::new();
        for (i, &id) in self.symbol_list.iter().enumerate() {
            symbol_pos.insert(id, i);
        }

        // Symbol table payload and `.strtab` contents. The symbol table's
        // Info is the index of the first non-local symbol; with none
        // present it degenerates to the symbol count.
        let mut strtab = StringTable::new();
        let mut symtab_data: Vec<u8> = Vec::new();
        let mut symtab_info = self.symbol_list.len() as u32;
        let mut seen_non_local = false;
        for (i, &id) in self.symbol_list.iter().enumerate() {
            let sym = &self.symbols[id.0 as usize];
            let name = strtab.add(&sym.name);
            let section_index = match sym.section {
                Some(section) => section_pos
                    .get(&section)
                    .map(|&pos| pos as u16)
                    .unwrap_or(sym.section_index),
                None => sym.section_index,
            };
            if !seen_non_local && sym.binding != SymbolBinding::LOCAL {
                symtab_info = i as u32;
                seen_non_local = true;
            }
            RawSymbol {
                name,
                info: (sym.binding.0 << 4) | (sym.kind.0 & 0x0F),
                other: sym.other,
                section_index,
                value: sym.value,
                size: sym.size,
            }
            .write::<E, _>(&mut symtab_data, class)?;
        }

        // Relocation table payloads. A group with any nonzero addend is
        // promoted to RELA; otherwise it stays REL.
        let mut group_sections = Vec::with_capacity(groups.len());
        for &target in &groups {
            let relocations = &self.relocations[&target];
            let kind = if relocations.iter().any(|rel| rel.addend != 0) {
                SectionType::RELA
            } else {
                SectionType::REL
            };
            let prefix = if kind == SectionType::RELA {
                ".rela"
            } else {
                ".rel"
            };
            let name = format!("{}{}", prefix, self.sections[target.0 as usize].name);
            let mut data = Vec::new();
            for rel in relocations {
                let symbol_index = rel
                    .symbol
                    .and_then(|id| symbol_pos.get(&id))
                    .map(|&pos| pos as u32)
                    .unwrap_or(0);
                RawRelocation {
                    offset: rel.offset,
                    info: codec::pack_rel_info(class, symbol_index, rel.rel_type),
                    addend: rel.addend,
                }
                .write::<E, _>(&mut data, class, kind)?;
            }
            group_sections.push((target, kind, name, data));
        }

        // `.shstrtab` holds every emitted section's name, inserted in
        // emission order.
        let mut shstrtab = StringTable::new();
        let mut name_offsets = Vec::with_capacity(total);
        for &id in &self.section_list {
            name_offsets.push(shstrtab.add(&self.sections[id.0 as usize].name));
        }
        name_offsets.push(shstrtab.add(".shstrtab"));
        name_offsets.push(shstrtab.add(".strtab"));
        name_offsets.push(shstrtab.add(".symtab"));
        for (_, _, name, _) in &group_sections {
            name_offsets.push(shstrtab.add(name));
        }
        let shstrtab_data = shstrtab.to_data();
        let strtab_data = strtab.to_data();

        // Layout: header, program header table, program payloads, section
        // header table, section payloads. Program data before section
        // metadata keeps the loadable prefix of the file self-contained.
        let mut offset = codec::elf_header_size(class) as u64;
        self.layout.header_size = codec::elf_header_size(class) as u16;
        self.layout.prog_hdr_entry_size = codec::program_header_size(class) as u16;
        self.layout.prog_hdr_count = self.program_headers.len() as u16;
        self.layout.prog_hdr_offset = if self.program_headers.is_empty() {
            0
        } else {
            let table = offset;
            offset += self.program_headers.len() as u64 * self.layout.prog_hdr_entry_size as u64;
            table
        };
        for ph in &mut self.program_headers {
            ph.offset = offset;
            offset += ph.data.len() as u64;
        }

        self.layout.sec_hdr_entry_size = codec::section_header_size(class) as u16;
        self.layout.sec_hdr_count = total as u16;
        self.layout.sec_hdr_offset = offset;
        offset += total as u64 * self.layout.sec_hdr_entry_size as u64;
        self.layout.sec_hdr_str_index = shstrtab_pos as u16;

        // Section payload offsets, in emission order. NOBITS sections
        // keep their stored size and offset and occupy no file bytes.
        for &id in &self.section_list {
            let section = &mut self.sections[id.0 as usize];
            if section.kind.has_data_in_file() {
                section.size = section.data.len() as u32;
                section.file_offset = offset;
                offset += section.size as u64;
            }
        }
        let shstrtab_offset = offset;
        offset += shstrtab_data.len() as u64;
        let strtab_offset = offset;
        offset += strtab_data.len() as u64;
        let symtab_offset = offset;
        offset += symtab_data.len() as u64;
        let mut group_offsets = Vec::with_capacity(group_sections.len());
        for (_, _, _, data) in &group_sections {
            group_offsets.push(offset);
            offset += data.len() as u64;
        }

        // Identification and file header.
        let mut ident = [0u8; codec::IDENT_LEN];
        ident[0..4].copy_from_slice(&codec::MAGIC);
        ident[4] = class.ident_byte();
        ident[5] = self.endian.ident_byte();
        ident[6] = self.header_version;
        ident[7] = self.abi;
        ident[8] = self.abi_version;
        w.write_all(&ident)?;
        RawElfHeader {
            file_type: self.file_type.0,
            machine: self.machine.0,
            version: self.version,
            entry: self.entry,
            prog_hdr_off: self.layout.prog_hdr_offset,
            sec_hdr_off: self.layout.sec_hdr_offset,
            flags: self.flags,
            header_size: self.layout.header_size,
            prog_hdr_entry_size: self.layout.prog_hdr_entry_size,
            prog_hdr_count: self.layout.prog_hdr_count,
            sec_hdr_entry_size: self.layout.sec_hdr_entry_size,
            sec_hdr_count: self.layout.sec_hdr_count,
            sec_hdr_str_index: self.layout.sec_hdr_str_index,
        }
        .write::<E, _>(w, class)?;

        // Program header table, then program payloads.
        for ph in &self.program_headers {
            RawProgramHeader {
                kind: ph.kind.0,
                flags: ph.flags.bits(),
                offset: ph.offset,
                vaddr: ph.vaddr,
                paddr: ph.paddr,
                file_size: ph.data.len() as u64,
                mem_size: ph.mem_size,
                align: ph.align,
            }
            .write::<E, _>(w, class)?;
        }
        for ph in &self.program_headers {
            w.write_all(&ph.data)?;
        }

        // Section header table. Link/Info are re-derived from resolved
        // handles where present: positions shift as container sections
        // are re-synthesized.
        for (i, &id) in self.section_list.iter().enumerate() {
            let section = &self.sections[id.0 as usize];
            let link = section
                .link_section
                .and_then(|link| section_pos.get(&link))
                .map(|&pos| pos as u32)
                .unwrap_or(section.link);
            let info = section
                .info_section
                .and_then(|info| section_pos.get(&info))
                .map(|&pos| pos as u32)
                .unwrap_or(section.info);
            RawSectionHeader {
                name: name_offsets[i],
                kind: section.kind.0,
                flags: section.flags.bits(),
                addr: section.addr,
                offset: section.file_offset,
                size: section.size,
                link,
                info,
                addr_align: section.addr_align,
                entry_size: section.entry_size,
            }
            .write::<E, _>(w, class)?;
        }
        RawSectionHeader {
            name: name_offsets[shstrtab_pos],
            kind: SectionType::STRTAB.0,
            offset: shstrtab_offset,
            size: shstrtab_data.len() as u32,
            ..RawSectionHeader::default()
        }
        .write::<E, _>(w, class)?;
        RawSectionHeader {
            name: name_offsets[strtab_pos],
            kind: SectionType::STRTAB.0,
            offset: strtab_offset,
            size: strtab_data.len() as u32,
            ..RawSectionHeader::default()
        }
        .write::<E, _>(w, class)?;
        RawSectionHeader {
            name: name_offsets[symtab_pos],
            kind: SectionType::SYMTAB.0,
            offset: symtab_offset,
            size: symtab_data.len() as u32,
            link: strtab_pos as u32,
            info: symtab_info,
            entry_size: codec::symbol_size(class) as u32,
            ..RawSectionHeader::default()
        }
        .write::<E, _>(w, class)?;
        for (k, (target, kind, _, data)) in group_sections.iter().enumerate() {
            RawSectionHeader {
                name: name_offsets[live + 3 + k],
                kind: kind.0,
                offset: group_offsets[k],
                size: data.len() as u32,
                link: symtab_pos as u32,
                info: section_pos[target] as u32,
                entry_size: codec::relocation_size(class, *kind) as u32,
                ..RawSectionHeader::default()
            }
            .write::<E, _>(w, class)?;
        }

        // Section payloads, in the same order as the headers.
        for &id in &self.section_list {
            let section = &self.sections[id.0 as usize];
            if section.kind.has_data_in_file() {
                w.write_all(&section.data)?;
            }
        }
        w.write_all(&shstrtab_data)?;
        w.write_all(&strtab_data)?;
        w.write_all(&symtab_data)?;
        for (_, _, _, data) in &group_sections {
            w.write_all(data)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::super::constants::{
        Class, Endian, FileType, Machine, SectionFlags, SymbolType, SHN_ABS,
    };
    use super::super::types::{Relocation, Section, Symbol};
    use super::*;

    fn base_image() -> (Image, SectionId) {
        let mut image = Image::new(Class::Elf64, Endian::Little);
        image.file_type = FileType::REL;
        image.machine = Machine::I386;
        image.add_section(Section::new("", SectionType::NULL));
        let text = image.add_section(Section::new(".text", SectionType::PROGBITS));
        image.section_mut(text).flags = SectionFlags::ALLOC | SectionFlags::EXECINSTR;
        image.section_mut(text).data = vec![0x90; 8];
        image.section_mut(text).addr_align = 4;
        (image, text)
    }

    fn write_to_vec(image: &mut Image) -> Vec<u8> {
        let mut out = Vec::new();
        image.write(&mut out).unwrap();
        out
    }

    /// Parses the emitted section header table back out of raw bytes.
    fn raw_section_headers(bytes: &[u8], class: Class) -> Vec<RawSectionHeader> {
        let mut cur = Cursor::new(bytes);
        let fh = {
            cur.set_position(codec::IDENT_LEN as u64);
            RawElfHeader::read::<LittleEndian, _>(&mut cur, class).unwrap()
        };
        cur.set_position(fh.sec_hdr_off);
        (0..fh.sec_hdr_count)
            .map(|_| RawSectionHeader::read::<LittleEndian, _>(&mut cur, class).unwrap())
            .collect()
    }

    fn section_name(bytes: &[u8], headers: &[RawSectionHeader], shstrndx: usize, name: u32) -> String {
        let base = headers[shstrndx].offset as usize + name as usize;
        let end = bytes[base..].iter().position(|&b| b == 0).unwrap();
        String::from_utf8_lossy(&bytes[base..base + end]).into_owned()
    }

    #[test]
    fn symbols_sort_locals_first_then_by_name() {
        let (mut image, text) = base_image();
        for (name, binding) in [
            ("zeta", SymbolBinding::GLOBAL),
            ("beta", SymbolBinding::LOCAL),
            ("alpha", SymbolBinding::GLOBAL),
            ("gamma", SymbolBinding::WEAK),
        ] {
            image.add_symbol(Symbol {
                name: name.into(),
                binding,
                section: Some(text),
                ..Symbol::default()
            });
        }
        write_to_vec(&mut image);
        let order: Vec<&str> = image.symbols().map(|s| s.name.as_str()).collect();
        assert_eq!(order, ["beta", "alpha", "zeta", "gamma"]);
    }

    #[test]
    fn symtab_info_is_the_local_count() {
        let (mut image, text) = base_image();
        for (name, binding) in [
            ("a", SymbolBinding::GLOBAL),
            ("b", SymbolBinding::LOCAL),
            ("c", SymbolBinding::LOCAL),
        ] {
            image.add_symbol(Symbol {
                name: name.into(),
                binding,
                section: Some(text),
                ..Symbol::default()
            });
        }
        let bytes = write_to_vec(&mut image);
        let headers = raw_section_headers(&bytes, Class::Elf64);
        let symtab = headers
            .iter()
            .find(|sh| sh.kind == SectionType::SYMTAB.0)
            .unwrap();
        assert_eq!(symtab.info, 2);
    }

    #[test]
    fn symtab_info_with_only_locals_is_the_symbol_count() {
        let (mut image, text) = base_image();
        for name in ["a", "b"] {
            image.add_symbol(Symbol {
                name: name.into(),
                binding: SymbolBinding::LOCAL,
                section: Some(text),
                ..Symbol::default()
            });
        }
        let bytes = write_to_vec(&mut image);
        let headers = raw_section_headers(&bytes, Class::Elf64);
        let symtab = headers
            .iter()
            .find(|sh| sh.kind == SectionType::SYMTAB.0)
            .unwrap();
        assert_eq!(symtab.info, 2);
    }

    #[test]
    fn nonzero_addend_promotes_group_to_rela() {
        let (mut image, text) = base_image();
        let sym = image.add_symbol(Symbol {
            name: "x".into(),
            binding: SymbolBinding::GLOBAL,
            section: Some(text),
            ..Symbol::default()
        });
        image.add_relocation(Relocation {
            section: text,
            symbol: Some(sym),
            offset: 0,
            rel_type: 1,
            addend: 0,
        });
        image.add_relocation(Relocation {
            section: text,
            symbol: Some(sym),
            offset: 4,
            rel_type: 1,
            addend: 4,
        });
        let bytes = write_to_vec(&mut image);
        let headers = raw_section_headers(&bytes, Class::Elf64);
        let fh = {
            let mut cur = Cursor::new(&bytes);
            cur.set_position(codec::IDENT_LEN as u64);
            RawElfHeader::read::<LittleEndian, _>(&mut cur, Class::Elf64).unwrap()
        };

        let rela: Vec<_> = headers
            .iter()
            .filter(|sh| sh.kind == SectionType::RELA.0)
            .collect();
        assert_eq!(rela.len(), 1);
        assert!(!headers.iter().any(|sh| sh.kind == SectionType::REL.0));
        assert_eq!(
            section_name(&bytes, &headers, fh.sec_hdr_str_index as usize, rela[0].name),
            ".rela.text"
        );
        // Info names the patched section, Link the symbol table.
        assert_eq!(rela[0].info, 1);
        assert_eq!(headers[rela[0].link as usize].kind, SectionType::SYMTAB.0);
    }

    #[test]
    fn zero_addend_group_stays_rel() {
        let (mut image, text) = base_image();
        let sym = image.add_symbol(Symbol {
            name: "x".into(),
            binding: SymbolBinding::GLOBAL,
            section: Some(text),
            ..Symbol::default()
        });
        image.add_relocation(Relocation {
            section: text,
            symbol: Some(sym),
            offset: 0,
            rel_type: 1,
            addend: 0,
        });
        let bytes = write_to_vec(&mut image);
        let headers = raw_section_headers(&bytes, Class::Elf64);
        let fh = {
            let mut cur = Cursor::new(&bytes);
            cur.set_position(codec::IDENT_LEN as u64);
            RawElfHeader::read::<LittleEndian, _>(&mut cur, Class::Elf64).unwrap()
        };
        let rel: Vec<_> = headers
            .iter()
            .filter(|sh| sh.kind == SectionType::REL.0)
            .collect();
        assert_eq!(rel.len(), 1);
        assert_eq!(rel[0].entry_size, 16);
        assert_eq!(
            section_name(&bytes, &headers, fh.sec_hdr_str_index as usize, rel[0].name),
            ".rel.text"
        );
    }

    #[test]
    fn reserved_symbol_indices_survive_round_trips() {
        let (mut image, text) = base_image();
        image.add_symbol(Symbol {
            name: "abs".into(),
            kind: SymbolType::OBJECT,
            binding: SymbolBinding::GLOBAL,
            section: None,
            section_index: SHN_ABS,
            value: 0xDEAD,
            ..Symbol::default()
        });
        image.add_symbol(Symbol {
            name: "code".into(),
            kind: SymbolType::FUNC,
            binding: SymbolBinding::GLOBAL,
            section: Some(text),
            ..Symbol::default()
        });

        let bytes = write_to_vec(&mut image);
        let back = Image::read(&mut Cursor::new(bytes)).unwrap();

        let abs = back.symbol(back.symbol_by_name("abs").unwrap());
        assert_eq!(abs.section, None);
        assert_eq!(abs.section_index, SHN_ABS);
        assert_eq!(abs.value, 0xDEAD);

        let code = back.symbol(back.symbol_by_name("code").unwrap());
        let section = code.section.expect("defined symbol resolves to a section");
        assert_eq!(back.section(section).name, ".text");
        assert_eq!(code.section_index, 0);
    }

    #[test]
    fn section_ceiling_is_enforced() {
        let mut image = Image::new(Class::Elf32, Endian::Little);
        for i in 0..MAX_SECTION_COUNT - 2 {
            image.add_section(Section::new(format!("s{}", i), SectionType::PROGBITS));
        }
        let mut out = Vec::new();
        assert!(matches!(
            image.write(&mut out),
            Err(ElfError::TooManySections(_))
        ));
    }

    #[test]
    fn writing_twice_is_deterministic() {
        let (mut image, text) = base_image();
        let sym = image.add_symbol(Symbol {
            name: "f".into(),
            binding: SymbolBinding::GLOBAL,
            section: Some(text),
            ..Symbol::default()
        });
        image.add_relocation(Relocation {
            section: text,
            symbol: Some(sym),
            offset: 2,
            rel_type: 1,
            addend: -4,
        });
        let first = write_to_vec(&mut image);
        let second = write_to_vec(&mut image);
        assert_eq!(first, second);
    }

    #[test]
    fn big_endian_image_round_trips() {
        let mut image = Image::new(Class::Elf32, Endian::Big);
        image.file_type = FileType::REL;
        image.machine = Machine::MIPS;
        image.add_section(Section::new("", SectionType::NULL));
        let text = image.add_section(Section::new(".text", SectionType::PROGBITS));
        image.section_mut(text).data = vec![1, 2, 3, 4];
        image.add_symbol(Symbol {
            name: "entry".into(),
            binding: SymbolBinding::GLOBAL,
            section: Some(text),
            ..Symbol::default()
        });

        let bytes = write_to_vec(&mut image);
        assert_eq!(bytes[5], 2);
        let back = Image::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back.endian, Endian::Big);
        assert_eq!(back.machine, Machine::MIPS);
        let text = back.section_by_name(".text").unwrap();
        assert_eq!(back.section(text).data, vec![1, 2, 3, 4]);
        assert_eq!(back.symbol_count(), 1);
    }
}
