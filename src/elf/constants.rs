//! ELF on-disk constants and flag sets.

use bitflags::bitflags;

/// File class (bit width), identification byte 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

impl Class {
    pub fn is_64(self) -> bool {
        self == Class::Elf64
    }

    pub(crate) fn ident_byte(self) -> u8 {
        match self {
            Class::Elf32 => 1,
            Class::Elf64 => 2,
        }
    }
}

/// Byte order, identification byte 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub(crate) fn ident_byte(self) -> u8 {
        match self {
            Endian::Little => 1,
            Endian::Big => 2,
        }
    }
}

/// Object file type (`e_type`). OS- and processor-specific values pass
/// through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileType(pub u16);

impl FileType {
    pub const NONE: FileType = FileType(0);
    pub const REL: FileType = FileType(1);
    pub const EXEC: FileType = FileType(2);
    pub const DYN: FileType = FileType(3);
    pub const CORE: FileType = FileType(4);
    pub const LO_OS: FileType = FileType(0xFE00);
    pub const HI_OS: FileType = FileType(0xFEFF);
    pub const LO_PROC: FileType = FileType(0xFF00);
    pub const HI_PROC: FileType = FileType(0xFFFF);
}

/// Target machine (`e_machine`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Machine(pub u16);

impl Machine {
    pub const NONE: Machine = Machine(0);
    /// 386-compatible; also used by gcc-ia16 for 8086-compatible targets.
    pub const I386: Machine = Machine(3);
    pub const MIPS: Machine = Machine(8);
    pub const ARM: Machine = Machine(40);
}

// Reserved section header indices.
pub const SHN_UNDEF: u16 = 0;
pub const SHN_LORESERVE: u16 = 0xFF00;
pub const SHN_ABS: u16 = 0xFFF1;
pub const SHN_COMMON: u16 = 0xFFF2;
pub const SHN_XINDEX: u16 = 0xFFFF;

/// Highest section count the writer will emit. Beyond this, the 16-bit
/// header fields would need the XINDEX escape, which is not supported.
pub const MAX_SECTION_COUNT: usize = 65_500;

/// Section type (`sh_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionType(pub u32);

impl SectionType {
    pub const NULL: SectionType = SectionType(0);
    pub const PROGBITS: SectionType = SectionType(1);
    pub const SYMTAB: SectionType = SectionType(2);
    pub const STRTAB: SectionType = SectionType(3);
    pub const RELA: SectionType = SectionType(4);
    pub const HASH: SectionType = SectionType(5);
    pub const DYNAMIC: SectionType = SectionType(6);
    pub const NOTE: SectionType = SectionType(7);
    pub const NOBITS: SectionType = SectionType(8);
    pub const REL: SectionType = SectionType(9);
    pub const SHLIB: SectionType = SectionType(10);
    pub const DYNSYM: SectionType = SectionType(11);
    pub const INIT_ARRAY: SectionType = SectionType(14);
    pub const FINI_ARRAY: SectionType = SectionType(15);
    pub const PREINIT_ARRAY: SectionType = SectionType(16);
    pub const GROUP: SectionType = SectionType(17);
    pub const SYMTAB_SHNDX: SectionType = SectionType(18);

    /// REL and RELA sections use their `Info` field as a section reference.
    pub fn has_section_in_info(self) -> bool {
        self == SectionType::REL || self == SectionType::RELA
    }

    /// NOBITS sections occupy no bytes in the file.
    pub fn has_data_in_file(self) -> bool {
        self != SectionType::NOBITS
    }
}

bitflags! {
    /// Section flags (`sh_flags`). Unknown bits are preserved verbatim.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u32 {
        const WRITE = 0x0000_0001;
        const ALLOC = 0x0000_0002;
        const EXECINSTR = 0x0000_0004;
        const MERGE = 0x0000_0010;
        const STRINGS = 0x0000_0020;
        const INFO_LINK = 0x0000_0040;
        const LINK_ORDER = 0x0000_0080;
        const OS_NONCONFORMING = 0x0000_0100;
        const GROUP = 0x0000_0200;
        const TLS = 0x0000_0400;
        /// Never removed by section garbage collection.
        const GNU_RETAIN = 0x0020_0000;
        const EXCLUDE = 0x8000_0000;

        const _ = !0;
    }
}

/// Symbol type, low nibble of `st_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolType(pub u8);

impl SymbolType {
    pub const NOTYPE: SymbolType = SymbolType(0);
    pub const OBJECT: SymbolType = SymbolType(1);
    pub const FUNC: SymbolType = SymbolType(2);
    pub const SECTION: SymbolType = SymbolType(3);
    pub const FILE: SymbolType = SymbolType(4);
    pub const COMMON: SymbolType = SymbolType(5);
}

/// Symbol binding, high nibble of `st_info`. Locals sort before the rest
/// in an emitted symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolBinding(pub u8);

impl SymbolBinding {
    pub const LOCAL: SymbolBinding = SymbolBinding(0);
    pub const GLOBAL: SymbolBinding = SymbolBinding(1);
    pub const WEAK: SymbolBinding = SymbolBinding(2);
}

/// Program header type (`p_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramHeaderType(pub u32);

impl ProgramHeaderType {
    pub const NULL: ProgramHeaderType = ProgramHeaderType(0);
    pub const LOAD: ProgramHeaderType = ProgramHeaderType(1);
    pub const DYNAMIC: ProgramHeaderType = ProgramHeaderType(2);
    pub const INTERP: ProgramHeaderType = ProgramHeaderType(3);
    pub const NOTE: ProgramHeaderType = ProgramHeaderType(4);
    pub const SHLIB: ProgramHeaderType = ProgramHeaderType(5);
    pub const PHDR: ProgramHeaderType = ProgramHeaderType(6);
    pub const TLS: ProgramHeaderType = ProgramHeaderType(7);
}

bitflags! {
    /// Program header flags (`p_flags`). Unknown bits are preserved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProgramFlags: u32 {
        const X = 0x1;
        const W = 0x2;
        const R = 0x4;

        const _ = !0;
    }
}
