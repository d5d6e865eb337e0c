//! ELF object model.
//!
//! [`Image`] is the in-memory form of an object file: identification and
//! header fields, program headers with payloads, a section list, a symbol
//! list, and a relocation map keyed by target section. [`Image::read`]
//! parses a seekable stream and absorbs string tables, the symbol table,
//! and relocation tables into the graph; [`Image::write`] re-synthesizes
//! them (`.shstrtab`, `.strtab`, `.symtab`, `.rel*`/`.rela*`) and emits a
//! complete file. Both 32- and 64-bit classes and both byte orders are
//! handled.

mod codec;
mod constants;
mod error;
mod gc;
mod reader;
mod strtab;
mod types;
mod writer;

pub use constants::*;
pub use error::{ElfError, Result};
pub use strtab::StringTable;
pub use types::{Image, ProgramHeader, Relocation, Section, SectionId, Symbol, SymbolId};
