//! Error type for ELF reading and writing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("invalid magic")]
    InvalidMagic,
    #[error("invalid class: {0}")]
    InvalidClass(u8),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("too many sections: {0}")]
    TooManySections(usize),
    #[error("unknown relocation section type: {0}")]
    UnknownRelocationType(u32),
    #[error("malformed object: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ElfError>;
