//! Error types for rekordbox-codec

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, tag or enumeration value.
    #[error("Format error: {0}")]
    Format(String),

    #[error("Truncated {context}: need {needed} bytes, have {available}")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Truncated section {tag} at offset {offset}: declares {declared} bytes, {available} remain")]
    TruncatedSection {
        tag: String,
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Row of {size} bytes cannot fit in an empty page ({capacity} bytes usable)")]
    RowTooLarge { size: usize, capacity: usize },

    #[error("String of {len} bytes exceeds short string limit of {max}")]
    StringTooLong { len: usize, max: usize },

    #[error("Invalid string header 0x{header:02x} at offset {offset}")]
    InvalidStringEncoding { header: u8, offset: usize },

    #[error("Dangling next_page {next_page} from page {page} in table {table}")]
    DanglingReference {
        table: String,
        page: u32,
        next_page: u32,
    },

    #[error("Page chain loop in table {table}: page {page} visited twice")]
    LoopDetected { table: String, page: u32 },

    #[error("Patch length mismatch: stored value is {expected} bytes, replacement is {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<binrw::Error> for Error {
    fn from(e: binrw::Error) -> Self {
        if e.is_eof() {
            Error::Truncated {
                context: "record",
                needed: 0,
                available: 0,
            }
        } else {
            Error::Format(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Fails with [`Error::Truncated`] unless `bytes` holds at least `needed` bytes.
pub(crate) fn ensure_len(bytes: &[u8], needed: usize, context: &'static str) -> Result<()> {
    if bytes.len() < needed {
        return Err(Error::Truncated {
            context,
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}
