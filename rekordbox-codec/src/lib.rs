//! rekordbox-codec: Pioneer DJ export formats
//!
//! This crate reads and writes:
//! - export.pdb (DeviceSQL database) - little-endian
//! - ANLZ files (.DAT, .EXT, .2EX) - big-endian
//!
//! It works on in-memory buffers only; callers own all file I/O.
//!
//! Based on Deep Symmetry's reverse engineering and rekordcrate's structures.

pub mod anlz;
pub mod config;
pub mod error;
pub mod page;
pub mod pdb;
pub mod row;
pub mod string;
pub mod track;
pub mod validate;

pub use anlz::{AnlzFile, Section, SectionPayload};
pub use config::Options;
pub use error::{Error, Result};
pub use page::{Page, RowRef};
pub use pdb::{PdbBuilder, PdbFile, TableEntry, TableType};
pub use row::{Row, StringField};
pub use track::{Track, TrackString};
pub use validate::{validate, validate_bytes, Issue, IssueKind, Report, Severity};
