//! Tunables for building and validating databases

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::page::flags;

/// Builder and validator options
///
/// Every field has a default, so a JSON document only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Written to the file header `sequence` field
    pub sequence: u32,
    /// Heap alignment of rows on data pages
    pub row_alignment: usize,
    /// `page_flags` for data pages
    pub data_page_flags: u8,
    /// Report rows that no track references
    pub report_unreferenced: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sequence: 1,
            row_alignment: 4,
            data_page_flags: flags::DATA,
            report_unreferenced: true,
        }
    }
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.check()?;
        Ok(options)
    }

    fn check(&self) -> Result<()> {
        if !self.row_alignment.is_power_of_two() {
            return Err(Error::Config(format!(
                "row_alignment must be a power of two, got {}",
                self.row_alignment
            )));
        }
        if self.data_page_flags & 0x40 != 0 {
            return Err(Error::Config(format!(
                "data_page_flags 0x{:02x} marks pages as header pages",
                self.data_page_flags
            )));
        }
        Ok(())
    }
}
