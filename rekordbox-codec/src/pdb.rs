//! PDB (DeviceSQL) database container
//!
//! The export.pdb file is a little-endian database of 4096-byte pages.
//! Page 0 holds the file header and a directory with one entry per table.
//! Every table is a chain of pages linked through `next_page`: a header
//! page, then data pages in row order, ending at an "empty candidate" page
//! that is either a zeroed page in the file or an id reserved past its end.

use std::collections::HashSet;
use std::fmt;
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Options;
use crate::error::{ensure_len, Error, Result};
use crate::page::{
    table_header_page, Page, PageAllocator, PageIndexAllocator, PageKind, RowRef, HEAP_START,
    PAGE_SIZE,
};
use crate::row::{preset_colors, preset_keys, string_position, Row, StringField};
use crate::string;

/// Number of tables in every export
pub const NUM_TABLES: usize = 20;

/// Offset of the table directory in page 0
pub const DIRECTORY_START: usize = 0x1c;

const TABLE_ENTRY_LEN: usize = 16;

/// Most directory entries page 0 can hold
const MAX_TABLES: usize = (PAGE_SIZE - DIRECTORY_START) / TABLE_ENTRY_LEN;

/// Table types in DeviceSQL, in directory order
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableType {
    Tracks = 0,
    Genres = 1,
    Artists = 2,
    Albums = 3,
    Labels = 4,
    Keys = 5,
    Colors = 6,
    PlaylistTree = 7,
    PlaylistEntries = 8,
    Unknown09 = 9,
    Unknown0A = 10,
    Unknown0B = 11,
    Unknown0C = 12,
    Artwork = 13,
    Unknown0E = 14,
    Unknown0F = 15,
    Columns = 16,
    HistoryPlaylists = 17,
    HistoryEntries = 18,
    History = 19,
}

impl TableType {
    pub const ALL: [TableType; NUM_TABLES] = [
        TableType::Tracks,
        TableType::Genres,
        TableType::Artists,
        TableType::Albums,
        TableType::Labels,
        TableType::Keys,
        TableType::Colors,
        TableType::PlaylistTree,
        TableType::PlaylistEntries,
        TableType::Unknown09,
        TableType::Unknown0A,
        TableType::Unknown0B,
        TableType::Unknown0C,
        TableType::Artwork,
        TableType::Unknown0E,
        TableType::Unknown0F,
        TableType::Columns,
        TableType::HistoryPlaylists,
        TableType::HistoryEntries,
        TableType::History,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TableType::Tracks => "tracks",
            TableType::Genres => "genres",
            TableType::Artists => "artists",
            TableType::Albums => "albums",
            TableType::Labels => "labels",
            TableType::Keys => "keys",
            TableType::Colors => "colors",
            TableType::PlaylistTree => "playlist_tree",
            TableType::PlaylistEntries => "playlist_entries",
            TableType::Unknown09 => "unknown_09",
            TableType::Unknown0A => "unknown_0a",
            TableType::Unknown0B => "unknown_0b",
            TableType::Unknown0C => "unknown_0c",
            TableType::Artwork => "artwork",
            TableType::Unknown0E => "unknown_0e",
            TableType::Unknown0F => "unknown_0f",
            TableType::Columns => "columns",
            TableType::HistoryPlaylists => "history_playlists",
            TableType::HistoryEntries => "history_entries",
            TableType::History => "history",
        }
    }
}

impl TryFrom<u32> for TableType {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        TableType::ALL
            .get(raw as usize)
            .copied()
            .ok_or_else(|| Error::Format(format!("unknown table type {}", raw)))
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Directory entry locating one table's page chain
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableEntry {
    pub table_type: u32,
    pub empty_candidate: u32,
    pub first_page: u32,
    pub last_page: u32,
}

impl TableEntry {
    pub fn table(&self) -> Result<TableType> {
        TableType::try_from(self.table_type)
    }

    fn label(&self) -> String {
        match self.table() {
            Ok(table) => table.name().to_string(),
            Err(_) => format!("type_{}", self.table_type),
        }
    }
}

/// File header stored at the start of page 0
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// Always 0
    pub unknown0: u32,
    pub page_size: u32,
    pub num_tables: u32,
    pub next_unused_page: u32,
    pub unknown1: u32,
    /// Bumped on every save
    pub sequence: u32,
    /// Always 0
    pub gap: u32,
    #[br(count = num_tables)]
    pub tables: Vec<TableEntry>,
}

impl FileHeader {
    /// Parse page 0. Fails on a page size other than 4096 or a directory
    /// that would run past the page.
    pub fn parse(page: &[u8]) -> Result<Self> {
        ensure_len(page, PAGE_SIZE, "file header page")?;
        let u32_at = |pos: usize| u32::from_le_bytes([page[pos], page[pos + 1], page[pos + 2], page[pos + 3]]);

        let page_size = u32_at(4);
        if page_size as usize != PAGE_SIZE {
            return Err(Error::Format(format!(
                "page_size is {}, expected {}",
                page_size, PAGE_SIZE
            )));
        }
        let num_tables = u32_at(8) as usize;
        if num_tables > MAX_TABLES {
            return Err(Error::Format(format!(
                "num_tables {} does not fit in the header page (max {})",
                num_tables, MAX_TABLES
            )));
        }

        Ok(Self::read(&mut Cursor::new(&page[..PAGE_SIZE]))?)
    }

    /// Encode as a full page.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(PAGE_SIZE));
        self.write(&mut cursor)?;
        let mut page = cursor.into_inner();
        assert!(page.len() <= PAGE_SIZE, "table directory overflows page 0");
        page.resize(PAGE_SIZE, 0);
        Ok(page)
    }
}

/// Pages visited while following a table chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    /// Page indices in chain order, header page first
    pub pages: Vec<u32>,
    /// False when the walk hit the empty candidate or a reserved page
    /// before reaching `last_page`
    pub complete: bool,
}

/// A row found while scanning a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub location: RowRef,
    pub row: Row,
    /// Set when the row failed to decode and `row` is a placeholder
    pub damage: Option<String>,
}

/// A decoded export.pdb
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdbFile {
    header: FileHeader,
    /// Raw page 0, written back unchanged
    header_page: Vec<u8>,
    /// Pages 1.., so `pages[i]` is page `i + 1`
    pages: Vec<Page>,
}

impl PdbFile {
    /// Decode a whole file. The file header and page headers must be sound;
    /// rows are only decoded on demand.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, PAGE_SIZE, "pdb file")?;
        if bytes.len() % PAGE_SIZE != 0 {
            return Err(Error::Format(format!(
                "file length {} is not a multiple of {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }

        let header = FileHeader::parse(&bytes[..PAGE_SIZE])?;
        let pages = bytes[PAGE_SIZE..]
            .chunks_exact(PAGE_SIZE)
            .map(Page::decode)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            pages = pages.len() + 1,
            tables = header.num_tables,
            sequence = header.sequence,
            "decoded pdb"
        );
        Ok(Self {
            header,
            header_page: bytes[..PAGE_SIZE].to_vec(),
            pages,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.page_count() as usize * PAGE_SIZE);
        out.extend_from_slice(&self.header_page);
        for page in &self.pages {
            out.extend_from_slice(page.as_bytes());
        }
        out
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Pages in the file, counting page 0
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32 + 1
    }

    pub fn page(&self, index: u32) -> Result<&Page> {
        index
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
            .ok_or_else(|| Error::OutOfRange(format!("page {} is not a table page", index)))
    }

    fn page_mut(&mut self, index: u32) -> Result<&mut Page> {
        index
            .checked_sub(1)
            .and_then(|i| self.pages.get_mut(i as usize))
            .ok_or_else(|| Error::OutOfRange(format!("page {} is not a table page", index)))
    }

    /// Pages after page 0, in file order
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }

    pub fn table(&self, table: TableType) -> Option<&TableEntry> {
        self.header
            .tables
            .iter()
            .find(|entry| entry.table_type == table as u32)
    }

    fn is_reserved(&self, index: u32) -> bool {
        index >= self.page_count() && index < self.header.next_unused_page
    }

    /// Follow a table chain from `first_page` to `last_page`.
    pub fn traverse(&self, entry: &TableEntry) -> Result<Chain> {
        let mut visited = HashSet::new();
        let mut pages = Vec::new();
        let mut previous = 0;
        let mut current = entry.first_page;

        loop {
            if current == entry.empty_candidate && current != entry.last_page {
                return Ok(Chain {
                    pages,
                    complete: false,
                });
            }
            if self.page(current).is_err() {
                if self.is_reserved(current) {
                    return Ok(Chain {
                        pages,
                        complete: false,
                    });
                }
                return Err(Error::DanglingReference {
                    table: entry.label(),
                    page: previous,
                    next_page: current,
                });
            }
            if !visited.insert(current) {
                return Err(Error::LoopDetected {
                    table: entry.label(),
                    page: current,
                });
            }

            pages.push(current);
            if current == entry.last_page {
                return Ok(Chain {
                    pages,
                    complete: true,
                });
            }
            previous = current;
            current = self.page(current)?.next_page();
        }
    }

    /// Decode every row of `table` in chain order.
    ///
    /// Chain errors abort the scan. A row that fails to decode is returned
    /// as a placeholder carrying the failure.
    pub fn table_rows(&self, table: TableType) -> Result<Vec<TableRow>> {
        let entry = self
            .table(table)
            .ok_or_else(|| Error::OutOfRange(format!("no directory entry for {}", table)))?;
        let chain = self.traverse(entry)?;

        let mut rows = Vec::new();
        for index in chain.pages {
            let page = self.page(index)?;
            if page.kind() != PageKind::Data {
                continue;
            }
            for (offset, bytes) in page.rows()? {
                let location = RowRef { page: index, offset };
                match bytes.and_then(|bytes| Row::decode(table, bytes)) {
                    Ok(row) => rows.push(TableRow {
                        location,
                        row,
                        damage: None,
                    }),
                    Err(e) => {
                        warn!(%table, page = index, offset, error = %e, "damaged row");
                        rows.push(TableRow {
                            location,
                            row: Row::placeholder(table),
                            damage: Some(e.to_string()),
                        });
                    }
                }
            }
        }
        Ok(rows)
    }

    pub fn row(&self, at: RowRef) -> Result<Row> {
        let page = self.page(at.page)?;
        Row::decode(page.header().table()?, page.row_bytes(at.offset)?)
    }

    /// Overwrite one stored string without moving anything.
    ///
    /// The new value is encoded in the variant the stored value uses, with
    /// the closing NUL kept when the stored payload has one, and must come
    /// out exactly as long.
    pub fn patch_in_place(&mut self, at: RowRef, field: StringField, value: &str) -> Result<()> {
        let page = self.page(at.page)?;
        let table = page.header().table()?;
        let row = page.row_bytes(at.offset)?;

        let position = string_position(table, row, field)?;
        let stored = string::decode(row, position)?;
        let encoded = string::encode_like(&stored, value)?;
        if encoded.len() != stored.consumed {
            return Err(Error::LengthMismatch {
                expected: stored.consumed,
                actual: encoded.len(),
            });
        }

        let start = HEAP_START + at.offset as usize + position;
        self.page_mut(at.page)?.bytes_mut()[start..start + encoded.len()].copy_from_slice(&encoded);
        debug!(%table, page = at.page, offset = at.offset, ?field, "patched string");
        Ok(())
    }
}

/// Builds a complete database from rows
///
/// Rows keep the order they were added in; that order decides their page
/// and slot, so it is part of the output.
#[derive(Debug, Clone, Default)]
pub struct PdbBuilder {
    options: Options,
    tables: [Vec<Row>; NUM_TABLES],
}

struct PendingTable {
    table: TableType,
    header_page: u32,
    data: Option<PageAllocator>,
    empty_page: Option<u32>,
}

impl PdbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Start from every readable row of an existing file, stamping the next
    /// sequence number. Damaged rows are dropped.
    pub fn from_pdb(file: &PdbFile, options: Options) -> Result<Self> {
        let mut builder = Self::with_options(Options {
            sequence: file.header().sequence.wrapping_add(1),
            ..options
        });
        for table in TableType::ALL {
            if file.table(table).is_none() {
                continue;
            }
            for entry in file.table_rows(table)? {
                match entry.damage {
                    None => builder.add_row(entry.row),
                    Some(damage) => warn!(%table, page = entry.location.page, %damage, "dropping damaged row"),
                }
            }
        }
        Ok(builder)
    }

    pub fn add_row(&mut self, row: impl Into<Row>) {
        let row = row.into();
        self.tables[row.table_type() as usize].push(row);
    }

    pub fn add_rows<R: Into<Row>>(&mut self, rows: impl IntoIterator<Item = R>) {
        for row in rows {
            self.add_row(row);
        }
    }

    /// Add the preset color and key rows every export carries.
    pub fn add_preset_lookups(&mut self) {
        self.add_rows(preset_colors());
        self.add_rows(preset_keys());
    }

    pub fn rows(&self, table: TableType) -> &[Row] {
        &self.tables[table as usize]
    }

    pub fn build(&self) -> Result<PdbFile> {
        let mut indices = PageIndexAllocator::starting_at(1);
        let mut pending = Vec::with_capacity(NUM_TABLES);

        for table in TableType::ALL {
            let header_page = indices.allocate();
            let rows = &self.tables[table as usize];
            if rows.is_empty() {
                pending.push(PendingTable {
                    table,
                    header_page,
                    data: None,
                    empty_page: Some(indices.allocate()),
                });
                continue;
            }

            let mut allocator = PageAllocator::new(table, &self.options);
            for (position, row) in rows.iter().enumerate() {
                let mut row = row.clone();
                row.set_index_shift(position);
                allocator.append(&row.encode()?, &mut indices)?;
            }
            debug!(%table, rows = rows.len(), "laid out table");
            pending.push(PendingTable {
                table,
                header_page,
                data: Some(allocator),
                empty_page: None,
            });
        }

        let file_pages = indices.next_index();
        let mut next_reserved = file_pages;
        let mut pages = Vec::with_capacity(file_pages as usize);
        let mut entries = Vec::with_capacity(NUM_TABLES);

        for PendingTable {
            table,
            header_page,
            data,
            empty_page,
        } in pending
        {
            match (data, empty_page) {
                (Some(allocator), _) => {
                    let empty_candidate = next_reserved;
                    next_reserved += 1;
                    let first = allocator.first_page().unwrap_or(empty_candidate);
                    let data_pages = allocator.finish(empty_candidate)?;
                    let last = data_pages.last().map(Page::index).unwrap_or(header_page);

                    pages.push(table_header_page(header_page, table, first, Some(first))?);
                    pages.extend(data_pages);
                    entries.push(TableEntry {
                        table_type: table as u32,
                        empty_candidate,
                        first_page: header_page,
                        last_page: last,
                    });
                }
                (None, empty) => {
                    let empty_candidate = empty.unwrap_or(next_reserved);
                    pages.push(table_header_page(header_page, table, empty_candidate, None)?);
                    pages.push(Page::zeroed());
                    entries.push(TableEntry {
                        table_type: table as u32,
                        empty_candidate,
                        first_page: header_page,
                        last_page: header_page,
                    });
                }
            }
        }
        assert_eq!(pages.len() as u32 + 1, file_pages, "page layout out of step with indices");

        let header = FileHeader {
            unknown0: 0,
            page_size: PAGE_SIZE as u32,
            num_tables: NUM_TABLES as u32,
            next_unused_page: next_reserved,
            unknown1: 0,
            sequence: self.options.sequence,
            gap: 0,
            tables: entries,
        };
        debug!(
            pages = file_pages,
            next_unused_page = next_reserved,
            sequence = header.sequence,
            "built pdb"
        );
        Ok(PdbFile {
            header_page: header.encode()?,
            header,
            pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::flags;
    use crate::row::{Artist, Genre};
    use crate::track::{Track, TrackString};

    fn small_library() -> PdbBuilder {
        let mut builder = PdbBuilder::new();
        builder.add_row(Artist { id: 1, name: "Artist".into(), ..Artist::default() });
        builder.add_row(Genre { id: 1, name: "Techno".into() });
        builder.add_row(
            Track { id: 1, artist_id: 1, genre_id: 1, tempo: 12800, ..Track::default() }
                .with_string(TrackString::Title, "First"),
        );
        builder
    }

    #[test]
    fn test_table_type_conversion() {
        assert_eq!(TableType::try_from(13).unwrap(), TableType::Artwork);
        assert_eq!(TableType::try_from(19).unwrap(), TableType::History);
        assert!(matches!(TableType::try_from(20), Err(Error::Format(_))));
        assert_eq!(TableType::PlaylistEntries.to_string(), "playlist_entries");
    }

    #[test]
    fn test_empty_build_layout() {
        let file = PdbBuilder::new().build().unwrap();

        // Header page plus empty candidate per table
        assert_eq!(file.page_count(), 1 + 2 * NUM_TABLES as u32);
        assert_eq!(file.header().next_unused_page, file.page_count());

        let tracks = file.table(TableType::Tracks).unwrap();
        assert_eq!(tracks.first_page, 1);
        assert_eq!(tracks.last_page, 1);
        assert_eq!(tracks.empty_candidate, 2);
        assert_eq!(file.page(1).unwrap().next_page(), 2);
        assert_eq!(file.page(2).unwrap().kind(), PageKind::Empty);
    }

    #[test]
    fn test_populated_table_chain() {
        let file = small_library().build().unwrap();
        let tracks = *file.table(TableType::Tracks).unwrap();

        assert_eq!(tracks.first_page, 1);
        assert_eq!(tracks.last_page, 2);
        assert!(tracks.empty_candidate >= file.page_count());

        let header = file.page(1).unwrap();
        assert_eq!(header.header().page_flags, flags::HEADER);
        assert_eq!(header.next_page(), 2);

        let data = file.page(2).unwrap();
        assert_eq!(data.header().page_flags, flags::DATA);
        assert_eq!(data.next_page(), tracks.empty_candidate);

        let chain = file.traverse(&tracks).unwrap();
        assert_eq!(chain.pages, vec![1, 2]);
        assert!(chain.complete);
    }

    #[test]
    fn test_reserved_pages_counted() {
        let file = small_library().build().unwrap();
        // Tracks, Genres and Artists each reserve one id past the file end
        assert_eq!(file.header().next_unused_page, file.page_count() + 3);
    }

    #[test]
    fn test_decode_encode_identity() {
        let file = small_library().build().unwrap();
        let bytes = file.encode();
        assert_eq!(bytes.len() % PAGE_SIZE, 0);

        let decoded = PdbFile::decode(&bytes).unwrap();
        assert_eq!(decoded.encode(), bytes);
        assert_eq!(decoded.header().num_tables, 20);
        assert_eq!(decoded.header().sequence, 1);
    }

    #[test]
    fn test_table_rows_in_order() {
        let mut builder = PdbBuilder::new();
        for id in 1..=40 {
            builder.add_row(Genre { id, name: format!("Genre {}", id) });
        }
        let file = builder.build().unwrap();

        let rows = file.table_rows(TableType::Genres).unwrap();
        assert_eq!(rows.len(), 40);
        let ids: Vec<u32> = rows.iter().filter_map(|r| r.row.id()).collect();
        assert_eq!(ids, (1..=40).collect::<Vec<_>>());
        assert!(rows.iter().all(|r| r.damage.is_none()));
        assert_eq!(file.row(rows[5].location).unwrap(), rows[5].row);
    }

    #[test]
    fn test_index_shift_assigned() {
        let mut builder = PdbBuilder::new();
        for id in 1..=3 {
            builder.add_row(Artist { id, name: "A".into(), ..Artist::default() });
        }
        let file = builder.build().unwrap();
        let rows = file.table_rows(TableType::Artists).unwrap();

        match &rows[2].row {
            Row::Artist(artist) => assert_eq!(artist.index_shift, 0x40),
            other => panic!("unexpected row {:?}", other),
        }
    }

    #[test]
    fn test_sequence_from_options() {
        let file = PdbBuilder::with_options(Options { sequence: 9, ..Options::default() })
            .build()
            .unwrap();
        assert_eq!(file.header().sequence, 9);

        let rebuilt = PdbBuilder::from_pdb(&file, Options::default()).unwrap().build().unwrap();
        assert_eq!(rebuilt.header().sequence, 10);
    }

    #[test]
    fn test_rebuild_keeps_rows() {
        let mut builder = small_library();
        builder.add_preset_lookups();
        let file = builder.build().unwrap();

        let rebuilt = PdbBuilder::from_pdb(&file, Options::default()).unwrap();
        assert_eq!(rebuilt.rows(TableType::Keys).len(), 24);
        assert_eq!(rebuilt.rows(TableType::Colors).len(), 8);
        assert_eq!(rebuilt.rows(TableType::Tracks).len(), 1);
    }

    #[test]
    fn test_decode_rejects_bad_sizes() {
        assert!(matches!(PdbFile::decode(&[0u8; 100]), Err(Error::Truncated { .. })));

        let mut bytes = PdbBuilder::new().build().unwrap().encode();
        bytes.push(0);
        assert!(matches!(PdbFile::decode(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        let mut bytes = PdbBuilder::new().build().unwrap().encode();
        bytes[4..8].copy_from_slice(&2048u32.to_le_bytes());
        assert!(matches!(PdbFile::decode(&bytes), Err(Error::Format(_))));

        let mut bytes = PdbBuilder::new().build().unwrap().encode();
        bytes[8..12].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(PdbFile::decode(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_traverse_loop_detected() {
        let file = small_library().build().unwrap();
        let mut bytes = file.encode();
        // Point the tracks data page back at the tracks header page
        let data_page = 2 * PAGE_SIZE;
        bytes[data_page + 12..data_page + 16].copy_from_slice(&1u32.to_le_bytes());
        // and move last_page out of reach
        let mut file = PdbFile::decode(&bytes).unwrap();
        file.header.tables[0].last_page = 99;

        let entry = *file.table(TableType::Tracks).unwrap();
        assert!(matches!(
            file.traverse(&entry),
            Err(Error::LoopDetected { page: 1, .. })
        ));
    }

    #[test]
    fn test_traverse_dangling() {
        let file = small_library().build().unwrap();
        let mut bytes = file.encode();
        bytes[PAGE_SIZE + 12..PAGE_SIZE + 16].copy_from_slice(&5000u32.to_le_bytes());
        let file = PdbFile::decode(&bytes).unwrap();

        let entry = *file.table(TableType::Tracks).unwrap();
        assert!(matches!(
            file.traverse(&entry),
            Err(Error::DanglingReference { page: 1, next_page: 5000, .. })
        ));
    }

    #[test]
    fn test_patch_in_place() {
        let mut file = small_library().build().unwrap();
        let at = file.table_rows(TableType::Genres).unwrap()[0].location;

        file.patch_in_place(at, StringField::Name, "Trance").unwrap();
        assert_eq!(file.row(at).unwrap(), Row::Genre(Genre { id: 1, name: "Trance".into() }));

        let err = file.patch_in_place(at, StringField::Name, "House").unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { expected: 7, actual: 6 }));
    }

    #[test]
    fn test_patch_keeps_closing_nul() {
        let mut builder = PdbBuilder::new();
        builder.add_row(Genre { id: 1, name: "abc\0".into() });
        let mut file = builder.build().unwrap();
        let at = file.table_rows(TableType::Genres).unwrap()[0].location;
        assert_eq!(file.row(at).unwrap(), Row::Genre(Genre { id: 1, name: "abc".into() }));

        file.patch_in_place(at, StringField::Name, "xyz").unwrap();
        assert_eq!(file.row(at).unwrap(), Row::Genre(Genre { id: 1, name: "xyz".into() }));
        let row = file.page(at.page).unwrap().row_bytes(at.offset).unwrap();
        assert_eq!(&row[4..9], &[0x0b, b'x', b'y', b'z', 0x00]);
    }

    #[test]
    fn test_opaque_row_keeps_padding() {
        let mut builder = PdbBuilder::new();
        builder.add_row(Row::Opaque { table: TableType::Unknown09, bytes: vec![1, 2, 3] });
        let file = builder.build().unwrap();

        let rows = file.table_rows(TableType::Unknown09).unwrap();
        assert_eq!(
            rows[0].row,
            Row::Opaque { table: TableType::Unknown09, bytes: vec![1, 2, 3, 0] }
        );
    }

    #[test]
    fn test_traverse_stops_at_reserved_page() {
        let file = small_library().build().unwrap();
        let reserved = file.page_count();
        assert!(reserved < file.header().next_unused_page);

        let mut bytes = file.encode();
        bytes[PAGE_SIZE + 12..PAGE_SIZE + 16].copy_from_slice(&reserved.to_le_bytes());
        let file = PdbFile::decode(&bytes).unwrap();

        let entry = *file.table(TableType::Tracks).unwrap();
        let chain = file.traverse(&entry).unwrap();
        assert_eq!(chain.pages, vec![1]);
        assert!(!chain.complete);
    }

    #[test]
    fn test_traverse_stops_at_empty_candidate() {
        let mut file = PdbBuilder::new().build().unwrap();
        // The header page already points at the in-file empty candidate
        file.header.tables[0].last_page = 5;

        let entry = *file.table(TableType::Tracks).unwrap();
        assert_eq!(entry.empty_candidate, 2);
        let chain = file.traverse(&entry).unwrap();
        assert_eq!(chain.pages, vec![1]);
        assert!(!chain.complete);
    }

    #[test]
    fn test_patch_track_string() {
        let mut file = small_library().build().unwrap();
        let at = file.table_rows(TableType::Tracks).unwrap()[0].location;

        file.patch_in_place(at, StringField::Track(TrackString::Title), "Final").unwrap();
        match file.row(at).unwrap() {
            Row::Track(track) => assert_eq!(track.title(), Some("Final")),
            other => panic!("unexpected row {:?}", other),
        }

        let err = file
            .patch_in_place(at, StringField::Track(TrackString::Comment), "x")
            .unwrap_err();
        assert!(matches!(err, Error::OutOfRange(_)));
    }
}
