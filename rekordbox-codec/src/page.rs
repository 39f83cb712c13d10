//! Page allocation for Pioneer DeviceSQL databases
//!
//! Pages are 4096 bytes with:
//! - Fixed header at offset 0x00-0x27
//! - Heap growing forward from offset 0x28
//! - Row groups growing backward from page end
//!
//! Row group structure (group 0 ends at the last byte of the page, each
//! following group sits directly in front of the previous one):
//! - n × 2-byte heap offsets, highest slot first
//! - 2 bytes presence flags (bit i set when slot i holds a row)
//! - 2 bytes "unknown" padding derived from the flags
//!
//! A group holds `n = min(16, rows left)` slots, so the footer for N rows
//! takes `sum(n × 2 + 4)` bytes rather than a fixed 36 per group.

use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Options;
use crate::error::{ensure_len, Error, Result};
use crate::pdb::TableType;

/// Page size in bytes (always 4096 for Pioneer databases)
pub const PAGE_SIZE: usize = 4096;

/// Offset where heap data begins
pub const HEAP_START: usize = 0x28;

/// Maximum rows per group
pub const ROWS_PER_GROUP: usize = 16;

/// Largest row group block: 16 offsets + flags + unknown
pub const MAX_ROW_GROUP_SIZE: usize = ROWS_PER_GROUP * 2 + 4;

/// `num_rows_large` value seen on some reference pages instead of a count
pub const NUM_ROWS_MARKER: u16 = 0x1fff;

/// Page id meaning "no page" inside table header pages
pub const NO_PAGE: u32 = 0x03ff_ffff;

/// Page flag values observed in exports
pub mod flags {
    pub const EMPTY: u8 = 0x00;
    pub const DATA: u8 = 0x24;
    pub const DATA_ALT: u8 = 0x34;
    pub const HEADER_ALT: u8 = 0x44;
    pub const HEADER: u8 = 0x64;

    pub const KNOWN: [u8; 5] = [EMPTY, DATA, DATA_ALT, HEADER_ALT, HEADER];
}

/// Role of a page in its table chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageKind {
    Data,
    Header,
    Empty,
}

impl PageKind {
    pub fn from_flags(page_flags: u8) -> Self {
        if page_flags == flags::EMPTY {
            PageKind::Empty
        } else if page_flags & 0x40 != 0 {
            PageKind::Header
        } else {
            PageKind::Data
        }
    }
}

/// 40-byte header at the start of every page after page 0
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageHeader {
    /// Always 0
    pub gap: u32,
    pub page_index: u32,
    pub table_type: u32,
    pub next_page: u32,
    /// 1 on every page the exporter writes
    pub unknown1: u32,
    pub unknown2: u32,
    /// Row count modulo 256
    pub num_rows_small: u8,
    pub unknown3: u8,
    pub unknown4: u8,
    pub page_flags: u8,
    /// Heap bytes left before the row group footer
    pub free_size: u16,
    /// Heap bytes consumed by rows
    pub used_size: u16,
    pub unknown5: u16,
    /// Row count minus one, or [`NUM_ROWS_MARKER`]
    pub num_rows_large: u16,
    pub unknown6: u16,
    pub unknown7: u16,
}

impl PageHeader {
    pub fn parse(page: &[u8]) -> Result<Self> {
        ensure_len(page, HEAP_START, "page header")?;
        Ok(Self::read(&mut Cursor::new(&page[..HEAP_START]))?)
    }

    pub fn encode_into(&self, page: &mut [u8]) -> Result<()> {
        self.write(&mut Cursor::new(&mut page[..HEAP_START]))?;
        Ok(())
    }

    pub fn kind(&self) -> PageKind {
        PageKind::from_flags(self.page_flags)
    }

    pub fn table(&self) -> Result<TableType> {
        TableType::try_from(self.table_type)
    }

    /// Number of row slots on the page.
    ///
    /// `num_rows_small` wraps at 256, so `num_rows_large` wins when it is a
    /// real count that agrees with it modulo 256.
    pub fn row_count(&self) -> usize {
        let small = self.num_rows_small as usize;
        let large = self.num_rows_large as usize + 1;
        if self.num_rows_large != NUM_ROWS_MARKER && large > 0xff && large % 256 == small {
            large
        } else {
            small
        }
    }
}

/// `(num_rows_small, num_rows_large)` for a page holding `count` rows.
pub fn row_count_fields(count: usize) -> (u8, u16) {
    ((count % 256) as u8, count.saturating_sub(1) as u16)
}

/// Slot count of each row group, group 0 first.
pub fn group_slot_counts(num_rows: usize) -> impl Iterator<Item = usize> {
    (0..num_rows.div_ceil(ROWS_PER_GROUP)).map(move |g| (num_rows - g * ROWS_PER_GROUP).min(ROWS_PER_GROUP))
}

/// Bytes taken by the row group footer of a page with `num_rows` rows.
pub fn footer_size(num_rows: usize) -> usize {
    group_slot_counts(num_rows).map(|n| n * 2 + 4).sum()
}

/// Heap bytes available on a page holding `num_rows` rows.
pub fn heap_capacity(num_rows: usize) -> usize {
    (PAGE_SIZE - HEAP_START).saturating_sub(footer_size(num_rows))
}

/// Up to 16 row slots with their presence flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowGroup {
    /// Heap offset per slot, slot 0 first
    pub offsets: Vec<u16>,
    pub flags: u16,
    pub unknown: u16,
}

impl RowGroup {
    /// Group with every slot present.
    pub fn full(offsets: Vec<u16>) -> Self {
        let flags = match offsets.len() {
            ROWS_PER_GROUP => u16::MAX,
            n => (1u16 << n) - 1,
        };
        Self::with_flags(offsets, flags)
    }

    pub fn with_flags(offsets: Vec<u16>, flags: u16) -> Self {
        assert!(offsets.len() <= ROWS_PER_GROUP, "row group holds at most 16 slots");
        Self {
            offsets,
            flags,
            unknown: Self::derived_unknown(flags),
        }
    }

    /// Padding value stored after the flags: 0 for a full or empty group,
    /// otherwise the bit of the highest present slot.
    pub fn derived_unknown(flags: u16) -> u16 {
        match flags {
            0 | u16::MAX => 0,
            f => 1 << (15 - f.leading_zeros()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.offsets.len() * 2 + 4
    }

    pub fn is_present(&self, slot: usize) -> bool {
        slot < ROWS_PER_GROUP && self.flags & (1 << slot) != 0
    }

    pub fn present_offsets(&self) -> impl Iterator<Item = u16> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .filter(|(slot, _)| self.is_present(*slot))
            .map(|(_, offset)| *offset)
    }

    fn write_block(&self, block: &mut [u8]) {
        let n = self.offsets.len();
        for (i, offset) in self.offsets.iter().rev().enumerate() {
            block[i * 2..i * 2 + 2].copy_from_slice(&offset.to_le_bytes());
        }
        block[n * 2..n * 2 + 2].copy_from_slice(&self.flags.to_le_bytes());
        block[n * 2 + 2..n * 2 + 4].copy_from_slice(&self.unknown.to_le_bytes());
    }

    fn read_block(block: &[u8], slots: usize) -> Self {
        let u16_at = |pos: usize| u16::from_le_bytes([block[pos], block[pos + 1]]);
        Self {
            offsets: (0..slots).map(|slot| u16_at((slots - 1 - slot) * 2)).collect(),
            flags: u16_at(slots * 2),
            unknown: u16_at(slots * 2 + 2),
        }
    }
}

fn write_row_groups(page: &mut [u8], groups: &[RowGroup]) {
    let mut end = PAGE_SIZE;
    for group in groups {
        let start = end - group.block_size();
        group.write_block(&mut page[start..end]);
        end = start;
    }
}

/// Location of a row: page index plus heap offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRef {
    pub page: u32,
    pub offset: u16,
}

/// A complete 4096-byte page. The raw bytes are authoritative; the header
/// is parsed once on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    header: PageHeader,
    bytes: Vec<u8>,
}

impl Page {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, PAGE_SIZE, "page")?;
        let bytes = bytes[..PAGE_SIZE].to_vec();
        Ok(Self {
            header: PageHeader::parse(&bytes)?,
            bytes,
        })
    }

    /// All-zero page, used for in-file empty candidates.
    pub fn zeroed() -> Self {
        Self {
            header: PageHeader::default(),
            bytes: vec![0u8; PAGE_SIZE],
        }
    }

    fn from_parts(header: PageHeader, mut bytes: Vec<u8>) -> Result<Self> {
        assert_eq!(bytes.len(), PAGE_SIZE, "page must be exactly one page long");
        header.encode_into(&mut bytes)?;
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn index(&self) -> u32 {
        self.header.page_index
    }

    pub fn next_page(&self) -> u32 {
        self.header.next_page
    }

    pub fn kind(&self) -> PageKind {
        self.header.kind()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn row_count(&self) -> usize {
        self.header.row_count()
    }

    /// Heap bytes covered by `used_size`.
    pub fn heap(&self) -> &[u8] {
        let used = (self.header.used_size as usize).min(PAGE_SIZE - HEAP_START);
        &self.bytes[HEAP_START..HEAP_START + used]
    }

    pub fn row_groups(&self) -> Result<Vec<RowGroup>> {
        let num_rows = self.row_count();
        let footer = footer_size(num_rows);
        if footer > PAGE_SIZE - HEAP_START {
            return Err(Error::OutOfRange(format!(
                "page {}: footer for {} rows ({} bytes) does not fit",
                self.index(),
                num_rows,
                footer
            )));
        }

        let mut end = PAGE_SIZE;
        let groups = group_slot_counts(num_rows)
            .map(|slots| {
                let start = end - (slots * 2 + 4);
                let group = RowGroup::read_block(&self.bytes[start..end], slots);
                end = start;
                group
            })
            .collect();
        Ok(groups)
    }

    /// Heap offsets of present rows in slot order.
    pub fn row_offsets(&self) -> Result<Vec<u16>> {
        Ok(self
            .row_groups()?
            .iter()
            .flat_map(|group| group.present_offsets().collect::<Vec<_>>())
            .collect())
    }

    /// Every present row with its heap extent. A row runs up to the next
    /// higher row offset or the end of the used heap.
    pub fn rows(&self) -> Result<Vec<(u16, Result<&[u8]>)>> {
        let offsets = self.row_offsets()?;
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        sorted.dedup();

        Ok(offsets
            .iter()
            .map(|&offset| (offset, self.extent(&sorted, offset)))
            .collect())
    }

    pub fn row_bytes(&self, offset: u16) -> Result<&[u8]> {
        let offsets = self.row_offsets()?;
        if !offsets.contains(&offset) {
            return Err(Error::OutOfRange(format!(
                "page {} has no row at heap offset {}",
                self.index(),
                offset
            )));
        }
        let mut sorted = offsets;
        sorted.sort_unstable();
        self.extent(&sorted, offset)
    }

    fn extent(&self, sorted: &[u16], offset: u16) -> Result<&[u8]> {
        let heap = self.heap();
        let start = offset as usize;
        if start >= heap.len() {
            return Err(Error::OutOfRange(format!(
                "page {}: row offset {} beyond used heap of {} bytes",
                self.index(),
                offset,
                heap.len()
            )));
        }
        let end = sorted
            .iter()
            .map(|&o| o as usize)
            .find(|&o| o > start)
            .unwrap_or(heap.len())
            .min(heap.len());
        Ok(&heap[start..end])
    }
}

/// Hands out page indices in file order
#[derive(Debug, Clone)]
pub struct PageIndexAllocator {
    next: u32,
}

impl PageIndexAllocator {
    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    pub fn allocate(&mut self) -> u32 {
        let index = self.next;
        self.next += 1;
        index
    }

    /// Number of indices handed out so far, counting from zero.
    pub fn next_index(&self) -> u32 {
        self.next
    }
}

/// A single data page being built
pub struct PageBuilder {
    page_index: u32,
    table_type: TableType,
    heap: Vec<u8>,
    /// Row offsets (relative to HEAP_START)
    row_offsets: Vec<u16>,
    alignment: usize,
}

impl PageBuilder {
    pub fn new(page_index: u32, table_type: TableType) -> Self {
        Self {
            page_index,
            table_type,
            heap: Vec::new(),
            row_offsets: Vec::new(),
            alignment: 4,
        }
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    fn padded(&self, len: usize) -> usize {
        len.next_multiple_of(self.alignment)
    }

    /// Check whether one more row of `row_len` bytes plus its footer slot fits
    pub fn would_overflow(&self, row_len: usize) -> bool {
        self.heap.len() + self.padded(row_len) > heap_capacity(self.row_offsets.len() + 1)
    }

    /// Copy a row into the heap and record its slot, returns the heap offset
    pub fn write_row(&mut self, row: &[u8]) -> Result<u16> {
        if self.would_overflow(row.len()) {
            return Err(Error::OutOfRange(format!(
                "page {}: {} byte row does not fit, {} bytes free",
                self.page_index,
                row.len(),
                self.free_size()
            )));
        }

        let offset = self.heap.len();
        self.heap.extend_from_slice(row);
        self.heap.resize(offset + self.padded(row.len()), 0);
        self.row_offsets.push(offset as u16);
        Ok(offset as u16)
    }

    pub fn row_count(&self) -> usize {
        self.row_offsets.len()
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn used_size(&self) -> usize {
        self.heap.len()
    }

    pub fn free_size(&self) -> usize {
        heap_capacity(self.row_count()).saturating_sub(self.heap.len())
    }

    /// Write header, heap and footer into a complete page
    pub fn finalize(self, next_page: u32, page_flags: u8) -> Result<Page> {
        let num_rows = self.row_count();
        let capacity = heap_capacity(num_rows);
        assert!(
            self.heap.len() <= capacity,
            "heap of {} bytes overlaps row group footer ({} usable)",
            self.heap.len(),
            capacity
        );

        let (num_rows_small, num_rows_large) = row_count_fields(num_rows);
        let header = PageHeader {
            page_index: self.page_index,
            table_type: self.table_type as u32,
            next_page,
            unknown1: 1,
            num_rows_small,
            page_flags,
            free_size: (capacity - self.heap.len()) as u16,
            used_size: self.heap.len() as u16,
            unknown5: 1,
            num_rows_large,
            ..PageHeader::default()
        };

        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[HEAP_START..HEAP_START + self.heap.len()].copy_from_slice(&self.heap);

        let groups: Vec<RowGroup> = self
            .row_offsets
            .chunks(ROWS_PER_GROUP)
            .map(|chunk| RowGroup::full(chunk.to_vec()))
            .collect();
        write_row_groups(&mut bytes, &groups);

        debug!(
            page = self.page_index,
            table = ?self.table_type,
            rows = num_rows,
            used = self.heap.len(),
            next_page,
            "finalized data page"
        );
        Page::from_parts(header, bytes)
    }
}

/// Places rows for one table into a run of chained data pages
pub struct PageAllocator {
    table_type: TableType,
    page_flags: u8,
    alignment: usize,
    pages: Vec<Page>,
    current: Option<PageBuilder>,
}

impl PageAllocator {
    pub fn new(table_type: TableType, options: &Options) -> Self {
        Self {
            table_type,
            page_flags: options.data_page_flags,
            alignment: options.row_alignment.max(1),
            pages: Vec::new(),
            current: None,
        }
    }

    /// Append a serialized row, opening a new page when the current one is full.
    pub fn append(&mut self, row: &[u8], indices: &mut PageIndexAllocator) -> Result<RowRef> {
        let capacity = heap_capacity(1);
        if row.len().next_multiple_of(self.alignment) > capacity {
            return Err(Error::RowTooLarge {
                size: row.len(),
                capacity,
            });
        }

        let mut page = match self.current.take() {
            Some(page) if !page.would_overflow(row.len()) => page,
            full => {
                let index = indices.allocate();
                if let Some(full) = full {
                    self.pages.push(full.finalize(index, self.page_flags)?);
                }
                PageBuilder::new(index, self.table_type).with_alignment(self.alignment)
            }
        };

        let offset = page.write_row(row)?;
        let row_ref = RowRef {
            page: page.page_index(),
            offset,
        };
        self.current = Some(page);
        Ok(row_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.current.is_none()
    }

    pub fn first_page(&self) -> Option<u32> {
        self.pages
            .first()
            .map(Page::index)
            .or_else(|| self.current.as_ref().map(PageBuilder::page_index))
    }

    /// Finalize the open page, pointing it at `next_page`.
    pub fn finish(mut self, next_page: u32) -> Result<Vec<Page>> {
        if let Some(last) = self.current.take() {
            self.pages.push(last.finalize(next_page, self.page_flags)?);
        }
        Ok(self.pages)
    }
}

/// Build the header page that starts every table chain
pub fn table_header_page(
    page_index: u32,
    table_type: TableType,
    next_page: u32,
    first_data_page: Option<u32>,
) -> Result<Page> {
    let header = PageHeader {
        page_index,
        table_type: table_type as u32,
        next_page,
        unknown1: 1,
        page_flags: flags::HEADER,
        unknown5: 1,
        ..PageHeader::default()
    };

    let mut content = Vec::with_capacity(PAGE_SIZE - HEAP_START);
    content.extend_from_slice(&page_index.to_le_bytes());
    content.extend_from_slice(&first_data_page.unwrap_or(NO_PAGE).to_le_bytes());
    content.extend_from_slice(&NO_PAGE.to_le_bytes());
    content.extend_from_slice(&0u32.to_le_bytes());
    if table_type == TableType::History {
        content.extend_from_slice(&[0x01, 0x00, 0xff, 0x1f, 0x40, 0x01, 0x00, 0x00]);
    } else {
        content.extend_from_slice(&0x1fff_0000u32.to_le_bytes());
    }
    // Fill pattern runs up to the last 20 bytes of the page
    while HEAP_START + content.len() < PAGE_SIZE - 20 {
        content.extend_from_slice(&[0xf8, 0xff, 0xff, 0x1f]);
    }

    let mut bytes = vec![0u8; PAGE_SIZE];
    bytes[HEAP_START..HEAP_START + content.len()].copy_from_slice(&content);
    Page::from_parts(header, bytes)
}
