//! PDB validation
//!
//! Two passes over a decoded file:
//! - structure: directory, chain pointers, page headers and row group
//!   footers, against the layout rekordbox itself writes
//! - references: every foreign key held by tracks, playlist entries,
//!   history entries and albums must name an existing row
//!
//! Findings come back as [`Issue`]s. Only structural damage that stops a
//! table from being walked, and missing references, are errors.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Options;
use crate::error::Error;
use crate::page::{flags, heap_capacity, Page, PageKind, RowGroup, NUM_ROWS_MARKER};
use crate::pdb::{PdbFile, TableEntry, TableType, NUM_TABLES};
use crate::row::Row;

/// Difference between `free_size + used_size` and the usable heap that is
/// still considered consistent
const HEAP_ACCOUNTING_TOLERANCE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// The file could not be decoded at all
    Undecodable,
    TableCount,
    LoopDetected,
    DanglingReference,
    TableTypeMismatch,
    ChainEnd,
    IncompleteChain,
    PageFlags,
    RowCount,
    HeapAccounting,
    RowGroup,
    DamagedRow,
    MissingReference,
    UnreferencedRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub table: Option<TableType>,
    pub page: Option<u32>,
    pub message: String,
}

/// Statistics about a PDB file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdbStats {
    pub total_pages: u32,
    pub next_unused_page: u32,
    pub sequence: u32,
    /// Rows per table, damaged rows included
    pub rows: BTreeMap<TableType, usize>,
}

impl PdbStats {
    pub fn row_count(&self, table: TableType) -> usize {
        self.rows.get(&table).copied().unwrap_or(0)
    }
}

/// Result of validating a PDB file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub issues: Vec<Issue>,
    pub stats: PdbStats,
}

impl Report {
    /// True when no issue is an error.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    fn push(
        &mut self,
        severity: Severity,
        kind: IssueKind,
        table: Option<TableType>,
        page: Option<u32>,
        message: impl Into<String>,
    ) {
        self.issues.push(Issue {
            severity,
            kind,
            table,
            page,
            message: message.into(),
        });
    }
}

/// Validate raw file bytes. A file that does not decode yields a report
/// with a single error.
pub fn validate_bytes(bytes: &[u8], options: &Options) -> Report {
    match PdbFile::decode(bytes) {
        Ok(file) => validate(&file, options),
        Err(e) => {
            let mut report = Report::default();
            report.push(Severity::Error, IssueKind::Undecodable, None, None, e.to_string());
            report
        }
    }
}

/// Run structural and reference checks.
pub fn validate(file: &PdbFile, options: &Options) -> Report {
    let mut report = Report::default();
    report.stats.total_pages = file.page_count();
    report.stats.next_unused_page = file.header().next_unused_page;
    report.stats.sequence = file.header().sequence;

    let rows = validate_structure(file, &mut report);
    validate_references(&rows, options, &mut report);
    debug!(
        issues = report.issues.len(),
        valid = report.is_valid(),
        "validation finished"
    );
    report
}

/// Check directory, chains, pages and rows. Returns the decoded rows of
/// every table that could be walked.
fn validate_structure(file: &PdbFile, report: &mut Report) -> HashMap<TableType, Vec<Row>> {
    let num_tables = file.header().num_tables;
    if num_tables as usize != NUM_TABLES {
        report.push(
            Severity::Warning,
            IssueKind::TableCount,
            None,
            None,
            format!("num_tables is {}, expected {}", num_tables, NUM_TABLES),
        );
    }

    let mut decoded = HashMap::new();
    let mut chained = HashSet::new();
    for entry in &file.header().tables {
        let table = match entry.table() {
            Ok(table) => table,
            Err(e) => {
                report.push(Severity::Warning, IssueKind::TableCount, None, None, e.to_string());
                continue;
            }
        };
        if let Some(rows) = check_table(file, table, entry, &mut chained, report) {
            decoded.insert(table, rows);
        }
    }
    check_unchained_pages(file, &chained, report);
    decoded
}

/// Check the headers of pages no chain reaches. All-zero pages are unused
/// space and skipped.
fn check_unchained_pages(file: &PdbFile, chained: &HashSet<u32>, report: &mut Report) {
    for (position, page) in file.pages().enumerate() {
        let index = position as u32 + 1;
        if chained.contains(&index) || page.as_bytes().iter().all(|&b| b == 0) {
            continue;
        }
        debug!(page = index, "checking page outside every chain");
        match page.header().table() {
            Ok(table) => check_page(page, index, table, report),
            Err(e) => report.push(
                Severity::Warning,
                IssueKind::TableTypeMismatch,
                None,
                Some(index),
                e.to_string(),
            ),
        }
    }
}

fn check_table(
    file: &PdbFile,
    table: TableType,
    entry: &TableEntry,
    chained: &mut HashSet<u32>,
    report: &mut Report,
) -> Option<Vec<Row>> {
    let chain = match file.traverse(entry) {
        Ok(chain) => chain,
        Err(e) => {
            let kind = match e {
                Error::LoopDetected { .. } => IssueKind::LoopDetected,
                _ => IssueKind::DanglingReference,
            };
            report.push(Severity::Error, kind, Some(table), None, e.to_string());
            return None;
        }
    };
    debug!(%table, pages = chain.pages.len(), complete = chain.complete, "walked chain");

    if !chain.complete {
        report.push(
            Severity::Warning,
            IssueKind::IncompleteChain,
            Some(table),
            chain.pages.last().copied(),
            format!("chain ends before last_page {}", entry.last_page),
        );
    } else if let Ok(last) = file.page(entry.last_page) {
        if last.next_page() != entry.empty_candidate {
            report.push(
                Severity::Warning,
                IssueKind::ChainEnd,
                Some(table),
                Some(entry.last_page),
                format!(
                    "last page points at {}, empty_candidate is {}",
                    last.next_page(),
                    entry.empty_candidate
                ),
            );
        }
    }

    chained.extend(&chain.pages);
    for &index in &chain.pages {
        if let Ok(page) = file.page(index) {
            check_page(page, index, table, report);
        }
    }

    match file.table_rows(table) {
        Ok(rows) => {
            report.stats.rows.insert(table, rows.len());
            for row in &rows {
                if let Some(damage) = &row.damage {
                    report.push(
                        Severity::Warning,
                        IssueKind::DamagedRow,
                        Some(table),
                        Some(row.location.page),
                        format!("row at offset {}: {}", row.location.offset, damage),
                    );
                }
            }
            Some(rows.into_iter().filter(|r| r.damage.is_none()).map(|r| r.row).collect())
        }
        Err(e) => {
            report.push(Severity::Warning, IssueKind::RowGroup, Some(table), None, e.to_string());
            None
        }
    }
}

fn check_page(page: &Page, index: u32, table: TableType, report: &mut Report) {
    let header = page.header();
    let warn = |report: &mut Report, kind: IssueKind, message: String| {
        report.push(Severity::Warning, kind, Some(table), Some(index), message);
    };

    if header.table_type != table as u32 {
        report.push(
            Severity::Error,
            IssueKind::TableTypeMismatch,
            Some(table),
            Some(index),
            format!("page belongs to table type {}", header.table_type),
        );
        return;
    }

    if !flags::KNOWN.contains(&header.page_flags) {
        warn(report, IssueKind::PageFlags, format!("unusual page_flags 0x{:02x}", header.page_flags));
    }
    if page.kind() != PageKind::Data {
        return;
    }

    let small = header.num_rows_small as usize;
    let expected_large = small.saturating_sub(1) as u16;
    if header.num_rows_large == NUM_ROWS_MARKER {
        report.push(
            Severity::Info,
            IssueKind::RowCount,
            Some(table),
            Some(index),
            format!("num_rows_large carries the 0x{:x} marker", NUM_ROWS_MARKER),
        );
    } else if header.num_rows_large != expected_large && page.row_count() == small {
        warn(
            report,
            IssueKind::RowCount,
            format!(
                "num_rows_large {} disagrees with num_rows_small {}",
                header.num_rows_large, small
            ),
        );
    }

    let capacity = heap_capacity(page.row_count());
    let accounted = header.free_size as usize + header.used_size as usize;
    if accounted.abs_diff(capacity) > HEAP_ACCOUNTING_TOLERANCE {
        warn(
            report,
            IssueKind::HeapAccounting,
            format!(
                "free_size {} + used_size {} = {}, usable heap is {}",
                header.free_size, header.used_size, accounted, capacity
            ),
        );
    }

    let groups = match page.row_groups() {
        Ok(groups) => groups,
        Err(e) => {
            warn(report, IssueKind::RowGroup, e.to_string());
            return;
        }
    };

    let mut present = 0;
    for (number, group) in groups.iter().enumerate() {
        let full = RowGroup::full(group.offsets.clone());
        if group.flags != full.flags {
            warn(
                report,
                IssueKind::RowGroup,
                format!("group {} flags 0x{:04x}, expected 0x{:04x}", number, group.flags, full.flags),
            );
        }
        let derived = RowGroup::derived_unknown(group.flags);
        if group.unknown != derived {
            warn(
                report,
                IssueKind::RowGroup,
                format!("group {} unknown 0x{:04x}, expected 0x{:04x}", number, group.unknown, derived),
            );
        }
        for offset in group.present_offsets() {
            present += 1;
            if offset >= header.used_size {
                warn(
                    report,
                    IssueKind::RowGroup,
                    format!("group {} offset {} beyond used_size {}", number, offset, header.used_size),
                );
            }
        }
    }
    if present % 256 != small {
        warn(
            report,
            IssueKind::RowGroup,
            format!("{} rows present, num_rows_small is {}", present, small),
        );
    }
}

/// A foreign key held by some row
struct ForeignKey {
    from: TableType,
    field: &'static str,
    target: TableType,
    owner: Option<u32>,
    id: u32,
}

fn foreign_keys(rows: &HashMap<TableType, Vec<Row>>) -> Vec<ForeignKey> {
    let mut keys = Vec::new();
    let mut push = |from, field, target, owner, id| {
        keys.push(ForeignKey { from, field, target, owner, id });
    };

    for row in rows.values().flatten() {
        match row {
            Row::Track(track) => {
                let owner = Some(track.id);
                for (field, target, id) in [
                    ("artist_id", TableType::Artists, track.artist_id),
                    ("album_id", TableType::Albums, track.album_id),
                    ("genre_id", TableType::Genres, track.genre_id),
                    ("key_id", TableType::Keys, track.key_id),
                    ("label_id", TableType::Labels, track.label_id),
                    ("artwork_id", TableType::Artwork, track.artwork_id),
                ] {
                    if id != 0 {
                        push(TableType::Tracks, field, target, owner, id);
                    }
                }
            }
            Row::Album(album) if album.artist_id != 0 => {
                push(TableType::Albums, "artist_id", TableType::Artists, Some(album.id), album.artist_id);
            }
            Row::PlaylistEntry(entry) => {
                push(TableType::PlaylistEntries, "track_id", TableType::Tracks, None, entry.track_id);
                push(TableType::PlaylistEntries, "playlist_id", TableType::PlaylistTree, None, entry.playlist_id);
            }
            Row::HistoryEntry(entry) => {
                push(TableType::HistoryEntries, "track_id", TableType::Tracks, None, entry.track_id);
            }
            _ => {}
        }
    }
    keys
}

/// Check every foreign key against the ids of its target table.
fn validate_references(rows: &HashMap<TableType, Vec<Row>>, options: &Options, report: &mut Report) {
    let ids: HashMap<TableType, HashSet<u32>> = rows
        .iter()
        .map(|(table, rows)| (*table, rows.iter().filter_map(Row::id).collect()))
        .collect();

    let mut referenced: HashMap<TableType, HashSet<u32>> = HashMap::new();
    for key in foreign_keys(rows) {
        if key.from == TableType::Tracks {
            referenced.entry(key.target).or_default().insert(key.id);
        }
        // A table that could not be walked was reported already
        let Some(targets) = ids.get(&key.target) else {
            continue;
        };
        if !targets.contains(&key.id) {
            report.push(
                Severity::Error,
                IssueKind::MissingReference,
                Some(key.from),
                None,
                missing_message(&key),
            );
        }
    }

    if !options.report_unreferenced {
        return;
    }
    for target in [
        TableType::Artists,
        TableType::Albums,
        TableType::Genres,
        TableType::Keys,
        TableType::Labels,
        TableType::Artwork,
    ] {
        let Some(target_ids) = ids.get(&target) else {
            continue;
        };
        let used = referenced.get(&target);
        let mut unused: Vec<u32> = target_ids
            .iter()
            .copied()
            .filter(|id| !used.is_some_and(|used| used.contains(id)))
            .collect();
        unused.sort_unstable();
        for id in unused {
            report.push(
                Severity::Info,
                IssueKind::UnreferencedRow,
                Some(target),
                None,
                format!("{} row {} is not referenced by any track", target, id),
            );
        }
    }
}

fn missing_message(key: &ForeignKey) -> String {
    match key.owner {
        Some(owner) => format!(
            "{} row {}: {} {} not found in {}",
            key.from, owner, key.field, key.id, key.target
        ),
        None => format!("{} {} {} not found in {}", key.from, key.field, key.id, key.target),
    }
}
