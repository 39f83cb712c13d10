//! ANLZ files (.DAT, .EXT, .2EX)
//!
//! ANLZ files are **big-endian** and contain tagged sections:
//! - PMAI: File header
//! - PPTH: File path
//! - PVBR: VBR seek index
//! - PQTZ: Beat grid
//! - PWAV / PWV2: Monochrome preview waveforms
//! - PWV3 / PWV4 / PWV5: Detail and color waveforms
//! - PCOB / PCO2: Cue and loop lists
//!
//! Every section starts with a 12-byte prologue (tag, header length, total
//! length). Sections are kept as raw header and body bytes in file order;
//! the known payloads are interpreted on request.
//!
//! Reference: https://djl-analysis.deepsymmetry.org/rekordbox-export-analysis/anlz.html

use std::io::Cursor;

use binrw::{binrw, BinRead, VecArgs};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::row::write_fixed;

/// Size of the PMAI file header
pub const PMAI_HEADER_LEN: usize = 28;

/// Size of a section prologue
pub const PROLOGUE_LEN: usize = 12;

/// Reserved PMAI fields written by rekordbox
const PMAI_RESERVED: [u32; 4] = [1, 0x0001_0000, 0x0001_0000, 0];

/// Second PQTZ header field, constant in every export
const PQTZ_UNKNOWN: u32 = 0x0080_0000;

const PWAV_UNKNOWN: u32 = 0x0001_0000;
const PWV5_UNKNOWN: u32 = 0x0096_0305;

/// Number of columns in a PWAV preview
pub const PREVIEW_COLUMNS: usize = 400;

pub mod tags {
    pub const PPTH: [u8; 4] = *b"PPTH";
    pub const PVBR: [u8; 4] = *b"PVBR";
    pub const PQTZ: [u8; 4] = *b"PQTZ";
    pub const PWAV: [u8; 4] = *b"PWAV";
    pub const PWV2: [u8; 4] = *b"PWV2";
    pub const PWV3: [u8; 4] = *b"PWV3";
    pub const PWV4: [u8; 4] = *b"PWV4";
    pub const PWV5: [u8; 4] = *b"PWV5";
    pub const PCOB: [u8; 4] = *b"PCOB";
    pub const PCO2: [u8; 4] = *b"PCO2";
}

/// PMAI root header
#[binrw]
#[brw(big, magic = b"PMAI")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmaiHeader {
    pub header_len: u32,
    pub total_len: u32,
    pub reserved: [u32; 4],
}

#[binrw]
#[brw(big)]
struct Prologue {
    tag: [u8; 4],
    header_len: u32,
    total_len: u32,
}

/// One beat of a PQTZ grid
#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    /// Position in the bar, 1-4
    pub beat_number: u16,
    /// BPM × 100
    pub tempo: u16,
    pub time_ms: u32,
}

impl Beat {
    /// Beats of a constant-tempo track from time zero up to `duration_ms`.
    pub fn constant_tempo(bpm: f64, duration_ms: u32) -> Vec<Beat> {
        if bpm <= 0.0 {
            return Vec::new();
        }
        let tempo = (bpm * 100.0).round() as u16;
        let interval = 60_000.0 / bpm;

        (0u32..)
            .map(|n| (n, (n as f64 * interval) as u32))
            .take_while(|&(_, time_ms)| time_ms < duration_ms)
            .map(|(n, time_ms)| Beat {
                beat_number: (n % 4) as u16 + 1,
                tempo,
                time_ms,
            })
            .collect()
    }
}

/// PWAV column: height in bits 7-3, whiteness in bits 2-0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformColumn {
    /// 0-31
    pub height: u8,
    /// 0-7, higher is whiter
    pub whiteness: u8,
}

impl WaveformColumn {
    pub fn to_byte(&self) -> u8 {
        ((self.height & 0x1F) << 3) | (self.whiteness & 0x07)
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            height: (byte >> 3) & 0x1F,
            whiteness: byte & 0x07,
        }
    }
}

/// PWV5 entry
///
/// Bits 15-13: red, 12-10: green, 9-7: blue, 6-2: height, 1-0: unused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformColorEntry {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub height: u8,
}

impl WaveformColorEntry {
    pub fn to_bytes(&self) -> [u8; 2] {
        let value: u16 = ((self.red as u16 & 0x07) << 13)
            | ((self.green as u16 & 0x07) << 10)
            | ((self.blue as u16 & 0x07) << 7)
            | ((self.height as u16 & 0x1F) << 2);
        value.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        let value = u16::from_be_bytes(bytes);
        Self {
            red: ((value >> 13) & 0x07) as u8,
            green: ((value >> 10) & 0x07) as u8,
            blue: ((value >> 7) & 0x07) as u8,
            height: ((value >> 2) & 0x1F) as u8,
        }
    }
}

/// Interpreted contents of a known section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SectionPayload {
    Path {
        path: String,
    },
    Waveform {
        entry_count: u32,
        /// Bytes per entry
        entry_width: usize,
        data: Vec<u8>,
    },
    BeatGrid {
        beats: Vec<Beat>,
    },
    Cues {
        /// 0 memory points, 1 hot cues
        list_type: u32,
        entry_count: u16,
        memory_count: Option<u32>,
    },
    /// Tag not interpreted, or a known tag whose header is too short
    Raw,
}

/// One tagged section, stored as the bytes it was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub tag: [u8; 4],
    /// Header bytes after the 12-byte prologue
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

impl Section {
    pub fn new(tag: [u8; 4], header: Vec<u8>, body: Vec<u8>) -> Self {
        Self { tag, header, body }
    }

    /// PPTH section holding `path` as NUL-terminated UTF-16BE.
    pub fn path(path: &str) -> Self {
        let mut body: Vec<u8> = path.encode_utf16().flat_map(u16::to_be_bytes).collect();
        body.extend_from_slice(&[0, 0]);
        Self::new(tags::PPTH, (body.len() as u32).to_be_bytes().to_vec(), body)
    }

    /// Empty PVBR index: 16-byte header, 20 bytes in total.
    pub fn vbr_index() -> Self {
        Self::new(tags::PVBR, vec![0; 4], vec![0; 4])
    }

    pub fn beat_grid(beats: &[Beat]) -> Result<Self> {
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&PQTZ_UNKNOWN.to_be_bytes());
        header.extend_from_slice(&(beats.len() as u32).to_be_bytes());

        let mut body = Vec::with_capacity(beats.len() * 8);
        for beat in beats {
            write_fixed(beat, &mut body)?;
        }
        Ok(Self::new(tags::PQTZ, header, body))
    }

    /// PWAV preview, padded or cut to 400 columns.
    pub fn preview_waveform(columns: &[WaveformColumn]) -> Self {
        let mut body: Vec<u8> = columns.iter().take(PREVIEW_COLUMNS).map(WaveformColumn::to_byte).collect();
        body.resize(PREVIEW_COLUMNS, 0);

        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(&(PREVIEW_COLUMNS as u32).to_be_bytes());
        header.extend_from_slice(&PWAV_UNKNOWN.to_be_bytes());
        Self::new(tags::PWAV, header, body)
    }

    /// PWV5 color detail waveform.
    pub fn color_waveform(entries: &[WaveformColorEntry]) -> Self {
        let body: Vec<u8> = entries.iter().flat_map(WaveformColorEntry::to_bytes).collect();

        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(&2u32.to_be_bytes());
        header.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        header.extend_from_slice(&PWV5_UNKNOWN.to_be_bytes());
        Self::new(tags::PWV5, header, body)
    }

    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }

    pub fn header_len(&self) -> usize {
        PROLOGUE_LEN + self.header.len()
    }

    pub fn total_len(&self) -> usize {
        self.header_len() + self.body.len()
    }

    /// Interpret the section. Unknown tags, and known tags whose header is
    /// too short for their fields, come back as [`SectionPayload::Raw`].
    pub fn payload(&self) -> SectionPayload {
        match self.typed_payload() {
            Some(payload) => payload,
            None => {
                trace!(tag = %self.tag_str(), "section left uninterpreted");
                SectionPayload::Raw
            }
        }
    }

    // Header offsets below are relative to the end of the prologue, so the
    // field at section offset 16 is at `header[4..]`.
    fn typed_payload(&self) -> Option<SectionPayload> {
        let waveform = |count_at: usize, entry_width: usize| {
            be_u32(&self.header, count_at).map(|entry_count| SectionPayload::Waveform {
                entry_count,
                entry_width,
                data: self.body.clone(),
            })
        };

        match self.tag {
            tags::PPTH => {
                let len = be_u32(&self.header, 0)? as usize;
                let units: Vec<u16> = self
                    .body
                    .get(..len.min(self.body.len()))?
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .take_while(|&unit| unit != 0)
                    .collect();
                Some(SectionPayload::Path {
                    path: String::from_utf16_lossy(&units),
                })
            }
            tags::PWAV | tags::PWV2 => waveform(0, 1),
            tags::PWV3 => waveform(4, 1),
            tags::PWV4 => waveform(4, 6),
            tags::PWV5 => waveform(4, 2),
            tags::PQTZ => {
                let count = be_u32(&self.header, 8)?;
                let beats = Vec::<Beat>::read_be_args(
                    &mut Cursor::new(&self.body),
                    VecArgs {
                        count: count as usize,
                        inner: (),
                    },
                )
                .ok()?;
                Some(SectionPayload::BeatGrid { beats })
            }
            tags::PCOB => Some(SectionPayload::Cues {
                list_type: be_u32(&self.header, 0)?,
                entry_count: be_u16(&self.header, 6)?,
                memory_count: be_u32(&self.header, 8),
            }),
            tags::PCO2 => Some(SectionPayload::Cues {
                list_type: be_u32(&self.header, 0)?,
                entry_count: be_u16(&self.header, 4)?,
                memory_count: None,
            }),
            _ => None,
        }
    }
}

/// A decoded ANLZ file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnlzFile {
    pub header: PmaiHeader,
    /// PMAI header bytes past the 28 known ones
    pub header_extra: Vec<u8>,
    /// Sections in file order
    pub sections: Vec<Section>,
    /// Bytes after the last section, kept for byte-exact re-encoding
    pub trailer: Vec<u8>,
}

impl AnlzFile {
    pub fn new(sections: Vec<Section>) -> Self {
        let mut file = Self {
            header: PmaiHeader {
                header_len: PMAI_HEADER_LEN as u32,
                total_len: 0,
                reserved: PMAI_RESERVED,
            },
            header_extra: Vec::new(),
            sections,
            trailer: Vec::new(),
        };
        file.header.total_len = file.encoded_len() as u32;
        file
    }

    /// `.DAT` file: path, VBR index, then the beat grid when there is one.
    pub fn dat(path: &str, beats: &[Beat]) -> Result<Self> {
        let mut sections = vec![Section::path(path), Section::vbr_index()];
        if !beats.is_empty() {
            sections.push(Section::beat_grid(beats)?);
        }
        Ok(Self::new(sections))
    }

    /// `.EXT` file: the same path and VBR prefix as `.DAT`, then the color
    /// detail waveform when there is one.
    pub fn ext(path: &str, waveform: &[WaveformColorEntry]) -> Self {
        let mut sections = vec![Section::path(path), Section::vbr_index()];
        if !waveform.is_empty() {
            sections.push(Section::color_waveform(waveform));
        }
        Self::new(sections)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = PmaiHeader::read(&mut Cursor::new(bytes))?;
        let header_len = header.header_len as usize;
        if header_len < PMAI_HEADER_LEN {
            return Err(Error::Format(format!("PMAI header_len {} is too small", header_len)));
        }
        if header_len > bytes.len() {
            return Err(Error::Truncated {
                context: "PMAI header",
                needed: header_len,
                available: bytes.len(),
            });
        }

        let mut sections = Vec::new();
        let mut offset = header_len;
        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < PROLOGUE_LEN {
                if bytes[offset..].iter().all(|&b| b == 0) {
                    break;
                }
                return Err(Error::TruncatedSection {
                    tag: String::from_utf8_lossy(&bytes[offset..offset + remaining.min(4)]).into_owned(),
                    offset,
                    declared: PROLOGUE_LEN,
                    available: remaining,
                });
            }

            let prologue = Prologue::read(&mut Cursor::new(&bytes[offset..offset + PROLOGUE_LEN]))?;
            let tag = String::from_utf8_lossy(&prologue.tag).into_owned();
            let total = prologue.total_len as usize;
            if total == 0 {
                break;
            }
            let section_header = prologue.header_len as usize;
            if section_header < PROLOGUE_LEN || section_header > total {
                return Err(Error::Format(format!(
                    "section {} at {}: header_len {} outside 12..={}",
                    tag, offset, section_header, total
                )));
            }
            if total > remaining {
                return Err(Error::TruncatedSection {
                    tag,
                    offset,
                    declared: total,
                    available: remaining,
                });
            }

            trace!(%tag, offset, header_len = section_header, total_len = total, "section");
            sections.push(Section {
                tag: prologue.tag,
                header: bytes[offset + PROLOGUE_LEN..offset + section_header].to_vec(),
                body: bytes[offset + section_header..offset + total].to_vec(),
            });
            offset += total;
        }

        let file = Self {
            header,
            header_extra: bytes[PMAI_HEADER_LEN..header_len].to_vec(),
            sections,
            trailer: bytes[offset..].to_vec(),
        };
        if file.encoded_len() != header.total_len as usize {
            debug!(
                declared = header.total_len,
                actual = file.encoded_len(),
                "PMAI total_len disagrees with file contents"
            );
        }
        Ok(file)
    }

    /// Bytes covered by the PMAI `total_len`; the trailer is not counted.
    fn encoded_len(&self) -> usize {
        PMAI_HEADER_LEN
            + self.header_extra.len()
            + self.sections.iter().map(Section::total_len).sum::<usize>()
    }

    /// Encode with section order preserved and lengths recomputed.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = PmaiHeader {
            header_len: (PMAI_HEADER_LEN + self.header_extra.len()) as u32,
            total_len: self.encoded_len() as u32,
            ..self.header
        };

        let mut out = Vec::with_capacity(self.encoded_len() + self.trailer.len());
        write_fixed(&header, &mut out)?;
        out.extend_from_slice(&self.header_extra);
        for section in &self.sections {
            let prologue = Prologue {
                tag: section.tag,
                header_len: section.header_len() as u32,
                total_len: section.total_len() as u32,
            };
            write_fixed(&prologue, &mut out)?;
            out.extend_from_slice(&section.header);
            out.extend_from_slice(&section.body);
        }
        out.extend_from_slice(&self.trailer);
        Ok(out)
    }

    pub fn section(&self, tag: [u8; 4]) -> Option<&Section> {
        self.sections.iter().find(|s| s.tag == tag)
    }

    /// Audio path from the PPTH section.
    pub fn path(&self) -> Option<String> {
        match self.section(tags::PPTH)?.payload() {
            SectionPayload::Path { path } => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> AnlzFile {
        let beats = Beat::constant_tempo(120.0, 2000);
        AnlzFile::new(vec![
            Section::path("/Contents/Artist/Test.mp3"),
            Section::beat_grid(&beats).unwrap(),
            Section::preview_waveform(&[WaveformColumn { height: 31, whiteness: 7 }; 10]),
        ])
    }

    #[test]
    fn test_pmai_header() {
        let bytes = sample_file().encode().unwrap();

        assert_eq!(&bytes[0..4], b"PMAI");
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), 28);
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize, bytes.len());
        assert_eq!(u32::from_be_bytes(bytes[12..16].try_into().unwrap()), 1);
        assert_eq!(u32::from_be_bytes(bytes[16..20].try_into().unwrap()), 0x10000);
        assert_eq!(&bytes[28..32], b"PPTH");
    }

    #[test]
    fn test_decode_keeps_order_and_bytes() {
        let bytes = sample_file().encode().unwrap();
        let file = AnlzFile::decode(&bytes).unwrap();

        let order: Vec<String> = file.sections.iter().map(Section::tag_str).collect();
        assert_eq!(order, ["PPTH", "PQTZ", "PWAV"]);
        assert_eq!(file.encode().unwrap(), bytes);
        assert_eq!(file, sample_file());
    }

    #[test]
    fn test_path_section() {
        let section = Section::path("/a.mp3");
        // 6 UTF-16 units + NUL
        assert_eq!(section.body.len(), 14);
        assert_eq!(section.header_len(), 16);
        assert_eq!(
            section.payload(),
            SectionPayload::Path { path: "/a.mp3".into() }
        );
        assert_eq!(sample_file().path().as_deref(), Some("/Contents/Artist/Test.mp3"));
    }

    #[test]
    fn test_beat_grid_payload() {
        let beats = Beat::constant_tempo(120.0, 2000);
        assert_eq!(beats.len(), 4);
        assert_eq!(beats[3], Beat { beat_number: 4, tempo: 12000, time_ms: 1500 });

        let section = Section::beat_grid(&beats).unwrap();
        assert_eq!(section.header_len(), 24);
        assert_eq!(section.total_len(), 24 + 32);
        assert_eq!(section.payload(), SectionPayload::BeatGrid { beats });
    }

    #[test]
    fn test_waveform_payloads() {
        let preview = Section::preview_waveform(&[WaveformColumn { height: 4, whiteness: 2 }]);
        match preview.payload() {
            SectionPayload::Waveform { entry_count, entry_width, data } => {
                assert_eq!(entry_count, 400);
                assert_eq!(entry_width, 1);
                assert_eq!(data[0], (4 << 3) | 2);
                assert_eq!(data.len(), 400);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let entry = WaveformColorEntry { red: 7, green: 3, blue: 1, height: 31 };
        let color = Section::color_waveform(&[entry, entry]);
        assert_eq!(color.header_len(), 24);
        match color.payload() {
            SectionPayload::Waveform { entry_count, entry_width, data } => {
                assert_eq!(entry_count, 2);
                assert_eq!(entry_width, 2);
                assert_eq!(WaveformColorEntry::from_bytes([data[0], data[1]]), entry);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_cue_payloads() {
        let mut header = Vec::new();
        header.extend_from_slice(&1u32.to_be_bytes());
        header.extend_from_slice(&[0, 0, 0, 3]);
        header.extend_from_slice(&5u32.to_be_bytes());
        let pcob = Section::new(tags::PCOB, header, Vec::new());
        assert_eq!(
            pcob.payload(),
            SectionPayload::Cues { list_type: 1, entry_count: 3, memory_count: Some(5) }
        );

        let pco2 = Section::new(tags::PCO2, vec![0, 0, 0, 0, 0, 2, 0, 0], Vec::new());
        assert_eq!(
            pco2.payload(),
            SectionPayload::Cues { list_type: 0, entry_count: 2, memory_count: None }
        );
    }

    #[test]
    fn test_unknown_tag_is_raw() {
        let section = Section::new(*b"PSSI", vec![0; 4], vec![1, 2, 3]);
        assert_eq!(section.payload(), SectionPayload::Raw);

        let bytes = AnlzFile::new(vec![section.clone()]).encode().unwrap();
        assert_eq!(AnlzFile::decode(&bytes).unwrap().sections, vec![section]);
    }

    fn be(out: &mut Vec<u8>, values: &[u32]) {
        for value in values {
            out.extend_from_slice(&value.to_be_bytes());
        }
    }

    #[test]
    fn test_dat_layout() {
        let beats = Beat::constant_tempo(120.0, 1000);
        let bytes = AnlzFile::dat("/a.mp3", &beats).unwrap().encode().unwrap();

        let mut expected = b"PMAI".to_vec();
        be(&mut expected, &[28, 118, 1, 0x10000, 0x10000, 0]);
        expected.extend_from_slice(b"PPTH");
        be(&mut expected, &[16, 30, 14]);
        for unit in "/a.mp3".encode_utf16().chain([0]) {
            expected.extend_from_slice(&unit.to_be_bytes());
        }
        expected.extend_from_slice(b"PVBR");
        be(&mut expected, &[16, 20, 0, 0]);
        expected.extend_from_slice(b"PQTZ");
        be(&mut expected, &[24, 40, 0, 0x0080_0000, 2]);
        expected.extend_from_slice(&[0, 1, 0x2e, 0xe0]);
        be(&mut expected, &[0]);
        expected.extend_from_slice(&[0, 2, 0x2e, 0xe0]);
        be(&mut expected, &[500]);

        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_dat_without_beats() {
        let file = AnlzFile::dat("/a.mp3", &[]).unwrap();
        let order: Vec<String> = file.sections.iter().map(Section::tag_str).collect();
        assert_eq!(order, ["PPTH", "PVBR"]);
    }

    #[test]
    fn test_ext_layout() {
        let entry = WaveformColorEntry { red: 1, green: 2, blue: 3, height: 4 };
        let bytes = AnlzFile::ext("/a.mp3", &[entry; 3]).encode().unwrap();
        let file = AnlzFile::decode(&bytes).unwrap();

        let order: Vec<String> = file.sections.iter().map(Section::tag_str).collect();
        assert_eq!(order, ["PPTH", "PVBR", "PWV5"]);
        // PMAI + PPTH + PVBR put PWV5 at a fixed offset
        assert_eq!(&bytes[28 + 30 + 20..28 + 30 + 24], b"PWV5");
        assert_eq!(file.sections[1].total_len(), 20);
        assert_eq!(file.sections[1].header_len(), 16);
        assert_eq!(file.path().as_deref(), Some("/a.mp3"));
    }

    #[test]
    fn test_not_pmai() {
        let mut bytes = sample_file().encode().unwrap();
        bytes[0..4].copy_from_slice(b"PMAX");
        assert!(matches!(AnlzFile::decode(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_truncated_section() {
        let bytes = sample_file().encode().unwrap();
        let err = AnlzFile::decode(&bytes[..bytes.len() - 10]).unwrap_err();
        assert!(matches!(err, Error::TruncatedSection { ref tag, .. } if tag == "PWAV"));
    }

    #[test]
    fn test_zero_length_section_ends_file() {
        let mut bytes = sample_file().encode().unwrap();
        let sections = AnlzFile::decode(&bytes).unwrap().sections.len();
        bytes.extend_from_slice(b"PXXX");
        bytes.extend_from_slice(&[0u8; 12]);

        let file = AnlzFile::decode(&bytes).unwrap();
        assert_eq!(file.sections.len(), sections);
        assert_eq!(file.trailer.len(), 16);
        assert_eq!(file.encode().unwrap(), bytes);
    }

    #[test]
    fn test_bad_section_header_len() {
        let mut bytes = AnlzFile::new(vec![Section::path("/x")]).encode().unwrap();
        // header_len of the PPTH section
        bytes[32..36].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(AnlzFile::decode(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_waveform_column_bits() {
        let column = WaveformColumn { height: 31, whiteness: 7 };
        assert_eq!(column.to_byte(), 0xFF);
        assert_eq!(WaveformColumn::from_byte(0xFF), column);
        assert_eq!(WaveformColumn { height: 16, whiteness: 0 }.to_byte(), 0x80);
    }

    #[test]
    fn test_waveform_color_bits() {
        let entry = WaveformColorEntry { red: 7, green: 0, blue: 0, height: 0 };
        assert_eq!(entry.to_bytes(), [0xE0, 0x00]);
        let entry = WaveformColorEntry { red: 0, green: 0, blue: 0, height: 31 };
        assert_eq!(entry.to_bytes(), [0x00, 0x7C]);
    }
}
