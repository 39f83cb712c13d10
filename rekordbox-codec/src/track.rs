//! Track rows
//!
//! A track row is a 94-byte block of fixed fields, then 21 u16 string
//! offsets (relative to the row start), then the string data itself.
//! An offset of 0 marks the string as absent.

use binrw::binrw;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::row::{read_fixed, write_fixed};
use crate::string::{self, encode_string};

/// Size of the fixed field block
pub const TRACK_HEADER_LEN: usize = 0x5E;

/// Number of string offsets after the fixed fields
pub const TRACK_STRING_COUNT: usize = 21;

/// Offset of the first string byte in a freshly encoded row
pub const TRACK_STRINGS_START: usize = TRACK_HEADER_LEN + TRACK_STRING_COUNT * 2;

/// Subtype written by every exporter
pub const TRACK_SUBTYPE: u16 = 0x24;

/// Audio file type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FileType {
    #[default]
    Unknown = 0x00,
    Mp3 = 0x01,
    M4a = 0x04,
    Flac = 0x05,
    Wav = 0x0B,
    Aiff = 0x0C,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp3" => FileType::Mp3,
            "m4a" | "mp4" | "aac" => FileType::M4a,
            "flac" => FileType::Flac,
            "wav" => FileType::Wav,
            "aiff" | "aif" => FileType::Aiff,
            _ => FileType::Unknown,
        }
    }

    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x01 => FileType::Mp3,
            0x04 => FileType::M4a,
            0x05 => FileType::Flac,
            0x0B => FileType::Wav,
            0x0C => FileType::Aiff,
            _ => FileType::Unknown,
        }
    }
}

/// Slots of the track string offset table, in on-disk order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackString {
    Isrc,
    Lyricist,
    Unknown2,
    Unknown3,
    Unknown4,
    Message,
    PublishTrackInfo,
    AutoloadHotcues,
    Unknown8,
    Unknown9,
    DateAdded,
    ReleaseDate,
    MixName,
    Unknown13,
    AnalyzePath,
    AnalyzeDate,
    Comment,
    Title,
    Unknown18,
    Filename,
    FilePath,
}

impl TrackString {
    pub const ALL: [TrackString; TRACK_STRING_COUNT] = [
        TrackString::Isrc,
        TrackString::Lyricist,
        TrackString::Unknown2,
        TrackString::Unknown3,
        TrackString::Unknown4,
        TrackString::Message,
        TrackString::PublishTrackInfo,
        TrackString::AutoloadHotcues,
        TrackString::Unknown8,
        TrackString::Unknown9,
        TrackString::DateAdded,
        TrackString::ReleaseDate,
        TrackString::MixName,
        TrackString::Unknown13,
        TrackString::AnalyzePath,
        TrackString::AnalyzeDate,
        TrackString::Comment,
        TrackString::Title,
        TrackString::Unknown18,
        TrackString::Filename,
        TrackString::FilePath,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A row of the Tracks table
///
/// Field order matches the on-disk layout; the `#[binrw]` derive reads and
/// writes exactly the 94-byte fixed block.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub subtype: u16,
    /// Row position in the table × 0x20
    pub index_shift: u16,
    pub bitmask: u32,
    pub sample_rate: u32,
    pub composer_id: u32,
    pub file_size: u32,
    pub unknown2: u32,
    pub unknown3: u16,
    pub unknown4: u16,
    pub artwork_id: u32,
    pub key_id: u32,
    pub orig_artist_id: u32,
    pub label_id: u32,
    pub remixer_id: u32,
    pub bitrate: u32,
    pub track_number: u32,
    /// BPM × 100
    pub tempo: u32,
    pub genre_id: u32,
    pub album_id: u32,
    pub artist_id: u32,
    pub id: u32,
    pub disc_number: u16,
    pub play_count: u16,
    pub year: u16,
    pub sample_depth: u16,
    /// Seconds
    pub duration: u16,
    /// Always 0x29 in exports
    pub unknown5: u16,
    pub color_id: u8,
    pub rating: u8,
    pub file_type: u16,
    /// Always 0x03 in exports
    pub unknown7: u16,
    #[brw(ignore)]
    pub strings: [Option<String>; TRACK_STRING_COUNT],
}

impl Default for Track {
    fn default() -> Self {
        Self {
            subtype: TRACK_SUBTYPE,
            index_shift: 0,
            bitmask: 0x0700,
            sample_rate: 0,
            composer_id: 0,
            file_size: 0,
            unknown2: 0,
            unknown3: 0,
            unknown4: 0,
            artwork_id: 0,
            key_id: 0,
            orig_artist_id: 0,
            label_id: 0,
            remixer_id: 0,
            bitrate: 0,
            track_number: 0,
            tempo: 0,
            genre_id: 0,
            album_id: 0,
            artist_id: 0,
            id: 0,
            disc_number: 0,
            play_count: 0,
            year: 0,
            sample_depth: 0,
            duration: 0,
            unknown5: 0x29,
            color_id: 0,
            rating: 0,
            file_type: 0,
            unknown7: 0x03,
            strings: Default::default(),
        }
    }
}

impl Track {
    pub fn string(&self, slot: TrackString) -> Option<&str> {
        self.strings[slot.index()].as_deref()
    }

    pub fn set_string(&mut self, slot: TrackString, value: impl Into<String>) {
        self.strings[slot.index()] = Some(value.into());
    }

    pub fn with_string(mut self, slot: TrackString, value: impl Into<String>) -> Self {
        self.set_string(slot, value);
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.string(TrackString::Title)
    }

    pub fn bpm(&self) -> f64 {
        self.tempo as f64 / 100.0
    }

    pub fn file_kind(&self) -> FileType {
        FileType::from_raw(self.file_type)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut track: Track = read_fixed(bytes, TRACK_HEADER_LEN, "track row")?;
        let offsets = string_offsets(bytes)?;

        for (slot, &offset) in offsets.iter().enumerate() {
            if offset == 0 {
                continue;
            }
            track.strings[slot] = Some(string::decode(bytes, offset as usize)?.text);
        }
        Ok(track)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut row = Vec::with_capacity(TRACK_STRINGS_START + 64);
        write_fixed(self, &mut row)?;

        let mut offsets = [0u16; TRACK_STRING_COUNT];
        let mut data = Vec::new();
        for (slot, value) in self.strings.iter().enumerate() {
            if let Some(value) = value {
                let position = TRACK_STRINGS_START + data.len();
                offsets[slot] = u16::try_from(position).map_err(|_| {
                    Error::OutOfRange(format!("track {} string data passes 64 KiB", self.id))
                })?;
                data.extend(encode_string(value)?);
            }
        }

        for offset in offsets {
            row.extend_from_slice(&offset.to_le_bytes());
        }
        row.extend(data);
        Ok(row)
    }
}

/// Read the string offset table of an encoded track row.
pub fn string_offsets(bytes: &[u8]) -> Result<[u16; TRACK_STRING_COUNT]> {
    crate::error::ensure_len(bytes, TRACK_STRINGS_START, "track string offsets")?;
    let mut offsets = [0u16; TRACK_STRING_COUNT];
    for (slot, offset) in offsets.iter_mut().enumerate() {
        let pos = TRACK_HEADER_LEN + slot * 2;
        *offset = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track() -> Track {
        Track {
            id: 1,
            artist_id: 2,
            album_id: 3,
            genre_id: 4,
            key_id: 5,
            tempo: 12000,
            duration: 245,
            sample_rate: 44100,
            bitrate: 320,
            year: 2019,
            file_type: FileType::Mp3 as u16,
            ..Track::default()
        }
        .with_string(TrackString::Title, "Test")
        .with_string(TrackString::FilePath, "/Contents/Artist/Test.mp3")
        .with_string(TrackString::Filename, "Test.mp3")
    }

    #[test]
    fn test_fixed_header_layout() {
        let bytes = sample_track().encode().unwrap();

        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), TRACK_SUBTYPE);
        assert_eq!(u32::from_le_bytes(bytes[0x38..0x3C].try_into().unwrap()), 12000);
        assert_eq!(u32::from_le_bytes(bytes[0x44..0x48].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[0x48..0x4C].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes([bytes[0x56], bytes[0x57]]), 0x29);
        assert_eq!(u16::from_le_bytes([bytes[0x5C], bytes[0x5D]]), 0x03);
    }

    #[test]
    fn test_title_and_tempo_roundtrip() {
        let decoded = Track::decode(&sample_track().encode().unwrap()).unwrap();

        assert_eq!(decoded.title(), Some("Test"));
        assert_eq!(decoded.bpm(), 120.0);
        assert_eq!(decoded, sample_track());
    }

    #[test]
    fn test_absent_strings_have_zero_offset() {
        let bytes = sample_track().encode().unwrap();
        let offsets = string_offsets(&bytes).unwrap();

        assert_eq!(offsets[TrackString::Isrc.index()], 0);
        assert_eq!(offsets[TrackString::Comment.index()], 0);
        assert_eq!(offsets[TrackString::Title.index()] as usize, TRACK_STRINGS_START);
        assert!(offsets[TrackString::FilePath.index()] > offsets[TrackString::Filename.index()]);
    }

    #[test]
    fn test_decode_skips_absent_offsets() {
        // Offset table all zero, garbage after it must not be read
        let mut bytes = vec![0u8; TRACK_STRINGS_START];
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        let track = Track::decode(&bytes).unwrap();
        assert!(track.strings.iter().all(Option::is_none));
    }

    #[test]
    fn test_truncated_header() {
        let err = Track::decode(&[0u8; 40]).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn test_oversized_string_is_rejected() {
        let track = Track::default().with_string(TrackString::Comment, "c".repeat(70_000));
        let err = track.encode().unwrap_err();
        assert!(matches!(err, Error::StringTooLong { len: 70_000, .. }));
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("mp3"), FileType::Mp3);
        assert_eq!(FileType::from_extension("MP3"), FileType::Mp3);
        assert_eq!(FileType::from_extension("flac"), FileType::Flac);
        assert_eq!(FileType::from_extension("unknown"), FileType::Unknown);
        assert_eq!(FileType::from_raw(0x0B), FileType::Wav);
    }
}
