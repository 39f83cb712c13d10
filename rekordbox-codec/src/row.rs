//! Row layouts for every table
//!
//! Fixed fields are `#[binrw]` structs; the strings that follow them are
//! DeviceSQL strings. Most entities store one name directly after their
//! fixed fields. Artists and albums point at their name through a one-byte
//! (near) or two-byte (far) offset chosen by the subtype.

use std::io::Cursor;

use binrw::meta::{ReadEndian, WriteEndian};
use binrw::{binrw, BinRead, BinWrite};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_len, Error, Result};
use crate::pdb::TableType;
use crate::string::{self, encode_string, encode_utf16le};
use crate::track::{self, Track, TrackString};

/// Marker byte in front of artist and album name offsets
const NAME_MARKER: u8 = 0x03;

/// Subtype bit selecting a u16 name offset
const FAR_NAME_BIT: u16 = 0x04;

pub const ARTIST_SUBTYPE: u16 = 0x60;
pub const ALBUM_SUBTYPE: u16 = 0x80;

/// Exporters pad artist and album rows to these sizes
const ARTIST_MIN_LEN: usize = 0x1C;
const ALBUM_MIN_LEN: usize = 0x28;

pub(crate) fn read_fixed<T>(bytes: &[u8], len: usize, context: &'static str) -> Result<T>
where
    T: ReadEndian + for<'a> BinRead<Args<'a> = ()>,
{
    ensure_len(bytes, len, context)?;
    Ok(T::read(&mut Cursor::new(&bytes[..len]))?)
}

pub(crate) fn write_fixed<T>(value: &T, out: &mut Vec<u8>) -> Result<()>
where
    T: WriteEndian + for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::new());
    value.write(&mut cursor)?;
    out.extend(cursor.into_inner());
    Ok(())
}

/// Which string of a row to address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringField {
    /// The single string of every non-track row (name, or path for artwork)
    Name,
    Track(TrackString),
}

/// Fixed fields followed directly by one DeviceSQL string
trait InlineNamed:
    Sized + ReadEndian + WriteEndian + for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()>
{
    const FIXED_LEN: usize;
    const CONTEXT: &'static str;

    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);

    fn encode_name(name: &str) -> Result<Vec<u8>> {
        encode_string(name)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut row: Self = read_fixed(bytes, Self::FIXED_LEN, Self::CONTEXT)?;
        row.set_name(string::decode(bytes, Self::FIXED_LEN)?.text);
        Ok(row)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::FIXED_LEN + self.name().len() + 4);
        write_fixed(self, &mut out)?;
        out.extend(Self::encode_name(self.name())?);
        Ok(out)
    }
}

macro_rules! inline_named {
    ($ty:ty, $len:expr, $context:literal, $field:ident) => {
        impl InlineNamed for $ty {
            const FIXED_LEN: usize = $len;
            const CONTEXT: &'static str = $context;

            fn name(&self) -> &str {
                &self.$field
            }

            fn set_name(&mut self, name: String) {
                self.$field = name;
            }
        }
    };
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: u32,
    #[brw(ignore)]
    pub name: String,
}

inline_named!(Genre, 4, "genre row", name);

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: u32,
    #[brw(ignore)]
    pub name: String,
}

inline_named!(Label, 4, "label row", name);

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: u32,
    /// Same value as `id` in every export seen
    pub id2: u32,
    #[brw(ignore)]
    pub name: String,
}

inline_named!(Key, 8, "key row", name);

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub unknown1: u32,
    pub unknown2: u8,
    /// Color index, 1-8 for the presets
    pub id: u8,
    pub unknown3: u16,
    #[brw(ignore)]
    pub name: String,
}

inline_named!(Color, 8, "color row", name);

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistTreeNode {
    /// 0 for the root
    pub parent_id: u32,
    pub unknown: u32,
    pub sort_order: u32,
    pub id: u32,
    /// Non-zero for folders
    pub is_folder: u32,
    #[brw(ignore)]
    pub name: String,
}

inline_named!(PlaylistTreeNode, 20, "playlist tree row", name);

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkRef {
    pub id: u32,
    #[brw(ignore)]
    pub path: String,
}

inline_named!(ArtworkRef, 4, "artwork row", path);

/// Browser column definition; the name is always UTF-16
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: u16,
    pub flags: u16,
    #[brw(ignore)]
    pub name: String,
}

impl InlineNamed for Column {
    const FIXED_LEN: usize = 4;
    const CONTEXT: &'static str = "column row";

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn encode_name(name: &str) -> Result<Vec<u8>> {
        encode_utf16le(name)
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPlaylist {
    pub id: u32,
    #[brw(ignore)]
    pub name: String,
}

inline_named!(HistoryPlaylist, 4, "history playlist row", name);

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub entry_index: u32,
    pub track_id: u32,
    pub playlist_id: u32,
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub track_id: u32,
    pub playlist_id: u32,
    pub entry_index: u32,
}

const ENTRY_LEN: usize = 12;

#[binrw]
#[brw(little)]
struct ArtistPrefix {
    subtype: u16,
    index_shift: u16,
    id: u32,
    marker: u8,
    name_near: u8,
}

const ARTIST_PREFIX_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    /// 0x60 (u8 name offset) or 0x64 (u16 name offset)
    pub subtype: u16,
    pub index_shift: u16,
    pub id: u32,
    pub name: String,
}

impl Default for Artist {
    fn default() -> Self {
        Self {
            subtype: ARTIST_SUBTYPE,
            index_shift: 0,
            id: 0,
            name: String::new(),
        }
    }
}

impl Artist {
    fn name_position(bytes: &[u8]) -> Result<usize> {
        let prefix: ArtistPrefix = read_fixed(bytes, ARTIST_PREFIX_LEN, "artist row")?;
        if prefix.subtype & FAR_NAME_BIT != 0 {
            far_offset(bytes, ARTIST_PREFIX_LEN, "artist row")
        } else {
            Ok(prefix.name_near as usize)
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let prefix: ArtistPrefix = read_fixed(bytes, ARTIST_PREFIX_LEN, "artist row")?;
        let name = string::decode(bytes, Self::name_position(bytes)?)?.text;
        Ok(Self {
            subtype: prefix.subtype,
            index_shift: prefix.index_shift,
            id: prefix.id,
            name,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let far = self.subtype & FAR_NAME_BIT != 0;
        let name_at = if far { ARTIST_PREFIX_LEN + 2 } else { ARTIST_PREFIX_LEN };
        let prefix = ArtistPrefix {
            subtype: self.subtype,
            index_shift: self.index_shift,
            id: self.id,
            marker: NAME_MARKER,
            name_near: if far { 0 } else { name_at as u8 },
        };

        let mut out = Vec::with_capacity(ARTIST_MIN_LEN);
        write_fixed(&prefix, &mut out)?;
        if far {
            out.extend_from_slice(&(name_at as u16).to_le_bytes());
        }
        out.extend(encode_string(&self.name)?);
        pad_to(&mut out, ARTIST_MIN_LEN);
        Ok(out)
    }
}

#[binrw]
#[brw(little)]
struct AlbumPrefix {
    subtype: u16,
    index_shift: u16,
    unknown2: u32,
    artist_id: u32,
    id: u32,
    unknown3: u32,
    marker: u8,
    name_near: u8,
}

const ALBUM_PREFIX_LEN: usize = 22;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    /// 0x80 (u8 name offset) or 0x84 (u16 name offset)
    pub subtype: u16,
    pub index_shift: u16,
    pub unknown2: u32,
    pub artist_id: u32,
    pub id: u32,
    pub unknown3: u32,
    pub name: String,
}

impl Default for Album {
    fn default() -> Self {
        Self {
            subtype: ALBUM_SUBTYPE,
            index_shift: 0,
            unknown2: 0,
            artist_id: 0,
            id: 0,
            unknown3: 0,
            name: String::new(),
        }
    }
}

impl Album {
    fn name_position(bytes: &[u8]) -> Result<usize> {
        let prefix: AlbumPrefix = read_fixed(bytes, ALBUM_PREFIX_LEN, "album row")?;
        if prefix.subtype & FAR_NAME_BIT != 0 {
            far_offset(bytes, ALBUM_PREFIX_LEN, "album row")
        } else {
            Ok(prefix.name_near as usize)
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let prefix: AlbumPrefix = read_fixed(bytes, ALBUM_PREFIX_LEN, "album row")?;
        let name = string::decode(bytes, Self::name_position(bytes)?)?.text;
        Ok(Self {
            subtype: prefix.subtype,
            index_shift: prefix.index_shift,
            unknown2: prefix.unknown2,
            artist_id: prefix.artist_id,
            id: prefix.id,
            unknown3: prefix.unknown3,
            name,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let far = self.subtype & FAR_NAME_BIT != 0;
        let name_at = if far { ALBUM_PREFIX_LEN + 2 } else { ALBUM_PREFIX_LEN };
        let prefix = AlbumPrefix {
            subtype: self.subtype,
            index_shift: self.index_shift,
            unknown2: self.unknown2,
            artist_id: self.artist_id,
            id: self.id,
            unknown3: self.unknown3,
            marker: NAME_MARKER,
            name_near: if far { 0 } else { name_at as u8 },
        };

        let mut out = Vec::with_capacity(ALBUM_MIN_LEN);
        write_fixed(&prefix, &mut out)?;
        if far {
            out.extend_from_slice(&(name_at as u16).to_le_bytes());
        }
        out.extend(encode_string(&self.name)?);
        pad_to(&mut out, ALBUM_MIN_LEN);
        Ok(out)
    }
}

fn far_offset(bytes: &[u8], at: usize, context: &'static str) -> Result<usize> {
    ensure_len(bytes, at + 2, context)?;
    Ok(u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize)
}

fn pad_to(out: &mut Vec<u8>, len: usize) {
    if out.len() < len {
        out.resize(len, 0);
    }
}

/// One decoded row of any table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Row {
    Track(Track),
    Genre(Genre),
    Artist(Artist),
    Album(Album),
    Label(Label),
    Key(Key),
    Color(Color),
    PlaylistTreeNode(PlaylistTreeNode),
    PlaylistEntry(PlaylistEntry),
    ArtworkRef(ArtworkRef),
    Column(Column),
    HistoryPlaylist(HistoryPlaylist),
    HistoryEntry(HistoryEntry),
    /// Rows of tables whose layout is not known. Read from a page, `bytes`
    /// runs up to the next row offset, so heap alignment padding is kept.
    Opaque { table: TableType, bytes: Vec<u8> },
}

macro_rules! row_from {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Row {
                fn from(row: $ty) -> Self {
                    Row::$variant(row)
                }
            }
        )*
    };
}

row_from! {
    Track => Track,
    Genre => Genre,
    Artist => Artist,
    Album => Album,
    Label => Label,
    Key => Key,
    Color => Color,
    PlaylistTreeNode => PlaylistTreeNode,
    PlaylistEntry => PlaylistEntry,
    ArtworkRef => ArtworkRef,
    Column => Column,
    HistoryPlaylist => HistoryPlaylist,
    HistoryEntry => HistoryEntry,
}

impl Row {
    /// Decode `bytes` as a row of `table`. `bytes` starts at the row and may
    /// run past its end.
    pub fn decode(table: TableType, bytes: &[u8]) -> Result<Self> {
        Ok(match table {
            TableType::Tracks => Row::Track(Track::decode(bytes)?),
            TableType::Genres => Row::Genre(Genre::decode(bytes)?),
            TableType::Artists => Row::Artist(Artist::decode(bytes)?),
            TableType::Albums => Row::Album(Album::decode(bytes)?),
            TableType::Labels => Row::Label(Label::decode(bytes)?),
            TableType::Keys => Row::Key(Key::decode(bytes)?),
            TableType::Colors => Row::Color(Color::decode(bytes)?),
            TableType::PlaylistTree => Row::PlaylistTreeNode(PlaylistTreeNode::decode(bytes)?),
            TableType::PlaylistEntries => {
                Row::PlaylistEntry(read_fixed(bytes, ENTRY_LEN, "playlist entry row")?)
            }
            TableType::Artwork => Row::ArtworkRef(ArtworkRef::decode(bytes)?),
            TableType::Columns => Row::Column(Column::decode(bytes)?),
            TableType::HistoryPlaylists => Row::HistoryPlaylist(HistoryPlaylist::decode(bytes)?),
            TableType::HistoryEntries => {
                Row::HistoryEntry(read_fixed(bytes, ENTRY_LEN, "history entry row")?)
            }
            other => Row::Opaque {
                table: other,
                bytes: bytes.to_vec(),
            },
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Row::Track(row) => row.encode(),
            Row::Genre(row) => row.encode(),
            Row::Artist(row) => row.encode(),
            Row::Album(row) => row.encode(),
            Row::Label(row) => row.encode(),
            Row::Key(row) => row.encode(),
            Row::Color(row) => row.encode(),
            Row::PlaylistTreeNode(row) => row.encode(),
            Row::PlaylistEntry(row) => {
                let mut out = Vec::with_capacity(ENTRY_LEN);
                write_fixed(row, &mut out)?;
                Ok(out)
            }
            Row::ArtworkRef(row) => row.encode(),
            Row::Column(row) => row.encode(),
            Row::HistoryPlaylist(row) => row.encode(),
            Row::HistoryEntry(row) => {
                let mut out = Vec::with_capacity(ENTRY_LEN);
                write_fixed(row, &mut out)?;
                Ok(out)
            }
            Row::Opaque { bytes, .. } => Ok(bytes.clone()),
        }
    }

    pub fn table_type(&self) -> TableType {
        match self {
            Row::Track(_) => TableType::Tracks,
            Row::Genre(_) => TableType::Genres,
            Row::Artist(_) => TableType::Artists,
            Row::Album(_) => TableType::Albums,
            Row::Label(_) => TableType::Labels,
            Row::Key(_) => TableType::Keys,
            Row::Color(_) => TableType::Colors,
            Row::PlaylistTreeNode(_) => TableType::PlaylistTree,
            Row::PlaylistEntry(_) => TableType::PlaylistEntries,
            Row::ArtworkRef(_) => TableType::Artwork,
            Row::Column(_) => TableType::Columns,
            Row::HistoryPlaylist(_) => TableType::HistoryPlaylists,
            Row::HistoryEntry(_) => TableType::HistoryEntries,
            Row::Opaque { table, .. } => *table,
        }
    }

    /// Primary key, for rows that have one
    pub fn id(&self) -> Option<u32> {
        match self {
            Row::Track(row) => Some(row.id),
            Row::Genre(row) => Some(row.id),
            Row::Artist(row) => Some(row.id),
            Row::Album(row) => Some(row.id),
            Row::Label(row) => Some(row.id),
            Row::Key(row) => Some(row.id),
            Row::Color(row) => Some(row.id as u32),
            Row::PlaylistTreeNode(row) => Some(row.id),
            Row::ArtworkRef(row) => Some(row.id),
            Row::Column(row) => Some(row.id as u32),
            Row::HistoryPlaylist(row) => Some(row.id),
            Row::PlaylistEntry(_) | Row::HistoryEntry(_) | Row::Opaque { .. } => None,
        }
    }

    /// Zero-valued stand-in for a row that failed to decode
    pub fn placeholder(table: TableType) -> Self {
        match table {
            TableType::Tracks => Row::Track(Track::default()),
            TableType::Genres => Row::Genre(Genre::default()),
            TableType::Artists => Row::Artist(Artist::default()),
            TableType::Albums => Row::Album(Album::default()),
            TableType::Labels => Row::Label(Label::default()),
            TableType::Keys => Row::Key(Key::default()),
            TableType::Colors => Row::Color(Color::default()),
            TableType::PlaylistTree => Row::PlaylistTreeNode(PlaylistTreeNode::default()),
            TableType::PlaylistEntries => Row::PlaylistEntry(PlaylistEntry::default()),
            TableType::Artwork => Row::ArtworkRef(ArtworkRef::default()),
            TableType::Columns => Row::Column(Column::default()),
            TableType::HistoryPlaylists => Row::HistoryPlaylist(HistoryPlaylist::default()),
            TableType::HistoryEntries => Row::HistoryEntry(HistoryEntry::default()),
            other => Row::Opaque {
                table: other,
                bytes: Vec::new(),
            },
        }
    }

    /// Rewrite the position-derived `index_shift`, for rows that carry one.
    pub fn set_index_shift(&mut self, position: usize) {
        let shift = (position as u16).wrapping_mul(0x20);
        match self {
            Row::Track(row) => row.index_shift = shift,
            Row::Artist(row) => row.index_shift = shift,
            Row::Album(row) => row.index_shift = shift,
            _ => {}
        }
    }
}

/// Byte position of a stored string inside the encoded row of `table`.
pub fn string_position(table: TableType, bytes: &[u8], field: StringField) -> Result<usize> {
    let missing = || {
        Error::OutOfRange(format!("{:?} rows have no {:?} string", table, field))
    };

    match (table, field) {
        (TableType::Tracks, StringField::Track(slot)) => {
            match track::string_offsets(bytes)?[slot.index()] {
                0 => Err(Error::OutOfRange(format!("track string {:?} is absent", slot))),
                offset => Ok(offset as usize),
            }
        }
        (TableType::Artists, StringField::Name) => Artist::name_position(bytes),
        (TableType::Albums, StringField::Name) => Album::name_position(bytes),
        (TableType::Genres, StringField::Name) => Ok(Genre::FIXED_LEN),
        (TableType::Labels, StringField::Name) => Ok(Label::FIXED_LEN),
        (TableType::Keys, StringField::Name) => Ok(Key::FIXED_LEN),
        (TableType::Colors, StringField::Name) => Ok(Color::FIXED_LEN),
        (TableType::PlaylistTree, StringField::Name) => Ok(PlaylistTreeNode::FIXED_LEN),
        (TableType::Artwork, StringField::Name) => Ok(ArtworkRef::FIXED_LEN),
        (TableType::Columns, StringField::Name) => Ok(Column::FIXED_LEN),
        (TableType::HistoryPlaylists, StringField::Name) => Ok(HistoryPlaylist::FIXED_LEN),
        _ => Err(missing()),
    }
}

/// The eight preset track colors
pub fn preset_colors() -> Vec<Color> {
    ["Pink", "Red", "Orange", "Yellow", "Green", "Aqua", "Blue", "Purple"]
        .iter()
        .zip(1u8..)
        .map(|(name, id)| Color {
            id,
            name: name.to_string(),
            ..Color::default()
        })
        .collect()
}

/// The 24 musical keys, minor keys first
pub fn preset_keys() -> Vec<Key> {
    [
        "Am", "Bbm", "Bm", "Cm", "Dbm", "Dm", "Ebm", "Em", "Fm", "Gbm", "Gm", "Abm", "A", "Bb",
        "B", "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab",
    ]
    .iter()
    .zip(1u32..)
    .map(|(name, id)| Key {
        id,
        id2: id,
        name: name.to_string(),
    })
    .collect()
}
