//! Track definitions.
//!
//! Carries the subset of the TrackEntry schema the engine acts on: timing
//! (default duration), lacing preferences, and the zlib content-compression
//! chain. Unknown children are skipped on read and not preserved.

use crate::ebml::{
    read_string, read_unsigned_int, write_binary_element, write_string_element,
    write_uint_element, ElementHeader,
};
use crate::elements;
use crate::error::{MatroskaError, Result};
use crate::packet::Compression;
use std::io::{Read, Seek};

/// Track type, from the TrackType element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackType {
    /// Video track.
    Video,
    /// Audio track.
    Audio,
    /// Subtitle track.
    Subtitle,
    /// Any other track type, carrying its raw value.
    #[default]
    Other,
}

impl TrackType {
    /// Map a TrackType element value.
    pub fn from_id(id: u64) -> Self {
        match id {
            elements::track_types::VIDEO => TrackType::Video,
            elements::track_types::AUDIO => TrackType::Audio,
            elements::track_types::SUBTITLE => TrackType::Subtitle,
            _ => TrackType::Other,
        }
    }

    /// The TrackType element value.
    pub fn to_id(self) -> u64 {
        match self {
            TrackType::Video => elements::track_types::VIDEO,
            TrackType::Audio => elements::track_types::AUDIO,
            TrackType::Subtitle => elements::track_types::SUBTITLE,
            TrackType::Other => elements::track_types::COMPLEX,
        }
    }
}

/// One track's definition.
#[derive(Debug, Clone)]
pub struct TrackEntry {
    /// Track number, as used in block headers.
    pub number: u64,
    /// Track UID.
    pub uid: u64,
    /// Track type.
    pub track_type: TrackType,
    /// Codec identifier (e.g. "V_VP9").
    pub codec_id: String,
    /// Codec initialization data.
    pub codec_private: Option<Vec<u8>>,
    /// Human-readable name.
    pub name: Option<String>,
    /// Language code.
    pub language: Option<String>,
    /// Nominal frame duration in nanoseconds.
    pub default_duration: Option<u64>,
    /// Whether frames on this track may be laced.
    pub flag_lacing: bool,
    /// Upper bound on frames accumulated into one laced block. Writer
    /// configuration only, not serialized.
    pub max_in_lace: usize,
    /// Content compression applied to every frame on this track.
    pub compression: Compression,
}

impl Default for TrackEntry {
    fn default() -> Self {
        Self {
            number: 0,
            uid: 0,
            track_type: TrackType::Other,
            codec_id: String::new(),
            codec_private: None,
            name: None,
            language: None,
            default_duration: None,
            flag_lacing: true,
            max_in_lace: 8,
            compression: Compression::None,
        }
    }
}

impl TrackEntry {
    /// Create a track entry with the required fields.
    pub fn new(number: u64, track_type: TrackType, codec_id: &str) -> Self {
        Self {
            number,
            uid: number,
            track_type,
            codec_id: codec_id.to_string(),
            ..Default::default()
        }
    }

    /// Whether this is a video track.
    pub fn is_video(&self) -> bool {
        self.track_type == TrackType::Video
    }

    /// Whether this is a subtitle track.
    pub fn is_subtitle(&self) -> bool {
        self.track_type == TrackType::Subtitle
    }

    /// Encode as a complete TrackEntry element.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        write_uint_element(&mut body, elements::TRACK_NUMBER, self.number);
        write_uint_element(&mut body, elements::TRACK_UID, self.uid);
        write_uint_element(&mut body, elements::TRACK_TYPE, self.track_type.to_id());
        write_uint_element(&mut body, elements::FLAG_LACING, self.flag_lacing as u64);
        write_string_element(&mut body, elements::CODEC_ID, &self.codec_id);
        if let Some(private) = &self.codec_private {
            write_binary_element(&mut body, elements::CODEC_PRIVATE, private);
        }
        if let Some(name) = &self.name {
            write_string_element(&mut body, elements::NAME, name);
        }
        if let Some(language) = &self.language {
            write_string_element(&mut body, elements::LANGUAGE, language);
        }
        if let Some(duration) = self.default_duration {
            write_uint_element(&mut body, elements::DEFAULT_DURATION, duration);
        }
        if self.compression == Compression::Zlib {
            let mut compression = Vec::new();
            write_uint_element(
                &mut compression,
                elements::CONTENT_COMP_ALGO,
                elements::comp_algo::ZLIB,
            );

            let mut encoding = Vec::new();
            write_uint_element(&mut encoding, elements::CONTENT_ENCODING_ORDER, 0);
            write_uint_element(&mut encoding, elements::CONTENT_ENCODING_SCOPE, 1);
            write_uint_element(&mut encoding, elements::CONTENT_ENCODING_TYPE, 0);
            write_binary_element(&mut encoding, elements::CONTENT_COMPRESSION, &compression);

            let mut encodings = Vec::new();
            write_binary_element(&mut encodings, elements::CONTENT_ENCODING, &encoding);

            write_binary_element(&mut body, elements::CONTENT_ENCODINGS, &encodings);
        }

        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, elements::TRACK_ENTRY, &body);
        out
    }

    /// Decode a TrackEntry element body of the given size.
    pub fn decode<R: Read + Seek>(reader: &mut R, size: u64) -> Result<Self> {
        let mut entry = TrackEntry::default();
        let end_pos = reader.stream_position()? + size;

        while reader.stream_position()? < end_pos {
            let header = ElementHeader::read(reader)?;
            let child_size = header.size.unwrap_or(0);
            let mut data = vec![0u8; child_size as usize];
            reader.read_exact(&mut data)?;

            match header.id {
                elements::TRACK_NUMBER => entry.number = read_unsigned_int(&data),
                elements::TRACK_UID => entry.uid = read_unsigned_int(&data),
                elements::TRACK_TYPE => {
                    entry.track_type = TrackType::from_id(read_unsigned_int(&data))
                }
                elements::FLAG_LACING => entry.flag_lacing = read_unsigned_int(&data) != 0,
                elements::CODEC_ID => entry.codec_id = read_string(&data)?,
                elements::CODEC_PRIVATE => entry.codec_private = Some(data),
                elements::NAME => entry.name = Some(read_string(&data)?),
                elements::LANGUAGE => entry.language = Some(read_string(&data)?),
                elements::DEFAULT_DURATION => {
                    entry.default_duration = Some(read_unsigned_int(&data))
                }
                elements::CONTENT_ENCODINGS => {
                    entry.compression = parse_content_encodings(&data)?
                }
                _ => {}
            }
        }

        Ok(entry)
    }
}

/// Walk the ContentEncodings chain looking for a compression algorithm.
fn parse_content_encodings(data: &[u8]) -> Result<Compression> {
    let mut cursor = std::io::Cursor::new(data);

    while (cursor.position() as usize) < data.len() {
        let header = ElementHeader::read(&mut cursor)?;
        let child_size = header.size.unwrap_or(0) as usize;
        let start = cursor.position() as usize;
        let child = data.get(start..start + child_size).ok_or_else(|| {
            MatroskaError::InvalidElementSize {
                offset: start as u64,
                message: "content encoding child overruns parent".to_string(),
            }
        })?;
        cursor.set_position((start + child_size) as u64);

        match header.id {
            elements::CONTENT_ENCODING | elements::CONTENT_COMPRESSION => {
                // Nested containers share the same scan
                let found = parse_content_encodings(child)?;
                if found != Compression::None {
                    return Ok(found);
                }
            }
            elements::CONTENT_COMP_ALGO => {
                let algo = crate::ebml::read_unsigned_int(child);
                if algo != elements::comp_algo::ZLIB {
                    return Err(MatroskaError::UnsupportedCompression { algo });
                }
                return Ok(Compression::Zlib);
            }
            _ => {}
        }
    }

    Ok(Compression::None)
}

/// The segment's track table, indexed by track number.
#[derive(Debug, Clone, Default)]
pub struct Tracks {
    entries: Vec<TrackEntry>,
}

impl Tracks {
    /// Create an empty track table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track. Track numbers must be unique.
    pub fn add(&mut self, entry: TrackEntry) -> Result<()> {
        if self.by_number(entry.number).is_some() {
            return Err(MatroskaError::Other(format!(
                "Duplicate track number {}",
                entry.number
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Look up a track by its number.
    pub fn by_number(&self, number: u64) -> Option<&TrackEntry> {
        self.entries.iter().find(|t| t.number == number)
    }

    /// All tracks, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackEntry> {
        self.entries.iter()
    }

    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode as a complete Tracks element.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for entry in &self.entries {
            body.extend_from_slice(&entry.encode());
        }
        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, elements::TRACKS, &body);
        out
    }

    /// Decode a Tracks element body of the given size.
    pub fn decode<R: Read + Seek>(reader: &mut R, size: u64) -> Result<Self> {
        let mut tracks = Tracks::new();
        let end_pos = reader.stream_position()? + size;

        while reader.stream_position()? < end_pos {
            let header = ElementHeader::read(reader)?;
            let child_size = header.size.unwrap_or(0);
            if header.id == elements::TRACK_ENTRY {
                tracks.add(TrackEntry::decode(reader, child_size)?)?;
            } else {
                crate::ebml::skip_element(reader, child_size)?;
            }
        }

        Ok(tracks)
    }
}
