//! Segment indexes: SeekHead and Cues.

use crate::ebml::{
    encode_unsigned_int, read_unsigned_int, write_binary_element, write_uint_element,
    ElementHeader,
};
use crate::elements;
use crate::error::Result;
use std::io::{Read, Seek};

/// Index of top-level elements by their offset in the segment.
///
/// Keyed by element ID; inserting an ID that is already present updates its
/// offset.
#[derive(Debug, Clone, Default)]
pub struct SeekHead {
    entries: Vec<(u32, u64)>,
}

impl SeekHead {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the segment-relative offset of a top-level element.
    pub fn insert(&mut self, id: u32, position: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|(eid, _)| *eid == id) {
            entry.1 = position;
        } else {
            self.entries.push((id, position));
        }
    }

    /// Look up the offset of a top-level element.
    pub fn get(&self, id: u32) -> Option<u64> {
        self.entries.iter().find(|(eid, _)| *eid == id).map(|&(_, pos)| pos)
    }

    /// The recorded (element ID, offset) pairs, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of indexed elements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode as a complete SeekHead element.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for &(id, position) in &self.entries {
            let mut seek = Vec::new();
            write_binary_element(&mut seek, elements::SEEK_ID, &encode_unsigned_int(id as u64));
            write_uint_element(&mut seek, elements::SEEK_POSITION, position);
            write_binary_element(&mut body, elements::SEEK, &seek);
        }

        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, elements::SEEK_HEAD, &body);
        out
    }

    /// Decode a SeekHead element body of the given size.
    pub fn decode<R: Read + Seek>(reader: &mut R, size: u64) -> Result<Self> {
        let mut seek_head = SeekHead::new();
        let end_pos = reader.stream_position()? + size;

        while reader.stream_position()? < end_pos {
            let header = ElementHeader::read(reader)?;
            let child_size = header.size.unwrap_or(0);
            let mut data = vec![0u8; child_size as usize];
            reader.read_exact(&mut data)?;

            if header.id != elements::SEEK {
                continue;
            }

            let mut cursor = std::io::Cursor::new(data.as_slice());
            let mut seek_id = None;
            let mut seek_pos = None;
            while (cursor.position() as usize) < data.len() {
                let child = ElementHeader::read(&mut cursor)?;
                let len = child.size.unwrap_or(0) as usize;
                let start = cursor.position() as usize;
                let payload = data.get(start..start + len).unwrap_or(&[]);
                cursor.set_position((start + len) as u64);

                match child.id {
                    elements::SEEK_ID => seek_id = Some(read_unsigned_int(payload) as u32),
                    elements::SEEK_POSITION => seek_pos = Some(read_unsigned_int(payload)),
                    _ => {}
                }
            }
            if let (Some(id), Some(pos)) = (seek_id, seek_pos) {
                seek_head.insert(id, pos);
            }
        }

        Ok(seek_head)
    }
}

/// Where one track's data for a cue point lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueTrackPosition {
    /// Track number.
    pub track: u64,
    /// Segment-relative offset of the cluster.
    pub cluster_position: u64,
    /// Offset of the block inside the cluster, when recorded.
    pub relative_position: Option<u64>,
}

/// One seeking landmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuePoint {
    /// Cue time in ticks.
    pub time: u64,
    /// Per-track positions for this time.
    pub positions: Vec<CueTrackPosition>,
}

/// The segment's seeking index, ordered by time.
#[derive(Debug, Clone, Default)]
pub struct Cues {
    points: Vec<CuePoint>,
}

impl Cues {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cue point. Points are kept in time order.
    pub fn add(&mut self, point: CuePoint) {
        let at = self
            .points
            .iter()
            .position(|p| p.time > point.time)
            .unwrap_or(self.points.len());
        self.points.insert(at, point);
    }

    /// All cue points in time order.
    pub fn points(&self) -> &[CuePoint] {
        &self.points
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The latest cue point at or before `time` ticks.
    ///
    /// With a track given, only cue points carrying a position for that
    /// track qualify.
    pub fn find(&self, time: u64, track: Option<u64>) -> Option<&CuePoint> {
        self.points
            .iter()
            .filter(|p| p.time <= time)
            .filter(|p| match track {
                Some(t) => p.positions.iter().any(|pos| pos.track == t),
                None => true,
            })
            .max_by_key(|p| p.time)
    }

    /// Encode as a complete Cues element.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for point in &self.points {
            let mut cue = Vec::new();
            write_uint_element(&mut cue, elements::CUE_TIME, point.time);
            for position in &point.positions {
                let mut positions = Vec::new();
                write_uint_element(&mut positions, elements::CUE_TRACK, position.track);
                write_uint_element(
                    &mut positions,
                    elements::CUE_CLUSTER_POSITION,
                    position.cluster_position,
                );
                if let Some(relative) = position.relative_position {
                    write_uint_element(&mut positions, elements::CUE_RELATIVE_POSITION, relative);
                }
                write_binary_element(&mut cue, elements::CUE_TRACK_POSITIONS, &positions);
            }
            write_binary_element(&mut body, elements::CUE_POINT, &cue);
        }

        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, elements::CUES, &body);
        out
    }

    /// Decode a Cues element body of the given size.
    pub fn decode<R: Read + Seek>(reader: &mut R, size: u64) -> Result<Self> {
        let mut cues = Cues::new();
        let end_pos = reader.stream_position()? + size;

        while reader.stream_position()? < end_pos {
            let header = ElementHeader::read(reader)?;
            let child_size = header.size.unwrap_or(0);
            let mut data = vec![0u8; child_size as usize];
            reader.read_exact(&mut data)?;

            if header.id != elements::CUE_POINT {
                continue;
            }
            cues.add(parse_cue_point(&data)?);
        }

        Ok(cues)
    }
}

fn parse_cue_point(data: &[u8]) -> Result<CuePoint> {
    let mut point = CuePoint {
        time: 0,
        positions: Vec::new(),
    };
    let mut cursor = std::io::Cursor::new(data);

    while (cursor.position() as usize) < data.len() {
        let header = ElementHeader::read(&mut cursor)?;
        let len = header.size.unwrap_or(0) as usize;
        let start = cursor.position() as usize;
        let payload = data.get(start..start + len).unwrap_or(&[]);
        cursor.set_position((start + len) as u64);

        match header.id {
            elements::CUE_TIME => point.time = read_unsigned_int(payload),
            elements::CUE_TRACK_POSITIONS => {
                let mut position = CueTrackPosition {
                    track: 0,
                    cluster_position: 0,
                    relative_position: None,
                };
                let mut inner = std::io::Cursor::new(payload);
                while (inner.position() as usize) < payload.len() {
                    let child = ElementHeader::read(&mut inner)?;
                    let child_len = child.size.unwrap_or(0) as usize;
                    let child_start = inner.position() as usize;
                    let child_payload =
                        payload.get(child_start..child_start + child_len).unwrap_or(&[]);
                    inner.set_position((child_start + child_len) as u64);

                    match child.id {
                        elements::CUE_TRACK => position.track = read_unsigned_int(child_payload),
                        elements::CUE_CLUSTER_POSITION => {
                            position.cluster_position = read_unsigned_int(child_payload)
                        }
                        elements::CUE_RELATIVE_POSITION => {
                            position.relative_position =
                                Some(read_unsigned_int(child_payload))
                        }
                        _ => {}
                    }
                }
                point.positions.push(position);
            }
            _ => {}
        }
    }

    Ok(point)
}
