//! Segment information.

use crate::ebml::{
    read_float, read_string, read_unsigned_int, write_binary_element, write_float_element,
    write_string_element, write_uint_element, ElementHeader,
};
use crate::elements;
use crate::error::Result;
use std::io::{Read, Seek};

/// Segment-level metadata from the Info element.
///
/// Duration is kept in ticks, the unit defined by the timestamp scale.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// Nanoseconds per tick.
    pub timestamp_scale: u64,
    /// Segment duration in ticks.
    pub duration: f64,
    /// Name of the muxing library.
    pub muxing_app: String,
    /// Name of the writing application.
    pub writing_app: String,
    /// Segment title.
    pub title: Option<String>,
}

impl Default for SegmentInfo {
    fn default() -> Self {
        Self {
            timestamp_scale: 1_000_000,
            duration: 0.0,
            muxing_app: concat!("matroska-rs ", env!("CARGO_PKG_VERSION")).to_string(),
            writing_app: concat!("matroska-rs ", env!("CARGO_PKG_VERSION")).to_string(),
            title: None,
        }
    }
}

impl SegmentInfo {
    /// Convert a tick count to nanoseconds.
    pub fn ticks_to_ns(&self, ticks: u64) -> u64 {
        ticks * self.timestamp_scale
    }

    /// Convert nanoseconds to ticks, rounding to nearest.
    pub fn ns_to_ticks(&self, ns: u64) -> u64 {
        (ns + self.timestamp_scale / 2) / self.timestamp_scale
    }

    /// Encode as a complete Info element.
    ///
    /// Duration is always written as an 8-byte float so the element keeps
    /// its size when rewritten in place as the segment grows.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        write_uint_element(&mut body, elements::TIMESTAMP_SCALE, self.timestamp_scale);
        write_float_element(&mut body, elements::DURATION, self.duration);
        write_string_element(&mut body, elements::MUXING_APP, &self.muxing_app);
        write_string_element(&mut body, elements::WRITING_APP, &self.writing_app);
        if let Some(title) = &self.title {
            write_string_element(&mut body, elements::TITLE, title);
        }

        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, elements::INFO, &body);
        out
    }

    /// Decode an Info element body of the given size.
    pub fn decode<R: Read + Seek>(reader: &mut R, size: u64) -> Result<Self> {
        let mut info = SegmentInfo::default();
        let end_pos = reader.stream_position()? + size;

        while reader.stream_position()? < end_pos {
            let header = ElementHeader::read(reader)?;
            let child_size = header.size.unwrap_or(0);
            let mut data = vec![0u8; child_size as usize];
            reader.read_exact(&mut data)?;

            match header.id {
                elements::TIMESTAMP_SCALE => info.timestamp_scale = read_unsigned_int(&data),
                elements::DURATION => info.duration = read_float(&data),
                elements::MUXING_APP => info.muxing_app = read_string(&data)?,
                elements::WRITING_APP => info.writing_app = read_string(&data)?,
                elements::TITLE => info.title = Some(read_string(&data)?),
                _ => {}
            }
        }

        Ok(info)
    }
}
