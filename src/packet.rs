//! Decoded media packets.
//!
//! A [`Packet`] is one codec frame with its timing and flags, detached from
//! the block that carried it. Packets on a zlib-compressed track keep both
//! the raw and compressed representations, materializing the missing one on
//! demand.

use crate::error::{MatroskaError, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// Per-track content compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Frames stored as-is.
    #[default]
    None,
    /// Frames stored zlib-deflated (ContentCompAlgo 0).
    Zlib,
}

/// A single media frame with timing and flags.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// Track this packet belongs to.
    pub track_number: u64,
    /// Presentation timestamp in nanoseconds.
    pub pts: u64,
    /// Duration in nanoseconds, if known.
    pub duration: Option<u64>,
    /// Whether this frame can be decoded without references.
    pub keyframe: bool,
    /// Whether the frame duration is zero on screen.
    pub invisible: bool,
    /// Whether the frame may be dropped under timing pressure.
    pub discardable: bool,
    /// Timestamp offsets (nanoseconds) of frames this one references.
    pub reference_blocks: Vec<i64>,
    data: Option<Vec<u8>>,
    zdata: Option<Vec<u8>>,
    compression: Compression,
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(9));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(zdata: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(zdata).read_to_end(&mut out)?;
    Ok(out)
}

impl Packet {
    /// Create a packet from raw frame data.
    pub fn new(track_number: u64, pts: u64, data: Vec<u8>) -> Self {
        Self {
            track_number,
            pts,
            data: Some(data),
            ..Default::default()
        }
    }

    /// Create a packet from zlib-compressed frame data, as read off a
    /// compressed track.
    pub fn from_compressed(track_number: u64, pts: u64, zdata: Vec<u8>) -> Self {
        Self {
            track_number,
            pts,
            zdata: Some(zdata),
            compression: Compression::Zlib,
            ..Default::default()
        }
    }

    /// Set the duration in nanoseconds.
    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Mark this packet as a keyframe.
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    /// Mark this packet as invisible.
    pub fn with_invisible(mut self, invisible: bool) -> Self {
        self.invisible = invisible;
        self
    }

    /// Mark this packet as discardable.
    pub fn with_discardable(mut self, discardable: bool) -> Self {
        self.discardable = discardable;
        self
    }

    /// Set the reference block offsets (nanoseconds).
    pub fn with_reference_blocks(mut self, refs: Vec<i64>) -> Self {
        self.reference_blocks = refs;
        self
    }

    /// A standalone copy holding raw frame bytes only, detached from any
    /// track's wire compression.
    pub fn copy_detached(&mut self) -> Result<Packet> {
        let data = self.data()?.to_vec();
        Ok(Packet {
            data: Some(data),
            zdata: None,
            compression: Compression::None,
            ..self.clone()
        })
    }

    /// The compression this packet is stored with on the wire.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Change the wire compression, materializing the missing
    /// representation.
    pub fn set_compression(&mut self, compression: Compression) -> Result<()> {
        match compression {
            Compression::Zlib if self.zdata.is_none() => {
                let data = self.data.as_deref().ok_or_else(|| {
                    MatroskaError::InvalidBlock("packet has no data".to_string())
                })?;
                self.zdata = Some(deflate(data)?);
            }
            Compression::None if self.data.is_none() => {
                let zdata = self.zdata.as_deref().ok_or_else(|| {
                    MatroskaError::InvalidBlock("packet has no data".to_string())
                })?;
                self.data = Some(inflate(zdata)?);
            }
            _ => {}
        }
        self.compression = compression;
        Ok(())
    }

    /// The raw (decompressed) frame bytes, inflating if necessary.
    pub fn data(&mut self) -> Result<&[u8]> {
        if self.data.is_none() {
            let zdata = self.zdata.as_deref().ok_or_else(|| {
                MatroskaError::InvalidBlock("packet has no data".to_string())
            })?;
            self.data = Some(inflate(zdata)?);
        }
        Ok(self.data.as_deref().unwrap_or(&[]))
    }

    /// The bytes as they appear inside a block, deflating if the packet's
    /// wire compression requires it.
    pub fn wire_data(&mut self) -> Result<&[u8]> {
        match self.compression {
            Compression::None => self.data(),
            Compression::Zlib => {
                if self.zdata.is_none() {
                    let data = self.data.as_deref().ok_or_else(|| {
                        MatroskaError::InvalidBlock("packet has no data".to_string())
                    })?;
                    self.zdata = Some(deflate(data)?);
                }
                Ok(self.zdata.as_deref().unwrap_or(&[]))
            }
        }
    }

    /// Size of the packet's on-wire form.
    pub fn wire_size(&mut self) -> Result<usize> {
        Ok(self.wire_data()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_builder() {
        let pkt = Packet::new(1, 40_000_000, vec![1, 2, 3])
            .with_duration(20_000_000)
            .with_keyframe(true)
            .with_discardable(true);
        assert_eq!(pkt.track_number, 1);
        assert_eq!(pkt.pts, 40_000_000);
        assert_eq!(pkt.duration, Some(20_000_000));
        assert!(pkt.keyframe);
        assert!(pkt.discardable);
        assert!(!pkt.invisible);
    }

    #[test]
    fn test_zlib_roundtrip() {
        let raw: Vec<u8> = (0..200u8).cycle().take(4096).collect();
        let mut pkt = Packet::new(1, 0, raw.clone());
        pkt.set_compression(Compression::Zlib).unwrap();

        let wire = pkt.wire_data().unwrap().to_vec();
        assert!(wire.len() < raw.len());

        let mut decoded = Packet::from_compressed(1, 0, wire);
        assert_eq!(decoded.data().unwrap(), raw.as_slice());
    }

    #[test]
    fn test_uncompressed_wire_data_is_raw() {
        let mut pkt = Packet::new(2, 0, vec![9, 9, 9]);
        assert_eq!(pkt.wire_data().unwrap(), &[9, 9, 9]);
        assert_eq!(pkt.wire_size().unwrap(), 3);
    }

    #[test]
    fn test_decompress_on_demand() {
        let raw = b"subtitle line".to_vec();
        let deflated = deflate(&raw).unwrap();
        let mut pkt = Packet::from_compressed(3, 0, deflated);
        assert_eq!(pkt.compression(), Compression::Zlib);
        assert_eq!(pkt.data().unwrap(), raw.as_slice());
    }

    #[test]
    fn test_copy_detached_drops_compression() {
        let raw = b"copy me".to_vec();
        let mut pkt = Packet::new(4, 1_000, raw.clone()).with_keyframe(true);
        pkt.set_compression(Compression::Zlib).unwrap();

        let mut copy = pkt.copy_detached().unwrap();
        assert_eq!(copy.compression(), Compression::None);
        assert_eq!(copy.data().unwrap(), raw.as_slice());
        assert!(copy.keyframe);
        assert_eq!(copy.pts, 1_000);
    }
}
