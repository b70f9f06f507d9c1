//! Block and BlockGroup codecs.
//!
//! A block's binary layout is: track number VINT, a signed 16-bit
//! big-endian cluster-relative timestamp, a flags byte, then the lacing
//! header and frame bodies. SimpleBlock keeps its keyframe bit in the flags
//! byte; a Block inside a BlockGroup derives it from the absence of
//! ReferenceBlock children.

use crate::ebml::{
    read_signed_int, read_unsigned_int, read_vint, write_binary_element, write_sint_element,
    write_uint_element, write_vint, ElementHeader,
};
use crate::elements;
use crate::error::{MatroskaError, Result};
use crate::lacing::{self, Lacing};
use crate::packet::{Compression, Packet};
use crate::tracks::Tracks;
use std::io::Cursor;

/// Decode-time context a block needs to resolve timing and compression.
#[derive(Clone, Copy)]
pub struct BlockContext<'a> {
    /// Nanoseconds per tick.
    pub timestamp_scale: u64,
    /// Timestamp of the enclosing cluster, in ticks.
    pub cluster_timestamp: u64,
    /// The segment's track table.
    pub tracks: &'a Tracks,
}

impl<'a> BlockContext<'a> {
    /// Absolute nanosecond timestamp for a cluster-relative tick offset.
    fn base_pts(&self, local_pts: i16) -> u64 {
        let ticks = self.cluster_timestamp as i64 + local_pts as i64;
        (ticks.max(0) as u64) * self.timestamp_scale
    }
}

/// A SimpleBlock or the Block inside a BlockGroup.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Track number.
    pub track_number: u64,
    /// Timestamp in ticks, relative to the cluster timestamp.
    pub local_pts: i16,
    /// Keyframe flag (SimpleBlock only on the wire).
    pub keyframe: bool,
    /// Invisible flag.
    pub invisible: bool,
    /// Discardable flag (SimpleBlock only on the wire).
    pub discardable: bool,
    /// Lacing scheme used for the frame bodies.
    pub lacing: Lacing,
    /// The frames carried by this block, in presentation order.
    pub packets: Vec<Packet>,
}

impl Block {
    /// Encode the block body (the bytes inside the element).
    ///
    /// `keyframe_flag` controls whether the keyframe bit is written; it is
    /// meaningless for a Block inside a BlockGroup.
    pub fn encode_body(&mut self, keyframe_flag: bool) -> Result<Vec<u8>> {
        if self.packets.is_empty() {
            return Err(MatroskaError::InvalidBlock("block with no frames".to_string()));
        }

        let mut sizes = Vec::with_capacity(self.packets.len());
        for packet in &mut self.packets {
            sizes.push(packet.wire_size()?);
        }
        let header = lacing::encode_header(&sizes, self.lacing)?;

        let mut body = Vec::new();
        write_vint(&mut body, self.track_number)?;
        body.extend_from_slice(&self.local_pts.to_be_bytes());

        let mut flags = (self.lacing.flag_bits() << 1)
            | ((self.invisible as u8) << 3)
            | self.discardable as u8;
        if keyframe_flag && self.keyframe {
            flags |= 0x80;
        }
        body.push(flags);

        body.extend_from_slice(&header);
        for packet in &mut self.packets {
            let data = packet.wire_data()?;
            body.extend_from_slice(data);
        }

        Ok(body)
    }

    /// Decode a block body.
    ///
    /// `keyframe_from_flags` selects SimpleBlock semantics; a Block inside
    /// a group leaves `keyframe` false for the caller to settle.
    pub fn decode_body(data: &[u8], ctx: &BlockContext, keyframe_from_flags: bool) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let (track_number, _) = read_vint(&mut cursor)?;

        let pos = cursor.position() as usize;
        let rest = data.get(pos..).unwrap_or(&[]);
        if rest.len() < 3 {
            return Err(MatroskaError::InvalidBlock("truncated block header".to_string()));
        }
        let local_pts = i16::from_be_bytes([rest[0], rest[1]]);
        let flags = rest[2];

        let lacing = Lacing::from_flags(flags);
        let invisible = flags & 0x08 != 0;
        let discardable = flags & 0x01 != 0;
        let keyframe = keyframe_from_flags && flags & 0x80 != 0;

        let body = &rest[3..];
        let (sizes, consumed) = lacing::decode_sizes(body, lacing)?;

        let track = ctx
            .tracks
            .by_number(track_number)
            .ok_or(MatroskaError::TrackNotFound { track_number })?;

        let base_pts = ctx.base_pts(local_pts);
        let spacing = track.default_duration.unwrap_or(0);

        let mut packets = Vec::with_capacity(sizes.len());
        let mut offset = consumed;
        for (index, &size) in sizes.iter().enumerate() {
            let frame = body[offset..offset + size].to_vec();
            offset += size;

            let pts = base_pts + index as u64 * spacing;
            let mut packet = match track.compression {
                Compression::Zlib => Packet::from_compressed(track_number, pts, frame),
                Compression::None => Packet::new(track_number, pts, frame),
            };
            packet.keyframe = keyframe;
            packet.invisible = invisible;
            packet.discardable = discardable;
            if spacing > 0 {
                packet.duration = Some(spacing);
            }
            packets.push(packet);
        }

        Ok(Block {
            track_number,
            local_pts,
            keyframe,
            invisible,
            discardable,
            lacing,
            packets,
        })
    }
}

/// A BlockGroup: a Block plus its sibling metadata elements.
#[derive(Debug, Clone, Default)]
pub struct BlockGroup {
    /// The contained block.
    pub block: Block,
    /// Duration of the whole block, in ticks.
    pub block_duration: Option<u64>,
    /// Reference priority.
    pub reference_priority: u64,
    /// Tick offsets of the frames this block references.
    pub reference_blocks: Vec<i64>,
    /// Discard padding in nanoseconds.
    pub discard_padding: Option<i64>,
    /// Codec state snapshot valid from this block on.
    pub codec_state: Option<Vec<u8>>,
}

impl BlockGroup {
    /// Whether the contained block is a keyframe.
    ///
    /// A grouped block has no keyframe flag; it is a keyframe exactly when
    /// it references nothing.
    pub fn keyframe(&self) -> bool {
        self.reference_blocks.is_empty()
    }

    /// Encode as a complete BlockGroup element.
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        let block_body = self.block.encode_body(false)?;

        let mut body = Vec::new();
        write_binary_element(&mut body, elements::BLOCK, &block_body);
        if let Some(duration) = self.block_duration {
            write_uint_element(&mut body, elements::BLOCK_DURATION, duration);
        }
        if self.reference_priority != 0 {
            write_uint_element(&mut body, elements::REFERENCE_PRIORITY, self.reference_priority);
        }
        for &reference in &self.reference_blocks {
            write_sint_element(&mut body, elements::REFERENCE_BLOCK, reference);
        }
        if let Some(state) = &self.codec_state {
            write_binary_element(&mut body, elements::CODEC_STATE, state);
        }
        if let Some(padding) = self.discard_padding {
            write_sint_element(&mut body, elements::DISCARD_PADDING, padding);
        }

        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, elements::BLOCK_GROUP, &body);
        Ok(out)
    }

    /// Decode a BlockGroup element body.
    pub fn decode(data: &[u8], ctx: &BlockContext) -> Result<Self> {
        let mut group = BlockGroup::default();
        let mut cursor = Cursor::new(data);
        let mut block_data: Option<&[u8]> = None;

        while (cursor.position() as usize) < data.len() {
            let header = ElementHeader::read(&mut cursor)?;
            let child_size = header.size.unwrap_or(0) as usize;
            let start = cursor.position() as usize;
            let child = data.get(start..start + child_size).ok_or_else(|| {
                MatroskaError::InvalidElementSize {
                    offset: start as u64,
                    message: "block group child overruns parent".to_string(),
                }
            })?;
            cursor.set_position((start + child_size) as u64);

            match header.id {
                elements::BLOCK => block_data = Some(child),
                elements::BLOCK_DURATION => {
                    group.block_duration = Some(read_unsigned_int(child))
                }
                elements::REFERENCE_PRIORITY => {
                    group.reference_priority = read_unsigned_int(child)
                }
                elements::REFERENCE_BLOCK => {
                    group.reference_blocks.push(read_signed_int(child))
                }
                elements::CODEC_STATE => group.codec_state = Some(child.to_vec()),
                elements::DISCARD_PADDING => {
                    group.discard_padding = Some(read_signed_int(child))
                }
                _ => {}
            }
        }

        let block_data = block_data.ok_or_else(|| {
            MatroskaError::InvalidBlock("block group without a block".to_string())
        })?;
        group.block = Block::decode_body(block_data, ctx, false)?;

        // Distribute group metadata onto the derived packets
        let keyframe = group.keyframe();
        let count = group.block.packets.len() as u64;
        let per_packet_duration = group
            .block_duration
            .map(|d| d * ctx.timestamp_scale / count.max(1));
        let refs_ns: Vec<i64> = group
            .reference_blocks
            .iter()
            .map(|&r| r * ctx.timestamp_scale as i64)
            .collect();

        group.block.keyframe = keyframe;
        for packet in &mut group.block.packets {
            packet.keyframe = keyframe;
            if let Some(duration) = per_packet_duration {
                packet.duration = Some(duration);
            }
            packet.reference_blocks = refs_ns.clone();
        }

        Ok(group)
    }
}

/// One child of a cluster that carries media.
#[derive(Debug, Clone)]
pub enum BlockItem {
    /// A SimpleBlock.
    Simple(Block),
    /// A BlockGroup.
    Group(BlockGroup),
}

impl BlockItem {
    /// The contained block.
    pub fn block(&self) -> &Block {
        match self {
            BlockItem::Simple(block) => block,
            BlockItem::Group(group) => &group.block,
        }
    }

    /// Whether the contained block is a keyframe.
    pub fn keyframe(&self) -> bool {
        match self {
            BlockItem::Simple(block) => block.keyframe,
            BlockItem::Group(group) => group.keyframe(),
        }
    }

    /// Track number of the contained block.
    pub fn track_number(&self) -> u64 {
        self.block().track_number
    }

    /// Encode as a complete cluster child element.
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        match self {
            BlockItem::Simple(block) => {
                let body = block.encode_body(true)?;
                let mut out = Vec::with_capacity(body.len() + 8);
                write_binary_element(&mut out, elements::SIMPLE_BLOCK, &body);
                Ok(out)
            }
            BlockItem::Group(group) => group.encode(),
        }
    }

    /// Decode a cluster child known to carry media.
    pub fn decode(id: u32, data: &[u8], ctx: &BlockContext) -> Result<Self> {
        match id {
            elements::SIMPLE_BLOCK => {
                Ok(BlockItem::Simple(Block::decode_body(data, ctx, true)?))
            }
            elements::BLOCK_GROUP => Ok(BlockItem::Group(BlockGroup::decode(data, ctx)?)),
            _ => Err(MatroskaError::InvalidBlock(format!(
                "element 0x{:02X} is not a block",
                id
            ))),
        }
    }

    /// The packets carried by this item.
    pub fn packets(&self) -> &[Packet] {
        &self.block().packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracks::{TrackEntry, TrackType};

    fn test_tracks() -> Tracks {
        let mut tracks = Tracks::new();
        let mut video = TrackEntry::new(1, TrackType::Video, "V_VP9");
        video.default_duration = Some(40_000_000);
        tracks.add(video).unwrap();
        tracks.add(TrackEntry::new(2, TrackType::Audio, "A_OPUS")).unwrap();
        tracks
    }

    fn ctx(tracks: &Tracks) -> BlockContext<'_> {
        BlockContext {
            timestamp_scale: 1_000_000,
            cluster_timestamp: 1000,
            tracks,
        }
    }

    #[test]
    fn test_simple_block_roundtrip() {
        let tracks = test_tracks();
        let ctx = ctx(&tracks);

        let mut block = Block {
            track_number: 1,
            local_pts: 40,
            keyframe: true,
            lacing: Lacing::None,
            packets: vec![Packet::new(1, 0, vec![0xDE, 0xAD])],
            ..Default::default()
        };

        let body = block.encode_body(true).unwrap();
        let mut decoded = Block::decode_body(&body, &ctx, true).unwrap();

        assert_eq!(decoded.track_number, 1);
        assert_eq!(decoded.local_pts, 40);
        assert!(decoded.keyframe);
        assert_eq!(decoded.packets.len(), 1);
        assert_eq!(decoded.packets[0].data().unwrap(), &[0xDE, 0xAD]);
        // (1000 + 40) ticks at 1ms
        assert_eq!(decoded.packets[0].pts, 1_040_000_000);
    }

    #[test]
    fn test_laced_block_pts_spacing() {
        let tracks = test_tracks();
        let ctx = ctx(&tracks);

        let mut block = Block {
            track_number: 1,
            local_pts: 0,
            lacing: Lacing::Xiph,
            packets: vec![
                Packet::new(1, 0, vec![1; 10]),
                Packet::new(1, 0, vec![2; 20]),
                Packet::new(1, 0, vec![3; 5]),
            ],
            ..Default::default()
        };

        let body = block.encode_body(true).unwrap();
        let decoded = Block::decode_body(&body, &ctx, true).unwrap();
        assert_eq!(decoded.packets.len(), 3);
        let base = 1_000_000_000;
        for (i, packet) in decoded.packets.iter().enumerate() {
            assert_eq!(packet.pts, base + i as u64 * 40_000_000);
            assert_eq!(packet.duration, Some(40_000_000));
        }
    }

    #[test]
    fn test_negative_local_pts() {
        let tracks = test_tracks();
        let ctx = ctx(&tracks);

        let mut block = Block {
            track_number: 2,
            local_pts: -500,
            lacing: Lacing::None,
            packets: vec![Packet::new(2, 0, vec![7])],
            ..Default::default()
        };

        let body = block.encode_body(true).unwrap();
        let decoded = Block::decode_body(&body, &ctx, true).unwrap();
        assert_eq!(decoded.local_pts, -500);
        assert_eq!(decoded.packets[0].pts, 500_000_000);
    }

    #[test]
    fn test_truncated_block_is_error() {
        let tracks = test_tracks();
        let ctx = ctx(&tracks);

        let mut block = Block {
            track_number: 1,
            lacing: Lacing::Xiph,
            packets: vec![Packet::new(1, 0, vec![1; 10]), Packet::new(1, 0, vec![2; 10])],
            ..Default::default()
        };
        let body = block.encode_body(true).unwrap();
        // The declared first-frame size overruns the truncated body
        assert!(matches!(
            Block::decode_body(&body[..body.len() - 12], &ctx, true),
            Err(MatroskaError::InvalidLacing(_))
        ));
    }

    #[test]
    fn test_unknown_track_is_error() {
        let tracks = test_tracks();
        let ctx = ctx(&tracks);

        let mut block = Block {
            track_number: 9,
            lacing: Lacing::None,
            packets: vec![Packet::new(9, 0, vec![1])],
            ..Default::default()
        };
        let body = block.encode_body(true).unwrap();
        assert!(matches!(
            Block::decode_body(&body, &ctx, true),
            Err(MatroskaError::TrackNotFound { track_number: 9 })
        ));
    }

    #[test]
    fn test_block_group_roundtrip() {
        let tracks = test_tracks();
        let ctx = ctx(&tracks);

        let mut group = BlockGroup {
            block: Block {
                track_number: 1,
                local_pts: 80,
                lacing: Lacing::None,
                packets: vec![Packet::new(1, 0, vec![5, 6, 7])],
                ..Default::default()
            },
            block_duration: Some(40),
            reference_blocks: vec![-40],
            ..Default::default()
        };

        let encoded = group.encode().unwrap();
        let mut cursor = Cursor::new(&encoded);
        let header = ElementHeader::read(&mut cursor).unwrap();
        assert_eq!(header.id, elements::BLOCK_GROUP);

        let start = cursor.position() as usize;
        let body = &encoded[start..start + header.size.unwrap() as usize];
        let decoded = BlockGroup::decode(body, &ctx).unwrap();

        assert_eq!(decoded.block_duration, Some(40));
        assert_eq!(decoded.reference_blocks, vec![-40]);
        assert!(!decoded.keyframe());
        assert!(!decoded.block.packets[0].keyframe);
        assert_eq!(decoded.block.packets[0].duration, Some(40_000_000));
        assert_eq!(decoded.block.packets[0].reference_blocks, vec![-40_000_000]);
    }

    #[test]
    fn test_group_without_references_is_keyframe() {
        let tracks = test_tracks();
        let ctx = ctx(&tracks);

        let mut group = BlockGroup {
            block: Block {
                track_number: 2,
                lacing: Lacing::None,
                packets: vec![Packet::new(2, 0, vec![1])],
                ..Default::default()
            },
            block_duration: Some(20),
            ..Default::default()
        };

        let encoded = group.encode().unwrap();
        let mut cursor = Cursor::new(&encoded);
        let header = ElementHeader::read(&mut cursor).unwrap();
        let start = cursor.position() as usize;
        let decoded =
            BlockGroup::decode(&encoded[start..start + header.size.unwrap() as usize], &ctx)
                .unwrap();
        assert!(decoded.keyframe());
        assert!(decoded.block.packets[0].keyframe);
    }

    #[test]
    fn test_compressed_track_frames_inflate() {
        let mut tracks = Tracks::new();
        let mut sub = TrackEntry::new(3, TrackType::Subtitle, "S_TEXT/UTF8");
        sub.compression = Compression::Zlib;
        tracks.add(sub).unwrap();
        let ctx = BlockContext {
            timestamp_scale: 1_000_000,
            cluster_timestamp: 0,
            tracks: &tracks,
        };

        let mut packet = Packet::new(3, 0, b"hello subtitles".to_vec());
        packet.set_compression(Compression::Zlib).unwrap();
        let mut block = Block {
            track_number: 3,
            lacing: Lacing::None,
            packets: vec![packet],
            ..Default::default()
        };

        let body = block.encode_body(true).unwrap();
        let mut decoded = Block::decode_body(&body, &ctx, true).unwrap();
        assert_eq!(decoded.packets[0].compression(), Compression::Zlib);
        assert_eq!(decoded.packets[0].data().unwrap(), b"hello subtitles");
    }
}
