//! Clusters and lazy block materialization.
//!
//! A [`Cluster`] found while scanning a segment records only its header
//! fields and byte range. Its blocks are decoded when an iterator first
//! needs them and discarded again when the last active iterator over that
//! cluster is dropped, so long scans do not pin every cluster's payload in
//! memory.

use crate::block::{BlockContext, BlockItem};
use crate::ebml::{read_unsigned_int, write_binary_element, write_uint_element, ElementHeader};
use crate::elements;
use crate::error::{MatroskaError, Result};
use crate::packet::Packet;
use crate::tracks::Tracks;
use parking_lot::Mutex;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::trace;

/// Selects which tracks an iteration yields.
#[derive(Debug, Clone, Default)]
pub enum TrackFilter {
    /// All tracks.
    #[default]
    Any,
    /// One track.
    Single(u64),
    /// A set of tracks.
    Set(Vec<u64>),
}

impl TrackFilter {
    /// Whether a track passes the filter.
    pub fn matches(&self, track: u64) -> bool {
        match self {
            TrackFilter::Any => true,
            TrackFilter::Single(t) => *t == track,
            TrackFilter::Set(set) => set.contains(&track),
        }
    }
}

/// Materialized cluster children with their content-relative offsets.
type Items = Arc<Vec<(u64, BlockItem)>>;

#[derive(Default)]
struct ClusterState {
    blocks: Option<Items>,
    active_iters: usize,
}

/// One cluster of a segment.
pub struct Cluster {
    /// Cluster timestamp in ticks.
    pub timestamp: u64,
    /// The cluster's own Position element, when present.
    pub position: Option<u64>,
    /// Size of the previous cluster, when present.
    pub prev_size: Option<u64>,
    /// Offset of the cluster element within the segment data.
    pub offset_in_segment: u64,
    data_offset: u64,
    data_size: u64,
    state: Mutex<ClusterState>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("timestamp", &self.timestamp)
            .field("offset_in_segment", &self.offset_in_segment)
            .field("data_size", &self.data_size)
            .finish()
    }
}

/// Leading children examined before giving up on cluster header fields.
const MAX_HEADER_CHILDREN: usize = 8;

impl Cluster {
    /// Create a cluster whose blocks are already in memory.
    pub fn from_items(timestamp: u64, items: Vec<BlockItem>) -> Self {
        let items = items.into_iter().map(|item| (0, item)).collect();
        Self {
            timestamp,
            position: None,
            prev_size: None,
            offset_in_segment: 0,
            data_offset: 0,
            data_size: 0,
            state: Mutex::new(ClusterState {
                blocks: Some(Arc::new(items)),
                active_iters: 0,
            }),
        }
    }

    /// Scan a cluster's leading children without decoding its blocks.
    ///
    /// The reader must be positioned at the cluster's content start; on
    /// return it is positioned past the cluster. Only the children ahead of
    /// the first block are examined, so the timestamp must come first as
    /// the format requires.
    pub fn read_header<R: Read + Seek>(
        reader: &mut R,
        offset_in_segment: u64,
        content_size: u64,
    ) -> Result<Self> {
        let data_offset = reader.stream_position()?;
        let end_pos = data_offset + content_size;

        let mut timestamp = None;
        let mut position = None;
        let mut prev_size = None;

        for _ in 0..MAX_HEADER_CHILDREN {
            if reader.stream_position()? >= end_pos {
                break;
            }
            let header = ElementHeader::read(reader)?;
            let child_size = header.size.unwrap_or(0);

            match header.id {
                elements::TIMESTAMP | elements::POSITION | elements::PREV_SIZE => {
                    let mut data = vec![0u8; child_size as usize];
                    reader.read_exact(&mut data)?;
                    let value = read_unsigned_int(&data);
                    match header.id {
                        elements::TIMESTAMP => timestamp = Some(value),
                        elements::POSITION => position = Some(value),
                        _ => prev_size = Some(value),
                    }
                }
                elements::SIMPLE_BLOCK | elements::BLOCK_GROUP => break,
                _ => {
                    crate::ebml::skip_element(reader, child_size)?;
                }
            }
        }

        reader.seek(SeekFrom::Start(end_pos))?;

        let timestamp = timestamp.ok_or(MatroskaError::ClusterMissingTimestamp {
            offset: offset_in_segment,
        })?;

        Ok(Self {
            timestamp,
            position,
            prev_size,
            offset_in_segment,
            data_offset,
            data_size: content_size,
            state: Mutex::new(ClusterState::default()),
        })
    }

    /// Absolute nanosecond timestamp of a block in this cluster.
    pub fn block_pts(&self, local_pts: i16, timestamp_scale: u64) -> u64 {
        let ticks = self.timestamp as i64 + local_pts as i64;
        (ticks.max(0) as u64) * timestamp_scale
    }

    /// Whether this cluster's blocks are currently in memory.
    pub fn is_materialized(&self) -> bool {
        self.state.lock().blocks.is_some()
    }

    /// Number of iterators currently holding this cluster's blocks.
    pub fn active_iterators(&self) -> usize {
        self.state.lock().active_iters
    }

    fn decode_blocks<R: Read + Seek>(
        &self,
        reader: &mut R,
        tracks: &Tracks,
        timestamp_scale: u64,
    ) -> Result<Vec<(u64, BlockItem)>> {
        reader.seek(SeekFrom::Start(self.data_offset))?;
        let mut content = vec![0u8; self.data_size as usize];
        reader.read_exact(&mut content)?;

        let ctx = BlockContext {
            timestamp_scale,
            cluster_timestamp: self.timestamp,
            tracks,
        };

        let mut items = Vec::new();
        let mut cursor = std::io::Cursor::new(content.as_slice());
        while (cursor.position() as usize) < content.len() {
            let element_offset = cursor.position();
            let header = ElementHeader::read(&mut cursor)?;
            let child_size = header.size.unwrap_or(0) as usize;
            let start = cursor.position() as usize;
            let child = content.get(start..start + child_size).ok_or_else(|| {
                MatroskaError::InvalidElementSize {
                    offset: self.offset_in_segment + start as u64,
                    message: "cluster child overruns cluster".to_string(),
                }
            })?;
            cursor.set_position((start + child_size) as u64);

            match header.id {
                elements::SIMPLE_BLOCK | elements::BLOCK_GROUP => {
                    items.push((element_offset, BlockItem::decode(header.id, child, &ctx)?));
                }
                _ => {}
            }
        }

        trace!(
            timestamp = self.timestamp,
            blocks = items.len(),
            "materialized cluster"
        );
        Ok(items)
    }

    /// Take a reference to the block list, materializing it if absent, and
    /// register an active iterator. Returns the list and whether this call
    /// performed the load.
    fn acquire<R: Read + Seek>(
        &self,
        io: &Mutex<R>,
        tracks: &Tracks,
        timestamp_scale: u64,
    ) -> Result<(Items, bool)> {
        let mut state = self.state.lock();
        let (blocks, loaded_here) = match state.blocks.clone() {
            Some(blocks) => (blocks, false),
            None => {
                let mut reader = io.lock();
                let items = Arc::new(self.decode_blocks(&mut *reader, tracks, timestamp_scale)?);
                state.blocks = Some(items.clone());
                (items, true)
            }
        };
        state.active_iters += 1;
        Ok((blocks, loaded_here))
    }

    fn release(&self, loaded_here: bool) {
        let mut state = self.state.lock();
        state.active_iters = state.active_iters.saturating_sub(1);
        if loaded_here && state.active_iters == 0 {
            state.blocks = None;
            trace!(timestamp = self.timestamp, "released cluster blocks");
        }
    }

    /// Iterate this cluster's blocks.
    ///
    /// Blocks before `start_offset` (content-relative) or `start_ns` are
    /// skipped at the front; once a block qualifies, only the track filter
    /// applies to the rest.
    pub fn iter_blocks<R: Read + Seek>(
        self: &Arc<Self>,
        io: &Mutex<R>,
        tracks: &Tracks,
        timestamp_scale: u64,
        start_ns: u64,
        start_offset: u64,
        filter: TrackFilter,
    ) -> Result<BlockIter> {
        let (blocks, loaded_here) = self.acquire(io, tracks, timestamp_scale)?;
        Ok(BlockIter {
            cluster: self.clone(),
            blocks,
            index: 0,
            started: start_ns == 0 && start_offset == 0,
            start_ns,
            start_offset,
            timestamp_scale,
            filter,
            loaded_here,
        })
    }

    /// Iterate this cluster's packets, flattening laced blocks.
    pub fn iter_packets<R: Read + Seek>(
        self: &Arc<Self>,
        io: &Mutex<R>,
        tracks: &Tracks,
        timestamp_scale: u64,
        start_ns: u64,
        start_offset: u64,
        filter: TrackFilter,
    ) -> Result<PacketIter> {
        let blocks =
            self.iter_blocks(io, tracks, timestamp_scale, start_ns, start_offset, filter)?;
        Ok(PacketIter {
            blocks,
            pending: Vec::new(),
        })
    }
}

/// Encode a cluster element from its parts.
///
/// Returns the complete element bytes plus each item's offset relative to
/// the cluster content start (the form cue relative positions use).
pub fn encode_cluster(
    timestamp: u64,
    position: Option<u64>,
    prev_size: Option<u64>,
    items: &mut [BlockItem],
) -> Result<(Vec<u8>, Vec<u64>)> {
    let mut body = Vec::new();
    write_uint_element(&mut body, elements::TIMESTAMP, timestamp);
    if let Some(position) = position {
        write_uint_element(&mut body, elements::POSITION, position);
    }
    if let Some(prev_size) = prev_size {
        write_uint_element(&mut body, elements::PREV_SIZE, prev_size);
    }

    let mut offsets = Vec::with_capacity(items.len());
    for item in items.iter_mut() {
        offsets.push(body.len() as u64);
        body.extend_from_slice(&item.encode()?);
    }

    let mut out = Vec::with_capacity(body.len() + 12);
    write_binary_element(&mut out, elements::CLUSTER, &body);
    Ok((out, offsets))
}

/// Iterator over a cluster's blocks. Dropping it releases the cluster's
/// materialized payload once no other iterator holds it.
pub struct BlockIter {
    cluster: Arc<Cluster>,
    blocks: Items,
    index: usize,
    started: bool,
    start_ns: u64,
    start_offset: u64,
    timestamp_scale: u64,
    filter: TrackFilter,
    loaded_here: bool,
}

impl Iterator for BlockIter {
    type Item = BlockItem;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.blocks.len() {
            let (offset, item) = &self.blocks[self.index];
            self.index += 1;

            if !self.started {
                if *offset < self.start_offset {
                    continue;
                }
                let pts = self
                    .cluster
                    .block_pts(item.block().local_pts, self.timestamp_scale);
                if pts < self.start_ns {
                    continue;
                }
                self.started = true;
            }

            if self.filter.matches(item.track_number()) {
                return Some(item.clone());
            }
        }
        None
    }
}

impl Drop for BlockIter {
    fn drop(&mut self) {
        self.cluster.release(self.loaded_here);
    }
}

/// Iterator over a cluster's packets.
pub struct PacketIter {
    blocks: BlockIter,
    pending: Vec<Packet>,
}

impl Iterator for PacketIter {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.pending.is_empty() {
                return Some(self.pending.remove(0));
            }
            let item = self.blocks.next()?;
            self.pending = item.packets().to_vec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::lacing::Lacing;
    use crate::tracks::{TrackEntry, TrackType};
    use std::io::Cursor;

    fn test_tracks() -> Tracks {
        let mut tracks = Tracks::new();
        tracks.add(TrackEntry::new(1, TrackType::Video, "V_VP9")).unwrap();
        tracks.add(TrackEntry::new(2, TrackType::Audio, "A_OPUS")).unwrap();
        tracks
    }

    fn simple(track: u64, local_pts: i16, byte: u8) -> BlockItem {
        BlockItem::Simple(Block {
            track_number: track,
            local_pts,
            keyframe: true,
            lacing: Lacing::None,
            packets: vec![Packet::new(track, 0, vec![byte])],
            ..Default::default()
        })
    }

    /// Encode a cluster and set up a lazily-loadable Cluster over it.
    fn lazy_cluster(
        timestamp: u64,
        items: &mut [BlockItem],
    ) -> (Arc<Cluster>, Mutex<Cursor<Vec<u8>>>) {
        let (bytes, _) = encode_cluster(timestamp, None, None, items).unwrap();
        let mut cursor = Cursor::new(bytes);
        let header = ElementHeader::read(&mut cursor).unwrap();
        let cluster =
            Cluster::read_header(&mut cursor, 0, header.size.unwrap()).unwrap();
        (Arc::new(cluster), Mutex::new(cursor))
    }

    #[test]
    fn test_read_header_extracts_fields() {
        let mut items = vec![simple(1, 0, 1)];
        let (bytes, _) = encode_cluster(5000, Some(77), Some(123), &mut items).unwrap();
        let mut cursor = Cursor::new(bytes);
        let header = ElementHeader::read(&mut cursor).unwrap();
        let cluster = Cluster::read_header(&mut cursor, 42, header.size.unwrap()).unwrap();

        assert_eq!(cluster.timestamp, 5000);
        assert_eq!(cluster.position, Some(77));
        assert_eq!(cluster.prev_size, Some(123));
        assert_eq!(cluster.offset_in_segment, 42);
        assert!(!cluster.is_materialized());
    }

    #[test]
    fn test_missing_timestamp_is_error() {
        // A cluster body holding only a block
        let mut body = Vec::new();
        let mut item = simple(1, 0, 1);
        body.extend_from_slice(&item.encode().unwrap());
        let mut out = Vec::new();
        write_binary_element(&mut out, elements::CLUSTER, &body);

        let mut cursor = Cursor::new(out);
        let header = ElementHeader::read(&mut cursor).unwrap();
        assert!(matches!(
            Cluster::read_header(&mut cursor, 9, header.size.unwrap()),
            Err(MatroskaError::ClusterMissingTimestamp { offset: 9 })
        ));
    }

    #[test]
    fn test_lazy_load_and_release() {
        let mut items = vec![simple(1, 0, 1), simple(2, 5, 2), simple(1, 40, 3)];
        let (cluster, io) = lazy_cluster(1000, &mut items);
        let tracks = test_tracks();

        {
            let iter = cluster
                .iter_blocks(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Any)
                .unwrap();
            assert!(cluster.is_materialized());
            assert_eq!(cluster.active_iterators(), 1);
            assert_eq!(iter.count(), 3);
        }
        // Last iterator gone, payload released
        assert!(!cluster.is_materialized());
        assert_eq!(cluster.active_iterators(), 0);
    }

    #[test]
    fn test_overlapping_iterators_keep_blocks() {
        let mut items = vec![simple(1, 0, 1), simple(1, 40, 2)];
        let (cluster, io) = lazy_cluster(0, &mut items);
        let tracks = test_tracks();

        let first = cluster
            .iter_blocks(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Any)
            .unwrap();
        let second = cluster
            .iter_blocks(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Any)
            .unwrap();
        assert_eq!(cluster.active_iterators(), 2);

        // Dropping the non-loading iterator never releases the payload
        drop(second);
        assert!(cluster.is_materialized());

        // The loading iterator unloads once it is the last one out
        drop(first);
        assert!(!cluster.is_materialized());
        assert_eq!(cluster.active_iterators(), 0);
    }

    #[test]
    fn test_loader_dropped_first_leaves_blocks_resident() {
        let mut items = vec![simple(1, 0, 1), simple(1, 40, 2)];
        let (cluster, io) = lazy_cluster(0, &mut items);
        let tracks = test_tracks();

        let first = cluster
            .iter_blocks(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Any)
            .unwrap();
        let second = cluster
            .iter_blocks(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Any)
            .unwrap();

        // The loading iterator leaves while another is still active, so
        // the payload stays resident even after both are gone
        drop(first);
        assert!(cluster.is_materialized());
        drop(second);
        assert!(cluster.is_materialized());
        assert_eq!(cluster.active_iterators(), 0);
    }

    #[test]
    fn test_track_filter() {
        let mut items = vec![simple(1, 0, 1), simple(2, 5, 2), simple(1, 40, 3)];
        let (cluster, io) = lazy_cluster(0, &mut items);
        let tracks = test_tracks();

        let only_audio: Vec<_> = cluster
            .iter_blocks(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Single(2))
            .unwrap()
            .collect();
        assert_eq!(only_audio.len(), 1);
        assert_eq!(only_audio[0].track_number(), 2);

        let both: Vec<_> = cluster
            .iter_blocks(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Set(vec![1, 2]))
            .unwrap()
            .collect();
        assert_eq!(both.len(), 3);
    }

    #[test]
    fn test_leading_time_skip() {
        let mut items = vec![simple(1, 0, 1), simple(1, 40, 2), simple(1, 80, 3)];
        let (cluster, io) = lazy_cluster(0, &mut items);
        let tracks = test_tracks();

        // 40ms start drops only the first block
        let from_40ms: Vec<_> = cluster
            .iter_blocks(&io, &tracks, 1_000_000, 40_000_000, 0, TrackFilter::Any)
            .unwrap()
            .collect();
        assert_eq!(from_40ms.len(), 2);
        assert_eq!(from_40ms[0].block().local_pts, 40);
    }

    #[test]
    fn test_packet_iter_flattens() {
        let laced = BlockItem::Simple(Block {
            track_number: 2,
            local_pts: 0,
            lacing: Lacing::Xiph,
            packets: vec![
                Packet::new(2, 0, vec![1]),
                Packet::new(2, 0, vec![2]),
                Packet::new(2, 0, vec![3]),
            ],
            ..Default::default()
        });
        let mut items = vec![laced, simple(1, 10, 9)];
        let (cluster, io) = lazy_cluster(0, &mut items);
        let tracks = test_tracks();

        let packets: Vec<_> = cluster
            .iter_packets(&io, &tracks, 1_000_000, 0, 0, TrackFilter::Any)
            .unwrap()
            .collect();
        assert_eq!(packets.len(), 4);
    }

    #[test]
    fn test_encode_cluster_offsets() {
        let mut items = vec![simple(1, 0, 1), simple(1, 1, 2)];
        let (bytes, offsets) = encode_cluster(0, None, None, &mut items).unwrap();
        assert_eq!(offsets.len(), 2);
        assert!(offsets[0] < offsets[1]);
        assert!((offsets[1] as usize) < bytes.len());
    }
}
