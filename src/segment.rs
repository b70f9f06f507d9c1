//! Segment-level muxing and demuxing.
//!
//! [`SegmentMuxer`] turns a stream of packets into a complete segment:
//! clusters with lacing and BlockGroups where the timing calls for them, a
//! Cues index, per-track statistics tags, and a SeekHead written into a
//! region reserved at the segment start. [`SegmentReader`] opens a finished
//! segment and iterates clusters and packets from any point, resolving the
//! start through the Cues.

use crate::block::{Block, BlockGroup, BlockItem};
use crate::cluster::{encode_cluster, Cluster, PacketIter, TrackFilter};
use crate::ebml::{
    encode_vint_width, write_binary_element, write_element_id, write_string_element,
    write_uint_element, write_unknown_size, write_void, EbmlHeader, ElementHeader,
};
use crate::elements;
use crate::error::{MatroskaError, Result};
use crate::index::{CuePoint, CueTrackPosition, Cues, SeekHead};
use crate::info::SegmentInfo;
use crate::lacing::Lacing;
use crate::packet::Packet;
use crate::tracks::{TrackEntry, Tracks};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{debug, trace};

/// Bytes reserved at the segment start for the SeekHead.
const SEEK_HEAD_RESERVE: usize = 128;

/// Fixed segment-relative offset of the Info element. Info is rewritten in
/// place as the duration grows, so it must never move.
const INFO_OFFSET: u64 = SEEK_HEAD_RESERVE as u64;

/// Whether an encoded SeekHead can occupy the reserved region, either
/// exactly or with room left for a valid Void element.
fn fits_reserve(len: usize) -> bool {
    len == SEEK_HEAD_RESERVE || len + 2 <= SEEK_HEAD_RESERVE
}

/// Slack when scanning clusters backwards from a seek target: a cluster
/// whose timestamp is up to one full local-timestamp range before the
/// target can still hold wanted blocks.
const CLUSTER_SEEK_SLACK: u64 = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    NotStarted,
    InProgress,
    Closed,
}

#[derive(Default, Clone)]
struct TrackStats {
    packets: u64,
    bytes: u64,
    duration_ns: u64,
}

/// Writes a segment packet by packet.
pub struct SegmentMuxer<F: Read + Write + Seek> {
    file: F,
    info: SegmentInfo,
    tracks: Tracks,
    chapters: Option<Vec<u8>>,
    attachments: Option<Vec<u8>>,
    state: MuxerState,
    segment_size_pos: u64,
    segment_start: u64,
    tail: u64,
    seek_head: SeekHead,
    cues: Cues,
    cluster_timestamp: u64,
    cluster_items: Vec<BlockItem>,
    blocks_to_index: Vec<usize>,
    accumulators: HashMap<u64, usize>,
    prev_cluster_size: Option<u64>,
    track_stats: HashMap<u64, TrackStats>,
    duration_ticks: f64,
}

impl<F: Read + Write + Seek> SegmentMuxer<F> {
    /// Create a muxer over a seekable file. Nothing is written until the
    /// first packet arrives.
    pub fn new(file: F, info: SegmentInfo, tracks: Tracks) -> Self {
        Self {
            file,
            info,
            tracks,
            chapters: None,
            attachments: None,
            state: MuxerState::NotStarted,
            segment_size_pos: 0,
            segment_start: 0,
            tail: 0,
            seek_head: SeekHead::new(),
            cues: Cues::new(),
            cluster_timestamp: 0,
            cluster_items: Vec::new(),
            blocks_to_index: Vec::new(),
            accumulators: HashMap::new(),
            prev_cluster_size: None,
            track_stats: HashMap::new(),
            duration_ticks: 0.0,
        }
    }

    /// Attach a pre-encoded Chapters element, written at segment start.
    pub fn set_chapters(&mut self, payload: Vec<u8>) {
        self.chapters = Some(payload);
    }

    /// Attach a pre-encoded Attachments element, written at segment start.
    pub fn set_attachments(&mut self, payload: Vec<u8>) {
        self.attachments = Some(payload);
    }

    /// Segment metadata as currently known.
    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    /// The track table this muxer writes for.
    pub fn tracks(&self) -> &Tracks {
        &self.tracks
    }

    /// The cue points recorded so far.
    pub fn cues(&self) -> &Cues {
        &self.cues
    }

    /// Write the EBML head and the fixed segment preamble: reserved
    /// SeekHead space, Info at its fixed offset, Tracks, then any chapters
    /// and attachments.
    fn start(&mut self) -> Result<()> {
        let ebml = EbmlHeader::default();
        self.file.write_all(&ebml.encode())?;

        write_element_id(&mut self.file, elements::SEGMENT)?;
        self.segment_size_pos = self.file.stream_position()?;
        write_unknown_size(&mut self.file, 8)?;
        self.segment_start = self.file.stream_position()?;

        write_void(&mut self.file, SEEK_HEAD_RESERVE)?;

        self.seek_head.insert(elements::INFO, INFO_OFFSET);
        self.file.write_all(&self.info.encode())?;

        let rel = self.file.stream_position()? - self.segment_start;
        self.seek_head.insert(elements::TRACKS, rel);
        self.file.write_all(&self.tracks.encode())?;

        if let Some(chapters) = self.chapters.take() {
            let rel = self.file.stream_position()? - self.segment_start;
            self.seek_head.insert(elements::CHAPTERS, rel);
            self.file.write_all(&chapters)?;
        }
        if let Some(attachments) = self.attachments.take() {
            let rel = self.file.stream_position()? - self.segment_start;
            self.seek_head.insert(elements::ATTACHMENTS, rel);
            self.file.write_all(&attachments)?;
        }

        self.tail = self.file.stream_position()?;
        self.state = MuxerState::InProgress;
        debug!(segment_start = self.segment_start, "segment started");
        Ok(())
    }

    /// Add one packet to the segment.
    ///
    /// Returns the bytes written to the file by this call, which is nonzero
    /// only when a cluster was flushed (or the segment preamble was
    /// written). `force_new_cluster` requests a cluster boundary before
    /// this packet; `force_cue_point` requests a cue entry for its block.
    pub fn mux(
        &mut self,
        mut packet: Packet,
        force_new_cluster: bool,
        force_cue_point: bool,
    ) -> Result<u64> {
        match self.state {
            MuxerState::Closed => return Err(MatroskaError::SegmentClosed),
            MuxerState::NotStarted => self.start()?,
            MuxerState::InProgress => {}
        }

        let track = self
            .tracks
            .by_number(packet.track_number)
            .ok_or(MatroskaError::TrackNotFound {
                track_number: packet.track_number,
            })?
            .clone();

        packet.set_compression(track.compression)?;

        let scale = self.info.timestamp_scale;
        let pts_ticks = self.info.ns_to_ticks(packet.pts);
        let is_video_keyframe = track.is_video() && packet.keyframe;
        let duration_ns = packet.duration.or(track.default_duration);

        // Per-track statistics feed the tags written at close
        {
            let raw_len = packet.data()?.len() as u64;
            let stats = self.track_stats.entry(track.number).or_default();
            stats.packets += 1;
            stats.bytes += raw_len;
            stats.duration_ns += duration_ns.unwrap_or(0);
        }
        let end_ticks = self.info.ns_to_ticks(packet.pts + duration_ns.unwrap_or(0)) as f64;
        if end_ticks > self.duration_ticks {
            self.duration_ticks = end_ticks;
        }

        let local = pts_ticks as i64 - self.cluster_timestamp as i64;
        let overflows = local > i16::MAX as i64 || local < i16::MIN as i64;

        let mut written = 0u64;
        let boundary = !self.cluster_items.is_empty()
            && (is_video_keyframe || overflows || force_new_cluster)
            && pts_ticks > self.cluster_timestamp;
        if boundary {
            written = self.flush_cluster()?;
        }
        if self.cluster_items.is_empty() {
            self.cluster_timestamp = pts_ticks;
        }

        let local = pts_ticks as i64 - self.cluster_timestamp as i64;
        if local > i16::MAX as i64 || local < i16::MIN as i64 {
            return Err(MatroskaError::LocalTimestampOverflow {
                local_pts: local,
                cluster_timestamp: self.cluster_timestamp,
            });
        }
        let local = local as i16;

        let cue_flag = is_video_keyframe || track.is_subtitle() || force_cue_point;

        let needs_group = !packet.reference_blocks.is_empty()
            || match (packet.duration, track.default_duration) {
                (Some(duration), Some(default)) => {
                    (duration as i64 - default as i64).unsigned_abs() > 2 * scale
                }
                (Some(_), None) => true,
                _ => false,
            };

        let index = if needs_group {
            self.accumulators.remove(&track.number);

            let keyframe = packet.reference_blocks.is_empty();
            let reference_blocks: Vec<i64> = packet
                .reference_blocks
                .iter()
                .map(|&r| r / scale as i64)
                .collect();
            let block_duration = packet.duration.map(|d| self.info.ns_to_ticks(d));

            let group = BlockGroup {
                block: Block {
                    track_number: track.number,
                    local_pts: local,
                    keyframe,
                    invisible: packet.invisible,
                    discardable: packet.discardable,
                    lacing: Lacing::None,
                    packets: vec![packet],
                },
                block_duration,
                reference_blocks,
                ..Default::default()
            };
            self.cluster_items.push(BlockItem::Group(group));
            self.cluster_items.len() - 1
        } else {
            self.push_simple(packet, &track, local)?
        };

        if cue_flag && !self.blocks_to_index.contains(&index) {
            self.blocks_to_index.push(index);
        }

        Ok(written)
    }

    /// Add a SimpleBlock packet, lacing it onto the track's open block when
    /// possible.
    fn push_simple(
        &mut self,
        mut packet: Packet,
        track: &TrackEntry,
        local: i16,
    ) -> Result<usize> {
        if let Some(&index) = self.accumulators.get(&track.number) {
            if let Some(BlockItem::Simple(block)) = self.cluster_items.get_mut(index) {
                let first_size = block
                    .packets
                    .first()
                    .map(|p| p.clone().wire_size())
                    .transpose()?
                    .unwrap_or(0);
                let new_size = packet.wire_size()?;

                // Scheme settles on the second frame; a size change later
                // upgrades fixed-size to EBML
                block.lacing = match block.lacing {
                    Lacing::None | Lacing::FixedSize if new_size == first_size => {
                        Lacing::FixedSize
                    }
                    Lacing::None | Lacing::FixedSize => Lacing::Ebml,
                    other => other,
                };
                block.packets.push(packet);

                if block.packets.len() >= track.max_in_lace {
                    self.accumulators.remove(&track.number);
                }
                return Ok(index);
            }
            self.accumulators.remove(&track.number);
        }

        let block = Block {
            track_number: track.number,
            local_pts: local,
            keyframe: packet.keyframe,
            invisible: packet.invisible,
            discardable: packet.discardable,
            lacing: Lacing::None,
            packets: vec![packet],
        };
        self.cluster_items.push(BlockItem::Simple(block));
        let index = self.cluster_items.len() - 1;

        if track.flag_lacing && track.max_in_lace > 1 {
            self.accumulators.insert(track.number, index);
        }
        Ok(index)
    }

    /// Encode and append the open cluster, record its cue entries, and
    /// rewrite the Info duration in place.
    fn flush_cluster(&mut self) -> Result<u64> {
        if self.cluster_items.is_empty() {
            return Ok(0);
        }

        let offset_in_segment = self.tail - self.segment_start;
        let (bytes, offsets) = encode_cluster(
            self.cluster_timestamp,
            Some(offset_in_segment),
            self.prev_cluster_size,
            &mut self.cluster_items,
        )?;

        self.file.seek(SeekFrom::Start(self.tail))?;
        self.file.write_all(&bytes)?;
        self.tail += bytes.len() as u64;

        for &index in &self.blocks_to_index {
            let block = self.cluster_items[index].block();
            let time = (self.cluster_timestamp as i64 + block.local_pts as i64).max(0) as u64;
            self.cues.add(CuePoint {
                time,
                positions: vec![CueTrackPosition {
                    track: block.track_number,
                    cluster_position: offset_in_segment,
                    relative_position: Some(offsets[index]),
                }],
            });
        }

        if self.seek_head.get(elements::CLUSTER).is_none() {
            self.seek_head.insert(elements::CLUSTER, offset_in_segment);
        }
        self.prev_cluster_size = Some(bytes.len() as u64);

        self.rewrite_info()?;

        trace!(
            timestamp = self.cluster_timestamp,
            bytes = bytes.len(),
            blocks = self.cluster_items.len(),
            "flushed cluster"
        );

        self.cluster_items.clear();
        self.blocks_to_index.clear();
        self.accumulators.clear();

        Ok(bytes.len() as u64)
    }

    /// Rewrite the Info element at its fixed offset with the duration seen
    /// so far. Size-stable by construction.
    fn rewrite_info(&mut self) -> Result<()> {
        self.info.duration = self.duration_ticks;
        self.file
            .seek(SeekFrom::Start(self.segment_start + INFO_OFFSET))?;
        self.file.write_all(&self.info.encode())?;
        self.file.seek(SeekFrom::Start(self.tail))?;
        Ok(())
    }

    /// Per-track statistics as a complete Tags element.
    fn make_stats_tags(&self) -> Vec<u8> {
        fn simple_tag(buf: &mut Vec<u8>, name: &str, value: &str) {
            let mut tag = Vec::new();
            write_string_element(&mut tag, elements::TAG_NAME, name);
            write_string_element(&mut tag, elements::TAG_LANGUAGE, "und");
            write_uint_element(&mut tag, elements::TAG_DEFAULT, 1);
            write_string_element(&mut tag, elements::TAG_STRING, value);
            write_binary_element(buf, elements::SIMPLE_TAG, &tag);
        }

        let mut body = Vec::new();
        for track in self.tracks.iter() {
            let stats = self
                .track_stats
                .get(&track.number)
                .cloned()
                .unwrap_or_default();

            let mut targets = Vec::new();
            write_uint_element(&mut targets, elements::TARGET_TYPE_VALUE, 50);
            write_uint_element(&mut targets, elements::TAG_TRACK_UID, track.uid);

            let mut tag = Vec::new();
            write_binary_element(&mut tag, elements::TARGETS, &targets);

            let bps = if stats.duration_ns > 0 {
                stats.bytes * 8 * 1_000_000_000 / stats.duration_ns
            } else {
                0
            };
            simple_tag(&mut tag, "BPS", &bps.to_string());
            simple_tag(&mut tag, "DURATION", &format_tag_duration(stats.duration_ns));
            simple_tag(&mut tag, "NUMBER_OF_FRAMES", &stats.packets.to_string());
            simple_tag(&mut tag, "NUMBER_OF_BYTES", &stats.bytes.to_string());
            simple_tag(
                &mut tag,
                "_STATISTICS_TAGS",
                "BPS DURATION NUMBER_OF_FRAMES NUMBER_OF_BYTES",
            );

            write_binary_element(&mut body, elements::TAG, &tag);
        }

        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, elements::TAGS, &body);
        out
    }

    /// Finalize the segment: flush the open cluster, write Cues and
    /// statistics Tags, patch the segment size, and fill the reserved
    /// region with the SeekHead. A second close is an error.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            MuxerState::Closed => return Err(MatroskaError::SegmentClosed),
            MuxerState::NotStarted => self.start()?,
            MuxerState::InProgress => {}
        }

        self.flush_cluster()?;

        if !self.cues.is_empty() {
            let rel = self.tail - self.segment_start;
            let encoded = self.cues.encode();
            self.file.seek(SeekFrom::Start(self.tail))?;
            self.file.write_all(&encoded)?;
            self.tail += encoded.len() as u64;
            self.seek_head.insert(elements::CUES, rel);
        }

        {
            let rel = self.tail - self.segment_start;
            let tags = self.make_stats_tags();
            self.file.seek(SeekFrom::Start(self.tail))?;
            self.file.write_all(&tags)?;
            self.tail += tags.len() as u64;
            self.seek_head.insert(elements::TAGS, rel);
        }

        self.rewrite_info()?;

        // SeekHead into the reserved region, Void-padded. When it has
        // outgrown the reserve, the full head goes at the segment tail and
        // a one-entry stub in the reserve points at it.
        let mut encoded = self.seek_head.encode();
        if !fits_reserve(encoded.len()) {
            let rel = self.tail - self.segment_start;
            self.file.seek(SeekFrom::Start(self.tail))?;
            self.file.write_all(&encoded)?;
            self.tail += encoded.len() as u64;

            let mut stub = SeekHead::new();
            stub.insert(elements::SEEK_HEAD, rel);
            debug!(
                size = encoded.len(),
                reserve = SEEK_HEAD_RESERVE,
                offset = rel,
                "seek head outgrew its reserved region, relocated to tail"
            );
            encoded = stub.encode();
        }
        self.file.seek(SeekFrom::Start(self.segment_start))?;
        self.file.write_all(&encoded)?;
        if encoded.len() < SEEK_HEAD_RESERVE {
            write_void(&mut self.file, SEEK_HEAD_RESERVE - encoded.len())?;
        }

        // Patch the segment size over the unknown-size placeholder
        let total = self.tail - self.segment_start;
        let (size_bytes, _) = encode_vint_width(total, 8)?;
        self.file.seek(SeekFrom::Start(self.segment_size_pos))?;
        self.file.write_all(&size_bytes[..8])?;

        self.file.seek(SeekFrom::Start(self.tail))?;
        self.file.flush()?;
        self.state = MuxerState::Closed;
        debug!(bytes = self.tail, "segment closed");
        Ok(())
    }

    /// Consume the muxer and return the underlying file.
    pub fn into_inner(self) -> F {
        self.file
    }
}

/// Format a nanosecond duration as `HH:MM:SS.fffffffff`, the form
/// statistics DURATION tags use.
fn format_tag_duration(ns: u64) -> String {
    let seconds = ns / 1_000_000_000;
    let frac = ns % 1_000_000_000;
    format!(
        "{:02}:{:02}:{:02}.{:09}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60,
        frac
    )
}

/// Reads a finished segment.
pub struct SegmentReader<R: Read + Seek> {
    io: Arc<Mutex<R>>,
    /// The document's EBML header.
    pub ebml: EbmlHeader,
    /// Segment metadata.
    pub info: SegmentInfo,
    /// The segment's tracks.
    pub tracks: Tracks,
    /// The seeking index, empty if the segment has none.
    pub cues: Cues,
    /// The element index, empty if the segment has none.
    pub seek_head: SeekHead,
    segment_start: u64,
    segment_size: Option<u64>,
    first_cluster_offset: Option<u64>,
}

impl<R: Read + Seek> SegmentReader<R> {
    /// Open a segment, reading metadata up to the first cluster and
    /// resolving the Cues through the SeekHead when they sit past the
    /// cluster data.
    pub fn open(mut reader: R) -> Result<Self> {
        let ebml = EbmlHeader::read(&mut reader)?;
        if !ebml.is_matroska() && !ebml.is_webm() {
            return Err(MatroskaError::InvalidEbmlHeader(format!(
                "unsupported doc type {:?}",
                ebml.doc_type
            )));
        }

        let segment = ElementHeader::read(&mut reader)?;
        if segment.id != elements::SEGMENT {
            return Err(MatroskaError::MissingElement("Segment".to_string()));
        }
        let segment_start = reader.stream_position()?;
        let segment_size = segment.size;

        let mut info = SegmentInfo::default();
        let mut tracks = Tracks::new();
        let mut cues = Cues::new();
        let mut seek_head = SeekHead::new();
        let mut first_cluster_offset = None;
        let mut saw_info = false;

        loop {
            let pos = reader.stream_position()?;
            let rel = pos - segment_start;
            if let Some(size) = segment_size {
                if rel >= size {
                    break;
                }
            }

            let header = match ElementHeader::read(&mut reader) {
                Ok(header) => header,
                Err(MatroskaError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };
            let size = header.size.unwrap_or(0);

            match header.id {
                elements::SEEK_HEAD => seek_head = SeekHead::decode(&mut reader, size)?,
                elements::INFO => {
                    info = SegmentInfo::decode(&mut reader, size)?;
                    saw_info = true;
                }
                elements::TRACKS => tracks = Tracks::decode(&mut reader, size)?,
                elements::CUES => cues = Cues::decode(&mut reader, size)?,
                elements::CLUSTER => {
                    first_cluster_offset = Some(rel);
                    break;
                }
                _ => crate::ebml::skip_element(&mut reader, size)?,
            }
        }

        // Metadata past the cluster data (Cues usually, sometimes Info or
        // Tracks) is reachable through the SeekHead
        fn load<R: Read + Seek>(
            seek_head: &SeekHead,
            segment_start: u64,
            id: u32,
            reader: &mut R,
        ) -> Result<Option<u64>> {
            if let Some(offset) = seek_head.get(id) {
                reader.seek(SeekFrom::Start(segment_start + offset))?;
                let header = ElementHeader::read(reader)?;
                if header.id == id {
                    return Ok(Some(header.size.unwrap_or(0)));
                }
            }
            Ok(None)
        }

        // A stub head in the reserve may point at the full one at the tail
        if let Some(size) = load(&seek_head, segment_start, elements::SEEK_HEAD, &mut reader)? {
            let indirect = SeekHead::decode(&mut reader, size)?;
            for (id, offset) in indirect.iter() {
                seek_head.insert(id, offset);
            }
        }

        if cues.is_empty() {
            if let Some(size) = load(&seek_head, segment_start, elements::CUES, &mut reader)? {
                cues = Cues::decode(&mut reader, size)?;
            }
        }
        if tracks.is_empty() {
            if let Some(size) = load(&seek_head, segment_start, elements::TRACKS, &mut reader)? {
                tracks = Tracks::decode(&mut reader, size)?;
            }
        }
        if !saw_info {
            if let Some(size) = load(&seek_head, segment_start, elements::INFO, &mut reader)? {
                info = SegmentInfo::decode(&mut reader, size)?;
            }
        }

        debug!(
            tracks = tracks.len(),
            cue_points = cues.points().len(),
            "segment opened"
        );

        Ok(Self {
            io: Arc::new(Mutex::new(reader)),
            ebml,
            info,
            tracks,
            cues,
            seek_head,
            segment_start,
            segment_size,
            first_cluster_offset,
        })
    }

    fn seconds_to_ticks(&self, seconds: f64) -> u64 {
        ((seconds * 1e9) / self.info.timestamp_scale as f64).max(0.0) as u64
    }

    /// The latest cue point at or before the target time.
    pub fn find_cue(&self, start_seconds: f64, track: Option<u64>) -> Option<&CuePoint> {
        self.cues.find(self.seconds_to_ticks(start_seconds), track)
    }

    /// Iterate clusters from a start time.
    ///
    /// The scan begins at `start_offset` when given, otherwise at the cue
    /// resolved for `start_seconds` (or the first cluster). Clusters more
    /// than one local-timestamp range before the target are skipped.
    pub fn iter_clusters(
        &self,
        start_seconds: f64,
        start_offset: Option<u64>,
        track: Option<u64>,
    ) -> ClusterIter<R> {
        let start_ticks = self.seconds_to_ticks(start_seconds);
        let resolved = start_offset
            .or_else(|| {
                if start_seconds > 0.0 {
                    self.find_cue(start_seconds, track)
                        .and_then(|cue| cue.positions.first())
                        .map(|pos| pos.cluster_position)
                } else {
                    None
                }
            })
            .or(self.first_cluster_offset);

        ClusterIter {
            io: self.io.clone(),
            segment_start: self.segment_start,
            segment_size: self.segment_size,
            next_rel: resolved,
            min_ticks: start_ticks.saturating_sub(CLUSTER_SEEK_SLACK),
        }
    }

    /// Iterate packets from a start time.
    ///
    /// `start_cluster_offset` and `start_block_offset` pin the exact resume
    /// point when known (as recorded by a cue); the time cutoff applies
    /// only inside the first cluster.
    pub fn iter_packets(
        &self,
        start_seconds: f64,
        start_cluster_offset: Option<u64>,
        start_block_offset: u64,
        filter: TrackFilter,
    ) -> SegmentPacketIter<R> {
        let track = match &filter {
            TrackFilter::Single(t) => Some(*t),
            _ => None,
        };
        let clusters = self.iter_clusters(start_seconds, start_cluster_offset, track);
        SegmentPacketIter {
            io: self.io.clone(),
            tracks: self.tracks.clone(),
            timestamp_scale: self.info.timestamp_scale,
            clusters,
            current: None,
            start_ns: (start_seconds.max(0.0) * 1e9) as u64,
            start_block_offset,
            first: true,
            filter,
        }
    }
}

/// Iterator over a segment's clusters.
pub struct ClusterIter<R: Read + Seek> {
    io: Arc<Mutex<R>>,
    segment_start: u64,
    segment_size: Option<u64>,
    next_rel: Option<u64>,
    min_ticks: u64,
}

impl<R: Read + Seek> Iterator for ClusterIter<R> {
    type Item = Result<Arc<Cluster>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rel = self.next_rel?;
            if let Some(size) = self.segment_size {
                if rel >= size {
                    self.next_rel = None;
                    return None;
                }
            }

            let mut io = self.io.lock();
            if io.seek(SeekFrom::Start(self.segment_start + rel)).is_err() {
                self.next_rel = None;
                return None;
            }

            let header = match ElementHeader::read(&mut *io) {
                Ok(header) => header,
                Err(MatroskaError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.next_rel = None;
                    return None;
                }
                Err(e) => {
                    self.next_rel = None;
                    return Some(Err(e));
                }
            };
            let size = match header.size {
                Some(size) => size,
                None => {
                    self.next_rel = None;
                    return Some(Err(MatroskaError::InvalidElementSize {
                        offset: rel,
                        message: "unknown-size element while scanning clusters".to_string(),
                    }));
                }
            };
            self.next_rel = Some(rel + header.header_size as u64 + size);

            if header.id != elements::CLUSTER {
                continue;
            }

            match Cluster::read_header(&mut *io, rel, size) {
                Ok(cluster) => {
                    if cluster.timestamp >= self.min_ticks {
                        return Some(Ok(Arc::new(cluster)));
                    }
                    trace!(
                        timestamp = cluster.timestamp,
                        min_ticks = self.min_ticks,
                        "skipping cluster before seek window"
                    );
                }
                Err(e) => {
                    self.next_rel = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Iterator over a segment's packets across clusters.
pub struct SegmentPacketIter<R: Read + Seek> {
    io: Arc<Mutex<R>>,
    tracks: Tracks,
    timestamp_scale: u64,
    clusters: ClusterIter<R>,
    current: Option<PacketIter>,
    start_ns: u64,
    start_block_offset: u64,
    first: bool,
    filter: TrackFilter,
}

impl<R: Read + Seek> Iterator for SegmentPacketIter<R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = &mut self.current {
                if let Some(packet) = current.next() {
                    return Some(Ok(packet));
                }
                self.current = None;
            }

            let cluster = match self.clusters.next()? {
                Ok(cluster) => cluster,
                Err(e) => return Some(Err(e)),
            };

            // The exact cutoffs apply only inside the first cluster
            let (start_ns, start_offset) = if self.first {
                (self.start_ns, self.start_block_offset)
            } else {
                (0, 0)
            };
            self.first = false;

            match cluster.iter_packets(
                &self.io,
                &self.tracks,
                self.timestamp_scale,
                start_ns,
                start_offset,
                self.filter.clone(),
            ) {
                Ok(iter) => self.current = Some(iter),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
