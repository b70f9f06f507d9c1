//! Matroska element ID definitions.
//!
//! This module defines the element IDs the engine reads and writes, plus
//! track-type and content-compression constants.

// =============================================================================
// EBML Header Elements
// =============================================================================

/// EBML Header element.
pub const EBML: u32 = 0x1A45DFA3;
/// EBML Version.
pub const EBML_VERSION: u32 = 0x4286;
/// EBML Read Version.
pub const EBML_READ_VERSION: u32 = 0x42F7;
/// EBML Max ID Length.
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
/// EBML Max Size Length.
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
/// EBML Doc Type.
pub const DOC_TYPE: u32 = 0x4282;
/// EBML Doc Type Version.
pub const DOC_TYPE_VERSION: u32 = 0x4287;
/// EBML Doc Type Read Version.
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// =============================================================================
// Segment Elements
// =============================================================================

/// Segment (the root container for all Matroska data).
pub const SEGMENT: u32 = 0x18538067;

// =============================================================================
// Meta Seek Information
// =============================================================================

/// SeekHead (index of top-level elements).
pub const SEEK_HEAD: u32 = 0x114D9B74;
/// Seek entry.
pub const SEEK: u32 = 0x4DBB;
/// Seek ID.
pub const SEEK_ID: u32 = 0x53AB;
/// Seek Position.
pub const SEEK_POSITION: u32 = 0x53AC;

// =============================================================================
// Segment Information
// =============================================================================

/// Segment Info.
pub const INFO: u32 = 0x1549A966;
/// Timestamp Scale (nanoseconds per tick, default 1000000 = 1ms).
pub const TIMESTAMP_SCALE: u32 = 0x2AD7B1;
/// Duration (in ticks).
pub const DURATION: u32 = 0x4489;
/// Date UTC (nanoseconds since 2001-01-01).
pub const DATE_UTC: u32 = 0x4461;
/// Title.
pub const TITLE: u32 = 0x7BA9;
/// Muxing App.
pub const MUXING_APP: u32 = 0x4D80;
/// Writing App.
pub const WRITING_APP: u32 = 0x5741;

// =============================================================================
// Cluster Elements
// =============================================================================

/// Cluster (contains blocks of media data).
pub const CLUSTER: u32 = 0x1F43B675;
/// Cluster Timestamp.
pub const TIMESTAMP: u32 = 0xE7;
/// Silent Tracks.
pub const SILENT_TRACKS: u32 = 0x5854;
/// Position (cluster position in segment).
pub const POSITION: u32 = 0xA7;
/// Previous Size (size of previous cluster).
pub const PREV_SIZE: u32 = 0xAB;
/// SimpleBlock (block with flags inline, no child elements).
pub const SIMPLE_BLOCK: u32 = 0xA3;
/// BlockGroup (block with additional info).
pub const BLOCK_GROUP: u32 = 0xA0;
/// Block.
pub const BLOCK: u32 = 0xA1;
/// Block Duration.
pub const BLOCK_DURATION: u32 = 0x9B;
/// Block Additions.
pub const BLOCK_ADDITIONS: u32 = 0x75A1;
/// Reference Priority.
pub const REFERENCE_PRIORITY: u32 = 0xFA;
/// Reference Block (timestamp offset to a reference frame).
pub const REFERENCE_BLOCK: u32 = 0xFB;
/// Codec State.
pub const CODEC_STATE: u32 = 0xA4;
/// Discard Padding.
pub const DISCARD_PADDING: u32 = 0x75A2;

// =============================================================================
// Track Elements
// =============================================================================

/// Tracks.
pub const TRACKS: u32 = 0x1654AE6B;
/// Track Entry.
pub const TRACK_ENTRY: u32 = 0xAE;
/// Track Number.
pub const TRACK_NUMBER: u32 = 0xD7;
/// Track UID.
pub const TRACK_UID: u32 = 0x73C5;
/// Track Type.
pub const TRACK_TYPE: u32 = 0x83;
/// Flag Lacing.
pub const FLAG_LACING: u32 = 0x9C;
/// Default Duration (nanoseconds per frame).
pub const DEFAULT_DURATION: u32 = 0x23E383;
/// Track Name.
pub const NAME: u32 = 0x536E;
/// Language.
pub const LANGUAGE: u32 = 0x22B59C;
/// Codec ID.
pub const CODEC_ID: u32 = 0x86;
/// Codec Private data.
pub const CODEC_PRIVATE: u32 = 0x63A2;

// =============================================================================
// Content Encoding Elements
// =============================================================================

/// Content Encodings.
pub const CONTENT_ENCODINGS: u32 = 0x6D80;
/// Content Encoding.
pub const CONTENT_ENCODING: u32 = 0x6240;
/// Content Encoding Order.
pub const CONTENT_ENCODING_ORDER: u32 = 0x5031;
/// Content Encoding Scope.
pub const CONTENT_ENCODING_SCOPE: u32 = 0x5032;
/// Content Encoding Type (0 = compression).
pub const CONTENT_ENCODING_TYPE: u32 = 0x5033;
/// Content Compression.
pub const CONTENT_COMPRESSION: u32 = 0x5034;
/// Content Compression Algorithm.
pub const CONTENT_COMP_ALGO: u32 = 0x4254;

// =============================================================================
// Cue Elements
// =============================================================================

/// Cues (seeking index).
pub const CUES: u32 = 0x1C53BB6B;
/// Cue Point.
pub const CUE_POINT: u32 = 0xBB;
/// Cue Time.
pub const CUE_TIME: u32 = 0xB3;
/// Cue Track Positions.
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
/// Cue Track.
pub const CUE_TRACK: u32 = 0xF7;
/// Cue Cluster Position.
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
/// Cue Relative Position.
pub const CUE_RELATIVE_POSITION: u32 = 0xF0;

// =============================================================================
// Tag Elements
// =============================================================================

/// Tags.
pub const TAGS: u32 = 0x1254C367;
/// Tag.
pub const TAG: u32 = 0x7373;
/// Targets.
pub const TARGETS: u32 = 0x63C0;
/// Target Type Value.
pub const TARGET_TYPE_VALUE: u32 = 0x68CA;
/// Tag Track UID.
pub const TAG_TRACK_UID: u32 = 0x63C5;
/// Simple Tag.
pub const SIMPLE_TAG: u32 = 0x67C8;
/// Tag Name.
pub const TAG_NAME: u32 = 0x45A3;
/// Tag Language.
pub const TAG_LANGUAGE: u32 = 0x447A;
/// Tag Default.
pub const TAG_DEFAULT: u32 = 0x4484;
/// Tag String.
pub const TAG_STRING: u32 = 0x4487;

// =============================================================================
// Other Top-Level Elements
// =============================================================================

/// Chapters.
pub const CHAPTERS: u32 = 0x1043A770;
/// Attachments.
pub const ATTACHMENTS: u32 = 0x1941A469;
/// Void (reserved/padding space).
pub const VOID: u32 = 0xEC;
/// CRC-32 (skipped on read).
pub const CRC32: u32 = 0xBF;

/// Track type values.
pub mod track_types {
    /// Video track.
    pub const VIDEO: u64 = 1;
    /// Audio track.
    pub const AUDIO: u64 = 2;
    /// Complex track (combined video/audio).
    pub const COMPLEX: u64 = 3;
    /// Logo track.
    pub const LOGO: u64 = 16;
    /// Subtitle track.
    pub const SUBTITLE: u64 = 17;
    /// Buttons track.
    pub const BUTTONS: u64 = 18;
    /// Control track.
    pub const CONTROL: u64 = 32;
}

/// Content compression algorithm values.
pub mod comp_algo {
    /// zlib compression.
    pub const ZLIB: u64 = 0;
}
