//! Matroska-specific error types.
//!
//! This module provides error types for Matroska/WebM segment parsing and
//! writing.

use thiserror::Error;

/// Matroska-specific error types.
#[derive(Error, Debug)]
pub enum MatroskaError {
    /// Invalid EBML header.
    #[error("Invalid EBML header: {0}")]
    InvalidEbmlHeader(String),

    /// Invalid element ID.
    #[error("Invalid element ID at offset {offset}")]
    InvalidElementId {
        /// Byte offset where the invalid ID was found.
        offset: u64,
    },

    /// Invalid element size.
    #[error("Invalid element size at offset {offset}: {message}")]
    InvalidElementSize {
        /// Byte offset where the invalid size was found.
        offset: u64,
        /// Description of the size error.
        message: String,
    },

    /// Missing required element.
    #[error("Missing required element: {0}")]
    MissingElement(String),

    /// Invalid block structure.
    #[error("Invalid block structure: {0}")]
    InvalidBlock(String),

    /// Invalid lacing structure.
    #[error("Invalid lacing: {0}")]
    InvalidLacing(String),

    /// EBML lacing delta too large for the widest size field.
    #[error("EBML lacing overflow: size delta {delta} exceeds 8-byte range")]
    LacingOverflow {
        /// The size delta that could not be represented.
        delta: i64,
    },

    /// Cluster without a leading timestamp.
    #[error("Cluster missing timestamp at offset {offset}")]
    ClusterMissingTimestamp {
        /// Byte offset of the cluster missing a timestamp.
        offset: u64,
    },

    /// Block timestamp does not fit the 16-bit cluster-relative field.
    #[error("Local timestamp {local_pts} out of range for cluster at {cluster_timestamp} ticks")]
    LocalTimestampOverflow {
        /// The cluster-relative timestamp in ticks.
        local_pts: i64,
        /// The cluster base timestamp in ticks.
        cluster_timestamp: u64,
    },

    /// Track not found.
    #[error("Track {track_number} not found")]
    TrackNotFound {
        /// The track number that was not found.
        track_number: u64,
    },

    /// Unsupported content compression algorithm.
    #[error("Unsupported compression algorithm: {algo}")]
    UnsupportedCompression {
        /// The ContentCompAlgo value encountered.
        algo: u64,
    },

    /// Invalid variable-length integer.
    #[error("Invalid VINT encoding at offset {offset}")]
    InvalidVint {
        /// Byte offset where the invalid VINT was found.
        offset: u64,
    },

    /// VINT overflow (value too large).
    #[error("VINT overflow: value exceeds maximum representable size")]
    VintOverflow,

    /// Operation on a muxer that has already been finalized.
    #[error("Segment already closed")]
    SegmentClosed,

    /// Cue point not found.
    #[error("No cue point found before {timestamp_ns}ns")]
    CueNotFound {
        /// The target timestamp in nanoseconds.
        timestamp_ns: u64,
    },

    /// Seek failed.
    #[error("Seek failed: {0}")]
    SeekFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl From<String> for MatroskaError {
    fn from(s: String) -> Self {
        MatroskaError::Other(s)
    }
}

impl From<&str> for MatroskaError {
    fn from(s: &str) -> Self {
        MatroskaError::Other(s.to_string())
    }
}

/// Result type for Matroska operations.
pub type Result<T> = std::result::Result<T, MatroskaError>;
