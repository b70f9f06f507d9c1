//! A Matroska container engine.
//!
//! The crate reads and writes Matroska (and WebM) segments at the element
//! level: EBML coding, blocks and lacing, clusters, and whole segments with
//! their Cues and SeekHead indexes.
//!
//! Writing goes through [`SegmentMuxer`], which turns timestamped
//! [`Packet`]s into clusters and finalizes the segment's indexes on close:
//!
//! ```no_run
//! use matroska::{Packet, SegmentInfo, SegmentMuxer, TrackEntry, TrackType, Tracks};
//!
//! # fn main() -> matroska::Result<()> {
//! let file = std::fs::OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .open("out.mkv")?;
//!
//! let mut tracks = Tracks::new();
//! tracks.add(TrackEntry::new(1, TrackType::Video, "V_VP9"))?;
//!
//! let mut muxer = SegmentMuxer::new(file, SegmentInfo::default(), tracks);
//! let packet = Packet::new(1, 0, vec![0u8; 128]).with_keyframe(true);
//! muxer.mux(packet, false, false)?;
//! muxer.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Reading goes through [`SegmentReader`], whose packet iterator resolves a
//! start time through the Cues and materializes clusters lazily:
//!
//! ```no_run
//! use matroska::{SegmentReader, TrackFilter};
//!
//! # fn main() -> matroska::Result<()> {
//! let file = std::fs::File::open("in.mkv")?;
//! let reader = SegmentReader::open(file)?;
//! for packet in reader.iter_packets(10.0, None, 0, TrackFilter::Any) {
//!     let packet = packet?;
//!     println!("track {} pts {}ns", packet.track_number, packet.pts);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod block;
pub mod cluster;
pub mod ebml;
pub mod elements;
pub mod error;
pub mod index;
pub mod info;
pub mod lacing;
pub mod packet;
pub mod segment;
pub mod tracks;

pub use block::{Block, BlockContext, BlockGroup, BlockItem};
pub use cluster::{BlockIter, Cluster, PacketIter, TrackFilter};
pub use ebml::{EbmlHeader, ElementHeader};
pub use error::{MatroskaError, Result};
pub use index::{CuePoint, CueTrackPosition, Cues, SeekHead};
pub use info::SegmentInfo;
pub use lacing::Lacing;
pub use packet::{Compression, Packet};
pub use segment::{ClusterIter, SegmentMuxer, SegmentPacketIter, SegmentReader};
pub use tracks::{TrackEntry, TrackType, Tracks};

/// Whether a byte slice starts with the EBML magic shared by Matroska and
/// WebM files.
pub fn is_matroska_signature(data: &[u8]) -> bool {
    data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
}
