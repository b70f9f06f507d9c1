//! Block lacing codecs.
//!
//! Lacing packs several codec frames into one block. The lacing header sits
//! between the block flags byte and the frame bodies: a count byte holding
//! `N - 1`, then the first `N - 1` frame sizes in the scheme's encoding. The
//! last frame's size is implied by the bytes remaining in the block.

use crate::ebml::{encode_vint, encode_vint_width, read_vint, vint_length};
use crate::error::{MatroskaError, Result};
use std::io::Cursor;

/// Lacing scheme, as stored in bits 1-2 of the block flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lacing {
    /// No lacing; the block holds exactly one frame.
    #[default]
    None,
    /// Xiph lacing: sizes as 255-run-length byte sequences.
    Xiph,
    /// Fixed-size lacing: no size bytes, all frames equally sized.
    FixedSize,
    /// EBML lacing: first size as a VINT, then signed VINT deltas.
    Ebml,
}

impl Lacing {
    /// Extract the lacing scheme from a block flags byte.
    pub fn from_flags(flags: u8) -> Self {
        match (flags >> 1) & 0x03 {
            1 => Lacing::Xiph,
            2 => Lacing::FixedSize,
            3 => Lacing::Ebml,
            _ => Lacing::None,
        }
    }

    /// The two-bit field value for the block flags byte.
    pub fn flag_bits(self) -> u8 {
        match self {
            Lacing::None => 0,
            Lacing::Xiph => 1,
            Lacing::FixedSize => 2,
            Lacing::Ebml => 3,
        }
    }
}

/// Smallest VINT width whose biased range holds the delta.
fn delta_width(delta: i64) -> Result<usize> {
    for width in 1..=8usize {
        let limit = 1i64 << (7 * width - 1);
        if -limit < delta && delta < limit {
            return Ok(width);
        }
    }
    Err(MatroskaError::LacingOverflow { delta })
}

/// Decode a signed lacing delta from a VINT value and its width.
fn vint_to_delta(value: u64, width: usize) -> i64 {
    let bias = (1i64 << (7 * width - 1)) - 1;
    value as i64 - bias
}

/// Encode the lacing header for the given frame sizes.
///
/// Only the first `N - 1` sizes are written; the last is implied. Fails when
/// the scheme cannot represent the sizes (more than one frame without
/// lacing, non-uniform fixed sizes, EBML delta overflow).
pub fn encode_header(sizes: &[usize], lacing: Lacing) -> Result<Vec<u8>> {
    if sizes.is_empty() {
        return Err(MatroskaError::InvalidLacing("no frames to lace".to_string()));
    }
    if lacing == Lacing::None {
        if sizes.len() > 1 {
            return Err(MatroskaError::InvalidLacing(format!(
                "{} frames require a lacing scheme",
                sizes.len()
            )));
        }
        return Ok(Vec::new());
    }
    if sizes.len() > 256 {
        return Err(MatroskaError::InvalidLacing(format!(
            "too many frames in one block: {}",
            sizes.len()
        )));
    }

    let mut out = vec![(sizes.len() - 1) as u8];

    match lacing {
        Lacing::None => unreachable!(),
        Lacing::Xiph => {
            for &size in &sizes[..sizes.len() - 1] {
                let mut remaining = size;
                while remaining >= 255 {
                    out.push(0xFF);
                    remaining -= 255;
                }
                out.push(remaining as u8);
            }
        }
        Lacing::FixedSize => {
            if sizes.iter().any(|&s| s != sizes[0]) {
                return Err(MatroskaError::InvalidLacing(
                    "fixed-size lacing with unequal frame sizes".to_string(),
                ));
            }
        }
        Lacing::Ebml if sizes.len() == 1 => {}
        Lacing::Ebml => {
            let (bytes, len) = encode_vint(sizes[0] as u64)?;
            out.extend_from_slice(&bytes[..len]);

            let mut prev = sizes[0] as i64;
            for &size in &sizes[1..sizes.len() - 1] {
                let delta = size as i64 - prev;
                let width = delta_width(delta)?;
                let bias = (1i64 << (7 * width - 1)) - 1;
                let (bytes, len) = encode_vint_width((delta + bias) as u64, width)?;
                out.extend_from_slice(&bytes[..len]);
                prev = size as i64;
            }
        }
    }

    Ok(out)
}

/// Bytes the lacing header for these frame sizes would occupy.
pub fn header_len(sizes: &[usize], lacing: Lacing) -> Result<usize> {
    if sizes.is_empty() {
        return Err(MatroskaError::InvalidLacing("no frames to lace".to_string()));
    }
    match lacing {
        Lacing::None => {
            if sizes.len() > 1 {
                return Err(MatroskaError::InvalidLacing(format!(
                    "{} frames require a lacing scheme",
                    sizes.len()
                )));
            }
            Ok(0)
        }
        Lacing::Xiph => Ok(1 + sizes[..sizes.len() - 1]
            .iter()
            .map(|&s| s / 255 + 1)
            .sum::<usize>()),
        Lacing::FixedSize => Ok(1),
        Lacing::Ebml if sizes.len() == 1 => Ok(1),
        Lacing::Ebml => {
            let mut total = 1 + vint_length(sizes[0] as u64);
            let mut prev = sizes[0] as i64;
            for &size in &sizes[1..sizes.len() - 1] {
                total += delta_width(size as i64 - prev)?;
                prev = size as i64;
            }
            Ok(total)
        }
    }
}

/// Decode frame sizes from a laced block body (the bytes after the flags
/// byte).
///
/// Returns all `N` sizes, the last derived from the bytes left over, plus
/// the number of header bytes consumed.
pub fn decode_sizes(body: &[u8], lacing: Lacing) -> Result<(Vec<usize>, usize)> {
    if lacing == Lacing::None {
        return Ok((vec![body.len()], 0));
    }
    if body.is_empty() {
        return Err(MatroskaError::InvalidLacing(
            "laced block with empty body".to_string(),
        ));
    }

    let count = body[0] as usize + 1;
    let mut sizes = Vec::with_capacity(count);
    let consumed;

    match lacing {
        Lacing::None => unreachable!(),
        Lacing::Xiph => {
            let mut pos = 1;
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let byte = *body.get(pos).ok_or_else(|| {
                        MatroskaError::InvalidLacing("truncated Xiph lacing header".to_string())
                    })?;
                    pos += 1;
                    size += byte as usize;
                    if byte != 0xFF {
                        break;
                    }
                }
                sizes.push(size);
            }
            consumed = pos;
        }
        Lacing::FixedSize => {
            let remaining = body.len() - 1;
            if remaining % count != 0 {
                return Err(MatroskaError::InvalidLacing(format!(
                    "fixed-size lacing: {} bytes not divisible by {} frames",
                    remaining, count
                )));
            }
            sizes.extend(std::iter::repeat(remaining / count).take(count));
            consumed = 1;
        }
        Lacing::Ebml if count == 1 => {
            consumed = 1;
        }
        Lacing::Ebml => {
            let mut cursor = Cursor::new(&body[1..]);
            let (first, first_len) = read_vint(&mut cursor)?;
            sizes.push(first as usize);
            let mut pos = 1 + first_len;
            let mut prev = first as i64;

            for _ in 0..count.saturating_sub(2) {
                let (value, len) = read_vint(&mut cursor)?;
                let size = prev + vint_to_delta(value, len);
                if size < 0 {
                    return Err(MatroskaError::InvalidLacing(format!(
                        "EBML lacing produced negative frame size {}",
                        size
                    )));
                }
                sizes.push(size as usize);
                prev = size;
                pos += len;
            }
            consumed = pos;
        }
    }

    // Last frame spans whatever the declared sizes leave over
    if lacing != Lacing::FixedSize {
        let declared: usize = sizes.iter().sum();
        let available = body.len() - consumed;
        if declared > available {
            return Err(MatroskaError::InvalidLacing(format!(
                "laced sizes total {} but only {} bytes remain",
                declared, available
            )));
        }
        sizes.push(available - declared);
    }

    Ok((sizes, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(sizes: &[usize], lacing: Lacing) {
        let header = encode_header(sizes, lacing).unwrap();
        assert_eq!(header.len(), header_len(sizes, lacing).unwrap());

        // Rebuild a body: header followed by the frame bytes
        let mut body = header;
        for (i, &size) in sizes.iter().enumerate() {
            body.extend(std::iter::repeat(i as u8).take(size));
        }

        let (decoded, consumed) = decode_sizes(&body, lacing).unwrap();
        assert_eq!(decoded, sizes, "sizes for {:?}", lacing);
        assert_eq!(consumed, header_len(sizes, lacing).unwrap());
    }

    #[test]
    fn test_no_lacing_single_frame() {
        let (sizes, consumed) = decode_sizes(&[1, 2, 3, 4], Lacing::None).unwrap();
        assert_eq!(sizes, vec![4]);
        assert_eq!(consumed, 0);
        assert!(encode_header(&[4], Lacing::None).unwrap().is_empty());
    }

    #[test]
    fn test_no_lacing_rejects_multiple_frames() {
        assert!(matches!(
            encode_header(&[4, 4], Lacing::None),
            Err(MatroskaError::InvalidLacing(_))
        ));
    }

    #[test]
    fn test_xiph_roundtrip() {
        roundtrip(&[100, 200, 300], Lacing::Xiph);
        roundtrip(&[255, 510, 0, 7], Lacing::Xiph);
        roundtrip(&[0, 0, 0], Lacing::Xiph);
    }

    #[test]
    fn test_xiph_255_boundary() {
        // 255 encodes as 0xFF 0x00, 254 as a single byte
        let header = encode_header(&[254, 1], Lacing::Xiph).unwrap();
        assert_eq!(header, vec![1, 254]);
        let header = encode_header(&[255, 1], Lacing::Xiph).unwrap();
        assert_eq!(header, vec![1, 0xFF, 0x00]);
    }

    #[test]
    fn test_fixed_roundtrip() {
        roundtrip(&[128, 128, 128, 128], Lacing::FixedSize);
        roundtrip(&[1], Lacing::FixedSize);
    }

    #[test]
    fn test_fixed_rejects_unequal_sizes() {
        assert!(matches!(
            encode_header(&[128, 129], Lacing::FixedSize),
            Err(MatroskaError::InvalidLacing(_))
        ));
    }

    #[test]
    fn test_fixed_rejects_indivisible_body() {
        // 2 frames declared, 7 body bytes after the count
        let body = [1u8, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            decode_sizes(&body, Lacing::FixedSize),
            Err(MatroskaError::InvalidLacing(_))
        ));
    }

    #[test]
    fn test_ebml_roundtrip() {
        roundtrip(&[800, 700, 900, 850], Lacing::Ebml);
        roundtrip(&[1, 1_000_000, 1], Lacing::Ebml);
        roundtrip(&[0, 0], Lacing::Ebml);
    }

    #[test]
    fn test_single_frame_laced() {
        // A single laced frame is just the count byte
        roundtrip(&[5], Lacing::Xiph);
        roundtrip(&[5], Lacing::Ebml);
        assert_eq!(encode_header(&[5], Lacing::Ebml).unwrap(), vec![0]);
    }

    #[test]
    fn test_ebml_delta_widths() {
        // Delta of 63 fits one byte, 64 needs two
        assert_eq!(delta_width(63).unwrap(), 1);
        assert_eq!(delta_width(64).unwrap(), 2);
        assert_eq!(delta_width(-63).unwrap(), 1);
        assert_eq!(delta_width(-64).unwrap(), 2);
    }

    #[test]
    fn test_ebml_delta_bias_roundtrip() {
        for delta in [-8191i64, -64, -63, -1, 0, 1, 63, 64, 8191] {
            let width = delta_width(delta).unwrap();
            let bias = (1i64 << (7 * width - 1)) - 1;
            assert_eq!(vint_to_delta((delta + bias) as u64, width), delta);
        }
    }

    #[test]
    fn test_ebml_overflow_is_error() {
        let huge = 1i64 << 60;
        assert!(matches!(
            delta_width(huge),
            Err(MatroskaError::LacingOverflow { .. })
        ));
    }

    #[test]
    fn test_lacing_flag_bits_roundtrip() {
        for lacing in [Lacing::None, Lacing::Xiph, Lacing::FixedSize, Lacing::Ebml] {
            let flags = lacing.flag_bits() << 1;
            assert_eq!(Lacing::from_flags(flags), lacing);
        }
    }

    #[test]
    fn test_truncated_xiph_header() {
        // Count says 3 frames but the size bytes run out
        let body = [2u8, 0xFF];
        assert!(decode_sizes(&body, Lacing::Xiph).is_err());
    }

    #[test]
    fn test_empty_frame_list_is_error() {
        for lacing in [Lacing::None, Lacing::Xiph, Lacing::FixedSize, Lacing::Ebml] {
            assert!(encode_header(&[], lacing).is_err());
            assert!(header_len(&[], lacing).is_err());
        }
    }
}
