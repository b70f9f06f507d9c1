//! EBML (Extensible Binary Meta Language) parsing and writing utilities.
//!
//! EBML is the binary format underlying Matroska/WebM. Element IDs and sizes
//! are both encoded as variable-length integers (VINTs).

use crate::error::{MatroskaError, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// Maximum VINT length in bytes.
pub const MAX_VINT_LENGTH: usize = 8;

/// Read a variable-length integer (VINT) from a reader.
///
/// EBML VINTs use a leading bit pattern to indicate the length:
/// - 1xxxxxxx: 1 byte (7 bits of data)
/// - 01xxxxxx xxxxxxxx: 2 bytes (14 bits)
/// - 001xxxxx xxxxxxxx xxxxxxxx: 3 bytes (21 bits)
/// - etc.
///
/// Returns the decoded value and the number of bytes read.
pub fn read_vint<R: Read>(reader: &mut R) -> Result<(u64, usize)> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    if first_byte[0] == 0 {
        return Err(MatroskaError::InvalidVint { offset: 0 });
    }

    let length = first_byte[0].leading_zeros() as usize + 1;
    if length > MAX_VINT_LENGTH {
        return Err(MatroskaError::VintOverflow);
    }

    // Mask out the length indicator bits; the shift must not be done in
    // u8, an 8-byte vint shifts by the full width
    let mask = (0xFFu32 >> length) as u8;
    let mut value = (first_byte[0] & mask) as u64;

    if length > 1 {
        let mut remaining = vec![0u8; length - 1];
        reader.read_exact(&mut remaining)?;

        for byte in remaining {
            value = (value << 8) | byte as u64;
        }
    }

    Ok((value, length))
}

/// Read a VINT as an element ID.
///
/// Element IDs keep the VINT marker bits as part of the ID value.
pub fn read_element_id<R: Read>(reader: &mut R) -> Result<(u32, usize)> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    if first_byte[0] == 0 {
        return Err(MatroskaError::InvalidVint { offset: 0 });
    }

    let length = first_byte[0].leading_zeros() as usize + 1;
    if length > 4 {
        return Err(MatroskaError::InvalidElementId { offset: 0 });
    }

    let mut value = first_byte[0] as u32;

    if length > 1 {
        let mut remaining = vec![0u8; length - 1];
        reader.read_exact(&mut remaining)?;

        for byte in remaining {
            value = (value << 8) | byte as u32;
        }
    }

    Ok((value, length))
}

/// Read an element size (VINT with possible unknown-size marker).
///
/// Returns `None` if the size is unknown (streamed element).
pub fn read_element_size<R: Read>(reader: &mut R) -> Result<(Option<u64>, usize)> {
    let (value, length) = read_vint(reader)?;

    // Unknown size: all data bits set
    let unknown_marker = match length {
        1 => 0x7F,
        2 => 0x3FFF,
        3 => 0x1FFFFF,
        4 => 0x0FFFFFFF,
        5 => 0x07FFFFFFFF,
        6 => 0x03FFFFFFFFFF,
        7 => 0x01FFFFFFFFFFFF,
        8 => 0x00FFFFFFFFFFFFFF,
        _ => return Err(MatroskaError::VintOverflow),
    };

    if value == unknown_marker {
        Ok((None, length))
    } else {
        Ok((Some(value), length))
    }
}

/// Write a variable-length integer.
pub fn write_vint<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let (bytes, length) = encode_vint(value)?;
    writer.write_all(&bytes[..length])?;
    Ok(length)
}

/// Encode a value as a minimal-width VINT.
///
/// Returns the encoded bytes and the length.
pub fn encode_vint(value: u64) -> Result<([u8; 8], usize)> {
    encode_vint_width(value, vint_length(value))
}

/// Encode a value as a VINT of an explicit width.
///
/// Laced size fields require a fixed width even when the value would fit in
/// fewer bytes. Fails if the value does not fit the requested width.
pub fn encode_vint_width(value: u64, length: usize) -> Result<([u8; 8], usize)> {
    if length == 0 || length > MAX_VINT_LENGTH {
        return Err(MatroskaError::VintOverflow);
    }
    // Reject values that collide with the marker bit or overflow the width
    if length < 8 && value >= 1u64 << (7 * length) {
        return Err(MatroskaError::VintOverflow);
    }

    let mut bytes = [0u8; 8];
    let mut v = value;
    for i in (0..length).rev() {
        bytes[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    bytes[0] |= 0x80 >> (length - 1);

    Ok((bytes, length))
}

/// Calculate the minimum number of bytes needed to encode a value as a VINT.
///
/// The all-ones pattern of each width is reserved for the unknown-size
/// marker, so the boundary values roll over to the next width.
pub fn vint_length(value: u64) -> usize {
    if value < 0x7F {
        1
    } else if value < 0x3FFF {
        2
    } else if value < 0x1FFFFF {
        3
    } else if value < 0x0FFFFFFF {
        4
    } else if value < 0x07FFFFFFFF {
        5
    } else if value < 0x03FFFFFFFFFF {
        6
    } else if value < 0x01FFFFFFFFFFFF {
        7
    } else {
        8
    }
}

/// Write an element ID.
pub fn write_element_id<W: Write>(writer: &mut W, id: u32) -> Result<usize> {
    let bytes = id.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    writer.write_all(&bytes[start..])?;
    Ok(4 - start)
}

/// Number of bytes an element ID occupies on the wire.
pub fn element_id_length(id: u32) -> usize {
    (4 - id.to_be_bytes().iter().position(|&b| b != 0).unwrap_or(3)).max(1)
}

/// Write an unknown-size marker of the given width (streamed element).
pub fn write_unknown_size<W: Write>(writer: &mut W, length: usize) -> Result<usize> {
    let bytes: &[u8] = match length {
        1 => &[0xFF],
        2 => &[0x7F, 0xFF],
        3 => &[0x3F, 0xFF, 0xFF],
        4 => &[0x1F, 0xFF, 0xFF, 0xFF],
        5 => &[0x0F, 0xFF, 0xFF, 0xFF, 0xFF],
        6 => &[0x07, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        7 => &[0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        8 => &[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        _ => return Err(MatroskaError::VintOverflow),
    };

    writer.write_all(bytes)?;
    Ok(length)
}

/// An EBML element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    /// The element ID.
    pub id: u32,
    /// The element size (None for unknown size).
    pub size: Option<u64>,
    /// Total header size in bytes.
    pub header_size: usize,
}

impl ElementHeader {
    /// Read an element header from a reader.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let (id, id_len) = read_element_id(reader)?;
        let (size, size_len) = read_element_size(reader)?;

        Ok(Self {
            id,
            size,
            header_size: id_len + size_len,
        })
    }

    /// Write an element header to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let id_len = write_element_id(writer, self.id)?;
        let size_len = match self.size {
            Some(size) => write_vint(writer, size)?,
            None => write_unknown_size(writer, 8)?,
        };
        Ok(id_len + size_len)
    }

    /// Get the total size of this element (header + content).
    pub fn total_size(&self) -> Option<u64> {
        self.size.map(|s| s + self.header_size as u64)
    }
}

/// EBML document header information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbmlHeader {
    /// EBML version.
    pub version: u64,
    /// EBML read version.
    pub read_version: u64,
    /// Maximum ID length.
    pub max_id_length: u64,
    /// Maximum size length.
    pub max_size_length: u64,
    /// Document type ("matroska" or "webm").
    pub doc_type: String,
    /// Document type version.
    pub doc_type_version: u64,
    /// Document type read version.
    pub doc_type_read_version: u64,
}

impl Default for EbmlHeader {
    fn default() -> Self {
        Self {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: "matroska".to_string(),
            doc_type_version: 4,
            doc_type_read_version: 2,
        }
    }
}

impl EbmlHeader {
    /// Check if this is a WebM document.
    pub fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }

    /// Check if this is a Matroska document.
    pub fn is_matroska(&self) -> bool {
        self.doc_type == "matroska"
    }

    /// Read and validate an EBML header element, positioned at its ID.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let header = ElementHeader::read(reader)?;
        if header.id != crate::elements::EBML {
            return Err(MatroskaError::InvalidEbmlHeader(format!(
                "expected EBML element, found 0x{:08X}",
                header.id
            )));
        }
        let size = header.size.ok_or_else(|| {
            MatroskaError::InvalidEbmlHeader("EBML header with unknown size".to_string())
        })?;

        let mut ebml = EbmlHeader::default();
        let end_pos = reader.stream_position()? + size;

        while reader.stream_position()? < end_pos {
            let child = ElementHeader::read(reader)?;
            let child_size = child.size.unwrap_or(0);
            let mut data = vec![0u8; child_size as usize];
            reader.read_exact(&mut data)?;

            match child.id {
                crate::elements::EBML_VERSION => ebml.version = read_unsigned_int(&data),
                crate::elements::EBML_READ_VERSION => ebml.read_version = read_unsigned_int(&data),
                crate::elements::EBML_MAX_ID_LENGTH => {
                    ebml.max_id_length = read_unsigned_int(&data)
                }
                crate::elements::EBML_MAX_SIZE_LENGTH => {
                    ebml.max_size_length = read_unsigned_int(&data)
                }
                crate::elements::DOC_TYPE => ebml.doc_type = read_string(&data)?,
                crate::elements::DOC_TYPE_VERSION => {
                    ebml.doc_type_version = read_unsigned_int(&data)
                }
                crate::elements::DOC_TYPE_READ_VERSION => {
                    ebml.doc_type_read_version = read_unsigned_int(&data)
                }
                _ => {}
            }
        }

        Ok(ebml)
    }

    /// Encode this EBML header as a complete element.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        write_uint_element(&mut body, crate::elements::EBML_VERSION, self.version);
        write_uint_element(&mut body, crate::elements::EBML_READ_VERSION, self.read_version);
        write_uint_element(&mut body, crate::elements::EBML_MAX_ID_LENGTH, self.max_id_length);
        write_uint_element(
            &mut body,
            crate::elements::EBML_MAX_SIZE_LENGTH,
            self.max_size_length,
        );
        write_string_element(&mut body, crate::elements::DOC_TYPE, &self.doc_type);
        write_uint_element(&mut body, crate::elements::DOC_TYPE_VERSION, self.doc_type_version);
        write_uint_element(
            &mut body,
            crate::elements::DOC_TYPE_READ_VERSION,
            self.doc_type_read_version,
        );

        let mut out = Vec::with_capacity(body.len() + 8);
        write_binary_element(&mut out, crate::elements::EBML, &body);
        out
    }
}

/// Read a signed integer from EBML data.
pub fn read_signed_int(data: &[u8]) -> i64 {
    if data.is_empty() {
        return 0;
    }

    // Sign-extend from the first byte
    let mut value = if data[0] & 0x80 != 0 { -1i64 } else { 0i64 };

    for &byte in data {
        value = (value << 8) | byte as i64;
    }

    value
}

/// Read an unsigned integer from EBML data.
pub fn read_unsigned_int(data: &[u8]) -> u64 {
    let mut value = 0u64;
    for &byte in data {
        value = (value << 8) | byte as u64;
    }
    value
}

/// Read a float from EBML data (4 or 8 bytes).
pub fn read_float(data: &[u8]) -> f64 {
    match data.len() {
        4 => {
            let bits = u32::from_be_bytes(data.try_into().unwrap_or([0; 4]));
            f32::from_bits(bits) as f64
        }
        8 => {
            let bits = u64::from_be_bytes(data.try_into().unwrap_or([0; 8]));
            f64::from_bits(bits)
        }
        0 => 0.0,
        _ => f64::NAN,
    }
}

/// Read a UTF-8 string from EBML data, dropping any null padding.
pub fn read_string(data: &[u8]) -> Result<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec())
        .map_err(|e| MatroskaError::Other(format!("Invalid UTF-8 string: {}", e)))
}

/// Encode an unsigned integer in minimal bytes.
pub fn encode_unsigned_int(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[start..].to_vec()
}

/// Encode a signed integer in minimal bytes.
pub fn encode_signed_int(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let b = bytes[start];
        let next = bytes[start + 1];
        // Can drop a leading byte only if it repeats the sign of the next one
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

/// Append a child element with a binary payload to a buffer.
pub fn write_binary_element(buf: &mut Vec<u8>, id: u32, data: &[u8]) {
    // Infallible targets: Vec writes cannot fail, vint widths are in range
    let _ = write_element_id(buf, id);
    let _ = write_vint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Append an unsigned integer child element to a buffer.
pub fn write_uint_element(buf: &mut Vec<u8>, id: u32, value: u64) {
    write_binary_element(buf, id, &encode_unsigned_int(value));
}

/// Append a signed integer child element to a buffer.
pub fn write_sint_element(buf: &mut Vec<u8>, id: u32, value: i64) {
    write_binary_element(buf, id, &encode_signed_int(value));
}

/// Append an 8-byte float child element to a buffer.
///
/// Always 8 bytes, so a later in-place rewrite of the parent keeps its size.
pub fn write_float_element(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_binary_element(buf, id, &value.to_bits().to_be_bytes());
}

/// Append a UTF-8 string child element to a buffer.
pub fn write_string_element(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_binary_element(buf, id, value.as_bytes());
}

/// Write a Void element filling exactly `total` bytes (header included).
pub fn write_void<W: Write>(writer: &mut W, total: usize) -> Result<()> {
    if total < 2 {
        return Err(MatroskaError::Other(format!(
            "Void region too small: {} bytes",
            total
        )));
    }
    write_element_id(writer, crate::elements::VOID)?;
    // The size field's own width counts against the total
    let size_len = if total - 2 <= 126 { 1 } else { 8 };
    if total < 1 + size_len {
        return Err(MatroskaError::Other(format!(
            "Void region too small: {} bytes",
            total
        )));
    }
    let payload = total - 1 - size_len;
    let (bytes, _) = encode_vint_width(payload as u64, size_len)?;
    writer.write_all(&bytes[..size_len])?;
    writer.write_all(&vec![0u8; payload])?;
    Ok(())
}

/// Skip an element's content.
pub fn skip_element<R: Read + Seek>(reader: &mut R, size: u64) -> Result<()> {
    reader.seek(SeekFrom::Current(size as i64))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_vint_1byte() {
        let data = [0x81];
        let mut cursor = Cursor::new(&data);
        let (value, len) = read_vint(&mut cursor).unwrap();
        assert_eq!(value, 1);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_read_vint_2byte() {
        let data = [0x40, 0x81];
        let mut cursor = Cursor::new(&data);
        let (value, len) = read_vint(&mut cursor).unwrap();
        assert_eq!(value, 129);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_read_vint_8byte() {
        // The form a patched segment size takes on disk
        let (encoded, len) = encode_vint_width(0x0001_0203_0405_0607, 8).unwrap();
        assert_eq!(len, 8);
        let mut cursor = Cursor::new(&encoded[..8]);
        let (value, len) = read_vint(&mut cursor).unwrap();
        assert_eq!(value, 0x0001_0203_0405_0607);
        assert_eq!(len, 8);
    }

    #[test]
    fn test_read_element_id_4byte() {
        let data = [0x1A, 0x45, 0xDF, 0xA3];
        let mut cursor = Cursor::new(&data);
        let (id, len) = read_element_id(&mut cursor).unwrap();
        assert_eq!(id, 0x1A45DFA3);
        assert_eq!(len, 4);
    }

    #[test]
    fn test_read_unknown_size() {
        let data = [0xFF];
        let mut cursor = Cursor::new(&data);
        let (size, len) = read_element_size(&mut cursor).unwrap();
        assert_eq!(size, None);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_encode_vint() {
        let (bytes, len) = encode_vint(1).unwrap();
        assert_eq!(len, 1);
        assert_eq!(bytes[0], 0x81);

        let (bytes, len) = encode_vint(129).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&bytes[..2], &[0x40, 0x81]);
    }

    #[test]
    fn test_encode_vint_width() {
        // 1 forced into two bytes
        let (bytes, len) = encode_vint_width(1, 2).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&bytes[..2], &[0x40, 0x01]);

        // Too wide a value for the width
        assert!(encode_vint_width(1 << 14, 2).is_err());
    }

    #[test]
    fn test_vint_roundtrip() {
        for value in [0, 1, 126, 127, 128, 16383, 16384, 1_000_000] {
            let (encoded, len) = encode_vint(value).unwrap();
            let mut cursor = Cursor::new(&encoded[..len]);
            let (decoded, decoded_len) = read_vint(&mut cursor).unwrap();
            assert_eq!(value, decoded);
            assert_eq!(len, decoded_len);
        }
    }

    #[test]
    fn test_read_signed_int() {
        assert_eq!(read_signed_int(&[0x00]), 0);
        assert_eq!(read_signed_int(&[0x01]), 1);
        assert_eq!(read_signed_int(&[0xFF]), -1);
        assert_eq!(read_signed_int(&[0x00, 0x80]), 128);
        assert_eq!(read_signed_int(&[0xFF, 0x7F]), -129);
    }

    #[test]
    fn test_signed_int_roundtrip() {
        for value in [0i64, 1, -1, 127, -128, 128, -129, 65535, -65536] {
            let encoded = encode_signed_int(value);
            assert_eq!(read_signed_int(&encoded), value, "value {}", value);
        }
    }

    #[test]
    fn test_unsigned_int_roundtrip() {
        for value in [0u64, 1, 255, 256, 1 << 32] {
            let encoded = encode_unsigned_int(value);
            assert_eq!(read_unsigned_int(&encoded), value);
        }
    }

    #[test]
    fn test_read_float() {
        let data = 1.0f32.to_bits().to_be_bytes();
        assert_eq!(read_float(&data), 1.0);

        let data = 1.0f64.to_bits().to_be_bytes();
        assert_eq!(read_float(&data), 1.0);
    }

    #[test]
    fn test_read_string() {
        let data = b"hello\x00world";
        assert_eq!(read_string(data).unwrap(), "hello");
        assert_eq!(read_string(b"hello").unwrap(), "hello");
    }

    #[test]
    fn test_element_header_roundtrip() {
        let header = ElementHeader {
            id: 0x1A45DFA3,
            size: Some(100),
            header_size: 0,
        };

        let mut buffer = Vec::new();
        let written = header.write(&mut buffer).unwrap();

        let mut cursor = Cursor::new(&buffer);
        let read_header = ElementHeader::read(&mut cursor).unwrap();

        assert_eq!(header.id, read_header.id);
        assert_eq!(header.size, read_header.size);
        assert_eq!(written, read_header.header_size);
    }

    #[test]
    fn test_ebml_header_roundtrip() {
        let header = EbmlHeader::default();
        let encoded = header.encode();

        let mut cursor = Cursor::new(&encoded);
        let decoded = EbmlHeader::read(&mut cursor).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_matroska());
    }

    #[test]
    fn test_write_void_exact_fill() {
        for total in [2usize, 3, 64, 128, 127, 130, 1000] {
            let mut buf = Vec::new();
            write_void(&mut buf, total).unwrap();
            assert_eq!(buf.len(), total, "void of {} bytes", total);
            assert_eq!(buf[0], 0xEC);
        }
    }
}
