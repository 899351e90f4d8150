//! EBML primitives shared by the WebM reader and muxer
//!
//! Element IDs are kept with their length-marker bits, exactly as they
//! appear on the wire. Data sizes are variable-length integers of 1 to 8
//! bytes; a size whose value bits are all ones means "unknown size" and is
//! only legal for Segment and Cluster.

use super::{MkvReader, Status};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// Element IDs used by the WebM subset of Matroska
pub mod ids {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const VOID: u32 = 0xEC;
    pub const CRC32: u32 = 0xBF;

    pub const SEGMENT: u32 = 0x1853_8067;
    pub const SEEK_HEAD: u32 = 0x114D_9B74;

    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const TITLE: u32 = 0x7BA9;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const NAME: u32 = 0x536E;
    pub const LANGUAGE: u32 = 0x22_B59C;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;
    pub const CODEC_DELAY: u32 = 0x56AA;
    pub const SEEK_PRE_ROLL: u32 = 0x56BB;
    pub const DEFAULT_DURATION: u32 = 0x23_E383;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const DISPLAY_WIDTH: u32 = 0x54B0;
    pub const DISPLAY_HEIGHT: u32 = 0x54BA;
    pub const FRAME_RATE: u32 = 0x23_83E3;
    pub const COLOUR: u32 = 0x55B0;
    pub const MATRIX_COEFFICIENTS: u32 = 0x55B1;
    pub const BITS_PER_CHANNEL: u32 = 0x55B2;
    pub const CHROMA_SUBSAMPLING_HORZ: u32 = 0x55B3;
    pub const CHROMA_SUBSAMPLING_VERT: u32 = 0x55B4;
    pub const CB_SUBSAMPLING_HORZ: u32 = 0x55B5;
    pub const CB_SUBSAMPLING_VERT: u32 = 0x55B6;
    pub const CHROMA_SITING_HORZ: u32 = 0x55B7;
    pub const CHROMA_SITING_VERT: u32 = 0x55B8;
    pub const RANGE: u32 = 0x55B9;
    pub const TRANSFER_CHARACTERISTICS: u32 = 0x55BA;
    pub const PRIMARIES: u32 = 0x55BB;
    pub const MAX_CLL: u32 = 0x55BC;
    pub const MAX_FALL: u32 = 0x55BD;
    pub const MASTERING_METADATA: u32 = 0x55D0;
    pub const PRIMARY_R_CHROMATICITY_X: u32 = 0x55D1;
    pub const PRIMARY_R_CHROMATICITY_Y: u32 = 0x55D2;
    pub const PRIMARY_G_CHROMATICITY_X: u32 = 0x55D3;
    pub const PRIMARY_G_CHROMATICITY_Y: u32 = 0x55D4;
    pub const PRIMARY_B_CHROMATICITY_X: u32 = 0x55D5;
    pub const PRIMARY_B_CHROMATICITY_Y: u32 = 0x55D6;
    pub const WHITE_POINT_CHROMATICITY_X: u32 = 0x55D7;
    pub const WHITE_POINT_CHROMATICITY_Y: u32 = 0x55D8;
    pub const LUMINANCE_MAX: u32 = 0x55D9;
    pub const LUMINANCE_MIN: u32 = 0x55DA;
    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const CHANNELS: u32 = 0x9F;
    pub const BIT_DEPTH: u32 = 0x6264;
    pub const CONTENT_ENCODINGS: u32 = 0x6D80;
    pub const CONTENT_ENCODING: u32 = 0x6240;
    pub const CONTENT_ENCODING_ORDER: u32 = 0x5031;
    pub const CONTENT_ENCODING_SCOPE: u32 = 0x5032;
    pub const CONTENT_ENCODING_TYPE: u32 = 0x5033;
    pub const CONTENT_ENCRYPTION: u32 = 0x5035;
    pub const CONTENT_ENC_ALGO: u32 = 0x47E1;
    pub const CONTENT_ENC_KEY_ID: u32 = 0x47E2;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;
    pub const BLOCK_DURATION: u32 = 0x9B;
    pub const REFERENCE_BLOCK: u32 = 0xFB;

    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
    pub const CUE_RELATIVE_POSITION: u32 = 0xF0;
    pub const CUE_BLOCK_NUMBER: u32 = 0x5378;

    pub const CHAPTERS: u32 = 0x1043_A770;
    pub const TAGS: u32 = 0x1254_C367;
    pub const ATTACHMENTS: u32 = 0x1941_A469;
}

/// Encoded form of an 8-byte "unknown" data size
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Longest element ID accepted by the WebM profile
pub const MAX_ID_LENGTH: usize = 4;

/// Longest data size accepted by the WebM profile
pub const MAX_SIZE_LENGTH: usize = 8;

/// True for IDs that live directly under Segment
pub fn is_level1(id: u32) -> bool {
    matches!(
        id,
        ids::SEEK_HEAD
            | ids::INFO
            | ids::TRACKS
            | ids::CLUSTER
            | ids::CUES
            | ids::CHAPTERS
            | ids::TAGS
            | ids::ATTACHMENTS
    )
}

/// Decoded element ID and data size, positioned in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub id: u32,
    /// Payload size; `None` when the size was written as unknown
    pub size: Option<u64>,
    /// Stream offset of the first ID byte
    pub start: u64,
    /// Bytes taken by the ID and size fields
    pub header_len: u64,
}

impl ElementHeader {
    /// Stream offset of the first payload byte
    pub fn data_start(&self) -> u64 {
        self.start + self.header_len
    }

    /// Stream offset one past the payload, when the size is known
    pub fn end(&self) -> Result<Option<u64>> {
        match self.size {
            Some(size) => self
                .data_start()
                .checked_add(size)
                .map(Some)
                .ok_or_else(|| Error::format(format!("element {:#x} size overflows", self.id))),
            None => Ok(None),
        }
    }

    /// Payload size, rejecting unknown sizes for elements that need one
    pub fn known_size(&self) -> Result<u64> {
        self.size.ok_or_else(|| {
            Error::format(format!(
                "element {:#x} at offset {} has unknown size",
                self.id, self.start
            ))
        })
    }
}

fn vint_length(first: u8, max_len: usize, pos: u64) -> Result<usize> {
    let len = first.leading_zeros() as usize + 1;
    if len > max_len {
        return Err(Error::format(format!(
            "invalid variable-length integer lead byte {:#04x} at offset {}",
            first, pos
        )));
    }
    Ok(len)
}

fn read_vint_bytes<R: MkvReader + ?Sized>(
    reader: &R,
    pos: u64,
    max_len: usize,
) -> Result<Status<([u8; 8], usize)>> {
    let mut bytes = [0u8; 8];
    try_ready!(reader.read(pos, &mut bytes[..1]));
    let len = vint_length(bytes[0], max_len, pos)?;
    if len > 1 {
        try_ready!(reader.read(pos + 1, &mut bytes[1..len]));
    }
    Ok(Status::Ready((bytes, len)))
}

/// Read an element ID at `pos`, returning it with its encoded length
pub fn read_id<R: MkvReader + ?Sized>(reader: &R, pos: u64) -> Result<Status<(u32, usize)>> {
    let (bytes, len) = try_ready!(read_vint_bytes(reader, pos, MAX_ID_LENGTH));
    let id = BigEndian::read_uint(&bytes[..len], len) as u32;
    Ok(Status::Ready((id, len)))
}

/// Read a data size at `pos`; unknown sizes decode to `None`
pub fn read_size<R: MkvReader + ?Sized>(
    reader: &R,
    pos: u64,
) -> Result<Status<(Option<u64>, usize)>> {
    let (bytes, len) = try_ready!(read_vint_bytes(reader, pos, MAX_SIZE_LENGTH));
    Ok(Status::Ready((size_value(&bytes[..len]), len)))
}

fn size_value(bytes: &[u8]) -> Option<u64> {
    let len = bytes.len();
    let raw = BigEndian::read_uint(bytes, len);
    let value_bits = 7 * len as u32;
    let mask = (1u64 << value_bits) - 1;
    let value = raw & mask;
    if value == mask {
        None
    } else {
        Some(value)
    }
}

/// Read the ID and size of the element starting at `pos`
pub fn read_element_header<R: MkvReader + ?Sized>(
    reader: &R,
    pos: u64,
) -> Result<Status<ElementHeader>> {
    let (id, id_len) = try_ready!(read_id(reader, pos));
    let (size, size_len) = try_ready!(read_size(reader, pos + id_len as u64));
    Ok(Status::Ready(ElementHeader {
        id,
        size,
        start: pos,
        header_len: (id_len + size_len) as u64,
    }))
}

/// Copy `size` payload bytes starting at `start` out of the reader.
///
/// Reports `NeedMoreData` without allocating while the payload is not fully
/// buffered, and a format error when it runs past the known end of stream.
pub fn read_payload<R: MkvReader + ?Sized>(
    reader: &R,
    start: u64,
    size: u64,
) -> Result<Status<Vec<u8>>> {
    let end = start
        .checked_add(size)
        .ok_or_else(|| Error::format("element payload size overflows"))?;
    let length = reader.length();
    if let Some(total) = length.total {
        if end > total {
            return Err(Error::format(format!(
                "element payload [{}, {}) runs past end of stream at {}",
                start, end, total
            )));
        }
    }
    if end > length.available {
        return Ok(Status::NeedMoreData);
    }
    let size = usize::try_from(size)
        .map_err(|_| Error::format(format!("element payload of {} bytes is too large", size)))?;
    let mut data = Vec::new();
    data.try_reserve_exact(size)?;
    data.resize(size, 0);
    try_ready!(reader.read(start, &mut data));
    Ok(Status::Ready(data))
}

/// Decode a size-style variable-length integer from the front of `data`,
/// returning `(value, encoded_len)` with the marker bit cleared.
pub fn decode_vint(data: &[u8], max_len: usize) -> Result<(u64, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| Error::format("truncated variable-length integer"))?;
    let len = vint_length(first, max_len, 0)?;
    if data.len() < len {
        return Err(Error::format("truncated variable-length integer"));
    }
    let raw = BigEndian::read_uint(&data[..len], len);
    let mask = (1u64 << (7 * len as u32)) - 1;
    Ok((raw & mask, len))
}

/// Length of the ID and size fields at the front of an encoded element
pub fn element_header_len(data: &[u8]) -> Result<usize> {
    let first = *data
        .first()
        .ok_or_else(|| Error::format("truncated element ID"))?;
    let id_len = vint_length(first, MAX_ID_LENGTH, 0)?;
    let (_, size_len) = decode_vint(data.get(id_len..).unwrap_or(&[]), MAX_SIZE_LENGTH)?;
    Ok(id_len + size_len)
}

/// One child element decoded from an in-memory master payload
#[derive(Debug, Clone, Copy)]
pub struct Child<'a> {
    pub id: u32,
    pub data: &'a [u8],
    /// Offset of the child's ID within the parent payload
    pub offset: usize,
}

/// Iterator over the children of a master element payload
pub struct Children<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Iterate the children of a fully buffered master element payload
pub fn children(data: &[u8]) -> Children<'_> {
    Children { data, pos: 0 }
}

impl<'a> Children<'a> {
    /// Offset just past the last child returned
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn next_child(&mut self) -> Result<Child<'a>> {
        let rest = &self.data[self.pos..];
        let first = rest[0];
        let id_len = vint_length(first, MAX_ID_LENGTH, self.pos as u64)?;
        if rest.len() < id_len {
            return Err(Error::format("truncated element ID"));
        }
        let id = BigEndian::read_uint(&rest[..id_len], id_len) as u32;
        let (size, size_len) = decode_vint(&rest[id_len..], MAX_SIZE_LENGTH)?;
        if size == (1u64 << (7 * size_len as u32)) - 1 {
            return Err(Error::format(format!("child element {:#x} has unknown size", id)));
        }
        let data_start = id_len + size_len;
        let remaining = (rest.len() - data_start) as u64;
        if size > remaining {
            return Err(Error::format(format!(
                "child element {:#x} overruns its parent ({} > {})",
                id, size, remaining
            )));
        }
        let data_end = data_start + size as usize;
        let child = Child {
            id,
            data: &rest[data_start..data_end],
            offset: self.pos,
        };
        self.pos += data_end;
        Ok(child)
    }
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<Child<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let child = self.next_child();
        if child.is_err() {
            // Stop after the first malformed child
            self.pos = self.data.len();
        }
        Some(child)
    }
}

/// Decode an unsigned integer payload
pub fn read_uint(data: &[u8]) -> Result<u64> {
    match data.len() {
        0 => Ok(0),
        len @ 1..=8 => Ok(BigEndian::read_uint(data, len)),
        len => Err(Error::format(format!("unsigned integer of {} bytes", len))),
    }
}

/// Decode a signed integer payload
pub fn read_int(data: &[u8]) -> Result<i64> {
    match data.len() {
        0 => Ok(0),
        len @ 1..=8 => Ok(BigEndian::read_int(data, len)),
        len => Err(Error::format(format!("signed integer of {} bytes", len))),
    }
}

/// Decode a float payload (0, 4 or 8 bytes)
pub fn read_float(data: &[u8]) -> Result<f64> {
    match data.len() {
        0 => Ok(0.0),
        4 => Ok(BigEndian::read_f32(data) as f64),
        8 => Ok(BigEndian::read_f64(data)),
        len => Err(Error::format(format!("float of {} bytes", len))),
    }
}

/// Decode a string payload, dropping trailing zero padding
pub fn read_string(data: &[u8]) -> String {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Append an element ID (marker bits included)
pub fn write_id(buf: &mut Vec<u8>, id: u32) {
    let len = (4 - id.leading_zeros() as usize / 8).max(1);
    let bytes = id.to_be_bytes();
    buf.extend_from_slice(&bytes[4 - len..]);
}

/// Number of bytes `write_vint` uses for `value`
pub fn vint_size(value: u64) -> usize {
    // All-ones is reserved for unknown sizes, so each width holds one less
    (1..=8)
        .find(|&width| value < (1u64 << (7 * width)) - 1)
        .unwrap_or(8)
}

/// Append `value` as a minimal-length variable-length integer
pub fn write_vint(buf: &mut Vec<u8>, value: u64) {
    write_vint_width(buf, value, vint_size(value));
}

/// Append `value` as a variable-length integer of exactly `width` bytes
pub fn write_vint_width(buf: &mut Vec<u8>, value: u64, width: usize) {
    let marker = 1u64 << (7 * width as u32);
    let mut bytes = [0u8; 8];
    BigEndian::write_u64(&mut bytes, value | marker);
    buf.extend_from_slice(&bytes[8 - width..]);
}

/// Append a complete element with a minimal size field
pub fn write_element(buf: &mut Vec<u8>, id: u32, payload: &[u8]) {
    write_id(buf, id);
    write_vint(buf, payload.len() as u64);
    buf.extend_from_slice(payload);
}

/// Append an unsigned integer element using the fewest payload bytes
pub fn write_uint_element(buf: &mut Vec<u8>, id: u32, value: u64) {
    let len = (8 - value.leading_zeros() as usize / 8).max(1);
    let bytes = value.to_be_bytes();
    write_element(buf, id, &bytes[8 - len..]);
}

/// Append an 8-byte float element
pub fn write_float_element(buf: &mut Vec<u8>, id: u32, value: f64) {
    let mut bytes = [0u8; 8];
    BigEndian::write_f64(&mut bytes, value);
    write_element(buf, id, &bytes);
}

/// Append a string element
pub fn write_string_element(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_element(buf, id, value.as_bytes());
}
