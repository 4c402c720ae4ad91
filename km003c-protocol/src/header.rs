//! Bit-packed 4-byte headers
//!
//! Both headers are a little-endian `u32`:
//!
//! ```text
//! Main header:     type[0:7] reserved[7] id[8:16] attribute_mask[17:32]   (control)
//!                  type[0:7] reserved[7] id[8:16] obj_count_words[22:32]  (PutData)
//! Segment header:  attribute[0:15] has_next[15] chunk[16:22] size_bytes[22:32]
//! ```

use serde::Serialize;

use crate::error::DecodeError;
use crate::protocol::{size, Attribute, PacketType};

const TYPE_MASK: u32 = 0x7F;
const RESERVED_BIT: u32 = 1 << 7;
const ID_SHIFT: u32 = 8;
const MASK_SHIFT: u32 = 17;
const MASK_BITS: u32 = 0x7FFF;
const OBJ_COUNT_SHIFT: u32 = 22;
const TEN_BITS: u32 = 0x3FF;

const ATTRIBUTE_BITS: u32 = 0x7FFF;
const HAS_NEXT_BIT: u32 = 1 << 15;
const CHUNK_SHIFT: u32 = 16;
const CHUNK_BITS: u32 = 0x3F;
const SIZE_SHIFT: u32 = 22;

/// Largest `size_bytes` a segment header can carry
pub const MAX_SEGMENT_SIZE: u16 = TEN_BITS as u16;
/// Largest object count (in words) a data main header can carry
pub const MAX_OBJECT_COUNT: u16 = TEN_BITS as u16;
/// Largest chunk number a segment header can carry
pub const MAX_CHUNK: u8 = CHUNK_BITS as u8;

/// Meaning of the upper main-header bits, which depends on the packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderField {
    /// Control/command packets: 15-bit request attribute bitmask
    AttributeMask(u16),
    /// Data packets: 10-bit object count in words
    ObjectCount(u16),
}

/// First 4 bytes of every application-layer packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MainHeader {
    pub packet_type: PacketType,
    pub reserved_flag: bool,
    /// Rolling transaction id (wraps at 255)
    pub id: u8,
    pub field: HeaderField,
}

impl MainHeader {
    /// Control-class header carrying an attribute bitmask
    pub fn control(packet_type: PacketType, id: u8, attribute_mask: u16) -> Self {
        Self {
            packet_type,
            reserved_flag: false,
            id,
            field: HeaderField::AttributeMask(attribute_mask & MASK_BITS as u16),
        }
    }

    /// Data-class (PutData) header carrying an object count
    pub fn data(id: u8, obj_count_words: u16) -> Self {
        Self {
            packet_type: PacketType::PutData,
            reserved_flag: false,
            id,
            field: HeaderField::ObjectCount(obj_count_words & TEN_BITS as u16),
        }
    }

    pub fn from_u32(raw: u32) -> Self {
        let packet_type = PacketType::from((raw & TYPE_MASK) as u8);
        let field = if packet_type.is_data() {
            HeaderField::ObjectCount(((raw >> OBJ_COUNT_SHIFT) & TEN_BITS) as u16)
        } else {
            HeaderField::AttributeMask(((raw >> MASK_SHIFT) & MASK_BITS) as u16)
        };
        Self {
            packet_type,
            reserved_flag: raw & RESERVED_BIT != 0,
            id: (raw >> ID_SHIFT) as u8,
            field,
        }
    }

    pub fn to_u32(&self) -> u32 {
        let mut raw = u32::from(self.packet_type.code()) & TYPE_MASK;
        if self.reserved_flag {
            raw |= RESERVED_BIT;
        }
        raw |= u32::from(self.id) << ID_SHIFT;
        match self.field {
            HeaderField::AttributeMask(mask) => raw |= (u32::from(mask) & MASK_BITS) << MASK_SHIFT,
            HeaderField::ObjectCount(count) => {
                raw |= (u32::from(count) & TEN_BITS) << OBJ_COUNT_SHIFT
            }
        }
        raw
    }

    /// Parse from the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let raw = read_u32(data)?;
        Ok(Self::from_u32(raw))
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        self.to_u32().to_le_bytes()
    }

    /// Request attribute bitmask, for control-class headers
    pub fn attribute_mask(&self) -> Option<u16> {
        match self.field {
            HeaderField::AttributeMask(mask) => Some(mask),
            HeaderField::ObjectCount(_) => None,
        }
    }

    /// Object count in words, for data-class headers
    pub fn obj_count_words(&self) -> Option<u16> {
        match self.field {
            HeaderField::ObjectCount(count) => Some(count),
            HeaderField::AttributeMask(_) => None,
        }
    }
}

/// Header of one chained logical segment inside a PutData packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentHeader {
    pub attribute: Attribute,
    /// Another segment immediately follows this one's payload
    pub has_next: bool,
    pub chunk: u8,
    /// Declared payload length (one sample's size for AdcQueue)
    pub size_bytes: u16,
}

impl SegmentHeader {
    pub fn new(attribute: Attribute, has_next: bool, chunk: u8, size_bytes: u16) -> Self {
        Self {
            attribute,
            has_next,
            chunk: chunk & MAX_CHUNK,
            size_bytes: size_bytes & MAX_SEGMENT_SIZE,
        }
    }

    pub fn from_u32(raw: u32) -> Self {
        Self {
            attribute: Attribute::from((raw & ATTRIBUTE_BITS) as u16),
            has_next: raw & HAS_NEXT_BIT != 0,
            chunk: ((raw >> CHUNK_SHIFT) & CHUNK_BITS) as u8,
            size_bytes: ((raw >> SIZE_SHIFT) & TEN_BITS) as u16,
        }
    }

    pub fn to_u32(&self) -> u32 {
        let mut raw = u32::from(self.attribute.raw()) & ATTRIBUTE_BITS;
        if self.has_next {
            raw |= HAS_NEXT_BIT;
        }
        raw |= (u32::from(self.chunk) & CHUNK_BITS) << CHUNK_SHIFT;
        raw |= (u32::from(self.size_bytes) & TEN_BITS) << SIZE_SHIFT;
        raw
    }

    /// Parse from the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let raw = read_u32(data)?;
        Ok(Self::from_u32(raw))
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        self.to_u32().to_le_bytes()
    }
}

fn read_u32(data: &[u8]) -> Result<u32, DecodeError> {
    match data.get(..size::HEADER) {
        Some(&[b0, b1, b2, b3]) => Ok(u32::from_le_bytes([b0, b1, b2, b3])),
        _ => Err(DecodeError::TruncatedHeader {
            needed: size::HEADER,
            available: data.len(),
        }),
    }
}
