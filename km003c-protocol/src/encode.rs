//! Packet builders
//!
//! The inverse of [`crate::decode_packet`], used to build requests and
//! synthetic responses for fixtures and tests.

use crate::error::EncodeError;
use crate::header::{MainHeader, SegmentHeader, MAX_CHUNK, MAX_OBJECT_COUNT, MAX_SEGMENT_SIZE};
use crate::payload::AdcQueueSample;
use crate::protocol::{size, Attribute, PacketType};

/// A control-class request that serializes to header + optional extra bytes
pub trait ControlRequest {
    fn packet_type(&self) -> PacketType;

    fn attribute_mask(&self) -> u16 {
        0
    }

    /// Bytes following the main header
    fn to_extra(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Serialize with the given transaction id
    fn build(&self, id: u8) -> Vec<u8> {
        let header = MainHeader::control(self.packet_type(), id, self.attribute_mask());
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&self.to_extra());
        out
    }
}

/// GetData (0x0C) with an attribute request bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetData {
    mask: u16,
}

impl GetData {
    pub fn from_mask(mask: u16) -> Self {
        Self { mask }
    }

    /// Request the given attributes. Attributes without a request bit are skipped.
    pub fn new(attributes: &[Attribute]) -> Self {
        let mask = attributes
            .iter()
            .filter_map(Attribute::request_bit)
            .fold(0u16, |mask, bit| mask | (1 << bit));
        Self { mask }
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }
}

impl ControlRequest for GetData {
    fn packet_type(&self) -> PacketType {
        PacketType::GetData
    }

    fn attribute_mask(&self) -> u16 {
        self.mask
    }
}

/// Header-only control request (Connect, StopGraph, EnablePdMonitor, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Simple(pub PacketType);

impl ControlRequest for Simple {
    fn packet_type(&self) -> PacketType {
        self.0
    }
}

/// A segment waiting for [`DataPacketBuilder::build`]
#[derive(Debug, Clone)]
struct PendingSegment {
    attribute: Attribute,
    chunk: u8,
    declared: usize,
    payload: Vec<u8>,
}

/// Builds a PutData packet from chained segments.
///
/// `has_next` is set on every segment but the last. Sizes, chunk numbers
/// and the object count are checked against their header fields when the
/// packet is built.
#[derive(Debug, Clone)]
pub struct DataPacketBuilder {
    id: u8,
    obj_count_words: Option<u16>,
    segments: Vec<PendingSegment>,
}

impl DataPacketBuilder {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            obj_count_words: None,
            segments: Vec::new(),
        }
    }

    /// Override the header object count (defaults to the body length in words)
    pub fn obj_count_words(mut self, count: u16) -> Self {
        self.obj_count_words = Some(count);
        self
    }

    /// Append a segment whose declared size is the payload length
    pub fn segment(mut self, attribute: Attribute, chunk: u8, payload: Vec<u8>) -> Self {
        self.segments.push(PendingSegment {
            attribute,
            chunk,
            declared: payload.len(),
            payload,
        });
        self
    }

    /// Append a segment with an explicit declared size
    pub fn segment_with_size(
        mut self,
        attribute: Attribute,
        chunk: u8,
        size_bytes: u16,
        payload: Vec<u8>,
    ) -> Self {
        self.segments.push(PendingSegment {
            attribute,
            chunk,
            declared: usize::from(size_bytes),
            payload,
        });
        self
    }

    /// Append an AdcQueue segment: declared size is one sample
    pub fn queue_segment(self, chunk: u8, samples: &[AdcQueueSample]) -> Self {
        let payload = samples.iter().flat_map(|s| s.to_bytes()).collect();
        self.segment_with_size(
            Attribute::AdcQueue,
            chunk,
            size::ADC_QUEUE_SAMPLE as u16,
            payload,
        )
    }

    pub fn build(self) -> Result<Vec<u8>, EncodeError> {
        let body_len: usize = self
            .segments
            .iter()
            .map(|s| size::HEADER + s.payload.len())
            .sum();
        let words = self
            .obj_count_words
            .map_or(body_len / 4, usize::from);
        let count = u16::try_from(words)
            .ok()
            .filter(|c| *c <= MAX_OBJECT_COUNT)
            .ok_or(EncodeError::ObjectCountTooLarge {
                words,
                max: usize::from(MAX_OBJECT_COUNT),
            })?;

        let mut out = Vec::with_capacity(size::HEADER + body_len);
        out.extend_from_slice(&MainHeader::data(self.id, count).to_bytes());

        let last = self.segments.len().saturating_sub(1);
        for (index, segment) in self.segments.into_iter().enumerate() {
            let size_bytes = u16::try_from(segment.declared)
                .ok()
                .filter(|s| *s <= MAX_SEGMENT_SIZE)
                .ok_or(EncodeError::SegmentTooLarge {
                    index,
                    size: segment.declared,
                    max: usize::from(MAX_SEGMENT_SIZE),
                })?;
            if segment.chunk > MAX_CHUNK {
                return Err(EncodeError::ChunkOutOfRange {
                    index,
                    chunk: segment.chunk,
                    max: MAX_CHUNK,
                });
            }
            let header =
                SegmentHeader::new(segment.attribute, index < last, segment.chunk, size_bytes);
            out.extend_from_slice(&header.to_bytes());
            out.extend_from_slice(&segment.payload);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_data_wire_bytes() {
        assert_eq!(
            GetData::new(&[Attribute::Adc]).build(0x0A),
            [0x0C, 0x0A, 0x02, 0x00]
        );
        assert_eq!(
            GetData::new(&[Attribute::PdPacket]).build(0x07),
            [0x0C, 0x07, 0x20, 0x00]
        );
    }

    #[test]
    fn test_get_data_mask_from_attributes() {
        let request = GetData::new(&[
            Attribute::Adc,
            Attribute::PdPacket,
            Attribute::Unknown(4),
        ]);
        assert_eq!(request.mask(), 0x0011);
    }

    #[test]
    fn test_simple_request() {
        assert_eq!(Simple(PacketType::Connect).build(1), [0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_builder_sets_has_next() {
        let data = DataPacketBuilder::new(0x06)
            .segment(Attribute::Adc, 0, vec![0; 44])
            .segment(Attribute::PdPacket, 0, vec![0; 12])
            .build()
            .unwrap();
        assert_eq!(data.len(), 68);
        let first = SegmentHeader::parse(&data[4..]).unwrap();
        let second = SegmentHeader::parse(&data[52..]).unwrap();
        assert!(first.has_next);
        assert!(!second.has_next);
        assert_eq!(second.size_bytes, 12);
    }

    #[test]
    fn test_builder_obj_count_override() {
        let data = DataPacketBuilder::new(0x0A)
            .obj_count_words(10)
            .segment(Attribute::Adc, 0, vec![0; 44])
            .build()
            .unwrap();
        // Bits 16..22 are not carried by the builder
        assert_eq!(&data[..4], &[0x41, 0x0A, 0x80, 0x02]);
    }

    #[test]
    fn test_oversized_segment_rejected() {
        let result = DataPacketBuilder::new(1)
            .segment(Attribute::Adc, 0, vec![0; 44])
            .segment(Attribute::PdPacket, 0, vec![0; 1024])
            .build();
        assert_eq!(
            result,
            Err(EncodeError::SegmentTooLarge {
                index: 1,
                size: 1024,
                max: 1023
            })
        );
    }

    #[test]
    fn test_largest_segment_accepted() {
        let data = DataPacketBuilder::new(1)
            .segment(Attribute::PdPacket, 0, vec![0; 1023])
            .build()
            .unwrap();
        let header = SegmentHeader::parse(&data[4..]).unwrap();
        assert_eq!(header.size_bytes, 1023);
    }

    #[test]
    fn test_object_count_overflow_rejected() {
        // 4 + 1020 bytes per segment, five segments: 1280 words
        let mut builder = DataPacketBuilder::new(1);
        for _ in 0..5 {
            builder = builder.segment(Attribute::PdPacket, 0, vec![0; 1020]);
        }
        assert_eq!(
            builder.build(),
            Err(EncodeError::ObjectCountTooLarge {
                words: 1280,
                max: 1023
            })
        );
        assert!(DataPacketBuilder::new(1)
            .obj_count_words(1024)
            .build()
            .is_err());
    }

    #[test]
    fn test_chunk_out_of_range_rejected() {
        let result = DataPacketBuilder::new(1)
            .segment(Attribute::Adc, 64, vec![0; 4])
            .build();
        assert!(matches!(
            result,
            Err(EncodeError::ChunkOutOfRange { chunk: 64, max: 63, .. })
        ));
    }
}
