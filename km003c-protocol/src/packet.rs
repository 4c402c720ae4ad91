//! Packet decoder
//!
//! Decodes one side of a transaction into a [`ProtocolPacket`]: the main
//! header, then for PutData a cursor walk over the chained logical segments.
//! Only a buffer shorter than the main header is an error; everything past
//! it is decoded permissively and anomalies are recorded on the packet.

use serde::Serialize;
use tracing::debug;

use crate::error::DecodeError;
use crate::header::{MainHeader, SegmentHeader};
use crate::payload::{AdcData, AdcQueueSample, LogMetadata, PdStatus};
use crate::pd_event::{decode_pd_stream, PdEventStream, StreamEnd};
use crate::protocol::{size, Attribute, PacketType};

/// Upper bound on segments walked in one packet (guards against a corrupt
/// `has_next` chain)
pub const MAX_SEGMENTS: usize = 32;

/// Typed segment payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SegmentPayload {
    Adc(AdcData),
    AdcQueue(Vec<AdcQueueSample>),
    /// Opaque settings block
    Settings(Vec<u8>),
    /// Bare 12-byte PD status block
    PdStatus(PdStatus),
    /// PD status preamble followed by events
    PdEvents(PdEventStream),
    LogMetadata(LogMetadata),
    /// Unrecognized attribute
    Raw(Vec<u8>),
    /// Payload ran past the end of the buffer; holds the bytes that were there
    Truncated(Vec<u8>),
}

/// One chained unit of a PutData packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalSegment {
    pub header: SegmentHeader,
    /// Offset of the segment header within the packet
    pub offset: usize,
    /// Payload bytes exactly as consumed from the buffer
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub payload: SegmentPayload,
}

impl LogicalSegment {
    pub fn attribute(&self) -> Attribute {
        self.header.attribute
    }

    pub fn has_next(&self) -> bool {
        self.header.has_next
    }

    pub fn chunk(&self) -> u8 {
        self.header.chunk
    }

    pub fn size_bytes(&self) -> u16 {
        self.header.size_bytes
    }

    /// Header plus payload bytes this segment accounts for
    pub fn encoded_len(&self) -> usize {
        size::HEADER + self.raw.len()
    }
}

/// Something unexpected found while decoding; never fatal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "anomaly")]
pub enum PacketAnomaly {
    /// Declared segment size differs from the attribute's fixed layout
    SizeMismatch {
        segment: usize,
        attribute: Attribute,
        expected: usize,
        declared: usize,
    },
    /// A header or payload runs past the end of the buffer
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Bytes left after the last segment (`has_next = false`)
    TrailingBytes { offset: usize, count: usize },
    /// AdcQueue bytes that do not fill a whole sample
    SampleRemainder { segment: usize, remainder: usize },
    /// PD event size code below the fixed overhead
    PdNegativeLength {
        segment: usize,
        offset: usize,
        size_code: u8,
    },
    /// `has_next` still set after [`MAX_SEGMENTS`] segments
    ChainLimitExceeded { offset: usize },
}

/// Decoded body following the main header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class")]
pub enum PacketBody {
    /// Control-class packet; bytes after the header are kept opaque
    Control {
        #[serde(skip)]
        extra: Vec<u8>,
    },
    /// PutData segment chain
    Data { segments: Vec<LogicalSegment> },
}

/// A decoded application-layer packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolPacket {
    pub header: MainHeader,
    pub body: PacketBody,
    pub anomalies: Vec<PacketAnomaly>,
    /// Total input length
    pub len: usize,
}

impl ProtocolPacket {
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn id(&self) -> u8 {
        self.header.id
    }

    pub fn attribute_mask(&self) -> Option<u16> {
        self.header.attribute_mask()
    }

    /// Logical segments (empty for control packets)
    pub fn segments(&self) -> &[LogicalSegment] {
        match &self.body {
            PacketBody::Data { segments } => segments,
            PacketBody::Control { .. } => &[],
        }
    }

    /// Opaque bytes after a control header (empty for data packets)
    pub fn extra(&self) -> &[u8] {
        match &self.body {
            PacketBody::Control { extra } => extra,
            PacketBody::Data { .. } => &[],
        }
    }

    /// Segment attributes in chain order
    pub fn attributes(&self) -> Vec<Attribute> {
        self.segments().iter().map(|s| s.attribute()).collect()
    }

    /// Bytes accounted for by the main header, segments and control extra
    pub fn accounted_len(&self) -> usize {
        size::HEADER
            + self.extra().len()
            + self
                .segments()
                .iter()
                .map(LogicalSegment::encoded_len)
                .sum::<usize>()
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Decode a packet from raw bytes
pub fn decode_packet(data: &[u8]) -> Result<ProtocolPacket, DecodeError> {
    let header = MainHeader::parse(data)?;
    let mut anomalies = Vec::new();

    let body = if header.packet_type.is_data() {
        PacketBody::Data {
            segments: decode_segments(data, &mut anomalies),
        }
    } else {
        PacketBody::Control {
            extra: data[size::HEADER..].to_vec(),
        }
    };

    if !anomalies.is_empty() {
        debug!(
            "{} id={:#04x}: {} anomalies: {:?}",
            header.packet_type,
            header.id,
            anomalies.len(),
            anomalies
        );
    }

    Ok(ProtocolPacket {
        header,
        body,
        anomalies,
        len: data.len(),
    })
}

fn decode_segments(data: &[u8], anomalies: &mut Vec<PacketAnomaly>) -> Vec<LogicalSegment> {
    let mut segments = Vec::new();
    let mut cursor = size::HEADER;
    if cursor == data.len() {
        return segments;
    }

    loop {
        if segments.len() == MAX_SEGMENTS {
            anomalies.push(PacketAnomaly::ChainLimitExceeded { offset: cursor });
            break;
        }

        let Ok(header) = SegmentHeader::parse(&data[cursor..]) else {
            anomalies.push(PacketAnomaly::Truncated {
                offset: cursor,
                needed: size::HEADER,
                available: data.len() - cursor,
            });
            break;
        };
        let offset = cursor;
        let index = segments.len();
        cursor += size::HEADER;

        let declared = usize::from(header.size_bytes);
        let remaining = &data[cursor..];

        // AdcQueue declares one sample's size and runs to the end of the buffer
        let take = if header.attribute == Attribute::AdcQueue {
            remaining.len()
        } else {
            declared
        };

        let Some(raw) = remaining.get(..take) else {
            anomalies.push(PacketAnomaly::Truncated {
                offset: cursor,
                needed: declared,
                available: remaining.len(),
            });
            segments.push(LogicalSegment {
                header,
                offset,
                raw: remaining.to_vec(),
                payload: SegmentPayload::Truncated(remaining.to_vec()),
            });
            cursor = data.len();
            break;
        };

        let payload = decode_payload(index, &header, raw, anomalies);
        cursor += raw.len();
        segments.push(LogicalSegment {
            header,
            offset,
            raw: raw.to_vec(),
            payload,
        });

        if !header.has_next {
            break;
        }
    }

    if cursor < data.len() && !matches!(anomalies.last(), Some(PacketAnomaly::Truncated { .. })) {
        anomalies.push(PacketAnomaly::TrailingBytes {
            offset: cursor,
            count: data.len() - cursor,
        });
    }

    segments
}

fn decode_payload(
    index: usize,
    header: &SegmentHeader,
    raw: &[u8],
    anomalies: &mut Vec<PacketAnomaly>,
) -> SegmentPayload {
    let declared = usize::from(header.size_bytes);
    let mismatch = |expected: usize| PacketAnomaly::SizeMismatch {
        segment: index,
        attribute: header.attribute,
        expected,
        declared,
    };

    match header.attribute {
        Attribute::Adc => {
            if declared != size::ADC {
                anomalies.push(mismatch(size::ADC));
            }
            SegmentPayload::Adc(AdcData::parse(raw))
        }
        Attribute::AdcQueue => {
            if declared != size::ADC_QUEUE_SAMPLE {
                anomalies.push(mismatch(size::ADC_QUEUE_SAMPLE));
            }
            if declared == 0 {
                if !raw.is_empty() {
                    anomalies.push(PacketAnomaly::SampleRemainder {
                        segment: index,
                        remainder: raw.len(),
                    });
                }
                return SegmentPayload::AdcQueue(Vec::new());
            }
            let chunks = raw.chunks_exact(declared);
            let remainder = chunks.remainder().len();
            let samples = chunks.map(AdcQueueSample::parse).collect();
            if remainder != 0 {
                anomalies.push(PacketAnomaly::SampleRemainder {
                    segment: index,
                    remainder,
                });
            }
            SegmentPayload::AdcQueue(samples)
        }
        Attribute::Settings => SegmentPayload::Settings(raw.to_vec()),
        Attribute::PdPacket => {
            if declared < size::PD_STATUS {
                anomalies.push(mismatch(size::PD_STATUS));
            }
            if declared <= size::PD_STATUS {
                return SegmentPayload::PdStatus(PdStatus::parse(raw));
            }
            let stream = decode_pd_stream(raw);
            if let StreamEnd::NegativeLength { offset, size_code } = stream.end {
                anomalies.push(PacketAnomaly::PdNegativeLength {
                    segment: index,
                    offset,
                    size_code,
                });
            }
            SegmentPayload::PdEvents(stream)
        }
        Attribute::LogMetadata => {
            if declared != size::LOG_METADATA {
                anomalies.push(mismatch(size::LOG_METADATA));
            }
            SegmentPayload::LogMetadata(LogMetadata::parse(raw))
        }
        Attribute::Unknown(_) => SegmentPayload::Raw(raw.to_vec()),
    }
}
