//! Wire protocol for the POWER-Z KM003C USB-C analyzer
//!
//! This crate decodes the vendor bulk protocol spoken on the analyzer's
//! bulk endpoints:
//!
//! - Main and logical segment headers (bit-packed 4-byte words)
//! - Typed segment payloads (ADC snapshot, ADC queue, PD status, log metadata)
//! - The PD event stream carried inside PdPacket segments
//! - Builders for requests and synthetic data packets
//!
//! Everything is pure and synchronous; capture and device I/O live elsewhere.

pub mod encode;
pub mod error;
pub mod header;
pub mod packet;
pub mod payload;
pub mod pd_event;
pub mod protocol;

pub use encode::{ControlRequest, DataPacketBuilder, GetData, Simple};
pub use error::{DecodeError, EncodeError};
pub use header::{
    HeaderField, MainHeader, SegmentHeader, MAX_CHUNK, MAX_OBJECT_COUNT, MAX_SEGMENT_SIZE,
};
pub use packet::{
    decode_packet, LogicalSegment, PacketAnomaly, PacketBody, ProtocolPacket, SegmentPayload,
    MAX_SEGMENTS,
};
pub use payload::{AdcData, AdcQueueSample, LogMetadata, PdStatus};
pub use pd_event::{
    decode_pd_stream, ConnectionCode, PdEvent, PdEventStream, PdMessageHeader, StreamEnd,
};
pub use protocol::{Attribute, PacketType};
