//! Request/response correlation checks
//!
//! A GetData request names the attributes it wants through a bitmask; the
//! PutData answer must carry the same id and exactly those attributes.

use std::collections::BTreeSet;

use km003c_protocol::{Attribute, PacketType, ProtocolPacket};
use serde::Serialize;

/// The parts of a decoded request the validator looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationRequest {
    pub packet_type: PacketType,
    pub id: u8,
    pub mask: u16,
}

impl CorrelationRequest {
    pub fn from_packet(packet: &ProtocolPacket) -> Self {
        Self {
            packet_type: packet.packet_type(),
            id: packet.id(),
            mask: packet.attribute_mask().unwrap_or(0),
        }
    }
}

/// The parts of a decoded response the validator looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationResponse {
    pub packet_type: PacketType,
    pub id: u8,
    /// Segment attributes in chain order
    pub attributes: Vec<Attribute>,
}

impl CorrelationResponse {
    pub fn from_packet(packet: &ProtocolPacket) -> Self {
        Self {
            packet_type: packet.packet_type(),
            id: packet.id(),
            attributes: packet.attributes(),
        }
    }
}

/// A failed correlation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "finding")]
pub enum CorrelationFinding {
    /// Response id differs from the request id
    IdMismatch { request: u8, response: u8 },
    /// Requested attributes absent from the response
    MissingAttributes { attributes: Vec<Attribute> },
    /// Response attributes that were not requested
    UnexpectedAttributes { attributes: Vec<Attribute> },
    /// Request bits with no entry in the bit table
    UnmappedRequestBits { bits: u16 },
}

/// Attributes selected by a request mask, plus any bits the table does not map
pub fn requested_attributes(mask: u16) -> (BTreeSet<Attribute>, u16) {
    let mut attributes = BTreeSet::new();
    let mut unmapped = 0u16;
    for bit in 0..16u8 {
        if mask & (1 << bit) == 0 {
            continue;
        }
        match Attribute::from_request_bit(bit) {
            Some(attr) => {
                attributes.insert(attr);
            }
            None => unmapped |= 1 << bit,
        }
    }
    (attributes, unmapped)
}

/// Queue-only requests may legitimately be answered with an empty chain
fn is_queue_only(mask: u16) -> bool {
    Attribute::AdcQueue
        .request_bit()
        .is_some_and(|bit| mask == 1 << bit)
}

/// Check one request/response pair.
///
/// Attribute sets are compared only for GetData answered by PutData; any
/// other pairing is checked for id equality alone.
pub fn validate(
    request: &CorrelationRequest,
    response: &CorrelationResponse,
) -> Vec<CorrelationFinding> {
    let mut findings = Vec::new();

    if request.id != response.id {
        findings.push(CorrelationFinding::IdMismatch {
            request: request.id,
            response: response.id,
        });
    }

    if request.packet_type != PacketType::GetData || response.packet_type != PacketType::PutData
    {
        return findings;
    }

    let (expected, unmapped) = requested_attributes(request.mask);
    if unmapped != 0 {
        findings.push(CorrelationFinding::UnmappedRequestBits { bits: unmapped });
    }

    if response.attributes.is_empty() && is_queue_only(request.mask) {
        return findings;
    }

    let observed: BTreeSet<Attribute> = response.attributes.iter().copied().collect();
    let missing: Vec<Attribute> = expected.difference(&observed).copied().collect();
    let unexpected: Vec<Attribute> = observed.difference(&expected).copied().collect();
    if !missing.is_empty() {
        findings.push(CorrelationFinding::MissingAttributes {
            attributes: missing,
        });
    }
    if !unexpected.is_empty() {
        findings.push(CorrelationFinding::UnexpectedAttributes {
            attributes: unexpected,
        });
    }
    findings
}

/// Validate two decoded packets
pub fn validate_packets(
    request: &ProtocolPacket,
    response: &ProtocolPacket,
) -> Vec<CorrelationFinding> {
    validate(
        &CorrelationRequest::from_packet(request),
        &CorrelationResponse::from_packet(response),
    )
}
