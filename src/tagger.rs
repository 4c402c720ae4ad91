//! Transaction tagger
//!
//! Decodes the request and response payloads of a reconstructed transaction
//! and assigns a structural tag from a fixed decision table.

use km003c_protocol::{decode_packet, DecodeError, ProtocolPacket};
use serde::Serialize;

use crate::correlation::CorrelationFinding;
use crate::splitter::{LogicalTransaction, TransactionKind};
use crate::trace::{std_request, ControlSetup, TransferType};

/// Structural tag of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TransactionTag {
    /// Control transfer that is not part of enumeration
    ControlOnly,
    /// Standard device request issued during enumeration
    Enumeration,
    /// Vendor command with a decoded response
    BulkCommandResponse,
    /// Vendor command whose response arrived over several IN transfers
    BulkFragmentedResponse,
    BulkPollingOnly,
    Malformed,
}

impl TransactionTag {
    pub const ALL: &'static [TransactionTag] = &[
        TransactionTag::ControlOnly,
        TransactionTag::Enumeration,
        TransactionTag::BulkCommandResponse,
        TransactionTag::BulkFragmentedResponse,
        TransactionTag::BulkPollingOnly,
        TransactionTag::Malformed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ControlOnly => "ControlOnly",
            Self::Enumeration => "Enumeration",
            Self::BulkCommandResponse => "BulkCommandResponse",
            Self::BulkFragmentedResponse => "BulkFragmentedResponse",
            Self::BulkPollingOnly => "BulkPollingOnly",
            Self::Malformed => "Malformed",
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }
}

/// Standard requests a host issues while enumerating a device
pub const ENUMERATION_REQUESTS: &[u8] = &[
    std_request::GET_STATUS,
    std_request::CLEAR_FEATURE,
    std_request::SET_FEATURE,
    std_request::SET_ADDRESS,
    std_request::GET_DESCRIPTOR,
    std_request::GET_CONFIGURATION,
    std_request::SET_CONFIGURATION,
];

/// A transaction with its tag, decoded packets and validation findings
#[derive(Debug, Clone, Serialize)]
pub struct TaggedTransaction {
    pub transaction: LogicalTransaction,
    pub tag: TransactionTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<ProtocolPacket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ProtocolPacket>,
    /// Payloads too short to carry a main header
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decode_errors: Vec<DecodeError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<CorrelationFinding>,
}

impl TaggedTransaction {
    pub fn index(&self) -> usize {
        self.transaction.index
    }

    /// Total decoder anomalies across request and response
    pub fn anomaly_count(&self) -> usize {
        self.request
            .iter()
            .chain(self.response.iter())
            .map(|p| p.anomalies.len())
            .sum()
    }
}

fn is_enumeration(setup: &ControlSetup) -> bool {
    setup.is_standard() && ENUMERATION_REQUESTS.contains(&setup.b_request)
}

/// The decision table
fn classify(
    transaction: &LogicalTransaction,
    request: Option<&ProtocolPacket>,
) -> TransactionTag {
    match transaction.kind {
        TransactionKind::Orphan | TransactionKind::Malformed => TransactionTag::Malformed,
        TransactionKind::Control => {
            let setup = transaction.events.iter().find_map(|e| e.setup.as_ref());
            if setup.is_some_and(is_enumeration) {
                TransactionTag::Enumeration
            } else {
                TransactionTag::ControlOnly
            }
        }
        TransactionKind::BulkCommandResponse => match request {
            Some(packet) if packet.packet_type().is_known() => {
                TransactionTag::BulkCommandResponse
            }
            _ => TransactionTag::Malformed,
        },
        TransactionKind::BulkFragmentedResponse => match request {
            Some(packet) if packet.packet_type().is_known() => {
                TransactionTag::BulkFragmentedResponse
            }
            _ => TransactionTag::Malformed,
        },
        TransactionKind::BulkPollingOnly => TransactionTag::BulkPollingOnly,
    }
}

/// Tag, decoded packets and findings for one transaction
#[derive(Debug, Clone)]
pub struct TransactionDecode {
    pub tag: TransactionTag,
    pub request: Option<ProtocolPacket>,
    pub response: Option<ProtocolPacket>,
    pub decode_errors: Vec<DecodeError>,
    pub findings: Vec<CorrelationFinding>,
}

/// Decode and classify one transaction. Control transfers are not decoded:
/// their data stages are standard USB structures, not vendor packets.
/// Response fragments are joined before decoding.
pub fn decode_transaction(transaction: &LogicalTransaction) -> TransactionDecode {
    let mut decode_errors = Vec::new();
    let mut decode = |payload: Option<&[u8]>| -> Option<ProtocolPacket> {
        match decode_packet(payload?) {
            Ok(packet) => Some(packet),
            Err(e) => {
                decode_errors.push(e);
                None
            }
        }
    };

    let (request, response) = if transaction.transfer_type() == Some(TransferType::Bulk) {
        let request = decode(transaction.request_event().map(|e| e.payload.as_slice()));
        let response = decode(transaction.response_payload().as_deref());
        (request, response)
    } else {
        (None, None)
    };

    TransactionDecode {
        tag: classify(transaction, request.as_ref()),
        request,
        response,
        decode_errors,
        findings: Vec::new(),
    }
}

impl TaggedTransaction {
    pub fn new(transaction: LogicalTransaction, decode: TransactionDecode) -> Self {
        Self {
            transaction,
            tag: decode.tag,
            request: decode.request,
            response: decode.response,
            decode_errors: decode.decode_errors,
            findings: decode.findings,
        }
    }
}

/// Decode and tag one transaction
pub fn tag_transaction(transaction: LogicalTransaction) -> TaggedTransaction {
    let decode = decode_transaction(&transaction);
    TaggedTransaction::new(transaction, decode)
}
