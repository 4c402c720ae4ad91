//! PD event stream decoding
//!
//! A PdPacket segment larger than the 12-byte status block carries a
//! preamble followed by back-to-back tagged records:
//!
//! - `0x45` .......... : 6-byte connection/status record
//! - `0x80..=0x9F` ... : 6-byte event header (size_flag, ts[4], sop) + wire bytes
//!
//! Anything else ends the stream. Trailing bytes are reported, not errors.

use serde::Serialize;
use tracing::trace;

use crate::error::EncodeError;
use crate::payload::PdStatus;
use crate::protocol::{pd, size};

/// Connection status record code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionCode {
    Connect,
    Disconnect,
    Other(u8),
}

impl From<u8> for ConnectionCode {
    fn from(code: u8) -> Self {
        match code {
            pd::CONNECT => Self::Connect,
            pd::DISCONNECT => Self::Disconnect,
            other => Self::Other(other),
        }
    }
}

impl ConnectionCode {
    pub fn raw(&self) -> u8 {
        match self {
            Self::Connect => pd::CONNECT,
            Self::Disconnect => pd::DISCONNECT,
            Self::Other(code) => *code,
        }
    }
}

/// One record inside a PD event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum PdEvent {
    ConnectionStatus {
        /// 24-bit device timestamp
        timestamp: u32,
        code: ConnectionCode,
    },
    WrappedMessage {
        timestamp: u32,
        sop_type: u8,
        /// Bit 7 of the leading size flag
        sop_valid: bool,
        /// Standard PD wire message (2-byte header + data objects); may be empty
        wire_bytes: Vec<u8>,
    },
}

impl PdEvent {
    /// Bytes this record occupied in the stream
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::ConnectionStatus { .. } => pd::CONNECTION_STATUS_LEN,
            Self::WrappedMessage { wire_bytes, .. } => pd::WRAPPED_HEADER_LEN + wire_bytes.len(),
        }
    }

    pub fn timestamp(&self) -> u32 {
        match self {
            Self::ConnectionStatus { timestamp, .. } | Self::WrappedMessage { timestamp, .. } => {
                *timestamp
            }
        }
    }

    /// Decoded PD message header, for wrapped messages carrying at least 2 wire bytes
    pub fn message_header(&self) -> Option<PdMessageHeader> {
        match self {
            Self::WrappedMessage { wire_bytes, .. } => match wire_bytes.as_slice() {
                [lo, hi, ..] => Some(PdMessageHeader::from(u16::from_le_bytes([*lo, *hi]))),
                _ => None,
            },
            Self::ConnectionStatus { .. } => None,
        }
    }

    /// Encode back to stream bytes. Wrapped messages longer than the size
    /// code can express are rejected.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Self::ConnectionStatus { timestamp, code } => {
                let ts = timestamp.to_le_bytes();
                Ok(vec![pd::STATUS_MARKER, ts[0], ts[1], ts[2], 0, code.raw()])
            }
            Self::WrappedMessage {
                timestamp,
                sop_type,
                sop_valid,
                wire_bytes,
            } => {
                let code = u8::try_from(wire_bytes.len())
                    .ok()
                    .and_then(|len| len.checked_add(pd::SIZE_OVERHEAD))
                    .filter(|code| *code <= pd::SIZE_MASK)
                    .ok_or(EncodeError::PdMessageTooLong {
                        len: wire_bytes.len(),
                        max: usize::from(pd::SIZE_MASK - pd::SIZE_OVERHEAD),
                    })?;
                let flag = if *sop_valid { code | pd::SOP_VALID } else { code };
                let mut out = Vec::with_capacity(self.encoded_len());
                out.push(flag);
                out.extend_from_slice(&timestamp.to_le_bytes());
                out.push(*sop_type);
                out.extend_from_slice(wire_bytes);
                Ok(out)
            }
        }
    }
}

/// Why the event loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamEnd {
    /// Every byte was consumed
    Complete,
    /// Leading byte is neither a status marker nor a wrapped-message flag
    UnknownMarker { offset: usize, byte: u8 },
    /// A record header or its wire bytes run past the payload
    Incomplete {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Size code below the 5-byte overhead (would give a negative wire length)
    NegativeLength { offset: usize, size_code: u8 },
}

/// Decoded PD event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdEventStream {
    pub preamble: PdStatus,
    pub events: Vec<PdEvent>,
    /// Bytes consumed, preamble included
    pub consumed: usize,
    pub end: StreamEnd,
}

impl PdEventStream {
    /// Trailing bytes that were not parsed into events
    pub fn unparsed(&self, total: usize) -> usize {
        total.saturating_sub(self.consumed)
    }
}

/// Decode a PD event stream (preamble + records)
pub fn decode_pd_stream(payload: &[u8]) -> PdEventStream {
    let preamble = PdStatus::parse(payload);
    if payload.len() < size::PD_STATUS {
        return PdEventStream {
            preamble,
            events: Vec::new(),
            consumed: 0,
            end: StreamEnd::Incomplete {
                offset: 0,
                needed: size::PD_STATUS,
                available: payload.len(),
            },
        };
    }

    let mut events = Vec::new();
    let mut i = size::PD_STATUS;

    let end = loop {
        let Some(&lead) = payload.get(i) else {
            break StreamEnd::Complete;
        };
        let rest = &payload[i..];

        if lead == pd::STATUS_MARKER {
            let Some(record) = rest.get(..pd::CONNECTION_STATUS_LEN) else {
                break StreamEnd::Incomplete {
                    offset: i,
                    needed: pd::CONNECTION_STATUS_LEN,
                    available: rest.len(),
                };
            };
            events.push(PdEvent::ConnectionStatus {
                timestamp: u32::from_le_bytes([record[1], record[2], record[3], 0]),
                code: ConnectionCode::from(record[5]),
            });
            i += pd::CONNECTION_STATUS_LEN;
        } else if (pd::WRAPPED_FIRST..=pd::WRAPPED_LAST).contains(&lead) {
            let size_code = lead & pd::SIZE_MASK;
            let Some(wire_len) = size_code.checked_sub(pd::SIZE_OVERHEAD) else {
                break StreamEnd::NegativeLength {
                    offset: i,
                    size_code,
                };
            };
            let needed = pd::WRAPPED_HEADER_LEN + usize::from(wire_len);
            let Some(record) = rest.get(..needed) else {
                break StreamEnd::Incomplete {
                    offset: i,
                    needed,
                    available: rest.len(),
                };
            };
            events.push(PdEvent::WrappedMessage {
                timestamp: u32::from_le_bytes([record[1], record[2], record[3], record[4]]),
                sop_type: record[5],
                sop_valid: lead & pd::SOP_VALID != 0,
                wire_bytes: record[pd::WRAPPED_HEADER_LEN..].to_vec(),
            });
            i += needed;
        } else {
            break StreamEnd::UnknownMarker {
                offset: i,
                byte: lead,
            };
        }
    };

    trace!(
        "PD stream: {} events, {}/{} bytes, {:?}",
        events.len(),
        i,
        payload.len(),
        end
    );

    PdEventStream {
        preamble,
        events,
        consumed: i,
        end,
    }
}

// =============================================================================
// PD wire message header
// =============================================================================

/// Standard USB PD 16-bit message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PdMessageHeader {
    pub message_type: u8,
    /// 0 = UFP, 1 = DFP
    pub port_data_role: bool,
    pub spec_revision: u8,
    /// 0 = Sink, 1 = Source
    pub port_power_role: bool,
    pub message_id: u8,
    pub num_data_objects: u8,
    pub extended: bool,
}

impl From<u16> for PdMessageHeader {
    fn from(raw: u16) -> Self {
        Self {
            message_type: (raw & 0x1F) as u8,
            port_data_role: raw & (1 << 5) != 0,
            spec_revision: ((raw >> 6) & 0x03) as u8,
            port_power_role: raw & (1 << 8) != 0,
            message_id: ((raw >> 9) & 0x07) as u8,
            num_data_objects: ((raw >> 12) & 0x07) as u8,
            extended: raw & (1 << 15) != 0,
        }
    }
}

impl PdMessageHeader {
    pub fn is_control(&self) -> bool {
        self.num_data_objects == 0 && !self.extended
    }

    /// Message name per the USB PD message type tables
    pub fn name(&self) -> &'static str {
        if self.extended {
            return pd_msg::extended_name(self.message_type);
        }
        if self.num_data_objects == 0 {
            pd_msg::control_name(self.message_type)
        } else {
            pd_msg::data_name(self.message_type)
        }
    }
}

/// USB PD message type name tables
pub mod pd_msg {
    pub fn control_name(message_type: u8) -> &'static str {
        match message_type {
            0x01 => "GoodCRC",
            0x02 => "GotoMin",
            0x03 => "Accept",
            0x04 => "Reject",
            0x05 => "Ping",
            0x06 => "PS_RDY",
            0x07 => "Get_Source_Cap",
            0x08 => "Get_Sink_Cap",
            0x09 => "DR_Swap",
            0x0A => "PR_Swap",
            0x0B => "VCONN_Swap",
            0x0C => "Wait",
            0x0D => "Soft_Reset",
            0x0E => "Data_Reset",
            0x0F => "Data_Reset_Complete",
            0x10 => "Not_Supported",
            0x11 => "Get_Source_Cap_Extended",
            0x12 => "Get_Status",
            0x13 => "FR_Swap",
            0x14 => "Get_PPS_Status",
            0x15 => "Get_Country_Codes",
            0x16 => "Get_Sink_Cap_Extended",
            0x17 => "Get_Source_Info",
            0x18 => "Get_Revision",
            _ => "Reserved",
        }
    }

    pub fn data_name(message_type: u8) -> &'static str {
        match message_type {
            0x01 => "Source_Capabilities",
            0x02 => "Request",
            0x03 => "BIST",
            0x04 => "Sink_Capabilities",
            0x05 => "Battery_Status",
            0x06 => "Alert",
            0x07 => "Get_Country_Info",
            0x08 => "Enter_USB",
            0x09 => "EPR_Request",
            0x0A => "EPR_Mode",
            0x0B => "Source_Info",
            0x0C => "Revision",
            0x0F => "Vendor_Defined",
            _ => "Reserved",
        }
    }

    pub fn extended_name(message_type: u8) -> &'static str {
        match message_type {
            0x01 => "Source_Capabilities_Extended",
            0x02 => "Status",
            0x03 => "Get_Battery_Cap",
            0x04 => "Get_Battery_Status",
            0x05 => "Battery_Capabilities",
            0x06 => "Get_Manufacturer_Info",
            0x07 => "Manufacturer_Info",
            0x08 => "Security_Request",
            0x09 => "Security_Response",
            0x0A => "Firmware_Update_Request",
            0x0B => "Firmware_Update_Response",
            0x0C => "PPS_Status",
            0x0D => "Country_Info",
            0x0E => "Country_Codes",
            0x0F => "Sink_Capabilities_Extended",
            0x10 => "Extended_Control",
            0x11 => "EPR_Source_Capabilities",
            0x12 => "EPR_Sink_Capabilities",
            _ => "Reserved",
        }
    }
}
