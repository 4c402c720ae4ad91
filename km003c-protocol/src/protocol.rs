//! Protocol constants and code tables for the KM003C vendor bulk protocol

use serde::Serialize;
use std::fmt;

/// Main header packet type codes (low 7 bits of byte 0)
pub mod packet_type {
    // Control-class packets
    pub const CONNECT: u8 = 0x02;
    pub const DISCONNECT: u8 = 0x03;
    pub const ACCEPT: u8 = 0x05;
    pub const REJECT: u8 = 0x06;
    pub const GET_DATA: u8 = 0x0C;
    pub const START_GRAPH: u8 = 0x0E;
    pub const STOP_GRAPH: u8 = 0x0F;
    pub const ENABLE_PD_MONITOR: u8 = 0x10;
    pub const DISABLE_PD_MONITOR: u8 = 0x11;
    pub const HEAD: u8 = 0x40;
    /// Encrypted memory download request (32-byte blob follows the header)
    pub const MEMORY_READ: u8 = 0x44;
    /// Streaming authentication handshake (32-byte blob follows the header)
    pub const STREAMING_AUTH: u8 = 0x4C;

    // Data-class packets
    pub const PUT_DATA: u8 = 0x41;

    /// Get human-readable name for a packet type code
    pub fn name(code: u8) -> &'static str {
        match code {
            CONNECT => "Connect",
            DISCONNECT => "Disconnect",
            ACCEPT => "Accept",
            REJECT => "Reject",
            GET_DATA => "GetData",
            START_GRAPH => "StartGraph",
            STOP_GRAPH => "StopGraph",
            ENABLE_PD_MONITOR => "EnablePdMonitor",
            DISABLE_PD_MONITOR => "DisablePdMonitor",
            HEAD => "Head",
            PUT_DATA => "PutData",
            MEMORY_READ => "MemoryRead",
            STREAMING_AUTH => "StreamingAuth",
            _ => "Unknown",
        }
    }
}

/// Logical segment attribute codes (15-bit)
pub mod attribute {
    pub const ADC: u16 = 0x0001;
    pub const ADC_QUEUE: u16 = 0x0002;
    pub const SETTINGS: u16 = 0x0008;
    pub const PD_PACKET: u16 = 0x0010;
    pub const LOG_METADATA: u16 = 0x0200;

    /// Request bitmask bit → response attribute.
    ///
    /// Bit 2 (the "10K queue" bit in vendor docs) has no observed response
    /// attribute and is absent.
    pub const BIT_TABLE: &[(u8, u16)] = &[
        (0, ADC),
        (1, ADC_QUEUE),
        (3, SETTINGS),
        (4, PD_PACKET),
        (9, LOG_METADATA),
    ];
}

/// Fixed payload sizes in bytes
pub mod size {
    /// Main header and logical segment header
    pub const HEADER: usize = 4;
    /// One ADC snapshot
    pub const ADC: usize = 44;
    /// One AdcQueue streaming sample
    pub const ADC_QUEUE_SAMPLE: usize = 20;
    /// PD status block / event stream preamble
    pub const PD_STATUS: usize = 12;
    /// Offline log metadata block
    pub const LOG_METADATA: usize = 48;
}

/// PD event stream framing
pub mod pd {
    /// Leading byte of a connection status record
    pub const STATUS_MARKER: u8 = 0x45;
    /// Length of a connection status record
    pub const CONNECTION_STATUS_LEN: usize = 6;
    /// First leading byte of a wrapped wire message
    pub const WRAPPED_FIRST: u8 = 0x80;
    /// Last leading byte of a wrapped wire message
    pub const WRAPPED_LAST: u8 = 0x9F;
    /// Length of a wrapped message header (size flag, u32 timestamp, SOP)
    pub const WRAPPED_HEADER_LEN: usize = 6;
    /// Size code overhead subtracted to get the wire length
    pub const SIZE_OVERHEAD: u8 = 5;
    /// Size code mask in the leading byte
    pub const SIZE_MASK: u8 = 0x3F;
    /// SOP-valid flag in the leading byte
    pub const SOP_VALID: u8 = 0x80;

    /// Connection status codes
    pub const CONNECT: u8 = 0x11;
    pub const DISCONNECT: u8 = 0x12;
}

/// Application-layer packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PacketType {
    Connect,
    Disconnect,
    Accept,
    Reject,
    GetData,
    StartGraph,
    StopGraph,
    EnablePdMonitor,
    DisablePdMonitor,
    Head,
    PutData,
    MemoryRead,
    StreamingAuth,
    /// Code outside the known table
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(code: u8) -> Self {
        match code & 0x7F {
            packet_type::CONNECT => Self::Connect,
            packet_type::DISCONNECT => Self::Disconnect,
            packet_type::ACCEPT => Self::Accept,
            packet_type::REJECT => Self::Reject,
            packet_type::GET_DATA => Self::GetData,
            packet_type::START_GRAPH => Self::StartGraph,
            packet_type::STOP_GRAPH => Self::StopGraph,
            packet_type::ENABLE_PD_MONITOR => Self::EnablePdMonitor,
            packet_type::DISABLE_PD_MONITOR => Self::DisablePdMonitor,
            packet_type::HEAD => Self::Head,
            packet_type::PUT_DATA => Self::PutData,
            packet_type::MEMORY_READ => Self::MemoryRead,
            packet_type::STREAMING_AUTH => Self::StreamingAuth,
            other => Self::Unknown(other),
        }
    }
}

impl PacketType {
    /// Raw 7-bit type code
    pub fn code(&self) -> u8 {
        match self {
            Self::Connect => packet_type::CONNECT,
            Self::Disconnect => packet_type::DISCONNECT,
            Self::Accept => packet_type::ACCEPT,
            Self::Reject => packet_type::REJECT,
            Self::GetData => packet_type::GET_DATA,
            Self::StartGraph => packet_type::START_GRAPH,
            Self::StopGraph => packet_type::STOP_GRAPH,
            Self::EnablePdMonitor => packet_type::ENABLE_PD_MONITOR,
            Self::DisablePdMonitor => packet_type::DISABLE_PD_MONITOR,
            Self::Head => packet_type::HEAD,
            Self::PutData => packet_type::PUT_DATA,
            Self::MemoryRead => packet_type::MEMORY_READ,
            Self::StreamingAuth => packet_type::STREAMING_AUTH,
            Self::Unknown(code) => *code & 0x7F,
        }
    }

    /// Data-class packets carry a logical segment chain
    pub fn is_data(&self) -> bool {
        matches!(self, Self::PutData)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown(0x{:02X})", code),
            other => f.write_str(packet_type::name(other.code())),
        }
    }
}

/// Logical segment attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Attribute {
    Adc,
    AdcQueue,
    Settings,
    PdPacket,
    LogMetadata,
    /// Attribute outside the known table
    Unknown(u16),
}

impl From<u16> for Attribute {
    fn from(raw: u16) -> Self {
        match raw & 0x7FFF {
            attribute::ADC => Self::Adc,
            attribute::ADC_QUEUE => Self::AdcQueue,
            attribute::SETTINGS => Self::Settings,
            attribute::PD_PACKET => Self::PdPacket,
            attribute::LOG_METADATA => Self::LogMetadata,
            other => Self::Unknown(other),
        }
    }
}

impl Attribute {
    /// Raw 15-bit attribute value
    pub fn raw(&self) -> u16 {
        match self {
            Self::Adc => attribute::ADC,
            Self::AdcQueue => attribute::ADC_QUEUE,
            Self::Settings => attribute::SETTINGS,
            Self::PdPacket => attribute::PD_PACKET,
            Self::LogMetadata => attribute::LOG_METADATA,
            Self::Unknown(raw) => *raw & 0x7FFF,
        }
    }

    /// Fixed payload size this attribute is expected to declare, if any.
    ///
    /// AdcQueue declares one sample's size, PdPacket the 12-byte status
    /// block minimum.
    pub fn expected_size(&self) -> Option<usize> {
        match self {
            Self::Adc => Some(size::ADC),
            Self::AdcQueue => Some(size::ADC_QUEUE_SAMPLE),
            Self::PdPacket => Some(size::PD_STATUS),
            Self::LogMetadata => Some(size::LOG_METADATA),
            Self::Settings | Self::Unknown(_) => None,
        }
    }

    /// Attribute selected by a request bitmask bit, from the static table
    pub fn from_request_bit(bit: u8) -> Option<Self> {
        attribute::BIT_TABLE
            .iter()
            .find(|(b, _)| *b == bit)
            .map(|(_, raw)| Self::from(*raw))
    }

    /// Request bitmask bit that selects this attribute, from the static table
    pub fn request_bit(&self) -> Option<u8> {
        let raw = self.raw();
        attribute::BIT_TABLE
            .iter()
            .find(|(_, a)| *a == raw)
            .map(|(b, _)| *b)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adc => f.write_str("Adc"),
            Self::AdcQueue => f.write_str("AdcQueue"),
            Self::Settings => f.write_str("Settings"),
            Self::PdPacket => f.write_str("PdPacket"),
            Self::LogMetadata => f.write_str("LogMetadata"),
            Self::Unknown(raw) => write!(f, "Unknown(0x{:04X})", raw),
        }
    }
}

/// ADC sample rate selector carried in the Adc snapshot
pub fn sample_rate_sps(rate_raw: u8) -> Option<u32> {
    match rate_raw {
        0 => Some(2),
        1 => Some(10),
        2 => Some(50),
        3 => Some(1000),
        4 => Some(10000),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_roundtrip() {
        for code in 0u8..0x80 {
            assert_eq!(PacketType::from(code).code(), code);
        }
        assert_eq!(PacketType::from(0x0C), PacketType::GetData);
        assert_eq!(PacketType::from(0x41), PacketType::PutData);
        assert_eq!(PacketType::from(0x7E), PacketType::Unknown(0x7E));
    }

    #[test]
    fn test_packet_type_ignores_reserved_bit() {
        assert_eq!(PacketType::from(0x8C), PacketType::GetData);
    }

    #[test]
    fn test_attribute_table() {
        assert_eq!(Attribute::from_request_bit(0), Some(Attribute::Adc));
        assert_eq!(Attribute::from_request_bit(4), Some(Attribute::PdPacket));
        assert_eq!(Attribute::from_request_bit(9), Some(Attribute::LogMetadata));
        assert_eq!(Attribute::from_request_bit(2), None);
        assert_eq!(Attribute::Settings.request_bit(), Some(3));
        assert_eq!(Attribute::Unknown(0x40).request_bit(), None);
    }

    #[test]
    fn test_attribute_display() {
        assert_eq!(Attribute::AdcQueue.to_string(), "AdcQueue");
        assert_eq!(Attribute::Unknown(0x40).to_string(), "Unknown(0x0040)");
        assert_eq!(PacketType::Unknown(0x1A).to_string(), "Unknown(0x1A)");
    }
}
