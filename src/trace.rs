//! URB trace model and JSON Lines loading
//!
//! A trace is one record per URB Submit/Complete as extracted from a usbmon
//! capture. The loader accepts both the spelled-out field names and the
//! tshark-style ones (`urb_type`, `urb_id`, `urb_status`, `"0x03"`, ...).

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::TraceError;

/// Direction of USB transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Host to device (OUT)
    Out,
    /// Device to host (IN)
    In,
}

/// USB transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransferType {
    /// Control transfer (enumeration, class requests)
    Control,
    /// Bulk transfer (vendor command/response protocol)
    Bulk,
}

impl TransferType {
    fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(Self::Control),
            3 => Some(Self::Bulk),
            _ => None,
        }
    }
}

/// URB event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Submit,
    Complete,
}

/// URB completion status (Linux errno convention)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UrbStatus {
    Success,
    /// -EINPROGRESS, reported on every Submit
    Pending,
    /// -ENOENT or -ECONNRESET: the URB was unlinked
    Cancelled,
    Other(i32),
}

/// Linux errno values seen in usbmon status fields
pub mod errno {
    pub const ENOENT: i32 = -2;
    pub const ECONNRESET: i32 = -104;
    pub const EINPROGRESS: i32 = -115;
}

impl From<i32> for UrbStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Success,
            errno::EINPROGRESS => Self::Pending,
            errno::ENOENT | errno::ECONNRESET => Self::Cancelled,
            other => Self::Other(other),
        }
    }
}

impl UrbStatus {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Pending => errno::EINPROGRESS,
            Self::Cancelled => errno::ENOENT,
            Self::Other(code) => *code,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Opaque URB handle.
///
/// The kernel reuses these (they are buffer addresses), so equality only
/// means "possibly the same URB" within a short window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for RequestId {
    fn from(v: u64) -> Self {
        Self(format!("0x{:016x}", v))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Control transfer setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ControlSetup {
    /// bmRequestType: direction, type, recipient
    pub bm_request_type: u8,
    /// bRequest: specific request code
    pub b_request: u8,
    /// wValue: request-specific value
    pub w_value: u16,
    /// wIndex: interface or endpoint
    pub w_index: u16,
    /// wLength: data length
    pub w_length: u16,
}

/// bmRequestType type field values (bits 5..7)
pub mod request_type {
    pub const STANDARD: u8 = 0;
    pub const CLASS: u8 = 1;
    pub const VENDOR: u8 = 2;
}

/// Standard device requests (USB 2.0 table 9-4)
pub mod std_request {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_DESCRIPTOR: u8 = 7;
    pub const GET_CONFIGURATION: u8 = 8;
    pub const SET_CONFIGURATION: u8 = 9;
    pub const GET_INTERFACE: u8 = 10;
    pub const SET_INTERFACE: u8 = 11;

    pub fn name(b_request: u8) -> &'static str {
        match b_request {
            GET_STATUS => "GET_STATUS",
            CLEAR_FEATURE => "CLEAR_FEATURE",
            SET_FEATURE => "SET_FEATURE",
            SET_ADDRESS => "SET_ADDRESS",
            GET_DESCRIPTOR => "GET_DESCRIPTOR",
            SET_DESCRIPTOR => "SET_DESCRIPTOR",
            GET_CONFIGURATION => "GET_CONFIGURATION",
            SET_CONFIGURATION => "SET_CONFIGURATION",
            GET_INTERFACE => "GET_INTERFACE",
            SET_INTERFACE => "SET_INTERFACE",
            _ => "UNKNOWN",
        }
    }
}

impl ControlSetup {
    /// Type field of bmRequestType (standard/class/vendor)
    pub fn request_type(&self) -> u8 {
        (self.bm_request_type >> 5) & 0x03
    }

    pub fn is_standard(&self) -> bool {
        self.request_type() == request_type::STANDARD
    }

    /// Data stage direction
    pub fn direction(&self) -> Direction {
        if self.bm_request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Descriptor type for GET_DESCRIPTOR (high byte of wValue)
    pub fn descriptor_type(&self) -> u8 {
        (self.w_value >> 8) as u8
    }
}

/// One URB Submit or Complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrbEvent {
    pub frame_number: u64,
    /// Seconds, monotonic
    pub timestamp: f64,
    pub transfer_type: TransferType,
    pub endpoint_address: u8,
    pub event_kind: EventKind,
    pub request_id: RequestId,
    pub status: UrbStatus,
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<ControlSetup>,
}

fn serialize_hex<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

impl UrbEvent {
    /// A bulk event with success (Complete) or pending (Submit) status
    pub fn bulk(
        frame_number: u64,
        timestamp: f64,
        endpoint_address: u8,
        event_kind: EventKind,
        request_id: impl Into<RequestId>,
        payload: Vec<u8>,
    ) -> Self {
        let status = match event_kind {
            EventKind::Submit => UrbStatus::Pending,
            EventKind::Complete => UrbStatus::Success,
        };
        Self {
            frame_number,
            timestamp,
            transfer_type: TransferType::Bulk,
            endpoint_address,
            event_kind,
            request_id: request_id.into(),
            status,
            payload,
            setup: None,
        }
    }

    /// A control event on endpoint 0
    pub fn control(
        frame_number: u64,
        timestamp: f64,
        endpoint_address: u8,
        event_kind: EventKind,
        request_id: impl Into<RequestId>,
    ) -> Self {
        Self {
            transfer_type: TransferType::Control,
            ..Self::bulk(
                frame_number,
                timestamp,
                endpoint_address,
                event_kind,
                request_id,
                Vec::new(),
            )
        }
    }

    pub fn with_status(mut self, status: UrbStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_setup(mut self, setup: ControlSetup) -> Self {
        self.setup = Some(setup);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn direction(&self) -> Direction {
        if self.endpoint_address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn endpoint_number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    pub fn is_submit(&self) -> bool {
        self.event_kind == EventKind::Submit
    }

    pub fn is_complete(&self) -> bool {
        self.event_kind == EventKind::Complete
    }

    pub fn is_bulk(&self) -> bool {
        self.transfer_type == TransferType::Bulk
    }

    pub fn is_control(&self) -> bool {
        self.transfer_type == TransferType::Control
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }
}

// ============================================================================
// JSON Lines loading
// ============================================================================

/// A field that may be written as a number or a string (`"0x81"`, `"-115"`)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum IntOrString {
    /// Kernel URB addresses exceed `i64::MAX`
    Unsigned(u64),
    Int(i64),
    Str(String),
}

impl IntOrString {
    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Unsigned(v) => i64::try_from(*v).ok(),
            Self::Int(v) => Some(*v),
            Self::Str(s) => parse_int(s),
        }
    }

    fn text(&self) -> String {
        match self {
            Self::Unsigned(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Str(s) => s.clone(),
        }
    }
}

/// Parse a decimal or `0x`-prefixed integer, optionally negative
fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex_digits) => i64::from_str_radix(hex_digits, 16).ok()?,
        None => digits.parse().ok()?,
    };
    Some(if negative { -value } else { value })
}

#[derive(Debug, Deserialize)]
struct RawSetup {
    #[serde(alias = "bm_request_type", alias = "bmRequestType")]
    bmrequest_type: IntOrString,
    #[serde(alias = "b_request", alias = "bRequest")]
    brequest: IntOrString,
    #[serde(default, alias = "w_value", alias = "wValue")]
    wvalue: Option<IntOrString>,
    #[serde(default, alias = "w_index", alias = "wIndex")]
    windex: Option<IntOrString>,
    #[serde(default, alias = "w_length", alias = "wLength")]
    wlength: Option<IntOrString>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(alias = "frame")]
    frame_number: u64,
    timestamp: f64,
    transfer_type: IntOrString,
    #[serde(alias = "endpoint")]
    endpoint_address: IntOrString,
    #[serde(alias = "urb_type")]
    event_kind: String,
    #[serde(alias = "urb_id")]
    request_id: IntOrString,
    #[serde(default, alias = "urb_status")]
    status: Option<IntOrString>,
    #[serde(default, alias = "payload")]
    payload_hex: Option<String>,
    #[serde(default)]
    setup: Option<RawSetup>,
    // Flat setup columns as written by the capture converter
    #[serde(default)]
    bmrequest_type: Option<IntOrString>,
    #[serde(default)]
    brequest: Option<IntOrString>,
    #[serde(default)]
    wvalue: Option<IntOrString>,
    #[serde(default)]
    windex: Option<IntOrString>,
    #[serde(default)]
    wlength: Option<IntOrString>,
}

fn invalid(line: usize, field: &'static str, value: String) -> TraceError {
    TraceError::InvalidField { line, field, value }
}

fn parse_transfer_type(line: usize, raw: &IntOrString) -> Result<TransferType, TraceError> {
    if let Some(t) = raw.as_int().and_then(TransferType::from_code) {
        return Ok(t);
    }
    match raw.text().to_lowercase().as_str() {
        "control" | "urb_control" => Ok(TransferType::Control),
        "bulk" | "urb_bulk" => Ok(TransferType::Bulk),
        _ => Err(invalid(line, "transfer_type", raw.text())),
    }
}

fn parse_event_kind(line: usize, raw: &str) -> Result<EventKind, TraceError> {
    match raw.to_lowercase().as_str() {
        "s" | "submit" | "urb_submit" => Ok(EventKind::Submit),
        "c" | "complete" | "urb_complete" => Ok(EventKind::Complete),
        _ => Err(invalid(line, "event_kind", raw.to_string())),
    }
}

/// Accepts `0`, `"-115"`, `"success"`, or tshark's `"... (-115)"` spelling
fn parse_status(line: usize, raw: &IntOrString) -> Result<UrbStatus, TraceError> {
    if let Some(code) = raw.as_int() {
        return i32::try_from(code)
            .map(UrbStatus::from)
            .map_err(|_| invalid(line, "status", raw.text()));
    }
    let text = raw.text();
    match text.trim().to_lowercase().as_str() {
        "success" => return Ok(UrbStatus::Success),
        "pending" => return Ok(UrbStatus::Pending),
        "cancelled" | "canceled" => return Ok(UrbStatus::Cancelled),
        _ => {}
    }
    text.rsplit_once('(')
        .and_then(|(_, tail)| tail.strip_suffix(')'))
        .and_then(parse_int)
        .and_then(|code| i32::try_from(code).ok())
        .map(UrbStatus::from)
        .ok_or_else(|| invalid(line, "status", text.clone()))
}

fn field_u16(
    line: usize,
    field: &'static str,
    raw: Option<&IntOrString>,
) -> Result<u16, TraceError> {
    match raw {
        None => Ok(0),
        Some(v) => v
            .as_int()
            .and_then(|i| u16::try_from(i).ok())
            .ok_or_else(|| invalid(line, field, v.text())),
    }
}

fn field_u8(line: usize, field: &'static str, raw: &IntOrString) -> Result<u8, TraceError> {
    raw.as_int()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| invalid(line, field, raw.text()))
}

fn parse_setup(line: usize, raw: &RawSetup) -> Result<ControlSetup, TraceError> {
    Ok(ControlSetup {
        bm_request_type: field_u8(line, "bmRequestType", &raw.bmrequest_type)?,
        b_request: field_u8(line, "bRequest", &raw.brequest)?,
        w_value: field_u16(line, "wValue", raw.wvalue.as_ref())?,
        w_index: field_u16(line, "wIndex", raw.windex.as_ref())?,
        w_length: field_u16(line, "wLength", raw.wlength.as_ref())?,
    })
}

impl RawRecord {
    fn into_event(self, line: usize) -> Result<UrbEvent, TraceError> {
        let transfer_type = parse_transfer_type(line, &self.transfer_type)?;
        let endpoint_address = field_u8(line, "endpoint_address", &self.endpoint_address)?;
        let event_kind = parse_event_kind(line, &self.event_kind)?;
        let status = match &self.status {
            Some(raw) => parse_status(line, raw)?,
            None => UrbStatus::Success,
        };

        let payload = match &self.payload_hex {
            Some(text) => {
                let clean: String = text
                    .chars()
                    .filter(|c| !c.is_whitespace() && *c != ':')
                    .collect();
                hex::decode(&clean).map_err(|source| TraceError::Hex { line, source })?
            }
            None => Vec::new(),
        };

        let setup = match (&self.setup, self.bmrequest_type, self.brequest) {
            (Some(raw), _, _) => Some(parse_setup(line, raw)?),
            (None, Some(bmrequest_type), Some(brequest)) => Some(parse_setup(
                line,
                &RawSetup {
                    bmrequest_type,
                    brequest,
                    wvalue: self.wvalue,
                    windex: self.windex,
                    wlength: self.wlength,
                },
            )?),
            _ => None,
        };

        Ok(UrbEvent {
            frame_number: self.frame_number,
            timestamp: self.timestamp,
            transfer_type,
            endpoint_address,
            event_kind,
            request_id: RequestId(self.request_id.text()),
            status,
            payload,
            setup,
        })
    }
}

/// Parse one JSON record. `line` is 1-based and only used for error reporting.
pub fn parse_record(text: &str, line: usize) -> Result<UrbEvent, TraceError> {
    let raw: RawRecord =
        serde_json::from_str(text).map_err(|source| TraceError::Json { line, source })?;
    raw.into_event(line)
}

/// Parse a JSON Lines trace and sort it by frame number.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Vec<UrbEvent>, TraceError> {
    let mut events = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        events.push(parse_record(text, i + 1)?);
    }
    events.sort_by_key(|e| e.frame_number);
    tracing::debug!("Loaded {} URB events", events.len());
    Ok(events)
}

/// Load a JSON Lines trace from disk
pub fn load_trace(path: &Path) -> Result<Vec<UrbEvent>, TraceError> {
    let file = File::open(path)?;
    parse_trace(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tshark_style_record() {
        let line = r#"{"frame_number": 12, "timestamp": 1.5, "transfer_type": "0x03",
            "endpoint_address": "0x81", "urb_type": "C", "urb_status": "0",
            "urb_id": "ffff8a0c4d2e3f00", "payload_hex": "41:06:82:02", "data_length": 4}"#;
        let event = parse_record(line, 1).unwrap();
        assert_eq!(event.frame_number, 12);
        assert_eq!(event.transfer_type, TransferType::Bulk);
        assert_eq!(event.endpoint_address, 0x81);
        assert_eq!(event.direction(), Direction::In);
        assert_eq!(event.event_kind, EventKind::Complete);
        assert_eq!(event.status, UrbStatus::Success);
        assert_eq!(event.request_id, RequestId::from("ffff8a0c4d2e3f00"));
        assert_eq!(event.payload, [0x41, 0x06, 0x82, 0x02]);
        assert!(event.setup.is_none());
    }

    #[test]
    fn test_parse_spelled_out_record() {
        let line = r#"{"frame_number": 3, "timestamp": 0.25, "transfer_type": "bulk",
            "endpoint_address": 1, "event_kind": "submit", "request_id": 7,
            "status": -115, "payload_hex": "0c060200"}"#;
        let event = parse_record(line, 1).unwrap();
        assert_eq!(event.direction(), Direction::Out);
        assert_eq!(event.event_kind, EventKind::Submit);
        assert_eq!(event.status, UrbStatus::Pending);
        assert_eq!(event.request_id.0, "7");
    }

    #[test]
    fn test_kernel_address_request_id() {
        let line = r#"{"frame_number": 9, "timestamp": 0.5, "transfer_type": 3,
            "endpoint_address": 129, "urb_type": "C", "urb_id": 18446612682073571072,
            "urb_status": 0}"#;
        let event = parse_record(line, 1).unwrap();
        assert_eq!(event.request_id.0, "18446612682073571072");

        // Negative numbers still take the signed path
        let line = r#"{"frame_number": 1, "timestamp": 0.0, "transfer_type": 3,
            "endpoint_address": 1, "urb_type": "C", "urb_id": 1, "status": -2}"#;
        assert_eq!(parse_record(line, 1).unwrap().status, UrbStatus::Cancelled);
    }

    #[test]
    fn test_status_spellings() {
        let status = |s: &str| parse_status(1, &IntOrString::Str(s.to_string())).unwrap();
        assert_eq!(status("-2"), UrbStatus::Cancelled);
        assert_eq!(status("-104"), UrbStatus::Cancelled);
        assert_eq!(status("Success"), UrbStatus::Success);
        assert_eq!(status("Operation now in progress (-EINPROGRESS) (-115)"), UrbStatus::Pending);
        assert_eq!(status("-32"), UrbStatus::Other(-32));
        assert!(parse_status(1, &IntOrString::Str("bogus".into())).is_err());
    }

    #[test]
    fn test_flat_setup_columns() {
        let line = r#"{"frame_number": 1, "timestamp": 0.0, "transfer_type": "0x02",
            "endpoint_address": "0x80", "urb_type": "S", "urb_id": "a",
            "bmrequest_type": "0x80", "brequest": "6", "wvalue": 256, "windex": 0, "wlength": 18}"#;
        let event = parse_record(line, 1).unwrap();
        let setup = event.setup.unwrap();
        assert_eq!(setup.b_request, std_request::GET_DESCRIPTOR);
        assert!(setup.is_standard());
        assert_eq!(setup.direction(), Direction::In);
        assert_eq!(setup.descriptor_type(), 1);
        assert_eq!(setup.w_length, 18);
    }

    #[test]
    fn test_nested_setup_block() {
        let line = r#"{"frame_number": 1, "timestamp": 0.0, "transfer_type": "control",
            "endpoint_address": 0, "event_kind": "S", "request_id": "a",
            "setup": {"bmRequestType": 33, "bRequest": 10, "wValue": 0}}"#;
        let setup = parse_record(line, 1).unwrap().setup.unwrap();
        assert_eq!(setup.request_type(), request_type::CLASS);
        assert!(!setup.is_standard());
    }

    #[test]
    fn test_parse_trace_skips_comments_and_sorts() {
        let text = "# capture\n\n\
            {\"frame_number\": 2, \"timestamp\": 0.2, \"transfer_type\": 3, \
            \"endpoint_address\": 1, \"urb_type\": \"C\", \"urb_id\": \"a\"}\n\
            {\"frame_number\": 1, \"timestamp\": 0.1, \"transfer_type\": 3, \
            \"endpoint_address\": 1, \"urb_type\": \"S\", \"urb_id\": \"a\", \
            \"payload_hex\": \"0c010200\"}\n";
        let events = parse_trace(text.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].frame_number, 1);
        assert_eq!(events[1].frame_number, 2);
        assert!(events[1].payload.is_empty());
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let text = "# header\n{\"frame_number\": 1}\n";
        match parse_trace(text.as_bytes()) {
            Err(TraceError::Json { line, .. }) => assert_eq!(line, 2),
            other => panic!("Expected JSON error, got {:?}", other),
        }

        let text = "{\"frame_number\": 1, \"timestamp\": 0.0, \"transfer_type\": \"interrupt\", \
            \"endpoint_address\": 1, \"urb_type\": \"S\", \"urb_id\": \"a\"}\n";
        match parse_trace(text.as_bytes()) {
            Err(TraceError::InvalidField { line, field, .. }) => {
                assert_eq!(line, 1);
                assert_eq!(field, "transfer_type");
            }
            other => panic!("Expected field error, got {:?}", other),
        }

        let text = "{\"frame_number\": 1, \"timestamp\": 0.0, \"transfer_type\": 3, \
            \"endpoint_address\": 1, \"urb_type\": \"S\", \"urb_id\": \"a\", \
            \"payload_hex\": \"0c0\"}\n";
        assert!(matches!(
            parse_trace(text.as_bytes()),
            Err(TraceError::Hex { line: 1, .. })
        ));
    }

    #[test]
    fn test_parse_int_forms() {
        assert_eq!(parse_int("0x81"), Some(0x81));
        assert_eq!(parse_int("129"), Some(129));
        assert_eq!(parse_int("-115"), Some(-115));
        assert_eq!(parse_int("zz"), None);
    }
}
