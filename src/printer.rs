//! Output formatting for analyzed transactions
//!
//! Text mode prints one block per transaction; JSON mode prints one object
//! per line.

use std::io::{self, Write};
use std::str::FromStr;

use km003c_protocol::{
    LogicalSegment, PacketBody, PdEvent, ProtocolPacket, SegmentPayload, StreamEnd,
};

use crate::correlation::requested_attributes;
use crate::tagger::{TaggedTransaction, TransactionTag};
use crate::trace::{std_request, ControlSetup, Direction, EventKind, TransferType, UrbEvent};

/// Output format for the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" | "jsonl" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Transaction filter for selective display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFilter {
    All,
    Bulk,
    Control,
    /// Malformed tag, decoder anomalies, decode errors or correlation findings
    Malformed,
    Tag(TransactionTag),
    /// Request packet type code
    Cmd(u8),
}

impl FromStr for TransactionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "bulk" => Ok(Self::Bulk),
            "control" | "ctrl" => Ok(Self::Control),
            "malformed" | "anomalies" => Ok(Self::Malformed),
            s if s.starts_with("tag=") => {
                let name = s.strip_prefix("tag=").unwrap_or(s);
                TransactionTag::from_name(name)
                    .map(Self::Tag)
                    .ok_or_else(|| format!("Unknown tag: {}", name))
            }
            s if s.starts_with("cmd=") || s.starts_with("0x") => {
                let hex_str = s.strip_prefix("cmd=").unwrap_or(s);
                let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
                u8::from_str_radix(hex_str, 16)
                    .map(Self::Cmd)
                    .map_err(|e| format!("Invalid command byte: {}", e))
            }
            _ => Err(format!("Unknown filter: {}", s)),
        }
    }
}

impl TransactionFilter {
    pub fn matches(&self, tagged: &TaggedTransaction) -> bool {
        match self {
            Self::All => true,
            Self::Bulk => tagged.transaction.transfer_type() == Some(TransferType::Bulk),
            Self::Control => tagged.transaction.transfer_type() == Some(TransferType::Control),
            Self::Malformed => {
                tagged.tag == TransactionTag::Malformed
                    || tagged.anomaly_count() > 0
                    || !tagged.decode_errors.is_empty()
                    || !tagged.findings.is_empty()
            }
            Self::Tag(tag) => tagged.tag == *tag,
            Self::Cmd(code) => tagged
                .request
                .as_ref()
                .is_some_and(|p| p.packet_type().code() == *code),
        }
    }
}

/// Output printer
pub struct Printer {
    format: OutputFormat,
    filter: TransactionFilter,
    hex: bool,
}

impl Printer {
    pub fn new(format: OutputFormat, filter: TransactionFilter) -> Self {
        Self {
            format,
            filter,
            hex: false,
        }
    }

    /// Enable raw hex dump of member payloads
    pub fn with_hex(mut self, hex: bool) -> Self {
        self.hex = hex;
        self
    }

    /// Print every transaction that passes the filter; returns how many were printed
    pub fn print_all<W: Write>(
        &self,
        out: &mut W,
        transactions: &[TaggedTransaction],
    ) -> io::Result<usize> {
        let mut printed = 0;
        for tagged in transactions {
            if self.print(out, tagged)? {
                printed += 1;
            }
        }
        Ok(printed)
    }

    /// Print one transaction if it passes the filter
    pub fn print<W: Write>(&self, out: &mut W, tagged: &TaggedTransaction) -> io::Result<bool> {
        if !self.filter.matches(tagged) {
            return Ok(false);
        }
        match self.format {
            OutputFormat::Text => self.print_text(out, tagged)?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut *out, tagged)?;
                writeln!(out)?;
            }
        }
        Ok(true)
    }

    fn print_text<W: Write>(&self, out: &mut W, tagged: &TaggedTransaction) -> io::Result<()> {
        let tx = &tagged.transaction;
        writeln!(
            out,
            "#{:<5} {:.6} frames {}-{} ({} events, {:.3} ms) {} [{}]",
            tx.index,
            tx.start_time(),
            tx.first_frame(),
            tx.last_frame(),
            tx.events.len(),
            tx.duration() * 1000.0,
            tagged.tag.name(),
            tx.kind.name()
        )?;

        if let Some(setup) = tx.events.iter().find_map(|e| e.setup.as_ref()) {
            writeln!(out, "  SETUP {}", describe_setup(setup))?;
            if let Some(text) = descriptor_string(setup, tx.events.iter()) {
                writeln!(out, "  STRING \"{}\"", text)?;
            }
        }
        if let Some(request) = &tagged.request {
            print_packet(out, "REQ", request)?;
        }
        if let Some(response) = &tagged.response {
            print_packet(out, "RSP", response)?;
        }
        for error in &tagged.decode_errors {
            writeln!(out, "  ! decode error: {}", error)?;
        }
        for note in &tx.notes {
            writeln!(out, "  ! note: {:?}", note)?;
        }
        for finding in &tagged.findings {
            writeln!(out, "  ! finding: {:?}", finding)?;
        }
        if self.hex {
            for event in tx.events.iter().filter(|e| e.has_payload()) {
                writeln!(out, "  {} {}", event_label(event), hex::encode(&event.payload))?;
            }
        }
        Ok(())
    }
}

fn event_label(event: &UrbEvent) -> String {
    let kind = match event.event_kind {
        EventKind::Submit => "S",
        EventKind::Complete => "C",
    };
    let dir = match event.direction() {
        Direction::Out => "OUT",
        Direction::In => "IN ",
    };
    format!("{:>8} {} {} EP{:02x}", event.frame_number, kind, dir, event.endpoint_address)
}

fn describe_setup(setup: &ControlSetup) -> String {
    let name = if setup.is_standard() {
        std_request::name(setup.b_request)
    } else {
        "NON-STANDARD"
    };
    format!(
        "bmRequestType=0x{:02x} bRequest=0x{:02x} ({}) wValue=0x{:04x} wIndex=0x{:04x} wLength={}",
        setup.bm_request_type, setup.b_request, name, setup.w_value, setup.w_index, setup.w_length
    )
}

/// String descriptor text for a standard GET_DESCRIPTOR(STRING) exchange
fn descriptor_string<'a>(
    setup: &ControlSetup,
    mut events: impl Iterator<Item = &'a UrbEvent>,
) -> Option<String> {
    const STRING_DESCRIPTOR: u8 = 0x03;
    if !setup.is_standard()
        || setup.b_request != std_request::GET_DESCRIPTOR
        || setup.descriptor_type() != STRING_DESCRIPTOR
    {
        return None;
    }
    let data = &events.find(|e| e.is_complete() && e.has_payload())?.payload;
    decode_usb_string(data)
}

/// Decode a USB string descriptor (bLength, bDescriptorType, UTF-16LE)
fn decode_usb_string(data: &[u8]) -> Option<String> {
    let (&b_length, rest) = data.split_first()?;
    let (&b_descriptor_type, body) = rest.split_first()?;
    if b_descriptor_type != 0x03 || usize::from(b_length) > data.len() {
        return None;
    }
    let end = usize::from(b_length).saturating_sub(2).min(body.len());
    let units: Vec<u16> = body[..end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let text = String::from_utf16_lossy(&units);
    (!text.is_empty()).then_some(text)
}

fn print_packet<W: Write>(out: &mut W, label: &str, packet: &ProtocolPacket) -> io::Result<()> {
    match &packet.body {
        PacketBody::Control { extra } => {
            write!(out, "  {} {} id=0x{:02x}", label, packet.packet_type(), packet.id())?;
            if let Some(mask) = packet.attribute_mask().filter(|m| *m != 0) {
                let (attributes, unmapped) = requested_attributes(mask);
                let names: Vec<String> = attributes.iter().map(|a| a.to_string()).collect();
                write!(out, " mask=0x{:04x} [{}]", mask, names.join(", "))?;
                if unmapped != 0 {
                    write!(out, " unmapped=0x{:04x}", unmapped)?;
                }
            }
            if !extra.is_empty() {
                write!(out, " +{} bytes", extra.len())?;
            }
            writeln!(out)?;
        }
        PacketBody::Data { segments } => {
            write!(
                out,
                "  {} {} id=0x{:02x} {} segment(s)",
                label,
                packet.packet_type(),
                packet.id(),
                segments.len()
            )?;
            if let Some(words) = packet.header.obj_count_words() {
                write!(out, " objs={}", words)?;
            }
            writeln!(out)?;
            for (i, segment) in segments.iter().enumerate() {
                print_segment(out, i, segment)?;
            }
        }
    }
    for anomaly in &packet.anomalies {
        writeln!(out, "  ! anomaly: {:?}", anomaly)?;
    }
    Ok(())
}

fn print_segment<W: Write>(out: &mut W, i: usize, segment: &LogicalSegment) -> io::Result<()> {
    writeln!(
        out,
        "    seg[{}] {} chunk={} size={} next={}: {}",
        i,
        segment.attribute(),
        segment.chunk(),
        segment.size_bytes(),
        segment.has_next(),
        describe_payload(&segment.payload)
    )?;
    if let SegmentPayload::PdEvents(stream) = &segment.payload {
        for event in &stream.events {
            writeln!(out, "      {}", describe_pd_event(event))?;
        }
        if stream.end != StreamEnd::Complete {
            writeln!(out, "      stopped: {:?}", stream.end)?;
        }
    }
    Ok(())
}

fn describe_payload(payload: &SegmentPayload) -> String {
    match payload {
        SegmentPayload::Adc(adc) => {
            let rate = adc
                .sample_rate_sps()
                .map_or_else(|| format!("rate#{}", adc.rate_raw), |sps| format!("{} SPS", sps));
            let power = format!(
                "VBUS {:.4} V, IBUS {:.4} A, {:.4} W, {:.1} C",
                adc.vbus_v(),
                adc.ibus_a(),
                adc.power_w(),
                adc.temp_c()
            );
            format!(
                "{}, CC1 {:.3} V, CC2 {:.3} V, D+ {:.3} V, D- {:.3} V, {}",
                power,
                adc.cc1_v(),
                adc.cc2_v(),
                adc.dp_v(),
                adc.dm_v(),
                rate
            )
        }
        SegmentPayload::AdcQueue(samples) => match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => format!(
                "{} samples, seq {}..{}, last VBUS {:.4} V IBUS {:.4} A",
                samples.len(),
                first.sequence,
                last.sequence,
                last.vbus_v(),
                last.ibus_a()
            ),
            _ => "no samples".to_string(),
        },
        SegmentPayload::Settings(bytes) => format!("settings, {} bytes", bytes.len()),
        SegmentPayload::PdStatus(status) => format!(
            "PD status ts={} VBUS {:.3} V IBUS {:.3} A",
            status.timestamp,
            status.vbus_v(),
            status.ibus_a()
        ),
        SegmentPayload::PdEvents(stream) => format!(
            "PD status ts={} VBUS {:.3} V, {} event(s)",
            stream.preamble.timestamp,
            stream.preamble.vbus_v(),
            stream.events.len()
        ),
        SegmentPayload::LogMetadata(log) => format!(
            "log \"{}\" {} samples every {} ms ({:.1} s, {} bytes)",
            log.name,
            log.sample_count,
            log.interval_ms,
            log.duration_s(),
            log.data_size()
        ),
        SegmentPayload::Raw(bytes) => format!("{} raw bytes", bytes.len()),
        SegmentPayload::Truncated(bytes) => format!("truncated, {} bytes present", bytes.len()),
    }
}

fn describe_pd_event(event: &PdEvent) -> String {
    match event {
        PdEvent::ConnectionStatus { timestamp, code } => {
            format!("{:>10} status {:?}", timestamp, code)
        }
        PdEvent::WrappedMessage {
            timestamp,
            sop_type,
            wire_bytes,
            ..
        } => match event.message_header() {
            Some(header) => format!(
                "{:>10} SOP{} {} id={} objs={} ({} bytes)",
                timestamp,
                sop_type,
                header.name(),
                header.message_id,
                header.num_data_objects,
                wire_bytes.len()
            ),
            None => format!("{:>10} SOP{} tick ({} bytes)", timestamp, sop_type, wire_bytes.len()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::{LogicalTransaction, TransactionKind};
    use crate::tagger::tag_transaction;
    use km003c_protocol::{Attribute, ControlRequest, DataPacketBuilder, GetData};

    fn tagged() -> TaggedTransaction {
        let response = DataPacketBuilder::new(6)
            .segment(Attribute::Adc, 0, vec![0; 44])
            .build()
            .unwrap();
        let request = GetData::new(&[Attribute::Adc]).build(6);
        let events = vec![
            UrbEvent::bulk(1, 0.5, 0x01, EventKind::Submit, "a", request),
            UrbEvent::bulk(2, 0.5001, 0x01, EventKind::Complete, "a", vec![]),
            UrbEvent::bulk(3, 0.502, 0x81, EventKind::Complete, "b", response),
            UrbEvent::bulk(4, 0.5021, 0x81, EventKind::Submit, "c", vec![]),
        ];
        tag_transaction(LogicalTransaction {
            index: 1,
            events,
            kind: TransactionKind::BulkCommandResponse,
            notes: vec![],
        })
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("all".parse::<TransactionFilter>().unwrap(), TransactionFilter::All);
        assert_eq!("BULK".parse::<TransactionFilter>().unwrap(), TransactionFilter::Bulk);
        assert_eq!(
            "tag=enumeration".parse::<TransactionFilter>().unwrap(),
            TransactionFilter::Tag(TransactionTag::Enumeration)
        );
        assert_eq!("cmd=0x0c".parse::<TransactionFilter>().unwrap(), TransactionFilter::Cmd(0x0C));
        assert_eq!("0x41".parse::<TransactionFilter>().unwrap(), TransactionFilter::Cmd(0x41));
        assert!("tag=bogus".parse::<TransactionFilter>().is_err());
        assert!("wat".parse::<TransactionFilter>().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let t = tagged();
        assert!(TransactionFilter::All.matches(&t));
        assert!(TransactionFilter::Bulk.matches(&t));
        assert!(!TransactionFilter::Control.matches(&t));
        assert!(!TransactionFilter::Malformed.matches(&t));
        assert!(TransactionFilter::Cmd(0x0C).matches(&t));
        assert!(!TransactionFilter::Cmd(0x44).matches(&t));
        assert!(TransactionFilter::Tag(TransactionTag::BulkCommandResponse).matches(&t));
    }

    #[test]
    fn test_text_output() {
        let mut out = Vec::new();
        let printer = Printer::new(OutputFormat::Text, TransactionFilter::All).with_hex(true);
        assert!(printer.print(&mut out, &tagged()).unwrap());
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("#1     0.500000 frames 1-4"));
        assert!(text.contains("BulkCommandResponse"));
        assert!(text.contains("REQ GetData id=0x06 mask=0x0001 [Adc]"));
        assert!(text.contains("RSP PutData id=0x06 1 segment(s)"));
        assert!(text.contains("seg[0] Adc chunk=0 size=44 next=false"));
        assert!(text.contains("0c060200"));
    }

    #[test]
    fn test_json_output_is_one_line() {
        let mut out = Vec::new();
        let printer = Printer::new(OutputFormat::Json, TransactionFilter::All);
        printer.print(&mut out, &tagged()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["tag"], "BulkCommandResponse");
        assert_eq!(value["transaction"]["index"], 1);
        assert_eq!(value["transaction"]["events"][0]["payload"], "0c060200");
    }

    #[test]
    fn test_filtered_out() {
        let mut out = Vec::new();
        let printer = Printer::new(OutputFormat::Text, TransactionFilter::Control);
        assert_eq!(printer.print_all(&mut out, &[tagged()]).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_usb_string_descriptor() {
        let data = [0x08, 0x03, b'K', 0, b'M', 0, b'3', 0];
        assert_eq!(decode_usb_string(&data).as_deref(), Some("KM3"));
        assert_eq!(decode_usb_string(&[0x04, 0x02, 0, 0]), None);
    }
}
