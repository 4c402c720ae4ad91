//! Fixed-layout segment payloads
//!
//! Wire layouts are `zerocopy` structs with little-endian field types; each
//! converts into a plain public struct with native integers and derived
//! engineering values.

use serde::Serialize;
use zerocopy::byteorder::little_endian::{I16, I32, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::protocol::{sample_rate_sps, size};

/// Copy `bytes` into a zeroed `T`, truncating or zero-padding to its size.
///
/// Segments whose declared size differs from the fixed layout are still
/// decoded; the caller flags the mismatch.
fn read_padded<T>(bytes: &[u8]) -> T
where
    T: FromBytes + IntoBytes + Immutable + KnownLayout,
{
    let mut value = T::new_zeroed();
    let dst = value.as_mut_bytes();
    let n = dst.len().min(bytes.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    value
}

fn u24_le(bytes: [u8; 3]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

fn u24_to_le(value: u32) -> [u8; 3] {
    let b = value.to_le_bytes();
    [b[0], b[1], b[2]]
}

// =============================================================================
// Adc
// =============================================================================

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct AdcWire {
    vbus_uv: I32,
    ibus_ua: I32,
    vbus_avg_uv: I32,
    ibus_avg_ua: I32,
    vbus_ori_avg_raw: I32,
    ibus_ori_avg_raw: I32,
    temp_raw: I16,
    vcc1_tenth_mv: U16,
    vcc2_tenth_mv: U16,
    vdp_tenth_mv: U16,
    vdm_tenth_mv: U16,
    internal_vdd_tenth_mv: U16,
    rate_raw: u8,
    reserved: u8,
    vcc2_avg_tenth_mv: U16,
    vdp_avg_tenth_mv: U16,
    vdm_avg_tenth_mv: U16,
}

/// One ADC measurement snapshot (attribute Adc, 44 bytes)
///
/// Currents are signed; the sign gives the direction of flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdcData {
    pub vbus_uv: i32,
    pub ibus_ua: i32,
    pub vbus_avg_uv: i32,
    pub ibus_avg_ua: i32,
    pub vbus_ori_avg_raw: i32,
    pub ibus_ori_avg_raw: i32,
    pub temp_raw: i16,
    pub vcc1_tenth_mv: u16,
    pub vcc2_tenth_mv: u16,
    pub vdp_tenth_mv: u16,
    pub vdm_tenth_mv: u16,
    pub internal_vdd_tenth_mv: u16,
    pub rate_raw: u8,
    pub reserved: u8,
    pub vcc2_avg_tenth_mv: u16,
    pub vdp_avg_tenth_mv: u16,
    pub vdm_avg_tenth_mv: u16,
}

impl AdcData {
    pub fn parse(bytes: &[u8]) -> Self {
        let w: AdcWire = read_padded(bytes);
        Self {
            vbus_uv: w.vbus_uv.get(),
            ibus_ua: w.ibus_ua.get(),
            vbus_avg_uv: w.vbus_avg_uv.get(),
            ibus_avg_ua: w.ibus_avg_ua.get(),
            vbus_ori_avg_raw: w.vbus_ori_avg_raw.get(),
            ibus_ori_avg_raw: w.ibus_ori_avg_raw.get(),
            temp_raw: w.temp_raw.get(),
            vcc1_tenth_mv: w.vcc1_tenth_mv.get(),
            vcc2_tenth_mv: w.vcc2_tenth_mv.get(),
            vdp_tenth_mv: w.vdp_tenth_mv.get(),
            vdm_tenth_mv: w.vdm_tenth_mv.get(),
            internal_vdd_tenth_mv: w.internal_vdd_tenth_mv.get(),
            rate_raw: w.rate_raw,
            reserved: w.reserved,
            vcc2_avg_tenth_mv: w.vcc2_avg_tenth_mv.get(),
            vdp_avg_tenth_mv: w.vdp_avg_tenth_mv.get(),
            vdm_avg_tenth_mv: w.vdm_avg_tenth_mv.get(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let w = AdcWire {
            vbus_uv: I32::new(self.vbus_uv),
            ibus_ua: I32::new(self.ibus_ua),
            vbus_avg_uv: I32::new(self.vbus_avg_uv),
            ibus_avg_ua: I32::new(self.ibus_avg_ua),
            vbus_ori_avg_raw: I32::new(self.vbus_ori_avg_raw),
            ibus_ori_avg_raw: I32::new(self.ibus_ori_avg_raw),
            temp_raw: I16::new(self.temp_raw),
            vcc1_tenth_mv: U16::new(self.vcc1_tenth_mv),
            vcc2_tenth_mv: U16::new(self.vcc2_tenth_mv),
            vdp_tenth_mv: U16::new(self.vdp_tenth_mv),
            vdm_tenth_mv: U16::new(self.vdm_tenth_mv),
            internal_vdd_tenth_mv: U16::new(self.internal_vdd_tenth_mv),
            rate_raw: self.rate_raw,
            reserved: self.reserved,
            vcc2_avg_tenth_mv: U16::new(self.vcc2_avg_tenth_mv),
            vdp_avg_tenth_mv: U16::new(self.vdp_avg_tenth_mv),
            vdm_avg_tenth_mv: U16::new(self.vdm_avg_tenth_mv),
        };
        w.as_bytes().to_vec()
    }

    pub fn vbus_v(&self) -> f64 {
        f64::from(self.vbus_uv) / 1e6
    }

    pub fn ibus_a(&self) -> f64 {
        f64::from(self.ibus_ua) / 1e6
    }

    pub fn vbus_avg_v(&self) -> f64 {
        f64::from(self.vbus_avg_uv) / 1e6
    }

    pub fn ibus_avg_a(&self) -> f64 {
        f64::from(self.ibus_avg_ua) / 1e6
    }

    /// Signed: negative when power flows from the sink side
    pub fn power_w(&self) -> f64 {
        self.vbus_v() * self.ibus_a()
    }

    /// Die temperature, 1/128 °C per LSB
    pub fn temp_c(&self) -> f64 {
        f64::from(self.temp_raw) * 7.8125 / 1000.0
    }

    pub fn cc1_v(&self) -> f64 {
        tenth_mv_to_v(self.vcc1_tenth_mv)
    }

    pub fn cc2_v(&self) -> f64 {
        tenth_mv_to_v(self.vcc2_tenth_mv)
    }

    pub fn dp_v(&self) -> f64 {
        tenth_mv_to_v(self.vdp_tenth_mv)
    }

    pub fn dm_v(&self) -> f64 {
        tenth_mv_to_v(self.vdm_tenth_mv)
    }

    pub fn internal_vdd_v(&self) -> f64 {
        tenth_mv_to_v(self.internal_vdd_tenth_mv)
    }

    pub fn sample_rate_sps(&self) -> Option<u32> {
        sample_rate_sps(self.rate_raw)
    }
}

fn tenth_mv_to_v(raw: u16) -> f64 {
    f64::from(raw) / 10_000.0
}

// =============================================================================
// AdcQueue
// =============================================================================

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct AdcQueueSampleWire {
    sequence: U16,
    marker: U16,
    vbus_uv: I32,
    ibus_ua: I32,
    cc1_tenth_mv: U16,
    cc2_tenth_mv: U16,
    vdp_tenth_mv: U16,
    vdm_tenth_mv: U16,
}

/// One streaming sample from an AdcQueue segment (20 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdcQueueSample {
    pub sequence: u16,
    pub marker: u16,
    pub vbus_uv: i32,
    pub ibus_ua: i32,
    pub cc1_tenth_mv: u16,
    pub cc2_tenth_mv: u16,
    pub vdp_tenth_mv: u16,
    pub vdm_tenth_mv: u16,
}

impl AdcQueueSample {
    pub fn parse(bytes: &[u8]) -> Self {
        let w: AdcQueueSampleWire = read_padded(bytes);
        Self {
            sequence: w.sequence.get(),
            marker: w.marker.get(),
            vbus_uv: w.vbus_uv.get(),
            ibus_ua: w.ibus_ua.get(),
            cc1_tenth_mv: w.cc1_tenth_mv.get(),
            cc2_tenth_mv: w.cc2_tenth_mv.get(),
            vdp_tenth_mv: w.vdp_tenth_mv.get(),
            vdm_tenth_mv: w.vdm_tenth_mv.get(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let w = AdcQueueSampleWire {
            sequence: U16::new(self.sequence),
            marker: U16::new(self.marker),
            vbus_uv: I32::new(self.vbus_uv),
            ibus_ua: I32::new(self.ibus_ua),
            cc1_tenth_mv: U16::new(self.cc1_tenth_mv),
            cc2_tenth_mv: U16::new(self.cc2_tenth_mv),
            vdp_tenth_mv: U16::new(self.vdp_tenth_mv),
            vdm_tenth_mv: U16::new(self.vdm_tenth_mv),
        };
        w.as_bytes().to_vec()
    }

    pub fn vbus_v(&self) -> f64 {
        f64::from(self.vbus_uv) / 1e6
    }

    pub fn ibus_a(&self) -> f64 {
        f64::from(self.ibus_ua) / 1e6
    }

    pub fn power_w(&self) -> f64 {
        self.vbus_v() * self.ibus_a()
    }
}

// =============================================================================
// PD status block
// =============================================================================

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct PdStatusWire {
    type_id: u8,
    timestamp: [u8; 3],
    vbus_mv: U16,
    ibus_ma: I16,
    cc1_mv: U16,
    cc2_mv: U16,
}

/// PD status block: a bare PdPacket segment, or the preamble of an event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PdStatus {
    pub type_id: u8,
    /// 24-bit device timestamp
    pub timestamp: u32,
    pub vbus_mv: u16,
    pub ibus_ma: i16,
    pub cc1_mv: u16,
    pub cc2_mv: u16,
}

impl PdStatus {
    pub fn parse(bytes: &[u8]) -> Self {
        let w: PdStatusWire = read_padded(bytes);
        Self {
            type_id: w.type_id,
            timestamp: u24_le(w.timestamp),
            vbus_mv: w.vbus_mv.get(),
            ibus_ma: w.ibus_ma.get(),
            cc1_mv: w.cc1_mv.get(),
            cc2_mv: w.cc2_mv.get(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let w = PdStatusWire {
            type_id: self.type_id,
            timestamp: u24_to_le(self.timestamp),
            vbus_mv: U16::new(self.vbus_mv),
            ibus_ma: I16::new(self.ibus_ma),
            cc1_mv: U16::new(self.cc1_mv),
            cc2_mv: U16::new(self.cc2_mv),
        };
        w.as_bytes().to_vec()
    }

    pub fn vbus_v(&self) -> f64 {
        f64::from(self.vbus_mv) / 1000.0
    }

    pub fn ibus_a(&self) -> f64 {
        f64::from(self.ibus_ma) / 1000.0
    }
}

// =============================================================================
// LogMetadata
// =============================================================================

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct LogMetadataWire {
    name: [u8; 16],
    unknown: [u8; 2],
    sample_count: U16,
    interval_ms: U16,
    flags: U16,
    estimated_size: U32,
    reserved: [u8; 20],
}

/// Bytes per logged sample in an offline log download
pub const LOG_SAMPLE_BYTES: u32 = 16;

/// Offline log metadata block (attribute LogMetadata, 48 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LogMetadata {
    /// NUL-terminated ASCII name
    pub name: String,
    pub sample_count: u16,
    pub interval_ms: u16,
    pub flags: u16,
    pub estimated_size: u32,
}

impl LogMetadata {
    pub fn parse(bytes: &[u8]) -> Self {
        let w: LogMetadataWire = read_padded(bytes);
        let end = w.name.iter().position(|&b| b == 0).unwrap_or(w.name.len());
        Self {
            name: String::from_utf8_lossy(&w.name[..end]).into_owned(),
            sample_count: w.sample_count.get(),
            interval_ms: w.interval_ms.get(),
            flags: w.flags.get(),
            estimated_size: w.estimated_size.get(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut name = [0u8; 16];
        let n = self.name.len().min(name.len() - 1);
        name[..n].copy_from_slice(&self.name.as_bytes()[..n]);
        let w = LogMetadataWire {
            name,
            unknown: [0; 2],
            sample_count: U16::new(self.sample_count),
            interval_ms: U16::new(self.interval_ms),
            flags: U16::new(self.flags),
            estimated_size: U32::new(self.estimated_size),
            reserved: [0; 20],
        };
        w.as_bytes().to_vec()
    }

    pub fn duration_s(&self) -> f64 {
        f64::from(self.sample_count) * f64::from(self.interval_ms) / 1000.0
    }

    pub fn data_size(&self) -> u32 {
        u32::from(self.sample_count) * LOG_SAMPLE_BYTES
    }
}

const _: () = assert!(std::mem::size_of::<AdcWire>() == size::ADC);
const _: () = assert!(std::mem::size_of::<AdcQueueSampleWire>() == size::ADC_QUEUE_SAMPLE);
const _: () = assert!(std::mem::size_of::<PdStatusWire>() == size::PD_STATUS);
const _: () = assert!(std::mem::size_of::<LogMetadataWire>() == size::LOG_METADATA);
