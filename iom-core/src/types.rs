//! Shared types, error enum, and the validity word model for iom-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by iom-core. The per-cycle data plane never returns
/// these: bad data is encoded in validity words, not `Err`. Errors only come
/// out of configuration parsing and init.
#[derive(Debug, Error)]
pub enum IomError {
    #[error("config magic mismatch: got {0:#010x}")]
    BadMagic(u32),
    #[error("config truncated: {what} needs {needed} bytes at offset {offset}, blob has {available}")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("{what} count {count} exceeds ceiling {max}")]
    TableOverflow {
        what: &'static str,
        count: usize,
        max: usize,
    },
    #[error("unknown {what} kind {value}")]
    UnknownKind { what: &'static str, value: u32 },
}

pub type Result<T> = std::result::Result<T, IomError>;

// ---------------------------------------------------------------------------
// Compile-time ceilings
// ---------------------------------------------------------------------------

pub const MAX_SOURCES_PER_INPUT: usize = 12;
pub const MAX_NUMBER_OF_SELECTION_SETS: usize = 1024;
pub const MAX_RX_PORT_NUMBER: usize = 1024;
pub const MAX_TX_PORT_NUMBER: usize = 1024;
pub const MAX_CAN_PARAM_PER_MESSAGE: usize = 32;
pub const MAX_CAN_MESSAGES_CONFIGURED: usize = 64;
pub const MAX_CAN_MESSAGES_PER_CYCLE: usize = 64;

pub const A429_MAX_PORTS: usize = 6;
pub const A429_MAX_LABELS: usize = 256;
pub const A429_MAX_SDI: usize = 4;
pub const A429_READS_PER_PORT_PER_CYCLE: usize = 16;

/// Message freshness flag values stored in the in-band AFDX header and in the
/// A429 raw-data slots.
pub const MSG_UNFRESH: u32 = 0;
pub const MSG_FRESH: u32 = 1;

/// CRC / FC test flag values stored in the in-band AFDX header.
pub const TEST_FAILED: u32 = 0;
pub const TEST_PASSED: u32 = 1;

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Bus transport carrying an input signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transport {
    A664,
    A429,
    A825,
}

impl Transport {
    pub fn from_u16(v: u16) -> Transport {
        match v {
            1 => Transport::A429,
            2 => Transport::A825,
            _ => Transport::A664,
        }
    }
}

// ---------------------------------------------------------------------------
// A664 functional status
// ---------------------------------------------------------------------------

/// A664 functional status byte values as they appear on the wire.
pub const A664_FS_ND: u8 = 0x00;
pub const A664_FS_NO: u8 = 0x03;
pub const A664_FS_FT: u8 = 0x0C;
pub const A664_FS_NCD: u8 = 0x30;

// ---------------------------------------------------------------------------
// Validity word
// ---------------------------------------------------------------------------

/// Internal confirmation state of a datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DataState {
    /// Initialisation value, nothing confirmed yet.
    #[default]
    Init = 0,
    /// NORMAL OPERATION or FUNCTIONAL TEST.
    Valid = 1,
    /// FS not normal operation, SSM invalid, range miss.
    Invalid = 2,
    /// Unfresh, no data within the refresh period.
    Lost = 3,
}

impl DataState {
    pub fn from_u8(v: u8) -> DataState {
        match v {
            1 => DataState::Valid,
            2 => DataState::Invalid,
            3 => DataState::Lost,
            _ => DataState::Init,
        }
    }
}

/// Interface state exposed to the application in the validity word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum IfState {
    #[default]
    NoData = 0,
    Ncd = 1,
    Test = 2,
    Empty = 3,
    NormalOp = 4,
    Unfresh = 5,
    OutOfRange = 6,
}

impl IfState {
    pub fn from_u8(v: u8) -> IfState {
        match v {
            1 => IfState::Ncd,
            2 => IfState::Test,
            3 => IfState::Empty,
            4 => IfState::NormalOp,
            5 => IfState::Unfresh,
            6 => IfState::OutOfRange,
            _ => IfState::NoData,
        }
    }
}

/// The 4-byte validity word written next to every parameter:
/// `(spare, selectedSource, internal state, interface state)`.
///
/// `selected_source` is 1-based when source selection applies, otherwise 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Validity {
    pub selected_source: u8,
    pub state: DataState,
    pub if_state: IfState,
}

impl Validity {
    pub const fn new(state: DataState, if_state: IfState) -> Validity {
        Validity {
            selected_source: 0,
            state,
            if_state,
        }
    }

    /// VALID / NORMALOP.
    pub const fn normal_op() -> Validity {
        Validity::new(DataState::Valid, IfState::NormalOp)
    }

    /// LOST / UNFRESH.
    pub const fn unfresh() -> Validity {
        Validity::new(DataState::Lost, IfState::Unfresh)
    }

    /// INIT / NODATA.
    pub const fn init() -> Validity {
        Validity::new(DataState::Init, IfState::NoData)
    }

    /// Store into a parameter buffer at `off`. The layout is byte-positional
    /// (spare, selectedSource, state, ifState) and does not depend on the
    /// target byte order.
    pub fn write(self, buf: &mut [u8], off: usize) {
        buf[off] = 0;
        buf[off + 1] = self.selected_source;
        buf[off + 2] = self.state as u8;
        buf[off + 3] = self.if_state as u8;
    }

    /// Load from a parameter buffer at `off`.
    pub fn read(buf: &[u8], off: usize) -> Validity {
        Validity {
            selected_source: buf[off + 1],
            state: DataState::from_u8(buf[off + 2]),
            if_state: IfState::from_u8(buf[off + 3]),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw config values
// ---------------------------------------------------------------------------

/// A 32-bit configuration value whose interpretation (u32 / i32 / f32) is
/// decided by the converter kind that consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawValue(pub u32);

impl RawValue {
    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }

    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0)
    }

    pub fn from_f32(v: f32) -> RawValue {
        RawValue(v.to_bits())
    }

    pub fn from_i32(v: i32) -> RawValue {
        RawValue(v as u32)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
