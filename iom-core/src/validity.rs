//! The multi-condition validity evaluator.
//!
//! Fourteen condition kinds, each mapping a location in the input message
//! buffer to a [`Validity`]: message freshness, A664 functional status, the
//! three A429 SSM interpretations, bitfield equality, four range checks, and
//! the freshness+FS(+SSM) composites. Composites carry all their byte
//! offsets in one condition config (`offset` = freshness, `offset2` = FS,
//! `offset3` = SSM) so a single call locates everything without re-indexing.

use crate::bytes::{host_read_u32, is_valid_f32, mask32, Endianness};
use crate::config::{ValidityConditionConfig, ValidityConfig};
use crate::types::{
    DataState, IfState, Validity, A664_FS_FT, A664_FS_NCD, A664_FS_NO, MSG_FRESH,
};

/// Validity condition kind, as stored in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Freshness,
    A664Fs,
    SsmBnr,
    SsmBcd,
    SsmDis,
    ValidityValue,
    RangeInt,
    RangeUint,
    RangeFloat,
    RangeFloatBnr,
    FreshFs,
    FreshFsSsmBnr,
    FreshFsSsmBcd,
    FreshFsSsmDis,
}

impl ConditionKind {
    pub fn from_u8(v: u8) -> ConditionKind {
        match v {
            1 => ConditionKind::A664Fs,
            2 => ConditionKind::SsmBnr,
            3 => ConditionKind::SsmBcd,
            4 => ConditionKind::SsmDis,
            5 => ConditionKind::ValidityValue,
            6 => ConditionKind::RangeInt,
            7 => ConditionKind::RangeUint,
            8 => ConditionKind::RangeFloat,
            9 => ConditionKind::RangeFloatBnr,
            10 => ConditionKind::FreshFs,
            11 => ConditionKind::FreshFsSsmBnr,
            12 => ConditionKind::FreshFsSsmBcd,
            13 => ConditionKind::FreshFsSsmDis,
            _ => ConditionKind::Freshness,
        }
    }
}

/// Evaluate one condition against the input message buffer.
pub fn evaluate(
    kind: ConditionKind,
    msg: &[u8],
    cfg: &ValidityConditionConfig,
    te: Endianness,
) -> Validity {
    match kind {
        ConditionKind::Freshness => check_freshness(msg, cfg),
        ConditionKind::A664Fs => a664_fs(msg[cfg.offset as usize]),
        ConditionKind::SsmBnr => ssm_bnr(ssm_field(msg, cfg.offset as usize, te)),
        ConditionKind::SsmBcd => ssm_bcd(ssm_field(msg, cfg.offset as usize, te)),
        ConditionKind::SsmDis => ssm_dis(ssm_field(msg, cfg.offset as usize, te)),
        ConditionKind::ValidityValue => check_validity_value(msg, cfg, te),
        ConditionKind::RangeInt => check_range_int(msg, cfg, te),
        ConditionKind::RangeUint => check_range_uint(msg, cfg, te),
        ConditionKind::RangeFloat => check_range_float(msg, cfg, te),
        ConditionKind::RangeFloatBnr => check_range_float_bnr(msg, cfg, te),
        ConditionKind::FreshFs => check_fresh_fs(msg, cfg, None, te),
        ConditionKind::FreshFsSsmBnr => check_fresh_fs(msg, cfg, Some(ssm_bnr as SsmFn), te),
        ConditionKind::FreshFsSsmBcd => check_fresh_fs(msg, cfg, Some(ssm_bcd as SsmFn), te),
        ConditionKind::FreshFsSsmDis => check_fresh_fs(msg, cfg, Some(ssm_dis as SsmFn), te),
    }
}

/// Worst-of combination across a source's configured conditions.
///
/// LOST outranks INVALID; among VALID results a TEST downgrades a NORMALOP.
pub fn check_source_validity(msg: &[u8], logic: &ValidityConfig, te: Endianness) -> Validity {
    let mut result = Validity::init();

    for i in 0..logic.num_conditions as usize {
        let kind = ConditionKind::from_u8(logic.condition_kind[i]);
        let cond = evaluate(kind, msg, &logic.condition[i], te);

        match cond.state {
            DataState::Valid => {
                if result.state == DataState::Init {
                    result = cond;
                } else if result.if_state == IfState::NormalOp && cond.if_state == IfState::Test {
                    result = cond;
                }
            }
            DataState::Lost => {
                result = cond;
            }
            _ => {
                if result.state != DataState::Lost {
                    result = cond;
                }
            }
        }
    }

    result
}

// ---------------------------------------------------------------------------
// Individual conditions
// ---------------------------------------------------------------------------

fn check_freshness(msg: &[u8], cfg: &ValidityConditionConfig) -> Validity {
    // Freshness is written by the driver, host order.
    if host_read_u32(msg, cfg.offset as usize) == MSG_FRESH {
        Validity::normal_op()
    } else {
        Validity::unfresh()
    }
}

/// Map an A664 functional status byte.
pub fn a664_fs(fs: u8) -> Validity {
    match fs {
        A664_FS_NO => Validity::new(DataState::Valid, IfState::NormalOp),
        A664_FS_FT => Validity::new(DataState::Valid, IfState::Test),
        A664_FS_NCD => Validity::new(DataState::Invalid, IfState::Ncd),
        _ => Validity::new(DataState::Invalid, IfState::NoData),
    }
}

/// SSM bits 30:29 of a big-endian A429 word.
fn ssm_field(msg: &[u8], offset: usize, te: Endianness) -> u32 {
    (te.read_u32(msg, offset) >> 29) & 3
}

type SsmFn = fn(u32) -> Validity;

/// BNR SSM: 00=FW, 01=NCD, 10=FT, 11=NO.
pub fn ssm_bnr(ssm: u32) -> Validity {
    match ssm {
        2 => Validity::new(DataState::Valid, IfState::Test),
        3 => Validity::new(DataState::Valid, IfState::NormalOp),
        1 => Validity::new(DataState::Invalid, IfState::Ncd),
        _ => Validity::new(DataState::Invalid, IfState::NoData),
    }
}

/// BCD SSM: 00=plus and 11=minus are both normal operation.
pub fn ssm_bcd(ssm: u32) -> Validity {
    match ssm {
        0 | 3 => Validity::new(DataState::Valid, IfState::NormalOp),
        2 => Validity::new(DataState::Valid, IfState::Test),
        _ => Validity::new(DataState::Invalid, IfState::Ncd),
    }
}

/// Discrete SSM: 00=NO, 01=NCD, 10=FT, 11=FW.
pub fn ssm_dis(ssm: u32) -> Validity {
    match ssm {
        0 => Validity::new(DataState::Valid, IfState::NormalOp),
        2 => Validity::new(DataState::Valid, IfState::Test),
        1 => Validity::new(DataState::Invalid, IfState::Ncd),
        _ => Validity::new(DataState::Invalid, IfState::NoData),
    }
}

/// Extract the checked bitfield honouring the configured access width.
fn bitfield(msg: &[u8], cfg: &ValidityConditionConfig, te: Endianness) -> u32 {
    let off = cfg.offset as usize;
    let raw = match cfg.access {
        4 => te.read_u32(msg, off),
        2 => te.read_u16(msg, off) as u32,
        _ => msg[off] as u32,
    };
    (raw >> cfg.off_bits) & mask32(cfg.size_bits)
}

fn check_validity_value(msg: &[u8], cfg: &ValidityConditionConfig, te: Endianness) -> Validity {
    if bitfield(msg, cfg, te) == cfg.min_value.as_u32() {
        Validity::new(DataState::Valid, IfState::NormalOp)
    } else {
        Validity::new(DataState::Invalid, IfState::NoData)
    }
}

fn out_of_range() -> Validity {
    Validity::new(DataState::Invalid, IfState::OutOfRange)
}

fn check_range_int(msg: &[u8], cfg: &ValidityConditionConfig, te: Endianness) -> Validity {
    let bits = cfg.size_bits;
    let mut data = bitfield(msg, cfg, te);

    // Sign-extend from the configured width.
    if bits >= 1 && bits < 32 && data & (1u32 << (bits - 1)) != 0 {
        data |= !mask32(bits);
    }

    let scaled = (data as i32 as f32 * cfg.lsb_value) as i32;
    if scaled >= cfg.min_value.as_i32() && scaled <= cfg.max_value.as_i32() {
        Validity::new(DataState::Valid, IfState::NormalOp)
    } else {
        out_of_range()
    }
}

fn check_range_uint(msg: &[u8], cfg: &ValidityConditionConfig, te: Endianness) -> Validity {
    let data = bitfield(msg, cfg, te);

    // Clamp check before the cast back to u32.
    let scaled_wide = data as f32 * cfg.lsb_value;
    if scaled_wide > u32::MAX as f32 {
        return out_of_range();
    }

    let scaled = scaled_wide as u32;
    if scaled >= cfg.min_value.as_u32() && scaled <= cfg.max_value.as_u32() {
        Validity::new(DataState::Valid, IfState::NormalOp)
    } else {
        out_of_range()
    }
}

fn check_range_float(msg: &[u8], cfg: &ValidityConditionConfig, te: Endianness) -> Validity {
    let bits = te.read_u32(msg, cfg.offset as usize);
    if !is_valid_f32(bits) {
        return out_of_range();
    }
    let value = f32::from_bits(bits) * cfg.lsb_value;
    if value >= cfg.min_value.as_f32() && value <= cfg.max_value.as_f32() {
        Validity::new(DataState::Valid, IfState::NormalOp)
    } else {
        out_of_range()
    }
}

/// Decode an A429 BNR field to a scaled float and range-check it.
fn check_range_float_bnr(msg: &[u8], cfg: &ValidityConditionConfig, te: Endianness) -> Validity {
    let word = te.read_u32(msg, cfg.offset as usize);
    let mut ivalue = ((word & 0x1FFF_FFFF) >> cfg.off_bits) & mask32(cfg.size_bits);

    if (word >> 28) & 1 == 1 {
        // Sign bit 28 set: extend. sizeBits may include the sign bit itself.
        ivalue |= !mask32(cfg.size_bits);
    }

    let value = ivalue as i32 as f32 * cfg.lsb_value;
    if value >= cfg.min_value.as_f32() && value <= cfg.max_value.as_f32() {
        Validity::new(DataState::Valid, IfState::NormalOp)
    } else {
        out_of_range()
    }
}

/// Composite freshness + FS (+ optional SSM). Unfresh short-circuits; an FT
/// functional status downgrades an otherwise normal SSM to TEST.
fn check_fresh_fs(
    msg: &[u8],
    cfg: &ValidityConditionConfig,
    ssm: Option<SsmFn>,
    te: Endianness,
) -> Validity {
    if host_read_u32(msg, cfg.offset as usize) != MSG_FRESH {
        return Validity::unfresh();
    }

    let fs = msg[cfg.offset2 as usize];
    match fs {
        A664_FS_NO | A664_FS_FT => {
            let mut validity = match ssm {
                Some(get) => get(ssm_field(msg, cfg.offset3 as usize, te)),
                None => a664_fs(fs),
            };
            if ssm.is_some() && fs == A664_FS_FT && validity.if_state == IfState::NormalOp {
                validity.if_state = IfState::Test;
            }
            validity
        }
        A664_FS_NCD => Validity::new(DataState::Invalid, IfState::Ncd),
        _ => Validity::new(DataState::Invalid, IfState::NoData),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
