//! Output converters: typed parameter slots to raw message bytes.
//!
//! Symmetric to the input matrix but simpler: no default substitution, and
//! output validity is derived later from the dataset functional status. All
//! read-modify-write deposits preserve the surrounding bits of the target
//! word, so independently mapped signals can share a word.

use crate::bytes::{mask32, Endianness};
use crate::config::{InputSignalConfig, ParamMappingConfig};
use crate::types::IfState;

/// A429 SSM patterns for BCD outputs; the sign lives in the SSM.
pub const A429_SSM_BCD_NO_PLUS: u32 = 0x0000_0000;
pub const A429_SSM_BCD_NO_MINUS: u32 = 0x6000_0000;
/// Clears the SSM bits 30:29.
pub const A429_SSM_CLEAR_MASK: u32 = 0x9FFF_FFFF;

const A429_SIGN_BIT: u32 = 1 << 28;

/// Process-wide output converter options fixed at init.
#[derive(Debug, Clone, Copy)]
pub struct OutputCtx {
    pub endianness: Endianness,
    /// Source size of boolean parameters in the output parameter buffer.
    pub bool_is_integer: bool,
}

/// Output conversion kind, as stored in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Write8,
    Write16,
    Write32,
    Write64,
    MultipleBytes,
    Boolean,
    Bitfield32,
    A429BnrFloat,
    A429UbnrFloat,
    A429BnrInt,
    A429UbnrInt,
    A429BcdFloat,
    A429BcdInt,
    ValidityStatus,
}

impl OutputKind {
    pub fn from_u16(v: u16) -> OutputKind {
        match v {
            1 => OutputKind::Write16,
            2 => OutputKind::Write32,
            3 => OutputKind::Write64,
            4 => OutputKind::MultipleBytes,
            5 => OutputKind::Boolean,
            6 => OutputKind::Bitfield32,
            7 => OutputKind::A429BnrFloat,
            8 => OutputKind::A429UbnrFloat,
            9 => OutputKind::A429BnrInt,
            10 => OutputKind::A429UbnrInt,
            11 => OutputKind::A429BcdFloat,
            12 => OutputKind::A429BcdInt,
            13 => OutputKind::ValidityStatus,
            _ => OutputKind::Write8,
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter buffer loads (host order)
// ---------------------------------------------------------------------------

fn get_u16(src: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes([src[off], src[off + 1]])
}

fn get_u32(src: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([src[off], src[off + 1], src[off + 2], src[off + 3]])
}

fn get_u64(src: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&src[off..off + 8]);
    u64::from_ne_bytes(raw)
}

// ---------------------------------------------------------------------------
// Deposits
// ---------------------------------------------------------------------------

/// Deposit `value` into the bitfield `(off_bits, size_bits)` of the 32-bit
/// word at `off_byte`, preserving the other bits.
fn deposit_bitfield(
    out_msg: &mut [u8],
    sig: &InputSignalConfig,
    value: u32,
    te: Endianness,
) {
    let off = sig.off_byte as usize;
    let mask = if sig.size_bits >= 32 {
        u32::MAX
    } else {
        mask32(sig.size_bits) << sig.off_bits
    };
    let data = (value << sig.off_bits) & mask;
    let word = te.read_u32(out_msg, off);
    te.write_u32(out_msg, off, (word & !mask) | data);
}

/// Deposit a BNR field and drive the A429 sign bit (28) from the value sign.
fn deposit_a429_bnr(
    out_msg: &mut [u8],
    sig: &InputSignalConfig,
    ivalue: u32,
    negative: bool,
    signed: bool,
    te: Endianness,
) {
    let off = sig.off_byte as usize;
    let mask = mask32(sig.size_bits);
    let field = (ivalue & mask) << sig.off_bits;

    let mut word = te.read_u32(out_msg, off);
    word &= !(mask << sig.off_bits);
    word |= field;
    if signed {
        if negative {
            word |= A429_SIGN_BIT;
        } else {
            word &= !A429_SIGN_BIT;
        }
    }
    te.write_u32(out_msg, off, word);
}

/// Deposit a BCD field (decimal digits LSB-first, 4 bits each) and set the
/// SSM to plus or minus normal operation.
fn deposit_a429_bcd(
    out_msg: &mut [u8],
    sig: &InputSignalConfig,
    magnitude: u32,
    negative: bool,
    te: Endianness,
) {
    let off = sig.off_byte as usize;

    let mut bcd = 0u32;
    let mut ivalue = magnitude;
    let mut shift = 0u32;
    let mut bits = sig.size_bits as i32;
    while bits > 0 {
        bcd += (ivalue % 10) << shift;
        shift += 4;
        ivalue /= 10;
        bits -= 4;
    }

    let mask = mask32(sig.size_bits);
    let field = (bcd & mask) << sig.off_bits;
    let ssm = if negative {
        A429_SSM_BCD_NO_MINUS
    } else {
        A429_SSM_BCD_NO_PLUS
    };

    let mut word = te.read_u32(out_msg, off);
    word &= !(mask << sig.off_bits);
    word |= field;
    word &= A429_SSM_CLEAR_MASK;
    word |= ssm;
    te.write_u32(out_msg, off, word);
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Run one output conversion from the application's output parameter buffer
/// into the output message buffer.
pub fn convert(
    kind: OutputKind,
    par: &ParamMappingConfig,
    sig: &InputSignalConfig,
    out_param: &[u8],
    out_msg: &mut [u8],
    ctx: &OutputCtx,
) {
    let te = ctx.endianness;
    let off = sig.off_byte as usize;
    let par_off = par.par_offset as usize;

    match kind {
        OutputKind::Write8 => {
            out_msg[off] = out_param[par_off];
        }

        OutputKind::Write16 => {
            te.write_u16(out_msg, off, get_u16(out_param, par_off));
        }

        OutputKind::Write32 => {
            te.write_u32(out_msg, off, get_u32(out_param, par_off));
        }

        OutputKind::Write64 => {
            te.write_u64(out_msg, off, get_u64(out_param, par_off));
        }

        OutputKind::MultipleBytes => {
            let len = sig.size_bits as usize / 8;
            out_msg[off..off + len].copy_from_slice(&out_param[par_off..par_off + len]);
        }

        OutputKind::Boolean => {
            let data = if ctx.bool_is_integer {
                get_u32(out_param, par_off)
            } else {
                out_param[par_off] as u32
            };
            let mask = 1u32 << sig.off_bits;
            let bit = (data << sig.off_bits) & mask;
            let word = te.read_u32(out_msg, off);
            te.write_u32(out_msg, off, (word & !mask) | bit);
        }

        OutputKind::Bitfield32 => {
            deposit_bitfield(out_msg, sig, get_u32(out_param, par_off), te);
        }

        OutputKind::A429BnrFloat => {
            let value = f32::from_bits(get_u32(out_param, par_off));
            let ivalue = (value / sig.lsb_value) as i32 as u32;
            deposit_a429_bnr(out_msg, sig, ivalue, value < 0.0, true, te);
        }

        OutputKind::A429UbnrFloat => {
            let value = f32::from_bits(get_u32(out_param, par_off));
            let ivalue = (value / sig.lsb_value) as i32 as u32;
            deposit_a429_bnr(out_msg, sig, ivalue, false, false, te);
        }

        OutputKind::A429BnrInt => {
            let value = get_u32(out_param, par_off) as i32;
            let ivalue = (value as f32 / sig.lsb_value) as i32 as u32;
            deposit_a429_bnr(out_msg, sig, ivalue, value < 0, true, te);
        }

        OutputKind::A429UbnrInt => {
            let value = get_u32(out_param, par_off) as i32;
            let ivalue = (value as f32 / sig.lsb_value) as i32 as u32;
            deposit_a429_bnr(out_msg, sig, ivalue, false, false, te);
        }

        OutputKind::A429BcdFloat => {
            let value = f32::from_bits(get_u32(out_param, par_off));
            let magnitude = (value.abs() / sig.lsb_value) as u32;
            deposit_a429_bcd(out_msg, sig, magnitude, value < 0.0, te);
        }

        OutputKind::A429BcdInt => {
            let value = get_u32(out_param, par_off) as i32;
            let magnitude = (value.unsigned_abs() as f32 / sig.lsb_value) as u32;
            deposit_a429_bcd(out_msg, sig, magnitude, value < 0, te);
        }

        OutputKind::ValidityStatus => {
            // The application stores the interface state as a plain word in
            // the output buffer's validity slot; NORMALOP maps to 1.
            let status = get_u32(out_param, par.val_offset as usize);
            let bit = (status == IfState::NormalOp as u32) as u32;
            deposit_bitfield(out_msg, sig, bit, te);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
