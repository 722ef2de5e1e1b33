//! ARINC-653 CRC-32 and freshness-counter checks for AFDX messages.
//!
//! Polynomial `0x04C11DB7`, init `0xFFFFFFFF`, final XOR `0xFFFFFFFF`,
//! MSB-first, via a 256-entry lookup table. The CRC covers payload bytes
//! `[0, crcOffset)` and sits behind a functional-status gate: the FS byte at
//! `crcFsbOffset` must read Normal Operation before the CRC is even computed.
//!
//! The freshness counter (FC) is a 16-bit wrapping counter. A received value
//! is accepted inside the window `[prev+1, prev+1+ceil(invalidTime/refreshPeriod)]`
//! (mod 2^16); acceptance advances the stored counter to the window's lower
//! bound, rejection stores the received value so a single further message
//! recovers the link.

use crate::bytes::Endianness;
use crate::config::AfdxMessageInfo;
use crate::types::{A664_FS_FT, A664_FS_NO};

const POLYNOMIAL: u32 = 0x04C1_1DB7;
const CRC32_INIT: u32 = 0xFFFF_FFFF;
const CRC32_FINISH: u32 = 0xFFFF_FFFF;

// ---------------------------------------------------------------------------
// CRC lookup table (compile-time)
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

/// CRC-32 over `data` with the ARINC-653 parameters.
fn crc32(data: &[u8]) -> u32 {
    let mut crc = CRC32_INIT;
    for &byte in data {
        let k = ((crc >> 24) ^ byte as u32) & 0xFF;
        crc = (crc << 8) ^ CRC_TABLE[k as usize];
    }
    crc ^ CRC32_FINISH
}

// ---------------------------------------------------------------------------
// Message CRC
// ---------------------------------------------------------------------------

/// Validate the CRC of a received payload. `crcOffset == 0` means the message
/// carries no CRC and the check passes. A functional status other than NO at
/// `crcFsbOffset` fails the check without computing anything.
pub fn check_crc(data: &[u8], info: &AfdxMessageInfo, te: Endianness) -> bool {
    if info.crc_offset == 0 {
        return true;
    }
    if data[info.crc_fsb_offset as usize] != A664_FS_NO {
        return false;
    }
    let expected = te.read_u32(data, info.crc_offset as usize);
    crc32(&data[..info.crc_offset as usize]) == expected
}

/// Compute and store the CRC of an outgoing payload, setting its functional
/// status byte to NO first (the FS is inside the covered range).
pub fn set_crc(data: &mut [u8], info: &AfdxMessageInfo, te: Endianness) {
    if info.crc_offset == 0 {
        return;
    }
    data[info.crc_fsb_offset as usize] = A664_FS_NO;
    let crc = crc32(&data[..info.crc_offset as usize]);
    te.write_u32(data, info.crc_offset as usize, crc);
}

// ---------------------------------------------------------------------------
// Freshness counter
// ---------------------------------------------------------------------------

/// Acceptance window width: how many transmit periods fit in the invalid
/// confirmation time, rounded up.
fn fc_window(info: &AfdxMessageInfo) -> u16 {
    let period = info.refresh_period.max(1) as f32;
    (info.invalid_time as f32 / period + 0.99) as u16
}

/// Validate the freshness counter of a received payload against the previous
/// value, updating `fc_prev`. `fcOffset == 0` disables the check.
pub fn check_fc(data: &[u8], info: &AfdxMessageInfo, fc_prev: &mut u16, te: Endianness) -> bool {
    if info.fc_offset == 0 {
        return true;
    }
    let fsb = data[info.fc_fsb_offset as usize];
    if fsb != A664_FS_NO && fsb != A664_FS_FT {
        return false;
    }

    let received = te.read_u16(data, info.fc_offset as usize);
    let fc_min = fc_prev.wrapping_add(1);

    if received.wrapping_sub(fc_min) <= fc_window(info) {
        *fc_prev = fc_min;
        true
    } else {
        let first_seen = *fc_prev == 0;
        // Store the received value either way: permits startup and recovery
        // after a single further message loss.
        *fc_prev = received;
        first_seen
    }
}

/// Increment and store the freshness counter of an outgoing payload.
pub fn set_fc(data: &mut [u8], info: &AfdxMessageInfo, fc_prev: &mut u16, te: Endianness) {
    if info.fc_offset == 0 {
        return;
    }
    let next = fc_prev.wrapping_add(1);
    *fc_prev = next;
    data[info.fc_fsb_offset as usize] = A664_FS_NO;
    te.write_u16(data, info.fc_offset as usize, next);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_info(crc_offset: u32, fc_offset: u32) -> AfdxMessageInfo {
        AfdxMessageInfo {
            message_id: 1,
            message_length: 32,
            queue_length: 0,
            refresh_period: 16,
            valid_time: 32,
            invalid_time: 64,
            message_hdr_offset: 0,
            port_name_offset: 0,
            crc_fsb_offset: 4,
            crc_offset,
            fc_fsb_offset: 8,
            fc_offset,
            sched_offset: 0,
            sched_rate: 0,
        }
    }

    #[test]
    fn test_crc_table_known_entries() {
        // First entries of the ARINC-653 table.
        assert_eq!(CRC_TABLE[0], 0x0000_0000);
        assert_eq!(CRC_TABLE[1], 0x04C1_1DB7);
        assert_eq!(CRC_TABLE[2], 0x0982_3B6E);
        assert_eq!(CRC_TABLE[255], 0xB1F7_40B4);
    }

    #[test]
    fn test_set_then_check_crc() {
        let te = Endianness::native();
        let mut data = vec![0u8; 32];
        data[0] = 0xAB;
        data[15] = 0x42;
        let info = msg_info(24, 0);

        set_crc(&mut data, &info, te);
        assert_eq!(data[4], A664_FS_NO);
        assert!(check_crc(&data, &info, te));

        // One flipped payload bit fails.
        data[1] ^= 0x01;
        assert!(!check_crc(&data, &info, te));
    }

    #[test]
    fn test_crc_requires_normal_op_fs() {
        let te = Endianness::native();
        let mut data = vec![0u8; 32];
        let info = msg_info(24, 0);
        set_crc(&mut data, &info, te);
        data[4] = 0x30; // NCD
        assert!(!check_crc(&data, &info, te));
    }

    #[test]
    fn test_crc_unconfigured_passes() {
        let te = Endianness::native();
        let data = vec![0u8; 32];
        assert!(check_crc(&data, &msg_info(0, 0), te));
    }

    #[test]
    fn test_set_then_check_fc() {
        let te = Endianness::native();
        let info = msg_info(0, 12);
        let mut data = vec![0u8; 32];

        let mut tx_prev = 0u16;
        let mut rx_prev = 0u16;

        for _ in 0..5 {
            set_fc(&mut data, &info, &mut tx_prev, te);
            assert!(check_fc(&data, &info, &mut rx_prev, te));
        }
    }

    #[test]
    fn test_fc_window_and_recovery() {
        let te = Endianness::native();
        let info = msg_info(0, 12); // window = ceil(64/16) = 4
        let mut data = vec![0u8; 32];
        data[8] = A664_FS_NO;

        // Established at 10.
        let mut prev = 10u16;
        te.write_u16(&mut data, 12, 14);
        assert!(check_fc(&data, &info, &mut prev, te)); // 14 <= 11+3
        assert_eq!(prev, 11); // advanced to window lower bound

        // Far jump rejected, but the received value is stored.
        te.write_u16(&mut data, 12, 500);
        assert!(!check_fc(&data, &info, &mut prev, te));
        assert_eq!(prev, 500);

        // The very next message is in window again.
        te.write_u16(&mut data, 12, 501);
        assert!(check_fc(&data, &info, &mut prev, te));
    }

    #[test]
    fn test_fc_first_seen_accepted() {
        let te = Endianness::native();
        let info = msg_info(0, 12);
        let mut data = vec![0u8; 32];
        data[8] = A664_FS_NO;
        te.write_u16(&mut data, 12, 4711);

        let mut prev = 0u16;
        assert!(check_fc(&data, &info, &mut prev, te));
        assert_eq!(prev, 4711);
    }

    #[test]
    fn test_fc_wraparound() {
        let te = Endianness::native();
        let info = msg_info(0, 12);
        let mut data = vec![0u8; 32];
        data[8] = A664_FS_NO;

        let mut prev = u16::MAX;
        te.write_u16(&mut data, 12, 1); // prev+1 = 0, window covers 0..=4
        assert!(check_fc(&data, &info, &mut prev, te));
    }

    #[test]
    fn test_fc_bad_fs_rejected() {
        let te = Endianness::native();
        let info = msg_info(0, 12);
        let mut data = vec![0u8; 32];
        data[8] = 0x30; // NCD
        let mut prev = 3u16;
        te.write_u16(&mut data, 12, 4);
        assert!(!check_fc(&data, &info, &mut prev, te));
    }
}
