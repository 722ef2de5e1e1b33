//! End-to-end cycle scenarios over the in-memory APEX fabric: build a
//! configuration blob, run the manager, inject bus traffic, and observe the
//! application parameter buffer and the transmitted messages.

use iom_core::bytes::Endianness;
use iom_core::config::build::*;
use iom_core::config::{
    AfdxMessageInfo, CanMessageConfig, Config, InputSignalConfig, ParamMappingConfig,
    ValidityConditionConfig, ValidityConfig, ValidityConfigCan, OUTPUT_DS_EMBEDDED_A429,
};
use iom_core::types::{DataState, IfState, Validity};
use iom_partition::a429::A429RoutingEntry;
use iom_partition::can::{CanFrame, CanRoutingEntry, CAN_FRAME_SIZE};
use iom_partition::{IoManager, IoManagerOptions, MemApex, RoutedPortKind};

const APP_PERIOD_NS: u64 = 16_500_000;

fn te() -> Endianness {
    Endianness::native()
}

fn options() -> IoManagerOptions {
    IoManagerOptions {
        afdx_header_extra_padding: 0, // IMA platform: no extra pad, header is 32 bytes
        ..IoManagerOptions::default()
    }
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

// ---------------------------------------------------------------------------
// Scenario 1: AFDX single source, NO functional status
// ---------------------------------------------------------------------------

/// 16-byte sampling message, FS byte 0x03 at payload offset 4, 32-bit
/// big-endian value at payload offset 8, windows 32/64 ms.
fn afdx_single_source_blob() -> Vec<u8> {
    let header_len = 32u32;
    let mut b = ConfigBuilder::new();
    b.afdx_input(
        AfdxMessageInfo {
            message_id: 1,
            message_length: 16,
            queue_length: 0,
            refresh_period: 16,
            valid_time: 32,
            invalid_time: 64,
            message_hdr_offset: 0,
            ..Default::default()
        },
        "AFDX_ALT",
    );
    b.dataset_single(DatasetDef {
        sources: vec![ValidityConfig {
            num_conditions: 1,
            source_set: 0,
            condition_kind: [10, 0, 0, 0], // FRESH_FS
            condition: [
                ValidityConditionConfig {
                    offset: 0,                 // freshness word in the in-band header
                    offset2: header_len + 4,   // FS byte
                    ..Default::default()
                },
                ValidityConditionConfig::default(),
                ValidityConditionConfig::default(),
                ValidityConditionConfig::default(),
            ],
        }],
        params: vec![ParamDef {
            mapping: ParamMappingConfig {
                par_offset: 0,
                val_offset: 4,
                par_size: 32,
                num_sources: 1,
                ..Default::default()
            },
            signals: vec![InputSignalConfig {
                off_byte: header_len + 8,
                size_bits: 32,
                kind: 0, // UINT32
                lsb_value: 1.0,
                par_offset: 0,
                val_offset: 4,
                ..Default::default()
            }],
        }],
    });
    b.finish()
}

fn afdx_payload(value: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 16];
    payload[4] = 0x03; // FS NO
    te().write_u32(&mut payload, 8, value);
    payload
}

#[test]
fn test_afdx_single_source_normal_op_then_unfresh() {
    let blob = afdx_single_source_blob();
    let cfg = Config::parse(&blob).unwrap();
    let mut apex = MemApex::new();
    let mut iom = IoManager::init(cfg, APP_PERIOD_NS, &mut apex, &[], &[], options());

    // Two cycles of fresh data.
    for _ in 0..2 {
        apex.inject_sampling("AFDX_ALT", &afdx_payload(0x0000_0010));
        iom.step(&mut apex, &[]);
    }

    assert_eq!(get_u32(iom.input_params(), 0), 16);
    let v = Validity::read(iom.input_params(), 4);
    assert_eq!(v.selected_source, 1);
    assert_eq!(v.state, DataState::Valid);
    assert_eq!(v.if_state, IfState::NormalOp);

    // Traffic stops: the value is retained, only the validity advances.
    for _ in 0..8 {
        iom.step(&mut apex, &[]);
    }
    assert_eq!(get_u32(iom.input_params(), 0), 16);
    let v = Validity::read(iom.input_params(), 4);
    assert_eq!(v.if_state, IfState::Unfresh);
    assert_eq!(v.selected_source, 1);
}

// ---------------------------------------------------------------------------
// Scenarios 3 and 6: CAN dual bus and duplicate suppression
// ---------------------------------------------------------------------------

fn can_routing() -> Vec<CanRoutingEntry> {
    let port = |kind, name: &str| CanRoutingEntry {
        kind,
        can_id: 0,
        port_name: name.into(),
        queue_length: 8,
    };
    vec![
        port(RoutedPortKind::RxA, "CAN_RX_A"),
        port(RoutedPortKind::RxB, "CAN_RX_B"),
        port(RoutedPortKind::TxA, "CAN_TX_A"),
        port(RoutedPortKind::TxB, "CAN_TX_B"),
        CanRoutingEntry::terminator(),
    ]
}

/// One logical CAN message on two RCIs. `data[1]` is mapped as a byte
/// parameter; `data[6]` (the heartbeat byte, which the duplicate filter
/// ignores) feeds an INT8_ADD accumulator, so a processed frame is
/// distinguishable from a suppressed one.
fn can_dual_source_blob() -> Vec<u8> {
    let value_map = || CanInMapDef {
        mapping: ParamMappingConfig {
            par_offset: 0,
            val_offset: 4,
            par_size: 32,
            num_sources: 1,
            ..Default::default()
        },
        signal: InputSignalConfig {
            off_byte: 1,
            size_bits: 8,
            kind: 18, // UINT8
            lsb_value: 1.0,
            par_offset: 0,
            val_offset: 4,
            ..Default::default()
        },
        validity: ValidityConfigCan::default(),
    };
    let count_map = || CanInMapDef {
        mapping: ParamMappingConfig {
            par_offset: 16,
            val_offset: 20,
            par_size: 32,
            num_sources: 1,
            ..Default::default()
        },
        signal: InputSignalConfig {
            off_byte: 6,
            size_bits: 8,
            kind: 20, // INT8_ADD
            lsb_value: 1.0,
            par_offset: 16,
            val_offset: 20,
            ..Default::default()
        },
        validity: ValidityConfigCan::default(),
    };
    let mut b = ConfigBuilder::new();
    for can_id in [0x0848_2004u32, 0x0848_2005] {
        b.can_input(CanInMsgDef {
            config: CanMessageConfig {
                message_id: 1,
                can_id,
                fresh_time: 32,
                unfresh_time: 64,
                message_length: 8,
                ..Default::default()
            },
            maps: vec![value_map(), count_map()],
        });
    }
    b.finish()
}

fn inject_frame(apex: &mut MemApex, bus: &str, can_id: u32, data: [u8; 8]) {
    let frame = CanFrame {
        can_id,
        nbytes: 8,
        msg_type: 0,
        data,
    };
    let mut bytes = [0u8; CAN_FRAME_SIZE];
    frame.encode(&mut bytes, te());
    apex.inject_queuing(bus, &bytes);
}

#[test]
fn test_can_bus_switch_after_timeout() {
    let blob = can_dual_source_blob();
    let cfg = Config::parse(&blob).unwrap();
    let mut apex = MemApex::new();
    let mut iom = IoManager::init(cfg, APP_PERIOD_NS, &mut apex, &can_routing(), &[], options());

    // Establish bus A (RCI 0).
    inject_frame(&mut apex, "CAN_RX_A", 0x0848_2004, [0, 0xAA, 0, 0, 0, 0, 0, 0]);
    iom.step(&mut apex, &[]);
    assert_eq!(iom.input_params()[0], 0xAA);

    // Bus A dies; frames keep arriving on bus B (RCI 1). The switch waits
    // out bus A's freshness window.
    let mut switch_cycle = None;
    for cycle in 0..10 {
        inject_frame(&mut apex, "CAN_RX_B", 0x0848_2005, [0, 0xBB, 0, 0, 0, 0, 0, 0]);
        iom.step(&mut apex, &[]);
        if iom.input_params()[0] == 0xBB && switch_cycle.is_none() {
            switch_cycle = Some(cycle);
        }
    }
    let switch_cycle = switch_cycle.expect("never switched to bus B");
    // unfreshTime 64 ms at 16.5 ms is a 5-cycle window.
    assert!(switch_cycle >= 3, "switched too early (cycle {switch_cycle})");

    // With the selection now on B, further B frames are current data.
    inject_frame(&mut apex, "CAN_RX_B", 0x0848_2005, [0, 0xBC, 0, 0, 0, 0, 0, 0]);
    iom.step(&mut apex, &[]);
    assert_eq!(iom.input_params()[0], 0xBC);
    let v = Validity::read(iom.input_params(), 4);
    assert_eq!(v.if_state, IfState::NormalOp);
}

#[test]
fn test_can_duplicate_suppression_keeps_freshness() {
    let blob = can_dual_source_blob();
    let cfg = Config::parse(&blob).unwrap();
    let mut apex = MemApex::new();
    let mut iom = IoManager::init(cfg, APP_PERIOD_NS, &mut apex, &can_routing(), &[], options());

    // Two live frames: the second goes all-zero, which is a payload change
    // and is still processed (the heartbeat accumulator sees data[6]).
    inject_frame(&mut apex, "CAN_RX_A", 0x0848_2004, [0, 0x11, 0, 0, 0, 1, 5, 0]);
    iom.step(&mut apex, &[]);
    assert_eq!(iom.input_params()[0], 0x11);
    assert_eq!(get_u32(iom.input_params(), 16), 5);

    inject_frame(&mut apex, "CAN_RX_A", 0x0848_2004, [0, 0, 0, 0, 0, 2, 5, 0]);
    iom.step(&mut apex, &[]);
    assert_eq!(get_u32(iom.input_params(), 16), 5);

    // Unchanged all-zero payload with rolling heartbeat/validity bytes:
    // suppressed — the accumulator stays at its per-cycle reset value — but
    // the message stays fresh.
    for h in 0..8u8 {
        inject_frame(&mut apex, "CAN_RX_A", 0x0848_2004, [0, 0, 0, 0, 0, h, 7, 0]);
        iom.step(&mut apex, &[]);
        assert_eq!(
            get_u32(iom.input_params(), 16),
            0,
            "suppressed frame was decoded"
        );
    }
    let v = Validity::read(iom.input_params(), 4);
    assert_eq!(v.if_state, IfState::NormalOp, "freshness was not maintained");
}

#[test]
fn test_can_silence_invalidates_parameters() {
    let blob = can_dual_source_blob();
    let cfg = Config::parse(&blob).unwrap();
    let mut apex = MemApex::new();
    let mut iom = IoManager::init(cfg, APP_PERIOD_NS, &mut apex, &can_routing(), &[], options());

    inject_frame(&mut apex, "CAN_RX_A", 0x0848_2004, [0, 0x77, 0, 0, 0, 0, 0, 0]);
    iom.step(&mut apex, &[]);
    assert_eq!(iom.input_params()[0], 0x77);

    for _ in 0..8 {
        iom.step(&mut apex, &[]);
    }
    let v = Validity::read(iom.input_params(), 4);
    assert_eq!(v.state, DataState::Lost);
    assert_eq!(v.if_state, IfState::Unfresh);
    // Stale data is marked, not overwritten.
    assert_eq!(iom.input_params()[0], 0x77);
}

// ---------------------------------------------------------------------------
// Output datasets: FS fold and embedded A429
// ---------------------------------------------------------------------------

/// Output message with one embedded A429 dataset of two parameters; the
/// application provides values and plain interface-state validity words.
fn afdx_output_blob() -> Vec<u8> {
    let mut b = ConfigBuilder::new();
    b.afdx_output(
        AfdxMessageInfo {
            message_id: 9,
            message_length: 32,
            queue_length: 0,
            refresh_period: 16,
            message_hdr_offset: 0,
            ..Default::default()
        },
        "AFDX_OUT",
    );
    b.output_dataset(OutputDatasetDef {
        kind: OUTPUT_DS_EMBEDDED_A429,
        fs_offset: 4,
        ds_offset: 8,
        a429_label_id_sdi: 0x0000_01B9,
        a429_ssm_type: 1, // BNR
        maps: vec![
            (
                ParamMappingConfig {
                    par_offset: 0,
                    val_offset: 4,
                    par_size: 32,
                    num_sources: 1,
                    ..Default::default()
                },
                InputSignalConfig {
                    off_byte: 8,
                    size_bits: 15,
                    off_bits: 13,
                    kind: 9, // A429 BNR from integer
                    lsb_value: 1.0,
                    ..Default::default()
                },
            ),
            (
                ParamMappingConfig {
                    par_offset: 8,
                    val_offset: 12,
                    par_size: 32,
                    num_sources: 1,
                    ..Default::default()
                },
                InputSignalConfig {
                    off_byte: 16,
                    size_bits: 32,
                    kind: 2, // 32-bit write
                    lsb_value: 1.0,
                    ..Default::default()
                },
            ),
        ],
    });
    b.finish()
}

#[test]
fn test_output_dataset_fs_and_ssm() {
    let blob = afdx_output_blob();
    let cfg = Config::parse(&blob).unwrap();
    let mut apex = MemApex::new();
    let mut iom = IoManager::init(cfg, APP_PERIOD_NS, &mut apex, &[], &[], options());

    // Application buffer: value 100 NORMALOP, value 7 NCD.
    let mut out_param = vec![0u8; 32];
    out_param[0..4].copy_from_slice(&100u32.to_ne_bytes());
    out_param[4..8].copy_from_slice(&(IfState::NormalOp as u32).to_ne_bytes());
    out_param[8..12].copy_from_slice(&7u32.to_ne_bytes());
    out_param[12..16].copy_from_slice(&(IfState::Ncd as u32).to_ne_bytes());

    iom.step(&mut apex, &out_param);
    let sent = apex.sample("AFDX_OUT").expect("no message emitted").to_vec();

    // Dataset FS is the worst of its parameters: NCD (P8).
    assert_eq!(sent[4], 0x30);

    let word = te().read_u32(&sent, 8);
    assert_eq!(word & 0xFF, 0xB9); // label survives the deposits
    assert_eq!((word >> 13) & 0x7FFF, 100); // BNR field
    assert_eq!(word & 0x6000_0000, 0x2000_0000); // SSM NCD
    assert_eq!(te().read_u32(&sent, 16), 7);

    // All parameters healthy: FS NO, SSM NO.
    out_param[12..16].copy_from_slice(&(IfState::NormalOp as u32).to_ne_bytes());
    iom.step(&mut apex, &out_param);
    let sent = apex.sample("AFDX_OUT").unwrap().to_vec();
    assert_eq!(sent[4], 0x03);
    assert_eq!(te().read_u32(&sent, 8) & 0x6000_0000, 0x6000_0000);
}

// ---------------------------------------------------------------------------
// A429 input through the full pipeline
// ---------------------------------------------------------------------------

fn a429_blob() -> Vec<u8> {
    use iom_core::config::{A429MessageInfo, A429PortInfo};

    let slot = (0xB9 * 4 + 1) * 8; // label 0xB9, SDI 1
    let mut b = ConfigBuilder::new();
    b.a429_port(
        A429PortInfo {
            port_id: 0,
            message_length: 4,
            queue_length: 16,
            message_offset: 0,
            port_name_offset: 0,
        },
        "A429_RX_1",
    );
    b.a429_message(A429MessageInfo {
        code: 0xB9,
        sdi: 1,
        port: 0,
        valid_time: 32,
        invalid_time: 64,
    });
    b.dataset_single(DatasetDef {
        sources: vec![ValidityConfig {
            num_conditions: 2,
            source_set: 0,
            condition_kind: [0, 2, 0, 0], // FRESHNESS + SSM_BNR
            condition: [
                ValidityConditionConfig {
                    offset: slot as u32,
                    ..Default::default()
                },
                ValidityConditionConfig {
                    offset: slot as u32 + 4,
                    ..Default::default()
                },
                ValidityConditionConfig::default(),
                ValidityConditionConfig::default(),
            ],
        }],
        params: vec![ParamDef {
            mapping: ParamMappingConfig {
                par_offset: 0,
                val_offset: 4,
                par_size: 32,
                num_sources: 1,
                ..Default::default()
            },
            signals: vec![InputSignalConfig {
                msg_idx: 0,
                transport: 1, // A429
                off_byte: slot as u32 + 4,
                size_bits: 18,
                off_bits: 10,
                kind: 8, // A429 BNR to float
                lsb_value: 0.01,
                par_offset: 0,
                val_offset: 4,
                ..Default::default()
            }],
        }],
    });
    b.finish()
}

#[test]
fn test_a429_bnr_label_decodes_to_application() {
    let blob = a429_blob();
    let cfg = Config::parse(&blob).unwrap();
    let mut apex = MemApex::new();
    let routing = vec![
        A429RoutingEntry {
            kind: RoutedPortKind::RxA,
            port_index: 0,
            port_name: "A429_RX_1".into(),
            queue_length: 16,
            transport_port_index: None,
        },
        A429RoutingEntry::terminator(),
    ];
    let mut iom = IoManager::init(cfg, APP_PERIOD_NS, &mut apex, &[], &routing, options());

    // SSM NO, sign bit set, 18-bit data field encoding -64 lsb, label 0xB9,
    // SDI 1: decodes to -0.64.
    let word: u32 = (0b11 << 29) | (1 << 28) | (0x3FFC0 << 10) | (1 << 8) | 0xB9;
    let mut bytes = [0u8; 4];
    te().write_u32(&mut bytes, 0, word);

    for _ in 0..2 {
        apex.inject_queuing("A429_RX_1", &bytes);
        iom.step(&mut apex, &[]);
    }

    let value = f32::from_bits(get_u32(iom.input_params(), 0));
    assert!((value - (-0.64)).abs() <= 0.01, "got {value}");
    let v = Validity::read(iom.input_params(), 4);
    assert_eq!(v.if_state, IfState::NormalOp);
}
