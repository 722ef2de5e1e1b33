//! Demo configuration and traffic for the simulator.
//!
//! A small but representative table set: one AFDX sampling input carrying an
//! altitude word, one dual-RCI CAN pilot input, and one AFDX output dataset
//! echoing an application value. The same layout is emitted for all five
//! display-unit personalities.

use iom_core::bytes::Endianness;
use iom_core::config::build::*;
use iom_core::config::{
    AfdxMessageInfo, CanMessageConfig, InputSignalConfig, ParamMappingConfig,
    ValidityConditionConfig, ValidityConfig, ValidityConfigCan,
};
use iom_partition::apex::RoutedPortKind;
use iom_partition::can::{CanFrame, CanRoutingEntry, CAN_FRAME_SIZE};
use iom_partition::MemApex;

/// Application-buffer offsets of the demo parameters.
pub const ALTITUDE_PAR: usize = 0;
pub const ALTITUDE_VAL: usize = 4;
pub const PILOT_PAR: usize = 8;
pub const PILOT_VAL: usize = 12;

/// In-band header length used by the demo (IMA platform, no extra pad).
pub const HEADER_LEN: u32 = 32;

pub const AFDX_IN_PORT: &str = "AFDX_ADC_DATA";
pub const AFDX_OUT_PORT: &str = "AFDX_IOM_STATUS";

fn demo_blob() -> Vec<u8> {
    let mut b = ConfigBuilder::new();

    // AFDX input: FS byte at payload offset 4, altitude u32 at offset 8.
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
        AFDX_IN_PORT,
    );
    b.dataset_single(DatasetDef {
        sources: vec![ValidityConfig {
            num_conditions: 1,
            source_set: 0,
            condition_kind: [10, 0, 0, 0], // FRESH_FS
            condition: [
                ValidityConditionConfig {
                    offset: 0,
                    offset2: HEADER_LEN + 4,
                    ..Default::default()
                },
                ValidityConditionConfig::default(),
                ValidityConditionConfig::default(),
                ValidityConditionConfig::default(),
            ],
        }],
        params: vec![ParamDef {
            mapping: ParamMappingConfig {
                par_offset: ALTITUDE_PAR as u32,
                val_offset: ALTITUDE_VAL as u32,
                par_size: 32,
                num_sources: 1,
                ..Default::default()
            },
            signals: vec![InputSignalConfig {
                off_byte: HEADER_LEN + 8,
                size_bits: 32,
                kind: 0, // UINT32
                lsb_value: 1.0,
                par_offset: ALTITUDE_PAR as u32,
                val_offset: ALTITUDE_VAL as u32,
                ..Default::default()
            }],
        }],
    });

    // CAN pilot input, both RCIs of one masked ID; data[5] is the rotary
    // count byte.
    for can_id in [0x0848_2004u32, 0x0848_2005] {
        b.can_input(CanInMsgDef {
            config: CanMessageConfig {
                message_id: 2,
                can_id,
                fresh_time: 32,
                unfresh_time: 64,
                message_length: 8,
                ..Default::default()
            },
            maps: vec![CanInMapDef {
                mapping: ParamMappingConfig {
                    par_offset: PILOT_PAR as u32,
                    val_offset: PILOT_VAL as u32,
                    par_size: 32,
                    num_sources: 1,
                    ..Default::default()
                },
                signal: InputSignalConfig {
                    off_byte: 1,
                    size_bits: 8,
                    kind: 18, // UINT8
                    lsb_value: 1.0,
                    par_offset: PILOT_PAR as u32,
                    val_offset: PILOT_VAL as u32,
                    ..Default::default()
                },
                validity: ValidityConfigCan::default(),
            }],
        });
    }

    // AFDX output: one dataset echoing the application's status word.
    b.afdx_output(
        AfdxMessageInfo {
            message_id: 3,
            message_length: 16,
            queue_length: 0,
            refresh_period: 33,
            message_hdr_offset: 0,
            ..Default::default()
        },
        AFDX_OUT_PORT,
    );
    b.output_dataset(OutputDatasetDef {
        kind: 0,
        fs_offset: 4,
        ds_offset: 8,
        a429_label_id_sdi: 0,
        a429_ssm_type: 0,
        maps: vec![(
            ParamMappingConfig {
                par_offset: 0,
                val_offset: 4,
                par_size: 32,
                num_sources: 1,
                ..Default::default()
            },
            InputSignalConfig {
                off_byte: 8,
                size_bits: 32,
                kind: 2, // 32-bit write
                lsb_value: 1.0,
                ..Default::default()
            },
        )],
    });

    b.finish()
}

/// The five display-unit personalities (identical tables in the demo).
pub fn personalities() -> [Vec<u8>; 5] {
    [demo_blob(), demo_blob(), demo_blob(), demo_blob(), demo_blob()]
}

pub fn can_routing() -> Vec<CanRoutingEntry> {
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

/// Inject one cycle of demo bus traffic.
pub fn inject_traffic(apex: &mut MemApex, cycle: u32, te: Endianness) {
    // Climbing altitude on the AFDX input.
    let mut payload = vec![0u8; 16];
    payload[4] = 0x03; // FS NO
    te.write_u32(&mut payload, 8, 10_000 + cycle * 25);
    apex.inject_sampling(AFDX_IN_PORT, &payload);

    // Pilot rotary count on CAN bus A, RCI 0. data[5]/data[6] are the
    // validity/heartbeat bytes the duplicate filter ignores.
    let frame = CanFrame {
        can_id: 0x0848_2004,
        nbytes: 8,
        msg_type: 0,
        data: [0, (cycle % 200) as u8 + 1, 0, 0, 0, 0x01, (cycle % 256) as u8, 0],
    };
    let mut bytes = [0u8; CAN_FRAME_SIZE];
    frame.encode(&mut bytes, te);
    apex.inject_queuing("CAN_RX_A", &bytes);
}
