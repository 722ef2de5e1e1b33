//! A429 transport driver: per-port word reads, the `[port][label][sdi]`
//! lookup, word routing, and label freshness.
//!
//! Each physical port owns a raw-data region in the input message buffer:
//! one `(freshness: u32, raw: u32)` slot per `(label, sdi)`. The raw word is
//! stored exactly as received (wire order); converters apply the byte-order
//! seam when they read it. Up to 16 words are drained per port per cycle.

use iom_core::bytes::{host_read_u32, host_write_u32, Endianness};
use iom_core::config::Config;
use iom_core::{ConfirmObject, A429_MAX_LABELS, A429_MAX_SDI, A429_READS_PER_PORT_PER_CYCLE};
use log::warn;

use crate::apex::{Apex, PortDirection, PortId, ReturnCode, RoutedPortKind, INVALID_PORT};

/// Size of one `(freshness, raw)` slot in the message buffer.
pub const A429_SLOT_SIZE: usize = 8;
/// Raw-data region size of one port.
pub const A429_PORT_REGION: usize = A429_MAX_LABELS * A429_MAX_SDI * A429_SLOT_SIZE;

const A429_WORD_LEN: usize = 4;

/// One row of the A429 routing table. The table is terminated by a
/// [`RoutedPortKind::Terminator`] row; a receive row with a
/// `transport_port_index` forwards every received word on the named
/// companion's TX port.
#[derive(Debug, Clone)]
pub struct A429RoutingEntry {
    pub kind: RoutedPortKind,
    /// Index of the physical port this row describes (receive rows).
    pub port_index: usize,
    pub port_name: String,
    pub queue_length: u32,
    /// Table index of the routing TX companion, if any.
    pub transport_port_index: Option<usize>,
}

impl A429RoutingEntry {
    pub fn terminator() -> A429RoutingEntry {
        A429RoutingEntry {
            kind: RoutedPortKind::Terminator,
            port_index: 0,
            port_name: String::new(),
            queue_length: 0,
            transport_port_index: None,
        }
    }
}

struct LabelSlot {
    configured: bool,
    ctrl: ConfirmObject,
}

pub struct A429Driver {
    /// APEX receive port per configured physical port.
    ports: Vec<PortId>,
    /// `[port][label][sdi]`, flattened.
    slots: Vec<LabelSlot>,
    /// Forwarding TX port per physical port, resolved from the routing table.
    forward: Vec<Option<PortId>>,
    te: Endianness,
}

fn slot_index(port: usize, label: usize, sdi: usize) -> usize {
    (port * A429_MAX_LABELS + label) * A429_MAX_SDI + sdi
}

impl A429Driver {
    /// Create receive and routing ports and build the label lookup.
    pub fn create<A: Apex>(
        cfg: &Config,
        apex: &mut A,
        table: &[A429RoutingEntry],
        app_period_ms: f32,
        te: Endianness,
    ) -> A429Driver {
        let port_count = cfg.a429_port_count();
        let mut ports = vec![INVALID_PORT; port_count];
        let mut forward = vec![None; port_count];
        let mut table_ports = vec![INVALID_PORT; table.len()];

        for (idx, entry) in table.iter().enumerate() {
            match entry.kind {
                RoutedPortKind::Terminator => break,
                RoutedPortKind::RxA | RoutedPortKind::RxB => {
                    match apex.create_queuing_port(
                        &entry.port_name,
                        A429_WORD_LEN as u32,
                        entry.queue_length,
                        PortDirection::Destination,
                    ) {
                        Ok(id) => {
                            if entry.port_index < port_count {
                                ports[entry.port_index] = id;
                            }
                        }
                        Err(code) => {
                            warn!("A429 rx port {}: create failed ({code:?})", entry.port_name);
                        }
                    }
                }
                RoutedPortKind::RoutingTx => {
                    match apex.create_queuing_port(
                        &entry.port_name,
                        A429_WORD_LEN as u32,
                        entry.queue_length,
                        PortDirection::Source,
                    ) {
                        Ok(id) => table_ports[idx] = id,
                        Err(code) => {
                            warn!(
                                "A429 routing port {}: create failed ({code:?})",
                                entry.port_name
                            );
                        }
                    }
                }
                _ => {}
            }
        }

        // Resolve receive-row companions now that every TX port exists.
        for entry in table {
            if entry.kind == RoutedPortKind::Terminator {
                break;
            }
            if matches!(entry.kind, RoutedPortKind::RxA | RoutedPortKind::RxB) {
                if let Some(t) = entry.transport_port_index {
                    if entry.port_index < port_count && table_ports.get(t).copied().unwrap_or(0) != 0
                    {
                        forward[entry.port_index] = Some(table_ports[t]);
                    }
                }
            }
        }

        let mut slots = Vec::with_capacity(port_count * A429_MAX_LABELS * A429_MAX_SDI);
        for _ in 0..port_count * A429_MAX_LABELS * A429_MAX_SDI {
            slots.push(LabelSlot {
                configured: false,
                ctrl: ConfirmObject::default(),
            });
        }
        for msg in cfg.a429_messages() {
            let idx = slot_index(msg.port as usize, msg.code as usize, msg.sdi as usize);
            slots[idx] = LabelSlot {
                configured: true,
                ctrl: ConfirmObject::new_message(msg.valid_time, msg.invalid_time, app_period_ms),
            };
        }

        A429Driver {
            ports,
            slots,
            forward,
            te,
        }
    }

    /// Drain up to 16 words per port, stamp the lookup slots, forward routed
    /// words, then advance label freshness.
    pub fn read_messages<A: Apex>(&mut self, cfg: &Config, apex: &mut A, in_msg: &mut [u8]) {
        for port_idx in 0..cfg.a429_port_count() {
            let region = cfg.a429_port(port_idx).message_offset as usize;
            for _ in 0..A429_READS_PER_PORT_PER_CYCLE {
                let mut word = [0u8; A429_WORD_LEN];
                let (len, code) = apex.receive_queuing_message(self.ports[port_idx], &mut word);
                if len != A429_WORD_LEN
                    || !(code == ReturnCode::NoError || code == ReturnCode::InvalidConfig)
                {
                    continue;
                }

                self.process_word(port_idx, region, &word, in_msg);

                if let Some(tx) = self.forward[port_idx] {
                    apex.send_queuing_message(tx, &word);
                }
            }
        }

        self.update_freshness(cfg, in_msg);
    }

    /// Decode label and SDI, stamp new data, store the raw word.
    fn process_word(&mut self, port_idx: usize, region: usize, word: &[u8; 4], in_msg: &mut [u8]) {
        let value = self.te.read_u32(word, 0);
        let label = (value & 0xFF) as usize;
        let sdi = ((value >> 8) & 0x3) as usize;

        let slot = &mut self.slots[slot_index(port_idx, label, sdi)];
        if !slot.configured {
            return;
        }
        slot.ctrl.set_new_data();

        let data_off = region + (label * A429_MAX_SDI + sdi) * A429_SLOT_SIZE;
        in_msg[data_off + 4..data_off + 8].copy_from_slice(word);
    }

    /// Advance the freshness word of every configured label.
    fn update_freshness(&mut self, cfg: &Config, in_msg: &mut [u8]) {
        for msg in cfg.a429_messages() {
            let slot = &mut self.slots[slot_index(msg.port as usize, msg.code as usize, msg.sdi as usize)];
            if !slot.configured {
                continue;
            }
            let region = cfg.a429_port(msg.port as usize).message_offset as usize;
            let off = region + (msg.code as usize * A429_MAX_SDI + msg.sdi as usize) * A429_SLOT_SIZE;

            let mut freshness = host_read_u32(in_msg, off);
            slot.ctrl.confirm_freshness(&mut freshness);
            host_write_u32(in_msg, off, freshness);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apex::MemApex;
    use iom_core::config::build::ConfigBuilder;
    use iom_core::config::{A429MessageInfo, A429PortInfo};
    use iom_core::{MSG_FRESH, MSG_UNFRESH};

    fn demo_config() -> Vec<u8> {
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
            code: 0xB9, // octal 271
            sdi: 1,
            port: 0,
            valid_time: 32,
            invalid_time: 64,
        });
        b.finish()
    }

    fn routing() -> Vec<A429RoutingEntry> {
        vec![
            A429RoutingEntry {
                kind: RoutedPortKind::RxA,
                port_index: 0,
                port_name: "A429_RX_1".into(),
                queue_length: 16,
                transport_port_index: Some(1),
            },
            A429RoutingEntry {
                kind: RoutedPortKind::RoutingTx,
                port_index: 0,
                port_name: "A429_FWD".into(),
                queue_length: 16,
                transport_port_index: None,
            },
            A429RoutingEntry::terminator(),
        ]
    }

    fn wire_word(word: u32) -> [u8; 4] {
        let mut bytes = [0u8; 4];
        Endianness::native().write_u32(&mut bytes, 0, word);
        bytes
    }

    #[test]
    fn test_word_lands_in_lookup_slot() {
        let blob = demo_config();
        let cfg = Config::parse(&blob).unwrap();
        let mut apex = MemApex::new();
        let mut driver =
            A429Driver::create(&cfg, &mut apex, &routing(), 16.5, Endianness::native());
        let mut in_msg = vec![0u8; A429_PORT_REGION];

        // Label 0xB9 (octal 271), SDI 1, some data.
        let word = (0x1234 << 10) | (1 << 8) | 0xB9;
        apex.inject_queuing("A429_RX_1", &wire_word(word));
        driver.read_messages(&cfg, &mut apex, &mut in_msg);

        let off = (0xB9 * A429_MAX_SDI + 1) * A429_SLOT_SIZE;
        assert_eq!(host_read_u32(&in_msg, off), MSG_FRESH);
        assert_eq!(Endianness::native().read_u32(&in_msg, off + 4), word);
    }

    #[test]
    fn test_unconfigured_label_ignored() {
        let blob = demo_config();
        let cfg = Config::parse(&blob).unwrap();
        let mut apex = MemApex::new();
        let mut driver =
            A429Driver::create(&cfg, &mut apex, &routing(), 16.5, Endianness::native());
        let mut in_msg = vec![0u8; A429_PORT_REGION];

        // Same label, wrong SDI: not configured.
        let word = (3 << 8) | 0xB9;
        apex.inject_queuing("A429_RX_1", &wire_word(word));
        driver.read_messages(&cfg, &mut apex, &mut in_msg);

        let off = (0xB9 * A429_MAX_SDI + 3) * A429_SLOT_SIZE;
        assert_eq!(Endianness::native().read_u32(&in_msg, off + 4), 0);
    }

    #[test]
    fn test_label_freshness_expires() {
        let blob = demo_config();
        let cfg = Config::parse(&blob).unwrap();
        let mut apex = MemApex::new();
        let mut driver =
            A429Driver::create(&cfg, &mut apex, &routing(), 16.5, Endianness::native());
        let mut in_msg = vec![0u8; A429_PORT_REGION];

        let word = (1 << 8) | 0xB9;
        apex.inject_queuing("A429_RX_1", &wire_word(word));
        driver.read_messages(&cfg, &mut apex, &mut in_msg);

        let off = (0xB9 * A429_MAX_SDI + 1) * A429_SLOT_SIZE;
        assert_eq!(host_read_u32(&in_msg, off), MSG_FRESH);

        // invalidTime 64 ms at 16.5 ms: unfresh after ceil+1 idle cycles.
        for _ in 0..6 {
            driver.read_messages(&cfg, &mut apex, &mut in_msg);
        }
        assert_eq!(host_read_u32(&in_msg, off), MSG_UNFRESH);
    }

    #[test]
    fn test_word_routing_forwards_verbatim() {
        let blob = demo_config();
        let cfg = Config::parse(&blob).unwrap();
        let mut apex = MemApex::new();
        let mut driver =
            A429Driver::create(&cfg, &mut apex, &routing(), 16.5, Endianness::native());
        let mut in_msg = vec![0u8; A429_PORT_REGION];

        let bytes = wire_word((1 << 8) | 0xB9);
        apex.inject_queuing("A429_RX_1", &bytes);
        driver.read_messages(&cfg, &mut apex, &mut in_msg);

        let forwarded = apex.drain("A429_FWD");
        assert_eq!(forwarded, vec![bytes.to_vec()]);
    }
}
