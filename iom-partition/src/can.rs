//! A825/CAN transport driver: dual-bus sweep, redundancy-aware lookup,
//! pilot-input duplicate filtering, partition routing, and scheduled output.
//!
//! A message is identified by its CAN ID with the FS and RCI sub-fields
//! masked out; the two RCI values of one masked ID are the two redundant
//! sources and share one control entry. Frames are preferred from the
//! last-selected bus, switching only once that bus's freshness window has
//! expired.

use iom_core::bytes::Endianness;
use iom_core::config::{CanInputMap, CanMessageRef, Config};
use iom_core::convert_in::{self, InputCtx, InputKind};
use iom_core::convert_out::{self, OutputCtx, OutputKind};
use iom_core::types::{DataState, IfState, Validity, MAX_CAN_MESSAGES_PER_CYCLE};
use iom_core::validity::{evaluate, ConditionKind};
use iom_core::ConfirmObject;
use log::{debug, warn};

use crate::apex::{Apex, PortDirection, PortId, ReturnCode, RoutedPortKind, INVALID_PORT};

/// Wire size of one CAN frame record: `(canId, nbytes, msgType, data[8])`.
pub const CAN_FRAME_SIZE: usize = 16;

pub const CAN_ID_IGNORE_FS_MASK: u32 = 0x1FFF_FFF3;
pub const CAN_ID_IGNORE_FS_RCI_MASK: u32 = 0x1FFF_FFF0;
pub const CAN_ID_RCI_MASK: u32 = 0x0000_0003;
pub const CAN_ID_FS_MASK: u32 = 0x0000_000C;
pub const CAN_ID_FS_SHIFT: u32 = 2;

const CAN_FS_NO: u32 = 1;
const CAN_FS_FT: u32 = 2;
const CAN_FS_NCD: u32 = 3;

/// One CAN frame as exchanged with the bus driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanFrame {
    pub can_id: u32,
    pub nbytes: u16,
    pub msg_type: i16,
    pub data: [u8; 8],
}

impl CanFrame {
    /// Decode from the driver record: the CAN ID is wire order, the length
    /// and type fields are host order.
    pub fn decode(bytes: &[u8], te: Endianness) -> CanFrame {
        let mut data = [0u8; 8];
        data.copy_from_slice(&bytes[8..16]);
        CanFrame {
            can_id: te.read_u32(bytes, 0),
            nbytes: u16::from_ne_bytes([bytes[4], bytes[5]]),
            msg_type: i16::from_ne_bytes([bytes[6], bytes[7]]),
            data,
        }
    }

    pub fn encode(&self, out: &mut [u8], te: Endianness) {
        te.write_u32(out, 0, self.can_id);
        out[4..6].copy_from_slice(&self.nbytes.to_ne_bytes());
        out[6..8].copy_from_slice(&self.msg_type.to_ne_bytes());
        out[8..16].copy_from_slice(&self.data);
    }
}

/// One row of the CAN routing table (TERMINATOR-ended in the static config).
#[derive(Debug, Clone)]
pub struct CanRoutingEntry {
    pub kind: RoutedPortKind,
    pub can_id: u32,
    pub port_name: String,
    pub queue_length: u32,
}

impl CanRoutingEntry {
    pub fn terminator() -> CanRoutingEntry {
        CanRoutingEntry {
            kind: RoutedPortKind::Terminator,
            can_id: 0,
            port_name: String::new(),
            queue_length: 0,
        }
    }
}

struct RoutingPort {
    kind: RoutedPortKind,
    can_id: u32,
    port: PortId,
    pending: Vec<CanFrame>,
}

/// Control entry for one masked CAN ID.
struct CanMessageControl {
    can_id_masked: u32,
    /// APEX port of the bus the message was last accepted on; 0 before the
    /// first receipt.
    last_bus: PortId,
    /// Blob offsets of the RCI 0 / RCI 1 message configs.
    cfg_rci0: Option<usize>,
    cfg_rci1: Option<usize>,
    valid_ctrl: ConfirmObject,
    prev: CanFrame,
}

struct CanTxCtrl {
    countdown: u32,
    countdown_init: u32,
}

pub struct CanDriver {
    rx_a: PortId,
    rx_b: PortId,
    tx_a: PortId,
    tx_b: PortId,
    messages: Vec<CanMessageControl>,
    routing: Vec<RoutingPort>,
    tx: Vec<CanTxCtrl>,
    te: Endianness,
}

impl CanDriver {
    /// Create the bus and routing ports, build the masked-ID control table,
    /// and initialise the output countdowns.
    pub fn create<A: Apex>(
        cfg: &Config,
        apex: &mut A,
        table: &[CanRoutingEntry],
        app_period_ms: f32,
        te: Endianness,
    ) -> CanDriver {
        let mut driver = CanDriver {
            rx_a: INVALID_PORT,
            rx_b: INVALID_PORT,
            tx_a: INVALID_PORT,
            tx_b: INVALID_PORT,
            messages: Vec::new(),
            routing: Vec::new(),
            tx: Vec::new(),
            te,
        };

        driver.init_control(cfg, app_period_ms);

        let max_len = (CAN_FRAME_SIZE * MAX_CAN_MESSAGES_PER_CYCLE) as u32;
        for entry in table {
            if entry.kind == RoutedPortKind::Terminator {
                break;
            }
            let dir = match entry.kind {
                RoutedPortKind::RxA | RoutedPortKind::RxB => PortDirection::Destination,
                _ => PortDirection::Source,
            };
            let port = if entry.kind == RoutedPortKind::RoutingTx {
                // Duplicate table rows with different CAN IDs share one port.
                match apex.get_queuing_port_id(&entry.port_name) {
                    Some(id) => Ok(id),
                    None => apex.create_queuing_port(
                        &entry.port_name,
                        max_len,
                        entry.queue_length,
                        dir,
                    ),
                }
            } else {
                apex.create_queuing_port(&entry.port_name, max_len, entry.queue_length, dir)
            };
            let port = port.unwrap_or_else(|code| {
                warn!("CAN port {}: create failed ({code:?})", entry.port_name);
                INVALID_PORT
            });

            match entry.kind {
                RoutedPortKind::RxA => driver.rx_a = port,
                RoutedPortKind::RxB => driver.rx_b = port,
                RoutedPortKind::TxA => driver.tx_a = port,
                RoutedPortKind::TxB => driver.tx_b = port,
                RoutedPortKind::RoutingTx => driver.routing.push(RoutingPort {
                    kind: entry.kind,
                    can_id: entry.can_id,
                    port,
                    pending: Vec::with_capacity(MAX_CAN_MESSAGES_PER_CYCLE),
                }),
                RoutedPortKind::Terminator => {}
            }
        }

        for msg in cfg.can_output_messages() {
            let countdown_init =
                (((msg.config.fresh_time as f32) / app_period_ms + 0.99) as u32).max(1);
            driver.tx.push(CanTxCtrl {
                countdown: countdown_init,
                countdown_init,
            });
        }

        driver
    }

    /// Collapse the input message table onto masked CAN IDs; the two RCI
    /// variants of an ID land in one entry as the two redundant sources.
    fn init_control(&mut self, cfg: &Config, app_period_ms: f32) {
        for msg in cfg.can_input_messages() {
            let masked = msg.config.can_id & CAN_ID_IGNORE_FS_RCI_MASK;
            let rci0 = msg.config.can_id & CAN_ID_RCI_MASK == 0;

            if let Some(ctrl) = self.messages.iter_mut().find(|c| c.can_id_masked == masked) {
                if rci0 {
                    ctrl.cfg_rci0 = Some(msg.offset);
                } else {
                    ctrl.cfg_rci1 = Some(msg.offset);
                }
                continue;
            }

            self.messages.push(CanMessageControl {
                can_id_masked: masked,
                last_bus: 0,
                cfg_rci0: rci0.then_some(msg.offset),
                cfg_rci1: (!rci0).then_some(msg.offset),
                valid_ctrl: ConfirmObject::new_message(
                    msg.config.fresh_time,
                    msg.config.unfresh_time,
                    app_period_ms,
                ),
                prev: CanFrame::default(),
            });
        }
    }

    /// Reset the edge-count accumulators and the routing lists for a new
    /// processing pass.
    pub fn start_input(&mut self, cfg: &Config, in_param: &mut [u8], in_param_src: &mut [u8]) {
        for msg in cfg.can_input_messages() {
            for map in msg.input_mappings() {
                if InputKind::from_u16(map.signal.kind) == InputKind::Int8Add {
                    let zero = 0u32.to_ne_bytes();
                    let src = map.signal.par_offset as usize;
                    let app = map.mapping.par_offset as usize;
                    in_param_src[src..src + 4].copy_from_slice(&zero);
                    in_param[app..app + 4].copy_from_slice(&zero);
                }
            }
        }
        for entry in &mut self.routing {
            entry.pending.clear();
        }
    }

    /// Full receive pass: both physical buses, then the freshness sweep over
    /// every configured message.
    pub fn read_messages<A: Apex>(
        &mut self,
        cfg: &Config,
        apex: &mut A,
        in_param: &mut [u8],
        in_param_src: &mut [u8],
        ctx: &InputCtx,
    ) {
        self.start_input(cfg, in_param, in_param_src);
        let (rx_a, rx_b) = (self.rx_a, self.rx_b);
        self.handle_bus(rx_a, cfg, apex, in_param, in_param_src, ctx);
        self.handle_bus(rx_b, cfg, apex, in_param, in_param_src, ctx);
        self.check_message_freshness(cfg, in_param, in_param_src, ctx);
    }

    fn handle_bus<A: Apex>(
        &mut self,
        bus: PortId,
        cfg: &Config,
        apex: &mut A,
        in_param: &mut [u8],
        in_param_src: &mut [u8],
        ctx: &InputCtx,
    ) {
        let mut buf = [0u8; CAN_FRAME_SIZE * MAX_CAN_MESSAGES_PER_CYCLE];
        let (len, code) = apex.receive_queuing_message(bus, &mut buf);
        if len == 0 || code != ReturnCode::NoError {
            return;
        }

        let count = (len / CAN_FRAME_SIZE).min(MAX_CAN_MESSAGES_PER_CYCLE);
        for i in 0..count {
            let frame = CanFrame::decode(&buf[i * CAN_FRAME_SIZE..], self.te);
            self.handle_frame(bus, &frame, cfg, in_param, in_param_src, ctx);
            self.queue_routed_frame(&frame);
        }

        self.flush_routed_frames(apex);
    }

    fn handle_frame(
        &mut self,
        bus: PortId,
        frame: &CanFrame,
        cfg: &Config,
        in_param: &mut [u8],
        in_param_src: &mut [u8],
        ctx: &InputCtx,
    ) {
        let masked = frame.can_id & CAN_ID_IGNORE_FS_RCI_MASK;
        let Some(ctrl) = self.messages.iter_mut().find(|c| c.can_id_masked == masked) else {
            return;
        };
        let cfg_offset = if frame.can_id & CAN_ID_RCI_MASK == 0 {
            ctrl.cfg_rci0
        } else {
            ctrl.cfg_rci1
        };
        let Some(cfg_offset) = cfg_offset else {
            return;
        };

        // Accept a frame only from the selected bus, unless no bus is
        // selected yet or the selected bus's freshness window has expired.
        let bus_ok = ctrl.last_bus == bus || ctrl.last_bus == 0 || ctrl.valid_ctrl.cycle == 0;
        if !bus_ok {
            return;
        }

        // A bus change always counts as new data; on the same bus the
        // pilot-input duplicate filter applies.
        let new_msg = ctrl.last_bus != bus || is_new_message(&ctrl.prev, frame);

        if new_msg {
            ctrl.prev = *frame;
            process_message(
                ctrl,
                cfg.can_message_at(cfg_offset),
                frame,
                in_param,
                in_param_src,
                ctx,
                self.te,
            );
            if ctrl.valid_ctrl.validity.current.state == DataState::Valid {
                ctrl.last_bus = bus;
                ctrl.valid_ctrl.cycle = ctrl.valid_ctrl.limit_cycle_invalid;
            }
        } else if ctrl.valid_ctrl.validity.current.state == DataState::Valid {
            // A suppressed duplicate still refreshes the message.
            ctrl.valid_ctrl.cycle = ctrl.valid_ctrl.limit_cycle_invalid;
        }
    }

    fn queue_routed_frame(&mut self, frame: &CanFrame) {
        for entry in &mut self.routing {
            if entry.kind == RoutedPortKind::RoutingTx
                && (frame.can_id & CAN_ID_IGNORE_FS_MASK) == (entry.can_id & CAN_ID_IGNORE_FS_MASK)
            {
                if entry.pending.len() < MAX_CAN_MESSAGES_PER_CYCLE {
                    entry.pending.push(*frame);
                }
                break;
            }
        }
    }

    fn flush_routed_frames<A: Apex>(&mut self, apex: &mut A) {
        for entry in &mut self.routing {
            if entry.pending.is_empty() {
                continue;
            }
            let mut out = [0u8; CAN_FRAME_SIZE * MAX_CAN_MESSAGES_PER_CYCLE];
            for (i, frame) in entry.pending.iter().enumerate() {
                frame.encode(&mut out[i * CAN_FRAME_SIZE..], self.te);
            }
            let code = apex.send_queuing_message(entry.port, &out[..entry.pending.len() * CAN_FRAME_SIZE]);
            if code != ReturnCode::NoError {
                debug!("CAN routing port {}: send failed ({code:?})", entry.port);
            }
            entry.pending.clear();
        }
    }

    /// Count down every configured message; expiry invalidates its
    /// parameters.
    fn check_message_freshness(
        &mut self,
        cfg: &Config,
        in_param: &mut [u8],
        in_param_src: &mut [u8],
        ctx: &InputCtx,
    ) {
        for ctrl in &mut self.messages {
            if ctrl.valid_ctrl.cycle == 0 {
                continue;
            }
            ctrl.valid_ctrl.cycle -= 1;
            if ctrl.valid_ctrl.cycle == 0 {
                invalidate_message(ctrl, cfg, in_param, in_param_src, ctx, self.te);
            }
        }
    }

    /// Scheduled output: encode each message from the output parameter
    /// buffer and transmit on both physical buses.
    pub fn write_messages<A: Apex>(
        &mut self,
        cfg: &Config,
        apex: &mut A,
        out_param: &[u8],
        ctx: &OutputCtx,
    ) {
        for (idx, msg) in cfg.can_output_messages().enumerate() {
            let ctrl = &mut self.tx[idx];
            if ctrl.countdown > 1 {
                ctrl.countdown -= 1;
                continue;
            }
            ctrl.countdown = ctrl.countdown_init;

            let mut frame = CanFrame {
                can_id: msg.config.can_id,
                nbytes: msg.config.message_length as u16,
                ..CanFrame::default()
            };
            for map in msg.output_mappings() {
                convert_out::convert(
                    OutputKind::from_u16(map.signal.kind),
                    &map.mapping,
                    &map.signal,
                    out_param,
                    &mut frame.data,
                    ctx,
                );
                if map.mapping.num_sources == 2 {
                    // Special function: an extra output validity status.
                    convert_out::convert(
                        OutputKind::from_u16(map.validity_signal.kind),
                        &map.mapping,
                        &map.validity_signal,
                        out_param,
                        &mut frame.data,
                        ctx,
                    );
                }
            }

            let mut out = [0u8; CAN_FRAME_SIZE];
            frame.encode(&mut out, self.te);
            for port in [self.tx_a, self.tx_b] {
                let code = apex.send_queuing_message(port, &out);
                if code != ReturnCode::NoError {
                    debug!("CAN tx {:#010x}: send failed ({code:?})", msg.config.can_id);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame processing
// ---------------------------------------------------------------------------

/// Map the CAN ID's FS field and, when valid, decode every mapping into the
/// source buffer and copy status plus value through to the application.
fn process_message(
    ctrl: &mut CanMessageControl,
    msg: CanMessageRef,
    frame: &CanFrame,
    in_param: &mut [u8],
    in_param_src: &mut [u8],
    ctx: &InputCtx,
    te: Endianness,
) {
    let fs = (frame.can_id & CAN_ID_FS_MASK) >> CAN_ID_FS_SHIFT;
    ctrl.valid_ctrl.validity.current = match fs {
        CAN_FS_NO => Validity::new(DataState::Valid, IfState::NormalOp),
        CAN_FS_FT => Validity::new(DataState::Valid, IfState::Test),
        CAN_FS_NCD => Validity::new(DataState::Invalid, IfState::Ncd),
        _ => Validity::new(DataState::Invalid, IfState::NoData),
    };

    if ctrl.valid_ctrl.validity.current.state != DataState::Valid {
        // Invalid values reach the application only once confirmed.
        return;
    }

    for map in msg.input_mappings() {
        do_one_mapping(
            ctrl.valid_ctrl.validity.current,
            &map,
            &frame.data,
            in_param_src,
            ctx,
            te,
        );
        copy_mapping(&map, in_param, in_param_src, true);
    }
}

/// Per-mapping decode: zero-source mappings are internal parameters and only
/// get a VALID stamp; otherwise the inline validity conditions run first and
/// the configured converter does the rest.
fn do_one_mapping(
    validity: Validity,
    map: &CanInputMap,
    data: &[u8],
    in_param_src: &mut [u8],
    ctx: &InputCtx,
    te: Endianness,
) {
    if map.mapping.num_sources == 0 {
        Validity::normal_op().write(in_param_src, map.signal.val_offset as usize);
        return;
    }

    let mut v = validity;
    let mut i = 0;
    while i < map.validity.num_conditions as usize && v.state == DataState::Valid {
        let kind = ConditionKind::from_u8(map.validity.condition_kind[i]);
        v = evaluate(kind, data, &map.validity.condition[i], te);
        i += 1;
    }

    convert_in::convert(
        InputKind::from_u16(map.signal.kind),
        v,
        &map.mapping,
        &map.signal,
        data,
        in_param_src,
        ctx,
    );
}

/// Copy a mapping's validity word (always) and its value (only when the
/// stored validity is VALID, or unconditionally for a live message) from the
/// source buffer to the application buffer.
fn copy_mapping(map: &CanInputMap, in_param: &mut [u8], in_param_src: &[u8], copy_data: bool) {
    let v = Validity::read(in_param_src, map.signal.val_offset as usize);
    v.write(in_param, map.mapping.val_offset as usize);

    if copy_data || v.state == DataState::Valid {
        let len = (map.mapping.par_size as usize / 8).max(1);
        let src = map.signal.par_offset as usize;
        let app = map.mapping.par_offset as usize;
        in_param[app..app + len].copy_from_slice(&in_param_src[src..src + len]);
    }
}

/// Freshness expiry: confirm the message lost (or its last invalid state)
/// and refresh the parameter validity words; data bytes stay untouched
/// except for MESSAGE_UNFRESH flags, which stamp themselves VALID.
fn invalidate_message(
    ctrl: &mut CanMessageControl,
    cfg: &Config,
    in_param: &mut [u8],
    in_param_src: &mut [u8],
    ctx: &InputCtx,
    te: Endianness,
) {
    let validity = &mut ctrl.valid_ctrl.validity;
    if validity.current.state == DataState::Invalid {
        validity.confirmed = validity.current;
    } else {
        validity.current = Validity::unfresh();
        validity.confirmed = Validity::unfresh();
    }

    let Some(cfg_offset) = ctrl.cfg_rci0.or(ctrl.cfg_rci1) else {
        return;
    };
    let zero = [0u8; 8];
    let confirmed = validity.confirmed;
    for map in cfg.can_message_at(cfg_offset).input_mappings() {
        do_one_mapping(confirmed, &map, &zero, in_param_src, ctx, te);
        copy_mapping(&map, in_param, in_param_src, false);
    }
}

// ---------------------------------------------------------------------------
// Duplicate filter
// ---------------------------------------------------------------------------

fn is_zero(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

/// Pilot-input duplicate filter. The control panels keep transmitting
/// all-zero frames while untouched; those repeats are suppressed for a fixed
/// catalogue of CAN IDs, ignoring the trailing validity/heartbeat bytes.
/// BARO unit selection is special-cased: its `data[2]` is always 1 or 2.
fn is_new_message(prev: &CanFrame, frame: &CanFrame) -> bool {
    if frame.can_id != prev.can_id || frame.nbytes != prev.nbytes {
        return true;
    }

    match (frame.can_id >> 4) & 0xFFF {
        0x200 | 0x240 => {
            // data[5] = validity, data[6] = heartbeat: excluded from the
            // comparison.
            if frame.data[..5] != prev.data[..5] {
                true
            } else if is_zero(&frame.data[..5]) {
                false
            } else {
                !((frame.data[2] == 1 || frame.data[2] == 2)
                    && frame.data[0] == 0
                    && frame.data[1] == 0
                    && frame.data[3] == 0
                    && frame.data[4] == 0)
            }
        }

        0x000 | 0x040 | 0x100 | 0x140 | 0x300 => {
            let n = (frame.nbytes as usize).saturating_sub(2).min(8);
            frame.data[..n] != prev.data[..n] || !is_zero(&frame.data[..n])
        }

        0x201 | 0x241 => {
            let n = (frame.nbytes as usize).min(8);
            frame.data[..n] != prev.data[..n] || !is_zero(&frame.data[..n])
        }

        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(can_id: u32, data: [u8; 8]) -> CanFrame {
        CanFrame {
            can_id,
            nbytes: 8,
            msg_type: 0,
            data,
        }
    }

    #[test]
    fn test_frame_codec_roundtrip() {
        let te = Endianness::native();
        let f = frame(0x0848_2004, [1, 2, 3, 4, 5, 6, 7, 8]);
        let mut bytes = [0u8; CAN_FRAME_SIZE];
        f.encode(&mut bytes, te);
        assert_eq!(CanFrame::decode(&bytes, te), f);
    }

    #[test]
    fn test_filter_suppresses_unchanged_heartbeat() {
        // Scenario: only the validity/heartbeat bytes differ on a BARO-group
        // ID — the repeat is not new data.
        let prev = frame(0x0848_2004, [0, 0, 0, 0, 0, 0x11, 0x22, 0]);
        let next = frame(0x0848_2004, [0, 0, 0, 0, 0, 0x33, 0x44, 0]);
        assert!(!is_new_message(&prev, &next));
    }

    #[test]
    fn test_filter_baro_unit_selection_carve_out() {
        // data[2] in {1, 2} with the rest zero is the steady BARO unit
        // selection: suppressed while unchanged.
        let prev = frame(0x0848_2004, [0, 0, 1, 0, 0, 9, 9, 0]);
        let next = frame(0x0848_2004, [0, 0, 1, 0, 0, 8, 8, 0]);
        assert!(!is_new_message(&prev, &next));

        // A change in the selection is new data.
        let changed = frame(0x0848_2004, [0, 0, 2, 0, 0, 8, 8, 0]);
        assert!(is_new_message(&prev, &changed));
    }

    #[test]
    fn test_filter_non_zero_payload_passes() {
        let prev = frame(0x0848_0004, [0, 3, 0, 0, 0, 0, 0, 0]);
        let next = frame(0x0848_0004, [0, 3, 0, 0, 0, 0, 0, 0]);
        // Unchanged but non-zero: still processed (edge counters add up).
        assert!(is_new_message(&prev, &next));

        let zero_prev = frame(0x0848_0004, [0; 8]);
        let zero_next = frame(0x0848_0004, [0; 8]);
        assert!(!is_new_message(&zero_prev, &zero_next));
    }

    #[test]
    fn test_filter_ignores_unlisted_ids() {
        let prev = frame(0x0855_0000, [0; 8]);
        let next = frame(0x0855_0000, [0; 8]);
        assert!(is_new_message(&prev, &next));
    }

    #[test]
    fn test_filter_detects_fs_change() {
        let prev = frame(0x0848_2004, [0; 8]);
        let next = frame(0x0848_2004 | 0x8, [0; 8]); // FS field changed
        assert!(is_new_message(&prev, &next));
    }
}
