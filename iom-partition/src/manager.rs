//! The cycle orchestrator: owns the buffers and the per-cycle pipeline.
//!
//! [`IoManager::init`] installs the buffers, creates every port, and
//! initialises the confirmation objects and selection sets. [`IoManager::step`]
//! runs one periodic tick: read all transports, process input datasets
//! (single-source directly to the application, multi-source through the
//! selection engine), encode and schedule the outputs. All state lives in
//! this one context; nothing is allocated after init.

use iom_core::bytes::{host_read_u32, Endianness};
use iom_core::config::{
    Config, DatasetRef, SsmType, OUTPUT_DS_EMBEDDED_A429,
};
use iom_core::confirm::{confirm_all, ConfirmObject, Valid};
use iom_core::convert_in::{self, InputCtx, InputKind};
use iom_core::convert_out::{self, OutputCtx, OutputKind};
use iom_core::select::{self, SelectionSetState};
use iom_core::types::{
    DataState, IfState, Validity, A664_FS_FT, A664_FS_NCD, A664_FS_ND, A664_FS_NO,
    MAX_SOURCES_PER_INPUT,
};

use crate::a429::{A429Driver, A429RoutingEntry};
use crate::afdx::{AfdxDriver, AFDX_HEADER_EXTRA_DEFAULT};
use crate::apex::Apex;
use crate::can::{CanDriver, CanRoutingEntry};

/// Init-time options of one IOM instance.
#[derive(Debug, Clone, Copy)]
pub struct IoManagerOptions {
    /// Input boolean parameters: 32-bit when set, 8-bit otherwise.
    pub bool_is_integer: bool,
    /// Output boolean parameters, same convention.
    pub out_bool_is_integer: bool,
    pub endianness: Endianness,
    /// Extra in-band header padding (0 on IMA platforms, 32 elsewhere).
    pub afdx_header_extra_padding: usize,
}

impl Default for IoManagerOptions {
    fn default() -> Self {
        IoManagerOptions {
            bool_is_integer: true,
            out_bool_is_integer: true,
            endianness: Endianness::native(),
            afdx_header_extra_padding: AFDX_HEADER_EXTRA_DEFAULT,
        }
    }
}

/// One I/O manager instance: configuration view, buffers, drivers, and the
/// confirmation and selection state.
pub struct IoManager<'cfg> {
    cfg: Config<'cfg>,
    opts: IoManagerOptions,

    in_msg: Vec<u8>,
    in_param: Vec<u8>,
    in_param_src: Vec<u8>,
    out_msg: Vec<u8>,

    /// One confirmation array per input dataset (single datasets first, then
    /// multi), one object per source.
    obj_ctrl: Vec<[ConfirmObject; MAX_SOURCES_PER_INPUT]>,
    sets: Vec<SelectionSetState>,

    afdx: AfdxDriver,
    a429: A429Driver,
    can: CanDriver,
}

impl<'cfg> IoManager<'cfg> {
    /// Create ports, size the buffers from the configuration, and initialise
    /// all confirmation objects and selection sets.
    pub fn init<A: Apex>(
        cfg: Config<'cfg>,
        app_period_ns: u64,
        apex: &mut A,
        can_routing: &[CanRoutingEntry],
        a429_routing: &[A429RoutingEntry],
        opts: IoManagerOptions,
    ) -> IoManager<'cfg> {
        let app_period_ms = app_period_ns as f32 / 1_000_000.0;
        let te = opts.endianness;

        let afdx = AfdxDriver::create(
            &cfg,
            apex,
            app_period_ms,
            opts.afdx_header_extra_padding,
            te,
        );
        let a429 = A429Driver::create(&cfg, apex, a429_routing, app_period_ms, te);
        let can = CanDriver::create(&cfg, apex, can_routing, app_period_ms, te);

        let sizes = cfg.buffer_sizes(afdx.header_len());
        let mut out_msg = vec![0u8; sizes.out_msg + 64];
        AfdxDriver::init_output_buffer(&cfg, &mut out_msg);

        let mut obj_ctrl = Vec::new();
        for ds in cfg.input_datasets_single() {
            let mut objs = [ConfirmObject::default(); MAX_SOURCES_PER_INPUT];
            if let Some(par) = ds.params().next() {
                // Single-source datasets confirm within one cycle, e.g. for
                // LIC source selection.
                for obj in objs.iter_mut().take(par.mapping.num_sources as usize) {
                    *obj = ConfirmObject::new_unconfirmed(0, 0, app_period_ms);
                }
            }
            obj_ctrl.push(objs);
        }
        for ds in cfg.input_datasets_multi() {
            let mut objs = [ConfirmObject::default(); MAX_SOURCES_PER_INPUT];
            if let Some(par) = ds.params().next() {
                for (src, obj) in objs
                    .iter_mut()
                    .enumerate()
                    .take(par.mapping.num_sources as usize)
                {
                    let sig = par.signal(src);
                    let (valid_ms, invalid_ms) = cfg.source_windows(sig.transport, sig.msg_idx);
                    *obj = ConfirmObject::new_unconfirmed(valid_ms, invalid_ms, app_period_ms);
                }
            }
            obj_ctrl.push(objs);
        }

        let sets = select::init_selection_sets(&cfg, app_period_ms);

        IoManager {
            cfg,
            opts,
            in_msg: vec![0u8; sizes.in_msg + 64],
            in_param: vec![0u8; sizes.in_param + 64],
            in_param_src: vec![0u8; sizes.in_param + 64],
            out_msg,
            obj_ctrl,
            sets,
            afdx,
            a429,
            can,
        }
    }

    /// Application view of the decoded input parameters.
    pub fn input_params(&self) -> &[u8] {
        &self.in_param
    }

    fn input_ctx(&self) -> InputCtx {
        InputCtx {
            endianness: self.opts.endianness,
            bool_is_integer: self.opts.bool_is_integer,
        }
    }

    fn output_ctx(&self) -> OutputCtx {
        OutputCtx {
            endianness: self.opts.endianness,
            bool_is_integer: self.opts.out_bool_is_integer,
        }
    }

    /// One periodic tick: read, decode, select, route, encode, write.
    pub fn step<A: Apex>(&mut self, apex: &mut A, out_param: &[u8]) {
        let cfg = self.cfg;
        let in_ctx = self.input_ctx();

        // 1. Transports. CAN decodes its parameters during the bus sweep.
        self.afdx.read_messages(&cfg, apex, &mut self.in_msg);
        self.a429.read_messages(&cfg, apex, &mut self.in_msg);
        self.can.read_messages(
            &cfg,
            apex,
            &mut self.in_param,
            &mut self.in_param_src,
            &in_ctx,
        );

        // 2. Single-source datasets go straight to the application.
        for (idx, ds) in cfg.input_datasets_single().enumerate() {
            process_single_dataset(
                &ds,
                &mut self.obj_ctrl[idx],
                &self.in_msg,
                &mut self.in_param,
                &mut self.in_param_src,
                &mut self.sets,
                &in_ctx,
            );
        }

        // 3. Multi-source datasets decode every source.
        let multi_base = cfg.header.afdx_input_dataset_count as usize;
        for (idx, ds) in cfg.input_datasets_multi().enumerate() {
            process_dataset_sources(
                &ds,
                &mut self.obj_ctrl[multi_base + idx],
                &self.in_msg,
                &mut self.in_param_src,
                &mut self.sets,
                &in_ctx,
            );
        }

        // 4.-5. Set-only validity objects, then the selection policies.
        select::calc_selection_objects(&cfg, &mut self.sets, &self.in_msg, in_ctx.endianness);
        select::perform_source_selection(
            &cfg,
            &mut self.sets,
            &self.in_param,
            self.opts.out_bool_is_integer,
        );

        // 6. Route the selected source of each multi dataset.
        for (idx, ds) in cfg.input_datasets_multi().enumerate() {
            let set = ds.validity_logic(0).source_set as usize;
            let selected = self
                .sets
                .get(set)
                .map(|s| s.selected_source)
                .unwrap_or(0)
                .min(MAX_SOURCES_PER_INPUT as u32 - 1);
            let valid = self.obj_ctrl[multi_base + idx][selected as usize].validity;
            copy_to_param_buffer(&ds, selected, &valid, &mut self.in_param, &self.in_param_src);
        }

        // 7. Output datasets: converters plus the dataset functional status.
        self.process_output_datasets(out_param);

        // 8. Transmit.
        let out_ctx = self.output_ctx();
        self.afdx.write_messages(&cfg, apex, &mut self.out_msg);
        self.can.write_messages(&cfg, apex, out_param, &out_ctx);
    }

    /// Walk the output datasets: run every mapping's converter, fold the
    /// worst parameter validity into the dataset FS byte, and fix up the SSM
    /// of embedded A429 words.
    fn process_output_datasets(&mut self, out_param: &[u8]) {
        let cfg = self.cfg;
        let te = self.opts.endianness;
        let out_ctx = self.output_ctx();

        for ds in cfg.output_datasets() {
            let embedded = ds.config.kind == OUTPUT_DS_EMBEDDED_A429;
            if embedded {
                te.write_u32(
                    &mut self.out_msg,
                    ds.config.ds_offset as usize,
                    ds.config.a429_label_id_sdi,
                );
            }

            let mut ds_fs = A664_FS_NO;
            for map in ds.maps() {
                convert_out::convert(
                    OutputKind::from_u16(map.signal.kind),
                    &map.mapping,
                    &map.signal,
                    out_param,
                    &mut self.out_msg,
                    &out_ctx,
                );
                let word = host_read_u32(out_param, map.mapping.val_offset as usize);
                ds_fs = worse_fs(ds_fs, param_fs(word));
            }

            self.out_msg[ds.config.fs_offset as usize] = ds_fs;

            if embedded {
                apply_a429_ssm(
                    &mut self.out_msg,
                    ds.config.ds_offset as usize,
                    SsmType::from_u32(ds.config.a429_ssm_type),
                    ds_fs,
                    te,
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input dataset passes
// ---------------------------------------------------------------------------

/// Run every configured converter of a dataset for every source.
fn do_input_mappings(
    ds: &DatasetRef,
    objs: &[ConfirmObject],
    in_msg: &[u8],
    in_param_src: &mut [u8],
    ctx: &InputCtx,
) {
    for par in ds.params() {
        for src in 0..par.mapping.num_sources as usize {
            let sig = par.signal(src);
            convert_in::convert(
                InputKind::from_u16(sig.kind),
                objs[src].validity.current,
                &par.mapping,
                &sig,
                in_msg,
                in_param_src,
                ctx,
            );
        }
    }
}

/// Copy the confirmed values of a dataset to the application buffer,
/// stamping the selected source into every validity word. Data bytes only
/// move while the stored parameter validity is VALID; a LOST or INVALID
/// confirmation advances the validity word and leaves the data in place.
fn copy_to_param_buffer(
    ds: &DatasetRef,
    selected: u32,
    valid: &Valid,
    in_param: &mut [u8],
    in_param_src: &[u8],
) {
    for par in ds.params() {
        let sig = par.signal(selected as usize);
        let len = (par.mapping.par_size as usize / 8).max(1);
        let app = par.mapping.par_offset as usize;

        if valid.confirmed.state == DataState::Init {
            // Nothing confirmed yet: expose zeroed data with the INIT word.
            in_param[app..app + len].fill(0);
            let mut v = valid.confirmed;
            v.selected_source = selected as u8 + 1;
            v.write(in_param, par.mapping.val_offset as usize);
        } else if valid.confirmed.state == valid.current.state {
            let mut v = Validity::read(in_param_src, sig.val_offset as usize);
            if v.state == DataState::Valid {
                let src = sig.par_offset as usize;
                in_param[app..app + len].copy_from_slice(&in_param_src[src..src + len]);
            }
            v.selected_source = selected as u8 + 1;
            v.write(in_param, par.mapping.val_offset as usize);
        }
    }
}

/// Single-source dataset: evaluate, decode, confirm, and copy through.
fn process_single_dataset(
    ds: &DatasetRef,
    objs: &mut [ConfirmObject; MAX_SOURCES_PER_INPUT],
    in_msg: &[u8],
    in_param: &mut [u8],
    in_param_src: &mut [u8],
    sets: &mut [SelectionSetState],
    ctx: &InputCtx,
) {
    match ds.header.num_sources {
        0 => {
            // Internal parameter: status is always valid.
            if let Some(par) = ds.params().next() {
                Validity::normal_op().write(in_param_src, par.signal(0).val_offset as usize);
            }
        }
        1 => {
            select::get_source_validity(
                |s| ds.validity_logic(s),
                1,
                in_msg,
                objs,
                sets,
                ctx.endianness,
            );
            do_input_mappings(ds, objs, in_msg, in_param_src, ctx);
            confirm_all(&mut objs[..1]);
            let valid = objs[0].validity;
            copy_to_param_buffer(ds, 0, &valid, in_param, in_param_src);
        }
        _ => {}
    }
}

/// Multi-source dataset, evaluation half: per-source validity, decode, and
/// confirmation. Routing waits for source selection.
fn process_dataset_sources(
    ds: &DatasetRef,
    objs: &mut [ConfirmObject; MAX_SOURCES_PER_INPUT],
    in_msg: &[u8],
    in_param_src: &mut [u8],
    sets: &mut [SelectionSetState],
    ctx: &InputCtx,
) {
    let n = ds.header.num_sources as usize;
    select::get_source_validity(
        |s| ds.validity_logic(s),
        n,
        in_msg,
        objs,
        sets,
        ctx.endianness,
    );
    do_input_mappings(ds, objs, in_msg, in_param_src, ctx);
    confirm_all(&mut objs[..n]);
}

// ---------------------------------------------------------------------------
// Output dataset functional status
// ---------------------------------------------------------------------------

fn fs_rank(fs: u8) -> u8 {
    match fs {
        A664_FS_ND => 3,
        A664_FS_NCD => 2,
        A664_FS_FT => 1,
        _ => 0,
    }
}

/// ND > NCD > FT > NO.
fn worse_fs(a: u8, b: u8) -> u8 {
    if fs_rank(b) > fs_rank(a) {
        b
    } else {
        a
    }
}

/// FS contribution of one output parameter's validity word (a plain
/// interface-state word written by the application).
fn param_fs(validity_word: u32) -> u8 {
    const NORMALOP: u32 = IfState::NormalOp as u32;
    const TEST: u32 = IfState::Test as u32;
    const NCD: u32 = IfState::Ncd as u32;
    const OUT_OF_RANGE: u32 = IfState::OutOfRange as u32;
    match validity_word {
        NORMALOP => A664_FS_NO,
        TEST => A664_FS_FT,
        NCD | OUT_OF_RANGE => A664_FS_NCD,
        _ => A664_FS_ND,
    }
}

/// SSM bit pattern of an embedded A429 output word for a dataset FS.
fn apply_a429_ssm(out_msg: &mut [u8], off: usize, ssm: SsmType, ds_fs: u8, te: Endianness) {
    const SSM_NCD: u32 = 0x2000_0000;
    const SSM_FT: u32 = 0x4000_0000;
    const BNR_NO: u32 = 0x6000_0000;
    const DIS_FW: u32 = 0x6000_0000;

    let pattern = match (ds_fs, ssm) {
        (_, SsmType::None) => 0,
        // BNR failure warning is 00; BCD cannot encode FW and uses NCD.
        (A664_FS_ND, SsmType::Bnr) => 0,
        (A664_FS_ND, SsmType::Bcd) => SSM_NCD,
        (A664_FS_ND, SsmType::Dis) => DIS_FW,
        (A664_FS_NCD, _) => SSM_NCD,
        (A664_FS_FT, _) => SSM_FT,
        // Normal operation: BCD carries the sign instead, DIS NO is 00.
        (_, SsmType::Bnr) => BNR_NO,
        _ => 0,
    };

    let word = (te.read_u32(out_msg, off) & 0x9FFF_FFFF) | pattern;
    te.write_u32(out_msg, off, word);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_precedence() {
        // P8: ND > NCD > FT > NO.
        assert_eq!(worse_fs(A664_FS_NO, A664_FS_FT), A664_FS_FT);
        assert_eq!(worse_fs(A664_FS_FT, A664_FS_NCD), A664_FS_NCD);
        assert_eq!(worse_fs(A664_FS_NCD, A664_FS_ND), A664_FS_ND);
        assert_eq!(worse_fs(A664_FS_ND, A664_FS_NO), A664_FS_ND);
        assert_eq!(worse_fs(A664_FS_NO, A664_FS_NO), A664_FS_NO);
    }

    #[test]
    fn test_param_fs_projection() {
        assert_eq!(param_fs(IfState::NormalOp as u32), A664_FS_NO);
        assert_eq!(param_fs(IfState::Test as u32), A664_FS_FT);
        assert_eq!(param_fs(IfState::Ncd as u32), A664_FS_NCD);
        assert_eq!(param_fs(IfState::OutOfRange as u32), A664_FS_NCD);
        assert_eq!(param_fs(IfState::Unfresh as u32), A664_FS_ND);
        assert_eq!(param_fs(IfState::NoData as u32), A664_FS_ND);
    }

    #[test]
    fn test_a429_ssm_patterns() {
        let te = Endianness::native();
        let mut buf = vec![0u8; 8];

        te.write_u32(&mut buf, 0, 0xFFFF_FFFF);
        apply_a429_ssm(&mut buf, 0, SsmType::Bnr, A664_FS_NO, te);
        assert_eq!(te.read_u32(&buf, 0) & 0x6000_0000, 0x6000_0000);

        te.write_u32(&mut buf, 0, 0xFFFF_FFFF);
        apply_a429_ssm(&mut buf, 0, SsmType::Bnr, A664_FS_ND, te);
        assert_eq!(te.read_u32(&buf, 0) & 0x6000_0000, 0);

        te.write_u32(&mut buf, 0, 0);
        apply_a429_ssm(&mut buf, 0, SsmType::Dis, A664_FS_ND, te);
        assert_eq!(te.read_u32(&buf, 0), 0x6000_0000);

        // DIS normal operation sets nothing.
        te.write_u32(&mut buf, 0, 0xFFFF_FFFF);
        apply_a429_ssm(&mut buf, 0, SsmType::Dis, A664_FS_NO, te);
        assert_eq!(te.read_u32(&buf, 0) & 0x6000_0000, 0);

        te.write_u32(&mut buf, 0, 0);
        apply_a429_ssm(&mut buf, 0, SsmType::Bcd, A664_FS_NCD, te);
        assert_eq!(te.read_u32(&buf, 0), 0x2000_0000);
    }
}
