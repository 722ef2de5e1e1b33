//! Priority-ordered source selection.
//!
//! Each selection set owns an ordered list of sources (index 0 = highest
//! priority) and one of three policies: LIC_PARAMETER (a lane-in-control
//! discrete with hysteresis), HEALTH_SCORE (count of valid parameters per
//! source, with a lock interval against flapping), and OBJECT_VALID (first
//! source whose own validity logic and lock interval are confirmed).
//!
//! The global sweep order per cycle is: datasets fill per-source validities
//! and health scores, [`calc_selection_objects`] confirms the set-only
//! validity objects, [`perform_source_selection`] picks a source per set, and
//! the dataset value pass then routes the chosen source to the application.

use crate::bytes::Endianness;
use crate::config::{
    Config, LicParamConfig, SelectionCriteria, SelectionSetConfig, SelectionSetRef, ValidityConfig,
    LIC_VALUE_EXACT,
};
use crate::confirm::{confirm_all, ConfirmObject};
use crate::convert_in::{get_u32, InputKind};
use crate::types::{DataState, IfState, Validity, MAX_SOURCES_PER_INPUT};
use crate::validity::check_source_validity;

/// Sentinel for "no candidate found yet"; never exposed to the application.
pub const NO_VALID_SOURCE: u32 = 0xFFFF_FFFF;

/// Dynamic state of one selection set.
#[derive(Debug, Clone)]
pub struct SelectionSetState {
    pub selected_source: u32,
    pub next_source: u32,
    pub health_score: [u32; MAX_SOURCES_PER_INPUT],
    /// Set-only validity confirmation (OBJECT_VALID).
    pub ctrl: [ConfirmObject; MAX_SOURCES_PER_INPUT],
    /// Lock-interval confirmation per source.
    pub lock: [ConfirmObject; MAX_SOURCES_PER_INPUT],
}

impl Default for SelectionSetState {
    fn default() -> Self {
        SelectionSetState {
            selected_source: 0,
            next_source: 0,
            health_score: [0; MAX_SOURCES_PER_INPUT],
            ctrl: [ConfirmObject::default(); MAX_SOURCES_PER_INPUT],
            lock: [ConfirmObject::default(); MAX_SOURCES_PER_INPUT],
        }
    }
}

/// Initialise the dynamic state of every selection set.
///
/// OBJECT_VALID sets start unconfirmed (their validity and lock must be
/// earned); every other multi-source policy starts with pre-confirmed locks
/// so the initial selection is free to move.
pub fn init_selection_sets(cfg: &Config, app_period_ms: f32) -> Vec<SelectionSetState> {
    let mut states = vec![SelectionSetState::default(); cfg.selection_set_count()];

    for set in cfg.selection_sets() {
        let state = &mut states[set.index];
        let n = set.config.nof_sources as usize;
        let lock_ms = set.config.source_health_value;

        match set.config.criteria() {
            SelectionCriteria::ObjectValid => {
                for src in 0..n {
                    let logic = set.validity_logic(src);
                    let cond = &logic.condition[0];
                    let (valid_ms, invalid_ms) = cfg.source_windows(cond.transport, cond.msg_idx);
                    state.ctrl[src] =
                        ConfirmObject::new_unconfirmed(valid_ms, invalid_ms, app_period_ms);
                    state.lock[src] = ConfirmObject::new_unconfirmed(lock_ms, lock_ms, app_period_ms);
                }
            }
            SelectionCriteria::One => {}
            _ => {
                for src in 0..n {
                    state.lock[src] = ConfirmObject::new_confirmed(lock_ms, lock_ms, app_period_ms);
                }
            }
        }
    }

    states
}

/// Evaluate the validity logic of every source of a dataset, storing the
/// result in the source confirmation objects and crediting the health score
/// of the owning set for each VALID source.
pub fn get_source_validity<F>(
    logic: F,
    num_sources: usize,
    msg: &[u8],
    ctrl: &mut [ConfirmObject],
    states: &mut [SelectionSetState],
    te: Endianness,
) where
    F: Fn(usize) -> ValidityConfig,
{
    let set = logic(0).source_set as usize;
    for src in 0..num_sources {
        let current = check_source_validity(msg, &logic(src), te);
        ctrl[src].validity.current = current;
        if current.state == DataState::Valid {
            if let Some(state) = states.get_mut(set) {
                state.health_score[src] += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LIC_PARAMETER
// ---------------------------------------------------------------------------

/// Check one LIC parameter (already decoded into the application buffer this
/// cycle) and update the candidate source, preferring the current selection.
fn check_lic_parameter(
    cur_source: u32,
    lic: &LicParamConfig,
    selected_source: u32,
    next_source: &mut u32,
    in_param: &[u8],
    out_bool_is_integer: bool,
) -> Validity {
    let mut validity = Validity::read(in_param, lic.val_offset as usize);

    if validity.if_state != IfState::NormalOp && validity.if_state != IfState::Test {
        validity.state = DataState::Invalid;
        return validity;
    }
    validity.state = DataState::Valid;

    let is_candidate = if lic.value_mode == LIC_VALUE_EXACT {
        let data = if InputKind::from_u16(lic.par_kind as u16) == InputKind::Boolean32
            && !out_bool_is_integer
        {
            in_param[lic.par_offset as usize] as u32
        } else {
            get_u32(in_param, lic.par_offset as usize)
        };
        data == lic.value_exp
    } else {
        true
    };

    // First candidate by priority wins, but the currently selected source is
    // preferred while it remains a candidate.
    if is_candidate && (*next_source == NO_VALID_SOURCE || cur_source == selected_source) {
        *next_source = cur_source;
    }

    validity
}

/// LIC selection across a set. Two-source decision table (generalised to N
/// by the same priority/hysteresis rule):
///
/// ```text
/// |   | CHA valid | value | CHB valid | value || selected |
/// | 1 | VALID     |   1   | VALID     |   0   || CHA      |
/// | 2 | VALID     |   1   | VALID     |   1   || previous |
/// | 3 | VALID     |   1   | INVALID   |   x   || CHA      |
/// | 4 | VALID     |   0   | VALID     |   0   || previous |
/// | 5 | VALID     |   0   | VALID     |   1   || CHB      |
/// | 6 | VALID     |   0   | INVALID   |   x   || CHB      |
/// | 7 | INVALID   |   x   | VALID     |   0   || CHA      |
/// | 8 | INVALID   |   x   | VALID     |   1   || CHB      |
/// | 9 | INVALID   |   x   | INVALID   |   x   || previous |
/// ```
fn perform_lic_selection(
    set: &SelectionSetRef,
    state: &mut SelectionSetState,
    in_param: &[u8],
    out_bool_is_integer: bool,
) {
    state.next_source = NO_VALID_SOURCE;
    let mut nof_invalid = 0u32;
    let mut first_invalid = NO_VALID_SOURCE;

    for src in 0..set.config.nof_sources {
        let lic = set.lic_param(src as usize);
        let validity = check_lic_parameter(
            src,
            &lic,
            state.selected_source,
            &mut state.next_source,
            in_param,
            out_bool_is_integer,
        );

        if validity.state != DataState::Valid {
            nof_invalid += 1;
            if first_invalid == NO_VALID_SOURCE {
                // Fallback when another source is valid but carries the
                // wrong value (rows 6 and 7).
                first_invalid = src;
            }
        }
    }

    if state.next_source == NO_VALID_SOURCE {
        if nof_invalid == 0 || nof_invalid == set.config.nof_sources {
            // All sources agree (all wrong value, or all invalid): keep the
            // previous selection (rows 4 and 9).
            if state.selected_source >= set.config.nof_sources {
                state.selected_source = 0;
            }
        } else {
            state.selected_source = first_invalid;
        }
    } else {
        state.selected_source = state.next_source;
    }
}

// ---------------------------------------------------------------------------
// HEALTH_SCORE
// ---------------------------------------------------------------------------

/// Re-arm a source's lock interval: it must now hold steady for the full
/// lock window before its confirmation reads VALID again.
fn start_lock(lock: &mut ConfirmObject) {
    lock.validity.last.state = DataState::Invalid;
    lock.validity.current.state = DataState::Valid;
    lock.validity.confirmed.state = DataState::Invalid;
}

fn clear_lock(lock: &mut ConfirmObject) {
    lock.validity.last.state = DataState::Valid;
    lock.validity.current.state = DataState::Valid;
    lock.validity.confirmed.state = DataState::Valid;
}

/// Health-score selection: highest score wins, ties to higher priority.
/// Moving down in priority is immediate; moving back up waits out the
/// candidate's lock interval. Scores reset every cycle.
fn perform_health_score_selection(cfg: &SelectionSetConfig, state: &mut SelectionSetState) {
    let n = cfg.nof_sources as usize;
    let mut highest = 0u32;
    // A blocked or scoreless cycle keeps the current selection.
    let mut next = state.selected_source;

    confirm_all(&mut state.lock[..n]);

    for src in 0..n {
        if state.health_score[src] > highest {
            highest = state.health_score[src];
            let src = src as u32;

            if src > state.selected_source {
                // Lower priority: switch immediately, and the displaced
                // source begins its lock period.
                next = src;
                start_lock(&mut state.lock[state.selected_source as usize]);
            } else if src < state.selected_source {
                if state.lock[src as usize].validity.confirmed.state == DataState::Valid {
                    next = src;
                }
            } else {
                next = src;
            }
        } else {
            start_lock(&mut state.lock[src]);
        }

        state.health_score[src] = 0;
    }

    state.selected_source = next;
    clear_lock(&mut state.lock[state.selected_source as usize]);
}

// ---------------------------------------------------------------------------
// OBJECT_VALID
// ---------------------------------------------------------------------------

/// First source by priority whose validity and lock interval are both
/// confirmed VALID; source 0 when none qualifies.
fn perform_object_valid_selection(cfg: &SelectionSetConfig, state: &mut SelectionSetState) {
    state.selected_source = NO_VALID_SOURCE;

    for src in 0..cfg.nof_sources as usize {
        if state.ctrl[src].validity.confirmed.state == DataState::Valid
            && state.lock[src].validity.confirmed.state == DataState::Valid
            && state.selected_source == NO_VALID_SOURCE
        {
            state.selected_source = src as u32;
        }
    }

    if state.selected_source == NO_VALID_SOURCE {
        state.selected_source = 0;
    }
}

// ---------------------------------------------------------------------------
// Cycle entry points
// ---------------------------------------------------------------------------

/// Evaluate and confirm the set-only validity objects of OBJECT_VALID sets.
pub fn calc_selection_objects(
    cfg: &Config,
    states: &mut [SelectionSetState],
    msg: &[u8],
    te: Endianness,
) {
    for set in cfg.selection_sets() {
        if set.config.criteria() != SelectionCriteria::ObjectValid {
            continue;
        }
        let state = &mut states[set.index];
        let n = set.config.nof_sources as usize;

        for src in 0..n {
            let current = check_source_validity(msg, &set.validity_logic(src), te);
            state.ctrl[src].validity.current = current;
            state.lock[src].validity.current = current;
        }
        confirm_all(&mut state.ctrl[..n]);
        confirm_all(&mut state.lock[..n]);
    }
}

/// Run the selection policy of every set. All sources of all sets are
/// evaluated every cycle so execution time stays constant.
pub fn perform_source_selection(
    cfg: &Config,
    states: &mut [SelectionSetState],
    in_param: &[u8],
    out_bool_is_integer: bool,
) {
    for set in cfg.selection_sets() {
        let state = &mut states[set.index];
        match set.config.criteria() {
            SelectionCriteria::LicParameter => {
                perform_lic_selection(&set, state, in_param, out_bool_is_integer);
            }
            SelectionCriteria::HealthScore => {
                perform_health_score_selection(&set.config, state);
            }
            SelectionCriteria::ObjectValid => {
                perform_object_valid_selection(&set.config, state);
            }
            SelectionCriteria::One => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::build::{ConfigBuilder, SelectionSetDef, SetSourcesDef};
    use crate::config::LicParamConfig;

    const EXP: u32 = 1;

    // In-param layout per source: value at 8*i, validity word at 8*i+4.
    fn lic_sources(n: usize) -> Vec<LicParamConfig> {
        (0..n)
            .map(|i| LicParamConfig {
                value_mode: LIC_VALUE_EXACT,
                value_exp: EXP,
                par_offset: (i * 8) as u32,
                val_offset: (i * 8 + 4) as u32,
                par_kind: 0,
            })
            .collect()
    }

    fn lic_blob(n: usize) -> Vec<u8> {
        let mut b = ConfigBuilder::new();
        b.selection_set(SelectionSetDef {
            criteria: SelectionCriteria::LicParameter,
            health_mode: 1,
            health_value_ms: 0,
            sources: SetSourcesDef::Lic(lic_sources(n)),
        });
        b.finish()
    }

    fn set_lic(in_param: &mut [u8], source: usize, valid: bool, value: u32) {
        in_param[source * 8..source * 8 + 4].copy_from_slice(&value.to_ne_bytes());
        let v = if valid {
            Validity::normal_op()
        } else {
            Validity::new(DataState::Invalid, IfState::NoData)
        };
        v.write(in_param, source * 8 + 4);
    }

    fn run_lic(prev: u32, a: (bool, u32), b: (bool, u32)) -> u32 {
        let blob = lic_blob(2);
        let cfg = Config::parse(&blob).unwrap();
        let mut states = init_selection_sets(&cfg, 16.0);
        states[0].selected_source = prev;

        let mut in_param = vec![0u8; 32];
        set_lic(&mut in_param, 0, a.0, a.1);
        set_lic(&mut in_param, 1, b.0, b.1);

        perform_source_selection(&cfg, &mut states, &in_param, true);
        states[0].selected_source
    }

    #[test]
    fn test_lic_nine_row_table() {
        // P5: the classic dual-source rule, for both previous selections.
        for prev in [0u32, 1] {
            assert_eq!(run_lic(prev, (true, 1), (true, 0)), 0, "row 1 prev {prev}");
            assert_eq!(run_lic(prev, (true, 1), (true, 1)), prev, "row 2 prev {prev}");
            assert_eq!(run_lic(prev, (true, 1), (false, 0)), 0, "row 3 prev {prev}");
            assert_eq!(run_lic(prev, (true, 0), (true, 0)), prev, "row 4 prev {prev}");
            assert_eq!(run_lic(prev, (true, 0), (true, 1)), 1, "row 5 prev {prev}");
            assert_eq!(run_lic(prev, (true, 0), (false, 0)), 1, "row 6 prev {prev}");
            assert_eq!(run_lic(prev, (false, 0), (true, 0)), 0, "row 7 prev {prev}");
            assert_eq!(run_lic(prev, (false, 0), (true, 1)), 1, "row 8 prev {prev}");
            assert_eq!(run_lic(prev, (false, 0), (false, 0)), prev, "row 9 prev {prev}");
        }
    }

    fn health_state(app_period_ms: f32, lock_ms: u32) -> (SelectionSetConfig, SelectionSetState) {
        let cfg = SelectionSetConfig {
            nof_sources: 2,
            criteria: 2,
            source_health_mode: 1,
            source_health_value: lock_ms,
            ..Default::default()
        };
        let mut state = SelectionSetState::default();
        for src in 0..2 {
            state.lock[src] = ConfirmObject::new_confirmed(lock_ms, lock_ms, app_period_ms);
        }
        (cfg, state)
    }

    #[test]
    fn test_health_score_downgrade_is_immediate() {
        let (cfg, mut state) = health_state(10.0, 100);

        state.health_score = [5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        perform_health_score_selection(&cfg, &mut state);
        assert_eq!(state.selected_source, 0);

        // Source 1 (lower priority) takes over immediately.
        state.health_score[0] = 1;
        state.health_score[1] = 6;
        perform_health_score_selection(&cfg, &mut state);
        assert_eq!(state.selected_source, 1);
    }

    #[test]
    fn test_health_score_upgrade_waits_for_lock() {
        // P6 / scenario 5: 100 ms lock at 10 ms period = 11-cycle lock.
        let (cfg, mut state) = health_state(10.0, 100);

        // Move selection down to source 1.
        state.health_score[0] = 1;
        state.health_score[1] = 6;
        perform_health_score_selection(&cfg, &mut state);
        assert_eq!(state.selected_source, 1);

        // Source 0 recovers the higher score: the switch back is deferred
        // until its lock interval has confirmed.
        let mut cycles_until_switch = 0;
        for _ in 0..40 {
            state.health_score[0] = 6;
            state.health_score[1] = 1;
            perform_health_score_selection(&cfg, &mut state);
            if state.selected_source == 0 {
                break;
            }
            cycles_until_switch += 1;
        }
        assert_eq!(state.selected_source, 0);
        assert!(
            cycles_until_switch >= 11,
            "switched after only {cycles_until_switch} cycles"
        );
    }

    #[test]
    fn test_health_score_tie_keeps_priority() {
        let (cfg, mut state) = health_state(10.0, 0);
        state.health_score[0] = 3;
        state.health_score[1] = 3;
        perform_health_score_selection(&cfg, &mut state);
        assert_eq!(state.selected_source, 0);
        // Scores reset after evaluation.
        assert_eq!(state.health_score[0], 0);
        assert_eq!(state.health_score[1], 0);
    }

    #[test]
    fn test_object_valid_first_eligible_and_fallback() {
        let cfg = SelectionSetConfig {
            nof_sources: 3,
            criteria: 3,
            ..Default::default()
        };
        let mut state = SelectionSetState::default();

        // No source eligible: invariant I4, source 0 is exposed.
        perform_object_valid_selection(&cfg, &mut state);
        assert_eq!(state.selected_source, 0);

        state.ctrl[1].validity.confirmed = Validity::normal_op();
        state.lock[1].validity.confirmed = Validity::normal_op();
        state.ctrl[2].validity.confirmed = Validity::normal_op();
        state.lock[2].validity.confirmed = Validity::normal_op();
        perform_object_valid_selection(&cfg, &mut state);
        assert_eq!(state.selected_source, 1);
    }
}
