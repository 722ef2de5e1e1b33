//! Cycle-debounce confirmation state machines.
//!
//! Every monitored object (message, parameter source, selection lock) carries
//! a [`ConfirmObject`]: a current/last/confirmed validity triple plus a cycle
//! counter. A state change only reaches `confirmed` after it has held steady
//! for a full debounce window, with separate re-arm counts for entering VALID
//! (`limit_cycle_valid`) and for leaving it (`limit_cycle_invalid`).
//!
//! Cycle limits are `ceil(window_ms / app_period_ms) + 1`; the extra cycle is
//! there because the decrement happens before the zero check. A fresh object
//! starts at `cycle = 1`, forcing one initial unfresh transition.

use crate::types::{DataState, Validity, MSG_FRESH, MSG_UNFRESH};

/// Current / last / confirmed validity triple of one object.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid {
    pub current: Validity,
    pub last: Validity,
    pub confirmed: Validity,
}

/// Confirmation control object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmObject {
    pub limit_cycle_valid: u32,
    pub limit_cycle_invalid: u32,
    pub cycle: u32,
    pub new_data: bool,
    pub validity: Valid,
}

/// Number of cycles covering `window_ms` at the given period, rounded up,
/// plus one because the decrement precedes the check.
pub fn limit_cycles(window_ms: u32, app_period_ms: f32) -> u32 {
    (window_ms as f32 / app_period_ms + 0.99) as u32 + 1
}

impl ConfirmObject {
    /// Message-freshness variant: tracks only the `new_data` flag, no
    /// validity debounce.
    pub fn new_message(valid_time_ms: u32, invalid_time_ms: u32, app_period_ms: f32) -> Self {
        ConfirmObject {
            limit_cycle_valid: limit_cycles(valid_time_ms, app_period_ms),
            limit_cycle_invalid: limit_cycles(invalid_time_ms, app_period_ms),
            cycle: 1,
            new_data: false,
            validity: Valid::default(),
        }
    }

    /// Unconfirmed start: INIT/NODATA confirmed, one full debounce period
    /// before VALID can be exposed.
    pub fn new_unconfirmed(valid_time_ms: u32, invalid_time_ms: u32, app_period_ms: f32) -> Self {
        ConfirmObject {
            limit_cycle_valid: limit_cycles(valid_time_ms, app_period_ms),
            limit_cycle_invalid: limit_cycles(invalid_time_ms, app_period_ms),
            cycle: 1,
            new_data: false,
            validity: Valid {
                confirmed: Validity::init(),
                // If the first data is valid it is confirmed straight away.
                last: Validity::normal_op(),
                current: Validity::unfresh(),
            },
        }
    }

    /// Pre-confirmed start: VALID/NORMALOP throughout. Used for selection
    /// locks that must start unlocked.
    pub fn new_confirmed(valid_time_ms: u32, invalid_time_ms: u32, app_period_ms: f32) -> Self {
        ConfirmObject {
            limit_cycle_valid: limit_cycles(valid_time_ms, app_period_ms),
            limit_cycle_invalid: limit_cycles(invalid_time_ms, app_period_ms),
            cycle: 1,
            new_data: false,
            validity: Valid {
                confirmed: Validity::normal_op(),
                last: Validity::normal_op(),
                current: Validity::normal_op(),
            },
        }
    }

    /// Driver notification: a message arrived for this object this cycle.
    pub fn set_new_data(&mut self) {
        self.new_data = true;
    }

    /// Message-freshness tick. If data arrived, mark fresh and re-arm the
    /// countdown; otherwise count down and mark unfresh on expiry.
    pub fn confirm_freshness(&mut self, freshness: &mut u32) {
        if self.new_data {
            *freshness = MSG_FRESH;
            self.cycle = self.limit_cycle_invalid;
            self.new_data = false;
        } else if self.cycle > 0 {
            self.cycle -= 1;
            if self.cycle == 0 {
                *freshness = MSG_UNFRESH;
            }
        }
    }

    /// Validity debounce tick. An unchanged `current` counts down toward
    /// promotion to `confirmed`; a change reloads the counter from the limit
    /// matching the new state's direction.
    pub fn confirm(&mut self) {
        let v = &mut self.validity;
        if v.current.state == v.last.state {
            if self.cycle > 0 {
                self.cycle -= 1;
                if self.cycle == 0 {
                    v.confirmed = v.current;
                }
            }
        } else if v.current.state == DataState::Valid {
            self.cycle = self.limit_cycle_valid;
            v.last = v.current;
        } else {
            self.cycle = self.limit_cycle_invalid;
            v.last = v.current;
        }
    }
}

/// Run the validity debounce across a slice of objects (one per source).
pub fn confirm_all(objects: &mut [ConfirmObject]) {
    for obj in objects {
        obj.confirm();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IfState;

    #[test]
    fn test_limit_cycles_rounding() {
        assert_eq!(limit_cycles(0, 16.5), 1);
        assert_eq!(limit_cycles(32, 16.0), 3); // ceil(2.0)+1
        assert_eq!(limit_cycles(33, 16.0), 4); // ceil(2.06)+1
        assert_eq!(limit_cycles(100, 10.0), 11);
    }

    #[test]
    fn test_valid_confirmed_after_limit_cycles() {
        // P3: with limit_cycle_valid = L, confirmed == VALID iff k >= L ticks
        // of an unchanged VALID current.
        let mut obj = ConfirmObject::new_unconfirmed(32, 64, 16.0);
        let limit = obj.limit_cycle_valid;

        // First observation flips current to VALID: counter reloads.
        obj.validity.current = Validity::normal_op();
        obj.confirm();
        assert_eq!(obj.validity.confirmed.state, DataState::Init);

        for k in 1..=limit {
            obj.confirm();
            if k < limit {
                assert_eq!(obj.validity.confirmed.state, DataState::Init, "k={k}");
            } else {
                assert_eq!(obj.validity.confirmed.state, DataState::Valid);
                assert_eq!(obj.validity.confirmed.if_state, IfState::NormalOp);
            }
        }
    }

    #[test]
    fn test_lost_confirmed_after_invalid_limit() {
        // P4: from confirmed VALID, m ticks of LOST confirm iff m >= I.
        let mut obj = ConfirmObject::new_confirmed(32, 64, 16.0);
        let limit = obj.limit_cycle_invalid;

        obj.validity.current = Validity::unfresh();
        obj.confirm(); // reloads to limit_cycle_invalid
        for k in 1..=limit {
            obj.confirm();
            if k < limit {
                assert_eq!(obj.validity.confirmed.state, DataState::Valid, "k={k}");
            } else {
                assert_eq!(obj.validity.confirmed.state, DataState::Lost);
            }
        }
    }

    #[test]
    fn test_flapping_never_confirms() {
        let mut obj = ConfirmObject::new_unconfirmed(32, 64, 16.0);
        for _ in 0..20 {
            obj.validity.current = Validity::normal_op();
            obj.confirm();
            obj.validity.current = Validity::unfresh();
            obj.confirm();
        }
        assert_eq!(obj.validity.confirmed.state, DataState::Init);
    }

    #[test]
    fn test_message_freshness_tick() {
        let mut obj = ConfirmObject::new_message(32, 64, 16.0);
        let mut freshness = MSG_UNFRESH;

        obj.set_new_data();
        obj.confirm_freshness(&mut freshness);
        assert_eq!(freshness, MSG_FRESH);
        assert_eq!(obj.cycle, obj.limit_cycle_invalid);

        // Count down without data: unfresh only once the window elapses.
        for _ in 0..obj.limit_cycle_invalid - 1 {
            obj.confirm_freshness(&mut freshness);
            assert_eq!(freshness, MSG_FRESH);
        }
        obj.confirm_freshness(&mut freshness);
        assert_eq!(freshness, MSG_UNFRESH);

        // Recovery is immediate on the next receipt.
        obj.set_new_data();
        obj.confirm_freshness(&mut freshness);
        assert_eq!(freshness, MSG_FRESH);
    }

    #[test]
    fn test_initial_cycle_forces_unfresh_transition() {
        let mut obj = ConfirmObject::new_message(32, 64, 16.0);
        let mut freshness = MSG_FRESH;
        obj.confirm_freshness(&mut freshness);
        assert_eq!(freshness, MSG_UNFRESH);
    }
}
