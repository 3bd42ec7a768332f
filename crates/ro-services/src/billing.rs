//! Billing arithmetic
//!
//! All quantities are whole seconds. Elapsed time between two instants is
//! rounded to the nearest second for usage reports and rounded up for the
//! total call duration reported on STOP.

use chrono::{DateTime, Utc};

/// Elapsed seconds from `from` to `to`, rounded half away from zero
pub fn rounded_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let ms = (to - from).num_milliseconds();
    if ms >= 0 {
        (ms + 500) / 1000
    } else {
        -((-ms + 500) / 1000)
    }
}

/// Elapsed seconds from `from` to `to`, rounded up; never negative
pub fn ceil_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let ms = (to - from).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms + 999) / 1000
    }
}

/// Usage to report so that `billed + used` covers at least `elapsed`
///
/// Per-interval rounding can lose a second here and there; the drift is
/// added to the current report.
pub fn reconcile_usage(billed: i64, used: i64, elapsed: i64) -> i64 {
    if billed + used < elapsed {
        elapsed - billed
    } else {
        used
    }
}

/// Window covered by an initial grant once the call is answered
///
/// With a validity time, the seconds that already passed since the grant
/// are deducted from it and the window is the smaller of the two.
pub fn initial_window(reserved: i64, valid_for: i64, since_grant: i64) -> i64 {
    if valid_for > 0 {
        reserved.min((valid_for - since_grant).max(0))
    } else {
        reserved
    }
}

/// Window covered by an interim grant
pub fn interim_window(granted: i64, validity: i64) -> i64 {
    if validity > 0 {
        granted.min(validity)
    } else {
        granted
    }
}

/// Delay before the session timer fires for a grant window
///
/// Non-final grants fire `buffer` seconds early so the next request can be
/// answered before the window runs out. Final grants, and windows too
/// short to hold the buffer, fire at the end of the window.
pub fn timer_delay(window: i64, buffer: i64, is_final: bool) -> i64 {
    if !is_final && window > buffer {
        window - buffer
    } else {
        window.max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(base: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
        base + Duration::milliseconds(ms)
    }

    #[test]
    fn test_rounding() {
        let t0 = Utc::now();
        assert_eq!(rounded_secs(t0, at(t0, 1_499)), 1);
        assert_eq!(rounded_secs(t0, at(t0, 1_500)), 2);
        assert_eq!(rounded_secs(t0, at(t0, -1_500)), -2);
        assert_eq!(ceil_secs(t0, at(t0, 1_001)), 2);
        assert_eq!(ceil_secs(t0, at(t0, 3_000)), 3);
        assert_eq!(ceil_secs(t0, at(t0, -5_000)), 0);
    }

    #[test]
    fn test_reconcile_adds_drift() {
        assert_eq!(reconcile_usage(25, 24, 50), 25);
        assert_eq!(reconcile_usage(25, 25, 50), 25);
        assert_eq!(reconcile_usage(0, 0, 0), 0);
    }

    #[test]
    fn test_windows() {
        assert_eq!(initial_window(30, 60, 0), 30);
        assert_eq!(initial_window(30, 20, 5), 15);
        assert_eq!(initial_window(30, 20, 50), 0);
        assert_eq!(initial_window(30, 0, 50), 30);
        assert_eq!(interim_window(120, 60), 60);
        assert_eq!(interim_window(10, 0), 10);
    }

    #[test]
    fn test_timer_delay_buffer_rule() {
        assert_eq!(timer_delay(30, 5, false), 25);
        assert_eq!(timer_delay(10, 5, true), 10);
        assert_eq!(timer_delay(5, 5, false), 5);
        assert_eq!(timer_delay(3, 5, false), 3);
        assert_eq!(timer_delay(-4, 5, false), 0);
    }
}
