//! Exit-code-to-[`crate::FilterResult`] mapping shared by [`crate::NullFilter`]
//! and [`crate::ExecutableFilter`] (spec §4.3): 0 is `Ok`; a small reserved
//! range means `Abandon` (and, on the client side, also sets `special`);
//! anything else non-zero is `Fail`.
//!
//! The source material leaves the exact boundaries of the "cancel" ranges
//! to "the per-variant constructors" (spec §9, Open Question #2) rather
//! than a single shared table; these are the ranges this implementation
//! settled on, named so call sites never spell out a magic number.

use std::ops::RangeInclusive;

use crate::result::{FilterOutcome, FilterResult};

/// Exit codes in this range abandon processing on a server-side filter
/// (pre-queue: MAIL/RCPT/DATA-time filters) and additionally request a
/// store rescan (`special`).
pub const SERVER_ABANDON_RANGE: RangeInclusive<i32> = 99..=102;

/// Exit codes in this range abandon processing on a client-side filter
/// (forwarding-time filters) and additionally request the forwarder stop
/// scanning for more work this pass (`special`).
pub const CLIENT_ABANDON_RANGE: RangeInclusive<i32> = 101..=103;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterSide {
    Server,
    Client,
}

/// Classifies a subprocess exit code per spec §4.3's table, given
/// already-extracted `<<response>>`/`<<reason>>` strings.
pub fn classify(
    side: FilterSide,
    code: i32,
    response: String,
    reason: String,
) -> FilterOutcome {
    if code == 0 {
        return FilterOutcome::ok();
    }
    let abandon_range = match side {
        FilterSide::Server => SERVER_ABANDON_RANGE,
        FilterSide::Client => CLIENT_ABANDON_RANGE,
    };
    if abandon_range.contains(&code) {
        return FilterOutcome {
            result: FilterResult::Abandon,
            special: true,
            response,
            reason,
            response_code: None,
        };
    }
    FilterOutcome {
        result: FilterResult::Fail,
        special: false,
        response,
        reason,
        response_code: Some(550),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_ok() {
        let o = classify(FilterSide::Server, 0, String::new(), String::new());
        assert_eq!(o.result, FilterResult::Ok);
    }

    #[test]
    fn server_abandon_range_sets_special() {
        let o = classify(FilterSide::Server, 100, "x".into(), "y".into());
        assert_eq!(o.result, FilterResult::Abandon);
        assert!(o.special);
    }

    #[test]
    fn out_of_range_nonzero_is_fail() {
        let o = classify(FilterSide::Server, 1, "blocked".into(), "policy".into());
        assert_eq!(o.result, FilterResult::Fail);
        assert_eq!(o.response_code, Some(550));
    }

    #[test]
    fn client_side_uses_its_own_range() {
        let o = classify(FilterSide::Client, 102, "x".into(), "y".into());
        assert_eq!(o.result, FilterResult::Abandon);
        let o2 = classify(FilterSide::Client, 99, "x".into(), "y".into());
        assert_eq!(o2.result, FilterResult::Fail);
    }
}
