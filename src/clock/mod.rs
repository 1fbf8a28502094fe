//! Monotonic time source and absolute-deadline sleeping.
//!
//! All sampling loops run against `CLOCK_MONOTONIC` so that wall-clock
//! adjustments (NTP slew, manual changes) never affect cadence. Steady-state
//! loops sleep to an *absolute* deadline: a long iteration shortens the
//! following sleep instead of accumulating drift.

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Returns the current monotonic clock value in nanoseconds.
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `clock_gettime(CLOCK_MONOTONIC, ...)` is thread-safe and does not
    // require any Rust-side invariants besides a valid pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } == 0 {
        (ts.tv_sec as u64)
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(ts.tv_nsec as u64)
    } else {
        0
    }
}

/// Returns the current monotonic clock value in seconds.
pub fn monotonic_s() -> f64 {
    monotonic_ns() as f64 * 1e-9
}

/// Suspends the calling thread until the absolute monotonic deadline passes.
///
/// A deadline already in the past returns immediately, which is what lets an
/// overrunning sampling iteration catch up instead of drifting.
pub fn sleep_until(deadline_ns: u64) {
    let ts = libc::timespec {
        tv_sec: (deadline_ns / NANOS_PER_SEC) as libc::time_t,
        tv_nsec: (deadline_ns % NANOS_PER_SEC) as libc::c_long,
    };
    // SAFETY: the timespec is fully initialized and the remainder pointer may
    // be null for TIMER_ABSTIME sleeps.
    unsafe {
        while libc::clock_nanosleep(
            libc::CLOCK_MONOTONIC,
            libc::TIMER_ABSTIME,
            &ts,
            std::ptr::null_mut(),
        ) == libc::EINTR
        {}
    }
}

/// Suspends the calling thread for a relative number of nanoseconds.
///
/// Used only by the warmup primer, where absolute timing is not critical.
pub fn sleep_ns(ns: u64) {
    let mut req = libc::timespec {
        tv_sec: (ns / NANOS_PER_SEC) as libc::time_t,
        tv_nsec: (ns % NANOS_PER_SEC) as libc::c_long,
    };
    let mut rem = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: both timespec values are fully initialized; on EINTR the
    // remainder describes the unslept portion and the retry resumes there.
    unsafe {
        while libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &req, &mut rem) == libc::EINTR {
            req = rem;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_is_nonzero_and_advances() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_monotonic_s_matches_ns_scale() {
        let ns = monotonic_ns();
        let s = monotonic_s();
        // Both reads happen within well under a second of each other.
        assert!((s - ns as f64 * 1e-9).abs() < 1.0);
    }

    #[test]
    fn test_sleep_until_waits_for_future_deadline() {
        let start = monotonic_ns();
        sleep_until(start + 5_000_000); // 5 ms
        let elapsed = monotonic_ns() - start;
        assert!(elapsed >= 5_000_000, "slept only {elapsed} ns");
    }

    #[test]
    fn test_sleep_until_past_deadline_returns_immediately() {
        let start = monotonic_ns();
        sleep_until(start.saturating_sub(1_000_000_000));
        let elapsed = monotonic_ns() - start;
        // Generous bound; the call must not block anywhere near a full tick.
        assert!(elapsed < 100_000_000, "past deadline blocked for {elapsed} ns");
    }

    #[test]
    fn test_sleep_ns_relative() {
        let start = monotonic_ns();
        sleep_ns(2_000_000); // 2 ms
        assert!(monotonic_ns() - start >= 2_000_000);
    }
}
