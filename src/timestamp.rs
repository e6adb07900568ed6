use std::{fmt, mem, time};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Monotonic timestamp consisting of a seconds and a microseconds component
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    /// Returns a timestamp representation
    ///
    /// # Arguments
    ///
    /// * `sec` - Seconds
    /// * `usec` - Microseconds
    ///
    /// # Example
    ///
    /// ```
    /// use dmacap::Timestamp;
    /// let ts = Timestamp::new(5, 5);
    /// ```
    pub fn new(sec: i64, usec: i64) -> Self {
        Timestamp { sec, usec }
    }

    /// Reads `CLOCK_MONOTONIC`
    pub fn now() -> Self {
        let mut ts: libc::timespec = unsafe { mem::zeroed() };
        // CLOCK_MONOTONIC cannot fail with a valid pointer
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }

        Timestamp {
            sec: ts.tv_sec as i64,
            usec: ts.tv_nsec as i64 / 1000,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let floating: f64 = self.sec as f64 + self.usec as f64 / 1_000_000.0;
        write!(f, "{} [s]", floating)
    }
}

impl From<time::Duration> for Timestamp {
    fn from(duration: time::Duration) -> Self {
        Timestamp::new(
            duration.as_secs() as i64,
            duration.subsec_micros() as i64,
        )
    }
}

impl From<Timestamp> for time::Duration {
    fn from(ts: Timestamp) -> Self {
        time::Duration::from_secs(ts.sec.max(0) as u64)
            .saturating_add(time::Duration::from_micros(ts.usec.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_conversion_keeps_microseconds() {
        let ts = Timestamp::from(time::Duration::from_micros(2_500_250));
        assert_eq!(ts, Timestamp::new(2, 500_250));
        assert_eq!(
            time::Duration::from(ts),
            time::Duration::from_micros(2_500_250)
        );
    }

    #[test]
    fn large_microsecond_counts_carry_into_seconds() {
        let ts = Timestamp::new(1, 5_000_000);
        assert_eq!(time::Duration::from(ts), time::Duration::from_secs(6));
        assert_eq!(
            time::Duration::from(Timestamp::new(-3, -1)),
            time::Duration::ZERO
        );
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(b >= a);
    }
}
