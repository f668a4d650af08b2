use std::{fmt, thread, time::Duration};

use rand::Rng;

pub const DEFAULT_MAX_RETRY: usize = 7;
pub const DEFAULT_MAX_OPEN_ATTEMPTS: usize = 3;
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(10);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(250);

/// Randomized delay between two attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: DEFAULT_BACKOFF_MIN,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl Backoff {
    /// No delay at all
    #[must_use]
    pub const fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// A delay drawn uniformly in `[min, max]`; bounds given in the wrong order are swapped
    #[must_use]
    pub fn delay(&self) -> Duration {
        let (low, high) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        if low == high {
            return low;
        }
        rand::rng().random_range(low..=high)
    }

    pub fn sleep(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// What the broker needs to know about the module and its retry policy
#[derive(Clone)]
pub struct BrokerParams {
    /// path of the PKCS#11 module
    pub module_path: String,
    /// user PIN; sessions are not logged in without one
    pub pin: Option<String>,
    /// attempts of a whole signing sequence
    pub max_retry: usize,
    /// session opening attempts within one signing attempt
    pub max_open_attempts: usize,
    pub backoff: Backoff,
}

impl BrokerParams {
    #[must_use]
    pub fn new(module_path: &str) -> Self {
        Self {
            module_path: module_path.to_owned(),
            pin: None,
            max_retry: DEFAULT_MAX_RETRY,
            max_open_attempts: DEFAULT_MAX_OPEN_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

impl fmt::Debug for BrokerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerParams")
            .field("module_path", &self.module_path)
            .field("pin", &self.pin.as_ref().map(|_| "****"))
            .field("max_retry", &self.max_retry)
            .field("max_open_attempts", &self.max_open_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Backoff, BrokerParams, DEFAULT_MAX_RETRY};

    #[test]
    fn backoff_delays_stay_within_bounds() {
        let backoff = Backoff {
            min: Duration::from_millis(5),
            max: Duration::from_millis(20),
        };
        for _ in 0..1000 {
            let delay = backoff.delay();
            assert!(delay >= backoff.min && delay <= backoff.max);
        }
        let reversed = Backoff {
            min: Duration::from_millis(20),
            max: Duration::from_millis(5),
        };
        let delay = reversed.delay();
        assert!(delay >= Duration::from_millis(5) && delay <= Duration::from_millis(20));
        assert_eq!(Backoff::none().delay(), Duration::ZERO);
    }

    #[test]
    fn the_pin_is_never_printed() {
        let mut params = BrokerParams::new("/usr/lib/softhsm/libsofthsm2.so");
        params.pin = Some("1234".to_owned());
        let debug = format!("{params:?}");
        assert!(!debug.contains("1234"));
        assert_eq!(params.max_retry, DEFAULT_MAX_RETRY);
    }
}
