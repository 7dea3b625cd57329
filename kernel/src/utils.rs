//! Various utility functions/macros used throughout the kernel

use std::time::{SystemTime, UNIX_EPOCH};

/// convenient way to return an error if a condition isn't true
macro_rules! require {
    ( $cond:expr, $err:expr ) => {
        if !($cond) {
            return Err($err);
        }
    };
}

pub(crate) use require;

/// Current wall-clock time as milliseconds since the Unix epoch.
pub(crate) fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeltaResult, Error};

    fn checked(flag: bool) -> DeltaResult<u32> {
        require!(flag, Error::generic("nope"));
        Ok(7)
    }

    #[test]
    fn test_require() {
        assert_eq!(checked(true).unwrap(), 7);
        assert!(checked(false).is_err());
    }

    #[test]
    fn test_current_time_ms() {
        // Well after 2020-01-01 and stable across two calls
        let a = current_time_ms();
        let b = current_time_ms();
        assert!(a > 1_577_836_800_000);
        assert!(b >= a);
    }
}
