//! Small helpers shared by log statements

use std::time::Duration;

/// Format a duration rounded to about three significant digits.
///
/// `1.234567s` becomes `1.23s`, `35.1234ms` becomes `35.1ms`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();

    // Largest power-of-ten scale not above the duration, floored at 100ns
    let mut scale: u128 = 100 * 1_000_000_000;
    while scale > nanos && scale > 100 {
        scale /= 10;
    }

    let unit = scale / 100;
    let rounded = (nanos + unit / 2) / unit * unit;
    format!("{:?}", Duration::from_nanos(rounded as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_seconds() {
        assert_eq!(format_duration(Duration::from_nanos(1_234_567_890)), "1.23s");
    }

    #[test]
    fn rounds_millis() {
        assert_eq!(format_duration(Duration::from_nanos(35_123_456)), "35.1ms");
    }

    #[test]
    fn keeps_small_values() {
        assert_eq!(format_duration(Duration::from_nanos(42)), "42ns");
        assert_eq!(format_duration(Duration::ZERO), "0ns");
    }
}
