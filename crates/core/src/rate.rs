//! Admission rates: a frequency of events per unit of time.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// The maximum frequency of some event, expressed as `freq` events per `per`.
///
/// A zero `Rate` (either field zero) admits no events and accrues no tokens.
/// Rates are immutable values; the bucket re-reads the rate on every take, so
/// the same bucket may legitimately be consulted at different rates over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rate {
    /// Number of events admitted per `per`. Doubles as the burst capacity.
    pub freq: u64,
    /// The period over which `freq` events are admitted.
    pub per: Duration,
}

/// Error parsing a `"freq:duration"` rate string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    /// The frequency portion is not an unsigned integer.
    #[error("invalid frequency {0:?}: expected an unsigned integer")]
    Freq(String),
    /// The duration portion is not a valid duration literal.
    #[error("invalid duration {0:?}: {1}")]
    Per(String, String),
}

impl Rate {
    /// Parses a rate from its `"freq:duration"` form, e.g. `"100:1s"`.
    ///
    /// A bare duration unit is shorthand for one of that unit (`"30:m"` is
    /// 30 per minute), and a string without a colon is a frequency with an
    /// implied period of one second (`"100"` is 100 per second).
    pub fn parse(s: &str) -> Result<Self, RateError> {
        let (freq, per) = match s.split_once(':') {
            Some((freq, per)) => (freq, per),
            None => (s, "1s"),
        };

        let freq = freq
            .parse::<u64>()
            .map_err(|_| RateError::Freq(freq.to_string()))?;

        let literal = match per {
            "ns" | "us" | "µs" | "ms" | "s" | "m" | "h" => format!("1{per}"),
            _ => per.to_string(),
        };
        let parsed = humantime::parse_duration(&literal.replace('µ', "u"))
            .map_err(|e| RateError::Per(per.to_string(), e.to_string()))?;

        Ok(Rate { freq, per: parsed })
    }

    /// Returns true if this rate admits no events.
    pub fn is_zero(&self) -> bool {
        self.freq == 0 || self.per.is_zero()
    }

    /// The interval between two admitted events.
    pub fn interval(&self) -> Duration {
        if self.freq == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.per.as_nanos() / self.freq as u128) as u64)
    }

    /// Converts an elapsed duration into the number of tokens accumulated
    /// over it at this rate.
    pub fn tokens(&self, d: Duration) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        let interval = self.interval();
        if interval.is_zero() {
            return 0.0;
        }
        d.as_nanos() as f64 / interval.as_nanos() as f64
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.freq, humantime::format_duration(self.per))
    }
}

impl FromStr for Rate {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rate::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_form() {
        assert_eq!(
            Rate::parse("30:1m").unwrap(),
            Rate { freq: 30, per: Duration::from_secs(60) }
        );
        assert_eq!(
            Rate::parse("100:1s").unwrap(),
            Rate { freq: 100, per: Duration::from_secs(1) }
        );
        assert_eq!(
            Rate::parse("5:250ms").unwrap(),
            Rate { freq: 5, per: Duration::from_millis(250) }
        );
    }

    #[test]
    fn parse_bare_unit_shorthand() {
        assert_eq!(
            Rate::parse("100:s").unwrap(),
            Rate { freq: 100, per: Duration::from_secs(1) }
        );
        assert_eq!(
            Rate::parse("2:h").unwrap(),
            Rate { freq: 2, per: Duration::from_secs(3600) }
        );
        assert_eq!(
            Rate::parse("7:µs").unwrap(),
            Rate { freq: 7, per: Duration::from_micros(1) }
        );
    }

    #[test]
    fn parse_missing_period_defaults_to_one_second() {
        assert_eq!(
            Rate::parse("50").unwrap(),
            Rate { freq: 50, per: Duration::from_secs(1) }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(Rate::parse(""), Err(RateError::Freq(_))));
        assert!(matches!(Rate::parse("abc:1s"), Err(RateError::Freq(_))));
        assert!(matches!(Rate::parse("-1:1s"), Err(RateError::Freq(_))));
        assert!(matches!(Rate::parse("10:wat"), Err(RateError::Per(_, _))));
        assert!(matches!(Rate::parse(":s"), Err(RateError::Freq(_))));
    }

    #[test]
    fn interval_divides_period_by_frequency() {
        let r = Rate { freq: 5, per: Duration::from_secs(1) };
        assert_eq!(r.interval(), Duration::from_millis(200));

        let zero = Rate::default();
        assert_eq!(zero.interval(), Duration::ZERO);
    }

    #[test]
    fn tokens_converts_elapsed_time() {
        let r = Rate { freq: 5, per: Duration::from_secs(1) };
        assert_eq!(r.tokens(Duration::from_secs(1)), 5.0);
        assert_eq!(r.tokens(Duration::from_millis(200)), 1.0);
        assert_eq!(r.tokens(Duration::from_millis(100)), 0.5);
        assert_eq!(r.tokens(Duration::ZERO), 0.0);
    }

    #[test]
    fn zero_rate_yields_no_tokens() {
        assert_eq!(Rate::default().tokens(Duration::from_secs(3600)), 0.0);
        let no_per = Rate { freq: 10, per: Duration::ZERO };
        assert!(no_per.is_zero());
        assert_eq!(no_per.tokens(Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn display_round_trips() {
        for s in ["30:1m", "100:1s", "5:250ms"] {
            let r = Rate::parse(s).unwrap();
            assert_eq!(Rate::parse(&r.to_string()).unwrap(), r);
        }
    }
}
