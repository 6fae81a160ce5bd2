use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeFrameError {
    #[error("Invalid amount for {:?}: {}", unit, message)]
    InvalidAmount {
        unit: TimeFrameUnit,
        message: String,
    },

    #[error("Invalid input: {}", message)]
    InvalidInput { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeFrameUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeFrameUnit {
    /// Short code used on the wire (`m`, `h`, `d`, `w`, `M`).
    pub const fn code(self) -> &'static str {
        match self {
            TimeFrameUnit::Minute => "m",
            TimeFrameUnit::Hour => "h",
            TimeFrameUnit::Day => "d",
            TimeFrameUnit::Week => "w",
            TimeFrameUnit::Month => "M",
        }
    }
}

/// Candle interval, e.g. `5m`, `1h`, `1d`.
///
/// Serialized as its wire string so it can sit directly in query params and config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeFrame {
    pub amount: u32,
    pub unit: TimeFrameUnit,
}

impl TimeFrame {
    pub fn new(amount: u32, unit: TimeFrameUnit) -> Result<Self, TimeFrameError> {
        Self::validate(amount, unit)?;
        Ok(Self { amount, unit })
    }

    pub fn minutes(amount: u32) -> Result<Self, TimeFrameError> {
        Self::new(amount, TimeFrameUnit::Minute)
    }

    pub fn hours(amount: u32) -> Result<Self, TimeFrameError> {
        Self::new(amount, TimeFrameUnit::Hour)
    }

    pub fn day() -> Self {
        Self {
            amount: 1,
            unit: TimeFrameUnit::Day,
        }
    }

    fn validate(amount: u32, unit: TimeFrameUnit) -> Result<(), TimeFrameError> {
        match unit {
            _ if amount == 0 => Err(TimeFrameError::InvalidAmount {
                unit,
                message: "amount must be at least 1".into(),
            }),
            TimeFrameUnit::Minute if amount > 59 => Err(TimeFrameError::InvalidAmount {
                unit,
                message: "Minute units can only be used with amounts between 1-59.".into(),
            }),
            TimeFrameUnit::Hour if amount > 23 => Err(TimeFrameError::InvalidAmount {
                unit,
                message: "Hour units can only be used with amounts 1-23".into(),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.code())
    }
}

impl FromStr for TimeFrame {
    type Err = TimeFrameError;

    /// Accepts `15m`, `15min`, `4h`, `1d`, `1w`, `1M`/`1mo`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TimeFrameError::InvalidInput {
                message: format!("missing unit in timeframe '{s}'"),
            })?;
        let (digits, unit) = s.split_at(split);
        let amount = if digits.is_empty() {
            1
        } else {
            digits.parse::<u32>().map_err(|e| TimeFrameError::InvalidInput {
                message: format!("invalid amount in timeframe '{s}': {e}"),
            })?
        };

        // `M` is month, `m` is minute: only the full words are case-insensitive.
        let unit = match unit {
            "M" => TimeFrameUnit::Month,
            "m" => TimeFrameUnit::Minute,
            other => match other.to_lowercase().as_str() {
                "min" | "minute" => TimeFrameUnit::Minute,
                "h" | "hr" | "hour" => TimeFrameUnit::Hour,
                "d" | "day" => TimeFrameUnit::Day,
                "w" | "wk" | "week" => TimeFrameUnit::Week,
                "mo" | "month" => TimeFrameUnit::Month,
                _ => {
                    return Err(TimeFrameError::InvalidInput {
                        message: format!("Invalid timeframe unit: {unit}"),
                    });
                }
            },
        };
        TimeFrame::new(amount, unit)
    }
}

impl TryFrom<String> for TimeFrame {
    type Error = TimeFrameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeFrame> for String {
    fn from(tf: TimeFrame) -> Self {
        tf.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeframe() {
        assert_eq!(
            "5m".parse::<TimeFrame>().unwrap(),
            TimeFrame {
                amount: 5,
                unit: TimeFrameUnit::Minute
            }
        );
        assert_eq!("15min".parse::<TimeFrame>().unwrap().to_string(), "15m");
        assert_eq!("4H".parse::<TimeFrame>().unwrap().to_string(), "4h");
        assert_eq!("1M".parse::<TimeFrame>().unwrap().unit, TimeFrameUnit::Month);
        assert_eq!("d".parse::<TimeFrame>().unwrap(), TimeFrame::day());

        assert!("60m".parse::<TimeFrame>().is_err()); // Minutes only up to 59
        assert!("0h".parse::<TimeFrame>().is_err());
        assert!("5x".parse::<TimeFrame>().is_err()); // Invalid unit
        assert!("15".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn serializes_as_wire_string() {
        let tf = TimeFrame::hours(1).unwrap();
        assert_eq!(serde_json::to_string(&tf).unwrap(), "\"1h\"");
        let back: TimeFrame = serde_json::from_str("\"1h\"").unwrap();
        assert_eq!(back, tf);
        assert!(serde_json::from_str::<TimeFrame>("\"1y\"").is_err());
    }
}
