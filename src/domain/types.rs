use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Symbol of the cash pseudo-asset. Always the last asset of an observation.
pub const FIAT: &str = "fiat";

/// OHLCV candle for one trading pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl Candle {
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.open_time).unwrap_or_default()
    }
}

/// Trading symbol identifier
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn fiat() -> Self {
        Self(FIAT.to_string())
    }

    pub fn is_fiat(&self) -> bool {
        self.0 == FIAT
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
