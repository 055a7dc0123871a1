//! Shared value types for the PV bridge.
//!
//! A process variable delivers either a number or a textual state (an enum
//! string, an alarm status, ...). Before the first update arrives a result
//! cell holds the `#N/A` sentinel, which the spreadsheet shows as-is.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text shown for a value that has not been delivered yet.
pub const NOT_AVAILABLE: &str = "#N/A";

/// A value carried by a process variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PvValue {
    Number(f64),
    Text(String),
    /// No value received yet.
    NotAvailable,
}

impl PvValue {
    pub fn is_available(&self) -> bool {
        !matches!(self, PvValue::NotAvailable)
    }

    /// Interpret the value as a float.
    ///
    /// Text is accepted when it parses as a float after trimming surrounding
    /// whitespace, so `"1.5"` and `" 2 "` are numeric while `"OPEN"` is not.
    /// The sentinel never converts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PvValue::Number(n) => Some(*n),
            PvValue::Text(s) => s.trim().parse::<f64>().ok(),
            PvValue::NotAvailable => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PvValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for PvValue {
    fn default() -> Self {
        PvValue::NotAvailable
    }
}

impl From<&str> for PvValue {
    fn from(s: &str) -> Self {
        PvValue::Text(s.to_string())
    }
}

impl From<String> for PvValue {
    fn from(s: String) -> Self {
        PvValue::Text(s)
    }
}

impl From<f64> for PvValue {
    fn from(n: f64) -> Self {
        PvValue::Number(n)
    }
}

impl From<f32> for PvValue {
    fn from(n: f32) -> Self {
        PvValue::Number(n as f64)
    }
}

impl From<i32> for PvValue {
    fn from(n: i32) -> Self {
        PvValue::Number(n as f64)
    }
}

impl From<i64> for PvValue {
    fn from(n: i64) -> Self {
        PvValue::Number(n as f64)
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Number(n) => write!(f, "{n}"),
            PvValue::Text(s) => write!(f, "{s}"),
            PvValue::NotAvailable => write!(f, "{NOT_AVAILABLE}"),
        }
    }
}

/// Point-in-time snapshot of a result cell, handed to every listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Name of the PV whose result cell produced the event.
    pub source: String,
    /// The cell's value at the time of the snapshot.
    pub value: PvValue,
    /// Number of accepted updates the cell had seen (0 = initial value).
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
}

impl ResultEvent {
    pub fn new(source: impl Into<String>, value: PvValue, seq: u64) -> Self {
        Self {
            source: source.into(),
            value,
            seq,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for ResultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {} (#{})", self.source, self.value, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_numeric_interpretation() {
        assert_eq!(PvValue::Number(1.5).as_f64(), Some(1.5));
        assert_eq!(PvValue::from("2.25").as_f64(), Some(2.25));
        assert_eq!(PvValue::from(" 3 ").as_f64(), Some(3.0));
        assert_eq!(PvValue::from("OPEN").as_f64(), None);
        assert_eq!(PvValue::from(NOT_AVAILABLE).as_f64(), None);
        assert_eq!(PvValue::NotAvailable.as_f64(), None);
    }

    #[test]
    fn test_text_and_availability() {
        assert_eq!(PvValue::from("OPEN").as_str(), Some("OPEN"));
        assert_eq!(PvValue::Number(1.0).as_str(), None);
        assert!(PvValue::Number(0.0).is_available());
        assert!(PvValue::from("").is_available());
        assert!(!PvValue::NotAvailable.is_available());
        assert!(!PvValue::default().is_available());
    }

    #[test]
    fn test_display() {
        assert_eq!(PvValue::Number(2.0).to_string(), "2");
        assert_eq!(PvValue::Number(0.5).to_string(), "0.5");
        assert_eq!(PvValue::from("CLOSED").to_string(), "CLOSED");
        assert_eq!(PvValue::NotAvailable.to_string(), "#N/A");
    }

    #[test]
    fn test_json_shape() {
        assert_eq!(serde_json::to_string(&PvValue::Number(1.25)).unwrap(), "1.25");
        assert_eq!(serde_json::to_string(&PvValue::from("OPEN")).unwrap(), "\"OPEN\"");
        assert_eq!(serde_json::to_string(&PvValue::NotAvailable).unwrap(), "null");

        let v: PvValue = serde_json::from_str("null").unwrap();
        assert_eq!(v, PvValue::NotAvailable);
        let v: PvValue = serde_json::from_str("\"RUN\"").unwrap();
        assert_eq!(v, PvValue::Text("RUN".into()));
    }

    #[test]
    fn test_event_json_fields() {
        let event = ResultEvent::new("PHY:TEST", PvValue::Number(2.0), 3);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "PHY:TEST");
        assert_eq!(json["value"], 2.0);
        assert_eq!(json["seq"], 3);
        assert!(json["timestamp"].is_string());
        assert_eq!(event.to_string(), "PHY:TEST = 2 (#3)");
    }
}
