//! Currency context for realtime price streams.

use crate::CoreError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shortest accepted currency code (e.g. "TL" aliases some feeds use).
const MIN_CODE_LEN: usize = 2;
/// Longest accepted currency code.
const MAX_CODE_LEN: usize = 10;

/// Denomination that governs which ticks are accepted.
///
/// Codes are stored upper-case, so `"usd"` and `"USD"` name the same context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(CompactString);

impl Currency {
    /// Parse and normalize a currency code.
    pub fn new(code: &str) -> Result<Self, CoreError> {
        let trimmed = code.trim();
        let valid_len = (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&trimmed.len());
        if !valid_len || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(CompactString::from(trimmed.to_ascii_uppercase())))
    }

    /// Get the normalized code.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Check whether a raw code names this currency (case-insensitive).
    pub fn matches(&self, code: &str) -> bool {
        self.0.eq_ignore_ascii_case(code.trim())
    }
}

impl FromStr for Currency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0.into()
    }
}

impl AsRef<str> for Currency {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_case() {
        let usd = Currency::new("usd").unwrap();
        assert_eq!(usd.as_str(), "USD");
        assert_eq!(usd, Currency::new(" USD ").unwrap());
    }

    #[test]
    fn test_new_rejects_invalid_codes() {
        assert!(Currency::new("").is_err());
        assert!(Currency::new("U").is_err());
        assert!(Currency::new("US D").is_err());
        assert!(Currency::new("USD$").is_err());
        assert!(Currency::new("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let tr = Currency::new("TRY").unwrap();
        assert!(tr.matches("try"));
        assert!(tr.matches("TRY"));
        assert!(!tr.matches("USD"));
    }

    #[test]
    fn test_serde_as_plain_string() {
        let eur: Currency = serde_json::from_str("\"eur\"").unwrap();
        assert_eq!(eur.as_str(), "EUR");
        assert_eq!(serde_json::to_string(&eur).unwrap(), "\"EUR\"");
        assert!(serde_json::from_str::<Currency>("\"\"").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Currency::new("gbp").unwrap()), "GBP");
        assert_eq!("try".parse::<Currency>().unwrap().as_str(), "TRY");
    }
}
