//! Canonical trading symbol.
//!
//! Every component of the engine speaks the canonical `BASE/QUOTE` form
//! (`BTC/USDT`). Raw inputs arrive in whatever shape the upstream produced
//! (`BTCUSDT`, `ETHUSDT:USDT`, `HFT-`, or a bare base like `FRAG`) and are
//! normalized exactly once, at the [`Symbol`] boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

/// Quote currencies recognized when splitting a concatenated pair.
///
/// The enumeration order is the detection order; no listed pair collides, so
/// longest-wins matching is not needed.
const QUOTE_CURRENCIES: [&str; 9] = [
    "USDT", "USDC", "BUSD", "FDUSD", "TUSD", "DAI", "TRY", "BTC", "ETH",
];

/// A canonical `BASE/QUOTE` symbol, upper case, venue suffixes stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Canonicalize an arbitrary symbol string.
    ///
    /// - venue suffixes after `:` are dropped (`ETHUSDT:USDT` → `ETH/USDT`)
    /// - trailing `-` markers are trimmed (`HFT-` → `HFT/USDT`)
    /// - already-slashed input is only upper-cased
    /// - concatenated pairs are split on a known quote currency
    /// - a bare base gets `/USDT` appended (`FRAG` → `FRAG/USDT`)
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidSymbol`] when nothing usable remains
    /// after stripping.
    pub fn parse(input: &str) -> Result<Self, ExchangeError> {
        let stripped = input
            .split(':')
            .next()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('-');

        if stripped.is_empty() {
            return Err(ExchangeError::InvalidSymbol(input.to_string()));
        }

        if stripped.contains('/') {
            return Ok(Self(stripped.to_uppercase()));
        }

        let upper = stripped.to_uppercase();
        for quote in QUOTE_CURRENCIES {
            if upper.ends_with(quote) && upper.len() > quote.len() {
                let base = upper[..upper.len() - quote.len()].trim_end_matches('-');
                if !base.is_empty() {
                    return Ok(Self(format!("{base}/{quote}")));
                }
            }
        }

        // No quote suffix matched: treat the input as a bare base currency.
        Ok(Self(format!("{upper}/USDT")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The symbol without the slash, as most exchange REST APIs expect it
    /// (`BTC/USDT` → `BTCUSDT`).
    #[must_use]
    pub fn to_pair(&self) -> String {
        self.0.replace('/', "")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ExchangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_concatenated_pair() {
        assert_eq!(Symbol::parse("BTCUSDT").unwrap().as_str(), "BTC/USDT");
        assert_eq!(Symbol::parse("ethusdc").unwrap().as_str(), "ETH/USDC");
    }

    #[test]
    fn strips_venue_suffix() {
        assert_eq!(Symbol::parse("ETHUSDT:USDT").unwrap().as_str(), "ETH/USDT");
    }

    #[test]
    fn trims_trailing_dash_and_defaults_quote() {
        assert_eq!(Symbol::parse("HFT-").unwrap().as_str(), "HFT/USDT");
    }

    #[test]
    fn bare_base_gets_usdt_quote() {
        assert_eq!(Symbol::parse("FRAG").unwrap().as_str(), "FRAG/USDT");
    }

    #[test]
    fn slashed_input_is_only_uppercased() {
        assert_eq!(Symbol::parse("btc/usdt").unwrap().as_str(), "BTC/USDT");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for raw in ["BTCUSDT", "ETHUSDT:USDT", "HFT-", "FRAG", "SOL/USDT"] {
            let once = Symbol::parse(raw).unwrap();
            let twice = Symbol::parse(once.as_str()).unwrap();
            assert_eq!(once, twice, "round-trip changed {raw}");
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("  ").is_err());
        assert!(Symbol::parse(":USDT").is_err());
        assert!(Symbol::parse("-").is_err());
    }

    #[test]
    fn pair_form_drops_slash() {
        assert_eq!(Symbol::parse("BTC/USDT").unwrap().to_pair(), "BTCUSDT");
    }

    #[test]
    fn deserializes_from_raw_string() {
        let symbol: Symbol = serde_json::from_str("\"BTCUSDT\"").unwrap();
        assert_eq!(symbol.as_str(), "BTC/USDT");
    }
}
