//! Configuration types for the swapmatch server and its markets.

use std::net::SocketAddr;
use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, AssetId, DexError, Network, Result};

/// The canonical market name for a base/quote symbol pair, e.g. `dcr_btc`.
#[must_use]
pub fn market_name(base_symbol: &str, quote_symbol: &str) -> String {
    format!(
        "{}_{}",
        base_symbol.to_lowercase(),
        quote_symbol.to_lowercase()
    )
}

/// Per-market configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Market name, e.g. `dcr_btc`.
    pub name: String,
    pub base: AssetId,
    pub quote: AssetId,
    /// Smallest base-asset quantity any order may trade, in atoms.
    pub lot_size: u64,
    /// Smallest price increment for limit orders.
    pub rate_step: u64,
    /// Epoch window length.
    #[serde(default = "default_epoch_duration_ms")]
    pub epoch_duration_ms: u64,
    /// Multiplier of one lot's mid-gap worth setting the minimum quote
    /// quantity of a market buy.
    #[serde(default = "constants::default_market_buy_buffer")]
    pub market_buy_buffer: Decimal,
}

fn default_epoch_duration_ms() -> u64 {
    constants::DEFAULT_EPOCH_DURATION_MS
}

impl MarketConfig {
    /// # Errors
    /// Returns `Configuration` if any tunable is out of contract.
    pub fn validate(&self) -> Result<()> {
        if self.base == self.quote {
            return Err(DexError::Configuration(format!(
                "market {}: base and quote assets are identical",
                self.name
            )));
        }
        if self.lot_size == 0 {
            return Err(DexError::Configuration(format!(
                "market {}: zero lot size",
                self.name
            )));
        }
        if self.rate_step == 0 {
            return Err(DexError::Configuration(format!(
                "market {}: zero rate step",
                self.name
            )));
        }
        if self.epoch_duration_ms == 0 {
            return Err(DexError::Configuration(format!(
                "market {}: zero epoch duration",
                self.name
            )));
        }
        if self.market_buy_buffer < Decimal::ONE {
            return Err(DexError::Configuration(format!(
                "market {}: market-buy buffer {} below 1",
                self.name, self.market_buy_buffer
            )));
        }
        Ok(())
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    /// Address for the client comms listener.
    pub listen: SocketAddr,
    pub markets: Vec<MarketConfig>,
}

impl ServerConfig {
    /// # Errors
    /// Returns `Configuration` on an invalid or duplicate market.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for mkt in &self.markets {
            mkt.validate()?;
            if !seen.insert(mkt.name.clone()) {
                return Err(DexError::Configuration(format!(
                    "duplicate market {}",
                    mkt.name
                )));
            }
        }
        Ok(())
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl MarketConfig {
    /// A DCR/BTC-shaped market with a 1e8 lot and 1e4 rate step.
    #[must_use]
    pub fn test_market() -> Self {
        Self {
            name: "dcr_btc".into(),
            base: AssetId(42),
            quote: AssetId(0),
            lot_size: 100_000_000,
            rate_step: 10_000,
            epoch_duration_ms: 10_000,
            market_buy_buffer: constants::default_market_buy_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_name_is_lowercase() {
        assert_eq!(market_name("DCR", "BTC"), "dcr_btc");
    }

    #[test]
    fn valid_market_passes() {
        MarketConfig::test_market().validate().unwrap();
    }

    #[test]
    fn zero_lot_size_rejected() {
        let mut cfg = MarketConfig::test_market();
        cfg.lot_size = 0;
        assert!(matches!(
            cfg.validate(),
            Err(DexError::Configuration(_))
        ));
    }

    #[test]
    fn sub_unit_buffer_rejected() {
        let mut cfg = MarketConfig::test_market();
        cfg.market_buy_buffer = Decimal::new(99, 2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_markets_rejected() {
        let cfg = ServerConfig {
            network: Network::Regtest,
            data_dir: "/tmp/swapmatch".into(),
            listen: "127.0.0.1:17232".parse().unwrap(),
            markets: vec![MarketConfig::test_market(), MarketConfig::test_market()],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = MarketConfig::test_market();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MarketConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
