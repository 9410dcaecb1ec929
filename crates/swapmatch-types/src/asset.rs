//! Asset definitions and the backend capability surface.
//!
//! Wallet backends live outside this workspace. The server talks to them
//! through the narrow traits defined here: every backend implements
//! [`Backend`]; output-tracking (UTXO) assets additionally expose
//! [`OutputTracker`], account-based assets expose [`AccountBalancer`], and
//! fee-estimating assets expose [`FeeRater`]. Callers branch on the
//! capability accessors rather than on asset kind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoinId, DexError, Result};

const DEFAULT_LOCK_TIME_TAKER: Duration = Duration::from_secs(8 * 60 * 60);
const DEFAULT_LOCK_TIME_MAKER: Duration = Duration::from_secs(20 * 60 * 60);

// Custom locktime values for test networks, baked in at compile time:
//   SWAPMATCH_LOCKTIME_TAKER=10m SWAPMATCH_LOCKTIME_MAKER=20m cargo build
// Both client and server binaries must be built with the same values.
const TEST_LOCK_TIME_TAKER: Option<&str> = option_env!("SWAPMATCH_LOCKTIME_TAKER");
const TEST_LOCK_TIME_MAKER: Option<&str> = option_env!("SWAPMATCH_LOCKTIME_MAKER");

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Network flag passed to asset backends to signify which network to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// Simnet is an alias of Regtest.
pub const SIMNET: Network = Network::Regtest;

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
            Self::Regtest => write!(f, "simnet"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "regtest" | "regnet" | "simnet" => Ok(Self::Regtest),
            other => Err(DexError::Configuration(format!("unknown network {other}"))),
        }
    }
}

/// Parse a duration string of the form `90s`, `10m`, or `2h` (or a bare
/// integer, taken as seconds).
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (num, unit) = match s.chars().last()? {
        'h' => (&s[..s.len() - 1], 3600),
        'm' => (&s[..s.len() - 1], 60),
        's' => (&s[..s.len() - 1], 1),
        _ => (s, 1),
    };
    let n: u64 = num.parse().ok()?;
    Some(Duration::from_secs(n * unit))
}

/// Resolve the taker/maker lock times from the compile-time overrides.
///
/// # Panics
/// Panics if an override is present but does not parse to a non-zero
/// duration. The process must not start with broken lock times.
#[must_use]
pub fn resolve_test_lock_times() -> (Duration, Duration) {
    if TEST_LOCK_TIME_TAKER.is_none() && TEST_LOCK_TIME_MAKER.is_none() {
        return (DEFAULT_LOCK_TIME_TAKER, DEFAULT_LOCK_TIME_MAKER);
    }
    let taker = TEST_LOCK_TIME_TAKER
        .and_then(parse_duration)
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| {
            panic!("invalid value for SWAPMATCH_LOCKTIME_TAKER: {TEST_LOCK_TIME_TAKER:?}")
        });
    let maker = TEST_LOCK_TIME_MAKER
        .and_then(parse_duration)
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| {
            panic!("invalid value for SWAPMATCH_LOCKTIME_MAKER: {TEST_LOCK_TIME_MAKER:?}")
        });
    (taker, maker)
}

/// The taker's contract lock time for the given network. Mainnet uses the
/// constant value; test networks honor the compile-time override.
#[must_use]
pub fn lock_time_taker(network: Network) -> Duration {
    if network == Network::Mainnet {
        return DEFAULT_LOCK_TIME_TAKER;
    }
    resolve_test_lock_times().0
}

/// The maker's contract lock time for the given network.
#[must_use]
pub fn lock_time_maker(network: Network) -> Duration {
    if network == Network::Mainnet {
        return DEFAULT_LOCK_TIME_MAKER;
    }
    resolve_test_lock_times().1
}

// ---------------------------------------------------------------------------
// Asset metadata
// ---------------------------------------------------------------------------

/// A unit and its conversion factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denomination {
    pub unit: String,
    pub conversion_factor: u64,
}

/// Information about the units and available denominations for an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    /// The name of the asset's integral unit, e.g. satoshis, atoms, gwei.
    pub atomic_unit: String,
    /// The conventionally-used denomination.
    pub conventional: Denomination,
}

impl UnitInfo {
    /// Format an atomic quantity in conventional units.
    #[must_use]
    pub fn conventional_string(&self, v: u64) -> String {
        let factor = self.conventional.conversion_factor.max(1);
        // Assumes integer powers of 10.
        let prec = factor.ilog10() as usize;
        let whole = v / factor;
        let frac = v % factor;
        if prec == 0 {
            return whole.to_string();
        }
        format!("{whole}.{frac:0prec$}")
    }
}

/// The configurable asset variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: crate::AssetId,
    pub symbol: String,
    pub version: u32,
    /// The highest fee rate the server will budget for when computing
    /// required order funds, in atoms per byte (or gas-price equivalent).
    pub max_fee_rate: u64,
    /// Size in bytes of a swap contract transaction, per additional lot.
    pub swap_size: u64,
    /// Size in bytes of the first swap transaction, including funding-input
    /// overhead. Equal to `swap_size` for account-based assets.
    pub swap_size_base: u64,
    /// Size in bytes of a redemption. Account-based assets only.
    #[serde(default)]
    pub redeem_size: u64,
    /// Confirmations required on a swap contract before redemption.
    pub swap_conf: u32,
    pub unit_info: UnitInfo,
}

// ---------------------------------------------------------------------------
// Backend capability traits
// ---------------------------------------------------------------------------

/// An on-chain coin as reported by a backend.
pub trait Coin: fmt::Debug + Send + Sync {
    fn id(&self) -> &CoinId;
    /// Value of the coin in atomic units.
    fn value(&self) -> u64;
    /// The fee rate paid by the transaction that created this coin.
    fn fee_rate(&self) -> u64;
    /// Current confirmation count. May hit the node, so it carries the
    /// per-query deadline internally and can fail.
    fn confirmations(&self) -> Result<i64>;
}

/// A coin usable as order funding.
pub trait FundingCoin: Coin {
    /// Verify that the claimed pubkeys control this coin and that each
    /// signature signs `msg`.
    fn auth(&self, pubkeys: &[Vec<u8>], sigs: &[Vec<u8>], msg: &[u8]) -> Result<()>;
    /// Serialized size contribution of spending this coin in a swap tx.
    fn spend_size(&self) -> u32;
}

/// The surface every asset backend exposes to the server.
///
/// Capability accessors return `None` for backends that lack the
/// capability; callers branch on kind rather than downcasting.
pub trait Backend: Send + Sync {
    /// Validate a coin ID's encoding, returning a human-readable form.
    fn validate_coin_id(&self, coin_id: &CoinId) -> Result<String>;
    /// Whether the address is valid for this asset.
    fn check_address(&self, addr: &str) -> bool;
    /// UTXO-style assets that can look up funding outputs.
    fn output_tracker(&self) -> Option<&dyn OutputTracker> {
        None
    }
    /// Account-based assets that can report balances and verify account
    /// signatures.
    fn account_balancer(&self) -> Option<&dyn AccountBalancer> {
        None
    }
    /// Assets that report a current network fee rate.
    fn fee_rater(&self) -> Option<&dyn FeeRater> {
        None
    }
}

/// Funding-output lookup for UTXO-style assets.
pub trait OutputTracker: Send + Sync {
    /// Fetch a funding coin by ID. `timeout` bounds the node query; a
    /// deadline miss is `DexError::RequestTimeout`, an unknown coin is
    /// `DexError::CoinNotFound`; both are retryable in the router.
    fn funding_coin(
        &self,
        coin_id: &CoinId,
        redeem_script: &[u8],
        timeout: Duration,
    ) -> Result<Box<dyn FundingCoin>>;
}

/// Balance reporting for account-based assets.
pub trait AccountBalancer: Send + Sync {
    /// The account's current on-chain balance in atomic units.
    fn account_balance(&self, addr: &str) -> Result<u64>;
    /// Verify an account-key signature over `msg`.
    fn validate_signature(&self, addr: &str, pubkey: &[u8], msg: &[u8], sig: &[u8]) -> Result<()>;
}

/// Current network fee-rate estimation.
pub trait FeeRater: Send + Sync {
    fn fee_rate(&self) -> u64;
}

/// An asset paired with its live backend.
#[derive(Clone)]
pub struct BackedAsset {
    pub asset: Asset,
    pub backend: Arc<dyn Backend>,
}

impl fmt::Debug for BackedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackedAsset")
            .field("asset", &self.asset)
            .finish_non_exhaustive()
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
#[must_use]
pub fn test_utxo_asset() -> Asset {
    Asset {
        id: crate::AssetId(42),
        symbol: "dcr".into(),
        version: 0,
        max_fee_rate: 10,
        swap_size: 251,
        swap_size_base: 85,
        redeem_size: 0,
        swap_conf: 1,
        unit_info: UnitInfo {
            atomic_unit: "atoms".into(),
            conventional: Denomination {
                unit: "DCR".into(),
                conversion_factor: 100_000_000,
            },
        },
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
#[must_use]
pub fn test_account_asset() -> Asset {
    Asset {
        id: crate::AssetId(60),
        symbol: "eth".into(),
        version: 0,
        max_fee_rate: 200,
        swap_size: 135_000,
        swap_size_base: 135_000,
        redeem_size: 68_000,
        swap_conf: 8,
        unit_info: UnitInfo {
            atomic_unit: "gwei".into(),
            conventional: Denomination {
                unit: "ETH".into(),
                conversion_factor: 1_000_000_000,
            },
        },
    }
}
