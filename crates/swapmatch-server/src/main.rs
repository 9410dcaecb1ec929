//! swapmatchd: the swapmatch server binary.
//!
//! The binary is thin scaffolding: it parses flags, configures logging,
//! validates the lock-time build tunables and the config file, and runs
//! the server with whatever asset backends the embedding build registers
//! via [`register_backends`]. Exit codes: 0 on clean shutdown, non-zero
//! on configuration error or fatal backend failure.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use swapmatch_server::{MemArchive, NullFeed, Server};
use swapmatch_types::{resolve_test_lock_times, AssetId, BackedAsset, Network, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: swapmatchd [options]
  --network <mainnet|testnet|regtest>   network to serve (default: mainnet)
  --data-dir <path>                     data directory (default: ./swapmatch-data)
  --listen <addr:port>                  comms listen address (default: 127.0.0.1:17232)
  --log <filter>                        log verbosity (default: info)
  --help                                print this help";

struct Flags {
    network: Network,
    data_dir: PathBuf,
    listen: SocketAddr,
    log: String,
}

fn parse_flags(args: &[String]) -> Result<Flags> {
    let mut flags = Flags {
        network: Network::Mainnet,
        data_dir: PathBuf::from("./swapmatch-data"),
        listen: "127.0.0.1:17232".parse().expect("static addr"),
        log: "info".into(),
    };
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = |name: &str| -> Result<&String> {
            it.next().with_context(|| format!("{name} requires a value"))
        };
        match arg.as_str() {
            "--network" => flags.network = value("--network")?.parse()?,
            "--data-dir" => flags.data_dir = PathBuf::from(value("--data-dir")?),
            "--listen" => flags.listen = value("--listen")?.parse().context("bad --listen")?,
            "--log" => flags.log = value("--log")?.clone(),
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown flag {other}\n{USAGE}"),
        }
    }
    Ok(flags)
}

/// The embedding point for asset backends. Wallet backends live outside
/// this workspace; a deployment build registers its chains here.
fn register_backends(_network: Network) -> HashMap<AssetId, BackedAsset> {
    HashMap::new()
}

fn load_config(flags: &Flags) -> Result<ServerConfig> {
    let path = flags.data_dir.join("swapmatch.json");
    if !path.exists() {
        return Ok(ServerConfig {
            network: flags.network,
            data_dir: flags.data_dir.clone(),
            listen: flags.listen,
            markets: Vec::new(),
        });
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut cfg: ServerConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    cfg.network = flags.network;
    cfg.listen = flags.listen;
    Ok(cfg)
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let flags = parse_flags(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&flags.log)),
        )
        .init();

    // Lock-time overrides must be sane before anything else runs; this
    // panics on an invalid build tunable.
    let (taker_lock, maker_lock) = resolve_test_lock_times();
    info!(
        version = swapmatch_types::constants::VERSION,
        network = %flags.network,
        taker_lock_secs = taker_lock.as_secs(),
        maker_lock_secs = maker_lock.as_secs(),
        "swapmatchd starting"
    );

    let cfg = load_config(&flags)?;
    cfg.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let assets = register_backends(flags.network);
    for mkt in &cfg.markets {
        if !assets.contains_key(&mkt.base) || !assets.contains_key(&mkt.quote) {
            bail!(
                "market {} configured but no backend registered for its assets",
                mkt.name
            );
        }
    }

    if cfg.markets.is_empty() {
        info!("no markets configured; nothing to serve");
        return Ok(());
    }

    // Collaborator stubs: a deployment wires its real auth layer, comms
    // feed, and relational archive here.
    let auth = unreachable_auth();
    let archive = std::sync::Arc::new(MemArchive::new());
    let feed = std::sync::Arc::new(NullFeed);
    let notifier = unreachable_notifier();

    let server = Server::new(&cfg, assets, auth, archive, feed, notifier)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let handles = server.start();
    info!(listen = %cfg.listen, markets = cfg.markets.len(), "serving");
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

// With no registered backends, no market can be configured, so these
// collaborator stubs can never be reached with live traffic.
fn unreachable_auth() -> std::sync::Arc<dyn swapmatch_ingress::AuthManager> {
    struct Closed;
    impl swapmatch_ingress::AuthManager for Closed {
        fn auth(
            &self,
            _user: &swapmatch_types::AccountId,
            _msg: &[u8],
            _sig: &[u8],
        ) -> swapmatch_types::Result<()> {
            Err(swapmatch_types::DexError::Signature("no auth layer".into()))
        }
        fn suspended(&self, _user: &swapmatch_types::AccountId) -> bool {
            true
        }
        fn send(
            &self,
            _user: &swapmatch_types::AccountId,
            _msg: swapmatch_types::msgs::Message,
        ) -> swapmatch_types::Result<()> {
            Ok(())
        }
        fn request_preimage(
            &self,
            _user: &swapmatch_types::AccountId,
            _order_id: swapmatch_types::OrderId,
            _deadline: std::time::Duration,
        ) -> Option<swapmatch_types::Preimage> {
            None
        }
        fn preimage_success(
            &self,
            _user: &swapmatch_types::AccountId,
            _t: chrono::DateTime<chrono::Utc>,
            _oid: swapmatch_types::OrderId,
        ) {
        }
        fn missed_preimage(
            &self,
            _user: &swapmatch_types::AccountId,
            _t: chrono::DateTime<chrono::Utc>,
            _oid: swapmatch_types::OrderId,
        ) {
        }
        fn record_cancel(
            &self,
            _user: &swapmatch_types::AccountId,
            _oid: swapmatch_types::OrderId,
            _target: swapmatch_types::OrderId,
            _t: chrono::DateTime<chrono::Utc>,
        ) {
        }
        fn record_completed_order(
            &self,
            _user: &swapmatch_types::AccountId,
            _oid: swapmatch_types::OrderId,
            _t: chrono::DateTime<chrono::Utc>,
        ) {
        }
        fn user_settling_limit(
            &self,
            _user: &swapmatch_types::AccountId,
            _lot_size: u64,
        ) -> u64 {
            0
        }
    }
    std::sync::Arc::new(Closed)
}

fn unreachable_notifier() -> std::sync::Arc<dyn swapmatch_swap::SwapNotifier> {
    struct Silent;
    impl swapmatch_swap::SwapNotifier for Silent {
        fn audit(
            &self,
            _user: &swapmatch_types::AccountId,
            _note: swapmatch_types::msgs::AuditNote,
        ) {
        }
        fn redemption(
            &self,
            _user: &swapmatch_types::AccountId,
            _note: swapmatch_types::msgs::RedemptionNote,
        ) {
        }
        fn revoke(
            &self,
            _user: &swapmatch_types::AccountId,
            _note: swapmatch_types::msgs::RevokeMatchNote,
        ) {
        }
        fn swap_failure(
            &self,
            _user: &swapmatch_types::AccountId,
            _match_id: swapmatch_types::MatchId,
        ) {
        }
    }
    std::sync::Arc::new(Silent)
}
