//! Server assembly: wires markets, the order router, the balancer, and
//! the swap coordinator together, and owns the driving threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use swapmatch_ingress::{AuthManager, CoinLocker, DexBalancer, FeeSource, MarketTunnel, OrderRouter};
use swapmatch_swap::{SwapCoordinator, DEFAULT_BROADCAST_TIMEOUT};
use swapmatch_types::{AssetId, BackedAsset, DexError, Result, ServerConfig};
use tracing::{info, warn};

use crate::archive::{Archive, ArchiveSwapSink};
use crate::market::Market;
use crate::notify::Feed;

/// A fee source backed by each asset's own `FeeRater` capability,
/// remembering the last good estimate.
struct BackendFeeSource {
    assets: HashMap<AssetId, BackedAsset>,
    last: std::sync::Mutex<HashMap<AssetId, u64>>,
}

impl FeeSource for BackendFeeSource {
    fn last_rate(&self, asset: AssetId) -> u64 {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rater) = self
            .assets
            .get(&asset)
            .and_then(|b| b.backend.fee_rater())
        {
            let rate = rater.fee_rate().min(
                self.assets
                    .get(&asset)
                    .map_or(u64::MAX, |b| b.asset.max_fee_rate),
            );
            if rate > 0 {
                last.insert(asset, rate);
            }
        }
        last.get(&asset).copied().unwrap_or(0)
    }
}

/// A running exchange server: markets, router, and swap coordinator.
pub struct Server {
    router: Arc<OrderRouter>,
    markets: HashMap<String, Arc<Market>>,
    swapper: Arc<SwapCoordinator>,
    archive: Arc<dyn Archive>,
    stop: Arc<AtomicBool>,
}

impl Server {
    /// Assemble a server from configuration and collaborators.
    ///
    /// # Errors
    /// Returns `Configuration` when a market references an asset with no
    /// registered backend, or on an invalid config.
    pub fn new(
        cfg: &ServerConfig,
        assets: HashMap<AssetId, BackedAsset>,
        auth: Arc<dyn AuthManager>,
        archive: Arc<dyn Archive>,
        feed: Arc<dyn Feed>,
        notifier: Arc<dyn swapmatch_swap::SwapNotifier>,
    ) -> Result<Self> {
        cfg.validate()?;

        let coin_locker = Arc::new(CoinLocker::new());
        let balancer = Arc::new(DexBalancer::new(assets.clone()));
        let swapper = Arc::new(SwapCoordinator::new(
            cfg.network,
            DEFAULT_BROADCAST_TIMEOUT,
            Arc::new(ArchiveSwapSink(Arc::clone(&archive))),
            notifier,
        ));

        let now = Utc::now();
        let mut markets: HashMap<String, Arc<Market>> = HashMap::new();
        for mkt_cfg in &cfg.markets {
            let base = assets.get(&mkt_cfg.base).ok_or_else(|| {
                DexError::Configuration(format!(
                    "market {}: no backend for base asset {}",
                    mkt_cfg.name, mkt_cfg.base
                ))
            })?;
            let quote = assets.get(&mkt_cfg.quote).ok_or_else(|| {
                DexError::Configuration(format!(
                    "market {}: no backend for quote asset {}",
                    mkt_cfg.name, mkt_cfg.quote
                ))
            })?;
            let market = Arc::new(Market::new(
                mkt_cfg.clone(),
                base.clone(),
                quote.clone(),
                Arc::clone(&coin_locker),
                Arc::clone(&auth),
                Arc::clone(&archive),
                Arc::clone(&feed),
                Arc::clone(&swapper),
                now,
            ));
            balancer.add_source(market.clone());
            markets.insert(mkt_cfg.name.clone(), market);
        }

        let tunnels: HashMap<String, Arc<dyn MarketTunnel>> = markets
            .iter()
            .map(|(name, m)| (name.clone(), m.clone() as Arc<dyn MarketTunnel>))
            .collect();
        let fee_source = Arc::new(BackendFeeSource {
            assets: assets.clone(),
            last: std::sync::Mutex::new(HashMap::new()),
        });
        let router = Arc::new(OrderRouter::new(
            auth,
            assets,
            tunnels,
            fee_source,
            balancer,
            coin_locker,
        ));

        // Restart recovery: live matches resume observation.
        match archive.active_matches() {
            Ok(live) => {
                if !live.is_empty() {
                    info!(count = live.len(), "resuming live swaps from archive");
                }
                swapper.resume(live, now);
            }
            Err(err) => warn!(%err, "failed to load live matches for recovery"),
        }

        Ok(Self {
            router,
            markets,
            swapper,
            archive,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn router(&self) -> Arc<OrderRouter> {
        Arc::clone(&self.router)
    }

    #[must_use]
    pub fn market(&self, name: &str) -> Option<Arc<Market>> {
        self.markets.get(name).cloned()
    }

    #[must_use]
    pub fn swapper(&self) -> Arc<SwapCoordinator> {
        Arc::clone(&self.swapper)
    }

    #[must_use]
    pub fn archive_healthy(&self) -> bool {
        self.archive.healthy()
    }

    /// Spawn the driving threads: one epoch loop per market, the
    /// funding-retry ticker, and the swap deadline ticker. Returns the
    /// join handles; call [`Self::shutdown`] to stop them.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (name, market) in &self.markets {
            let market = Arc::clone(market);
            let stop = Arc::clone(&self.stop);
            info!(market = %name, "starting epoch loop");
            handles.push(std::thread::spawn(move || market.run(&stop)));
        }
        {
            let q = self.router.latency_queue();
            let stop = Arc::clone(&self.stop);
            handles.push(std::thread::spawn(move || q.run(&stop)));
        }
        {
            let swapper = Arc::clone(&self.swapper);
            let stop = Arc::clone(&self.stop);
            handles.push(std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(std::time::Duration::from_millis(500));
                    swapper.tick(Utc::now());
                }
            }));
        }
        handles
    }

    /// Signal every driving thread to exit.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
