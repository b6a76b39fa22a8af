use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use alloy::primitives::U256;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::config::GasSettings;
use crate::storage::StrategyStore;
use crate::types::GasSample;

#[derive(Debug, Clone, Copy)]
struct CachedGas {
    price: U256,
    fetched_at: Instant,
}

/// 체인별 가스 가격 오라클
///
/// 캐시와 이력 통계는 모든 잡이 공유하는 프로세스 전역 상태이며
/// DashMap으로 동시 접근에 안전하다.
pub struct GasOracle {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
    store: Arc<dyn StrategyStore>,
    settings: GasSettings,
    cache: DashMap<u64, CachedGas>,
}

impl GasOracle {
    pub fn new(
        clients: HashMap<u64, Arc<dyn ChainClient>>,
        store: Arc<dyn StrategyStore>,
        settings: GasSettings,
    ) -> Self {
        Self {
            clients,
            store,
            settings,
            cache: DashMap::new(),
        }
    }

    fn client(&self, chain_id: u64) -> Result<&Arc<dyn ChainClient>> {
        self.clients
            .get(&chain_id)
            .ok_or_else(|| anyhow!("No chain client for chain {}", chain_id))
    }

    /// 빠른 포함을 위한 승수가 적용된 현재 가스 가격 (wei)
    ///
    /// 승수가 >= 1.0이므로 반환값은 항상 원시 조회값 이상이다.
    pub async fn optimal_gas_price(&self, chain_id: u64) -> Result<U256> {
        if let Some(cached) = self.cache.get(&chain_id) {
            if cached.fetched_at.elapsed() < Duration::from_secs(self.settings.cache_ttl_secs) {
                return Ok(cached.price);
            }
        }

        let raw = self.client(chain_id)?.gas_price().await?;
        let multiplier_milli = (self.settings.multiplier * 1_000.0).round() as u64;
        let price = raw * U256::from(multiplier_milli) / U256::from(1_000u64);

        self.cache.insert(
            chain_id,
            CachedGas {
                price,
                fetched_at: Instant::now(),
            },
        );

        debug!(
            "⛽ Gas price for chain {}: raw {} -> adjusted {}",
            chain_id, raw, price
        );
        Ok(price)
    }

    /// 이 호출의 예상 가스 비용 (wei)
    pub async fn estimate_cost(&self, chain_id: u64, gas_limit: u64) -> Result<U256> {
        let price = self.optimal_gas_price(chain_id).await?;
        Ok(price * U256::from(gas_limit))
    }

    /// 현재 가스가 유리한지 판정
    ///
    /// 추적 윈도우 내 샘플의 평균 + (최대 - 평균) / 4 이하면 유리한 것으로 본다.
    /// 이력이 없으면 판단을 막지 않기 위해 유리한 것으로 취급한다.
    pub async fn is_gas_favorable(&self, chain_id: u64) -> Result<bool> {
        let since = Utc::now() - chrono::Duration::seconds(self.settings.favorability_window_secs as i64);
        let samples = self.store.gas_samples_since(chain_id, since).await?;

        if samples.is_empty() {
            debug!("No gas history for chain {}, treating as favorable", chain_id);
            return Ok(true);
        }

        let mean = samples.iter().map(|s| s.price_gwei).sum::<f64>() / samples.len() as f64;
        let max = samples.iter().map(|s| s.price_gwei).fold(f64::MIN, f64::max);
        let threshold = mean + (max - mean) / 4.0;

        let current = self.optimal_gas_price(chain_id).await?;
        let current_gwei = wei_to_gwei(current);

        debug!(
            "⛽ Favorability chain {}: current {:.1} gwei vs threshold {:.1} gwei",
            chain_id, current_gwei, threshold
        );

        Ok(current_gwei <= threshold)
    }

    /// 유리함 통계 전용 백그라운드 샘플러
    ///
    /// 샘플링 실패는 설정된 기본 가격으로 폴백하고 로그만 남긴다. 절대 전파하지 않는다.
    pub fn spawn_sampler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.settings.sample_interval_secs);
        info!("⛽ Gas sampler started (every {:?})", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        info!("⛽ Gas sampler shutting down");
                        return;
                    }
                }

                for (chain_id, client) in &self.clients {
                    let price_gwei = match client.gas_price().await {
                        Ok(price) => wei_to_gwei(price),
                        Err(e) => {
                            warn!(
                                "⚠️ Gas sample failed for chain {}: {} (using default {} gwei)",
                                chain_id, e, self.settings.default_gwei
                            );
                            self.settings.default_gwei as f64
                        }
                    };

                    let sample = GasSample {
                        chain_id: *chain_id,
                        price_gwei,
                        sampled_at: Utc::now(),
                    };
                    if let Err(e) = self.store.insert_gas_sample(sample).await {
                        warn!("⚠️ Failed to persist gas sample for chain {}: {}", chain_id, e);
                    }
                }
            }
        })
    }
}

fn wei_to_gwei(wei: U256) -> f64 {
    let gwei_milli = wei / U256::from(1_000_000u64);
    gwei_milli.to::<u128>() as f64 / 1_000.0
}
