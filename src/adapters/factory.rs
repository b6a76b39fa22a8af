use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ChainSettings, QuoteSettings};
use super::oneinch::OneInchAdapter;
use super::paraswap::ParaSwapAdapter;
use super::rate_limiter::RateLimiter;
use super::traits::QuoteSource;
use super::zeroex::ZeroExAdapter;

/// 1inch / ParaSwap가 지원하는 체인들
const ONEINCH_CHAINS: &[u64] = &[1, 10, 56, 137, 8453, 42161, 43114];
const PARASWAP_CHAINS: &[u64] = &[1, 10, 56, 137, 8453, 42161, 43114];

/// 설정에 따라 벤더 어댑터를 생성/보관하는 팩토리
pub struct AdapterFactory {
    adapters: HashMap<String, Arc<dyn QuoteSource>>,
}

impl AdapterFactory {
    pub fn new(settings: &QuoteSettings) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            settings.venue_min_interval_ms,
        )));

        let mut adapters: HashMap<String, Arc<dyn QuoteSource>> = HashMap::new();

        let oneinch = OneInchAdapter::new(
            settings.oneinch_api_key.clone(),
            ONEINCH_CHAINS.to_vec(),
            settings.timeout_secs,
            Arc::clone(&rate_limiter),
        );
        adapters.insert(oneinch.name().to_string(), Arc::new(oneinch));

        let zeroex = ZeroExAdapter::new(
            settings.zeroex_api_key.clone(),
            settings.timeout_secs,
            Arc::clone(&rate_limiter),
        );
        adapters.insert(zeroex.name().to_string(), Arc::new(zeroex));

        let paraswap = ParaSwapAdapter::new(
            PARASWAP_CHAINS.to_vec(),
            settings.timeout_secs,
            Arc::clone(&rate_limiter),
        );
        adapters.insert(paraswap.name().to_string(), Arc::new(paraswap));

        info!("🏭 Adapter factory ready with {} venues", adapters.len());

        Self { adapters }
    }

    /// 테스트용: 외부에서 만든 어댑터 셋으로 구성
    pub fn with_adapters(adapters: Vec<Arc<dyn QuoteSource>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|a| (a.name().to_string(), a))
                .collect(),
        }
    }

    /// 체인 설정에 선언된 순서대로 사용 가능한 어댑터 반환
    ///
    /// PrimaryFallback 정책에서는 이 순서가 곧 우선순위다.
    pub fn for_chain(&self, chain: &ChainSettings) -> Vec<Arc<dyn QuoteSource>> {
        let mut selected = Vec::new();
        for venue in &chain.venues {
            match self.adapters.get(venue) {
                Some(adapter) if adapter.supports_chain(chain.chain_id) => {
                    selected.push(Arc::clone(adapter));
                }
                Some(_) => {
                    warn!("⚠️ Venue {} does not support chain {}", venue, chain.chain_id);
                }
                None => {
                    warn!("⚠️ Unknown venue in config: {}", venue);
                }
            }
        }
        selected
    }

    /// 어댑터별 성공률 요약 (운영 로그용)
    pub fn metrics_summary(&self) -> String {
        let mut parts: Vec<String> = self
            .adapters
            .values()
            .map(|adapter| {
                let metrics = adapter.metrics();
                format!(
                    "{}: {}/{} ({:.0}%)",
                    adapter.name(),
                    metrics.successes(),
                    metrics.total(),
                    metrics.success_rate() * 100.0
                )
            })
            .collect();
        parts.sort();
        parts.join(", ")
    }
}
