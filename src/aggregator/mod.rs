use std::sync::Arc;

use alloy::primitives::Address;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::adapters::{AdapterFactory, QuoteRequest, QuoteSource};
use crate::adapters::traits::min_out_with_slippage;
use crate::chain::abi;
use crate::config::{ChainSettings, QuoteSettings, VenuePolicy};
use crate::constants::is_native_token;
use crate::error::RebalanceError;
use crate::types::{ExecutionPlan, PlannedSwap, RoutedSwap, VenueQuote};

/// 멀티 벤더 견적 집계기
///
/// 계획된 스왑마다 활성 벤더들에 질의해 가격 영향 상한을 통과한 견적 중
/// 출력량이 가장 큰 것을 고른다. 스왑 하나라도 채우지 못하면 부분 실행
/// 없이 전체가 실패한다.
pub struct QuoteAggregator {
    factory: Arc<AdapterFactory>,
    settings: QuoteSettings,
}

impl QuoteAggregator {
    pub fn new(factory: Arc<AdapterFactory>, settings: QuoteSettings) -> Self {
        Self { factory, settings }
    }

    /// 실행 계획의 모든 스왑에 대해 최적 라우팅 계산
    pub async fn optimal_swaps(
        &self,
        plan: &ExecutionPlan,
        chain: &ChainSettings,
        account: Address,
    ) -> Result<Vec<RoutedSwap>, RebalanceError> {
        let adapters = self.factory.for_chain(chain);
        if adapters.is_empty() {
            return Err(RebalanceError::Configuration(format!(
                "No venues enabled for chain {}",
                chain.chain_id
            )));
        }

        let mut routed = Vec::new();

        for planned in &plan.swaps {
            let mut effective = planned.clone();

            // 실행 컨트랙트가 네이티브 value를 전달하지 못하는 체인에서는
            // 네이티브 출발 스왑 앞에 wrap 스텝을 합성하고 wrapped 토큰을 견적한다
            if !chain.supports_native_value && is_native_token(&planned.from_token) {
                routed.push(self.wrap_step(planned, chain));
                effective.from_token = chain.wrapped_native;
                debug!(
                    "🎁 Synthesized wrap step: {} native -> {:#x}",
                    planned.from_amount, chain.wrapped_native
                );
            }

            let request = QuoteRequest {
                chain_id: chain.chain_id,
                from_token: effective.from_token,
                to_token: effective.to_token,
                amount: effective.from_amount,
                slippage_bps: self.settings.slippage_bps,
                taker: account,
            };

            let quotes = match chain.venue_policy {
                VenuePolicy::QueryAll => self.query_all(&adapters, &request).await,
                VenuePolicy::PrimaryFallback => self.primary_fallback(&adapters, &request).await,
            };

            let best = self.select_best(quotes).ok_or_else(|| {
                RebalanceError::EconomicGate(format!(
                    "No acceptable quote for {:#x} -> {:#x} (impact ceiling {:.1}%)",
                    effective.from_token, effective.to_token, self.settings.price_impact_ceiling_pct
                ))
            })?;

            debug!(
                "🏆 Best quote via {}: {} -> {} (impact {:.2}%)",
                best.venue, best.from_amount, best.to_amount, best.price_impact_pct
            );

            routed.push(RoutedSwap {
                from_token: best.from_token,
                to_token: best.to_token,
                from_amount: best.from_amount,
                expected_out: best.to_amount,
                min_out: min_out_with_slippage(best.to_amount, self.settings.slippage_bps),
                venue: best.venue,
                call_target: best.call_target,
                call_data: best.call_data,
                native_value: best.native_value,
                price_impact_pct: best.price_impact_pct,
                is_wrap: false,
            });
        }

        Ok(routed)
    }

    /// wrap 스텝은 1:1 변환으로 간주하며 슬리피지 검사가 없다
    fn wrap_step(&self, planned: &PlannedSwap, chain: &ChainSettings) -> RoutedSwap {
        RoutedSwap {
            from_token: planned.from_token,
            to_token: chain.wrapped_native,
            from_amount: planned.from_amount,
            expected_out: planned.from_amount,
            min_out: planned.from_amount,
            venue: "wrap".to_string(),
            call_target: chain.wrapped_native,
            call_data: abi::encode_deposit(),
            native_value: planned.from_amount,
            price_impact_pct: 0.0,
            is_wrap: true,
        }
    }

    /// 모든 벤더에 동시 질의. 개별 실패는 경고로 격리된다.
    async fn query_all(
        &self,
        adapters: &[Arc<dyn QuoteSource>],
        request: &QuoteRequest,
    ) -> Vec<VenueQuote> {
        let futures = adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let request = request.clone();
            async move {
                match adapter.fetch_quote(&request).await {
                    Ok(quote) => Some(quote),
                    Err(e) => {
                        warn!("⚠️ Quote from {} failed: {}", adapter.name(), e);
                        None
                    }
                }
            }
        });

        join_all(futures).await.into_iter().flatten().collect()
    }

    /// 우선순위 순서로 시도, 수용 가능한 견적이 나오면 즉시 사용
    async fn primary_fallback(
        &self,
        adapters: &[Arc<dyn QuoteSource>],
        request: &QuoteRequest,
    ) -> Vec<VenueQuote> {
        for adapter in adapters {
            match adapter.fetch_quote(request).await {
                Ok(quote) if quote.price_impact_pct <= self.settings.price_impact_ceiling_pct => {
                    return vec![quote];
                }
                Ok(quote) => {
                    warn!(
                        "⚠️ {} quote over impact ceiling ({:.2}%), trying next venue",
                        adapter.name(),
                        quote.price_impact_pct
                    );
                }
                Err(e) => {
                    warn!("⚠️ {} failed, trying next venue: {}", adapter.name(), e);
                }
            }
        }
        Vec::new()
    }

    /// 공통 선택 규칙: 상한 초과 견적 제거 후 출력량이 엄격히 가장 큰 것.
    /// 동률이면 먼저 수집된 견적이 이긴다.
    fn select_best(&self, quotes: Vec<VenueQuote>) -> Option<VenueQuote> {
        let mut best: Option<VenueQuote> = None;
        for quote in quotes {
            if quote.price_impact_pct > self.settings.price_impact_ceiling_pct {
                debug!(
                    "Discarding {} quote: impact {:.2}% > ceiling {:.1}%",
                    quote.venue, quote.price_impact_pct, self.settings.price_impact_ceiling_pct
                );
                continue;
            }
            match &best {
                Some(current) if quote.to_amount <= current.to_amount => {}
                _ => best = Some(quote),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockQuoteSource;
    use crate::types::ExecutionPlan;
    use alloy::primitives::U256;
    use uuid::Uuid;

    fn chain(policy: VenuePolicy, supports_native: bool) -> ChainSettings {
        ChainSettings {
            chain_id: 1,
            name: "ethereum".into(),
            rpc_url: "http://localhost:8545".into(),
            price_endpoint: None,
            wrapped_native: Address::repeat_byte(0xcc),
            supports_native_value: supports_native,
            venues: vec!["mock-a".into(), "mock-b".into()],
            venue_policy: policy,
            execution_contract: None,
        }
    }

    fn plan_with_one_swap(from: Address, to: Address) -> ExecutionPlan {
        ExecutionPlan {
            strategy_id: Uuid::new_v4(),
            should_execute: true,
            reason: "drift over threshold".into(),
            drift_bps: 900,
            swaps: vec![PlannedSwap {
                from_token: from,
                to_token: to,
                from_amount: U256::from(1_000_000u64),
                reason: "overweight".into(),
            }],
        }
    }

    fn aggregator(adapters: Vec<Arc<dyn QuoteSource>>) -> QuoteAggregator {
        QuoteAggregator::new(
            Arc::new(AdapterFactory::with_adapters(adapters)),
            QuoteSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_selects_strictly_highest_output() {
        let a = MockQuoteSource::new("mock-a").with_rate(0.95, 1.0);
        let b = MockQuoteSource::new("mock-b").with_rate(0.99, 1.0);
        let agg = aggregator(vec![Arc::new(a), Arc::new(b)]);

        let plan = plan_with_one_swap(Address::repeat_byte(1), Address::repeat_byte(2));
        let swaps = agg
            .optimal_swaps(&plan, &chain(VenuePolicy::QueryAll, true), Address::ZERO)
            .await
            .unwrap();

        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].venue, "mock-b");
        assert_eq!(swaps[0].expected_out, U256::from(990_000u64));
    }

    #[tokio::test]
    async fn test_all_quotes_over_ceiling_fails_hard() {
        let a = MockQuoteSource::new("mock-a").with_rate(0.99, 5.0);
        let b = MockQuoteSource::new("mock-b").with_rate(0.98, 4.5);
        let agg = aggregator(vec![Arc::new(a), Arc::new(b)]);

        let plan = plan_with_one_swap(Address::repeat_byte(1), Address::repeat_byte(2));
        let result = agg
            .optimal_swaps(&plan, &chain(VenuePolicy::QueryAll, true), Address::ZERO)
            .await;

        assert!(matches!(result, Err(RebalanceError::EconomicGate(_))));
    }

    #[tokio::test]
    async fn test_failed_adapter_is_isolated() {
        let a = MockQuoteSource::new("mock-a").failing();
        let b = MockQuoteSource::new("mock-b").with_rate(0.97, 1.0);
        let agg = aggregator(vec![Arc::new(a), Arc::new(b)]);

        let plan = plan_with_one_swap(Address::repeat_byte(1), Address::repeat_byte(2));
        let swaps = agg
            .optimal_swaps(&plan, &chain(VenuePolicy::QueryAll, true), Address::ZERO)
            .await
            .unwrap();

        assert_eq!(swaps[0].venue, "mock-b");
    }

    #[tokio::test]
    async fn test_primary_fallback_prefers_declared_order() {
        // mock-a가 우선순위 1위이고 정상이면 더 좋은 mock-b 견적은 보지 않는다
        let a = MockQuoteSource::new("mock-a").with_rate(0.95, 1.0);
        let b = MockQuoteSource::new("mock-b").with_rate(0.99, 1.0);
        let agg = aggregator(vec![Arc::new(a), Arc::new(b)]);

        let plan = plan_with_one_swap(Address::repeat_byte(1), Address::repeat_byte(2));
        let swaps = agg
            .optimal_swaps(&plan, &chain(VenuePolicy::PrimaryFallback, true), Address::ZERO)
            .await
            .unwrap();

        assert_eq!(swaps[0].venue, "mock-a");
    }

    #[tokio::test]
    async fn test_primary_fallback_skips_failed_primary() {
        let a = MockQuoteSource::new("mock-a").failing();
        let b = MockQuoteSource::new("mock-b").with_rate(0.96, 1.0);
        let agg = aggregator(vec![Arc::new(a), Arc::new(b)]);

        let plan = plan_with_one_swap(Address::repeat_byte(1), Address::repeat_byte(2));
        let swaps = agg
            .optimal_swaps(&plan, &chain(VenuePolicy::PrimaryFallback, true), Address::ZERO)
            .await
            .unwrap();

        assert_eq!(swaps[0].venue, "mock-b");
    }

    #[tokio::test]
    async fn test_wrap_step_synthesized_for_native_source() {
        let a = MockQuoteSource::new("mock-a").with_rate(0.97, 1.0);
        let b = MockQuoteSource::new("mock-b").with_rate(0.96, 1.0);
        let agg = aggregator(vec![Arc::new(a), Arc::new(b)]);

        let native = crate::constants::native_token();
        let plan = plan_with_one_swap(native, Address::repeat_byte(2));
        let chain = chain(VenuePolicy::QueryAll, false);

        let swaps = agg.optimal_swaps(&plan, &chain, Address::ZERO).await.unwrap();

        assert_eq!(swaps.len(), 2);
        assert!(swaps[0].is_wrap);
        assert_eq!(swaps[0].to_token, chain.wrapped_native);
        assert_eq!(swaps[0].min_out, swaps[0].from_amount);
        // 가격이 매겨진 스왑은 wrapped 토큰에서 출발한다
        assert!(!swaps[1].is_wrap);
        assert_eq!(swaps[1].from_token, chain.wrapped_native);
    }

    #[tokio::test]
    async fn test_no_wrap_when_contract_supports_native() {
        let a = MockQuoteSource::new("mock-a").with_rate(0.97, 1.0);
        let b = MockQuoteSource::new("mock-b").with_rate(0.96, 1.0);
        let agg = aggregator(vec![Arc::new(a), Arc::new(b)]);

        let native = crate::constants::native_token();
        let plan = plan_with_one_swap(native, Address::repeat_byte(2));

        let swaps = agg
            .optimal_swaps(&plan, &chain(VenuePolicy::QueryAll, true), Address::ZERO)
            .await
            .unwrap();

        assert_eq!(swaps.len(), 1);
        assert!(!swaps[0].is_wrap);
        assert_eq!(swaps[0].from_token, native);
    }
}
