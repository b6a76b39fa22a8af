use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use alloy::primitives::{Address, U256};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::types::VenueQuote;
use super::rate_limiter::RateLimiter;
use super::traits::{min_out_with_slippage, AdapterError, AdapterMetrics, QuoteRequest, QuoteSource};

/// ParaSwap 가격 조회 응답
///
/// priceRoute는 트랜잭션 빌드 요청에 통째로 되돌려 보내야 하므로
/// 원본 JSON을 그대로 보관하고 필요한 필드만 꺼내 읽는다.
#[derive(Debug, Clone, Deserialize)]
struct ParaSwapPrices {
    #[serde(rename = "priceRoute")]
    price_route: serde_json::Value,
}

impl ParaSwapPrices {
    fn dest_amount(&self) -> Option<&str> {
        self.price_route.get("destAmount").and_then(|v| v.as_str())
    }

    fn usd_field(&self, key: &str) -> Option<f64> {
        self.price_route
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
    }

    fn gas_cost(&self) -> Option<u64> {
        self.price_route
            .get("gasCost")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// ParaSwap 트랜잭션 빌드 응답
#[derive(Debug, Clone, Deserialize)]
struct ParaSwapTx {
    to: String,
    data: String,
    value: String,
}

/// ParaSwap 어댑터
///
/// ParaSwap은 가격 조회와 트랜잭션 빌드가 두 단계로 나뉜다.
pub struct ParaSwapAdapter {
    base_url: String,
    supported_chains: Vec<u64>,
    client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    metrics: AdapterMetrics,
}

impl ParaSwapAdapter {
    pub fn new(supported_chains: Vec<u64>, timeout_secs: u64, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            base_url: "https://apiv5.paraswap.io".to_string(),
            supported_chains,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            rate_limiter,
            metrics: AdapterMetrics::new(),
        }
    }

    async fn fetch_prices(&self, request: &QuoteRequest) -> Result<ParaSwapPrices, AdapterError> {
        let url = format!(
            "{}/prices?srcToken={:#x}&destToken={:#x}&amount={}&side=SELL&network={}&userAddress={:#x}",
            self.base_url, request.from_token, request.to_token, request.amount, request.chain_id, request.taker,
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::QuoteFailed {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))
    }

    async fn build_transaction(
        &self,
        request: &QuoteRequest,
        prices: &ParaSwapPrices,
        min_out: U256,
    ) -> Result<ParaSwapTx, AdapterError> {
        let url = format!(
            "{}/transactions/{}?ignoreChecks=true",
            self.base_url, request.chain_id
        );

        let body = json!({
            "srcToken": format!("{:#x}", request.from_token),
            "destToken": format!("{:#x}", request.to_token),
            "srcAmount": request.amount.to_string(),
            "destAmount": min_out.to_string(),
            "priceRoute": prices.price_route,
            "userAddress": format!("{:#x}", request.taker),
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::QuoteFailed {
                message: format!("HTTP {}: {}", status, text),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))
    }

    /// srcUSD/destUSD 차이에서 가격 영향 계산
    fn price_impact_pct(prices: &ParaSwapPrices) -> f64 {
        let src = prices.usd_field("srcUSD");
        let dest = prices.usd_field("destUSD");
        match (src, dest) {
            (Some(src), Some(dest)) if src > 0.0 => ((src - dest) / src * 100.0).max(0.0),
            _ => 0.0,
        }
    }
}

#[async_trait]
impl QuoteSource for ParaSwapAdapter {
    fn name(&self) -> &str {
        "paraswap"
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        self.supported_chains.contains(&chain_id)
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<VenueQuote, AdapterError> {
        if !self.supports_chain(request.chain_id) {
            return Err(AdapterError::UnsupportedChain {
                chain_id: request.chain_id,
            });
        }

        self.rate_limiter.acquire(self.name()).await;

        let result: Result<VenueQuote, AdapterError> = async {
            let prices = self.fetch_prices(request).await?;

            let dest_amount = prices
                .dest_amount()
                .ok_or_else(|| AdapterError::InvalidResponse("Missing destAmount".to_string()))?;
            let to_amount = U256::from_str_radix(dest_amount, 10)
                .map_err(|e| AdapterError::InvalidResponse(format!("Invalid destAmount: {}", e)))?;
            let min_out = min_out_with_slippage(to_amount, request.slippage_bps);

            let tx = self.build_transaction(request, &prices, min_out).await?;

            let call_target = tx
                .to
                .parse::<Address>()
                .map_err(|e| AdapterError::InvalidResponse(format!("Invalid tx.to: {}", e)))?;
            let call_data = hex::decode(tx.data.trim_start_matches("0x"))
                .map_err(|e| AdapterError::InvalidResponse(format!("Invalid calldata: {}", e)))?;

            Ok(VenueQuote {
                venue: self.name().to_string(),
                from_token: request.from_token,
                to_token: request.to_token,
                from_amount: request.amount,
                to_amount,
                price_impact_pct: Self::price_impact_pct(&prices),
                call_target,
                call_data,
                native_value: U256::from_str_radix(&tx.value, 10).unwrap_or(U256::ZERO),
                gas_estimate: prices.gas_cost().unwrap_or(300_000),
            })
        }
        .await;

        match result {
            Ok(quote) => {
                self.metrics.record_success();
                debug!(
                    "ParaSwap quote: {} {:#x} -> {} {:#x} (impact {:.2}%)",
                    quote.from_amount,
                    quote.from_token,
                    quote.to_amount,
                    quote.to_token,
                    quote.price_impact_pct
                );
                Ok(quote)
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }

    fn metrics(&self) -> &AdapterMetrics {
        &self.metrics
    }
}
