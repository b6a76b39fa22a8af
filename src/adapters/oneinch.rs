use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use alloy::primitives::{Address, U256};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::VenueQuote;
use super::rate_limiter::RateLimiter;
use super::traits::{AdapterError, AdapterMetrics, QuoteRequest, QuoteSource};

/// 1inch 스왑 응답
#[derive(Debug, Clone, Deserialize)]
struct OneInchSwap {
    #[serde(rename = "toAmount")]
    to_amount: String,
    tx: OneInchTx,
}

#[derive(Debug, Clone, Deserialize)]
struct OneInchTx {
    to: String,
    data: String,
    value: String,
    gas: Option<u64>,
}

/// 1inch 견적 전용 응답 (트랜잭션 빌드 없음)
#[derive(Debug, Clone, Deserialize)]
struct OneInchQuote {
    #[serde(rename = "toAmount")]
    to_amount: String,
}

/// 소액 기준 견적 대비 체결률 저하에서 가격 영향(%)을 추정
///
/// 스왑 응답에는 가격 영향 필드가 없다. 전체 물량 체결률이 소액 기준
/// 체결률보다 얼마나 나쁜지가 곧 영향이다. 기준보다 좋으면 0으로 본다.
fn impact_from_reference(
    out: U256,
    amount: U256,
    reference_out: U256,
    reference_amount: U256,
) -> f64 {
    if reference_out.is_zero() || amount.is_zero() {
        return 0.0;
    }
    let scaled = out * reference_amount * U256::from(10_000u64);
    let denom = reference_out * amount;
    if denom.is_zero() {
        return 0.0;
    }
    let ratio_bps = (scaled / denom).min(U256::from(10_000u64));
    (10_000u64 - ratio_bps.to::<u64>()) as f64 / 100.0
}

/// 1inch 애그리게이터 어댑터
pub struct OneInchAdapter {
    base_url: String,
    api_key: Option<String>,
    supported_chains: Vec<u64>,
    client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    metrics: AdapterMetrics,
}

impl OneInchAdapter {
    pub fn new(
        api_key: Option<String>,
        supported_chains: Vec<u64>,
        timeout_secs: u64,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            base_url: "https://api.1inch.dev/swap/v5.2".to_string(),
            api_key,
            supported_chains,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            rate_limiter,
            metrics: AdapterMetrics::new(),
        }
    }

    async fn fetch_swap(&self, request: &QuoteRequest) -> Result<OneInchSwap, AdapterError> {
        let slippage_pct = request.slippage_bps as f64 / 100.0;
        let url = format!(
            "{}/{}/swap?src={:#x}&dst={:#x}&amount={}&from={:#x}&slippage={}&disableEstimate=true",
            self.base_url,
            request.chain_id,
            request.from_token,
            request.to_token,
            request.amount,
            request.taker,
            slippage_pct,
        );

        let mut http_request = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = http_request
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

    /// 가격 영향 추정용 소액 기준 견적
    async fn fetch_reference_out(
        &self,
        request: &QuoteRequest,
        reference_amount: U256,
    ) -> Result<U256, AdapterError> {
        let url = format!(
            "{}/{}/quote?src={:#x}&dst={:#x}&amount={}",
            self.base_url, request.chain_id, request.from_token, request.to_token, reference_amount,
        );

        let mut http_request = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = http_request
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

        let quote: OneInchQuote = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        U256::from_str_radix(&quote.to_amount, 10)
            .map_err(|e| AdapterError::InvalidResponse(format!("Invalid toAmount: {}", e)))
    }

    fn convert(&self, swap: OneInchSwap, request: &QuoteRequest) -> Result<VenueQuote, AdapterError> {
        let to_amount = U256::from_str_radix(&swap.to_amount, 10)
            .map_err(|e| AdapterError::InvalidResponse(format!("Invalid toAmount: {}", e)))?;

        let call_target = swap
            .tx
            .to
            .parse::<Address>()
            .map_err(|e| AdapterError::InvalidResponse(format!("Invalid tx.to: {}", e)))?;

        let call_data = hex::decode(swap.tx.data.trim_start_matches("0x"))
            .map_err(|e| AdapterError::InvalidResponse(format!("Invalid calldata: {}", e)))?;

        let native_value = U256::from_str_radix(&swap.tx.value, 10).unwrap_or(U256::ZERO);

        Ok(VenueQuote {
            venue: self.name().to_string(),
            from_token: request.from_token,
            to_token: request.to_token,
            from_amount: request.amount,
            to_amount,
            // 기준 견적과 비교해 fetch_quote에서 채운다
            price_impact_pct: 0.0,
            call_target,
            call_data,
            native_value,
            gas_estimate: swap.tx.gas.unwrap_or(250_000),
        })
    }
}

#[async_trait]
impl QuoteSource for OneInchAdapter {
    fn name(&self) -> &str {
        "oneinch"
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
            let swap = self.fetch_swap(request).await?;
            let mut quote = self.convert(swap, request)?;

            let reference_amount = request.amount / U256::from(100u64);
            if !reference_amount.is_zero() {
                self.rate_limiter.acquire(self.name()).await;
                match self.fetch_reference_out(request, reference_amount).await {
                    Ok(reference_out) => {
                        quote.price_impact_pct = impact_from_reference(
                            quote.to_amount,
                            request.amount,
                            reference_out,
                            reference_amount,
                        );
                    }
                    // 기준 견적 실패가 스왑 견적까지 버릴 이유는 아니다
                    Err(e) => warn!("⚠️ 1inch reference quote failed, impact unknown: {}", e),
                }
            }
            Ok(quote)
        }
        .await;

        match result {
            Ok(quote) => {
                self.metrics.record_success();
                debug!(
                    "1inch quote: {} {:#x} -> {} {:#x} (impact {:.2}%)",
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
