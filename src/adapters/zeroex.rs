use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use alloy::primitives::{Address, U256};
use serde::Deserialize;
use tracing::debug;

use crate::types::VenueQuote;
use super::rate_limiter::RateLimiter;
use super::traits::{AdapterError, AdapterMetrics, QuoteRequest, QuoteSource};

/// 0x API 견적 응답
#[derive(Debug, Clone, Deserialize)]
struct ZeroExQuote {
    #[serde(rename = "buyAmount")]
    buy_amount: String,
    to: String,
    data: String,
    value: String,
    #[serde(rename = "estimatedPriceImpact")]
    estimated_price_impact: Option<String>,
    #[serde(rename = "estimatedGas")]
    estimated_gas: Option<String>,
}

/// 체인별 0x API 호스트
fn api_host(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://api.0x.org"),
        10 => Some("https://optimism.api.0x.org"),
        137 => Some("https://polygon.api.0x.org"),
        8453 => Some("https://base.api.0x.org"),
        42161 => Some("https://arbitrum.api.0x.org"),
        _ => None,
    }
}

/// 0x Protocol 어댑터
pub struct ZeroExAdapter {
    api_key: Option<String>,
    client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    metrics: AdapterMetrics,
}

impl ZeroExAdapter {
    pub fn new(api_key: Option<String>, timeout_secs: u64, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            rate_limiter,
            metrics: AdapterMetrics::new(),
        }
    }

    async fn fetch(&self, request: &QuoteRequest) -> Result<ZeroExQuote, AdapterError> {
        let host = api_host(request.chain_id).ok_or(AdapterError::UnsupportedChain {
            chain_id: request.chain_id,
        })?;

        let slippage = request.slippage_bps as f64 / 10_000.0;
        let url = format!(
            "{}/swap/v1/quote?sellToken={:#x}&buyToken={:#x}&sellAmount={}&takerAddress={:#x}&slippagePercentage={}&skipValidation=true",
            host, request.from_token, request.to_token, request.amount, request.taker, slippage,
        );

        let mut http_request = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("0x-api-key", api_key);
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

    fn convert(&self, quote: ZeroExQuote, request: &QuoteRequest) -> Result<VenueQuote, AdapterError> {
        let to_amount = U256::from_str_radix(&quote.buy_amount, 10)
            .map_err(|e| AdapterError::InvalidResponse(format!("Invalid buyAmount: {}", e)))?;

        let call_target = quote
            .to
            .parse::<Address>()
            .map_err(|e| AdapterError::InvalidResponse(format!("Invalid to: {}", e)))?;

        let call_data = hex::decode(quote.data.trim_start_matches("0x"))
            .map_err(|e| AdapterError::InvalidResponse(format!("Invalid calldata: {}", e)))?;

        let price_impact_pct = quote
            .estimated_price_impact
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(VenueQuote {
            venue: self.name().to_string(),
            from_token: request.from_token,
            to_token: request.to_token,
            from_amount: request.amount,
            to_amount,
            price_impact_pct,
            call_target,
            call_data,
            native_value: U256::from_str_radix(&quote.value, 10).unwrap_or(U256::ZERO),
            gas_estimate: quote
                .estimated_gas
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(250_000),
        })
    }
}

#[async_trait]
impl QuoteSource for ZeroExAdapter {
    fn name(&self) -> &str {
        "zeroex"
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        api_host(chain_id).is_some()
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<VenueQuote, AdapterError> {
        self.rate_limiter.acquire(self.name()).await;

        match self.fetch(request).await.and_then(|quote| self.convert(quote, request)) {
            Ok(quote) => {
                self.metrics.record_success();
                debug!(
                    "0x quote: {} {:#x} -> {} {:#x} (impact {:.2}%)",
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
