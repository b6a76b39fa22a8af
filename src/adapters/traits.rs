use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use alloy::primitives::{Address, U256};

use crate::types::VenueQuote;

/// 견적 어댑터 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Quote failed: {message}")]
    QuoteFailed { message: String },

    #[error("Unsupported chain: {chain_id}")]
    UnsupportedChain { chain_id: u64 },

    #[error("Insufficient liquidity for {token_in} -> {token_out}")]
    InsufficientLiquidity { token_in: Address, token_out: Address },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 벤더에 보내는 견적 요청
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub chain_id: u64,
    pub from_token: Address,
    pub to_token: Address,
    pub amount: U256,
    pub slippage_bps: u64,
    /// 스왑을 실행할 계정 (위임 계정)
    pub taker: Address,
}

/// 유동성 벤더 하나에 대한 균일 인터페이스
///
/// 어댑터 하나의 실패는 경고 로그로 격리되며 집계 실패로 번지지 않는다.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// 벤더 이름
    fn name(&self) -> &str;

    /// 체인 지원 여부
    fn supports_chain(&self, chain_id: u64) -> bool;

    /// 가격이 매겨진 스왑 견적 조회 (calldata 포함)
    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<VenueQuote, AdapterError>;

    /// 어댑터 성능 메트릭
    fn metrics(&self) -> &AdapterMetrics;
}

/// 어댑터 성능 메트릭 (동시 접근 안전)
#[derive(Debug, Default)]
pub struct AdapterMetrics {
    total_quotes: AtomicU64,
    successful_quotes: AtomicU64,
    failed_quotes: AtomicU64,
}

impl AdapterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.total_quotes.fetch_add(1, Ordering::Relaxed);
        self.successful_quotes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_quotes.fetch_add(1, Ordering::Relaxed);
        self.failed_quotes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total_quotes.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successful_quotes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failed_quotes.load(Ordering::Relaxed)
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.successes() as f64 / total as f64
    }
}

/// 슬리피지 적용 최소 출력량 계산
pub fn min_out_with_slippage(amount_out: U256, slippage_bps: u64) -> U256 {
    amount_out * U256::from(10_000 - slippage_bps) / U256::from(10_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counts() {
        let metrics = AdapterMetrics::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        assert_eq!(metrics.total(), 3);
        assert_eq!(metrics.successes(), 2);
        assert!((metrics.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_out_with_slippage() {
        let out = U256::from(10_000u64);
        assert_eq!(min_out_with_slippage(out, 50), U256::from(9_950u64));
        assert_eq!(min_out_with_slippage(out, 0), out);
    }
}
