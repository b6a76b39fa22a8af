use alloy::primitives::Address;
use std::str::FromStr;

// 가중치 단위 (basis points)
pub const BPS_DENOMINATOR: u32 = 10_000;

// 가중치 합계 허용 오차 (bps)
pub const WEIGHT_SUM_TOLERANCE_BPS: u32 = 10;

// 기본 드리프트 임계값 (bps, 5%)
pub const DEFAULT_DRIFT_THRESHOLD_BPS: u32 = 500;

// 우선순위 티어 경계 (bps)
pub const HIGH_PRIORITY_DRIFT_BPS: u32 = 1_500;
pub const MEDIUM_PRIORITY_DRIFT_BPS: u32 = 800;

// 가격 영향 상한 기본값 (%)
pub const DEFAULT_PRICE_IMPACT_CEILING_PCT: f64 = 3.0;

// 기본 슬리피지 (bps)
pub const DEFAULT_SLIPPAGE_BPS: u64 = 50;

// 가스 관련 기본값
pub const DEFAULT_GAS_MULTIPLIER: f64 = 1.1;
pub const DEFAULT_GAS_CEILING_GWEI: u64 = 150;
pub const DEFAULT_GAS_PRICE_GWEI: u64 = 20;
pub const GAS_CACHE_TTL_SECS: u64 = 12;
pub const GAS_SAMPLE_INTERVAL_SECS: u64 = 10;
pub const GAS_FAVORABILITY_WINDOW_SECS: u64 = 3_600;

// 스케줄러 간격 (초)
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 300;

// 큐 재시도 기본값
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;

// MEV 랜덤 지연 상한 (ms)
pub const DEFAULT_MEV_MAX_DELAY_MS: u64 = 3_000;

// 외부 호출 타임아웃 (초)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

// 어댑터 최소 요청 간격 (ms)
pub const DEFAULT_VENUE_MIN_INTERVAL_MS: u64 = 200;

/// 애그리게이터 관례상 네이티브 자산을 나타내는 센티널 주소
pub const NATIVE_TOKEN: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

// Wrapped native (mainnet)
pub const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

/// 네이티브 자산 센티널 주소 반환
pub fn native_token() -> Address {
    Address::from_str(NATIVE_TOKEN).unwrap()
}

/// 주소가 네이티브 자산 센티널인지 확인
pub fn is_native_token(token: &Address) -> bool {
    *token == native_token() || *token == Address::ZERO
}

/// gwei -> wei 변환
pub fn gwei_to_wei(gwei: u64) -> alloy::primitives::U256 {
    alloy::primitives::U256::from(gwei) * alloy::primitives::U256::from(1_000_000_000u64)
}
