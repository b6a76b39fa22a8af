use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use alloy::primitives::Address;
use tracing::{info, warn};

use crate::constants;

/// 체인별 벤더 선택 정책
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VenuePolicy {
    /// 모든 벤더에 동시 질의 후 최적 선택
    QueryAll,
    /// 선언된 우선순위 순서로 시도 (신뢰할 수 있는 벤더가 적은 체인용)
    PrimaryFallback,
}

/// 체인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    /// 가격 피드 엔드포인트 (단순 신선도 검사만 수행)
    pub price_endpoint: Option<String>,
    pub wrapped_native: Address,
    /// 실행 컨트랙트가 네이티브 value를 전달할 수 있는지 여부.
    /// false이면 네이티브 출발 스왑 앞에 wrap 스텝이 합성된다.
    #[serde(default)]
    pub supports_native_value: bool,
    /// 활성화된 벤더 이름들 (PrimaryFallback이면 우선순위 순서)
    pub venues: Vec<String>,
    #[serde(default = "default_venue_policy")]
    pub venue_policy: VenuePolicy,
    /// 리밸런싱 실행 진입점 컨트랙트
    pub execution_contract: Option<Address>,
}

fn default_venue_policy() -> VenuePolicy {
    VenuePolicy::QueryAll
}

/// 견적 수집 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSettings {
    #[serde(default = "default_impact_ceiling")]
    pub price_impact_ceiling_pct: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u64,
    /// 벤더당 최소 요청 간격 (ms)
    #[serde(default = "default_venue_min_interval_ms")]
    pub venue_min_interval_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    pub oneinch_api_key: Option<String>,
    pub zeroex_api_key: Option<String>,
}

fn default_impact_ceiling() -> f64 { constants::DEFAULT_PRICE_IMPACT_CEILING_PCT }
fn default_slippage_bps() -> u64 { constants::DEFAULT_SLIPPAGE_BPS }
fn default_venue_min_interval_ms() -> u64 { constants::DEFAULT_VENUE_MIN_INTERVAL_MS }
fn default_http_timeout_secs() -> u64 { constants::DEFAULT_HTTP_TIMEOUT_SECS }

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            price_impact_ceiling_pct: default_impact_ceiling(),
            slippage_bps: default_slippage_bps(),
            venue_min_interval_ms: default_venue_min_interval_ms(),
            timeout_secs: default_http_timeout_secs(),
            oneinch_api_key: None,
            zeroex_api_key: None,
        }
    }
}

/// 가스 오라클 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSettings {
    /// 빠른 포함을 위한 승수 (항상 >= 1.0)
    #[serde(default = "default_gas_multiplier")]
    pub multiplier: f64,
    /// 이 가격을 넘으면 실행을 중단하는 상한 (gwei)
    #[serde(default = "default_gas_ceiling_gwei")]
    pub ceiling_gwei: u64,
    /// 샘플링 실패 시 폴백 가격 (gwei)
    #[serde(default = "default_gas_price_gwei")]
    pub default_gwei: u64,
    #[serde(default = "default_gas_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_gas_sample_interval")]
    pub sample_interval_secs: u64,
    /// 유리함 통계의 추적 윈도우 (초)
    #[serde(default = "default_favorability_window")]
    pub favorability_window_secs: u64,
}

fn default_gas_multiplier() -> f64 { constants::DEFAULT_GAS_MULTIPLIER }
fn default_gas_ceiling_gwei() -> u64 { constants::DEFAULT_GAS_CEILING_GWEI }
fn default_gas_price_gwei() -> u64 { constants::DEFAULT_GAS_PRICE_GWEI }
fn default_gas_cache_ttl() -> u64 { constants::GAS_CACHE_TTL_SECS }
fn default_gas_sample_interval() -> u64 { constants::GAS_SAMPLE_INTERVAL_SECS }
fn default_favorability_window() -> u64 { constants::GAS_FAVORABILITY_WINDOW_SECS }

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            multiplier: default_gas_multiplier(),
            ceiling_gwei: default_gas_ceiling_gwei(),
            default_gwei: default_gas_price_gwei(),
            cache_ttl_secs: default_gas_cache_ttl(),
            sample_interval_secs: default_gas_sample_interval(),
            favorability_window_secs: default_favorability_window(),
        }
    }
}

/// 스케줄러 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_tick_interval() -> u64 { constants::DEFAULT_TICK_INTERVAL_SECS }
fn default_health_interval() -> u64 { constants::DEFAULT_HEALTH_INTERVAL_SECS }

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            health_interval_secs: default_health_interval(),
        }
    }
}

/// 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_consumers")]
    pub consumers: usize,
}

fn default_max_attempts() -> u32 { constants::DEFAULT_MAX_ATTEMPTS }
fn default_backoff_base() -> u64 { constants::DEFAULT_BACKOFF_BASE_SECS }
fn default_consumers() -> usize { 4 }

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            consumers: default_consumers(),
        }
    }
}

/// MEV 보호 선호도
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MevPreference {
    PrivateRelay,
    Intent,
    RandomDelay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MevSettings {
    #[serde(default = "default_mev_preference")]
    pub preference: MevPreference,
    pub relay_url: Option<String>,
    #[serde(default)]
    pub intent_enabled: bool,
    #[serde(default = "default_mev_max_delay")]
    pub max_delay_ms: u64,
}

fn default_mev_preference() -> MevPreference { MevPreference::RandomDelay }
fn default_mev_max_delay() -> u64 { constants::DEFAULT_MEV_MAX_DELAY_MS }

impl Default for MevSettings {
    fn default() -> Self {
        Self {
            preference: default_mev_preference(),
            relay_url: None,
            intent_enabled: false,
            max_delay_ms: default_mev_max_delay(),
        }
    }
}

/// 엔진 공통 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// 전략에 임계값이 없을 때 쓰는 기본 드리프트 임계값 (bps)
    #[serde(default = "default_drift_threshold")]
    pub default_drift_threshold_bps: u32,
    /// 시뮬레이션 모드: simulate까지만 수행하고 브로드캐스트하지 않음
    #[serde(default)]
    pub simulation_mode: bool,
    /// 이 엔진이 트랜잭션을 보내는 실행자 주소
    pub executor_address: Address,
}

fn default_drift_threshold() -> u32 { constants::DEFAULT_DRIFT_THRESHOLD_BPS }

/// 전체 설정 트리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub gas: GasSettings,
    #[serde(default)]
    pub quotes: QuoteSettings,
    #[serde(default)]
    pub mev: MevSettings,
    pub chains: Vec<ChainSettings>,
}

impl Config {
    /// TOML 설정 파일 로드
    pub fn load(path: &str) -> Result<Self> {
        info!("📋 Loading config from {}", path);
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 민감한 값은 환경 변수에서 덮어쓴다
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ONEINCH_API_KEY") {
            self.quotes.oneinch_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ZEROEX_API_KEY") {
            self.quotes.zeroex_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("MEV_RELAY_URL") {
            self.mev.relay_url = Some(url);
        }
        for chain in &mut self.chains {
            let var = format!("RPC_URL_{}", chain.chain_id);
            if let Ok(url) = std::env::var(&var) {
                chain.rpc_url = url;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("At least one chain must be configured");
        }
        if self.gas.multiplier < 1.0 {
            anyhow::bail!("Gas multiplier must be >= 1.0, got {}", self.gas.multiplier);
        }
        for chain in &self.chains {
            if chain.venues.is_empty() {
                warn!("⚠️ Chain {} has no venues enabled", chain.chain_id);
            }
        }
        Ok(())
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainSettings> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [engine]
        executor_address = "0x00000000000000000000000000000000000000aa"

        [[chains]]
        chain_id = 1
        name = "ethereum"
        rpc_url = "http://localhost:8545"
        wrapped_native = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
        venues = ["oneinch", "zeroex"]
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.engine.default_drift_threshold_bps, 500);
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.queue.max_attempts, 3);
        assert!((config.gas.multiplier - 1.1).abs() < f64::EPSILON);
        assert!((config.quotes.price_impact_ceiling_pct - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.mev.preference, MevPreference::RandomDelay);
        assert_eq!(config.chains[0].venue_policy, VenuePolicy::QueryAll);
        assert!(!config.chains[0].supports_native_value);
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].chain_id, 1);
    }

    #[test]
    fn test_multiplier_validation() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.gas.multiplier = 0.9;
        assert!(config.validate().is_err());
    }
}
