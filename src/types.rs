use serde::{Deserialize, Serialize};
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::constants::{HIGH_PRIORITY_DRIFT_BPS, MEDIUM_PRIORITY_DRIFT_BPS};

/// 토큰별 목표 비중
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenTarget {
    pub token: Address,
    /// 목표 비중 (bps, 전체 합 10000)
    pub target_weight_bps: u32,
}

/// 리밸런싱 전략 정의
///
/// 배포 이후에는 비중/주기 변경 시 재배포가 필요하다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub user_address: Address,
    pub chain_id: u64,
    /// 자금이 보관되는 위임 계정 (사용자 개인 지갑이 아님)
    pub delegated_account: Option<Address>,
    pub tokens: Vec<TokenTarget>,
    /// 리밸런싱 검사 주기 (초)
    pub rebalance_interval_secs: u64,
    /// 드리프트 임계값 (bps). None이면 엔진 기본값 사용
    pub drift_threshold_bps: Option<u32>,
    pub is_active: bool,
    pub is_deployed: bool,
    pub last_rebalance_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Strategy {
    /// 스케줄러가 검사 대상으로 삼을 수 있는 상태인지 확인
    pub fn is_schedulable(&self) -> bool {
        self.is_active && self.is_deployed && self.delegated_account.is_some()
    }

    /// 리밸런싱 주기가 경과했는지 확인
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_rebalance_at {
            Some(last) => {
                let elapsed = (now - last).num_seconds();
                elapsed >= 0 && elapsed as u64 >= self.rebalance_interval_secs
            }
            None => true,
        }
    }
}

/// 위임 상태
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DelegationStatus {
    Created,
    Active,
    Revoked,
}

/// 위임 계정이 실행자에게 부여한 리밸런싱 전용 권한
///
/// 실행 파이프라인에서는 읽기 전용이며, 생성/철회는 외부에서 일어난다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub strategy_id: Uuid,
    /// 권한을 부여한 위임 계정
    pub delegator: Address,
    /// 권한을 부여받은 실행자 주소
    pub executor: Address,
    pub status: DelegationStatus,
    /// 온체인 호출에 포함되는 권한 컨텍스트 (서명된 permission data)
    pub permission_context: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Delegation {
    pub fn is_active(&self) -> bool {
        self.status == DelegationStatus::Active
    }
}

/// 토큰 하나의 현재 포지션 (평가 시점 스냅샷)
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPosition {
    pub token: Address,
    pub balance: U256,
    pub decimals: u8,
    pub price_usd: f64,
    pub value_usd: f64,
    pub current_weight_bps: u32,
    pub target_weight_bps: u32,
}

impl TokenPosition {
    /// 목표 대비 편차 (bps, 절대값)
    pub fn deviation_bps(&self) -> u32 {
        self.current_weight_bps.abs_diff(self.target_weight_bps)
    }
}

/// 파생 포트폴리오 스냅샷
///
/// 매 평가마다 온체인 상태에서 다시 계산하며 틱 간 캐시하지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    pub strategy_id: Uuid,
    pub positions: Vec<TokenPosition>,
    pub total_value_usd: f64,
    /// 최대 절대 편차 (bps) - 이 엔진의 드리프트 정의
    pub drift_bps: u32,
}

/// 계획된 단일 스왑
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSwap {
    pub from_token: Address,
    pub to_token: Address,
    pub from_amount: U256,
    pub reason: String,
}

/// 평가 결과로 나오는 실행 계획 (휘발성, 영속화하지 않음)
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub strategy_id: Uuid,
    pub should_execute: bool,
    pub reason: String,
    pub drift_bps: u32,
    pub swaps: Vec<PlannedSwap>,
}

impl ExecutionPlan {
    pub fn skip(strategy_id: Uuid, drift_bps: u32, reason: impl Into<String>) -> Self {
        Self {
            strategy_id,
            should_execute: false,
            reason: reason.into(),
            drift_bps,
            swaps: Vec::new(),
        }
    }
}

/// 단일 유동성 벤더가 제시한 견적 (한 평가 내에서만 비교)
#[derive(Debug, Clone)]
pub struct VenueQuote {
    pub venue: String,
    pub from_token: Address,
    pub to_token: Address,
    pub from_amount: U256,
    pub to_amount: U256,
    /// 가격 영향 (%, 0.0 ~ 100.0)
    pub price_impact_pct: f64,
    pub call_target: Address,
    pub call_data: Vec<u8>,
    pub native_value: U256,
    pub gas_estimate: u64,
}

/// 애그리게이터가 승자 벤더까지 결정한 실행용 스왑
#[derive(Debug, Clone)]
pub struct RoutedSwap {
    pub from_token: Address,
    pub to_token: Address,
    pub from_amount: U256,
    pub expected_out: U256,
    pub min_out: U256,
    pub venue: String,
    pub call_target: Address,
    pub call_data: Vec<u8>,
    pub native_value: U256,
    pub price_impact_pct: f64,
    /// 네이티브 -> wrapped 전처리 스텝 여부 (슬리피지 검사 없음, 1:1)
    pub is_wrap: bool,
}

/// 리밸런싱 결과 상태
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RebalanceStatus {
    Success,
    Failed,
}

impl std::fmt::Display for RebalanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebalanceStatus::Success => write!(f, "SUCCESS"),
            RebalanceStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// 감사용 리밸런싱 기록 (append-only, 생성 후 불변)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRecord {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub chain_id: u64,
    /// 트리거 시점 드리프트 (bps)
    pub drift_bps: u32,
    pub swap_count: usize,
    pub gas_used: Option<u64>,
    pub gas_price: Option<U256>,
    pub gas_cost_native: Option<f64>,
    pub tx_hash: Option<B256>,
    pub status: RebalanceStatus,
    pub error: Option<String>,
    pub executor: Address,
    pub created_at: DateTime<Utc>,
}

/// 인텐트 생애주기 상태
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    Matched,
    Expired,
}

/// 솔버 매칭용 지연 실행 인텐트
///
/// 엔진은 Pending으로만 기록한다. 매칭과 정산은 외부 솔버 플로우가
/// 담당하며 이 기록이 인수인계 지점이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub chain_id: u64,
    /// 온체인 실행 진입점
    pub to: Address,
    pub call_data: Vec<u8>,
    pub value: U256,
    pub gas_limit: u64,
    pub swap_count: usize,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
}

/// 작업 우선순위 (드리프트 크기에서 유도되는 3단계)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl JobPriority {
    /// 드리프트 크기를 우선순위 티어로 매핑
    pub fn from_drift(drift_bps: u32) -> Self {
        if drift_bps >= HIGH_PRIORITY_DRIFT_BPS {
            JobPriority::High
        } else if drift_bps >= MEDIUM_PRIORITY_DRIFT_BPS {
            JobPriority::Medium
        } else {
            JobPriority::Low
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Medium => write!(f, "medium"),
            JobPriority::High => write!(f, "high"),
        }
    }
}

/// 스케줄러가 큐에 넣는 리밸런싱 작업
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebalanceJob {
    pub strategy_id: Uuid,
    pub user_address: Address,
    pub chain_id: u64,
    pub drift_bps: u32,
    pub priority: JobPriority,
}

impl RebalanceJob {
    pub fn new(strategy: &Strategy, drift_bps: u32) -> Self {
        Self {
            strategy_id: strategy.id,
            user_address: strategy.user_address,
            chain_id: strategy.chain_id,
            drift_bps,
            priority: JobPriority::from_drift(drift_bps),
        }
    }
}

/// 가스 가격 이력 샘플 (유리함 통계 전용)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasSample {
    pub chain_id: u64,
    pub price_gwei: f64,
    pub sampled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_tiers() {
        assert_eq!(JobPriority::from_drift(2_000), JobPriority::High);
        assert_eq!(JobPriority::from_drift(1_500), JobPriority::High);
        assert_eq!(JobPriority::from_drift(900), JobPriority::Medium);
        assert_eq!(JobPriority::from_drift(600), JobPriority::Low);
        assert!(JobPriority::High > JobPriority::Medium);
    }

    #[test]
    fn test_strategy_due_check() {
        let now = Utc::now();
        let mut strategy = Strategy {
            id: Uuid::new_v4(),
            user_address: Address::ZERO,
            chain_id: 1,
            delegated_account: Some(Address::ZERO),
            tokens: vec![],
            rebalance_interval_secs: 3600,
            drift_threshold_bps: None,
            is_active: true,
            is_deployed: true,
            last_rebalance_at: None,
            created_at: now,
        };

        // 한 번도 실행된 적 없으면 즉시 대상
        assert!(strategy.is_due(now));

        strategy.last_rebalance_at = Some(now - chrono::Duration::seconds(600));
        assert!(!strategy.is_due(now));

        strategy.last_rebalance_at = Some(now - chrono::Duration::seconds(3601));
        assert!(strategy.is_due(now));
    }
}
