use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;
use tracing::debug;

use crate::types::{Delegation, GasSample, IntentRecord, IntentStatus, RebalanceRecord, Strategy};

/// 전략 저장소 인터페이스
///
/// 영속화 기술은 외부 선택 사항이다. 엔진은 이 트레이트만 바라본다.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// 활성 + 배포 완료 전략 목록
    async fn active_strategies(&self) -> Result<Vec<Strategy>>;

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>>;

    /// 전략의 현재 활성 위임 (철회된 위임은 제외)
    async fn active_delegation(&self, strategy_id: Uuid) -> Result<Option<Delegation>>;

    /// 리밸런싱 감사 기록 추가 (기록은 이후 변경되지 않는다)
    async fn record_rebalance(&self, record: RebalanceRecord) -> Result<()>;

    async fn rebalance_history(&self, strategy_id: Uuid) -> Result<Vec<RebalanceRecord>>;

    /// 마지막 리밸런싱 시각 갱신 (성공 시에만 호출)
    async fn touch_last_rebalance(&self, strategy_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// 솔버 매칭용 인텐트 기록 추가
    async fn record_intent(&self, intent: IntentRecord) -> Result<()>;

    /// 매칭 대기 중인 인텐트 조회
    async fn pending_intents(&self, chain_id: u64) -> Result<Vec<IntentRecord>>;

    async fn insert_gas_sample(&self, sample: GasSample) -> Result<()>;

    /// 추적 윈도우 내의 가스 샘플 조회
    async fn gas_samples_since(&self, chain_id: u64, since: DateTime<Utc>) -> Result<Vec<GasSample>>;

    async fn health_check(&self) -> Result<()>;
}

/// DashMap 기반 인메모리 저장소
pub struct InMemoryStore {
    strategies: DashMap<Uuid, Strategy>,
    delegations: DashMap<Uuid, Vec<Delegation>>,
    records: DashMap<Uuid, Vec<RebalanceRecord>>,
    intents: DashMap<u64, Vec<IntentRecord>>,
    gas_samples: DashMap<u64, Vec<GasSample>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            strategies: DashMap::new(),
            delegations: DashMap::new(),
            records: DashMap::new(),
            intents: DashMap::new(),
            gas_samples: DashMap::new(),
        }
    }

    pub fn insert_strategy(&self, strategy: Strategy) {
        self.strategies.insert(strategy.id, strategy);
    }

    pub fn insert_delegation(&self, delegation: Delegation) {
        self.delegations
            .entry(delegation.strategy_id)
            .or_default()
            .push(delegation);
    }

    /// 위임 철회 (테스트와 외부 관리 플로우용)
    pub fn revoke_delegation(&self, strategy_id: Uuid, delegation_id: Uuid) {
        if let Some(mut entry) = self.delegations.get_mut(&strategy_id) {
            for delegation in entry.iter_mut() {
                if delegation.id == delegation_id {
                    delegation.status = crate::types::DelegationStatus::Revoked;
                    delegation.revoked_at = Some(Utc::now());
                }
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyStore for InMemoryStore {
    async fn active_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self
            .strategies
            .iter()
            .filter(|s| s.is_active && s.is_deployed)
            .map(|s| s.clone())
            .collect())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>> {
        Ok(self.strategies.get(&id).map(|s| s.clone()))
    }

    async fn active_delegation(&self, strategy_id: Uuid) -> Result<Option<Delegation>> {
        Ok(self
            .delegations
            .get(&strategy_id)
            .and_then(|list| list.iter().find(|d| d.is_active()).cloned()))
    }

    async fn record_rebalance(&self, record: RebalanceRecord) -> Result<()> {
        debug!(
            "📝 Recording rebalance: strategy={} status={} drift={}bps",
            record.strategy_id, record.status, record.drift_bps
        );
        self.records.entry(record.strategy_id).or_default().push(record);
        Ok(())
    }

    async fn rebalance_history(&self, strategy_id: Uuid) -> Result<Vec<RebalanceRecord>> {
        Ok(self
            .records
            .get(&strategy_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn touch_last_rebalance(&self, strategy_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut strategy) = self.strategies.get_mut(&strategy_id) {
            strategy.last_rebalance_at = Some(at);
        }
        Ok(())
    }

    async fn record_intent(&self, intent: IntentRecord) -> Result<()> {
        debug!(
            "📨 Recording intent: strategy={} chain={} swaps={}",
            intent.strategy_id, intent.chain_id, intent.swap_count
        );
        self.intents.entry(intent.chain_id).or_default().push(intent);
        Ok(())
    }

    async fn pending_intents(&self, chain_id: u64) -> Result<Vec<IntentRecord>> {
        Ok(self
            .intents
            .get(&chain_id)
            .map(|list| {
                list.iter()
                    .filter(|i| i.status == IntentStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_gas_sample(&self, sample: GasSample) -> Result<()> {
        let mut samples = self.gas_samples.entry(sample.chain_id).or_default();
        samples.push(sample);

        // 오래된 샘플은 대략 두 시간치만 남기고 정리
        let cutoff = Utc::now() - Duration::hours(2);
        if samples.len() > 10_000 {
            samples.retain(|s| s.sampled_at > cutoff);
        }
        Ok(())
    }

    async fn gas_samples_since(&self, chain_id: u64, since: DateTime<Utc>) -> Result<Vec<GasSample>> {
        Ok(self
            .gas_samples
            .get(&chain_id)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.sampled_at >= since)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DelegationStatus, RebalanceStatus};
    use alloy::primitives::Address;

    fn sample_strategy() -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            user_address: Address::ZERO,
            chain_id: 1,
            delegated_account: Some(Address::repeat_byte(0x11)),
            tokens: vec![],
            rebalance_interval_secs: 3600,
            drift_threshold_bps: None,
            is_active: true,
            is_deployed: true,
            last_rebalance_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_active_strategies_filters_inactive() {
        let store = InMemoryStore::new();
        let active = sample_strategy();
        let mut inactive = sample_strategy();
        inactive.is_active = false;
        let mut undeployed = sample_strategy();
        undeployed.is_deployed = false;

        store.insert_strategy(active.clone());
        store.insert_strategy(inactive);
        store.insert_strategy(undeployed);

        let result = store.active_strategies().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, active.id);
    }

    #[tokio::test]
    async fn test_revoked_delegation_not_returned() {
        let store = InMemoryStore::new();
        let strategy = sample_strategy();
        let delegation = Delegation {
            id: Uuid::new_v4(),
            strategy_id: strategy.id,
            delegator: Address::repeat_byte(0x11),
            executor: Address::repeat_byte(0x22),
            status: DelegationStatus::Active,
            permission_context: vec![0x01],
            created_at: Utc::now(),
            revoked_at: None,
        };
        store.insert_strategy(strategy.clone());
        store.insert_delegation(delegation.clone());

        assert!(store.active_delegation(strategy.id).await.unwrap().is_some());

        store.revoke_delegation(strategy.id, delegation.id);
        assert!(store.active_delegation(strategy.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_intents_excludes_matched() {
        let store = InMemoryStore::new();

        for status in [IntentStatus::Pending, IntentStatus::Matched, IntentStatus::Pending] {
            let intent = IntentRecord {
                id: Uuid::new_v4(),
                strategy_id: Uuid::new_v4(),
                chain_id: 1,
                to: Address::repeat_byte(0xdd),
                call_data: vec![0x01],
                value: alloy::primitives::U256::ZERO,
                gas_limit: 300_000,
                swap_count: 1,
                status,
                created_at: Utc::now(),
            };
            store.record_intent(intent).await.unwrap();
        }

        assert_eq!(store.pending_intents(1).await.unwrap().len(), 2);
        assert!(store.pending_intents(137).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebalance_history_appends() {
        let store = InMemoryStore::new();
        let strategy_id = Uuid::new_v4();

        for i in 0..3 {
            let record = RebalanceRecord {
                id: Uuid::new_v4(),
                strategy_id,
                chain_id: 1,
                drift_bps: 600 + i,
                swap_count: 1,
                gas_used: None,
                gas_price: None,
                gas_cost_native: None,
                tx_hash: None,
                status: RebalanceStatus::Failed,
                error: Some("gas too high".into()),
                executor: Address::ZERO,
                created_at: Utc::now(),
            };
            store.record_rebalance(record).await.unwrap();
        }

        let history = store.rebalance_history(strategy_id).await.unwrap();
        assert_eq!(history.len(), 3);
    }
}
