use async_trait::async_trait;
use alloy::primitives::B256;
use tracing::{info, warn};
use uuid::Uuid;

/// 리밸런싱 종료 알림 내용
///
/// 시뮬레이션 모드 성공은 브로드캐스트가 없으므로 tx_hash가 비어 있다.
#[derive(Debug, Clone)]
pub enum RebalanceOutcome {
    Success { tx_hash: Option<B256>, swap_count: usize },
    Failure { error: String },
}

/// 알림 싱크 인터페이스
///
/// 외부 협력자. 전달 실패는 파이프라인을 막지 않아야 하므로 구현체가
/// 자체적으로 로그만 남기고 삼킨다. 운영 알림(큐 소진 등)은 이 채널이
/// 아니라 로그로 나간다.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn rebalance_started(&self, strategy_id: Uuid, drift_bps: u32);

    async fn rebalance_completed(&self, strategy_id: Uuid, outcome: RebalanceOutcome);
}

/// tracing 기반 기본 알림 구현
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn rebalance_started(&self, strategy_id: Uuid, drift_bps: u32) {
        info!("🔔 Rebalance started: strategy={} drift={}bps", strategy_id, drift_bps);
    }

    async fn rebalance_completed(&self, strategy_id: Uuid, outcome: RebalanceOutcome) {
        match outcome {
            RebalanceOutcome::Success { tx_hash: Some(tx_hash), swap_count } => {
                info!(
                    "🔔 Rebalance completed: strategy={} tx={:#x} swaps={}",
                    strategy_id, tx_hash, swap_count
                );
            }
            RebalanceOutcome::Success { tx_hash: None, swap_count } => {
                info!(
                    "🔔 Rebalance simulated: strategy={} swaps={} (no broadcast)",
                    strategy_id, swap_count
                );
            }
            RebalanceOutcome::Failure { error } => {
                warn!("🔔 Rebalance failed: strategy={} error={}", strategy_id, error);
            }
        }
    }
}
