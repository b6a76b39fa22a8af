use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerSettings;
use crate::evaluator::StrategyEvaluator;
use crate::queue::RebalanceQueue;
use crate::storage::StrategyStore;
use crate::types::RebalanceJob;

/// 전략 스케줄러
///
/// 주기적으로 활성 전략을 훑어 주기가 찼고 드리프트가 임계값을 넘은
/// 전략을 큐에 넣는다. 실제 실행 판단은 실행자가 다시 한다. 여기서의
/// 검사는 불필요한 작업이 큐에 쌓이지 않게 하는 필터일 뿐이다.
pub struct Scheduler {
    store: Arc<dyn StrategyStore>,
    evaluator: Arc<StrategyEvaluator>,
    queue: Arc<RebalanceQueue>,
    settings: SchedulerSettings,
    /// 느린 틱이 다음 틱과 겹치지 않게 하는 재진입 가드
    tick_in_progress: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn StrategyStore>,
        evaluator: Arc<StrategyEvaluator>,
        queue: Arc<RebalanceQueue>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            evaluator,
            queue,
            settings,
            tick_in_progress: AtomicBool::new(false),
        }
    }

    /// 스케줄 틱 하나 실행
    ///
    /// 이전 틱이 아직 돌고 있으면 이번 틱은 통째로 건너뛴다.
    /// 전략 하나의 실패는 로그로 격리되고 나머지 전략 처리를 막지 않는다.
    pub async fn tick(&self) {
        if self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("⏳ Previous scheduler tick still running, skipping this one");
            return;
        }

        self.run_tick().await;
        self.tick_in_progress.store(false, Ordering::SeqCst);
    }

    async fn run_tick(&self) {
        let strategies = match self.store.active_strategies().await {
            Ok(strategies) => strategies,
            Err(e) => {
                error!("❌ Failed to load active strategies: {}", e);
                return;
            }
        };

        let now = Utc::now();
        let mut enqueued = 0usize;

        for strategy in strategies {
            if !strategy.is_schedulable() {
                continue;
            }
            if !strategy.is_due(now) {
                debug!("Strategy {} not due yet", strategy.id);
                continue;
            }

            match self.evaluator.needs_rebalancing(&strategy).await {
                Ok(condition) if condition.met => {
                    self.queue
                        .enqueue(RebalanceJob::new(&strategy, condition.drift_bps))
                        .await;
                    enqueued += 1;
                }
                Ok(condition) => {
                    debug!("Strategy {}: {}", strategy.id, condition.reason);
                }
                Err(e) if e.is_skip() => {
                    debug!("Strategy {} skipped: {}", strategy.id, e);
                }
                Err(e) => {
                    warn!("⚠️ Failed to check strategy {}: {}", strategy.id, e);
                }
            }
        }

        if enqueued > 0 {
            info!("📋 Scheduler tick enqueued {} job(s)", enqueued);
        }
    }

    /// 메인 스케줄 루프 기동
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.settings.tick_interval_secs);
        info!("⏰ Scheduler started (tick every {:?})", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick().await,
                    _ = shutdown.changed() => {
                        info!("⏰ Scheduler shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// 보조 헬스 체크 루프 기동
    ///
    /// 스토어 연결과 큐 깊이를 주기적으로 보고한다. 실패해도 경고만 남긴다.
    pub fn spawn_health_check(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.settings.health_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.store.health_check().await {
                            Ok(()) => {
                                let stats = self.queue.stats().await;
                                info!(
                                    "💓 Health: store ok, queue depth={} enqueued={} completed={} exhausted={}",
                                    stats.current_depth,
                                    stats.total_enqueued,
                                    stats.total_completed,
                                    stats.total_exhausted
                                );
                            }
                            Err(e) => warn!("💓 Health: store check failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("💓 Health check shutting down");
                        return;
                    }
                }
            }
        })
    }
}

/// 소진된 작업을 운영 알림으로 승격시키는 리스너
pub fn spawn_exhaustion_listener(
    mut exhausted_rx: tokio::sync::mpsc::UnboundedReceiver<crate::queue::QueuedJob>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                queued = exhausted_rx.recv() => {
                    match queued {
                        Some(queued) => {
                            error!(
                                "🚨 OPERATIONAL ALERT: strategy {} failed {} attempts and was dropped (drift {} bps)",
                                queued.job.strategy_id, queued.attempt, queued.job.drift_bps
                            );
                        }
                        None => return,
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClient;
    use crate::constants::DEFAULT_DRIFT_THRESHOLD_BPS;
    use crate::mocks::MockChainClient;
    use crate::storage::InMemoryStore;
    use crate::types::{Strategy, TokenTarget};
    use alloy::primitives::{Address, U256};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn token_a() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn token_b() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn account() -> Address {
        Address::repeat_byte(0x77)
    }

    fn strategy_50_50() -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            user_address: Address::repeat_byte(0x01),
            chain_id: 1,
            delegated_account: Some(account()),
            tokens: vec![
                TokenTarget { token: token_a(), target_weight_bps: 5_000 },
                TokenTarget { token: token_b(), target_weight_bps: 5_000 },
            ],
            rebalance_interval_secs: 3_600,
            drift_threshold_bps: Some(500),
            is_active: true,
            is_deployed: true,
            last_rebalance_at: None,
            created_at: Utc::now(),
        }
    }

    /// 토큰 가격 $1 기준으로 a/b 잔액을 설정한 클라이언트
    fn client_with_balances(a_units: u64, b_units: u64) -> Arc<MockChainClient> {
        let client = Arc::new(MockChainClient::new(1));
        for token in [token_a(), token_b()] {
            client.set_decimals(token, 18);
            client.set_price(token, 1.0);
        }
        let scale = U256::from(10u64).pow(U256::from(18u64));
        client.set_balance(token_a(), account(), U256::from(a_units) * scale);
        client.set_balance(token_b(), account(), U256::from(b_units) * scale);
        client
    }

    fn scheduler_with(
        client: Arc<MockChainClient>,
        store: Arc<InMemoryStore>,
    ) -> (Arc<Scheduler>, Arc<RebalanceQueue>) {
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(1, client as Arc<dyn ChainClient>);

        let evaluator = Arc::new(StrategyEvaluator::new(clients, DEFAULT_DRIFT_THRESHOLD_BPS));
        let (queue, _rx) = RebalanceQueue::new(3, Duration::from_secs(2));
        let queue = Arc::new(queue);

        let scheduler = Arc::new(Scheduler::new(
            store as Arc<dyn StrategyStore>,
            evaluator,
            Arc::clone(&queue),
            SchedulerSettings::default(),
        ));
        (scheduler, queue)
    }

    #[tokio::test]
    async fn test_drifted_strategy_is_enqueued() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_strategy(strategy_50_50());

        // 70/30: 드리프트 2000bps, 임계값 500bps 초과
        let (scheduler, queue) = scheduler_with(client_with_balances(700, 300), store);
        scheduler.tick().await;

        assert_eq!(queue.depth().await, 1);
        let queued = queue.pop_ready().await.unwrap();
        assert_eq!(queued.job.drift_bps, 2_000);
    }

    #[tokio::test]
    async fn test_below_threshold_not_enqueued() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_strategy(strategy_50_50());

        // 51/49: 드리프트 100bps, 임계값 미달
        let (scheduler, queue) = scheduler_with(client_with_balances(510, 490), store);
        scheduler.tick().await;

        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn test_not_due_strategy_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let mut strategy = strategy_50_50();
        strategy.last_rebalance_at = Some(Utc::now());
        store.insert_strategy(strategy);

        let (scheduler, queue) = scheduler_with(client_with_balances(700, 300), store);
        scheduler.tick().await;

        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn test_undeployed_strategy_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let mut strategy = strategy_50_50();
        strategy.is_deployed = false;
        store.insert_strategy(strategy);

        let (scheduler, queue) = scheduler_with(client_with_balances(700, 300), store);
        scheduler.tick().await;

        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn test_tick_is_not_reentrant() {
        let store = Arc::new(InMemoryStore::new());
        let (scheduler, _queue) = scheduler_with(client_with_balances(0, 0), store);

        // 가드를 수동으로 점유한 상태에서는 틱이 즉시 반환되어야 한다
        assert!(scheduler
            .tick_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok());

        scheduler.tick().await;
        assert!(scheduler.tick_in_progress.load(Ordering::SeqCst));
        scheduler.tick_in_progress.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_one_bad_strategy_does_not_block_others() {
        let store = Arc::new(InMemoryStore::new());

        // 검증에 실패하는 전략 (비중 합계 오류)
        let mut broken = strategy_50_50();
        broken.tokens[0].target_weight_bps = 9_000;
        store.insert_strategy(broken);

        store.insert_strategy(strategy_50_50());

        let (scheduler, queue) = scheduler_with(client_with_balances(700, 300), store);
        scheduler.tick().await;

        // 정상 전략 하나만 큐에 들어간다
        assert_eq!(queue.depth().await, 1);
    }
}
