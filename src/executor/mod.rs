use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::QuoteAggregator;
use crate::chain::{ChainClient, SubmissionMode, TxRequest};
use crate::config::{ChainSettings, Config};
use crate::constants::gwei_to_wei;
use crate::error::RebalanceError;
use crate::evaluator::StrategyEvaluator;
use crate::gas::GasOracle;
use crate::mev::MevProtection;
use crate::notify::{NotificationSink, RebalanceOutcome};
use crate::queue::{QueuedJob, RebalanceQueue};
use crate::storage::StrategyStore;
use crate::types::{IntentRecord, IntentStatus, RebalanceRecord, RebalanceStatus, RoutedSwap, Strategy};

sol! {
    /// 온체인 실행 진입점. 위임 권한 데이터와 스왑 호출 배열을 받아
    /// 위임 계정 컨텍스트에서 순서대로 실행한다.
    function executeRebalance(
        bytes32 strategyId,
        address account,
        address[] targets,
        bytes[] callDatas,
        uint256[] values,
        bytes permissionContext
    );
}

/// 호출 배열 실행 오버헤드를 위한 가스 여유분
const GAS_OVERHEAD: u64 = 120_000;

/// 작업 시도 하나의 상태 머신 위치 (로그/기록용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Loaded,
    Evaluated,
    GasChecked,
    Quoted,
    Built,
    Simulated,
    Submitted,
    Confirmed,
    Failed,
}

impl std::fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ExecutionStage::Loaded => "LOADED",
            ExecutionStage::Evaluated => "EVALUATED",
            ExecutionStage::GasChecked => "GAS_CHECKED",
            ExecutionStage::Quoted => "QUOTED",
            ExecutionStage::Built => "BUILT",
            ExecutionStage::Simulated => "SIMULATED",
            ExecutionStage::Submitted => "SUBMITTED",
            ExecutionStage::Confirmed => "CONFIRMED",
            ExecutionStage::Failed => "FAILED",
        };
        write!(f, "{}", label)
    }
}

/// 시도 하나의 종료 형태
#[derive(Debug)]
pub enum JobOutcome {
    /// 성공적으로 확정되어 기록됨
    Completed,
    /// 리밸런싱 불필요 또는 전략 무효 - 기록 없이 조용히 종료
    Skipped(String),
    /// 실패. 감사 기록과 사용자 알림은 이미 작성되었고 큐 재시도 대상
    Failed(RebalanceError),
}

/// 리밸런싱 실행자
///
/// 큐에서 작업을 꺼내 전략을 재평가하고 가스/견적 게이트를 거쳐 단일
/// 위임 호출을 조립, 시뮬레이션, 제출한다. 모든 FAILED 전이는 에러가
/// 재시도 계층으로 전파되기 전에 감사 기록과 사용자 알림을 남긴다.
pub struct RebalanceExecutor {
    store: Arc<dyn StrategyStore>,
    clients: HashMap<u64, Arc<dyn ChainClient>>,
    evaluator: Arc<StrategyEvaluator>,
    aggregator: Arc<QuoteAggregator>,
    gas_oracle: Arc<GasOracle>,
    mev: Arc<MevProtection>,
    notifier: Arc<dyn NotificationSink>,
    config: Arc<Config>,
}

impl RebalanceExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StrategyStore>,
        clients: HashMap<u64, Arc<dyn ChainClient>>,
        evaluator: Arc<StrategyEvaluator>,
        aggregator: Arc<QuoteAggregator>,
        gas_oracle: Arc<GasOracle>,
        mev: Arc<MevProtection>,
        notifier: Arc<dyn NotificationSink>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            clients,
            evaluator,
            aggregator,
            gas_oracle,
            mev,
            notifier,
            config,
        }
    }

    /// 작업 시도 하나 처리
    pub async fn process(&self, queued: &QueuedJob) -> JobOutcome {
        let job = &queued.job;
        info!(
            "⚙️ Processing job: strategy={} attempt={}/{} priority={}",
            job.strategy_id, queued.attempt, queued.max_attempts, job.priority
        );

        match self.run_attempt(job.strategy_id, job.drift_bps).await {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed(e),
        }
    }

    async fn run_attempt(&self, strategy_id: Uuid, trigger_drift_bps: u32) -> Result<JobOutcome, RebalanceError> {
        // LOADED: 전략과 활성 위임 로드
        let strategy = match self.load_strategy(strategy_id).await {
            Ok(strategy) => strategy,
            Err(e) => return Ok(self.fail(strategy_id, None, trigger_drift_bps, 0, None, e).await),
        };

        let delegation = match self.store.active_delegation(strategy_id).await {
            Ok(Some(delegation)) => delegation,
            Ok(None) => {
                let e = RebalanceError::Configuration(format!(
                    "No active delegation for strategy {}",
                    strategy_id
                ));
                return Ok(self.fail(strategy_id, Some(&strategy), trigger_drift_bps, 0, None, e).await);
            }
            Err(e) => {
                let e = RebalanceError::TransientExternal(format!("delegation read: {}", e));
                return Ok(self.fail(strategy_id, Some(&strategy), trigger_drift_bps, 0, None, e).await);
            }
        };
        debug!("Stage {}: delegation {} active", ExecutionStage::Loaded, delegation.id);

        // EVALUATED: 전체 파이프라인 재평가
        let plan = match self.evaluator.evaluate_strategy(&strategy).await {
            Ok(plan) => plan,
            Err(e) if e.is_skip() => {
                warn!("⏭️ Strategy {} skipped: {}", strategy_id, e);
                return Ok(JobOutcome::Skipped(e.to_string()));
            }
            Err(e) => {
                return Ok(self.fail(strategy_id, Some(&strategy), trigger_drift_bps, 0, None, e).await)
            }
        };

        if !plan.should_execute {
            debug!("Stage {}: {}", ExecutionStage::Evaluated, plan.reason);
            return Ok(JobOutcome::Skipped(plan.reason));
        }

        self.notifier.rebalance_started(strategy_id, plan.drift_bps).await;

        let chain_settings = match self.config.chain(strategy.chain_id) {
            Some(settings) => settings.clone(),
            None => {
                let e = RebalanceError::Configuration(format!(
                    "Chain {} not configured",
                    strategy.chain_id
                ));
                return Ok(self.fail(strategy_id, Some(&strategy), plan.drift_bps, 0, None, e).await);
            }
        };

        // GAS_CHECKED: 상한 초과 시 중단. 이후 재시도에서 해소될 수 있는 게이트다.
        let gas_price = match self.gas_oracle.optimal_gas_price(strategy.chain_id).await {
            Ok(price) => price,
            Err(e) => {
                let e = RebalanceError::TransientExternal(format!("gas price fetch: {}", e));
                return Ok(self.fail(strategy_id, Some(&strategy), plan.drift_bps, 0, None, e).await);
            }
        };

        let ceiling = gwei_to_wei(self.config.gas.ceiling_gwei);
        if gas_price > ceiling {
            let e = RebalanceError::EconomicGate(format!(
                "gas too high: {} wei exceeds ceiling {} wei",
                gas_price, ceiling
            ));
            return Ok(self.fail(strategy_id, Some(&strategy), plan.drift_bps, 0, None, e).await);
        }

        match self.gas_oracle.is_gas_favorable(strategy.chain_id).await {
            Ok(false) => debug!("Gas under ceiling but above rolling statistic, proceeding"),
            Ok(true) => {}
            Err(e) => debug!("Favorability check unavailable: {}", e),
        }
        debug!("Stage {}: gas price {} wei", ExecutionStage::GasChecked, gas_price);

        // QUOTED: 계획된 스왑 전부를 채우지 못하면 전체 실패
        let account = match strategy.delegated_account {
            Some(account) => account,
            None => {
                let e = RebalanceError::Configuration(format!(
                    "Strategy {} lost its delegated account",
                    strategy_id
                ));
                return Ok(self.fail(strategy_id, Some(&strategy), plan.drift_bps, 0, None, e).await);
            }
        };

        let routed = match self.aggregator.optimal_swaps(&plan, &chain_settings, account).await {
            Ok(routed) => routed,
            Err(e) => {
                return Ok(self.fail(strategy_id, Some(&strategy), plan.drift_bps, 0, None, e).await)
            }
        };
        debug!("Stage {}: {} routed swaps", ExecutionStage::Quoted, routed.len());

        // BUILT: 위임 권한과 스왑 배열을 단일 호출로 인코딩
        let tx = match self.build_call(&strategy, &chain_settings, &delegation.permission_context, &routed, gas_price) {
            Ok(tx) => tx,
            Err(e) => {
                return Ok(self
                    .fail(strategy_id, Some(&strategy), plan.drift_bps, routed.len(), None, e)
                    .await)
            }
        };
        debug!("Stage {}: calldata {} bytes", ExecutionStage::Built, tx.data.len());

        let client = match self.clients.get(&strategy.chain_id) {
            Some(client) => Arc::clone(client),
            None => {
                let e = RebalanceError::Configuration(format!(
                    "No chain client for chain {}",
                    strategy.chain_id
                ));
                return Ok(self
                    .fail(strategy_id, Some(&strategy), plan.drift_bps, routed.len(), None, e)
                    .await)
            }
        };

        // SIMULATED: 가스를 쓰기 전에 revert를 걸러낸다
        if let Err(e) = client.simulate_call(&tx).await {
            let e = RebalanceError::OnChain(format!("simulation reverted: {}", e));
            return Ok(self
                .fail(strategy_id, Some(&strategy), plan.drift_bps, routed.len(), None, e)
                .await);
        }
        debug!("Stage {}: ok", ExecutionStage::Simulated);

        if self.config.engine.simulation_mode {
            info!("🧪 Simulation mode: not broadcasting for strategy {}", strategy_id);
            self.record_success(&strategy, plan.drift_bps, routed.len(), None, 0, gas_price)
                .await;
            return Ok(JobOutcome::Completed);
        }

        // SUBMITTED: MEV 보호 적용 후 브로드캐스트
        let tx = self.mev.protect(tx).await;

        // 인텐트 제출: 브로드캐스트 대신 솔버 매칭 기록을 남기고 종료
        if tx.submission == SubmissionMode::Intent {
            match self.defer_to_intent(&strategy, routed.len(), &tx).await {
                Ok(()) => return Ok(JobOutcome::Completed),
                Err(e) => {
                    return Ok(self
                        .fail(strategy_id, Some(&strategy), plan.drift_bps, routed.len(), None, e)
                        .await)
                }
            }
        }

        let tx_hash = match client.send_transaction(&tx).await {
            Ok(hash) => hash,
            Err(e) => {
                let e = RebalanceError::OnChain(format!("submission failed: {}", e));
                return Ok(self
                    .fail(strategy_id, Some(&strategy), plan.drift_bps, routed.len(), None, e)
                    .await);
            }
        };
        debug!("Stage {}: tx {:#x}", ExecutionStage::Submitted, tx_hash);

        // CONFIRMED: 영수증 대기
        let receipt = match client.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let e = RebalanceError::TransientExternal(format!("receipt wait: {}", e));
                return Ok(self
                    .fail(strategy_id, Some(&strategy), plan.drift_bps, routed.len(), Some(tx_hash), e)
                    .await);
            }
        };

        if !receipt.success {
            let e = RebalanceError::OnChain(format!("transaction {:#x} reverted", tx_hash));
            return Ok(self
                .fail(strategy_id, Some(&strategy), plan.drift_bps, routed.len(), Some(tx_hash), e)
                .await);
        }

        info!(
            "Stage {}: strategy={} tx={:#x} gas_used={}",
            ExecutionStage::Confirmed, strategy_id, tx_hash, receipt.gas_used
        );

        self.record_success(
            &strategy,
            plan.drift_bps,
            routed.len(),
            Some(tx_hash),
            receipt.gas_used,
            receipt.effective_gas_price,
        )
        .await;

        Ok(JobOutcome::Completed)
    }

    async fn load_strategy(&self, strategy_id: Uuid) -> Result<Strategy, RebalanceError> {
        self.store
            .get_strategy(strategy_id)
            .await
            .map_err(|e| RebalanceError::TransientExternal(format!("strategy read: {}", e)))?
            .ok_or_else(|| RebalanceError::Configuration(format!("Strategy {} not found", strategy_id)))
    }

    /// 스왑 배열을 executeRebalance 단일 호출로 인코딩
    fn build_call(
        &self,
        strategy: &Strategy,
        chain: &ChainSettings,
        permission_context: &[u8],
        routed: &[RoutedSwap],
        gas_price: U256,
    ) -> Result<TxRequest, RebalanceError> {
        let execution_contract = chain.execution_contract.ok_or_else(|| {
            RebalanceError::Configuration(format!(
                "No execution contract configured for chain {}",
                chain.chain_id
            ))
        })?;

        let account = strategy
            .delegated_account
            .ok_or_else(|| RebalanceError::Configuration("Missing delegated account".into()))?;

        let mut strategy_word = [0u8; 32];
        strategy_word[..16].copy_from_slice(strategy.id.as_bytes());

        let targets: Vec<Address> = routed.iter().map(|s| s.call_target).collect();
        let call_datas: Vec<Bytes> = routed.iter().map(|s| Bytes::from(s.call_data.clone())).collect();
        let values: Vec<U256> = routed.iter().map(|s| s.native_value).collect();
        let total_value: U256 = values.iter().copied().fold(U256::ZERO, |acc, v| acc + v);
        let gas_limit = routed.iter().map(|s| if s.is_wrap { 60_000 } else { 250_000 }).sum::<u64>() + GAS_OVERHEAD;

        let data = executeRebalanceCall {
            strategyId: strategy_word.into(),
            account,
            targets,
            callDatas: call_datas,
            values,
            permissionContext: Bytes::from(permission_context.to_vec()),
        }
        .abi_encode();

        Ok(TxRequest {
            chain_id: chain.chain_id,
            from: self.config.engine.executor_address,
            to: execution_contract,
            data,
            value: total_value,
            gas_price,
            gas_limit,
            submission: SubmissionMode::Public,
        })
    }

    /// 브로드캐스트 없이 실행을 외부 솔버 플로우로 넘긴다.
    /// 남긴 Pending 인텐트가 실행의 인수인계 기록이 된다.
    async fn defer_to_intent(
        &self,
        strategy: &Strategy,
        swap_count: usize,
        tx: &TxRequest,
    ) -> Result<(), RebalanceError> {
        let intent = IntentRecord {
            id: Uuid::new_v4(),
            strategy_id: strategy.id,
            chain_id: strategy.chain_id,
            to: tx.to,
            call_data: tx.data.clone(),
            value: tx.value,
            gas_limit: tx.gas_limit,
            swap_count,
            status: IntentStatus::Pending,
            created_at: Utc::now(),
        };

        self.store
            .record_intent(intent)
            .await
            .map_err(|e| RebalanceError::TransientExternal(format!("intent write: {}", e)))?;

        // 솔버가 매칭하는 동안 같은 전략이 다시 큐에 들어오지 않도록 주기를 갱신
        if let Err(e) = self.store.touch_last_rebalance(strategy.id, Utc::now()).await {
            error!("❌ Failed to update last rebalance for {}: {}", strategy.id, e);
        }

        info!(
            "📨 Intent recorded for strategy {}: {} swaps awaiting solver match",
            strategy.id, swap_count
        );
        Ok(())
    }

    /// FAILED 전이 공통 처리: 기록과 알림을 남긴 뒤 실패를 돌려준다
    async fn fail(
        &self,
        strategy_id: Uuid,
        strategy: Option<&Strategy>,
        drift_bps: u32,
        swap_count: usize,
        tx_hash: Option<B256>,
        error: RebalanceError,
    ) -> JobOutcome {
        error!(
            "Stage {}: strategy={} class={} error={}",
            ExecutionStage::Failed,
            strategy_id,
            error.classification(),
            error
        );

        let record = RebalanceRecord {
            id: Uuid::new_v4(),
            strategy_id,
            chain_id: strategy.map(|s| s.chain_id).unwrap_or_default(),
            drift_bps,
            swap_count,
            gas_used: None,
            gas_price: None,
            gas_cost_native: None,
            tx_hash,
            status: RebalanceStatus::Failed,
            error: Some(error.to_string()),
            executor: self.config.engine.executor_address,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.record_rebalance(record).await {
            error!("❌ Failed to persist failure record for {}: {}", strategy_id, e);
        }

        self.notifier
            .rebalance_completed(strategy_id, RebalanceOutcome::Failure { error: error.to_string() })
            .await;

        JobOutcome::Failed(error)
    }

    async fn record_success(
        &self,
        strategy: &Strategy,
        drift_bps: u32,
        swap_count: usize,
        tx_hash: Option<B256>,
        gas_used: u64,
        gas_price: U256,
    ) {
        let gas_cost_native = {
            let cost_wei = gas_price * U256::from(gas_used);
            cost_wei.to::<u128>() as f64 / 1e18
        };

        let record = RebalanceRecord {
            id: Uuid::new_v4(),
            strategy_id: strategy.id,
            chain_id: strategy.chain_id,
            drift_bps,
            swap_count,
            gas_used: Some(gas_used),
            gas_price: Some(gas_price),
            gas_cost_native: Some(gas_cost_native),
            tx_hash,
            status: RebalanceStatus::Success,
            error: None,
            executor: self.config.engine.executor_address,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.record_rebalance(record).await {
            error!("❌ Failed to persist success record for {}: {}", strategy.id, e);
        }
        if let Err(e) = self.store.touch_last_rebalance(strategy.id, Utc::now()).await {
            error!("❌ Failed to update last rebalance for {}: {}", strategy.id, e);
        }

        self.notifier
            .rebalance_completed(
                strategy.id,
                RebalanceOutcome::Success { tx_hash, swap_count },
            )
            .await;
    }

    /// 큐 소비자 풀 기동. 작업 간에는 공유 가변 상태가 없으므로
    /// 소비자 수만큼 병렬로 처리한다.
    pub fn spawn_workers(
        self: Arc<Self>,
        queue: Arc<RebalanceQueue>,
        count: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        info!("👷 Starting {} queue consumers", count);

        (0..count)
            .map(|worker_id| {
                let executor = Arc::clone(&self);
                let queue = Arc::clone(&queue);
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                info!("👷 Worker {} shutting down", worker_id);
                                return;
                            }
                            queued = queue.pop_ready() => {
                                match queued {
                                    Some(queued) => {
                                        match executor.process(&queued).await {
                                            JobOutcome::Completed => queue.complete(&queued).await,
                                            JobOutcome::Skipped(reason) => {
                                                debug!("⏭️ Job skipped: {}", reason);
                                                queue.complete(&queued).await;
                                            }
                                            JobOutcome::Failed(_) => queue.retry_or_exhaust(queued).await,
                                        }
                                    }
                                    None => {
                                        tokio::time::sleep(Duration::from_millis(500)).await;
                                    }
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
