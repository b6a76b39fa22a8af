use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tracing::debug;

use crate::chain::ChainClient;
use crate::constants::{BPS_DENOMINATOR, WEIGHT_SUM_TOLERANCE_BPS};
use crate::error::RebalanceError;
use crate::types::{ExecutionPlan, PlannedSwap, PortfolioState, Strategy, TokenPosition};

/// 파싱/검증을 통과한 전략
#[derive(Debug, Clone)]
pub struct ParsedStrategy {
    pub strategy: Strategy,
    pub delegated_account: Address,
    pub threshold_bps: u32,
}

/// 조건 평가 결과
#[derive(Debug, Clone)]
pub struct ConditionResult {
    pub met: bool,
    pub drift_bps: u32,
    pub reason: String,
}

/// USD 기준으로 이 이하의 잔여분은 매칭에서 무시
const DUST_USD: f64 = 0.01;

/// 전략 평가 파이프라인
///
/// Parse -> Analyze -> Conditions -> Plan 순서로 고정되어 있고 각 단계의
/// 출력이 다음 단계의 입력이다. 실패한 단계가 나머지를 단락시킨다.
/// 드리프트는 목표 대비 최대 절대 편차(bps)로 정의한다.
pub struct StrategyEvaluator {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
    default_threshold_bps: u32,
}

impl StrategyEvaluator {
    pub fn new(clients: HashMap<u64, Arc<dyn ChainClient>>, default_threshold_bps: u32) -> Self {
        Self {
            clients,
            default_threshold_bps,
        }
    }

    /// 1단계: 전략 정의 검증
    pub fn parse(&self, strategy: &Strategy) -> Result<ParsedStrategy, RebalanceError> {
        if strategy.tokens.is_empty() {
            return Err(RebalanceError::Validation(format!(
                "Strategy {} has no tokens",
                strategy.id
            )));
        }

        let weight_sum: u32 = strategy.tokens.iter().map(|t| t.target_weight_bps).sum();
        if weight_sum.abs_diff(BPS_DENOMINATOR) > WEIGHT_SUM_TOLERANCE_BPS {
            return Err(RebalanceError::Validation(format!(
                "Strategy {} weights sum to {} bps, expected {}",
                strategy.id, weight_sum, BPS_DENOMINATOR
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for target in &strategy.tokens {
            if !seen.insert(target.token) {
                return Err(RebalanceError::Validation(format!(
                    "Strategy {} lists token {:#x} twice",
                    strategy.id, target.token
                )));
            }
        }

        if strategy.rebalance_interval_secs == 0 {
            return Err(RebalanceError::Validation(format!(
                "Strategy {} has zero rebalance interval",
                strategy.id
            )));
        }

        let delegated_account = strategy.delegated_account.ok_or_else(|| {
            RebalanceError::Configuration(format!(
                "Strategy {} has no delegated account",
                strategy.id
            ))
        })?;

        Ok(ParsedStrategy {
            threshold_bps: strategy.drift_threshold_bps.unwrap_or(self.default_threshold_bps),
            delegated_account,
            strategy: strategy.clone(),
        })
    }

    /// 2단계: 위임 계정의 온체인 잔액을 읽어 포트폴리오 구성 계산
    ///
    /// 잔액은 사용자 개인 지갑이 아니라 위임 계정에서 읽는다. 자금이 거기 있다.
    pub async fn analyze(&self, parsed: &ParsedStrategy) -> Result<PortfolioState, RebalanceError> {
        let client = self.clients.get(&parsed.strategy.chain_id).ok_or_else(|| {
            RebalanceError::Configuration(format!(
                "No chain client for chain {}",
                parsed.strategy.chain_id
            ))
        })?;

        let mut positions = Vec::with_capacity(parsed.strategy.tokens.len());
        let mut total_value_usd = 0.0;

        for target in &parsed.strategy.tokens {
            let balance = client
                .token_balance(target.token, parsed.delegated_account)
                .await
                .map_err(|e| RebalanceError::TransientExternal(format!("balance read: {}", e)))?;
            let decimals = client
                .token_decimals(target.token)
                .await
                .map_err(|e| RebalanceError::TransientExternal(format!("decimals read: {}", e)))?;
            let price_usd = client
                .token_price_usd(target.token)
                .await
                .map_err(|e| RebalanceError::TransientExternal(format!("price read: {}", e)))?;

            let units = u256_to_f64(balance) / 10f64.powi(decimals as i32);
            let value_usd = units * price_usd;
            total_value_usd += value_usd;

            positions.push(TokenPosition {
                token: target.token,
                balance,
                decimals,
                price_usd,
                value_usd,
                current_weight_bps: 0,
                target_weight_bps: target.target_weight_bps,
            });
        }

        let mut drift_bps = 0u32;
        if total_value_usd > 0.0 {
            for position in &mut positions {
                position.current_weight_bps =
                    ((position.value_usd / total_value_usd) * BPS_DENOMINATOR as f64).round() as u32;
                drift_bps = drift_bps.max(position.deviation_bps());
            }
        }

        debug!(
            "📊 Portfolio of {}: total ${:.2}, drift {} bps",
            parsed.strategy.id, total_value_usd, drift_bps
        );

        Ok(PortfolioState {
            strategy_id: parsed.strategy.id,
            positions,
            total_value_usd,
            drift_bps,
        })
    }

    /// 3단계: 트리거 조건 비교
    pub fn evaluate_conditions(&self, parsed: &ParsedStrategy, state: &PortfolioState) -> ConditionResult {
        if state.total_value_usd <= 0.0 {
            return ConditionResult {
                met: false,
                drift_bps: 0,
                reason: "portfolio has no value".to_string(),
            };
        }

        if state.drift_bps < parsed.threshold_bps {
            return ConditionResult {
                met: false,
                drift_bps: state.drift_bps,
                reason: format!(
                    "drift {} bps below threshold {} bps",
                    state.drift_bps, parsed.threshold_bps
                ),
            };
        }

        ConditionResult {
            met: true,
            drift_bps: state.drift_bps,
            reason: format!(
                "drift {} bps over threshold {} bps",
                state.drift_bps, parsed.threshold_bps
            ),
        }
    }

    /// 4단계: 목표 비중으로 되돌리는 최소 스왑 집합 계산
    ///
    /// 초과 비중 토큰을 부족 비중 토큰에 탐욕적으로 매칭한다. 결정적이어야
    /// 하므로 정렬 기준에 토큰 주소를 타이브레이커로 넣는다.
    pub fn plan(&self, parsed: &ParsedStrategy, state: &PortfolioState, condition: &ConditionResult) -> ExecutionPlan {
        if !condition.met {
            return ExecutionPlan::skip(parsed.strategy.id, condition.drift_bps, condition.reason.clone());
        }

        // (토큰, 초과/부족 USD)
        let mut sellers: Vec<(TokenPosition, f64)> = Vec::new();
        let mut buyers: Vec<(Address, f64)> = Vec::new();

        for position in &state.positions {
            let target_usd = position.target_weight_bps as f64 / BPS_DENOMINATOR as f64 * state.total_value_usd;
            let delta = position.value_usd - target_usd;
            if delta > DUST_USD {
                sellers.push((position.clone(), delta));
            } else if delta < -DUST_USD {
                buyers.push((position.token, -delta));
            }
        }

        sellers.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.token.cmp(&b.0.token))
        });
        buyers.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut swaps = Vec::new();
        let mut seller_index = 0;
        let mut buyer_index = 0;

        while seller_index < sellers.len() && buyer_index < buyers.len() {
            let (seller, remaining_sell) = &mut sellers[seller_index];
            let (buyer_token, remaining_buy) = &mut buyers[buyer_index];

            let usd = remaining_sell.min(*remaining_buy);
            let from_amount = usd_to_base_units(usd, seller.price_usd, seller.decimals);

            if from_amount > U256::ZERO {
                swaps.push(PlannedSwap {
                    from_token: seller.token,
                    to_token: *buyer_token,
                    from_amount,
                    reason: format!(
                        "{:#x} overweight by ${:.2}, {:#x} underweight",
                        seller.token, usd, buyer_token
                    ),
                });
            }

            *remaining_sell -= usd;
            *remaining_buy -= usd;
            if *remaining_sell <= DUST_USD {
                seller_index += 1;
            }
            if *remaining_buy <= DUST_USD {
                buyer_index += 1;
            }
        }

        ExecutionPlan {
            strategy_id: parsed.strategy.id,
            should_execute: !swaps.is_empty(),
            reason: if swaps.is_empty() {
                "no swaps needed after dust filtering".to_string()
            } else {
                condition.reason.clone()
            },
            drift_bps: condition.drift_bps,
            swaps,
        }
    }

    /// 스케줄러용 저비용 검사 (1~3단계만)
    pub async fn needs_rebalancing(&self, strategy: &Strategy) -> Result<ConditionResult, RebalanceError> {
        let parsed = self.parse(strategy)?;
        let state = self.analyze(&parsed).await?;
        Ok(self.evaluate_conditions(&parsed, &state))
    }

    /// 실행자용 전체 파이프라인 (1~4단계)
    pub async fn evaluate_strategy(&self, strategy: &Strategy) -> Result<ExecutionPlan, RebalanceError> {
        let parsed = self.parse(strategy)?;
        let state = self.analyze(&parsed).await?;
        let condition = self.evaluate_conditions(&parsed, &state);
        Ok(self.plan(&parsed, &state, &condition))
    }
}

fn u256_to_f64(value: U256) -> f64 {
    // 포트폴리오 가치 계산용. u128 범위를 넘는 잔액은 상위 비트 기준 근사
    if value <= U256::from(u128::MAX) {
        value.to::<u128>() as f64
    } else {
        f64::MAX
    }
}

fn usd_to_base_units(usd: f64, price_usd: f64, decimals: u8) -> U256 {
    if price_usd <= 0.0 {
        return U256::ZERO;
    }
    let units = usd / price_usd * 10f64.powi(decimals as i32);
    if units <= 0.0 {
        return U256::ZERO;
    }
    U256::from(units as u128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockChainClient;
    use crate::types::TokenTarget;
    use chrono::Utc;
    use uuid::Uuid;

    const THRESHOLD: u32 = 500;

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
            drift_threshold_bps: Some(THRESHOLD),
            is_active: true,
            is_deployed: true,
            last_rebalance_at: None,
            created_at: Utc::now(),
        }
    }

    fn evaluator_with(client: Arc<MockChainClient>) -> StrategyEvaluator {
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(1, client as Arc<dyn ChainClient>);
        StrategyEvaluator::new(clients, THRESHOLD)
    }

    /// 1달러짜리 토큰 두 개로 70/30 포트폴리오 구성
    fn client_70_30() -> Arc<MockChainClient> {
        let client = Arc::new(MockChainClient::new(1));
        client.set_decimals(token_a(), 18);
        client.set_decimals(token_b(), 18);
        client.set_price(token_a(), 1.0);
        client.set_price(token_b(), 1.0);
        client.set_balance(token_a(), account(), U256::from(700u64) * U256::from(10u64).pow(U256::from(18u64)));
        client.set_balance(token_b(), account(), U256::from(300u64) * U256::from(10u64).pow(U256::from(18u64)));
        client
    }

    #[test]
    fn test_parse_rejects_bad_weight_sum() {
        let evaluator = evaluator_with(Arc::new(MockChainClient::new(1)));
        let mut strategy = strategy_50_50();
        strategy.tokens[0].target_weight_bps = 6_000; // 합계 11000

        let result = evaluator.parse(&strategy);
        assert!(matches!(result, Err(RebalanceError::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_empty_tokens() {
        let evaluator = evaluator_with(Arc::new(MockChainClient::new(1)));
        let mut strategy = strategy_50_50();
        strategy.tokens.clear();

        assert!(matches!(evaluator.parse(&strategy), Err(RebalanceError::Validation(_))));
    }

    #[test]
    fn test_parse_accepts_weights_within_tolerance() {
        let evaluator = evaluator_with(Arc::new(MockChainClient::new(1)));
        let mut strategy = strategy_50_50();
        strategy.tokens[0].target_weight_bps = 5_005; // 합계 10005, 허용 오차 내

        assert!(evaluator.parse(&strategy).is_ok());
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_execute() {
        let client = Arc::new(MockChainClient::new(1));
        client.set_decimals(token_a(), 18);
        client.set_decimals(token_b(), 18);
        client.set_price(token_a(), 1.0);
        client.set_price(token_b(), 1.0);
        // 52/48: 드리프트 200bps < 임계값 500bps
        client.set_balance(token_a(), account(), U256::from(520u64) * U256::from(10u64).pow(U256::from(18u64)));
        client.set_balance(token_b(), account(), U256::from(480u64) * U256::from(10u64).pow(U256::from(18u64)));

        let evaluator = evaluator_with(client);
        let plan = evaluator.evaluate_strategy(&strategy_50_50()).await.unwrap();

        assert!(!plan.should_execute);
        assert!(plan.swaps.is_empty());
        assert!(plan.reason.contains("below threshold"));
    }

    #[tokio::test]
    async fn test_70_30_produces_single_rebalancing_swap() {
        let evaluator = evaluator_with(client_70_30());
        let plan = evaluator.evaluate_strategy(&strategy_50_50()).await.unwrap();

        assert!(plan.should_execute);
        assert_eq!(plan.drift_bps, 2_000);
        assert_eq!(plan.swaps.len(), 1);

        let swap = &plan.swaps[0];
        assert_eq!(swap.from_token, token_a());
        assert_eq!(swap.to_token, token_b());

        // $200어치를 옮겨야 50/50이 된다 (1달러 토큰, 18 decimals)
        let expected = U256::from(200u64) * U256::from(10u64).pow(U256::from(18u64));
        let tolerance = expected / U256::from(100u64);
        assert!(swap.from_amount >= expected - tolerance && swap.from_amount <= expected + tolerance);
    }

    #[tokio::test]
    async fn test_evaluation_is_idempotent_for_unchanged_state() {
        let client = client_70_30();
        let evaluator = evaluator_with(client);
        let strategy = strategy_50_50();

        let first = evaluator.evaluate_strategy(&strategy).await.unwrap();
        let second = evaluator.evaluate_strategy(&strategy).await.unwrap();

        assert_eq!(first.should_execute, second.should_execute);
        assert_eq!(first.drift_bps, second.drift_bps);
        assert_eq!(first.swaps, second.swaps);
    }

    #[tokio::test]
    async fn test_needs_rebalancing_matches_condition_stage() {
        let evaluator = evaluator_with(client_70_30());
        let condition = evaluator.needs_rebalancing(&strategy_50_50()).await.unwrap();

        assert!(condition.met);
        assert_eq!(condition.drift_bps, 2_000);
    }

    #[tokio::test]
    async fn test_three_token_plan_moves_toward_targets() {
        let token_c = Address::repeat_byte(0xcc);
        let client = Arc::new(MockChainClient::new(1));
        for token in [token_a(), token_b(), token_c] {
            client.set_decimals(token, 6);
            client.set_price(token, 1.0);
        }
        // 60/30/10, 목표 40/30/30
        client.set_balance(token_a(), account(), U256::from(600_000_000u64));
        client.set_balance(token_b(), account(), U256::from(300_000_000u64));
        client.set_balance(token_c, account(), U256::from(100_000_000u64));

        let mut strategy = strategy_50_50();
        strategy.tokens = vec![
            TokenTarget { token: token_a(), target_weight_bps: 4_000 },
            TokenTarget { token: token_b(), target_weight_bps: 3_000 },
            TokenTarget { token: token_c, target_weight_bps: 3_000 },
        ];

        let evaluator = evaluator_with(client);
        let plan = evaluator.evaluate_strategy(&strategy).await.unwrap();

        assert!(plan.should_execute);
        // A의 초과분 전부가 C의 부족분으로 가는 단일 스왑
        assert_eq!(plan.swaps.len(), 1);
        assert_eq!(plan.swaps[0].from_token, token_a());
        assert_eq!(plan.swaps[0].to_token, token_c);
    }
}
