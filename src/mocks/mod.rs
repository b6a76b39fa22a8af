//! 테스트용 목 구현
//!
//! 외부 협력자(체인 RPC, 견적 벤더, 알림 싱크)를 결정적으로 대체한다.
//! 네트워크 없이 전체 파이프라인을 구동할 수 있어야 한다.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use alloy::primitives::{Address, B256, U256};
use dashmap::DashMap;
use uuid::Uuid;

use crate::adapters::{AdapterError, AdapterMetrics, QuoteRequest, QuoteSource};
use crate::chain::{ChainClient, TxReceipt, TxRequest};
use crate::notify::{NotificationSink, RebalanceOutcome};
use crate::types::VenueQuote;

/// 설정 가능한 인메모리 체인 클라이언트
pub struct MockChainClient {
    chain_id: u64,
    balances: DashMap<(Address, Address), U256>,
    decimals: DashMap<Address, u8>,
    prices: DashMap<Address, f64>,
    gas_price: Mutex<U256>,
    gas_price_fails: AtomicBool,
    simulation_error: Mutex<Option<String>>,
    receipt_success: AtomicBool,
    simulate_calls: AtomicU64,
    sent_txs: AtomicU64,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            balances: DashMap::new(),
            decimals: DashMap::new(),
            prices: DashMap::new(),
            gas_price: Mutex::new(U256::from(20_000_000_000u64)),
            gas_price_fails: AtomicBool::new(false),
            simulation_error: Mutex::new(None),
            receipt_success: AtomicBool::new(true),
            simulate_calls: AtomicU64::new(0),
            sent_txs: AtomicU64::new(0),
        }
    }

    pub fn set_balance(&self, token: Address, account: Address, amount: U256) {
        self.balances.insert((token, account), amount);
    }

    pub fn set_decimals(&self, token: Address, decimals: u8) {
        self.decimals.insert(token, decimals);
    }

    pub fn set_price(&self, token: Address, price_usd: f64) {
        self.prices.insert(token, price_usd);
    }

    pub fn set_gas_price(&self, price_wei: U256) {
        *self.gas_price.lock().unwrap() = price_wei;
    }

    pub fn fail_gas_price(&self) {
        self.gas_price_fails.store(true, Ordering::SeqCst);
    }

    /// 이후의 simulate_call이 주어진 메시지로 실패하도록 설정
    pub fn fail_simulation(&self, message: &str) {
        *self.simulation_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_receipt_success(&self, success: bool) {
        self.receipt_success.store(success, Ordering::SeqCst);
    }

    pub fn simulate_count(&self) -> u64 {
        self.simulate_calls.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_txs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        Ok(self
            .balances
            .get(&(token, account))
            .map(|b| *b)
            .unwrap_or(U256::ZERO))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        self.decimals
            .get(&token)
            .map(|d| *d)
            .ok_or_else(|| anyhow!("decimals not configured for {:#x}", token))
    }

    async fn token_price_usd(&self, token: Address) -> Result<f64> {
        self.prices
            .get(&token)
            .map(|p| *p)
            .ok_or_else(|| anyhow!("price not configured for {:#x}", token))
    }

    async fn gas_price(&self) -> Result<U256> {
        if self.gas_price_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("gas price endpoint unavailable"));
        }
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn simulate_call(&self, _tx: &TxRequest) -> Result<()> {
        self.simulate_calls.fetch_add(1, Ordering::SeqCst);
        match self.simulation_error.lock().unwrap().as_ref() {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }

    async fn send_transaction(&self, _tx: &TxRequest) -> Result<B256> {
        let nth = self.sent_txs.fetch_add(1, Ordering::SeqCst);
        let mut hash = [0u8; 32];
        hash[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        hash[31] = nth as u8;
        Ok(B256::from(hash))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt> {
        Ok(TxReceipt {
            tx_hash,
            success: self.receipt_success.load(Ordering::SeqCst),
            gas_used: 210_000,
            effective_gas_price: *self.gas_price.lock().unwrap(),
            block_number: 1,
        })
    }
}

/// 고정 환율 견적 벤더
pub struct MockQuoteSource {
    name: String,
    /// to_amount = from_amount * rate
    rate: f64,
    price_impact_pct: f64,
    fails: bool,
    metrics: AdapterMetrics,
}

impl MockQuoteSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rate: 1.0,
            price_impact_pct: 0.0,
            fails: false,
            metrics: AdapterMetrics::new(),
        }
    }

    pub fn with_rate(mut self, rate: f64, price_impact_pct: f64) -> Self {
        self.rate = rate;
        self.price_impact_pct = price_impact_pct;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_chain(&self, _chain_id: u64) -> bool {
        true
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> Result<VenueQuote, AdapterError> {
        if self.fails {
            self.metrics.record_failure();
            return Err(AdapterError::NetworkError(format!(
                "{} unavailable",
                self.name
            )));
        }

        // rate를 백만분율 고정소수점으로 적용해 U256 정밀도를 유지한다
        let rate_ppm = U256::from((self.rate * 1_000_000.0).round() as u64);
        let to_amount = request.amount * rate_ppm / U256::from(1_000_000u64);

        self.metrics.record_success();
        Ok(VenueQuote {
            venue: self.name.clone(),
            from_token: request.from_token,
            to_token: request.to_token,
            from_amount: request.amount,
            to_amount,
            price_impact_pct: self.price_impact_pct,
            call_target: Address::repeat_byte(0x55),
            call_data: vec![0xab, 0xcd],
            native_value: U256::ZERO,
            gas_estimate: 180_000,
        })
    }

    fn metrics(&self) -> &AdapterMetrics {
        &self.metrics
    }
}

/// 알림 수신 횟수만 세는 싱크
#[derive(Default)]
pub struct MockNotifier {
    started: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_count(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn success_count(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for MockNotifier {
    async fn rebalance_started(&self, _strategy_id: Uuid, _drift_bps: u32) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    async fn rebalance_completed(&self, _strategy_id: Uuid, outcome: RebalanceOutcome) {
        match outcome {
            RebalanceOutcome::Success { .. } => self.successes.fetch_add(1, Ordering::SeqCst),
            RebalanceOutcome::Failure { .. } => self.failures.fetch_add(1, Ordering::SeqCst),
        };
    }
}
