pub mod abi;
pub mod rpc;

pub use rpc::HttpChainClient;

use anyhow::Result;
use async_trait::async_trait;
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// 트랜잭션 제출 경로
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionMode {
    /// 일반 퍼블릭 멤풀
    Public,
    /// 프라이빗 릴레이 (엔드포인트 URL)
    PrivateRelay(String),
    /// 인텐트 제출 (솔버 매칭 기록으로 지연 실행)
    Intent,
}

/// 체인에 보낼 호출 요청
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub submission: SubmissionMode,
}

/// 트랜잭션 영수증
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: U256,
    pub block_number: u64,
}

/// 체인 RPC 인터페이스
///
/// 외부 협력자. 모든 호출에는 유한한 타임아웃이 걸려 있어야 하며
/// 느려진 노드는 잡 전체의 행이 아니라 개별 호출 실패로 강등된다.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// ERC-20 잔액 조회 (네이티브 센티널이면 계정 잔액)
    async fn token_balance(&self, token: Address, account: Address) -> Result<U256>;

    async fn token_decimals(&self, token: Address) -> Result<u8>;

    /// USD 가격 조회. 신선도 검사는 단순 staleness 체크만 수행한다.
    async fn token_price_usd(&self, token: Address) -> Result<f64>;

    /// 현재 네트워크 가스 가격 (wei)
    async fn gas_price(&self) -> Result<U256>;

    /// 호출 드라이런. revert 시 Err 반환
    async fn simulate_call(&self, tx: &TxRequest) -> Result<()>;

    /// 트랜잭션 제출, 해시 반환
    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256>;

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt>;
}
