use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use alloy::primitives::{Address, B256, U256};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::constants::is_native_token;
use super::{abi, ChainClient, TxReceipt, TxRequest};

/// 가격 피드 응답
#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: f64,
    /// Unix timestamp (초)
    updated_at: i64,
}

/// 가격 피드 최대 허용 나이 (초)
const PRICE_MAX_AGE_SECS: i64 = 300;

/// receipt 폴링 간격과 상한
const RECEIPT_POLL_INTERVAL_MS: u64 = 2_000;
const RECEIPT_POLL_MAX: u32 = 90;

/// reqwest 기반의 얇은 JSON-RPC 체인 클라이언트
pub struct HttpChainClient {
    chain_id: u64,
    rpc_url: String,
    price_endpoint: Option<String>,
    client: reqwest::Client,
}

impl HttpChainClient {
    pub fn new(chain_id: u64, rpc_url: String, price_endpoint: Option<String>, timeout_secs: u64) -> Result<Self> {
        info!("🔌 Chain client for chain {} -> {}", chain_id, rpc_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            chain_id,
            rpc_url,
            price_endpoint,
            client,
        })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        self.rpc_call_to(&self.rpc_url, method, params).await
    }

    async fn rpc_call_to(&self, url: &str, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("RPC request failed: {}", method))?;

        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("Invalid RPC response: {}", method))?;

        if let Some(error) = payload.get("error") {
            return Err(anyhow!("RPC error for {}: {}", method, error));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("RPC response missing result: {}", method))
    }

    fn tx_call_object(tx: &TxRequest) -> Value {
        json!({
            "from": format!("{:#x}", tx.from),
            "to": format!("{:#x}", tx.to),
            "data": format!("0x{}", hex::encode(&tx.data)),
            "value": format!("{:#x}", tx.value),
            "gasPrice": format!("{:#x}", tx.gas_price),
        })
    }

    fn parse_hex_u256(value: &Value) -> Result<U256> {
        let raw = value.as_str().ok_or_else(|| anyhow!("Expected hex string"))?;
        U256::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|e| anyhow!("Invalid hex quantity {}: {}", raw, e))
    }

    fn parse_hex_bytes(value: &Value) -> Result<Vec<u8>> {
        let raw = value.as_str().ok_or_else(|| anyhow!("Expected hex string"))?;
        hex::decode(raw.trim_start_matches("0x")).map_err(|e| anyhow!("Invalid hex bytes: {}", e))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        if is_native_token(&token) {
            let result = self
                .rpc_call("eth_getBalance", json!([format!("{:#x}", account), "latest"]))
                .await?;
            return Self::parse_hex_u256(&result);
        }

        let call = json!({
            "to": format!("{:#x}", token),
            "data": format!("0x{}", hex::encode(abi::encode_balance_of(account))),
        });
        let result = self.rpc_call("eth_call", json!([call, "latest"])).await?;
        let bytes = Self::parse_hex_bytes(&result)?;
        abi::decode_u256(&bytes).ok_or_else(|| anyhow!("Short balanceOf return for {:#x}", token))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        if is_native_token(&token) {
            return Ok(18);
        }

        let call = json!({
            "to": format!("{:#x}", token),
            "data": format!("0x{}", hex::encode(abi::encode_decimals())),
        });
        let result = self.rpc_call("eth_call", json!([call, "latest"])).await?;
        let bytes = Self::parse_hex_bytes(&result)?;
        abi::decode_u8(&bytes).ok_or_else(|| anyhow!("Short decimals return for {:#x}", token))
    }

    async fn token_price_usd(&self, token: Address) -> Result<f64> {
        let endpoint = self
            .price_endpoint
            .as_ref()
            .ok_or_else(|| anyhow!("No price endpoint configured for chain {}", self.chain_id))?;

        let url = format!("{}/{:#x}", endpoint.trim_end_matches('/'), token);
        let response: PriceResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Price feed request failed")?
            .json()
            .await
            .context("Invalid price feed response")?;

        let age = chrono::Utc::now().timestamp() - response.updated_at;
        if age > PRICE_MAX_AGE_SECS {
            return Err(anyhow!(
                "Stale price for {:#x}: {}s old (max {}s)",
                token,
                age,
                PRICE_MAX_AGE_SECS
            ));
        }

        Ok(response.price)
    }

    async fn gas_price(&self) -> Result<U256> {
        let result = self.rpc_call("eth_gasPrice", json!([])).await?;
        Self::parse_hex_u256(&result)
    }

    async fn simulate_call(&self, tx: &TxRequest) -> Result<()> {
        debug!("🧪 Simulating call to {:#x} on chain {}", tx.to, self.chain_id);
        self.rpc_call("eth_call", json!([Self::tx_call_object(tx), "latest"]))
            .await
            .map_err(|e| anyhow!("Simulation reverted: {}", e))?;
        Ok(())
    }

    async fn send_transaction(&self, tx: &TxRequest) -> Result<B256> {
        let mut call = Self::tx_call_object(tx);
        call["gas"] = json!(format!("{:#x}", U256::from(tx.gas_limit)));

        // 프라이빗 릴레이 제출은 릴레이 엔드포인트로 우회한다
        let url = match &tx.submission {
            super::SubmissionMode::PrivateRelay(relay_url) => {
                debug!("🛡️ Submitting via private relay {}", relay_url);
                relay_url.clone()
            }
            _ => self.rpc_url.clone(),
        };

        let result = self.rpc_call_to(&url, "eth_sendTransaction", json!([call])).await?;
        let bytes = Self::parse_hex_bytes(&result)?;
        if bytes.len() != 32 {
            return Err(anyhow!("Invalid transaction hash length: {}", bytes.len()));
        }
        Ok(B256::from_slice(&bytes))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt> {
        for attempt in 0..RECEIPT_POLL_MAX {
            let result = self
                .rpc_call("eth_getTransactionReceipt", json!([format!("{:#x}", tx_hash)]))
                .await?;

            if result.is_null() {
                if attempt % 10 == 9 {
                    debug!("⏳ Still waiting for receipt of {:#x}", tx_hash);
                }
                tokio::time::sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
                continue;
            }

            let status = Self::parse_hex_u256(&result["status"])?;
            let gas_used = Self::parse_hex_u256(&result["gasUsed"])?;
            let effective_gas_price = result
                .get("effectiveGasPrice")
                .filter(|v| !v.is_null())
                .map(Self::parse_hex_u256)
                .transpose()?
                .unwrap_or(U256::ZERO);
            let block_number = Self::parse_hex_u256(&result["blockNumber"])?;

            if status != U256::from(1u8) {
                warn!("❌ Transaction {:#x} reverted on-chain", tx_hash);
            }

            return Ok(TxReceipt {
                tx_hash,
                success: status == U256::from(1u8),
                gas_used: gas_used.to::<u64>(),
                effective_gas_price,
                block_number: block_number.to::<u64>(),
            });
        }

        Err(anyhow!("Timed out waiting for receipt of {:#x}", tx_hash))
    }
}
