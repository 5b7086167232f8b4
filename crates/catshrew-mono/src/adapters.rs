//! JSON-RPC [`ChainSource`] over a Bitcoin node

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::{Block, Transaction, Txid};
use catshrew_sync::{
    BlockHeader, ChainInfo, ChainSource, JsonRpcRequest, JsonRpcResponse, SyncError, SyncResult,
};
use itertools::Itertools;
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// bitcoind's `RPC_INVALID_PARAMETER`, returned by `getblockhash` past the tip
const RPC_INVALID_PARAMETER: i32 = -8;
/// bitcoind's `RPC_INVALID_ADDRESS_OR_KEY`: unknown block or transaction
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

/// Bitcoin node adapter that connects to a real Bitcoin node via RPC
#[derive(Clone)]
pub struct BitcoinRpcAdapter {
    url: Url,
    client: reqwest::Client,
    next_id: Arc<AtomicU32>,
}

/// `rpc_url` with `user:password` credentials set, when given
pub fn rpc_endpoint(rpc_url: &str, auth: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(rpc_url)?;
    if let Some(auth) = auth {
        let (username, password) = auth
            .splitn(2, ':')
            .next_tuple()
            .ok_or_else(|| anyhow!("Invalid auth format - should be username:password"))?;
        url.set_username(username)
            .map_err(|_| anyhow!("Invalid username"))?;
        url.set_password(Some(password))
            .map_err(|_| anyhow!("Invalid password"))?;
    }
    Ok(url)
}

impl BitcoinRpcAdapter {
    pub fn new(rpc_url: &str, auth: Option<&str>) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(20))
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            url: rpc_endpoint(rpc_url, auth)?,
            client,
            next_id: Arc::new(AtomicU32::new(0)),
        })
    }

    async fn post_once(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let response = self.client.post(self.url.clone()).json(request).send().await?;
        Ok(response.json::<JsonRpcResponse>().await?)
    }

    /// Send one request, retrying transport failures with jittered exponential backoff
    async fn post(&self, method: &str, params: Vec<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            jsonrpc: String::from("2.0"),
            method: method.to_string(),
            params,
        };
        let max_retries = 5;
        let mut retry_delay = Duration::from_millis(500);
        let max_delay = Duration::from_secs(16);

        for attempt in 0..max_retries {
            match self.post_once(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    error!("Request {} failed (attempt {}): {}", method, attempt + 1, e);
                    let jitter = {
                        use rand::Rng;
                        rand::thread_rng().gen_range(0..=100) as u64
                    };
                    retry_delay =
                        std::cmp::min(max_delay, retry_delay * 2 + Duration::from_millis(jitter));
                    debug!("retrying {} in {:?}", method, retry_delay);
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
        Err(anyhow!("Max retries exceeded"))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> SyncResult<T> {
        let response = self
            .post(method, params)
            .await
            .map_err(|e| SyncError::BitcoinNode(format!("RPC request failed: {}", e)))?;
        decode_result(method, response)
    }
}

fn decode_result<T: DeserializeOwned>(method: &str, response: JsonRpcResponse) -> SyncResult<T> {
    if let Some(error) = response.error {
        if error.code == RPC_INVALID_ADDRESS_OR_KEY {
            return Err(SyncError::NotFound(format!("{}: {}", method, error.message)));
        }
        return Err(SyncError::BitcoinNode(format!(
            "{} failed, code {}: {}",
            method, error.code, error.message
        )));
    }
    let result = response
        .result
        .ok_or_else(|| SyncError::BitcoinNode("missing result from JSON-RPC response".to_string()))?;
    serde_json::from_value(result)
        .map_err(|e| SyncError::Serialization(format!("{} result: {}", method, e)))
}

fn decode_hex<T: bitcoin::consensus::Decodable>(what: &str, hex: &str) -> SyncResult<T> {
    deserialize_hex(hex).map_err(|e| SyncError::Serialization(format!("{} decode error: {}", what, e)))
}

#[async_trait]
impl ChainSource for BitcoinRpcAdapter {
    async fn get_block_hash(&self, height: u32) -> SyncResult<Option<String>> {
        let response = self
            .post("getblockhash", vec![json!(height)])
            .await
            .map_err(|e| SyncError::BitcoinNode(format!("RPC request failed: {}", e)))?;
        if matches!(&response.error, Some(e) if e.code == RPC_INVALID_PARAMETER) {
            return Ok(None);
        }
        decode_result("getblockhash", response).map(Some)
    }

    async fn get_block_header(&self, hash: &str) -> SyncResult<BlockHeader> {
        self.call("getblockheader", vec![json!(hash), json!(true)]).await
    }

    async fn get_raw_block(&self, hash: &str) -> SyncResult<Block> {
        let hex: String = self.call("getblock", vec![json!(hash), json!(0)]).await?;
        decode_hex("block", &hex)
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> SyncResult<Transaction> {
        let hex: String = self
            .call("getrawtransaction", vec![json!(txid.to_string()), json!(false)])
            .await?;
        decode_hex("transaction", &hex)
    }

    async fn get_raw_mempool(&self) -> SyncResult<Vec<Txid>> {
        let txids: Vec<String> = self.call("getrawmempool", vec![]).await?;
        txids
            .iter()
            .map(|txid| {
                Txid::from_str(txid)
                    .map_err(|e| SyncError::Serialization(format!("mempool txid {}: {}", txid, e)))
            })
            .collect()
    }

    async fn get_blockchain_info(&self) -> SyncResult<ChainInfo> {
        self.call("getblockchaininfo", vec![]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catshrew_sync::JsonRpcError;

    #[test]
    fn credentials_go_into_the_url() {
        let url = rpc_endpoint("http://127.0.0.1:8332", Some("user:pa:ss")).unwrap();
        assert_eq!(url.username(), "user");
        assert_eq!(url.password(), Some("pa:ss"));
        assert!(rpc_endpoint("http://127.0.0.1:8332", Some("nopassword")).is_err());
        let url = rpc_endpoint("http://127.0.0.1:8332", None).unwrap();
        assert_eq!(url.username(), "");
    }

    #[test]
    fn unknown_objects_are_not_found_errors() {
        let response = JsonRpcResponse {
            id: json!(1),
            result: None,
            error: Some(JsonRpcError {
                code: -5,
                message: "No such mempool or blockchain transaction".into(),
            }),
        };
        let err = decode_result::<String>("getrawtransaction", response).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert!(err.is_transient());

        let ok = JsonRpcResponse {
            id: json!(2),
            result: Some(json!({"chain": "main", "blocks": 10, "headers": 12})),
            error: None,
        };
        let info: ChainInfo = decode_result("getblockchaininfo", ok).unwrap();
        assert_eq!(info.headers, 12);
    }
}
