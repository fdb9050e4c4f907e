// =============================================================================
// SATKAS - Chain Query / Submit
// =============================================================================
//
// The swap engine talks to a Kaspa node through `ChainClient`:
//
// - get_utxos: UTXOs currently held by an address
// - submit:    broadcast a signed transaction (RPC JSON), returns its id
//
// `RestChainClient` speaks to a kaspa REST server; `MockChain` keeps
// everything in memory for tests.
//
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::address::Address;
use crate::contracts::builder::pay_to_address_script;
use crate::hashes::blake2b_256;
use crate::transaction::{OutPoint, ScriptPublicKey, SpendableUtxo, UtxoEntry};

/// Node rejection emitted while a freshly funded input is still sequence-locked
pub const SEQUENCE_LOCK_ERROR: &str = "one of the transaction sequence locks conditions was not met";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    Connection(String),
    Parse(String),
    /// Node refused the transaction
    Rejected { code: Option<u16>, message: String },
}

impl ChainError {
    /// The only rejection the engine retries
    pub fn is_sequence_lock_violation(&self) -> bool {
        match self {
            ChainError::Rejected { message, .. } => message.contains(SEQUENCE_LOCK_ERROR),
            _ => false,
        }
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Connection(e) => write!(f, "Connection failed: {}", e),
            ChainError::Parse(e) => write!(f, "Parse error: {}", e),
            ChainError::Rejected { code: Some(code), message } => {
                write!(f, "Transaction rejected ({}): {}", code, message)
            }
            ChainError::Rejected { code: None, message } => write!(f, "Transaction rejected: {}", message),
        }
    }
}

impl std::error::Error for ChainError {}

// =============================================================================
// Chain Client Trait
// =============================================================================

pub trait ChainClient: Send + Sync {
    fn get_utxos(&self, address: &str) -> Result<Vec<SpendableUtxo>, ChainError>;

    /// Submits a signed transaction in RPC JSON form and returns its id
    fn submit(&self, tx_json: &str) -> Result<String, ChainError>;
}

// =============================================================================
// REST Client
// =============================================================================

pub struct RestChainClient {
    base_url: String,
    timeout_secs: u64,
}

impl RestChainClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: 30,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    transaction_id: Option<String>,
    error: Option<String>,
}

impl ChainClient for RestChainClient {
    fn get_utxos(&self, address: &str) -> Result<Vec<SpendableUtxo>, ChainError> {
        let url = format!("{}/addresses/{}/utxos", self.base_url, address);
        let response = ureq::get(&url)
            .timeout(self.timeout())
            .call()
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        let json: Value = response.into_json().map_err(|e| ChainError::Parse(e.to_string()))?;
        parse_utxos(&json)
    }

    fn submit(&self, tx_json: &str) -> Result<String, ChainError> {
        let transaction: Value = serde_json::from_str(tx_json).map_err(|e| ChainError::Parse(e.to_string()))?;
        let body = serde_json::json!({ "transaction": transaction, "allowOrphan": false });
        let url = format!("{}/transactions", self.base_url);

        let response = match ureq::post(&url).timeout(self.timeout()).send_json(body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let message = response.into_string().unwrap_or_default();
                return Err(ChainError::Rejected { code: Some(code), message });
            }
            Err(e) => return Err(ChainError::Connection(e.to_string())),
        };

        let parsed: SubmitResponse = response.into_json().map_err(|e| ChainError::Parse(e.to_string()))?;
        match (parsed.transaction_id, parsed.error) {
            (_, Some(message)) => Err(ChainError::Rejected { code: None, message }),
            (Some(id), None) => Ok(id),
            (None, None) => Err(ChainError::Parse("response has no transactionId".to_string())),
        }
    }
}

/// Parses the REST `utxos` array; numeric fields may come as strings
pub fn parse_utxos(json: &Value) -> Result<Vec<SpendableUtxo>, ChainError> {
    let entries = json
        .as_array()
        .ok_or_else(|| ChainError::Parse("expected an array of utxos".to_string()))?;

    entries.iter().map(parse_utxo).collect()
}

fn parse_utxo(item: &Value) -> Result<SpendableUtxo, ChainError> {
    let outpoint = &item["outpoint"];
    let entry = &item["utxoEntry"];
    let spk = &entry["scriptPublicKey"];

    let tx_id = outpoint["transactionId"]
        .as_str()
        .ok_or_else(|| ChainError::Parse("missing outpoint.transactionId".to_string()))?;
    let index = json_u64(&outpoint["index"], "outpoint.index")?;
    let index = u32::try_from(index).map_err(|_| ChainError::Parse("outpoint.index out of range".to_string()))?;

    let script_hex = spk["scriptPublicKey"]
        .as_str()
        .ok_or_else(|| ChainError::Parse("missing scriptPublicKey".to_string()))?;
    let script = hex::decode(script_hex).map_err(|e| ChainError::Parse(format!("scriptPublicKey: {}", e)))?;
    let version = match &spk["version"] {
        Value::Null => 0,
        v => json_u64(v, "scriptPublicKey.version")? as u16,
    };

    Ok(SpendableUtxo {
        outpoint: OutPoint::from_hex(tx_id, index).map_err(ChainError::Parse)?,
        entry: UtxoEntry {
            amount: json_u64(&entry["amount"], "amount")?,
            script_public_key: ScriptPublicKey::new(version, script),
            block_daa_score: match &entry["blockDaaScore"] {
                Value::Null => 0,
                v => json_u64(v, "blockDaaScore")?,
            },
            is_coinbase: entry["isCoinbase"].as_bool().unwrap_or(false),
        },
    })
}

fn json_u64(value: &Value, field: &str) -> Result<u64, ChainError> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ChainError::Parse(format!("invalid {}", field)))
}

// =============================================================================
// Mock Chain (for tests without a node)
// =============================================================================

#[derive(Default)]
struct MockState {
    utxos: HashMap<String, Vec<SpendableUtxo>>,
    /// (address, utxo, released once this many queries have happened)
    scheduled: Vec<(String, SpendableUtxo, usize)>,
    submit_results: VecDeque<Result<String, ChainError>>,
    submitted: Vec<String>,
    queries: usize,
    failing_queries: usize,
    next_tx: u32,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn make_utxo(state: &mut MockState, address: &Address, amount: u64) -> Result<SpendableUtxo, ChainError> {
        state.next_tx += 1;
        let spk = pay_to_address_script(address).map_err(|e| ChainError::Parse(e.to_string()))?;
        let id = blake2b_256(&state.next_tx.to_le_bytes());
        Ok(SpendableUtxo {
            outpoint: OutPoint::new(id, 0),
            entry: UtxoEntry {
                amount,
                script_public_key: spk,
                block_daa_score: 1000 + state.next_tx as u64,
                is_coinbase: false,
            },
        })
    }

    /// Adds a UTXO paying `amount` to `address`
    pub fn fund(&self, address: &Address, amount: u64) -> Result<OutPoint, ChainError> {
        let mut state = self.lock();
        let utxo = Self::make_utxo(&mut state, address, amount)?;
        let outpoint = utxo.outpoint.clone();
        state.utxos.entry(address.to_string()).or_default().push(utxo);
        Ok(outpoint)
    }

    /// Adds the UTXO only once `after_queries` UTXO queries have been answered
    pub fn fund_later(&self, address: &Address, amount: u64, after_queries: usize) -> Result<(), ChainError> {
        let mut state = self.lock();
        let utxo = Self::make_utxo(&mut state, address, amount)?;
        state.scheduled.push((address.to_string(), utxo, after_queries));
        Ok(())
    }

    /// Queues the result of the next submit call
    pub fn push_submit_result(&self, result: Result<String, ChainError>) {
        self.lock().submit_results.push_back(result);
    }

    /// Makes the next `n` UTXO queries fail with a connection error
    pub fn fail_queries(&self, n: usize) {
        self.lock().failing_queries = n;
    }

    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.lock()
            .utxos
            .get(address)
            .map(|u| u.iter().map(|x| x.entry.amount).sum())
            .unwrap_or(0)
    }

    fn release_scheduled(state: &mut MockState) {
        let queries = state.queries;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|(_, _, after)| *after <= queries);
        state.scheduled = waiting;
        for (address, utxo, _) in ready {
            state.utxos.entry(address).or_default().push(utxo);
        }
    }

    fn spend_inputs(state: &mut MockState, tx_json: &str) {
        let Ok(tx) = serde_json::from_str::<Value>(tx_json) else {
            return;
        };
        let spent: Vec<(String, u64)> = tx["inputs"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|i| {
                        let op = &i["previousOutpoint"];
                        Some((op["transactionId"].as_str()?.to_string(), op["index"].as_u64()?))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for utxos in state.utxos.values_mut() {
            utxos.retain(|u| {
                let id = hex::encode(u.outpoint.transaction_id);
                !spent.iter().any(|(tx_id, index)| *tx_id == id && *index == u.outpoint.index as u64)
            });
        }
    }
}

impl ChainClient for MockChain {
    fn get_utxos(&self, address: &str) -> Result<Vec<SpendableUtxo>, ChainError> {
        let mut state = self.lock();
        state.queries += 1;
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(ChainError::Connection("mock node unreachable".to_string()));
        }
        Self::release_scheduled(&mut state);
        Ok(state.utxos.get(address).cloned().unwrap_or_default())
    }

    fn submit(&self, tx_json: &str) -> Result<String, ChainError> {
        let mut state = self.lock();
        state.submitted.push(tx_json.to_string());

        let result = state
            .submit_results
            .pop_front()
            .unwrap_or_else(|| Ok(hex::encode(blake2b_256(tx_json.as_bytes()))));

        match &result {
            Ok(id) => {
                debug!("Mock chain accepted {}", id);
                Self::spend_inputs(&mut state, tx_json);
            }
            Err(e) => warn!("Mock chain rejected transaction: {}", e),
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_lock_detection() {
        let err = ChainError::Rejected {
            code: Some(400),
            message: format!("rejected: {}", SEQUENCE_LOCK_ERROR),
        };
        assert!(err.is_sequence_lock_violation());

        let other = ChainError::Rejected { code: None, message: "fee too low".to_string() };
        assert!(!other.is_sequence_lock_violation());
        assert!(!ChainError::Connection(SEQUENCE_LOCK_ERROR.to_string()).is_sequence_lock_violation());
    }

    #[test]
    fn test_parse_rest_utxos() {
        let json = json!([{
            "address": "kaspa:qq",
            "outpoint": {
                "transactionId": "a449ba289c7d7ef8641eb110deead0e334b685a2aafff836321b88851bbba11f",
                "index": 1
            },
            "utxoEntry": {
                "amount": "500000000",
                "scriptPublicKey": { "scriptPublicKey": "aa20" },
                "blockDaaScore": "2149",
                "isCoinbase": false
            }
        }, {
            "outpoint": {
                "transactionId": "00".repeat(32),
                "index": 0
            },
            "utxoEntry": {
                "amount": 7,
                "scriptPublicKey": { "version": 0, "scriptPublicKey": "" }
            }
        }]);

        let utxos = parse_utxos(&json).unwrap();
        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos[0].outpoint.index, 1);
        assert_eq!(utxos[0].entry.amount, 500_000_000);
        assert_eq!(utxos[0].entry.block_daa_score, 2149);
        assert_eq!(utxos[0].entry.script_public_key.script, vec![0xAA, 0x20]);
        assert_eq!(utxos[1].entry.amount, 7);
        assert_eq!(utxos[1].entry.block_daa_score, 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_utxos(&json!({"error": "x"})), Err(ChainError::Parse(_))));
        let bad_amount = json!([{
            "outpoint": { "transactionId": "00".repeat(32), "index": 0 },
            "utxoEntry": { "amount": "lots", "scriptPublicKey": { "scriptPublicKey": "" } }
        }]);
        assert!(parse_utxos(&bad_amount).is_err());
    }

    #[test]
    fn test_mock_funding_and_spending() {
        let chain = MockChain::new();
        let address = Address::p2sh("kaspa", &[0x51]);
        let outpoint = chain.fund(&address, 1_000).unwrap();
        chain.fund(&address, 500).unwrap();
        assert_eq!(chain.balance(&address.to_string()), 1_500);

        let tx = json!({ "inputs": [{
            "previousOutpoint": { "transactionId": hex::encode(outpoint.transaction_id), "index": 0 }
        }]});
        assert!(chain.submit(&tx.to_string()).is_ok());
        assert_eq!(chain.balance(&address.to_string()), 500);
        assert_eq!(chain.submitted().len(), 1);
    }

    #[test]
    fn test_mock_scheduled_funding_and_failures() {
        let chain = MockChain::new();
        let address = Address::p2sh("kaspa", &[0x52]);
        chain.fund_later(&address, 42, 3).unwrap();
        chain.fail_queries(1);

        assert!(chain.get_utxos(&address.to_string()).is_err());
        assert!(chain.get_utxos(&address.to_string()).unwrap().is_empty());
        assert_eq!(chain.get_utxos(&address.to_string()).unwrap()[0].entry.amount, 42);
        assert_eq!(chain.query_count(), 3);
    }

    #[test]
    fn test_mock_scripted_rejection() {
        let chain = MockChain::new();
        chain.push_submit_result(Err(ChainError::Rejected { code: None, message: SEQUENCE_LOCK_ERROR.into() }));
        assert!(chain.submit("{}").unwrap_err().is_sequence_lock_violation());
        assert!(chain.submit("{}").is_ok());
    }
}
