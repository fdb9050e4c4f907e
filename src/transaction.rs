// =============================================================================
// SATKAS - Transactions (Kaspa UTXO model)
// =============================================================================

use serde::{Deserialize, Serialize};

pub type TransactionId = [u8; 32];

pub const SUBNETWORK_ID_SIZE: usize = 20;

/// Sequence used by contract spends (relative lock of one DAA score)
pub const SPEND_INPUT_SEQUENCE: u64 = 1;

pub const DEFAULT_SIG_OP_COUNT: u8 = 1;

/// Referencia a un output anterior
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub transaction_id: TransactionId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(transaction_id: TransactionId, index: u32) -> Self {
        OutPoint { transaction_id, index }
    }

    pub fn from_hex(transaction_id: &str, index: u32) -> Result<Self, String> {
        let bytes = hex::decode(transaction_id).map_err(|e| format!("Invalid transaction id: {}", e))?;
        let id: TransactionId = bytes
            .try_into()
            .map_err(|_| "Transaction id must be 32 bytes".to_string())?;
        Ok(OutPoint::new(id, index))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScriptPublicKey {
    pub version: u16,
    pub script: Vec<u8>,
}

impl ScriptPublicKey {
    pub fn new(version: u16, script: Vec<u8>) -> Self {
        ScriptPublicKey { version, script }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    pub amount: u64,
    pub script_public_key: ScriptPublicKey,
    pub block_daa_score: u64,
    pub is_coinbase: bool,
}

/// UTXO as returned by the chain, together with its outpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SpendableUtxo {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub previous_outpoint: OutPoint,
    pub utxo_entry: UtxoEntry,
    pub sequence: u64,
    pub sig_op_count: u8,
    pub signature_script: Vec<u8>,
}

impl TxInput {
    pub fn new(previous_outpoint: OutPoint, utxo_entry: UtxoEntry, sequence: u64) -> Self {
        TxInput {
            previous_outpoint,
            utxo_entry,
            sequence,
            sig_op_count: DEFAULT_SIG_OP_COUNT,
            signature_script: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub script_public_key: ScriptPublicKey,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct SubnetworkId(pub [u8; SUBNETWORK_ID_SIZE]);

impl SubnetworkId {
    pub const NATIVE: SubnetworkId = SubnetworkId([0u8; SUBNETWORK_ID_SIZE]);

    pub fn is_native(&self) -> bool {
        *self == Self::NATIVE
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub version: u16,
    pub lock_time: u64,
    pub subnetwork_id: SubnetworkId,
    pub gas: u64,
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Native-subnetwork transaction, version 0, no payload
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, lock_time: u64) -> Self {
        Transaction {
            inputs,
            outputs,
            version: 0,
            lock_time,
            subnetwork_id: SubnetworkId::NATIVE,
            gas: 0,
            payload: Vec::new(),
        }
    }

    pub fn input_sum(&self) -> u64 {
        self.inputs.iter().map(|i| i.utxo_entry.amount).sum()
    }

    pub fn output_sum(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    pub fn to_rpc(&self) -> RpcTransaction {
        RpcTransaction {
            version: self.version,
            inputs: self
                .inputs
                .iter()
                .map(|i| RpcInput {
                    previous_outpoint: RpcOutpoint {
                        transaction_id: hex::encode(i.previous_outpoint.transaction_id),
                        index: i.previous_outpoint.index,
                    },
                    signature_script: hex::encode(&i.signature_script),
                    sequence: i.sequence,
                    sig_op_count: i.sig_op_count,
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|o| RpcOutput {
                    amount: o.value,
                    script_public_key: RpcScriptPublicKey {
                        version: o.script_public_key.version,
                        script_public_key: hex::encode(&o.script_public_key.script),
                    },
                })
                .collect(),
            lock_time: self.lock_time,
            subnetwork_id: hex::encode(self.subnetwork_id.0),
            gas: self.gas,
            payload: hex::encode(&self.payload),
        }
    }

    /// Compact JSON accepted by the node's submit call
    pub fn to_rpc_json(&self) -> Result<String, String> {
        serde_json::to_string(&self.to_rpc()).map_err(|e| format!("Failed to serialize transaction: {}", e))
    }
}

// =============================================================================
// RPC representation
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcOutpoint {
    pub transaction_id: String,
    pub index: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcInput {
    pub previous_outpoint: RpcOutpoint,
    pub signature_script: String,
    pub sequence: u64,
    pub sig_op_count: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcScriptPublicKey {
    pub version: u16,
    pub script_public_key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcOutput {
    pub amount: u64,
    pub script_public_key: RpcScriptPublicKey,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub version: u16,
    pub inputs: Vec<RpcInput>,
    pub outputs: Vec<RpcOutput>,
    pub lock_time: u64,
    pub subnetwork_id: String,
    pub gas: u64,
    pub payload: String,
}

// =============================================================================
// Tests
// =============================================================================
