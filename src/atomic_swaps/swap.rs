// =============================================================================
// SATKAS - Swap Records, States and Errors
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::AddressError;
use crate::chain::ChainError;
use crate::contracts::engine::ScriptError;
use crate::invoice::InvoiceError;
use crate::sighash::SighashError;
use crate::wallet::SigningError;

// =============================================================================
// Role
// =============================================================================

/// Which side of the orderbook a node is on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Publishes offers and accepts connections
    Maker,
    /// Connects to a maker and takes one of its offers
    Taker,
}

impl Role {
    /// Type of the first message a node sends to its counterparty
    pub fn hello_message_type(&self) -> &'static str {
        match self {
            Role::Maker => "server_hello",
            Role::Taker => "client_hello",
        }
    }

    pub fn counterparty(&self) -> Self {
        match self {
            Role::Maker => Role::Taker,
            Role::Taker => Role::Maker,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Maker => write!(f, "maker"),
            Role::Taker => write!(f, "taker"),
        }
    }
}

// =============================================================================
// Swap Type
// =============================================================================

/// Direction of the swap, named after what the taker gives and gets.
/// Both parties store the same type; `kas_sender` tells who locks the KAS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapType {
    /// Taker pays sats over Lightning, maker locks KAS for the taker
    SatToKas,
    /// Taker locks KAS, maker pays the taker's invoice
    KasToSat,
}

impl SwapType {
    /// Role that funds the contract and may refund it
    pub fn kas_sender(&self) -> Role {
        match self {
            SwapType::SatToKas => Role::Maker,
            SwapType::KasToSat => Role::Taker,
        }
    }

    pub fn is_kas_sender(&self, role: Role) -> bool {
        self.kas_sender() == role
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapType::SatToKas => "sat2kas",
            SwapType::KasToSat => "kas2sat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sat2kas" => Some(SwapType::SatToKas),
            "kas2sat" => Some(SwapType::KasToSat),
            _ => None,
        }
    }
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Status and State
// =============================================================================

/// Durable status stored with a swap record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapStatus {
    Init,
    Pending,
    Completed,
    Refunded,
    Expired,
    Failed,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Refunded | SwapStatus::Expired | SwapStatus::Failed
        )
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapStatus::Init => "INIT",
            SwapStatus::Pending => "PENDING",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Refunded => "REFUNDED",
            SwapStatus::Expired => "EXPIRED",
            SwapStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Which contract branch a spend takes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendKind {
    Redeem,
    Refund,
}

impl SpendKind {
    /// Terminal state once the spend is on chain
    pub fn settled_state(&self) -> SwapState {
        match self {
            SpendKind::Redeem => SwapState::Completed,
            SpendKind::Refund => SwapState::Refunded,
        }
    }
}

/// In-memory lifecycle state of the swap engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapState {
    Init,
    ContractReady,
    AwaitingFunding,
    Funded,
    Spending,
    Completed,
    Refunded,
    Expired,
    Failed,
}

impl SwapState {
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn status(&self) -> SwapStatus {
        match self {
            SwapState::Init | SwapState::ContractReady => SwapStatus::Init,
            SwapState::AwaitingFunding | SwapState::Funded | SwapState::Spending => SwapStatus::Pending,
            SwapState::Completed => SwapStatus::Completed,
            SwapState::Refunded => SwapStatus::Refunded,
            SwapState::Expired => SwapStatus::Expired,
            SwapState::Failed => SwapStatus::Failed,
        }
    }

    /// Whether the engine may move from `self` to `next`
    pub fn can_transition_to(&self, next: SwapState) -> bool {
        use SwapState::*;
        match (self, next) {
            (Init, ContractReady) => true,
            (ContractReady, AwaitingFunding) => true,
            (AwaitingFunding, Funded) | (AwaitingFunding, Expired) => true,
            (Funded, Spending) => true,
            // counterparty redeemed the contract we funded, or our own
            // refund from an earlier attempt confirmed late
            (Funded, Completed) | (Funded, Refunded) => true,
            (Spending, Completed) | (Spending, Refunded) | (Spending, Failed) => true,
            // the broadcast never reached the chain
            (Spending, Funded) => true,
            (s, Failed) => !s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// Swap Record
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_type: SwapType,
    pub invoice: String,
    /// Hex, also the storage key
    pub payment_hash: String,
    pub sender_address: String,
    pub receiver_address: String,
    /// Hex
    pub contract_script: String,
    pub contract_address: String,
    pub sat_amount: u64,
    /// Milliseconds since epoch
    pub timelock: u64,
    pub status: SwapStatus,
    /// Set before the spend is handed to the node
    pub spend_kind: Option<SpendKind>,
    pub spend_tx_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SwapRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        swap_type: SwapType,
        invoice: &str,
        payment_hash: &[u8; 32],
        sender_address: &str,
        receiver_address: &str,
        contract_script: &[u8],
        contract_address: &str,
        sat_amount: u64,
        timelock: u64,
    ) -> Self {
        let now = crate::now_millis();
        SwapRecord {
            swap_type,
            invoice: invoice.to_string(),
            payment_hash: hex::encode(payment_hash),
            sender_address: sender_address.to_string(),
            receiver_address: receiver_address.to_string(),
            contract_script: hex::encode(contract_script),
            contract_address: contract_address.to_string(),
            sat_amount,
            timelock,
            status: SwapStatus::Init,
            spend_kind: None,
            spend_tx_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Terminal records never change status again
    pub fn set_status(&mut self, status: SwapStatus) -> Result<(), SwapError> {
        if self.status.is_terminal() && status != self.status {
            return Err(SwapError::InvalidState(format!(
                "swap {} is already {}",
                self.short_id(),
                self.status
            )));
        }
        self.status = status;
        self.updated_at = crate::now_millis();
        Ok(())
    }

    pub fn contract_script_bytes(&self) -> Result<Vec<u8>, SwapError> {
        hex::decode(&self.contract_script).map_err(|e| SwapError::Format(format!("contract script: {}", e)))
    }

    pub fn short_id(&self) -> &str {
        &self.payment_hash[..self.payment_hash.len().min(16)]
    }
}

// =============================================================================
// Swap Error
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapError {
    /// Malformed address, script or hex
    Format(String),
    Checksum { expected: String, actual: String },
    /// Counterparty's contract address differs from the local one
    Mismatch { expected: String, provided: String },
    /// Timelock passed before the contract was funded
    FundingTimeout { timelock: u64, funded: u64, required: u64 },
    Submit(ChainError),
    Invoice(InvoiceError),
    Signing(SigningError),
    Script(ScriptError),
    InvalidSecret(String),
    InsufficientFunds { available: u64, fee: u64 },
    InvalidState(String),
    Storage(String),
    /// Broadcast succeeded but the outcome could not be saved
    SpendNotRecorded { tx_id: String, reason: String },
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapError::Format(e) => write!(f, "Format error: {}", e),
            SwapError::Checksum { expected, actual } => {
                write!(f, "Checksum failed. Expected {}, got {}", expected, actual)
            }
            SwapError::Mismatch { expected, provided } => write!(
                f,
                "Contract address mismatch: local {}, counterparty {}",
                expected, provided
            ),
            SwapError::FundingTimeout { timelock, funded, required } => write!(
                f,
                "Timelock {} passed with {} of {} sompi funded",
                timelock, funded, required
            ),
            SwapError::Submit(e) => write!(f, "Submit failed: {}", e),
            SwapError::Invoice(e) => write!(f, "Invoice error: {}", e),
            SwapError::Signing(e) => write!(f, "Signing error: {}", e),
            SwapError::Script(e) => write!(f, "Script error: {}", e),
            SwapError::InvalidSecret(e) => write!(f, "Invalid secret: {}", e),
            SwapError::InsufficientFunds { available, fee } => {
                write!(f, "Insufficient funds: {} sompi available, fee is {}", available, fee)
            }
            SwapError::InvalidState(e) => write!(f, "Invalid state: {}", e),
            SwapError::Storage(e) => write!(f, "Storage error: {}", e),
            SwapError::SpendNotRecorded { tx_id, reason } => {
                write!(f, "Spend {} was broadcast but not recorded: {}", tx_id, reason)
            }
        }
    }
}

impl std::error::Error for SwapError {}

impl From<AddressError> for SwapError {
    fn from(e: AddressError) -> Self {
        match e {
            AddressError::Format(msg) => SwapError::Format(msg),
            AddressError::Checksum { expected, actual } => SwapError::Checksum { expected, actual },
        }
    }
}

impl From<ChainError> for SwapError {
    fn from(e: ChainError) -> Self {
        SwapError::Submit(e)
    }
}

impl From<InvoiceError> for SwapError {
    fn from(e: InvoiceError) -> Self {
        SwapError::Invoice(e)
    }
}

impl From<SigningError> for SwapError {
    fn from(e: SigningError) -> Self {
        SwapError::Signing(e)
    }
}

impl From<SighashError> for SwapError {
    fn from(e: SighashError) -> Self {
        SwapError::Signing(SigningError::Sighash(e))
    }
}

impl From<ScriptError> for SwapError {
    fn from(e: ScriptError) -> Self {
        SwapError::Script(e)
    }
}

// =============================================================================
// Tests
// =============================================================================
