// =============================================================================
// SATKAS - Swap Engine
// =============================================================================
//
// Drives one swap from invoice to spend:
//
//   Init -> ContractReady -> AwaitingFunding -> Funded -> Spending
//        -> Completed | Refunded | Expired | Failed
//
// Every transition is written to storage. Node calls exist in two flavors
// with the same semantics: `*_blocking` runs on the calling thread, the
// async versions move each call to tokio's blocking pool.
//
// The spend branch is saved before broadcasting. A swap resumed in
// `Spending` first checks the contract: drained means the spend landed,
// still funded means it goes back to `Funded`.
//
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::htlc_script::{
    contract_address, full_script, short_script, spend_script, verify_contract_address, ContractParameters,
    ContractVariant, ShortContractParameters, SpendPath,
};
use super::swap::{Role, SpendKind, SwapError, SwapRecord, SwapState, SwapStatus, SwapType};
use super::{verify_secret, HASH_SIZE, SECRET_SIZE};
use crate::address::{Address, VERSION_PUBKEY};
use crate::chain::{ChainClient, ChainError};
use crate::config::SwapConfig;
use crate::contracts::builder::pay_to_address_script;
use crate::contracts::engine::{verify_p2sh_input, ExecutionContext};
use crate::hashes::pubkey_hash;
use crate::invoice::{DecodedInvoice, InvoiceClient, PaymentOutcome};
use crate::sighash::{SigHashType, SighashReusedValues};
use crate::storage::Storage;
use crate::transaction::{SpendableUtxo, Transaction, TxInput, TxOutput, SPEND_INPUT_SEQUENCE};
use crate::wallet::{raw_input_signature, SigningCapability, SECRET_KEY_SIZE};
use crate::{format_sompi, now_millis};

/// How long after the timelock a sender waits before refunding
pub const REFUND_GRACE_MS: u64 = 180_000;

// =============================================================================
// Retry Policy
// =============================================================================

/// Broadcast retries for sequence-lock rejections
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// None retries forever
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded(delay: Duration) -> Self {
        RetryPolicy { delay, max_retries: None }
    }

    pub fn allows(&self, retries_done: u32) -> bool {
        self.max_retries.map_or(true, |max| retries_done < max)
    }
}

// =============================================================================
// Parties and funding
// =============================================================================

/// Both ends of the contract, as p2pk addresses
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapParties {
    /// Locks the KAS, may refund after the timelock
    pub sender: Address,
    /// Redeems with the preimage
    pub receiver: Address,
}

impl SwapParties {
    pub fn parse(sender: &str, receiver: &str) -> Result<Self, SwapError> {
        Ok(SwapParties {
            sender: Address::decode(sender)?,
            receiver: Address::decode(receiver)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FundingStatus {
    Waiting { total: u64 },
    Funded { total: u64 },
}

/// What a funded sender observed while watching its contract
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SenderOutcome {
    /// Contract drained by the receiver
    Redeemed,
    /// None when the refund was broadcast by an earlier run
    Refunded { tx_id: Option<String> },
}

enum SenderStep {
    Wait,
    Redeemed,
    Refunded,
    Refund,
}

struct Contract {
    script: Vec<u8>,
    address: Address,
    secret_hash: [u8; HASH_SIZE],
    timelock: u64,
    parties: SwapParties,
}

// =============================================================================
// Swap Engine
// =============================================================================

pub struct SwapEngine {
    role: Role,
    swap_type: SwapType,
    config: SwapConfig,
    chain: Arc<dyn ChainClient>,
    invoices: Arc<dyn InvoiceClient>,
    signer: Arc<dyn SigningCapability>,
    storage: Arc<Storage>,

    state: SwapState,
    record: Option<SwapRecord>,
    contract: Option<Contract>,
    utxos: Vec<SpendableUtxo>,
    last_seen_total: u64,
    output_address: Option<Address>,
}

impl SwapEngine {
    pub fn new(
        role: Role,
        swap_type: SwapType,
        config: SwapConfig,
        chain: Arc<dyn ChainClient>,
        invoices: Arc<dyn InvoiceClient>,
        signer: Arc<dyn SigningCapability>,
        storage: Arc<Storage>,
    ) -> Self {
        SwapEngine {
            role,
            swap_type,
            config,
            chain,
            invoices,
            signer,
            storage,
            state: SwapState::Init,
            record: None,
            contract: None,
            utxos: Vec::new(),
            last_seen_total: 0,
            output_address: None,
        }
    }

    /// Continues a persisted swap. Funding is re-checked, and a swap saved
    /// mid-spend resumes in `Spending` until `reconcile_spend` runs.
    pub fn resume(
        record: SwapRecord,
        role: Role,
        config: SwapConfig,
        chain: Arc<dyn ChainClient>,
        invoices: Arc<dyn InvoiceClient>,
        signer: Arc<dyn SigningCapability>,
        storage: Arc<Storage>,
    ) -> Result<Self, SwapError> {
        if record.status.is_terminal() {
            return Err(SwapError::InvalidState(format!(
                "swap {} is already {}",
                record.short_id(),
                record.status
            )));
        }

        let parties = SwapParties::parse(&record.sender_address, &record.receiver_address)?;
        let script = record.contract_script_bytes()?;
        let address = contract_address(&config.network_prefix, &script);
        if address.to_string() != record.contract_address {
            return Err(SwapError::Mismatch {
                expected: address.to_string(),
                provided: record.contract_address.clone(),
            });
        }
        let secret_hash: [u8; HASH_SIZE] = hex::decode(&record.payment_hash)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| SwapError::Format(format!("payment hash {}", record.payment_hash)))?;

        let mut engine = SwapEngine::new(role, record.swap_type, config, chain, invoices, signer, storage);
        engine.state = match (record.status, record.spend_kind) {
            (SwapStatus::Init, _) => SwapState::ContractReady,
            (_, Some(_)) => SwapState::Spending,
            _ => SwapState::AwaitingFunding,
        };
        engine.contract = Some(Contract {
            script,
            address,
            secret_hash,
            timelock: record.timelock,
            parties,
        });
        info!("Resumed swap {} in state {}", record.short_id(), engine.state);
        engine.record = Some(record);
        Ok(engine)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn record(&self) -> Option<&SwapRecord> {
        self.record.as_ref()
    }

    pub fn funding_utxos(&self) -> &[SpendableUtxo] {
        &self.utxos
    }

    pub fn contract_address(&self) -> Option<&Address> {
        self.contract.as_ref().map(|c| &c.address)
    }

    pub fn contract_script(&self) -> Option<&[u8]> {
        self.contract.as_ref().map(|c| c.script.as_slice())
    }

    /// Pays the spend output somewhere other than the default party address
    pub fn set_output_address(&mut self, address: Address) {
        self.output_address = Some(address);
    }

    fn contract(&self) -> Result<&Contract, SwapError> {
        self.contract
            .as_ref()
            .ok_or_else(|| SwapError::InvalidState("contract not prepared".to_string()))
    }

    // =========================================================================
    // State handling
    // =========================================================================

    fn transition(&mut self, next: SwapState) -> Result<(), SwapError> {
        if !self.state.can_transition_to(next) {
            return Err(SwapError::InvalidState(format!("cannot go from {} to {}", self.state, next)));
        }
        debug!("Swap state {} -> {}", self.state, next);
        self.state = next;

        if let Some(record) = self.record.as_mut() {
            record.set_status(next.status())?;
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), SwapError> {
        match &self.record {
            Some(record) => self.storage.put_swap(record).map_err(SwapError::Storage),
            None => Ok(()),
        }
    }

    /// Marks the swap failed and hands the error back
    fn fail(&mut self, err: SwapError) -> SwapError {
        error!("Swap failed: {}", err);
        if !self.state.is_terminal() {
            if let Err(e) = self.transition(SwapState::Failed) {
                warn!("Could not record failure: {}", e);
            }
        }
        err
    }

    fn require_state(&self, expected: SwapState) -> Result<(), SwapError> {
        if self.state != expected {
            return Err(SwapError::InvalidState(format!("expected {}, swap is {}", expected, self.state)));
        }
        Ok(())
    }

    // =========================================================================
    // Init -> ContractReady
    // =========================================================================

    /// Decodes the invoice and derives the contract both parties will compute
    pub fn prepare(&mut self, invoice: &str, parties: &SwapParties) -> Result<&SwapRecord, SwapError> {
        self.require_state(SwapState::Init)?;
        let decoded = self.invoices.decode(invoice)?;
        self.prepare_decoded(invoice, decoded, parties)
    }

    pub async fn prepare_async(&mut self, invoice: &str, parties: &SwapParties) -> Result<&SwapRecord, SwapError> {
        self.require_state(SwapState::Init)?;
        let invoices = Arc::clone(&self.invoices);
        let text = invoice.to_string();
        let decoded = tokio::task::spawn_blocking(move || invoices.decode(&text))
            .await
            .map_err(|e| SwapError::InvalidState(format!("invoice decode task failed: {}", e)))??;
        self.prepare_decoded(invoice, decoded, parties)
    }

    fn prepare_decoded(
        &mut self,
        invoice: &str,
        decoded: DecodedInvoice,
        parties: &SwapParties,
    ) -> Result<&SwapRecord, SwapError> {
        let secret_hash = decoded.payment_hash;
        let timelock = decoded.timelock_millis();
        let sender_pubkey = party_pubkey(&parties.sender)?;
        let receiver_pubkey = party_pubkey(&parties.receiver)?;

        let script = match self.config.contract_variant {
            ContractVariant::Full => full_script(&ContractParameters {
                secret_hash,
                receiver_pubkey_hash: pubkey_hash(receiver_pubkey),
                timelock,
                sender_pubkey_hash: pubkey_hash(sender_pubkey),
            }),
            ContractVariant::Short => {
                warn!("Using the experimental short contract script");
                short_script(&ShortContractParameters {
                    secret_hash,
                    receiver_pubkey: receiver_pubkey.to_vec(),
                    timelock,
                    sender_pubkey: sender_pubkey.to_vec(),
                })
            }
        };
        let address = contract_address(&self.config.network_prefix, &script);
        let address_text = address.encode()?;

        let record = SwapRecord::new(
            self.swap_type,
            invoice.trim(),
            &secret_hash,
            &parties.sender.encode()?,
            &parties.receiver.encode()?,
            &script,
            &address_text,
            decoded.sat_amount(),
            timelock,
        );
        if let Some(existing) = self.storage.get_swap(&record.payment_hash).map_err(SwapError::Storage)? {
            if existing.status.is_terminal() {
                return Err(SwapError::InvalidState(format!(
                    "swap {} is already {}",
                    existing.short_id(),
                    existing.status
                )));
            }
        }

        info!(
            "{} {} swap: {} sats, contract {} (timelock {})",
            self.role,
            self.swap_type,
            decoded.sat_amount(),
            address_text,
            timelock
        );

        self.contract = Some(Contract {
            script,
            address,
            secret_hash,
            timelock,
            parties: parties.clone(),
        });
        self.record = Some(record);
        self.transition(SwapState::ContractReady)?;

        self.record
            .as_ref()
            .ok_or_else(|| SwapError::InvalidState("record missing".to_string()))
    }

    /// Aborts the swap if the counterparty derived a different contract address
    pub fn verify_counterparty_address(&mut self, claimed: &str) -> Result<(), SwapError> {
        let contract = self.contract()?;
        let result = verify_contract_address(&self.config.network_prefix, &contract.script, claimed);
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    // =========================================================================
    // Funding
    // =========================================================================

    /// Evaluates one UTXO query; a failed query counts as "nothing yet"
    fn evaluate_funding(
        &mut self,
        query: Result<Vec<SpendableUtxo>, ChainError>,
        min_amount: u64,
    ) -> Result<FundingStatus, SwapError> {
        if self.state == SwapState::ContractReady {
            self.transition(SwapState::AwaitingFunding)?;
        }
        self.require_state(SwapState::AwaitingFunding)?;

        let (address, timelock) = {
            let contract = self.contract()?;
            (contract.address.to_string(), contract.timelock)
        };

        match query {
            Ok(utxos) => self.utxos = utxos,
            Err(e) => warn!("UTXO query for {} failed: {}", address, e),
        }
        let total: u64 = self.utxos.iter().map(|u| u.entry.amount).sum();

        if !self.utxos.is_empty() && total >= min_amount {
            info!("Contract {} funded with {} KAS", address, format_sompi(total));
            self.transition(SwapState::Funded)?;
            return Ok(FundingStatus::Funded { total });
        }

        if total > self.last_seen_total {
            debug!(
                "UTXO detected, but amount is too low ({} / {} KAS)",
                format_sompi(total),
                format_sompi(min_amount)
            );
            self.last_seen_total = total;
        }

        if timelock < now_millis() {
            info!("Invoice expired before {} was funded", address);
            self.transition(SwapState::Expired)?;
            return Err(SwapError::FundingTimeout {
                timelock,
                funded: total,
                required: min_amount,
            });
        }

        Ok(FundingStatus::Waiting { total })
    }

    fn contract_address_text(&self) -> Result<String, SwapError> {
        Ok(self.contract()?.address.to_string())
    }

    /// Single funding check without sleeping
    pub fn poll_funding(&mut self, min_amount: u64) -> Result<FundingStatus, SwapError> {
        let address = self.contract_address_text()?;
        let query = self.chain.get_utxos(&address);
        self.evaluate_funding(query, min_amount)
    }

    pub async fn poll_funding_async(&mut self, min_amount: u64) -> Result<FundingStatus, SwapError> {
        let query = self.query_utxos_async().await?;
        self.evaluate_funding(query, min_amount)
    }

    pub fn await_funding_blocking(&mut self, min_amount: u64) -> Result<u64, SwapError> {
        info!("Awaiting funding of {}", self.contract_address_text()?);
        loop {
            match self.poll_funding(min_amount)? {
                FundingStatus::Funded { total } => return Ok(total),
                FundingStatus::Waiting { .. } => std::thread::sleep(self.config.poll_interval()),
            }
        }
    }

    pub async fn await_funding(&mut self, min_amount: u64) -> Result<u64, SwapError> {
        info!("Awaiting funding of {}", self.contract_address_text()?);
        loop {
            let query = self.query_utxos_async().await?;
            match self.evaluate_funding(query, min_amount)? {
                FundingStatus::Funded { total } => return Ok(total),
                FundingStatus::Waiting { .. } => tokio::time::sleep(self.config.poll_interval()).await,
            }
        }
    }

    async fn query_utxos_async(&self) -> Result<Result<Vec<SpendableUtxo>, ChainError>, SwapError> {
        let address = self.contract_address_text()?;
        let chain = Arc::clone(&self.chain);
        tokio::task::spawn_blocking(move || chain.get_utxos(&address))
            .await
            .map_err(|e| SwapError::InvalidState(format!("UTXO query task failed: {}", e)))
    }

    // =========================================================================
    // Secret
    // =========================================================================

    fn invoice_text(&self) -> Result<String, SwapError> {
        self.record
            .as_ref()
            .map(|r| r.invoice.clone())
            .ok_or_else(|| SwapError::InvalidState("no swap record".to_string()))
    }

    /// Pays the invoice to learn the preimage. Races with an earlier payment
    /// give `None`; the caller then has to supply the preimage itself.
    pub fn obtain_secret(&self) -> Result<Option<[u8; SECRET_SIZE]>, SwapError> {
        let outcome = self.invoices.pay(&self.invoice_text()?)?;
        self.accept_payment(outcome)
    }

    pub async fn obtain_secret_async(&self) -> Result<Option<[u8; SECRET_SIZE]>, SwapError> {
        let invoice = self.invoice_text()?;
        let invoices = Arc::clone(&self.invoices);
        let outcome = tokio::task::spawn_blocking(move || invoices.pay(&invoice))
            .await
            .map_err(|e| SwapError::InvalidState(format!("payment task failed: {}", e)))??;
        self.accept_payment(outcome)
    }

    fn accept_payment(&self, outcome: PaymentOutcome) -> Result<Option<[u8; SECRET_SIZE]>, SwapError> {
        let secret_hash = self.contract()?.secret_hash;
        match outcome {
            PaymentOutcome::Preimage(preimage) => {
                if !verify_secret(&preimage, &secret_hash) {
                    return Err(SwapError::InvalidSecret("preimage does not match payment hash".to_string()));
                }
                info!("Invoice paid, preimage obtained");
                Ok(Some(preimage))
            }
            PaymentOutcome::AlreadyPaid | PaymentOutcome::InTransition => {
                warn!("Invoice payment raced, preimage must be supplied manually");
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Spend construction
    // =========================================================================

    /// Builds and signs the spend of every funding UTXO, then checks each input locally
    pub fn build_spend_transaction(
        &self,
        path: &SpendPath,
        secret_key: &[u8; SECRET_KEY_SIZE],
    ) -> Result<Transaction, SwapError> {
        let contract = self.contract()?;

        if let SpendPath::Redeem { secret } = path {
            if !verify_secret(secret, &contract.secret_hash) {
                return Err(SwapError::InvalidSecret("sha256(secret) != payment hash".to_string()));
            }
        }

        let total: u64 = self.utxos.iter().map(|u| u.entry.amount).sum();
        if self.utxos.is_empty() || total <= self.config.fee {
            return Err(SwapError::InsufficientFunds { available: total, fee: self.config.fee });
        }

        let output_address = match (&self.output_address, path) {
            (Some(address), _) => address,
            (None, SpendPath::Redeem { .. }) => &contract.parties.receiver,
            (None, SpendPath::Refund) => &contract.parties.sender,
        };
        let output = TxOutput {
            value: total - self.config.fee,
            script_public_key: pay_to_address_script(output_address)?,
        };

        let inputs = self
            .utxos
            .iter()
            .map(|u| TxInput::new(u.outpoint.clone(), u.entry.clone(), SPEND_INPUT_SEQUENCE))
            .collect();
        let lock_time = if path.is_redeem() { 0 } else { contract.timelock };
        let mut tx = Transaction::new(inputs, vec![output], lock_time);

        let signer = self.signer.as_ref();
        let pubkey = signer.public_key(secret_key)?;
        let mut reused = SighashReusedValues::new();
        let mut signatures = Vec::with_capacity(tx.inputs.len());
        for i in 0..tx.inputs.len() {
            signatures.push(raw_input_signature(&tx, i, SigHashType::ALL, secret_key, &mut reused, signer)?);
        }
        for (input, signature) in tx.inputs.iter_mut().zip(signatures) {
            input.signature_script = spend_script(&signature, &pubkey, path, &contract.script);
        }

        for i in 0..tx.inputs.len() {
            verify_p2sh_input(ExecutionContext { tx: &tx, input_index: i, signer })?;
        }

        debug!(
            "Built {} spending {} KAS in {} inputs",
            if path.is_redeem() { "redeem" } else { "refund" },
            format_sompi(total),
            tx.inputs.len()
        );
        Ok(tx)
    }

    fn begin_spend(
        &mut self,
        secret: Option<[u8; SECRET_SIZE]>,
        secret_key: &[u8; SECRET_KEY_SIZE],
    ) -> Result<(SpendPath, String), SwapError> {
        self.require_state(SwapState::Funded)?;
        let path = match secret {
            Some(secret) => SpendPath::Redeem { secret },
            None => SpendPath::Refund,
        };

        let built = self
            .build_spend_transaction(&path, secret_key)
            .and_then(|tx| tx.to_rpc_json().map_err(SwapError::Format));
        let tx_json = match built {
            Ok(json) => json,
            Err(e) => return Err(self.fail(e)),
        };
        if let Some(record) = self.record.as_mut() {
            record.spend_kind = Some(path.kind());
        }
        self.transition(SwapState::Spending)?;
        Ok((path, tx_json))
    }

    /// Ok(Some(id)) when done, Ok(None) to retry after the policy delay
    fn handle_submit(
        &mut self,
        path: &SpendPath,
        result: Result<String, ChainError>,
        retries: &mut u32,
    ) -> Result<Option<String>, SwapError> {
        match result {
            Ok(tx_id) => {
                info!("Spend transaction broadcasted, txid: {}", tx_id);
                if let Some(record) = self.record.as_mut() {
                    record.spend_tx_id = Some(tx_id.clone());
                }
                if let Err(e) = self.transition(path.kind().settled_state()) {
                    error!("Spend {} is on its way but could not be recorded: {}", tx_id, e);
                    return Err(SwapError::SpendNotRecorded { tx_id, reason: e.to_string() });
                }
                Ok(Some(tx_id))
            }
            Err(e) if e.is_sequence_lock_violation() && self.config.retry_policy().allows(*retries) => {
                *retries += 1;
                warn!("Sequence lock not met yet, retry #{}", retries);
                Ok(None)
            }
            Err(e) => Err(self.fail(SwapError::Submit(e))),
        }
    }

    /// Spends the funded contract: redeem when `secret` is given, refund otherwise
    pub fn spend_blocking(
        &mut self,
        secret: Option<[u8; SECRET_SIZE]>,
        secret_key: &[u8; SECRET_KEY_SIZE],
    ) -> Result<String, SwapError> {
        let (path, tx_json) = self.begin_spend(secret, secret_key)?;
        let delay = self.config.retry_policy().delay;
        let mut retries = 0;
        loop {
            let result = self.chain.submit(&tx_json);
            if let Some(tx_id) = self.handle_submit(&path, result, &mut retries)? {
                return Ok(tx_id);
            }
            std::thread::sleep(delay);
        }
    }

    pub async fn spend(
        &mut self,
        secret: Option<[u8; SECRET_SIZE]>,
        secret_key: &[u8; SECRET_KEY_SIZE],
    ) -> Result<String, SwapError> {
        let (path, tx_json) = self.begin_spend(secret, secret_key)?;
        let delay = self.config.retry_policy().delay;
        let mut retries = 0;
        loop {
            let chain = Arc::clone(&self.chain);
            let json = tx_json.clone();
            let result = tokio::task::spawn_blocking(move || chain.submit(&json))
                .await
                .unwrap_or_else(|e| Err(ChainError::Connection(format!("submit task failed: {}", e))));
            if let Some(tx_id) = self.handle_submit(&path, result, &mut retries)? {
                return Ok(tx_id);
            }
            tokio::time::sleep(delay).await;
        }
    }

    // =========================================================================
    // Interrupted spends
    // =========================================================================

    fn spend_kind(&self) -> Option<SpendKind> {
        self.record.as_ref().and_then(|r| r.spend_kind)
    }

    /// Settles a `Spending` swap from one UTXO query; None when the query failed
    fn reconcile_step(&mut self, query: Result<Vec<SpendableUtxo>, ChainError>) -> Result<Option<SwapState>, SwapError> {
        self.require_state(SwapState::Spending)?;
        let kind = self
            .spend_kind()
            .ok_or_else(|| SwapError::InvalidState("spend branch not recorded".to_string()))?;

        let utxos = match query {
            Ok(utxos) => utxos,
            Err(e) => {
                warn!("UTXO query failed: {}", e);
                return Ok(None);
            }
        };
        let next = if utxos.is_empty() {
            info!("Contract already spent, recording the {:?}", kind);
            kind.settled_state()
        } else {
            info!("Earlier spend did not land, contract still funded");
            SwapState::Funded
        };
        self.utxos = utxos;
        self.transition(next)?;
        Ok(Some(next))
    }

    /// Resolves a swap resumed in `Spending`; returns the resulting state
    pub fn reconcile_spend_blocking(&mut self) -> Result<SwapState, SwapError> {
        loop {
            let address = self.contract_address_text()?;
            let query = self.chain.get_utxos(&address);
            match self.reconcile_step(query)? {
                Some(state) => return Ok(state),
                None => std::thread::sleep(self.config.poll_interval()),
            }
        }
    }

    pub async fn reconcile_spend(&mut self) -> Result<SwapState, SwapError> {
        loop {
            let query = self.query_utxos_async().await?;
            match self.reconcile_step(query)? {
                Some(state) => return Ok(state),
                None => tokio::time::sleep(self.config.poll_interval()).await,
            }
        }
    }

    // =========================================================================
    // Sender side
    // =========================================================================

    fn sender_step(&mut self, query: Result<Vec<SpendableUtxo>, ChainError>) -> Result<SenderStep, SwapError> {
        if self.state == SwapState::Spending {
            return Ok(match self.reconcile_step(query)? {
                Some(SwapState::Refunded) => SenderStep::Refunded,
                Some(SwapState::Completed) => SenderStep::Redeemed,
                _ => SenderStep::Wait,
            });
        }
        self.require_state(SwapState::Funded)?;
        let timelock = self.contract()?.timelock;

        match query {
            Ok(utxos) if utxos.is_empty() => {
                self.utxos.clear();
                if self.spend_kind() == Some(SpendKind::Refund) {
                    info!("Refund from an earlier attempt confirmed");
                    self.transition(SwapState::Refunded)?;
                    return Ok(SenderStep::Refunded);
                }
                info!("Counterparty redeemed the contract");
                self.transition(SwapState::Completed)?;
                return Ok(SenderStep::Redeemed);
            }
            Ok(utxos) => self.utxos = utxos,
            Err(e) => warn!("UTXO query failed: {}", e),
        }

        if now_millis() > timelock.saturating_add(REFUND_GRACE_MS) {
            return Ok(SenderStep::Refund);
        }
        Ok(SenderStep::Wait)
    }

    fn earlier_refund(&self) -> SenderOutcome {
        SenderOutcome::Refunded { tx_id: self.record.as_ref().and_then(|r| r.spend_tx_id.clone()) }
    }

    /// After funding, waits for the receiver to redeem; refunds once the
    /// timelock plus a grace period has passed
    pub fn settle_as_sender_blocking(&mut self, secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<SenderOutcome, SwapError> {
        loop {
            let address = self.contract_address_text()?;
            let query = self.chain.get_utxos(&address);
            match self.sender_step(query)? {
                SenderStep::Redeemed => return Ok(SenderOutcome::Redeemed),
                SenderStep::Refunded => return Ok(self.earlier_refund()),
                SenderStep::Refund => {
                    let tx_id = self.spend_blocking(None, secret_key)?;
                    return Ok(SenderOutcome::Refunded { tx_id: Some(tx_id) });
                }
                SenderStep::Wait => std::thread::sleep(self.config.poll_interval()),
            }
        }
    }

    pub async fn settle_as_sender(&mut self, secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<SenderOutcome, SwapError> {
        loop {
            let query = self.query_utxos_async().await?;
            match self.sender_step(query)? {
                SenderStep::Redeemed => return Ok(SenderOutcome::Redeemed),
                SenderStep::Refunded => return Ok(self.earlier_refund()),
                SenderStep::Refund => {
                    let tx_id = self.spend(None, secret_key).await?;
                    return Ok(SenderOutcome::Refunded { tx_id: Some(tx_id) });
                }
                SenderStep::Wait => tokio::time::sleep(self.config.poll_interval()).await,
            }
        }
    }
}

/// Public key carried by a p2pk party address
fn party_pubkey(address: &Address) -> Result<&[u8], SwapError> {
    if address.version != VERSION_PUBKEY {
        return Err(SwapError::Format(format!(
            "party address must be pay-to-pubkey, got version {}",
            address.version
        )));
    }
    Ok(&address.payload)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::chain::{MockChain, SEQUENCE_LOCK_ERROR};
    use crate::hashes::sha256;
    use crate::invoice::{InvoiceError, MockInvoices};
    use crate::wallet::SchnorrSigner;

    const FEE: u64 = 100_000;

    struct Harness {
        chain: Arc<MockChain>,
        invoices: Arc<MockInvoices>,
        signer: Arc<SchnorrSigner>,
        storage: Arc<Storage>,
        sender_sk: [u8; 32],
        receiver_sk: [u8; 32],
        parties: SwapParties,
        preimage: [u8; 32],
    }

    fn harness() -> Harness {
        let signer = Arc::new(SchnorrSigner::new());
        let sender_sk = signer.generate_secret_key();
        let receiver_sk = signer.generate_secret_key();
        let parties = SwapParties {
            sender: Address::p2pk("kaspa", &signer.public_key(&sender_sk).unwrap()),
            receiver: Address::p2pk("kaspa", &signer.public_key(&receiver_sk).unwrap()),
        };
        Harness {
            chain: Arc::new(MockChain::new()),
            invoices: Arc::new(MockInvoices::new()),
            signer,
            storage: Arc::new(Storage::open_temporary().unwrap()),
            sender_sk,
            receiver_sk,
            parties,
            preimage: [0x5A; 32],
        }
    }

    fn fast_config(max_retries: Option<u32>) -> SwapConfig {
        SwapConfig {
            poll_interval_ms: 1,
            retry_delay_ms: 1,
            max_broadcast_retries: max_retries,
            ..SwapConfig::default()
        }
    }

    impl Harness {
        fn engine(&self, role: Role, config: SwapConfig) -> SwapEngine {
            SwapEngine::new(
                role,
                SwapType::SatToKas,
                config,
                self.chain.clone(),
                self.invoices.clone(),
                self.signer.clone(),
                self.storage.clone(),
            )
        }

        fn resume(&self, role: Role, record: SwapRecord) -> SwapEngine {
            SwapEngine::resume(
                record,
                role,
                fast_config(None),
                self.chain.clone(),
                self.invoices.clone(),
                self.signer.clone(),
                self.storage.clone(),
            )
            .unwrap()
        }

        /// Invoice expiring `expires_in_ms` from now
        fn invoice(&self, expires_in_ms: i64) -> String {
            let now = now_millis() as i64;
            let expiry_at = (now + expires_in_ms).max(0) as u64;
            self.invoices.issue(2_000, expiry_at / 1000, 0, self.preimage)
        }
    }

    #[test]
    fn test_prepare_derives_contract_and_persists() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        let invoice = h.invoice(600_000);

        let record = engine.prepare(&invoice, &h.parties).unwrap().clone();
        assert_eq!(engine.state(), SwapState::ContractReady);
        assert_eq!(record.status, SwapStatus::Init);
        assert_eq!(record.payment_hash, hex::encode(sha256(&h.preimage)));
        assert_eq!(record.sat_amount, 2_000);
        assert!(record.contract_address.starts_with("kaspa:p"));
        assert_eq!(h.storage.get_swap(&record.payment_hash).unwrap().unwrap(), record);

        // A second engine derives the same address from the same inputs
        let mut other = h.engine(Role::Maker, fast_config(None));
        other.prepare(&invoice, &h.parties).unwrap();
        assert_eq!(other.contract_address(), engine.contract_address());
        assert!(engine.verify_counterparty_address(&record.contract_address).is_ok());
    }

    #[test]
    fn test_prepare_rejects_p2sh_party() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        let parties = SwapParties {
            sender: Address::p2sh("kaspa", &[0x51]),
            receiver: h.parties.receiver.clone(),
        };
        assert!(matches!(engine.prepare(&h.invoice(600_000), &parties), Err(SwapError::Format(_))));
        assert_eq!(engine.state(), SwapState::Init);
    }

    #[test]
    fn test_address_mismatch_fails_swap() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();

        let wrong = Address::p2sh("kaspa", &[0x00]).to_string();
        assert!(matches!(engine.verify_counterparty_address(&wrong), Err(SwapError::Mismatch { .. })));
        assert_eq!(engine.state(), SwapState::Failed);
        assert_eq!(engine.record().unwrap().status, SwapStatus::Failed);
        assert!(matches!(engine.poll_funding(1), Err(SwapError::InvalidState(_))));
    }

    #[test]
    fn test_funding_waits_then_funds() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        let address = engine.contract_address().unwrap().clone();

        h.chain.fail_queries(1);
        h.chain.fund_later(&address, 400_000, 3).unwrap();
        h.chain.fund_later(&address, 700_000, 4).unwrap();

        assert_eq!(engine.poll_funding(1_000_000).unwrap(), FundingStatus::Waiting { total: 0 });
        assert_eq!(engine.state(), SwapState::AwaitingFunding);

        let total = engine.await_funding_blocking(1_000_000).unwrap();
        assert_eq!(total, 1_100_000);
        assert_eq!(engine.state(), SwapState::Funded);
        assert_eq!(engine.funding_utxos().len(), 2);
        assert_eq!(h.chain.query_count(), 4);
    }

    #[test]
    fn test_funding_expires() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(-5_000), &h.parties).unwrap();

        let err = engine.await_funding_blocking(1_000).unwrap_err();
        assert!(matches!(err, SwapError::FundingTimeout { funded: 0, .. }));
        assert_eq!(engine.state(), SwapState::Expired);
        assert_eq!(engine.record().unwrap().status, SwapStatus::Expired);
    }

    #[test]
    fn test_funded_after_timelock_still_spendable() {
        let h = harness();
        let mut engine = h.engine(Role::Maker, fast_config(None));
        engine.prepare(&h.invoice(-5_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 1_000_000).unwrap();
        assert_eq!(engine.await_funding_blocking(1_000_000).unwrap(), 1_000_000);
    }

    #[test]
    fn test_redeem_with_sequence_lock_retry() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 5_000_000).unwrap();
        engine.await_funding_blocking(1_000_000).unwrap();

        let rejection = || ChainError::Rejected { code: Some(400), message: SEQUENCE_LOCK_ERROR.to_string() };
        h.chain.push_submit_result(Err(rejection()));
        h.chain.push_submit_result(Err(rejection()));

        let secret = engine.obtain_secret().unwrap().unwrap();
        let tx_id = engine.spend_blocking(Some(secret), &h.receiver_sk).unwrap();

        assert_eq!(engine.state(), SwapState::Completed);
        assert_eq!(h.chain.submitted().len(), 3);
        let record = h.storage.get_swap(&engine.record().unwrap().payment_hash).unwrap().unwrap();
        assert_eq!(record.status, SwapStatus::Completed);
        assert_eq!(record.spend_tx_id, Some(tx_id));

        let json: serde_json::Value = serde_json::from_str(&h.chain.submitted()[0]).unwrap();
        assert_eq!(json["lockTime"], 0);
        assert_eq!(json["outputs"][0]["amount"], 5_000_000 - FEE);
        assert_eq!(json["inputs"][0]["sequence"], 1);
    }

    #[test]
    fn test_bounded_retries_fail() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(Some(1)));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 5_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();

        for _ in 0..3 {
            h.chain.push_submit_result(Err(ChainError::Rejected { code: None, message: SEQUENCE_LOCK_ERROR.into() }));
        }
        let err = engine.spend_blocking(Some(h.preimage), &h.receiver_sk).unwrap_err();
        assert!(matches!(err, SwapError::Submit(ref e) if e.is_sequence_lock_violation()));
        assert_eq!(h.chain.submitted().len(), 2);
        assert_eq!(engine.state(), SwapState::Failed);
    }

    #[test]
    fn test_other_rejection_is_terminal() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 5_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();

        h.chain.push_submit_result(Err(ChainError::Rejected { code: None, message: "mass too high".into() }));
        assert!(matches!(engine.spend_blocking(Some(h.preimage), &h.receiver_sk), Err(SwapError::Submit(_))));
        assert_eq!(h.chain.submitted().len(), 1);
        assert_eq!(engine.record().unwrap().status, SwapStatus::Failed);
    }

    #[test]
    fn test_wrong_secret_or_key_never_broadcasts() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 5_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();

        let err = engine.build_spend_transaction(&SpendPath::Redeem { secret: [1; 32] }, &h.receiver_sk);
        assert!(matches!(err, Err(SwapError::InvalidSecret(_))));

        // sender key on the redeem branch fails local verification
        let err = engine.build_spend_transaction(&SpendPath::Redeem { secret: h.preimage }, &h.sender_sk);
        assert!(matches!(err, Err(SwapError::Script(_))));

        assert!(h.chain.submitted().is_empty());
        assert_eq!(engine.state(), SwapState::Funded);
    }

    #[test]
    fn test_refund_sets_lock_time_and_pays_sender() {
        let h = harness();
        let mut engine = h.engine(Role::Maker, fast_config(None));
        engine.prepare(&h.invoice(-(REFUND_GRACE_MS as i64) - 10_000), &h.parties).unwrap();
        let timelock = engine.record().unwrap().timelock;
        h.chain.fund(engine.contract_address().unwrap(), 3_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();

        let outcome = engine.settle_as_sender_blocking(&h.sender_sk).unwrap();
        assert!(matches!(outcome, SenderOutcome::Refunded { .. }));
        assert_eq!(engine.state(), SwapState::Refunded);

        let json: serde_json::Value = serde_json::from_str(&h.chain.submitted()[0]).unwrap();
        assert_eq!(json["lockTime"], timelock);
        let sender_spk = pay_to_address_script(&h.parties.sender).unwrap();
        assert_eq!(json["outputs"][0]["scriptPublicKey"]["scriptPublicKey"], hex::encode(sender_spk.script));
    }

    #[test]
    fn test_insufficient_funds() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), FEE).unwrap();
        engine.await_funding_blocking(1).unwrap();

        let err = engine.spend_blocking(Some(h.preimage), &h.receiver_sk).unwrap_err();
        assert_eq!(err, SwapError::InsufficientFunds { available: FEE, fee: FEE });
        assert_eq!(engine.state(), SwapState::Failed);
    }

    #[test]
    fn test_resume_from_storage() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        let record = engine.prepare(&h.invoice(600_000), &h.parties).unwrap().clone();

        let stored = h.storage.get_swap(&record.payment_hash).unwrap().unwrap();
        let mut resumed = SwapEngine::resume(
            stored,
            Role::Taker,
            fast_config(None),
            h.chain.clone(),
            h.invoices.clone(),
            h.signer.clone(),
            h.storage.clone(),
        )
        .unwrap();
        assert_eq!(resumed.state(), SwapState::ContractReady);
        assert_eq!(resumed.contract_address(), engine.contract_address());

        h.chain.fund(resumed.contract_address().unwrap(), 1_000_000).unwrap();
        assert!(resumed.await_funding_blocking(1).is_ok());
    }

    #[test]
    fn test_retry_policy() {
        let unbounded = RetryPolicy::unbounded(Duration::from_millis(1));
        assert!(unbounded.allows(u32::MAX - 1));
        let bounded = RetryPolicy { delay: Duration::ZERO, max_retries: Some(2) };
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));
    }

    #[tokio::test]
    async fn test_async_mode_matches_blocking() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        let address = engine.contract_address().unwrap().clone();
        h.chain.fund_later(&address, 2_000_000, 2).unwrap();
        h.chain.push_submit_result(Err(ChainError::Rejected { code: None, message: SEQUENCE_LOCK_ERROR.into() }));

        assert_eq!(engine.await_funding(1_000_000).await.unwrap(), 2_000_000);
        let tx_id = engine.spend(Some(h.preimage), &h.receiver_sk).await.unwrap();
        assert_eq!(engine.state(), SwapState::Completed);
        assert_eq!(engine.record().unwrap().spend_tx_id.as_deref(), Some(tx_id.as_str()));
        assert_eq!(h.chain.submitted().len(), 2);
    }

    #[test]
    fn test_resume_mid_spend_records_landed_redeem() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        // timelock passes while the process is down
        engine.prepare(&h.invoice(-5_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 2_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();

        // broadcast goes out, then the process dies before recording it
        let (_, tx_json) = engine.begin_spend(Some(h.preimage), &h.receiver_sk).unwrap();
        h.chain.submit(&tx_json).unwrap();
        let hash = engine.record().unwrap().payment_hash.clone();
        drop(engine);

        let stored = h.storage.get_swap(&hash).unwrap().unwrap();
        assert_eq!(stored.status, SwapStatus::Pending);
        assert_eq!(stored.spend_kind, Some(SpendKind::Redeem));

        let mut resumed = h.resume(Role::Taker, stored);
        assert_eq!(resumed.state(), SwapState::Spending);
        assert_eq!(resumed.reconcile_spend_blocking().unwrap(), SwapState::Completed);
        assert_eq!(h.storage.get_swap(&hash).unwrap().unwrap().status, SwapStatus::Completed);
        assert!(matches!(resumed.poll_funding(1), Err(SwapError::InvalidState(_))));
    }

    #[test]
    fn test_resume_mid_spend_with_funds_left_spends_again() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 2_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();
        engine.begin_spend(Some(h.preimage), &h.receiver_sk).unwrap();
        let hash = engine.record().unwrap().payment_hash.clone();
        drop(engine);

        let mut resumed = h.resume(Role::Taker, h.storage.get_swap(&hash).unwrap().unwrap());
        h.chain.fail_queries(1);
        assert_eq!(resumed.reconcile_spend_blocking().unwrap(), SwapState::Funded);
        assert_eq!(resumed.funding_utxos().len(), 1);

        resumed.spend_blocking(Some(h.preimage), &h.receiver_sk).unwrap();
        assert_eq!(resumed.state(), SwapState::Completed);
        assert_eq!(h.chain.submitted().len(), 1);
    }

    #[test]
    fn test_sender_resumed_after_own_refund_is_refunded() {
        let h = harness();
        let mut engine = h.engine(Role::Maker, fast_config(None));
        engine.prepare(&h.invoice(-(REFUND_GRACE_MS as i64) - 10_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 3_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();

        let (_, tx_json) = engine.begin_spend(None, &h.sender_sk).unwrap();
        h.chain.submit(&tx_json).unwrap();
        let hash = engine.record().unwrap().payment_hash.clone();
        drop(engine);

        let mut resumed = h.resume(Role::Maker, h.storage.get_swap(&hash).unwrap().unwrap());
        let outcome = resumed.settle_as_sender_blocking(&h.sender_sk).unwrap();
        assert_eq!(outcome, SenderOutcome::Refunded { tx_id: None });
        assert_eq!(h.storage.get_swap(&hash).unwrap().unwrap().status, SwapStatus::Refunded);
        assert_eq!(h.chain.submitted().len(), 1);
    }

    #[test]
    fn test_funded_sender_sees_late_refund_as_refund() {
        let h = harness();
        let mut engine = h.engine(Role::Maker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 3_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();

        // an earlier refund attempt that confirmed after we went back to Funded
        let tx = engine.build_spend_transaction(&SpendPath::Refund, &h.sender_sk).unwrap();
        h.chain.submit(&tx.to_rpc_json().unwrap()).unwrap();
        if let Some(record) = engine.record.as_mut() {
            record.spend_kind = Some(SpendKind::Refund);
        }

        let outcome = engine.settle_as_sender_blocking(&h.sender_sk).unwrap();
        assert!(matches!(outcome, SenderOutcome::Refunded { .. }));
        assert_eq!(engine.state(), SwapState::Refunded);
    }

    #[test]
    fn test_unrecorded_spend_keeps_tx_id() {
        let h = harness();
        let mut engine = h.engine(Role::Taker, fast_config(None));
        engine.prepare(&h.invoice(600_000), &h.parties).unwrap();
        h.chain.fund(engine.contract_address().unwrap(), 2_000_000).unwrap();
        engine.await_funding_blocking(1).unwrap();
        let (path, _) = engine.begin_spend(Some(h.preimage), &h.receiver_sk).unwrap();

        // record already closed, so saving the outcome fails
        if let Some(record) = engine.record.as_mut() {
            record.status = SwapStatus::Failed;
        }
        let err = engine.handle_submit(&path, Ok("ab12".to_string()), &mut 0).unwrap_err();
        assert!(matches!(err, SwapError::SpendNotRecorded { ref tx_id, .. } if tx_id == "ab12"));
        assert_eq!(engine.record().unwrap().spend_tx_id.as_deref(), Some("ab12"));
    }

    /// Lightning node whose calls hold the thread for a while
    struct SlowInvoices {
        inner: Arc<MockInvoices>,
        busy: Arc<AtomicBool>,
    }

    impl SlowInvoices {
        fn slow<T>(&self, call: impl FnOnce() -> T) -> T {
            self.busy.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            let result = call();
            self.busy.store(false, Ordering::SeqCst);
            result
        }
    }

    impl InvoiceClient for SlowInvoices {
        fn decode(&self, invoice: &str) -> Result<DecodedInvoice, InvoiceError> {
            self.slow(|| self.inner.decode(invoice))
        }

        fn pay(&self, invoice: &str) -> Result<PaymentOutcome, InvoiceError> {
            self.slow(|| self.inner.pay(invoice))
        }

        fn create_invoice(&self, amount_sat: u64, expiry_secs: u64, memo: &str) -> Result<String, InvoiceError> {
            self.inner.create_invoice(amount_sat, expiry_secs, memo)
        }
    }

    /// True once `busy` was seen set while this task kept running
    async fn saw_busy(busy: Arc<AtomicBool>) -> bool {
        for _ in 0..1000 {
            if busy.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_async_invoice_calls_leave_runtime_free() {
        let h = harness();
        let busy = Arc::new(AtomicBool::new(false));
        let slow = Arc::new(SlowInvoices { inner: h.invoices.clone(), busy: busy.clone() });
        let mut engine = SwapEngine::new(
            Role::Taker,
            SwapType::SatToKas,
            fast_config(None),
            h.chain.clone(),
            slow,
            h.signer.clone(),
            h.storage.clone(),
        );
        let invoice = h.invoice(600_000);

        let prepare = async { engine.prepare_async(&invoice, &h.parties).await.map(|r| r.status) };
        let (prepared, seen) = tokio::join!(prepare, saw_busy(busy.clone()));
        assert_eq!(prepared.unwrap(), SwapStatus::Init);
        assert!(seen);
        assert_eq!(engine.state(), SwapState::ContractReady);

        h.chain.fund(engine.contract_address().unwrap(), 1_000_000).unwrap();
        engine.await_funding(1).await.unwrap();
        let (secret, seen) = tokio::join!(engine.obtain_secret_async(), saw_busy(busy.clone()));
        assert_eq!(secret.unwrap(), Some(h.preimage));
        assert!(seen);
    }
}
