// =============================================================================
// SATKAS - Lightning Invoices
// =============================================================================
//
// `InvoiceClient` decodes invoices, pays them and issues new ones.
// `LncliClient` shells out to lnd's `lncli`; without one it can still decode
// invoices with the built-in BOLT11 reader. `MockInvoices` is an in-memory
// node for tests.
//
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::process::Command;
use std::sync::Mutex;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bolt11;
use crate::hashes::sha256;

const IN_TRANSITION: &str = "AlreadyExists desc = payment is in transition";
const ALREADY_PAID: &str = "AlreadyExists desc = invoice is already paid";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceError {
    Decode(String),
    Payment(String),
    /// lncli could not be run
    Command(String),
}

impl fmt::Display for InvoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceError::Decode(e) => write!(f, "Cannot decode invoice: {}", e),
            InvoiceError::Payment(e) => write!(f, "Payment failed: {}", e),
            InvoiceError::Command(e) => write!(f, "lncli failed: {}", e),
        }
    }
}

impl std::error::Error for InvoiceError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInvoice {
    pub amount_msat: u64,
    /// Seconds since epoch
    pub timestamp: u64,
    /// Seconds
    pub expiry: u64,
    pub payment_hash: [u8; 32],
}

impl DecodedInvoice {
    pub fn sat_amount(&self) -> u64 {
        self.amount_msat / 1000
    }

    /// Contract timelock: invoice expiry in milliseconds since epoch
    pub fn timelock_millis(&self) -> u64 {
        self.timestamp.saturating_add(self.expiry).saturating_mul(1000)
    }
}

/// Result of paying an invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Preimage([u8; 32]),
    /// Paid earlier; the preimage has to come from elsewhere
    AlreadyPaid,
    InTransition,
}

impl PaymentOutcome {
    pub fn preimage(&self) -> Option<[u8; 32]> {
        match self {
            PaymentOutcome::Preimage(p) => Some(*p),
            _ => None,
        }
    }
}

pub trait InvoiceClient: Send + Sync {
    fn decode(&self, invoice: &str) -> Result<DecodedInvoice, InvoiceError>;

    fn pay(&self, invoice: &str) -> Result<PaymentOutcome, InvoiceError>;

    /// Issues an invoice and returns its payment request
    fn create_invoice(&self, amount_sat: u64, expiry_secs: u64, memo: &str) -> Result<String, InvoiceError>;
}

/// Invoices are passed to lncli as arguments, so only alphanumerics pass
pub fn check_invoice_text(invoice: &str) -> Result<&str, InvoiceError> {
    let invoice = invoice.trim();
    if invoice.is_empty() || !invoice.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(InvoiceError::Decode("invoice must be alphanumeric".to_string()));
    }
    Ok(invoice)
}

// =============================================================================
// lncli
// =============================================================================

pub struct LncliClient {
    /// None: decode locally, paying and invoicing are unavailable
    lncli_path: Option<String>,
    rpc_server: Option<String>,
}

impl LncliClient {
    pub fn new(lncli_path: Option<&str>, rpc_server: Option<&str>) -> Self {
        Self {
            lncli_path: lncli_path.filter(|s| !s.is_empty()).map(str::to_string),
            rpc_server: rpc_server.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    pub fn has_lncli(&self) -> bool {
        self.lncli_path.is_some()
    }

    fn run(&self, args: &[&str]) -> Result<(String, String), InvoiceError> {
        let lncli = self
            .lncli_path
            .as_deref()
            .ok_or_else(|| InvoiceError::Command("LNCLI is not set".to_string()))?;
        let mut cmd = Command::new(lncli);
        if let Some(server) = &self.rpc_server {
            cmd.arg("--rpcserver").arg(server);
        }
        cmd.args(args);
        debug!("Running {} {:?}", lncli, args);

        let output = cmd
            .output()
            .map_err(|e| InvoiceError::Command(format!("{}: {}", lncli, e)))?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl InvoiceClient for LncliClient {
    fn decode(&self, invoice: &str) -> Result<DecodedInvoice, InvoiceError> {
        let invoice = check_invoice_text(invoice)?;
        if !self.has_lncli() {
            debug!("No lncli configured, using the built-in invoice decoder");
            return bolt11::decode_invoice(invoice);
        }
        let (stdout, stderr) = self.run(&["decodepayreq", invoice])?;
        if stdout.trim().is_empty() {
            return Err(InvoiceError::Decode(stderr.trim().to_string()));
        }
        let json: Value = serde_json::from_str(&stdout).map_err(|e| InvoiceError::Decode(e.to_string()))?;
        parse_decoded_invoice(&json)
    }

    fn pay(&self, invoice: &str) -> Result<PaymentOutcome, InvoiceError> {
        let invoice = check_invoice_text(invoice)?;
        let (stdout, stderr) = self.run(&["payinvoice", invoice, "--json", "--force"])?;
        classify_payment(&stdout, &stderr)
    }

    fn create_invoice(&self, amount_sat: u64, expiry_secs: u64, memo: &str) -> Result<String, InvoiceError> {
        let amount = amount_sat.to_string();
        let expiry = expiry_secs.to_string();
        let (stdout, stderr) = self.run(&["addinvoice", "--amt", &amount, "--expiry", &expiry, "--memo", memo])?;
        let json: Value = serde_json::from_str(&stdout)
            .map_err(|_| InvoiceError::Command(format!("addinvoice: {}", stderr.trim())))?;
        json["payment_request"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| InvoiceError::Command("addinvoice returned no payment_request".to_string()))
    }
}

/// Reads `decodepayreq` output; lncli encodes integers as strings
pub fn parse_decoded_invoice(json: &Value) -> Result<DecodedInvoice, InvoiceError> {
    let field = |name: &str| -> Option<u64> {
        match &json[name] {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    };

    let amount_msat = match field("num_msat") {
        Some(msat) => msat,
        None => {
            let sat = field("num_satoshis").ok_or_else(|| InvoiceError::Decode("missing amount".to_string()))?;
            sat.checked_mul(1000)
                .ok_or_else(|| InvoiceError::Decode(format!("amount of {} sats overflows", sat)))?
        }
    };
    let timestamp = field("timestamp").ok_or_else(|| InvoiceError::Decode("missing timestamp".to_string()))?;
    let expiry = field("expiry").ok_or_else(|| InvoiceError::Decode("missing expiry".to_string()))?;

    let hash_hex = json["payment_hash"]
        .as_str()
        .ok_or_else(|| InvoiceError::Decode("missing payment_hash".to_string()))?;
    let payment_hash = hex_32(hash_hex).ok_or_else(|| InvoiceError::Decode("bad payment_hash".to_string()))?;

    Ok(DecodedInvoice { amount_msat, timestamp, expiry, payment_hash })
}

/// Maps `payinvoice --json` output to an outcome; paid/in-flight races are not errors
pub fn classify_payment(stdout: &str, stderr: &str) -> Result<PaymentOutcome, InvoiceError> {
    if let Ok(json) = serde_json::from_str::<Value>(stdout) {
        if let Some(preimage) = json["payment_preimage"].as_str().and_then(hex_32) {
            return Ok(PaymentOutcome::Preimage(preimage));
        }
    }

    if stderr.contains(IN_TRANSITION) {
        info!("Payment already in transition");
        Ok(PaymentOutcome::InTransition)
    } else if stderr.contains(ALREADY_PAID) {
        info!("Invoice already paid");
        Ok(PaymentOutcome::AlreadyPaid)
    } else {
        error!("Payment failed: {}", stderr.trim());
        Err(InvoiceError::Payment(stderr.trim().to_string()))
    }
}

fn hex_32(s: &str) -> Option<[u8; 32]> {
    hex::decode(s).ok()?.try_into().ok()
}

// =============================================================================
// Mock Lightning node
// =============================================================================

struct MockInvoice {
    decoded: DecodedInvoice,
    preimage: [u8; 32],
}

#[derive(Default)]
pub struct MockInvoices {
    invoices: Mutex<HashMap<String, MockInvoice>>,
    paid: Mutex<HashSet<String>>,
}

impl MockInvoices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an invoice for `preimage` and returns its text
    pub fn issue(&self, amount_sat: u64, timestamp: u64, expiry: u64, preimage: [u8; 32]) -> String {
        let payment_hash = sha256(&preimage);
        let invoice = format!("lnmock{}{}", amount_sat, hex::encode(&payment_hash[..8]));
        let decoded = DecodedInvoice { amount_msat: amount_sat * 1000, timestamp, expiry, payment_hash };
        self.lock_invoices().insert(invoice.clone(), MockInvoice { decoded, preimage });
        invoice
    }

    pub fn is_paid(&self, invoice: &str) -> bool {
        self.lock_paid().contains(invoice)
    }

    fn lock_invoices(&self) -> std::sync::MutexGuard<'_, HashMap<String, MockInvoice>> {
        self.invoices.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_paid(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.paid.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl InvoiceClient for MockInvoices {
    fn decode(&self, invoice: &str) -> Result<DecodedInvoice, InvoiceError> {
        let invoice = check_invoice_text(invoice)?;
        self.lock_invoices()
            .get(invoice)
            .map(|i| i.decoded.clone())
            .ok_or_else(|| InvoiceError::Decode(format!("unknown invoice {}", invoice)))
    }

    fn pay(&self, invoice: &str) -> Result<PaymentOutcome, InvoiceError> {
        let invoice = check_invoice_text(invoice)?;
        let preimage = self
            .lock_invoices()
            .get(invoice)
            .map(|i| i.preimage)
            .ok_or_else(|| InvoiceError::Payment("no route".to_string()))?;

        if !self.lock_paid().insert(invoice.to_string()) {
            return Ok(PaymentOutcome::AlreadyPaid);
        }
        Ok(PaymentOutcome::Preimage(preimage))
    }

    fn create_invoice(&self, amount_sat: u64, expiry_secs: u64, _memo: &str) -> Result<String, InvoiceError> {
        let timestamp = crate::now_millis() / 1000;
        Ok(self.issue(amount_sat, timestamp, expiry_secs, rand::random()))
    }
}

// =============================================================================
// Tests
// =============================================================================
