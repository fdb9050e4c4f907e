// =============================================================================
// SATKAS - Contract Funding
// =============================================================================
//
// The KAS sender locks the agreed amount, plus a margin that pays the
// spend fee, in the contract address. `KaspawalletFunder` runs
// `kaspawallet send`; `MockFunder` credits a `MockChain`.
//
// =============================================================================

use std::fmt;
use std::process::Command;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::address::Address;
use crate::chain::MockChain;
use crate::config::WalletConfig;
use crate::{format_sompi, FUNDING_MARGIN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingError {
    /// KASPAWALLET is not set
    NotConfigured,
    Command(String),
    /// The wallet ran but refused to send
    Rejected(String),
}

impl fmt::Display for FundingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingError::NotConfigured => write!(f, "KASPAWALLET is not set"),
            FundingError::Command(e) => write!(f, "kaspawallet failed: {}", e),
            FundingError::Rejected(e) => write!(f, "Funding rejected: {}", e),
        }
    }
}

impl std::error::Error for FundingError {}

/// Amount to lock for an agreed swap amount, in sompi
pub fn funding_amount(agreed: u64) -> Result<u64, String> {
    agreed
        .checked_add(FUNDING_MARGIN)
        .ok_or_else(|| format!("Funding amount {} sompi too large", agreed))
}

pub trait Funder: Send + Sync {
    /// Sends `amount` sompi to `address`, returns the wallet's report
    fn fund(&self, address: &str, amount: u64) -> Result<String, FundingError>;
}

/// Runs a blocking funder off the async runtime
pub async fn fund_async(funder: Arc<dyn Funder>, address: String, amount: u64) -> Result<String, FundingError> {
    tokio::task::spawn_blocking(move || funder.fund(&address, amount))
        .await
        .map_err(|e| FundingError::Command(format!("funding task failed: {}", e)))?
}

// =============================================================================
// kaspawallet
// =============================================================================

pub struct KaspawalletFunder {
    path: String,
    config: WalletConfig,
}

impl KaspawalletFunder {
    pub fn from_config(config: &WalletConfig) -> Result<Self, FundingError> {
        let path = config.path.clone().ok_or(FundingError::NotConfigured)?;
        Ok(KaspawalletFunder { path, config: config.clone() })
    }

    /// `send` arguments; amounts are passed in KAS
    pub fn send_args(&self, address: &str, amount: u64) -> Vec<String> {
        let mut args = vec!["send".to_string()];
        if let Some(daemon) = &self.config.daemon {
            args.extend(["-d".to_string(), daemon.clone()]);
        }
        args.extend(["-t".to_string(), address.to_string()]);
        if let Some(password) = &self.config.password {
            args.extend(["-p".to_string(), password.clone()]);
        }
        args.extend(["-v".to_string(), format_sompi(amount)]);
        if let Some(key_file) = &self.config.key_file {
            args.extend(["-f".to_string(), key_file.clone()]);
        }
        args
    }
}

impl Funder for KaspawalletFunder {
    fn fund(&self, address: &str, amount: u64) -> Result<String, FundingError> {
        info!("Funding {} with {} KAS", address, format_sompi(amount));
        let args = self.send_args(address, amount);
        let shown: Vec<&str> = args
            .iter()
            .map(|a| match &self.config.password {
                Some(p) if p == a => "***",
                _ => a.as_str(),
            })
            .collect();
        debug!("Running {} {:?}", self.path, shown);

        let output = Command::new(&self.path)
            .args(&args)
            .output()
            .map_err(|e| FundingError::Command(format!("{}: {}", self.path, e)))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!("kaspawallet stderr: {}", stderr);

        if !output.status.success() {
            return Err(FundingError::Rejected(if stderr.is_empty() { stdout } else { stderr }));
        }
        info!("kaspawallet: {}", stdout);
        Ok(stdout)
    }
}

// =============================================================================
// Mock wallet
// =============================================================================

/// Pays into a `MockChain` and remembers every payment
pub struct MockFunder {
    chain: Arc<MockChain>,
    sent: Mutex<Vec<(String, u64)>>,
}

impl MockFunder {
    pub fn new(chain: Arc<MockChain>) -> Self {
        MockFunder { chain, sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<(String, u64)> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Funder for MockFunder {
    fn fund(&self, address: &str, amount: u64) -> Result<String, FundingError> {
        let parsed = Address::decode(address).map_err(|e| FundingError::Rejected(e.to_string()))?;
        let outpoint = self
            .chain
            .fund(&parsed, amount)
            .map_err(|e| FundingError::Rejected(e.to_string()))?;
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((address.to_string(), amount));
        Ok(hex::encode(outpoint.transaction_id))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SOMPI_PER_KAS;

    fn wallet(daemon: Option<&str>, password: Option<&str>, key_file: Option<&str>) -> WalletConfig {
        WalletConfig {
            path: Some("kaspawallet".to_string()),
            daemon: daemon.map(str::to_string),
            password: password.map(str::to_string),
            key_file: key_file.map(str::to_string),
        }
    }

    #[test]
    fn test_funding_amount_adds_margin() {
        assert_eq!(funding_amount(3 * SOMPI_PER_KAS).unwrap(), 300_100_000);
        assert_eq!(format_sompi(funding_amount(150_000_000).unwrap()), "1.501");
        assert!(funding_amount(u64::MAX).is_err());
    }

    #[test]
    fn test_send_args_minimal() {
        let funder = KaspawalletFunder::from_config(&wallet(None, None, None)).unwrap();
        assert_eq!(funder.send_args("kaspa:pqxyz", 300_100_000), ["send", "-t", "kaspa:pqxyz", "-v", "3.001"]);
    }

    #[test]
    fn test_send_args_full() {
        let funder =
            KaspawalletFunder::from_config(&wallet(Some("localhost:8082"), Some("pw"), Some("/keys.json"))).unwrap();
        assert_eq!(
            funder.send_args("kaspa:pqxyz", funding_amount(SOMPI_PER_KAS / 2).unwrap()),
            ["send", "-d", "localhost:8082", "-t", "kaspa:pqxyz", "-p", "pw", "-v", "0.501", "-f", "/keys.json"]
        );
    }

    #[test]
    fn test_unconfigured_wallet() {
        let err = KaspawalletFunder::from_config(&WalletConfig::default()).err();
        assert_eq!(err, Some(FundingError::NotConfigured));
    }

    #[test]
    fn test_missing_binary_is_a_command_error() {
        let mut config = wallet(None, None, None);
        config.path = Some("/nonexistent/kaspawallet".to_string());
        let funder = KaspawalletFunder::from_config(&config).unwrap();
        assert!(matches!(funder.fund("kaspa:pqxyz", 1), Err(FundingError::Command(_))));
    }

    #[tokio::test]
    async fn test_mock_funder_credits_chain() {
        let chain = Arc::new(MockChain::new());
        let address = Address::p2sh("kaspa", &[0x51]);
        let funder = Arc::new(MockFunder::new(chain.clone()));

        fund_async(funder.clone(), address.to_string(), 2 * SOMPI_PER_KAS).await.unwrap();
        assert_eq!(chain.balance(&address.to_string()), 2 * SOMPI_PER_KAS);
        assert_eq!(funder.sent(), vec![(address.to_string(), 2 * SOMPI_PER_KAS)]);
        assert!(funder.fund("not-an-address", 1).is_err());
    }
}
