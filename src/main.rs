// =============================================================================
// SATKAS - Command Line
// Kaspa <-> Lightning atomic swaps
// =============================================================================

use std::io::{self, Write};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde_json::Value;

use satkas::address::{Address, VERSION_PUBKEY, VERSION_SCRIPT_HASH};
use satkas::atomic_swaps::engine::{FundingStatus, SenderOutcome};
use satkas::atomic_swaps::htlc_script::{self, ContractParameters, ContractVariant, ShortContractParameters};
use satkas::atomic_swaps::{
    hello, parse_secret, sign_message, verify_message, Role, SignedMessage, SwapEngine, SwapParties, SwapRecord,
    SwapState, SwapType,
};
use satkas::chain::RestChainClient;
use satkas::config::{parse_max_retries, SwapConfig};
use satkas::contracts::builder::disassemble;
use satkas::crypto::{read_password, Keystore};
use satkas::funding::{fund_async, funding_amount, Funder, KaspawalletFunder};
use satkas::hashes::pubkey_hash;
use satkas::invoice::{InvoiceClient, LncliClient};
use satkas::sighash::{calc_signature_hash, conformance_transaction, SigHashType, SighashReusedValues};
use satkas::storage::Storage;
use satkas::wallet::{signer_for_scheme, SigningCapability};
use satkas::{format_sompi, parse_kas};

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "satkas")]
#[command(version)]
#[command(about = "Kaspa <-> Lightning atomic swaps", long_about = None)]
struct Cli {
    /// Kaspa address prefix (kaspa, kaspatest, ...)
    #[arg(long, global = true)]
    network: Option<String>,

    /// Kaspa REST API base URL
    #[arg(long, global = true)]
    rest_url: Option<String>,

    /// Database directory
    #[arg(long, global = true)]
    db: Option<String>,

    /// Broadcast retries on sequence-lock rejections ("none" = forever)
    #[arg(long, global = true)]
    max_retries: Option<String>,

    /// Use the experimental short contract script
    #[arg(long, global = true)]
    short_contract: bool,

    /// Ask for the keystore password
    #[arg(long, global = true)]
    password: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode or decode Kaspa addresses
    Address {
        #[command(subcommand)]
        action: AddressCommand,
    },

    /// Build a contract script offline and print its address
    Contract {
        /// Payment hash hex
        #[arg(long)]
        secret_hash: String,
        /// Milliseconds since epoch
        #[arg(long)]
        timelock: u64,
        #[arg(long)]
        sender: String,
        #[arg(long)]
        receiver: String,
    },

    /// Print signature hashes of the conformance transaction
    SighashVector,

    /// Generate a new swap key and show its address
    Keygen,

    /// Create a Lightning invoice
    Invoice {
        #[arg(long)]
        sats: u64,
        /// Seconds until expiry, also the contract timelock
        #[arg(long, default_value_t = 3600)]
        expiry: u64,
        #[arg(long, default_value = "satkas")]
        memo: String,
    },

    /// Swap lifecycle
    Swap {
        #[command(subcommand)]
        action: SwapCommand,
    },

    /// List stored swaps
    Swaps,

    /// Sign a message with the node key
    SignMessage {
        #[arg(long = "type")]
        message_type: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Print our hello message
    Hello {
        #[arg(long, value_enum)]
        role: RoleArg,
    },

    /// Verify a signed message
    VerifyMessage { message: String },
}

#[derive(Subcommand)]
enum AddressCommand {
    /// Encode a payload as an address
    Encode {
        /// Payload hex
        payload: String,
        /// 0 = pubkey, 8 = script hash
        #[arg(long, default_value_t = VERSION_PUBKEY)]
        version: u8,
    },
    /// Decode an address and show its parts
    Decode {
        address: String,
        /// Reject non-zero padding bits
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Args)]
struct InitArgs {
    #[arg(long, value_enum)]
    role: RoleArg,
    #[arg(long = "type", value_enum)]
    swap_type: SwapTypeArg,
    #[arg(long)]
    invoice: String,
    /// Counterparty p2pk address
    #[arg(long)]
    counterparty: String,
    /// Index of our swap key (see keygen)
    #[arg(long)]
    key_index: u32,
    /// Contract address announced by the counterparty
    #[arg(long)]
    counterparty_contract: Option<String>,
}

#[derive(Args)]
struct ResumeArgs {
    /// Payment hash of a stored swap
    payment_hash: String,
    #[arg(long, value_enum)]
    role: RoleArg,
    #[arg(long)]
    key_index: u32,
    /// KAS amount agreed for the swap
    #[arg(long)]
    kas: String,
}

#[derive(Subcommand)]
enum SwapCommand {
    /// Derive the contract from an invoice and store the swap
    Init(InitArgs),
    /// Init, then follow the swap to the end
    Run {
        #[command(flatten)]
        init: InitArgs,
        /// KAS amount agreed for the swap
        #[arg(long)]
        kas: String,
        /// Preimage hex, if already known
        #[arg(long)]
        secret: Option<String>,
    },
    /// Await funding of a stored swap and redeem it
    Redeem {
        #[command(flatten)]
        swap: ResumeArgs,
        /// Preimage hex, if already known
        #[arg(long)]
        secret: Option<String>,
    },
    /// Await funding of a stored swap, refund unless the counterparty redeems
    Refund {
        #[command(flatten)]
        swap: ResumeArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Maker,
    Taker,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Maker => Role::Maker,
            RoleArg::Taker => Role::Taker,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SwapTypeArg {
    Sat2kas,
    Kas2sat,
}

impl From<SwapTypeArg> for SwapType {
    fn from(t: SwapTypeArg) -> Self {
        match t {
            SwapTypeArg::Sat2kas => SwapType::SatToKas,
            SwapTypeArg::Kas2sat => SwapType::KasToSat,
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<SwapConfig, String> {
    let mut config = SwapConfig::from_env()?;
    if let Some(network) = &cli.network {
        config.network_prefix = network.to_lowercase();
    }
    if let Some(url) = &cli.rest_url {
        config.rest_url = url.clone();
    }
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(retries) = &cli.max_retries {
        config.max_broadcast_retries = parse_max_retries(retries)?;
    }
    if cli.short_contract {
        config.contract_variant = ContractVariant::Short;
    }
    Ok(config)
}

/// Everything a command may need, opened once
struct Context {
    config: SwapConfig,
    storage: Arc<Storage>,
    signer: Arc<dyn SigningCapability>,
    password: Option<String>,
}

impl Context {
    fn open(config: SwapConfig, ask_password: bool) -> Result<Self, String> {
        let signer = signer_for_scheme(&config.signature_scheme).map_err(|e| e.to_string())?;
        let storage = Arc::new(Storage::open(&config.db_path)?);
        let password = if ask_password {
            Some(read_password("Password: ").map_err(|e| e.to_string())?)
        } else {
            None
        };
        Ok(Context { config, storage, signer, password })
    }

    fn keystore(&self) -> Result<Keystore<'_>, String> {
        Keystore::new(&self.storage, self.password.as_deref())
    }

    fn lightning(&self) -> Arc<dyn InvoiceClient> {
        Arc::new(LncliClient::new(self.config.lncli_path.as_deref(), self.config.ln_rpc_server.as_deref()))
    }

    /// None when KASPAWALLET is not set
    fn funder(&self) -> Option<Arc<dyn Funder>> {
        KaspawalletFunder::from_config(&self.config.wallet)
            .ok()
            .map(|f| Arc::new(f) as Arc<dyn Funder>)
    }

    fn close(self) -> Result<(), String> {
        match Arc::try_unwrap(self.storage) {
            Ok(storage) => storage.close(),
            Err(shared) => shared.flush(),
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli)?;
    let prefix = config.network_prefix.as_str();

    // Commands that never touch the database
    match &cli.command {
        Commands::Address { action: AddressCommand::Decode { address, strict } } => {
            return cmd_decode_address(address, *strict)
        }
        Commands::Address { action: AddressCommand::Encode { payload, version } } => {
            return cmd_encode_address(prefix, payload, *version)
        }
        Commands::Contract { secret_hash, timelock, sender, receiver } => {
            return cmd_contract(prefix, config.contract_variant, secret_hash, *timelock, sender, receiver);
        }
        Commands::SighashVector => return cmd_sighash_vector(),
        Commands::VerifyMessage { message } => return cmd_verify_message(&config, message),
        _ => {}
    }

    let ctx = Context::open(config, cli.password)?;
    let result = match cli.command {
        Commands::Keygen => cmd_keygen(&ctx),
        Commands::Invoice { sats, expiry, memo } => cmd_invoice(&ctx, sats, expiry, &memo),
        Commands::Swap { action } => cmd_swap(&ctx, action).await,
        Commands::Swaps => cmd_swaps(&ctx),
        Commands::SignMessage { message_type, payload } => cmd_sign_message(&ctx, &message_type, &payload),
        Commands::Hello { role } => cmd_hello(&ctx, role.into()),
        Commands::Address { .. }
        | Commands::Contract { .. }
        | Commands::SighashVector
        | Commands::VerifyMessage { .. } => Ok(()),
    };
    ctx.close()?;
    result
}

// =============================================================================
// Address / Contract Commands
// =============================================================================

fn cmd_decode_address(text: &str, strict: bool) -> Result<(), String> {
    let decoded = if strict { Address::decode_strict(text) } else { Address::decode(text) };
    let address = decoded.map_err(|e| e.to_string())?;
    let kind = match address.version {
        VERSION_PUBKEY => "pay-to-pubkey",
        VERSION_SCRIPT_HASH => "pay-to-script-hash",
        _ => "unknown",
    };

    println!();
    println!("  Prefix:   {}", address.prefix);
    println!("  Version:  {} ({})", address.version, kind);
    println!("  Payload:  {}", hex::encode(&address.payload));
    println!();
    Ok(())
}

fn cmd_encode_address(prefix: &str, payload: &str, version: u8) -> Result<(), String> {
    let payload = hex::decode(payload.trim()).map_err(|e| format!("Invalid payload hex: {}", e))?;
    let address = Address::new(prefix, version, payload);
    println!("{}", address.encode().map_err(|e| e.to_string())?);
    Ok(())
}

fn cmd_contract(
    prefix: &str,
    variant: ContractVariant,
    secret_hash: &str,
    timelock: u64,
    sender: &str,
    receiver: &str,
) -> Result<(), String> {
    let secret_hash: [u8; 32] = hex::decode(secret_hash.trim())
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| "Secret hash must be 32 bytes of hex".to_string())?;
    let parties = SwapParties::parse(sender, receiver).map_err(|e| e.to_string())?;

    let script = match variant {
        ContractVariant::Full => htlc_script::full_script(&ContractParameters {
            secret_hash,
            receiver_pubkey_hash: pubkey_hash(&parties.receiver.payload),
            timelock,
            sender_pubkey_hash: pubkey_hash(&parties.sender.payload),
        }),
        ContractVariant::Short => htlc_script::short_script(&ShortContractParameters {
            secret_hash,
            receiver_pubkey: parties.receiver.payload.clone(),
            timelock,
            sender_pubkey: parties.sender.payload.clone(),
        }),
    };
    let address = htlc_script::contract_address(prefix, &script);

    println!();
    println!("  Address:  {}", address);
    println!("  Script:   {}", hex::encode(&script));
    println!("  Size:     {} bytes", script.len());
    println!();
    println!("  {}", disassemble(&script).map_err(|e| e.to_string())?);
    println!();
    Ok(())
}

fn cmd_sighash_vector() -> Result<(), String> {
    let tx = conformance_transaction()?;
    let flags = [
        ("ALL", SigHashType::ALL),
        ("NONE", SigHashType::NONE),
        ("SINGLE", SigHashType::SINGLE),
        ("ALL|ANYONECANPAY", SigHashType::ALL_ANYONE_CAN_PAY),
        ("NONE|ANYONECANPAY", SigHashType::NONE_ANYONE_CAN_PAY),
        ("SINGLE|ANYONECANPAY", SigHashType::SINGLE_ANYONE_CAN_PAY),
    ];

    println!();
    let mut reused = SighashReusedValues::new();
    for (name, hash_type) in flags {
        let digest = calc_signature_hash(&tx, 0, hash_type, &mut reused).map_err(|e| e.to_string())?;
        println!("  0x{:02x} {:<20} {}", hash_type.to_u8(), name, hex::encode(digest));
    }
    println!();
    Ok(())
}

// =============================================================================
// Key / Invoice Commands
// =============================================================================

fn cmd_keygen(ctx: &Context) -> Result<(), String> {
    let (index, secret_key) = ctx.keystore()?.generate_swap_key(ctx.signer.as_ref())?;
    let pubkey = ctx.signer.public_key(&secret_key).map_err(|e| e.to_string())?;
    let address = Address::p2pk(&ctx.config.network_prefix, &pubkey);

    println!();
    println!("  Key index: {}", index);
    println!("  Address:   {}", address);
    println!();
    if ctx.password.is_none() {
        println!("  ⚠️  Key stored unencrypted, use --password to encrypt.");
        println!();
    }
    Ok(())
}

fn cmd_invoice(ctx: &Context, sats: u64, expiry: u64, memo: &str) -> Result<(), String> {
    let invoice = ctx.lightning().create_invoice(sats, expiry, memo).map_err(|e| e.to_string())?;
    println!("{}", invoice);
    Ok(())
}

// =============================================================================
// Swap Commands
// =============================================================================

fn build_engine(ctx: &Context, role: Role, swap_type: SwapType) -> SwapEngine {
    SwapEngine::new(
        role,
        swap_type,
        ctx.config.clone(),
        Arc::new(RestChainClient::new(&ctx.config.rest_url)),
        ctx.lightning(),
        Arc::clone(&ctx.signer),
        Arc::clone(&ctx.storage),
    )
}

fn load_key(ctx: &Context, key_index: u32) -> Result<[u8; 32], String> {
    ctx.keystore()?.load_swap_key(key_index)
}

/// Prepares the swap, checks the counterparty's contract address if given
async fn init_swap(ctx: &Context, args: &InitArgs) -> Result<SwapEngine, String> {
    let role: Role = args.role.into();
    let swap_type: SwapType = args.swap_type.into();
    let secret_key = load_key(ctx, args.key_index)?;
    let pubkey = ctx.signer.public_key(&secret_key).map_err(|e| e.to_string())?;
    let ours = Address::p2pk(&ctx.config.network_prefix, &pubkey);
    let theirs = Address::decode(&args.counterparty).map_err(|e| e.to_string())?;

    let parties = if swap_type.is_kas_sender(role) {
        SwapParties { sender: ours, receiver: theirs }
    } else {
        SwapParties { sender: theirs, receiver: ours }
    };

    let mut engine = build_engine(ctx, role, swap_type);
    let record = engine
        .prepare_async(&args.invoice, &parties)
        .await
        .map_err(|e| e.to_string())?
        .clone();
    print_record(&record);

    if let Some(claimed) = &args.counterparty_contract {
        engine.verify_counterparty_address(claimed).map_err(|e| e.to_string())?;
        println!("  ✓ Counterparty contract address matches");
    }
    Ok(engine)
}

fn resume_swap(ctx: &Context, args: &ResumeArgs) -> Result<(SwapEngine, bool), String> {
    let role: Role = args.role.into();
    let record = ctx
        .storage
        .get_swap(&args.payment_hash)?
        .ok_or_else(|| format!("No swap with payment hash {}", args.payment_hash))?;
    let sender = record.swap_type.is_kas_sender(role);
    print_record(&record);

    let engine = SwapEngine::resume(
        record,
        role,
        ctx.config.clone(),
        Arc::new(RestChainClient::new(&ctx.config.rest_url)),
        ctx.lightning(),
        Arc::clone(&ctx.signer),
        Arc::clone(&ctx.storage),
    )
    .map_err(|e| e.to_string())?;
    Ok((engine, sender))
}

async fn cmd_swap(ctx: &Context, action: SwapCommand) -> Result<(), String> {
    match action {
        SwapCommand::Init(args) => {
            init_swap(ctx, &args).await?;
            Ok(())
        }
        SwapCommand::Run { init, kas, secret } => {
            let secret_key = load_key(ctx, init.key_index)?;
            let mut engine = init_swap(ctx, &init).await?;
            let required = funding_amount(parse_kas(&kas)?)?;
            if SwapType::from(init.swap_type).is_kas_sender(init.role.into()) {
                refund_flow(&mut engine, &secret_key, required, ctx.funder()).await
            } else {
                redeem_flow(&mut engine, &secret_key, required, secret.as_deref()).await
            }
        }
        SwapCommand::Redeem { swap, secret } => {
            let secret_key = load_key(ctx, swap.key_index)?;
            let (mut engine, sender) = resume_swap(ctx, &swap)?;
            if sender {
                return Err("Only the KAS receiver can redeem, use 'swap refund'".to_string());
            }
            let required = funding_amount(parse_kas(&swap.kas)?)?;
            redeem_flow(&mut engine, &secret_key, required, secret.as_deref()).await
        }
        SwapCommand::Refund { swap } => {
            let secret_key = load_key(ctx, swap.key_index)?;
            let (mut engine, sender) = resume_swap(ctx, &swap)?;
            if !sender {
                return Err("Only the KAS sender can refund, use 'swap redeem'".to_string());
            }
            let required = funding_amount(parse_kas(&swap.kas)?)?;
            // a resumed swap is never funded twice
            refund_flow(&mut engine, &secret_key, required, None).await
        }
    }
}

/// KAS sender: fund, then wait for the redeem or refund after the timelock
async fn refund_flow(
    engine: &mut SwapEngine,
    secret_key: &[u8; 32],
    required: u64,
    funder: Option<Arc<dyn Funder>>,
) -> Result<(), String> {
    if !matches!(engine.state(), SwapState::Funded | SwapState::Spending) {
        fund_contract(engine, required, funder).await?;
    }

    match engine.settle_as_sender(secret_key).await.map_err(|e| e.to_string())? {
        SenderOutcome::Redeemed => println!("  ✓ Counterparty redeemed, swap complete"),
        SenderOutcome::Refunded { tx_id: Some(tx_id) } => println!("  ↩ Refunded, txid: {}", tx_id),
        SenderOutcome::Refunded { tx_id: None } => println!("  ↩ Refund from an earlier run confirmed"),
    }
    Ok(())
}

/// Sends the funds through kaspawallet when configured, then waits for them
async fn fund_contract(engine: &mut SwapEngine, required: u64, funder: Option<Arc<dyn Funder>>) -> Result<(), String> {
    let address = engine
        .contract_address()
        .map(|a| a.to_string())
        .ok_or_else(|| "Contract not prepared".to_string())?;

    let total = match engine.poll_funding_async(required).await.map_err(|e| e.to_string())? {
        FundingStatus::Funded { total } => total,
        FundingStatus::Waiting { total } => {
            match funder {
                Some(funder) if total == 0 => {
                    let report = fund_async(funder, address.clone(), required)
                        .await
                        .map_err(|e| e.to_string())?;
                    println!("  Sent {} KAS to {} ({})", format_sompi(required), address, report);
                }
                Some(_) => warn!("Contract already holds {} KAS, not funding again", format_sompi(total)),
                None => println!("  Send {} KAS to {}", format_sompi(required), address),
            }
            engine.await_funding(required).await.map_err(|e| e.to_string())?
        }
    };
    println!("  ✓ Contract funded with {} KAS", format_sompi(total));
    Ok(())
}

/// KAS receiver: wait for funding, pay the invoice, redeem with the preimage
async fn redeem_flow(
    engine: &mut SwapEngine,
    secret_key: &[u8; 32],
    required: u64,
    secret: Option<&str>,
) -> Result<(), String> {
    if engine.state() == SwapState::Spending {
        match engine.reconcile_spend().await.map_err(|e| e.to_string())? {
            SwapState::Funded => {}
            state => {
                println!("  ✓ Spend from an earlier run confirmed, swap {}", state);
                return Ok(());
            }
        }
    }
    if engine.state() != SwapState::Funded {
        let total = engine.await_funding(required).await.map_err(|e| e.to_string())?;
        println!("  ✓ Contract funded with {} KAS", format_sompi(total));
    }

    let preimage = match secret {
        Some(hex_secret) => parse_secret(hex_secret).map_err(|e| e.to_string())?,
        None => match engine.obtain_secret_async().await.map_err(|e| e.to_string())? {
            Some(preimage) => preimage,
            None => {
                warn!("Payment raced, asking for the preimage");
                let line = prompt("Preimage (hex): ").map_err(|e| e.to_string())?;
                parse_secret(&line).map_err(|e| e.to_string())?
            }
        },
    };

    let tx_id = engine.spend(Some(preimage), secret_key).await.map_err(|e| e.to_string())?;
    info!("Swap finished in state {}", engine.state());
    println!("  ✓ Redeemed, txid: {}", tx_id);
    Ok(())
}

fn prompt(text: &str) -> io::Result<String> {
    print!("{}", text);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn format_time(millis: u64) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_record(record: &SwapRecord) {
    println!();
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║                       ATOMIC SWAP                         ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("  Type:      {}", record.swap_type);
    println!("  Hash:      {}", record.payment_hash);
    println!("  Amount:    {} sats", record.sat_amount);
    println!("  Contract:  {}", record.contract_address);
    println!("  Sender:    {}", record.sender_address);
    println!("  Receiver:  {}", record.receiver_address);
    println!("  Timelock:  {}", format_time(record.timelock));
    println!("  Status:    {}", record.status);
    println!();
}

fn cmd_swaps(ctx: &Context) -> Result<(), String> {
    let swaps = ctx.storage.list_swaps();
    if swaps.is_empty() {
        println!("No swaps stored.");
        return Ok(());
    }

    println!();
    println!("  {:<19}  {:<8}  {:<16}  {:>10}  {:<10}  Spend tx", "Created", "Type", "Hash", "Sats", "Status");
    for s in swaps {
        println!(
            "  {:<19}  {:<8}  {:<16}  {:>10}  {:<10}  {}",
            format_time(s.created_at),
            s.swap_type.to_string(),
            s.short_id(),
            s.sat_amount,
            s.status.to_string(),
            s.spend_tx_id.as_deref().unwrap_or("-")
        );
    }
    println!();
    Ok(())
}

// =============================================================================
// Message Commands
// =============================================================================

fn cmd_sign_message(ctx: &Context, message_type: &str, payload: &str) -> Result<(), String> {
    let payload: Value = serde_json::from_str(payload).map_err(|e| format!("Invalid payload JSON: {}", e))?;
    let node_key = ctx.keystore()?.node_key(ctx.signer.as_ref())?;
    let message = sign_message(ctx.signer.as_ref(), &node_key, message_type, payload).map_err(|e| e.to_string())?;
    println!("{}", message.to_json().map_err(|e| e.to_string())?);
    Ok(())
}

fn cmd_hello(ctx: &Context, role: Role) -> Result<(), String> {
    let node_key = ctx.keystore()?.node_key(ctx.signer.as_ref())?;
    let message = hello(role, ctx.signer.as_ref(), &node_key, serde_json::json!({})).map_err(|e| e.to_string())?;
    println!("{}", message.to_json().map_err(|e| e.to_string())?);
    Ok(())
}

fn cmd_verify_message(config: &SwapConfig, text: &str) -> Result<(), String> {
    let message = SignedMessage::from_json(text).map_err(|e| e.to_string())?;
    let signer = signer_for_scheme(&config.signature_scheme).map_err(|e| e.to_string())?;
    if verify_message(signer.as_ref(), &message) {
        println!("  ✓ Valid {} message from {}", message.message_type, message.pubkey);
        Ok(())
    } else {
        Err("Invalid signature".to_string())
    }
}
