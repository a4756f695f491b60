//! cosign-cli: Command-line client for 2-of-3 multisig wallets.
//!
//! Talks to the co-signing service with credentials from the `COSIGN_*`
//! environment variables and keeps the wallet state in a local file
//! encrypted under the wallet password.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use zeroize::Zeroizing;

use cosign_api::{ApiConfig, HttpLedgerClient};
use cosign_core::address::Address;
use cosign_core::backend::Secp256k1Backend;
use cosign_core::constants::{to_btc, to_satoshi};
use cosign_core::network::Network;
use cosign_core::types::Recipient;
use cosign_wallet::{AddressVerification, PayOptions, Wallet, WalletOptions, WalletState};

/// Cosign command-line wallet interface.
#[derive(Parser)]
#[command(name = "cosign-cli")]
#[command(version, about = "2-of-3 multisig wallet client")]
struct Cli {
    /// Path to the wallet state file (default: <data dir>/cosign/<network>/wallet.dat).
    #[arg(short, long, global = true)]
    wallet: Option<PathBuf>,

    /// Network (mainnet or testnet); overrides COSIGN_NETWORK.
    #[arg(short, long, global = true)]
    network: Option<Network>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log format (text or json).
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new wallet with the service.
    Create(CreateArgs),
    /// Fetch an existing wallet from the service and store it locally.
    Open(OpenArgs),
    /// Request a new receive address.
    Address,
    /// Show the wallet balance.
    Balance,
    /// Rescan the wallet's address space.
    Discover(DiscoverArgs),
    /// Send a payment.
    Pay(PayArgs),
    /// Move the wallet to a higher key index.
    Upgrade(UpgradeArgs),
}

#[derive(Args)]
struct CreateArgs {
    /// Wallet identifier.
    identifier: String,

    /// Key index to register the primary key under.
    #[arg(short, long, default_value = "0")]
    key_index: u32,
}

#[derive(Args)]
struct OpenArgs {
    /// Wallet identifier.
    identifier: String,
}

#[derive(Args)]
struct DiscoverArgs {
    /// Number of consecutive unused addresses that ends the scan.
    #[arg(short, long, default_value = "200")]
    gap: u32,
}

#[derive(Args)]
struct PayArgs {
    /// Outputs as ADDRESS:AMOUNT, amount in BTC (e.g. 2N65Rc...:0.0001).
    #[arg(required = true)]
    outputs: Vec<String>,

    /// Send change here instead of a fresh wallet address.
    #[arg(long)]
    change_address: Option<String>,

    /// Keep the change output last instead of at a random position.
    #[arg(long)]
    fixed_change: bool,

    /// Allow unconfirmed inputs.
    #[arg(long)]
    allow_zero_conf: bool,

    /// Do not ask the service to lock the selected inputs.
    #[arg(long)]
    no_lock: bool,
}

#[derive(Args)]
struct UpgradeArgs {
    /// New key index; must be above the current one.
    key_index: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let mut config = ApiConfig::from_env().context("Failed to load service configuration")?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    debug!(?config, "service configuration");
    let wallet_path = resolve_wallet_path(cli.wallet, config.network)?;

    match cli.command {
        Commands::Create(args) => wallet_create(&config, &wallet_path, args),
        Commands::Open(args) => wallet_open(&config, &wallet_path, args),
        Commands::Address => wallet_address(&config, &wallet_path),
        Commands::Balance => wallet_balance(&config, &wallet_path),
        Commands::Discover(args) => wallet_discover(&config, &wallet_path, args),
        Commands::Pay(args) => wallet_pay(&config, &wallet_path, args),
        Commands::Upgrade(args) => wallet_upgrade(&config, &wallet_path, args),
    }
}

fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

type CliWallet = Wallet<HttpLedgerClient>;

fn connect(config: &ApiConfig) -> Result<HttpLedgerClient> {
    HttpLedgerClient::new(config).context("Failed to set up service client")
}

fn options(config: &ApiConfig, key_index: u32) -> WalletOptions {
    WalletOptions {
        network: config.network,
        key_index,
        verification: AddressVerification::Enabled,
    }
}

/// Register a new wallet and store its state.
fn wallet_create(config: &ApiConfig, wallet_path: &Path, args: CreateArgs) -> Result<()> {
    if wallet_path.exists() {
        bail!("Wallet file already exists: {}", wallet_path.display());
    }
    let password = prompt_new_password()?;

    let created = Wallet::create(
        connect(config)?,
        Secp256k1Backend::new(),
        &args.identifier,
        &password,
        options(config, args.key_index),
    )
    .context("Failed to create wallet")?;
    save_state(&created.wallet, wallet_path, &password)?;

    println!("\n=== WALLET CREATED ===");
    println!("Identifier: {}", args.identifier);
    println!("Network: {}", config.network);
    println!("\nBACKUP PHRASE (24 WORDS):");
    println!("  {}", created.backup_mnemonic.as_str());
    println!("\nWARNING: This backup phrase will NOT be shown again and the service never sees it.");
    println!("With this phrase and the primary phrase in your wallet file, funds can be recovered without the service.");
    println!("\nWallet saved to: {}", wallet_path.display());
    Ok(())
}

/// Fetch a wallet from the service and store its state.
fn wallet_open(config: &ApiConfig, wallet_path: &Path, args: OpenArgs) -> Result<()> {
    if wallet_path.exists() {
        bail!("Wallet file already exists: {}", wallet_path.display());
    }
    let password = prompt_password("Wallet password")?;
    let wallet = Wallet::open(
        connect(config)?,
        Secp256k1Backend::new(),
        &args.identifier,
        &password,
        options(config, 0),
    )
    .context("Failed to open wallet (check password)")?;
    save_state(&wallet, wallet_path, &password)?;
    println!("Wallet {} saved to: {}", args.identifier, wallet_path.display());
    Ok(())
}

/// Request and display a verified receive address.
fn wallet_address(config: &ApiConfig, wallet_path: &Path) -> Result<()> {
    let (wallet, _) = load_wallet(config, wallet_path)?;
    let (path, address) = wallet.get_new_address_pair()?;
    println!("{address}");
    println!("path: {path}");
    Ok(())
}

fn wallet_balance(config: &ApiConfig, wallet_path: &Path) -> Result<()> {
    let (wallet, _) = load_wallet(config, wallet_path)?;
    let balance = wallet.balance()?;
    print_balance(balance.confirmed, balance.unconfirmed);
    Ok(())
}

fn wallet_discover(config: &ApiConfig, wallet_path: &Path, args: DiscoverArgs) -> Result<()> {
    let (wallet, _) = load_wallet(config, wallet_path)?;
    let balance = wallet.discovery(args.gap)?;
    print_balance(balance.confirmed, balance.unconfirmed);
    Ok(())
}

fn wallet_pay(config: &ApiConfig, wallet_path: &Path, args: PayArgs) -> Result<()> {
    let (wallet, _) = load_wallet(config, wallet_path)?;
    let recipients = args
        .outputs
        .iter()
        .map(|s| parse_output(s, config.network))
        .collect::<Result<Vec<_>>>()?;
    let change_address = args
        .change_address
        .as_deref()
        .map(|s| Address::parse_on(s, config.network))
        .transpose()
        .context("Invalid change address")?;
    let pay_options = PayOptions {
        lock_utxos: !args.no_lock,
        allow_zero_conf: args.allow_zero_conf,
        randomize_change: !args.fixed_change,
        ..PayOptions::default()
    };

    let txid = wallet
        .pay(&recipients, change_address, pay_options)
        .context("Payment failed")?;
    println!("Sent: {txid}");
    Ok(())
}

fn wallet_upgrade(config: &ApiConfig, wallet_path: &Path, args: UpgradeArgs) -> Result<()> {
    let (mut wallet, password) = load_wallet(config, wallet_path)?;
    wallet.upgrade_key_index(args.key_index)?;
    save_state(&wallet, wallet_path, &password)?;
    println!("Key index upgraded to {}", wallet.key_index());
    Ok(())
}

/// Decrypt the state file and reopen the wallet against the service.
fn load_wallet(config: &ApiConfig, wallet_path: &Path) -> Result<(CliWallet, Zeroizing<String>)> {
    let password = prompt_password("Wallet password")?;
    let state = WalletState::load(wallet_path, password.as_bytes())
        .with_context(|| {
            format!("Failed to load wallet {} (check password)", wallet_path.display())
        })?;
    if state.network != config.network {
        bail!(
            "Wallet {} is on {}, service is configured for {}",
            wallet_path.display(),
            state.network,
            config.network
        );
    }
    let wallet = Wallet::from_state(
        connect(config)?,
        Secp256k1Backend::new(),
        state,
        &password,
        AddressVerification::Enabled,
    )?;
    Ok((wallet, password))
}

fn save_state(wallet: &CliWallet, wallet_path: &Path, password: &str) -> Result<()> {
    if let Some(parent) = wallet_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    wallet
        .state()
        .save(wallet_path, password.as_bytes())
        .context("Failed to save wallet")
}

fn print_balance(confirmed: i64, unconfirmed: i64) {
    let fmt = |v: i64| {
        let sign = if v < 0 { "-" } else { "" };
        format!("{sign}{:.8} BTC", to_btc(v.unsigned_abs()))
    };
    println!("Confirmed:   {}", fmt(confirmed));
    println!("Unconfirmed: {}", fmt(unconfirmed));
}

/// Parse `ADDRESS:AMOUNT` with the amount in BTC.
fn parse_output(s: &str, network: Network) -> Result<Recipient> {
    let (address, amount) = s
        .rsplit_once(':')
        .with_context(|| format!("Expected ADDRESS:AMOUNT, got {s:?}"))?;
    let address = Address::parse_on(address, network)
        .with_context(|| format!("Invalid address {address:?}"))?;
    let amount: f64 = amount
        .parse()
        .with_context(|| format!("Invalid amount {amount:?}"))?;
    if !amount.is_finite() || amount <= 0.0 {
        bail!("Amount must be positive, got {amount}");
    }
    Ok(Recipient::new(address, to_satoshi(amount)))
}

/// Prompt for a password securely (no echo).
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(format!("{prompt}: "))
        .map(Zeroizing::new)
        .context("Failed to read password")
}

fn prompt_new_password() -> Result<Zeroizing<String>> {
    let password = prompt_password("Enter wallet password")?;
    let confirm = prompt_password("Confirm password")?;
    if *password != *confirm {
        bail!("Passwords do not match");
    }
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

/// Resolve wallet file path, using default if not provided.
fn resolve_wallet_path(path: Option<PathBuf>, network: Network) -> Result<PathBuf> {
    if let Some(p) = path {
        return Ok(p);
    }
    let data = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data.join("cosign").join(network.to_string()).join("wallet.dat"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_pay_outputs() {
        let cli = Cli::try_parse_from([
            "cosign-cli",
            "--network",
            "testnet",
            "pay",
            "2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD:0.5",
            "--fixed-change",
        ])
        .unwrap();
        assert_eq!(cli.network, Some(Network::Testnet));
        let Commands::Pay(args) = cli.command else {
            panic!("expected pay");
        };
        assert!(args.fixed_change);
        assert_eq!(args.outputs.len(), 1);
    }

    #[test]
    fn change_is_randomized_unless_fixed() {
        let cli =
            Cli::try_parse_from(["cosign-cli", "pay", "2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD:1"])
                .unwrap();
        let Commands::Pay(args) = cli.command else {
            panic!("expected pay");
        };
        assert!(!args.fixed_change);
        assert!(PayOptions::default().randomize_change);
    }

    #[test]
    fn parse_output_in_btc() {
        let r =
            parse_output("2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD:0.0001", Network::Testnet).unwrap();
        assert_eq!(r.value, 10_000);
        assert_eq!(r.address.to_string(), "2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD");
    }

    #[test]
    fn parse_output_rejects_bad_input() {
        let net = Network::Testnet;
        assert!(parse_output("2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD", net).is_err());
        assert!(parse_output("2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD:-1", net).is_err());
        assert!(parse_output("2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD:abc", net).is_err());
        assert!(parse_output("2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD:1", Network::Mainnet).is_err());
    }

    #[test]
    fn explicit_wallet_path_wins() {
        let p = resolve_wallet_path(Some(PathBuf::from("/tmp/w.dat")), Network::Mainnet).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/w.dat"));
    }
}
