//! cosmos-cli: command-line front end for the Cosmos SPV wallet.
//!
//! Keeps a transaction database and a watch-only wallet file in the data
//! directory. Transactions are only trusted once their Merkle proof has been
//! checked against a stored header.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use bitcoin::bip32::{DerivationPath, Xpub};
use bitcoin::{Address, OutPoint, Transaction, Txid};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use cosmos_core::traits::{Network as _, WritableTxDb};
use cosmos_core::types::{InPoint, ScriptHash};
use cosmos_network::{NetworkConfig, RedundantNetwork};
use cosmos_txdb::{CachedRemoteTxDb, LocalTxDb, Session};
use cosmos_wallet::{AddressSequence, Addresses, Restore, WalletConfig, WalletState};

/// Cosmos watch-only wallet.
#[derive(Parser)]
#[command(name = "cosmos-cli")]
#[command(version, about = "SPV wallet over Merkle proofs.")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Data directory (default: platform data dir + /cosmos).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use testnet endpoints and a separate data directory.
    #[arg(long, global = true)]
    testnet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet file watching an extended public key.
    Init(InitArgs),
    /// Fetch transactions with their proofs and index them.
    Import(ImportArgs),
    /// Scan the wallet's address sequences and rebuild its account.
    Restore(RestoreArgs),
    /// Try to confirm every pending transaction.
    Update,
    /// Show the wallet's value.
    Value,
    /// Show the current mining fee rate.
    FeeRate,
    /// Show the historical price of the coin.
    Price(PriceArgs),
}

#[derive(Args)]
struct InitArgs {
    /// Extended public key (xpub or tpub).
    xpub: String,

    /// Derivation path of the receive sequence.
    #[arg(long, default_value = "m/0")]
    receive_path: String,

    /// Derivation path of the change sequence.
    #[arg(long, default_value = "m/1")]
    change_path: String,
}

#[derive(Args)]
struct ImportArgs {
    /// Transaction ids to import.
    #[arg(required = true)]
    txids: Vec<String>,
}

#[derive(Args)]
struct RestoreArgs {
    /// Consecutive unused addresses before the scan stops.
    #[arg(long)]
    max_look_ahead: Option<u32>,
}

#[derive(Args)]
struct PriceArgs {
    /// Unix timestamp (default: now).
    #[arg(long)]
    timestamp: Option<u32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.global.log_level, &cli.global.log_format);

    let (wallet_config, network_config) = configs(&cli.global);

    match cli.command {
        Commands::Init(args) => init(&wallet_config, args),
        Commands::Import(args) => import(&wallet_config, &network_config, args),
        Commands::Restore(args) => restore(&wallet_config, &network_config, args),
        Commands::Update => update(&wallet_config, &network_config),
        Commands::Value => value(&wallet_config),
        Commands::FeeRate => fee_rate(&network_config),
        Commands::Price(args) => price(&network_config, args),
    }
}

fn configs(global: &GlobalArgs) -> (WalletConfig, NetworkConfig) {
    let (mut wallet, network) = if global.testnet {
        (WalletConfig::testnet(), NetworkConfig::testnet())
    } else {
        (WalletConfig::mainnet(), NetworkConfig::mainnet())
    };
    if let Some(dir) = &global.data_dir {
        wallet.data_dir = dir.clone();
    }
    (wallet, network)
}

fn connect(config: &NetworkConfig) -> Result<RedundantNetwork> {
    RedundantNetwork::from_config(config).context("Failed to build network clients")
}

fn load_wallet(config: &WalletConfig) -> Result<WalletState> {
    let path = config.wallet_path();
    if !path.exists() {
        bail!("No wallet at {} (run `cosmos-cli init` first)", path.display());
    }
    WalletState::load(&path).with_context(|| format!("Failed to load wallet {}", path.display()))
}

fn open_txdb(config: &WalletConfig) -> Result<Session> {
    let path = config.txdb_path();
    Session::open(&path).with_context(|| format!("Failed to open transaction database {}", path.display()))
}

fn init(config: &WalletConfig, args: InitArgs) -> Result<()> {
    let path = config.wallet_path();
    if path.exists() {
        bail!("Wallet file already exists: {}", path.display());
    }

    let key = Xpub::from_str(&args.xpub).context("Invalid extended public key")?;
    let receive_path = DerivationPath::from_str(&args.receive_path).context("Invalid receive path")?;
    let change_path = DerivationPath::from_str(&args.change_path).context("Invalid change path")?;

    let receive = AddressSequence::new(key, receive_path, config.network);
    let change = AddressSequence::new(key, change_path, config.network);
    let first = receive.last_address().context("Failed to derive first address")?;

    WalletState::new(Addresses::new(receive, change))
        .save(&path)
        .context("Failed to save wallet")?;

    println!("Wallet saved to: {}", path.display());
    println!("First receive address: {first}");
    Ok(())
}

fn import(config: &WalletConfig, net_config: &NetworkConfig, args: ImportArgs) -> Result<()> {
    let txids = args
        .txids
        .iter()
        .map(|s| Txid::from_str(s).with_context(|| format!("Invalid txid: {s}")))
        .collect::<Result<Vec<_>>>()?;

    let net = connect(net_config)?;
    let mut session = open_txdb(config)?;
    let network = config.network;

    let imported = session.update(|db| -> Result<Vec<Txid>> {
        let mut imported = Vec::new();
        for txid in &txids {
            let mut remote = CachedRemoteTxDb::new(&net, db);
            if remote.fetch_and_import(txid)?.is_none() {
                warn!(%txid, "no proof available; skipped");
                continue;
            }
            let tx = remote
                .transaction(txid)
                .with_context(|| format!("Transaction {txid} missing after import"))?;
            index(db, &tx, network)?;
            imported.push(*txid);
        }
        Ok(imported)
    })?;

    for txid in &imported {
        println!("imported {txid}");
    }
    println!("{} of {} transactions imported", imported.len(), txids.len());
    Ok(())
}

/// Record every output under its address and script hash, and every input
/// as the redeemer of what it spends.
fn index(db: &mut LocalTxDb, tx: &Transaction, network: bitcoin::Network) -> Result<()> {
    let txid = tx.compute_txid();
    for (vout, out) in tx.output.iter().enumerate() {
        let outpoint = OutPoint::new(txid, vout as u32);
        if let Ok(address) = Address::from_script(&out.script_pubkey, network) {
            db.add_address(&address, outpoint);
        }
        db.add_script(ScriptHash::from_script(&out.script_pubkey), outpoint);
    }
    for (vin, input) in tx.input.iter().enumerate() {
        if !input.previous_output.is_null() {
            db.set_redeem(input.previous_output, InPoint::new(txid, vin as u32))
                .with_context(|| format!("Conflicting spend of {}", input.previous_output))?;
        }
    }
    Ok(())
}

fn restore(config: &WalletConfig, net_config: &NetworkConfig, args: RestoreArgs) -> Result<()> {
    let mut wallet = load_wallet(config)?;
    let net = connect(net_config)?;
    let mut session = open_txdb(config)?;
    let restore = Restore::new(args.max_look_ahead.unwrap_or(config.max_look_ahead));

    let names: Vec<String> = wallet.addresses.names().map(str::to_string).collect();
    for name in names {
        let start = wallet.addresses.sequence(&name)?.clone();
        let restored = session.update(|db| -> Result<_> {
            let mut remote = CachedRemoteTxDb::new(&net, db);
            Ok(restore.run(&mut remote, start)?)
        })?;
        println!(
            "{name}: scanned {} addresses, received {} spent {} held {} sats, next index {}",
            restored.scanned,
            restored.totals.received,
            restored.totals.spent,
            restored.totals.held,
            restored.last.last
        );
        wallet.apply_restore(&name, &restored)?;
    }

    wallet.save(&config.wallet_path()).context("Failed to save wallet")?;
    println!("Wallet value: {} sats", wallet.account.value());
    Ok(())
}

fn update(config: &WalletConfig, net_config: &NetworkConfig) -> Result<()> {
    let net = connect(net_config)?;
    let mut session = open_txdb(config)?;
    let network = config.network;

    let confirmed = session.update(|db| -> Result<Vec<Txid>> {
        let confirmed = CachedRemoteTxDb::new(&net, db).update_pending()?;
        for txid in &confirmed {
            if let Some(tx) = db.transaction(txid) {
                index(db, &tx, network)?;
            }
        }
        Ok(confirmed)
    })?;

    for txid in &confirmed {
        println!("confirmed {txid}");
    }
    let pending = session.store().pending();
    info!(confirmed = confirmed.len(), pending = pending.len(), "update done");
    println!("{} confirmed, {} still pending", confirmed.len(), pending.len());
    Ok(())
}

fn value(config: &WalletConfig) -> Result<()> {
    let wallet = load_wallet(config)?;
    for (outpoint, redeemable) in wallet.account.outputs() {
        println!("{outpoint}  {} sats  {}", redeemable.value(), redeemable.derivation.path);
    }
    println!("{} outputs, {} sats", wallet.account.len(), wallet.account.value());
    Ok(())
}

fn fee_rate(net_config: &NetworkConfig) -> Result<()> {
    let rate = connect(net_config)?.current_fee_rate().context("Failed to fetch fee quote")?;
    println!("{} sats per {} bytes ({:.3} sat/kB)", rate.satoshis, rate.bytes, rate.per_kilobyte());
    Ok(())
}

fn price(net_config: &NetworkConfig, args: PriceArgs) -> Result<()> {
    let timestamp = match args.timestamp {
        Some(t) => t,
        None => u32::try_from(chrono::Utc::now().timestamp()).context("Clock out of range")?,
    };
    let usd = connect(net_config)?
        .historical_price(timestamp)
        .context("Failed to fetch price")?;
    println!("{usd:.2} USD");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `format = "json"` selects JSON lines; anything else is human-readable text.
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
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init();
    }
}
