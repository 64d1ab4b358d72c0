use std::{fs, path::PathBuf, process};

use clap::{Args, Parser, Subcommand};
use rand::{rngs::OsRng, RngCore};

use tokensale::{
    chain::{Clock, SystemClock},
    config::ConfigError,
    deploy,
    keys::KeyError,
    ledger::{Address, DECIMALS},
    units::{format_units, parse_units, UnitsError},
    Chain, Keypair, Receipt, SaleConfig, SaleError, Transaction, TxError,
};

#[derive(Parser)]
#[command(name = "tokensale", version, about = "Timed token sale with referral bonuses")]
struct Cli {
    /// Chain state file
    #[arg(long, global = true, default_value = "tokensale.state.json")]
    state: PathBuf,
    /// Override the current unix time (seconds)
    #[arg(long, global = true)]
    now: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a fresh ed25519 keypair as sk.hex / pk.hex
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Create the state file and deploy the sale from a config
    Init {
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        signer: Signer,
        /// Replace an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Buy with native value, e.g. --value 1.5
    Purchase {
        #[command(flatten)]
        signer: Signer,
        #[arg(long)]
        value: String,
        #[arg(long)]
        referrer: Option<Address>,
    },
    /// Burn the sale's unsold balance after the window closed
    BurnRemaining {
        #[command(flatten)]
        signer: Signer,
    },
    Transfer {
        #[command(flatten)]
        signer: Signer,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: String,
    },
    Burn {
        #[command(flatten)]
        signer: Signer,
        #[arg(long)]
        amount: String,
    },
    /// Native and asset balances of an account
    Balance {
        #[arg(long)]
        address: Address,
    },
    Info,
    /// Print every log entry as one JSON line
    Logs,
    /// Credits a purchase of --value would yield right now
    Quote {
        #[arg(long)]
        value: String,
        #[arg(long)]
        with_referrer: bool,
    },
}

#[derive(Args)]
struct Signer {
    /// 32-byte ed25519 secret key in hex
    #[arg(long)]
    sk_hex: String,
    /// Defaults to a random nonce
    #[arg(long)]
    nonce: Option<u64>,
}

impl Signer {
    fn keypair(&self) -> Result<Keypair, KeyError> {
        Keypair::from_secret_hex(&self.sk_hex)
    }

    fn nonce(&self) -> u64 {
        self.nonce.unwrap_or_else(|| OsRng.next_u64())
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Sale(#[from] SaleError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("state file {} already exists (use --force)", .0.display())]
    StateExists(PathBuf),
    #[error("no sale deployed in {}", .0.display())]
    NoSale(PathBuf),
}

fn amount(value: &str) -> Result<u128, UnitsError> {
    parse_units(value, DECIMALS)
}

fn display(amount: u128) -> String {
    format_units(amount, DECIMALS)
}

fn print_receipt(receipt: &Receipt) {
    println!("tx {} applied at height {}", receipt.tx_hash, receipt.index);
    for log in &receipt.logs {
        println!("  {} {:?}", log.emitter, log.event);
    }
}

fn submit(cli: &Cli, signer: &Signer, tx: Transaction, now: u64) -> Result<(), CliError> {
    let mut chain = Chain::load(&cli.state)?;
    let signed = signer.keypair()?.sign(tx, signer.nonce());
    let receipt = chain.submit(&signed, now)?;
    chain.save(&cli.state)?;
    print_receipt(&receipt);
    Ok(())
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let now = cli.now.unwrap_or_else(|| SystemClock.now());
    match &cli.command {
        Command::Keygen { out_dir } => {
            let keys = Keypair::generate();
            fs::create_dir_all(out_dir)?;
            fs::write(out_dir.join("sk.hex"), keys.secret_hex())?;
            fs::write(out_dir.join("pk.hex"), keys.public_hex())?;
            println!("keypair written → {}", out_dir.display());
            println!("address {}", keys.address());
        }
        Command::Init {
            config,
            signer,
            force,
        } => {
            if cli.state.exists() && !force {
                return Err(CliError::StateExists(cli.state.clone()));
            }
            let config = SaleConfig::load(config)?;
            let deployer = signer.keypair()?.address();
            let mut chain = Chain::genesis(config.allocations.clone());
            let deployment = deploy(&mut chain, deployer, &config, now)?;
            chain.save(&cli.state)?;
            eprintln!("state written → {}", cli.state.display());
            println!("sale  {}", deployment.sale);
            println!("token {}", deployment.token);
        }
        Command::Purchase {
            signer,
            value,
            referrer,
        } => {
            let tx = Transaction::Purchase {
                value: amount(value)?,
                referrer: *referrer,
            };
            submit(cli, signer, tx, now)?;
        }
        Command::BurnRemaining { signer } => {
            submit(cli, signer, Transaction::BurnRemaining, now)?;
        }
        Command::Transfer {
            signer,
            to,
            amount: value,
        } => {
            let tx = Transaction::TokenTransfer {
                to: *to,
                amount: amount(value)?,
            };
            submit(cli, signer, tx, now)?;
        }
        Command::Burn {
            signer,
            amount: value,
        } => {
            let tx = Transaction::TokenBurn {
                amount: amount(value)?,
            };
            submit(cli, signer, tx, now)?;
        }
        Command::Balance { address } => {
            let chain = Chain::load(&cli.state)?;
            println!("native {}", display(chain.native_balance(address)));
            println!("token  {}", display(chain.token_balance(address)));
        }
        Command::Info => {
            let chain = Chain::load(&cli.state)?;
            let sale = chain
                .sale()
                .ok_or_else(|| CliError::NoSale(cli.state.clone()))?;
            println!("sale        {}", sale.address());
            match sale.token() {
                Some(token) => println!("token       {token}"),
                None => println!("token       (unbound)"),
            }
            println!(
                "window      [{}, {})",
                sale.starting_timestamp(),
                sale.ending_timestamp()
            );
            println!("phase       {:?} at {now}", sale.phase(now));
            println!(
                "rate        {}/{}",
                sale.rate_price_numerator(),
                sale.rate_price_denominator()
            );
            println!("referral    {}%", sale.referral_bonus());
            println!("treasury    {}", sale.treasury());
            println!("raised      {}", display(sale.token_amount_raised()));
            println!("unsold      {}", display(chain.token_balance(&sale.address())));
            if let Some(token) = chain.token() {
                println!("supply      {}", display(token.ledger.total_supply()));
            }
            println!("height      {}", chain.meta().height);
            println!("state root  {}", hex::encode(chain.state_root()));
        }
        Command::Logs => {
            let chain = Chain::load(&cli.state)?;
            for log in chain.logs() {
                println!("{}", serde_json::to_string(log)?);
            }
        }
        Command::Quote {
            value,
            with_referrer,
        } => {
            let chain = Chain::load(&cli.state)?;
            let sale = chain
                .sale()
                .ok_or_else(|| CliError::NoSale(cli.state.clone()))?;
            let quote = sale.quote(amount(value)?, *with_referrer)?;
            println!("purchaser {}", display(quote.purchaser_credit));
            println!("referrer  {}", display(quote.referrer_credit));
            println!("total     {}", display(quote.total()));
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        process::exit(2);
    }
}
