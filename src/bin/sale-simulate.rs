use std::{collections::BTreeMap, process, thread};

use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};

use tokensale::{
    chain::{ManualClock, SharedChain},
    deploy,
    ledger::{Address, DECIMALS, UNIT},
    telemetry::TotalsRecorder,
    units::format_units,
    Chain, Keypair, SaleConfig, SaleError, Transaction, TxError,
};

#[derive(Parser)]
#[command(
    name = "sale-simulate",
    about = "Hammer a sale with concurrent random purchases and check its books"
)]
struct Opts {
    #[arg(long, default_value_t = 8)]
    threads: usize,
    /// Purchases attempted per thread
    #[arg(long, default_value_t = 200)]
    purchases: u64,
    #[arg(long, default_value_t = 0x5A1E_0001)]
    seed: u64,
    /// Probability in [0, 1] that a purchase names a referrer
    #[arg(long, default_value_t = 0.5, value_parser = probability)]
    referral: f64,
}

fn probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not in [0, 1]"))
    }
}

const START: u64 = 1_700_000_000;
const END: u64 = START + 86_400;

#[derive(Default)]
struct Tally {
    applied: u64,
    /// Rejections the sale is expected to produce under load.
    expected: BTreeMap<&'static str, u64>,
    unexpected: Vec<String>,
}

impl Tally {
    fn reject(&mut self, err: TxError) {
        match err {
            TxError::Sale(SaleError::SoldOut) => *self.expected.entry("sold_out").or_insert(0) += 1,
            TxError::InsufficientFunds { .. } => {
                *self.expected.entry("insufficient_funds").or_insert(0) += 1
            }
            other => self.unexpected.push(other.to_string()),
        }
    }

    fn merge(&mut self, other: Tally) {
        self.applied += other.applied;
        for (reason, count) in other.expected {
            *self.expected.entry(reason).or_insert(0) += count;
        }
        self.unexpected.extend(other.unexpected);
    }
}

fn main() {
    let opts = Opts::parse();

    let recorder = TotalsRecorder::new();
    if let Err(err) = metrics::set_global_recorder(recorder.clone()) {
        eprintln!("error: cannot install metrics recorder: {err}");
        process::exit(2);
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let buyers: Vec<Keypair> = (0..opts.threads.max(1))
        .map(|_| Keypair::from_secret_bytes(&rng.gen()))
        .collect();
    let addresses: Vec<Address> = buyers.iter().map(Keypair::address).collect();
    let deployer = Address::derive(b"account", b"sale-simulate/deployer");

    let mut config = SaleConfig::new(START, END, Address::derive(b"account", b"sale-simulate/treasury"));
    config.allocations = addresses.iter().map(|a| (*a, 10_000 * UNIT)).collect();

    let mut chain = Chain::genesis(config.allocations.clone());
    let deployment = match deploy(&mut chain, deployer, &config, START - 1) {
        Ok(deployment) => deployment,
        Err(err) => {
            eprintln!("error: deployment failed: {err}");
            process::exit(2);
        }
    };
    let clock = ManualClock::new(START);
    let shared = SharedChain::new(chain, clock.clone());
    eprintln!(
        "sale {} token {} | {} threads × {} purchases",
        deployment.sale, deployment.token, opts.threads, opts.purchases
    );

    let handles: Vec<_> = buyers
        .into_iter()
        .enumerate()
        .map(|(i, keys)| {
            let shared = shared.clone();
            let addresses = addresses.clone();
            let mut rng = StdRng::seed_from_u64(opts.seed.wrapping_add(i as u64 + 1));
            let purchases = opts.purchases;
            let referral = opts.referral;
            thread::spawn(move || {
                let mut tally = Tally::default();
                for nonce in 0..purchases {
                    let value = rng.gen_range(1..=500u128) * UNIT / 100;
                    let referrer = if rng.gen_bool(referral) {
                        Some(addresses[rng.gen_range(0..addresses.len())])
                    } else {
                        None
                    };
                    let signed = keys.sign(Transaction::Purchase { value, referrer }, nonce);
                    match shared.submit(&signed) {
                        Ok(_) => tally.applied += 1,
                        Err(err) => tally.reject(err),
                    }
                }
                tally
            })
        })
        .collect();

    let mut total = Tally::default();
    for handle in handles {
        match handle.join() {
            Ok(tally) => total.merge(tally),
            Err(_) => {
                eprintln!("error: worker thread panicked");
                process::exit(2);
            }
        }
    }

    clock.set(END);
    let burn = shared.execute(deployer, Transaction::BurnRemaining);
    let second_burn = shared.execute(deployer, Transaction::BurnRemaining);

    let mut failures: Vec<String> = total
        .unexpected
        .iter()
        .map(|err| format!("unexpected rejection: {err}"))
        .collect();
    shared.read(|chain| {
        let Some(sale) = chain.sale() else {
            failures.push("sale disappeared".to_string());
            return;
        };
        let credited: u128 = chain.receipts().iter().map(|r| r.credited()).sum();
        if credited != sale.token_amount_raised() {
            failures.push(format!(
                "raised {} but receipts credit {}",
                sale.token_amount_raised(),
                credited
            ));
        }
        if let Some(token) = chain.token() {
            if token.ledger.total_supply() != token.ledger.circulating() {
                failures.push("total supply differs from the sum of balances".to_string());
            }
            if token.ledger.total_supply() != sale.token_amount_raised() {
                failures.push("supply after burn differs from amount raised".to_string());
            }
        }
        if chain.token_balance(&sale.address()) != 0 {
            failures.push("sale still holds units after burn".to_string());
        }
        let held: u128 = addresses.iter().map(|a| chain.native_balance(a)).sum();
        if chain.native_balance(&sale.treasury()) + chain.native_balance(&sale.address()) + held
            != chain.native_total()
        {
            failures.push("native value leaked".to_string());
        }
        eprintln!(
            "applied {} rejected {:?} | raised {} | treasury {}",
            total.applied,
            total.expected,
            format_units(sale.token_amount_raised(), DECIMALS),
            format_units(chain.native_balance(&sale.treasury()), DECIMALS)
        );
    });

    if let Err(err) = burn {
        failures.push(format!("burn after end failed: {err}"));
    }
    if !matches!(second_burn, Err(TxError::Sale(SaleError::NothingToBurn))) {
        failures.push("second burn was not rejected".to_string());
    }
    let purchases = recorder.totals("sale.purchases.total").count;
    if purchases != total.applied {
        failures.push(format!(
            "metrics counted {purchases} purchases, workers saw {}",
            total.applied
        ));
    }

    for (name, totals) in recorder.snapshot() {
        eprintln!("metric {name} count={} sum={}", totals.count, totals.sum);
    }

    if failures.is_empty() {
        println!("ok");
    } else {
        for failure in &failures {
            eprintln!("invariant violated: {failure}");
        }
        process::exit(2);
    }
}
