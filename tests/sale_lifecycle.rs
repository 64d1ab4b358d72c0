use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

use tokensale::{
    chain::{Event, LogEntry},
    contracts::{SaleEvent, SalePhase},
    deploy,
    ledger::{Address, MAX_SUPPLY, UNIT},
    units::parse_units,
    Chain, Deployment, Keypair, SaleConfig, SaleError, Transaction, TxError,
};

const START: u64 = 1_700_000_000;
const END: u64 = START + 7 * 86_400;

fn account(tag: &str) -> Address {
    Address::derive(b"account", tag.as_bytes())
}

fn treasury() -> Address {
    account("treasury")
}

fn launch(funded: &[Address]) -> (Chain, Deployment) {
    let mut config = SaleConfig::new(START, END, treasury());
    config.allocations = funded.iter().map(|a| (*a, 100_000 * UNIT)).collect();
    let mut chain = Chain::genesis(config.allocations.clone());
    let deployment = deploy(&mut chain, account("deployer"), &config, START - 3_600).unwrap();
    (chain, deployment)
}

fn units(display: &str) -> u128 {
    parse_units(display, 18).unwrap()
}

fn purchase(value: u128, referrer: Option<Address>) -> Transaction {
    Transaction::Purchase { value, referrer }
}

#[test]
fn one_unit_of_value_buys_point_three() {
    let buyer = account("buyer");
    let (mut chain, deployment) = launch(&[buyer]);

    let receipt = chain.execute(buyer, purchase(UNIT, None), START).unwrap();

    assert_eq!(chain.token_balance(&buyer), units("0.3"));
    assert_eq!(chain.sale().unwrap().token_amount_raised(), units("0.3"));
    assert_eq!(
        chain.token_balance(&deployment.sale),
        MAX_SUPPLY - units("0.3")
    );
    assert_eq!(chain.native_balance(&treasury()), UNIT);
    assert_eq!(
        receipt.logs,
        vec![
            LogEntry::new(
                deployment.token,
                Event::Transfer {
                    from: Some(deployment.sale),
                    to: Some(buyer),
                    value: units("0.3"),
                }
            ),
            LogEntry::new(
                deployment.sale,
                SaleEvent::TokensPurchased {
                    purchaser: buyer,
                    beneficiary: buyer,
                    value: UNIT,
                    amount: units("0.3"),
                }
            ),
        ]
    );
}

#[test]
fn referrer_earns_ten_percent_on_top() {
    let buyer = account("buyer");
    let referrer = account("referrer");
    let (mut chain, deployment) = launch(&[buyer]);

    let receipt = chain
        .execute(buyer, purchase(UNIT, Some(referrer)), START + 1)
        .unwrap();

    assert_eq!(chain.token_balance(&buyer), units("0.3"));
    assert_eq!(chain.token_balance(&referrer), units("0.03"));
    assert_eq!(chain.sale().unwrap().token_amount_raised(), units("0.33"));
    assert_eq!(receipt.credited(), units("0.33"));
    assert!(receipt.logs.contains(&LogEntry::new(
        deployment.sale,
        SaleEvent::ReferrerEarned {
            purchaser: buyer,
            referrer,
            value: units("0.03"),
        }
    )));
}

#[test]
fn naming_yourself_as_referrer_earns_the_bonus() {
    let buyer = account("buyer");
    let (mut chain, deployment) = launch(&[buyer]);

    let receipt = chain
        .execute(buyer, purchase(UNIT, Some(buyer)), START)
        .unwrap();

    assert_eq!(chain.token_balance(&buyer), units("0.33"));
    assert_eq!(chain.sale().unwrap().token_amount_raised(), units("0.33"));
    assert_eq!(
        chain.token_balance(&deployment.sale),
        MAX_SUPPLY - units("0.33")
    );
    assert!(receipt.logs.contains(&LogEntry::new(
        deployment.sale,
        SaleEvent::ReferrerEarned {
            purchaser: buyer,
            referrer: buyer,
            value: units("0.03"),
        }
    )));
}

#[test]
fn window_is_half_open() {
    let buyer = account("buyer");
    let (mut chain, _) = launch(&[buyer]);

    assert_eq!(
        chain
            .execute(buyer, purchase(UNIT, None), START - 1)
            .unwrap_err(),
        TxError::Sale(SaleError::SaleNotStarted)
    );
    chain.execute(buyer, purchase(UNIT, None), START).unwrap();
    chain.execute(buyer, purchase(UNIT, None), END - 1).unwrap();
    assert_eq!(
        chain.execute(buyer, purchase(UNIT, None), END).unwrap_err(),
        TxError::Sale(SaleError::SaleEnded)
    );
    assert_eq!(chain.sale().unwrap().phase(END), SalePhase::Closed);
}

#[test]
fn zero_value_is_an_invalid_amount() {
    let buyer = account("buyer");
    let (mut chain, _) = launch(&[buyer]);
    assert_eq!(
        chain.execute(buyer, purchase(0, None), START).unwrap_err(),
        TxError::Sale(SaleError::InvalidAmount)
    );
}

#[test]
fn oversized_purchase_sells_out_without_side_effects() {
    let whale = account("whale");
    let (mut chain, deployment) = launch(&[whale]);
    let before = chain.clone();

    // 50_001 value buys 15_000.3 units, more than the whole supply.
    let err = chain
        .execute(whale, purchase(50_001 * UNIT, None), START)
        .unwrap_err();
    assert_eq!(err, TxError::Sale(SaleError::SoldOut));
    assert_eq!(chain, before);

    // Exactly the supply is fine.
    chain
        .execute(whale, purchase(50_000 * UNIT, None), START)
        .unwrap();
    assert_eq!(chain.token_balance(&whale), MAX_SUPPLY);
    assert_eq!(chain.token_balance(&deployment.sale), 0);
    assert_eq!(
        chain
            .execute(whale, purchase(UNIT, None), START)
            .unwrap_err(),
        TxError::Sale(SaleError::SoldOut)
    );
}

#[test]
fn referral_bonus_counts_against_availability() {
    let whale = account("whale");
    let (mut chain, _) = launch(&[whale]);
    // 50_000 value credits exactly the supply; the 10% bonus does not fit.
    assert_eq!(
        chain
            .execute(whale, purchase(50_000 * UNIT, Some(account("friend"))), START)
            .unwrap_err(),
        TxError::Sale(SaleError::SoldOut)
    );
}

#[test]
fn remaining_supply_burns_exactly_once_after_end() {
    let buyer = account("buyer");
    let anyone = account("anyone");
    let (mut chain, deployment) = launch(&[buyer]);
    chain
        .execute(buyer, purchase(10 * UNIT, None), START)
        .unwrap();

    assert_eq!(
        chain
            .execute(anyone, Transaction::BurnRemaining, END - 1)
            .unwrap_err(),
        TxError::Sale(SaleError::SaleNotEnded)
    );

    let receipt = chain
        .execute(anyone, Transaction::BurnRemaining, END)
        .unwrap();
    let remaining = MAX_SUPPLY - 3 * UNIT;
    assert_eq!(
        receipt.logs,
        vec![LogEntry::new(
            deployment.token,
            Event::Transfer {
                from: Some(deployment.sale),
                to: None,
                value: remaining,
            }
        )]
    );
    let ledger = &chain.token().unwrap().ledger;
    assert_eq!(ledger.total_supply(), 3 * UNIT);
    assert_eq!(chain.token_balance(&deployment.sale), 0);
    assert_eq!(chain.sale().unwrap().phase(END), SalePhase::Finalized);

    assert_eq!(
        chain
            .execute(anyone, Transaction::BurnRemaining, END + 1)
            .unwrap_err(),
        TxError::Sale(SaleError::NothingToBurn)
    );
}

#[test]
fn burning_an_empty_sale_succeeds_once() {
    let whale = account("whale");
    let (mut chain, deployment) = launch(&[whale]);
    chain
        .execute(whale, purchase(50_000 * UNIT, None), START)
        .unwrap();
    let receipt = chain
        .execute(whale, Transaction::BurnRemaining, END)
        .unwrap();
    assert_eq!(
        receipt.logs,
        vec![LogEntry::new(
            deployment.token,
            Event::Transfer {
                from: Some(deployment.sale),
                to: None,
                value: 0,
            }
        )]
    );
    assert!(chain.sale().unwrap().is_burned());
    assert!(chain
        .execute(whale, Transaction::BurnRemaining, END)
        .is_err());
}

#[test]
fn rebinding_after_deployment_is_impossible() {
    let deployer = account("deployer");
    let (mut chain, deployment) = launch(&[]);
    assert_eq!(
        chain
            .execute(
                deployer,
                Transaction::BindToken {
                    token: deployment.token
                },
                START
            )
            .unwrap_err(),
        TxError::Sale(SaleError::AlreadyBound)
    );
}

#[test]
fn failing_treasury_reverts_the_purchase() {
    let buyer = account("buyer");
    let (mut chain, deployment) = launch(&[buyer]);
    chain.set_refuses_deposits(treasury(), true);
    let root = chain.state_root();
    let receipts = chain.receipts().len();

    let err = chain
        .execute(buyer, purchase(UNIT, Some(account("ref"))), START)
        .unwrap_err();
    assert_eq!(err, TxError::ForwardFailed { to: treasury() });
    assert_eq!(chain.state_root(), root);
    assert_eq!(chain.receipts().len(), receipts);
    assert_eq!(chain.token_balance(&deployment.sale), MAX_SUPPLY);
    assert_eq!(chain.native_balance(&buyer), 100_000 * UNIT);
}

#[test]
fn dust_purchase_credits_nothing_but_forwards_value() {
    let buyer = account("buyer");
    let (mut chain, _) = launch(&[buyer]);
    // 3 * 3 / 10 rounds down to 0.
    let receipt = chain.execute(buyer, purchase(3, None), START).unwrap();
    assert_eq!(receipt.credited(), 0);
    assert_eq!(chain.token_balance(&buyer), 0);
    assert_eq!(chain.native_balance(&treasury()), 3);
}

#[test]
fn signed_purchases_round_trip_through_state_file() {
    let keys = Keypair::from_secret_bytes(&[42u8; 32]);
    let buyer = keys.address();
    let (mut chain, _) = launch(&[buyer]);
    let signed = keys.sign(purchase(2 * UNIT, None), 1);
    chain.submit(&signed, START).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sale.state.json");
    chain.save(&path).unwrap();
    let mut restored = Chain::load(&path).unwrap();
    assert_eq!(restored, chain);
    assert_eq!(restored.token_balance(&buyer), units("0.6"));
    assert_eq!(
        restored.submit(&signed, START + 5).unwrap_err(),
        TxError::DuplicateTransaction(signed.hash())
    );
}

#[test]
fn raised_total_is_order_independent() {
    let buyers: Vec<Address> = (0..6).map(|i| account(&format!("buyer-{i}"))).collect();
    let mut rng = StdRng::seed_from_u64(0x5A1E);
    let mut orders: Vec<(Address, u128, Option<Address>)> = (0..60)
        .map(|_| {
            let buyer = buyers[rng.gen_range(0..buyers.len())];
            let value = rng.gen_range(1..=1_000u128) * UNIT / 7;
            let referrer = rng
                .gen_bool(0.5)
                .then(|| account("referrer"));
            (buyer, value, referrer)
        })
        .collect();

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        orders.shuffle(&mut rng);
        let (mut chain, deployment) = launch(&buyers);
        let mut credited = 0u128;
        for (buyer, value, referrer) in &orders {
            credited += chain
                .execute(*buyer, purchase(*value, *referrer), START)
                .unwrap()
                .credited();
        }
        let sale = chain.sale().unwrap();
        assert_eq!(sale.token_amount_raised(), credited);
        let ledger = &chain.token().unwrap().ledger;
        assert_eq!(ledger.total_supply(), ledger.circulating());
        assert_eq!(
            chain.token_balance(&deployment.sale) + credited,
            MAX_SUPPLY
        );
        outcomes.push(credited);
    }
    assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
}
