use crate::chain::{Chain, Receipt, Transaction, TxError};
use crate::config::SaleConfig;
use crate::ledger::Address;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub sale: Address,
    pub token: Address,
    pub binding: Receipt,
}

/// Deploys the sale, mints the whole supply to it and binds the two.
///
/// Ownership of the sale is renounced by the final step, so after this
/// returns no account can reconfigure it.
pub fn deploy(
    chain: &mut Chain,
    deployer: Address,
    config: &SaleConfig,
    now: u64,
) -> Result<Deployment, TxError> {
    let params = config.params()?;
    let sale = chain.deploy_sale(deployer, params, now)?;
    let token = chain.deploy_token(deployer, sale, config.max_supply, now)?;
    let binding = chain.execute(deployer, Transaction::BindToken { token }, now)?;
    Ok(Deployment {
        sale,
        token,
        binding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LogEntry;
    use crate::contracts::{SaleEvent, SalePhase};
    use crate::ledger::MAX_SUPPLY;

    #[test]
    fn deployment_binds_and_renounces() {
        let deployer = Address::derive(b"account", b"deployer");
        let config = SaleConfig::new(100, 200, Address::derive(b"account", b"treasury"));
        let mut chain = Chain::genesis(config.allocations.clone());
        let deployment = deploy(&mut chain, deployer, &config, 50).unwrap();

        let sale = chain.sale().unwrap();
        assert_eq!(sale.token(), Some(deployment.token));
        assert_eq!(sale.owner(), None);
        assert_eq!(sale.phase(50), SalePhase::Pending);
        assert_eq!(chain.token_balance(&deployment.sale), MAX_SUPPLY);
        assert_eq!(
            deployment.binding.logs,
            vec![LogEntry::new(
                deployment.sale,
                SaleEvent::OwnershipTransferred {
                    previous_owner: Some(deployer),
                    new_owner: None
                }
            )]
        );
    }

    #[test]
    fn invalid_config_deploys_nothing() {
        let deployer = Address::derive(b"account", b"deployer");
        let mut config = SaleConfig::new(100, 200, deployer);
        config.rate_denominator = 0;
        let mut chain = Chain::genesis([]);
        assert!(deploy(&mut chain, deployer, &config, 0).is_err());
        assert!(chain.sale().is_none());
        assert!(chain.receipts().is_empty());
    }
}
