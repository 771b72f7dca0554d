//! 0000: the chainlink adapter contract on layer 1.

use crate::chain::ChainClient;
use crate::context::MigrationContext;
use crate::contract::ContractName;
use crate::migration::MigrationTask;

pub(super) fn tasks<C: ChainClient>(context: &MigrationContext<C>) -> Vec<MigrationTask<'_>> {
    vec![Box::pin(async move {
        tracing::info!("Deploying the chainlink price feed on layer 1...");
        context
            .factory
            .create(ContractName::ChainlinkL1)
            .deploy_upgradable(&[])
            .await?;
        Ok(())
    })]
}
