//! 0004: roll new implementations for the price feed contracts.

use crate::chain::ChainClient;
use crate::context::MigrationContext;
use crate::contract::ContractName;
use crate::migration::MigrationTask;

pub(super) fn tasks<C: ChainClient>(context: &MigrationContext<C>) -> Vec<MigrationTask<'_>> {
    vec![
        Box::pin(async move {
            tracing::info!("Upgrading the L2PriceFeed implementation...");
            let price_feed = context.factory.create(ContractName::L2PriceFeed);
            price_feed.prepare_upgrade().await?;
            price_feed.upgrade().await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Upgrading the ChainlinkL1 implementation...");
            let chainlink = context.factory.create(ContractName::ChainlinkL1);
            chainlink.prepare_upgrade().await?;
            chainlink.upgrade().await?;
            Ok(())
        }),
    ]
}
