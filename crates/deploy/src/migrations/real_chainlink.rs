//! 0006: swap the mock aggregators for the real chainlink ones.

use anyhow::Result;

use crate::chain::ChainClient;
use crate::chain::abi;
use crate::config::PriceFeedKey;
use crate::context::MigrationContext;
use crate::contract::ContractName;
use crate::migration::MigrationTask;

pub(super) fn tasks<C: ChainClient>(context: &MigrationContext<C>) -> Vec<MigrationTask<'_>> {
    vec![
        Box::pin(async move { use_real_aggregator(context, PriceFeedKey::Eth).await }),
        Box::pin(async move { use_real_aggregator(context, PriceFeedKey::Btc).await }),
    ]
}

async fn use_real_aggregator<C: ChainClient>(
    context: &MigrationContext<C>,
    key: PriceFeedKey,
) -> Result<()> {
    let chainlink = context
        .factory
        .create(ContractName::ChainlinkL1)
        .instance()?;
    let key_bytes = abi::format_bytes32_string(&key.to_string())?;

    // Same expected no-op as the mock setup: nothing registered yet is fine.
    match chainlink
        .execute_with("removeAggregator(bytes32)", &[key_bytes.into()], 1)
        .await
    {
        Ok(_) => tracing::info!(key = %key, "Previously registered aggregator removed"),
        Err(error) => {
            tracing::info!(key = %key, error = %error, "No aggregator was previously registered")
        }
    }

    let aggregator = context.deploy_config.chainlink_aggregator(key)?;
    tracing::info!(key = %key, aggregator = %aggregator, "Registering the real aggregator...");
    chainlink
        .execute(
            "addAggregator(bytes32,address)",
            &[key_bytes.into(), aggregator.into()],
        )
        .await?;
    Ok(())
}
