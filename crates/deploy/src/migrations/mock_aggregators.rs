//! 0003: stand up mock aggregators and register them on ChainlinkL1.

use anyhow::Result;

use crate::chain::ChainClient;
use crate::chain::abi;
use crate::config::PriceFeedKey;
use crate::context::MigrationContext;
use crate::contract::ContractName;
use crate::migration::MigrationTask;

pub(super) fn tasks<C: ChainClient>(context: &MigrationContext<C>) -> Vec<MigrationTask<'_>> {
    vec![
        Box::pin(async move { deploy_mock_aggregator(context, PriceFeedKey::Eth).await }),
        Box::pin(async move { deploy_mock_aggregator(context, PriceFeedKey::Btc).await }),
    ]
}

async fn deploy_mock_aggregator<C: ChainClient>(
    context: &MigrationContext<C>,
    key: PriceFeedKey,
) -> Result<()> {
    tracing::info!(key = %key, "Deploying a mock aggregator...");
    let mock = context
        .factory
        .create(ContractName::aggregator_mock(key))
        .deploy_immutable(&[8u64.into(), format!("Mock aggregator of {key} prices").into()])
        .await?;

    let chainlink = context
        .factory
        .create(ContractName::ChainlinkL1)
        .instance()?;
    let key_bytes = abi::format_bytes32_string(&key.to_string())?;

    // Deregistering a key that was never registered reverts; that is the
    // expected first-run outcome and must not abort the migration.
    match chainlink
        .execute_with("removeAggregator(bytes32)", &[key_bytes.into()], 1)
        .await
    {
        Ok(_) => tracing::info!(key = %key, "Previously registered aggregator removed"),
        Err(error) => {
            tracing::info!(key = %key, error = %error, "No aggregator was previously registered")
        }
    }

    tracing::info!(key = %key, mock = %mock, "Registering the mock aggregator...");
    chainlink
        .execute(
            "addAggregator(bytes32,address)",
            &[key_bytes.into(), mock.into()],
        )
        .await?;
    Ok(())
}
