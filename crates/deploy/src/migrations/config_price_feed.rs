//! 0002: point ChainlinkL1 at the configured aggregators and hand it over.

use anyhow::Result;

use crate::chain::ChainClient;
use crate::chain::abi;
use crate::config::PriceFeedKey;
use crate::context::MigrationContext;
use crate::contract::ContractName;
use crate::migration::MigrationTask;
use crate::settings::require_external;

pub(super) fn tasks<C: ChainClient>(context: &MigrationContext<C>) -> Vec<MigrationTask<'_>> {
    vec![
        Box::pin(async move {
            tracing::info!("Adding the BTC aggregator to the layer 1 price feed...");
            add_configured_aggregator(context, PriceFeedKey::Btc).await
        }),
        Box::pin(async move {
            tracing::info!("Adding the ETH aggregator to the layer 1 price feed...");
            add_configured_aggregator(context, PriceFeedKey::Eth).await
        }),
        Box::pin(async move {
            let governance = require_external(
                context.external_contracts.foundation_governance,
                "foundationGovernance",
            )?;
            tracing::info!(governance = %governance, "Transferring ChainlinkL1 ownership; remember to claim it");
            context
                .factory
                .create(ContractName::ChainlinkL1)
                .instance()?
                .execute("setOwner(address)", &[governance.into()])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            if context.settings.in_same_layer()? {
                return Ok(());
            }
            let governance = require_external(
                context.external_contracts.foundation_governance,
                "foundationGovernance",
            )?;
            tracing::info!(governance = %governance, "Transferring proxy admin ownership...");
            context
                .factory
                .create(ContractName::ChainlinkL1)
                .transfer_proxy_admin_ownership(governance)
                .await?;
            tracing::info!("Contract deployment finished");
            Ok(())
        }),
    ]
}

async fn add_configured_aggregator<C: ChainClient>(
    context: &MigrationContext<C>,
    key: PriceFeedKey,
) -> Result<()> {
    let aggregator = context.deploy_config.chainlink_aggregator(key)?;
    let key_bytes = abi::format_bytes32_string(&key.to_string())?;
    context
        .factory
        .create(ContractName::ChainlinkL1)
        .instance()?
        .execute(
            "addAggregator(bytes32,address)",
            &[key_bytes.into(), aggregator.into()],
        )
        .await?;
    Ok(())
}
