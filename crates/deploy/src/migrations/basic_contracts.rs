//! 0001: the core protocol contracts, wired together and handed to governance.

use alloy_core::primitives::U256;
use anyhow::Result;

use crate::chain::ChainClient;
use crate::chain::abi;
use crate::config::PriceFeedKey;
use crate::context::MigrationContext;
use crate::contract::{AmmInstanceName, ContractName};
use crate::migration::MigrationTask;
use crate::settings::{Layer, require_external};

pub(super) fn tasks<C: ChainClient>(context: &MigrationContext<C>) -> Vec<MigrationTask<'_>> {
    vec![
        Box::pin(async move {
            tracing::info!("Deploying MetaTxGateway...");
            let chain_id = context.settings.get_chain_id(Layer::Layer1)?;
            context
                .factory
                .create(ContractName::MetaTxGateway)
                .deploy_upgradable(&["Perp".into(), "1".into(), chain_id.into()])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Deploying InsuranceFund...");
            context
                .factory
                .create(ContractName::InsuranceFund)
                .deploy_upgradable(&[])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Deploying L2PriceFeed...");
            let chainlink = context
                .factory
                .create(ContractName::ChainlinkL1)
                .require_address()?;
            context
                .factory
                .create(ContractName::L2PriceFeed)
                .deploy_upgradable(&[chainlink.into()])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Setting the L2 price feed on ChainlinkL1...");
            let price_feed = context
                .metadata
                .get_contract_metadata(Layer::Layer1, &ContractName::L2PriceFeed.to_string())?
                .address;
            context
                .factory
                .create(ContractName::ChainlinkL1)
                .instance()?
                .execute_with("setPriceFeedL2(address)", &[price_feed.into()], 1)
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Deploying ClearingHouse...");
            let insurance_fund = context
                .factory
                .create(ContractName::InsuranceFund)
                .require_address()?;
            let gateway = context
                .factory
                .create(ContractName::MetaTxGateway)
                .require_address()?;
            context
                .factory
                .create(ContractName::ClearingHouse)
                .deploy_upgradable(&[
                    context.deploy_config.init_margin_requirement.into(),
                    context.deploy_config.maintenance_margin_requirement.into(),
                    context.deploy_config.liquidation_fee_ratio.into(),
                    insurance_fund.into(),
                    gateway.into(),
                ])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Whitelisting ClearingHouse on MetaTxGateway...");
            let clearing_house = context
                .factory
                .create(ContractName::ClearingHouse)
                .require_address()?;
            context
                .factory
                .create(ContractName::MetaTxGateway)
                .instance()?
                .execute("addToWhitelists(address)", &[clearing_house.into()])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Setting the InsuranceFund beneficiary...");
            let clearing_house = context
                .factory
                .create(ContractName::ClearingHouse)
                .require_address()?;
            context
                .factory
                .create(ContractName::InsuranceFund)
                .instance()?
                .execute("setBeneficiary(address)", &[clearing_house.into()])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Whitelisting the arbitrageur on ClearingHouse...");
            let arbitrageur = require_external(
                context.settings.get_external_contracts(Layer::Layer2)?.arbitrageur,
                "arbitrageur",
            )?;
            context
                .factory
                .create(ContractName::ClearingHouse)
                .instance()?
                .execute("setWhitelist(address)", &[arbitrageur.into()])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Deploying the ETHUSDC amm...");
            deploy_amm(context, AmmInstanceName::EthUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Deploying the BTCUSDC amm...");
            deploy_amm(context, AmmInstanceName::BtcUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Deploying ClearingHouseViewer...");
            let clearing_house = context
                .factory
                .create(ContractName::ClearingHouse)
                .require_address()?;
            context
                .factory
                .create(ContractName::ClearingHouseViewer)
                .deploy_immutable(&[clearing_house.into()])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Deploying AmmReader...");
            context
                .factory
                .create(ContractName::AmmReader)
                .deploy_immutable(&[])
                .await?;
            Ok(())
        }),
        Box::pin(async move {
            tracing::info!("Registering the ETH aggregator on L2PriceFeed...");
            add_price_feed_aggregator(context, PriceFeedKey::Eth).await
        }),
        Box::pin(async move {
            tracing::info!("Registering the BTC aggregator on L2PriceFeed...");
            add_price_feed_aggregator(context, PriceFeedKey::Btc).await
        }),
        Box::pin(async move {
            tracing::info!("Setting the ETHUSDC amm caps...");
            set_configured_amm_cap(context, AmmInstanceName::EthUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Setting the ETHUSDC amm counterparty...");
            set_amm_counterparty(context, AmmInstanceName::EthUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Adding the ETHUSDC amm to InsuranceFund...");
            add_amm_to_insurance_fund(context, AmmInstanceName::EthUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Setting the BTCUSDC amm caps...");
            set_configured_amm_cap(context, AmmInstanceName::BtcUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Setting the BTCUSDC amm counterparty...");
            set_amm_counterparty(context, AmmInstanceName::BtcUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Adding the BTCUSDC amm to InsuranceFund...");
            add_amm_to_insurance_fund(context, AmmInstanceName::BtcUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Opening the ETHUSDC amm...");
            open_amm(context, AmmInstanceName::EthUsdc).await
        }),
        Box::pin(async move {
            tracing::info!("Opening the BTCUSDC amm...");
            open_amm(context, AmmInstanceName::BtcUsdc).await
        }),
        transfer_ownership(context, ContractName::MetaTxGateway),
        transfer_ownership(context, ContractName::InsuranceFund),
        transfer_ownership(context, ContractName::L2PriceFeed),
        transfer_ownership(context, ContractName::ClearingHouse),
        transfer_amm_ownership(context, AmmInstanceName::EthUsdc),
        transfer_amm_ownership(context, AmmInstanceName::BtcUsdc),
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
                .create(ContractName::MetaTxGateway)
                .transfer_proxy_admin_ownership(governance)
                .await?;
            Ok(())
        }),
    ]
}

async fn deploy_amm<C: ChainClient>(
    context: &MigrationContext<C>,
    instance: AmmInstanceName,
) -> Result<()> {
    let price_feed = context
        .factory
        .create(ContractName::L2PriceFeed)
        .require_address()?;
    let quote_asset = require_external(context.external_contracts.usdc, "usdc")?;
    let config = context.deploy_config.amm_config(instance)?;
    context
        .factory
        .create_amm(instance, ContractName::Amm)
        .deploy_upgradable(&config.deploy_args, price_feed, quote_asset)
        .await?;
    Ok(())
}

async fn add_price_feed_aggregator<C: ChainClient>(
    context: &MigrationContext<C>,
    key: PriceFeedKey,
) -> Result<()> {
    let key_bytes = abi::format_bytes32_string(&key.to_string())?;
    context
        .factory
        .create(ContractName::L2PriceFeed)
        .instance()?
        .execute("addAggregator(bytes32)", &[key_bytes.into()])
        .await?;
    Ok(())
}

/// Applies the configured caps; a zero base-asset cap means leave the
/// market uncapped and skip the call entirely.
async fn set_configured_amm_cap<C: ChainClient>(
    context: &MigrationContext<C>,
    instance: AmmInstanceName,
) -> Result<()> {
    let properties = context.deploy_config.amm_config(instance)?.properties.clone();
    if properties.max_holding_base_asset > U256::ZERO {
        context
            .factory
            .create_amm(instance, ContractName::Amm)
            .instance()?
            .execute(
                "setCap((uint256),(uint256))",
                &[
                    properties.max_holding_base_asset.into(),
                    properties.open_interest_notional_cap.into(),
                ],
            )
            .await?;
    }
    Ok(())
}

async fn set_amm_counterparty<C: ChainClient>(
    context: &MigrationContext<C>,
    instance: AmmInstanceName,
) -> Result<()> {
    let clearing_house = context
        .factory
        .create(ContractName::ClearingHouse)
        .require_address()?;
    context
        .factory
        .create_amm(instance, ContractName::Amm)
        .instance()?
        .execute("setCounterParty(address)", &[clearing_house.into()])
        .await?;
    Ok(())
}

async fn add_amm_to_insurance_fund<C: ChainClient>(
    context: &MigrationContext<C>,
    instance: AmmInstanceName,
) -> Result<()> {
    let amm = context
        .factory
        .create_amm(instance, ContractName::Amm)
        .require_address()?;
    context
        .factory
        .create(ContractName::InsuranceFund)
        .instance()?
        .execute("addAmm(address)", &[amm.into()])
        .await?;
    Ok(())
}

async fn open_amm<C: ChainClient>(
    context: &MigrationContext<C>,
    instance: AmmInstanceName,
) -> Result<()> {
    context
        .factory
        .create_amm(instance, ContractName::Amm)
        .instance()?
        .execute("setOpen(bool)", &[true.into()])
        .await?;
    Ok(())
}

fn transfer_ownership<C: ChainClient>(
    context: &MigrationContext<C>,
    contract: ContractName,
) -> MigrationTask<'_> {
    Box::pin(async move {
        let governance = require_external(
            context.external_contracts.foundation_governance,
            "foundationGovernance",
        )?;
        tracing::info!(contract = %contract, governance = %governance, "Transferring ownership; remember to claim it");
        context
            .factory
            .create(contract)
            .instance()?
            .execute("setOwner(address)", &[governance.into()])
            .await?;
        Ok(())
    })
}

fn transfer_amm_ownership<C: ChainClient>(
    context: &MigrationContext<C>,
    instance: AmmInstanceName,
) -> MigrationTask<'_> {
    Box::pin(async move {
        let governance = require_external(
            context.external_contracts.foundation_governance,
            "foundationGovernance",
        )?;
        tracing::info!(amm = %instance, governance = %governance, "Transferring ownership; remember to claim it");
        context
            .factory
            .create_amm(instance, ContractName::Amm)
            .instance()?
            .execute("setOwner(address)", &[governance.into()])
            .await?;
        Ok(())
    })
}
