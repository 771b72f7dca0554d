//! 0007: temporary holding caps for the first markets.

use alloy_core::primitives::U256;
use anyhow::Result;

use crate::chain::ChainClient;
use crate::config::default_digits;
use crate::context::MigrationContext;
use crate::contract::{AmmInstanceName, ContractName};
use crate::migration::MigrationTask;

pub(super) fn tasks<C: ChainClient>(context: &MigrationContext<C>) -> Vec<MigrationTask<'_>> {
    vec![
        Box::pin(async move {
            tracing::info!("Setting the ETHUSDC amm cap...");
            // 40 ETH, roughly $112K at the time this was set.
            set_amm_cap(context, AmmInstanceName::EthUsdc, U256::from(40u64)).await
        }),
        Box::pin(async move {
            tracing::info!("Setting the BTCUSDC amm cap...");
            // 3 BTC, roughly $120K at the time this was set.
            set_amm_cap(context, AmmInstanceName::BtcUsdc, U256::from(3u64)).await
        }),
    ]
}

async fn set_amm_cap<C: ChainClient>(
    context: &MigrationContext<C>,
    instance: AmmInstanceName,
    base_units: U256,
) -> Result<()> {
    let max_holding_base_asset = base_units * default_digits();
    // The notional cap stays disabled.
    let open_interest_notional_cap = U256::ZERO;

    if max_holding_base_asset > U256::ZERO {
        context
            .factory
            .create_amm(instance, ContractName::Amm)
            .instance()?
            .execute(
                "setCap((uint256),(uint256))",
                &[
                    max_holding_base_asset.into(),
                    open_interest_notional_cap.into(),
                ],
            )
            .await?;
    }
    Ok(())
}
