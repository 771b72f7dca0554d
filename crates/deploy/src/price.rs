//! Price operations: mock pushes, inspection and relaying rounds across layers.

use std::time::{SystemTime, UNIX_EPOCH};

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result, bail};

use crate::chain::abi;
use crate::chain::{ChainClient, TxReceipt};
use crate::config::{PriceFeedKey, default_digits};
use crate::context::MigrationContext;
use crate::contract::{AmmInstanceName, ContractName};
use crate::settings::{Layer, Stage};

/// Averaging window for TWAP queries, in seconds.
const TWAP_INTERVAL_SECS: u64 = 300;

/// Pushes `price` into the mock aggregator for `key` and rolls it through to
/// the layer 2 price feed.
///
/// The price is whole quote units; the aggregator's decimals are applied
/// here. With `no_update` the answer is staged in the aggregator without
/// being propagated to the feed.
pub async fn set_mock_price<C: ChainClient>(
    context: &MigrationContext<C>,
    key: PriceFeedKey,
    price: u64,
    no_update: bool,
) -> Result<()> {
    if context.stage == Stage::Production {
        bail!("Mock prices cannot be pushed to the production stage");
    }
    let client = context.factory.client();
    let key_bytes = abi::format_bytes32_string(&key.to_string())?;

    let price_feed = context
        .factory
        .create(ContractName::L2PriceFeed)
        .instance()?;
    let prev_timestamp = match price_feed
        .view("getLatestTimestamp(bytes32)", &[key_bytes.into()])
        .await
    {
        Ok(data) => abi::decode_u64(&data)?,
        Err(error) => {
            tracing::info!(key = %key, error = %error, "The price feed has no prices for this key yet");
            0
        }
    };
    let now = unix_now()?;
    let timestamp = if prev_timestamp < now {
        now
    } else {
        prev_timestamp + 1
    };

    let chainlink = context
        .factory
        .create(ContractName::ChainlinkL1)
        .instance()?;
    let aggregator = abi::decode_address(
        &chainlink
            .view("getAggregator(bytes32)", &[key_bytes.into()])
            .await?,
    )?;
    if aggregator == Address::ZERO {
        bail!("No aggregator registered for {key}");
    }
    tracing::info!(key = %key, aggregator = %aggregator, "Aggregator found");

    let decimals = abi::decode_u64(&client.view(aggregator, "decimals()", &[]).await?)?;
    let (round_id, answered_in_round) =
        match client.view(aggregator, "latestRoundData()", &[]).await {
            Ok(data) => (
                abi::word_to_u256(abi::word_at(&data, 0)?),
                abi::word_to_u256(abi::word_at(&data, 4)?),
            ),
            Err(error) => {
                tracing::info!(error = %error, "The aggregator has no rounds yet");
                (U256::ZERO, U256::ZERO)
            }
        };

    let formatted_price = U256::from(price) * U256::from(10u64).pow(U256::from(decimals));
    client
        .execute(
            aggregator,
            "mockAddAnswer(uint80,int256,uint256,uint256,uint80)",
            &[
                (round_id + U256::from(1u64)).into(),
                formatted_price.into(),
                timestamp.into(),
                timestamp.into(),
                (answered_in_round + U256::from(1u64)).into(),
            ],
            1,
        )
        .await?;
    tracing::info!(key = %key, price = price, "Mock price set");

    if no_update {
        return Ok(());
    }
    chainlink
        .execute_with("updateLatestRoundData(bytes32)", &[key_bytes.into()], 1)
        .await?;
    tracing::info!("New price added to the price feed");

    // The feed stores prices 10^18-scaled regardless of aggregator decimals.
    let expected = formatted_price * default_digits() / U256::from(10u64).pow(U256::from(decimals));
    let actual = abi::decode_u256(
        &price_feed
            .view("getPrice(bytes32)", &[key_bytes.into()])
            .await?,
    )?;
    if actual != expected {
        tracing::warn!(expected = %expected, actual = %actual, "Saved price does not match the expected value");
    }
    Ok(())
}

/// Snapshot of every price the system reports for one feed key.
#[derive(Debug, Clone)]
pub struct PriceReport {
    pub key: PriceFeedKey,
    pub amm_instance: AmmInstanceName,
    pub amm_price: U256,
    pub amm_twap: U256,
    pub aggregator: Address,
    pub aggregator_decimals: u64,
    pub feed_price: U256,
    pub feed_twap: U256,
}

/// Reads the AMM's underlying prices, the aggregator registration and the
/// layer 2 feed prices for `key`.
pub async fn price_report<C: ChainClient>(
    context: &MigrationContext<C>,
    key: PriceFeedKey,
) -> Result<PriceReport> {
    let client = context.factory.client();
    let key_bytes = abi::format_bytes32_string(&key.to_string())?;
    let amm_instance = context.deploy_config.amm_for_key(key)?;

    let amm = context
        .factory
        .create_amm(amm_instance, ContractName::Amm)
        .instance()?;
    let amm_price = abi::decode_u256(&amm.view("getUnderlyingPrice()", &[]).await?)?;
    let amm_twap = abi::decode_u256(
        &amm.view("getUnderlyingTwapPrice(uint256)", &[TWAP_INTERVAL_SECS.into()])
            .await?,
    )?;

    let chainlink = context
        .factory
        .create(ContractName::ChainlinkL1)
        .instance()?;
    let aggregator = abi::decode_address(
        &chainlink
            .view("getAggregator(bytes32)", &[key_bytes.into()])
            .await?,
    )?;
    let aggregator_decimals = abi::decode_u64(&client.view(aggregator, "decimals()", &[]).await?)?;

    let price_feed = context
        .factory
        .create(ContractName::L2PriceFeed)
        .instance()?;
    let feed_price = abi::decode_u256(
        &price_feed
            .view("getPrice(bytes32)", &[key_bytes.into()])
            .await?,
    )?;
    let feed_twap = abi::decode_u256(
        &price_feed
            .view(
                "getTwapPrice(bytes32,uint256)",
                &[key_bytes.into(), TWAP_INTERVAL_SECS.into()],
            )
            .await?,
    )?;

    Ok(PriceReport {
        key,
        amm_instance,
        amm_price,
        amm_twap,
        aggregator,
        aggregator_decimals,
        feed_price,
        feed_twap,
    })
}

/// Relays the latest aggregator round for `key` through the root bridge to
/// the layer 2 price feed.
///
/// The feed address deliberately comes from the layer 2 metadata: the bridge
/// sits on layer 1 but targets the feed on the other side.
pub async fn relay_price<C: ChainClient>(
    context: &MigrationContext<C>,
    key: PriceFeedKey,
) -> Result<TxReceipt> {
    let client = context.factory.client();
    let key_bytes = abi::format_bytes32_string(&key.to_string())?;

    let chainlink = context
        .factory
        .create(ContractName::ChainlinkL1)
        .instance()?;
    let aggregator = abi::decode_address(
        &chainlink
            .view("getAggregator(bytes32)", &[key_bytes.into()])
            .await?,
    )?;
    if aggregator == Address::ZERO {
        bail!("No aggregator registered for {key}");
    }

    let data = client.view(aggregator, "latestRoundData()", &[]).await?;
    let round_id = abi::word_to_u256(abi::word_at(&data, 0)?);
    let price = abi::word_to_u256(abi::word_at(&data, 1)?);
    let timestamp = abi::word_to_u256(abi::word_at(&data, 3)?);
    tracing::info!(key = %key, round = %round_id, price = %price, timestamp = %timestamp, "Latest aggregator round");

    let root_bridge = context
        .factory
        .create(ContractName::RootBridge)
        .instance()?;
    let price_feed = context
        .metadata
        .get_contract_metadata(Layer::Layer2, &ContractName::L2PriceFeed.to_string())?
        .address;
    root_bridge
        .execute(
            "updatePriceFeed(address,bytes32,(uint256),uint256,uint80)",
            &[
                price_feed.into(),
                key_bytes.into(),
                price.into(),
                timestamp.into(),
                round_id.into(),
            ],
        )
        .await
}

fn unix_now() -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the unix epoch")?;
    Ok(now.as_secs())
}

/// Renders an 18-decimal fixed point value as a plain decimal string.
pub fn format_d18(value: U256) -> String {
    let base = default_digits();
    let whole = value / base;
    let frac = value % base;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>18}", frac.to_string());
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::to_full_digit;

    #[test]
    fn test_format_d18() {
        assert_eq!(format_d18(U256::ZERO), "0");
        assert_eq!(format_d18(to_full_digit(40)), "40");
        assert_eq!(format_d18(U256::from(1_500_000_000_000_000_000u64)), "1.5");
        assert_eq!(format_d18(U256::from(25u64)), "0.000000000000000025");
    }
}
