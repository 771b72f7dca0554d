//! AMM deployment: price-aware argument assembly on top of the base wrapper.

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use derive_more::Deref;

use crate::chain::ChainClient;
use crate::chain::abi::{self, EthValue};
use crate::config::{AmmDeployArgs, PriceFeedKey, default_digits};
use crate::contract::names::AmmInstanceName;
use crate::contract::wrapper::ContractWrapper;

/// Where an AMM deploy gets the base-asset price it seeds reserves with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmmPriceSource {
    /// Fixed development prices.
    #[default]
    Fixed,
    /// Ask the price feed the AMM is being wired to.
    PriceFeed,
}

/// Wrapper for one AMM market.
///
/// Deploying an AMM differs from the base wrapper in one way: the quote
/// asset reserve is not configured, it is derived by valuing the configured
/// base reserve at the current oracle price. Everything else defers to the
/// wrapped [`ContractWrapper`].
#[derive(Deref)]
pub struct AmmContractWrapper<C> {
    #[deref]
    inner: ContractWrapper<C>,
    instance: AmmInstanceName,
    price_source: AmmPriceSource,
}

impl<C: ChainClient> AmmContractWrapper<C> {
    pub(crate) fn new(
        inner: ContractWrapper<C>,
        instance: AmmInstanceName,
        price_source: AmmPriceSource,
    ) -> Self {
        Self {
            inner,
            instance,
            price_source,
        }
    }

    pub fn instance_name(&self) -> AmmInstanceName {
        self.instance
    }

    /// Deploys this market's AMM behind a proxy.
    ///
    /// The full initializer argument list is assembled here: the computed
    /// quote reserve first, then the configured arguments, with the price
    /// feed and quote asset addresses slotted in.
    pub async fn deploy_upgradable(
        &self,
        deploy_args: &AmmDeployArgs,
        price_feed: Address,
        quote_asset: Address,
    ) -> Result<Address> {
        let key = deploy_args.price_feed_key;
        let key_bytes = abi::format_bytes32_string(&key.to_string())?;
        let price = self.fetch_price(price_feed, key).await?;
        let quote_asset_reserve = quote_reserve(deploy_args.base_asset_reserve, price);
        tracing::info!(
            amm = %self.instance,
            price = %price,
            quote_asset_reserve = %quote_asset_reserve,
            "Computed AMM reserves"
        );
        let args: Vec<EthValue> = vec![
            quote_asset_reserve.into(),
            deploy_args.base_asset_reserve.into(),
            deploy_args.trade_limit_ratio.into(),
            deploy_args.funding_period.into(),
            price_feed.into(),
            key_bytes.into(),
            quote_asset.into(),
            deploy_args.fluctuation.into(),
            deploy_args.toll_ratio.into(),
            deploy_args.spread_ratio.into(),
        ];
        self.inner.deploy_upgradable(&args).await
    }

    async fn fetch_price(&self, price_feed: Address, key: PriceFeedKey) -> Result<U256> {
        match self.price_source {
            AmmPriceSource::Fixed => Ok(fixed_price(key)),
            AmmPriceSource::PriceFeed => {
                let key_bytes = abi::format_bytes32_string(&key.to_string())?;
                let data = self
                    .inner
                    .client()
                    .view(price_feed, "getPrice(bytes32)", &[key_bytes.into()])
                    .await
                    .context("Wrong price feed address or key")?;
                abi::decode_u256(&data)
            }
        }
    }
}

/// Development price table, 10^18-scaled USD rates per base unit.
fn fixed_price(key: PriceFeedKey) -> U256 {
    let rate = match key {
        PriceFeedKey::Eth => 4_000u64,
        PriceFeedKey::Btc => 48_000u64,
    };
    U256::from(rate) * default_digits()
}

/// Quote reserve implied by valuing the base reserve at `price`.
pub(crate) fn quote_reserve(base_asset_reserve: U256, price: U256) -> U256 {
    base_asset_reserve * price / default_digits()
}
