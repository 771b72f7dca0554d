//! Names the deployer knows contracts and AMM markets by.

use strum::{Display, EnumString};

use crate::config::PriceFeedKey;

/// Deployable contracts, named after their compiled artifacts.
///
/// For most contracts this name doubles as the metadata slot the deployed
/// address is recorded under; AMM instances record under their market name
/// instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ContractName {
    ChainlinkL1,
    MetaTxGateway,
    InsuranceFund,
    L2PriceFeed,
    ClearingHouse,
    ClearingHouseViewer,
    Amm,
    AmmReader,
    RootBridge,
    ChainlinkAggregatorMockETH,
    ChainlinkAggregatorMockBTC,
}

impl ContractName {
    /// The mock aggregator contract serving `key` prices.
    pub fn aggregator_mock(key: PriceFeedKey) -> ContractName {
        match key {
            PriceFeedKey::Eth => ContractName::ChainlinkAggregatorMockETH,
            PriceFeedKey::Btc => ContractName::ChainlinkAggregatorMockBTC,
        }
    }
}

/// AMM markets. All instances share the `Amm` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum AmmInstanceName {
    EthUsdc,
    BtcUsdc,
}
