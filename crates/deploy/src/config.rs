//! Stage-keyed deployment parameters and the tool configuration file.

use std::{collections::BTreeMap, path::PathBuf};

use alloy_core::primitives::{Address, U256, address};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    contract::AmmInstanceName,
    settings::{Layer, Stage},
};

/// The default name for the perpetuate configuration file.
pub const PERPCONF_FILENAME: &str = "Perpetuate.toml";

/// Scale of the protocol's fixed point values (10^18).
pub fn default_digits() -> U256 {
    U256::from(10u64).pow(U256::from(18u64))
}

/// `units` scaled by [`default_digits`].
pub fn to_full_digit(units: u64) -> U256 {
    U256::from(units) * default_digits()
}

/// Symbol of an oracle price feed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum PriceFeedKey {
    Eth,
    Btc,
}

/// Constructor arguments for one AMM instance, quote reserve excluded.
///
/// The quote asset reserve is computed at deploy time from the base reserve
/// and the oracle price, so it never appears here.
#[derive(Debug, Clone)]
pub struct AmmDeployArgs {
    pub base_asset_reserve: U256,
    pub trade_limit_ratio: U256,
    pub funding_period: U256,
    pub fluctuation: U256,
    pub price_feed_key: PriceFeedKey,
    pub toll_ratio: U256,
    pub spread_ratio: U256,
}

/// Post-deploy capacity caps for one AMM instance.
#[derive(Debug, Clone)]
pub struct AmmProperties {
    pub max_holding_base_asset: U256,
    pub open_interest_notional_cap: U256,
}

/// Deploy arguments plus capacity caps for one AMM instance.
#[derive(Debug, Clone)]
pub struct AmmConfig {
    pub deploy_args: AmmDeployArgs,
    pub properties: AmmProperties,
}

/// Static per-stage deployment parameters.
///
/// Values are fixed at construction; nothing here changes during a run.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub init_margin_requirement: U256,
    pub maintenance_margin_requirement: U256,
    pub liquidation_fee_ratio: U256,
    /// Block confirmations awaited after every state-changing call.
    pub confirmations: u64,
    pub legacy_amm_config_map: BTreeMap<AmmInstanceName, AmmConfig>,
    pub chainlink_map: BTreeMap<PriceFeedKey, Address>,
}

impl DeployConfig {
    pub fn new(stage: Stage) -> Self {
        let confirmations = match stage {
            Stage::Production => 5,
            Stage::Staging | Stage::Test => 1,
        };
        Self {
            init_margin_requirement: default_digits() / U256::from(10u64),
            maintenance_margin_requirement: default_digits() * U256::from(625u64)
                / U256::from(10000u64),
            liquidation_fee_ratio: default_digits() * U256::from(125u64) / U256::from(10000u64),
            confirmations,
            legacy_amm_config_map: legacy_amm_configs(),
            chainlink_map: chainlink_map(stage),
        }
    }

    /// Deploy arguments and caps for `amm`.
    pub fn amm_config(&self, amm: AmmInstanceName) -> Result<&AmmConfig> {
        self.legacy_amm_config_map
            .get(&amm)
            .with_context(|| format!("No AMM configuration for {amm}"))
    }

    /// The AMM instance trading against `key`'s price feed.
    pub fn amm_for_key(&self, key: PriceFeedKey) -> Result<AmmInstanceName> {
        self.legacy_amm_config_map
            .iter()
            .find(|(_, config)| config.deploy_args.price_feed_key == key)
            .map(|(instance, _)| *instance)
            .with_context(|| format!("No AMM configured for price feed key {key}"))
    }

    /// Oracle aggregator registered for `key`, failing when the stage has none.
    pub fn chainlink_aggregator(&self, key: PriceFeedKey) -> Result<Address> {
        self.chainlink_map
            .get(&key)
            .copied()
            .with_context(|| format!("No chainlink aggregator configured for {key}"))
    }
}

fn legacy_amm_configs() -> BTreeMap<AmmInstanceName, AmmConfig> {
    let mut map = BTreeMap::new();
    map.insert(
        AmmInstanceName::EthUsdc,
        AmmConfig {
            deploy_args: AmmDeployArgs {
                base_asset_reserve: to_full_digit(100),
                trade_limit_ratio: default_digits() * U256::from(90u64) / U256::from(100u64),
                funding_period: U256::from(3600u64),
                fluctuation: default_digits() * U256::from(12u64) / U256::from(1000u64),
                price_feed_key: PriceFeedKey::Eth,
                toll_ratio: U256::ZERO,
                spread_ratio: default_digits() * U256::from(10u64) / U256::from(10000u64),
            },
            properties: AmmProperties {
                max_holding_base_asset: U256::ZERO,
                open_interest_notional_cap: U256::ZERO,
            },
        },
    );
    map.insert(
        AmmInstanceName::BtcUsdc,
        AmmConfig {
            deploy_args: AmmDeployArgs {
                base_asset_reserve: to_full_digit(20),
                trade_limit_ratio: default_digits() * U256::from(90u64) / U256::from(100u64),
                funding_period: U256::from(3600u64),
                fluctuation: default_digits() * U256::from(12u64) / U256::from(1000u64),
                price_feed_key: PriceFeedKey::Btc,
                toll_ratio: U256::ZERO,
                spread_ratio: default_digits() * U256::from(10u64) / U256::from(10000u64),
            },
            properties: AmmProperties {
                max_holding_base_asset: U256::ZERO,
                open_interest_notional_cap: U256::ZERO,
            },
        },
    );
    map
}

fn chainlink_map(stage: Stage) -> BTreeMap<PriceFeedKey, Address> {
    let mut map = BTreeMap::new();
    match stage {
        Stage::Production => {
            map.insert(
                PriceFeedKey::Eth,
                address!("5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"),
            );
            map.insert(
                PriceFeedKey::Btc,
                address!("F4030086522a5bEEa4988F8cA5B36dbC97BeE88c"),
            );
        }
        Stage::Staging => {
            map.insert(
                PriceFeedKey::Eth,
                address!("9326BFA02ADD2366b30bacB125260Af641031331"),
            );
            map.insert(
                PriceFeedKey::Btc,
                address!("6135b13325bfC4B00278B4abC5e20bbce2D6580e"),
            );
        }
        // The test stage runs against mock aggregators deployed on demand.
        Stage::Test => {}
    }
    map
}

/// Tool configuration persisted as `Perpetuate.toml`.
///
/// This file pins where stage data lives and how each layer is reached. The
/// protocol parameters themselves come from [`DeployConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// The stage this configuration drives.
    pub stage: Stage,
    /// Directory holding the stage's settings and metadata files.
    pub data_dir: PathBuf,
    /// Directory holding compiled contract artifacts (`<name>.json`).
    pub artifacts_dir: PathBuf,
    /// JSON-RPC endpoint for each layer.
    pub endpoints: BTreeMap<Layer, String>,
    /// Sender account for transactions. Defaults to the node's first
    /// unlocked account when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<Address>,
    /// Allow deploys to overwrite slots that already hold an address.
    #[serde(default)]
    pub redeploy: bool,
}

impl MigratorConfig {
    /// Configuration preset pointing both layers at a local node.
    pub fn local(stage: Stage) -> Self {
        let mut endpoints = BTreeMap::new();
        for layer in [Layer::Layer1, Layer::Layer2] {
            endpoints.insert(layer, "http://127.0.0.1:8545".to_string());
        }
        Self {
            stage,
            data_dir: PathBuf::from("."),
            artifacts_dir: PathBuf::from("artifacts"),
            endpoints,
            operator: None,
            redeploy: false,
        }
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize migrator config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = if path.is_dir() {
            path.join(PERPCONF_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(config_path)
            .context(format!("Failed to read config from {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration to the default location in the data directory.
    pub fn save_config(&self) -> Result<PathBuf> {
        let config_path = self.data_dir.join(PERPCONF_FILENAME);
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    /// RPC endpoint for `layer`, failing when the config has none.
    pub fn endpoint(&self, layer: Layer) -> Result<&str> {
        self.endpoints
            .get(&layer)
            .map(String::as_str)
            .with_context(|| format!("No RPC endpoint configured for {layer}"))
    }
}
