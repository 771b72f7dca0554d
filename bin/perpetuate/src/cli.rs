use std::collections::BTreeMap;
use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use perpetuate_deploy::config::{MigratorConfig, PriceFeedKey};
use perpetuate_deploy::{Layer, Stage};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "perpetuate")]
#[command(
    author,
    version,
    about = "Deploy the Perp contract system and operate it across stages"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "PERP_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write the tool configuration and scaffold the stage's settings.
    Init(InitArgs),
    /// Apply every migration the stage has not seen yet.
    Migrate(MigrateArgs),
    /// Show migration cursors and recorded contract addresses.
    Status(ConfigArgs),
    /// Push a price into a mock aggregator and roll it through to the feed.
    SetMockPrice(SetMockPriceArgs),
    /// Read the AMM, aggregator and price feed quotes for each market.
    Prices(PricesArgs),
    /// Relay the latest aggregator round through the root bridge.
    RelayPrice(RelayPriceArgs),
}

/// Arguments shared by every command that loads an existing configuration.
#[derive(Debug, Clone, Parser)]
pub struct ConfigArgs {
    /// Path to the tool configuration file.
    #[arg(long, alias = "conf", env = "PERP_CONFIG", default_value = "Perpetuate.toml")]
    pub config: PathBuf,
}

impl ConfigArgs {
    pub fn load(&self) -> anyhow::Result<MigratorConfig> {
        MigratorConfig::load_from_file(&self.config)
    }
}

#[derive(Debug, Clone, Parser)]
pub struct InitArgs {
    /// The stage to initialize.
    #[arg(long, env = "PERP_STAGE", default_value_t = Stage::Test)]
    pub stage: Stage,

    /// Directory for the stage's settings and metadata files.
    #[arg(long, env = "PERP_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Directory holding the compiled contract artifacts (`<name>.json`).
    #[arg(long, env = "PERP_ARTIFACTS_DIR", default_value = "artifacts")]
    pub artifacts_dir: PathBuf,

    /// JSON-RPC endpoint for layer 1.
    #[arg(long, alias = "l1-rpc", env = "PERP_LAYER1_ENDPOINT", default_value = "http://127.0.0.1:8545")]
    pub layer1_endpoint: String,

    /// JSON-RPC endpoint for layer 2.
    #[arg(long, alias = "l2-rpc", env = "PERP_LAYER2_ENDPOINT", default_value = "http://127.0.0.1:8545")]
    pub layer2_endpoint: String,

    /// Sender account for transactions.
    /// If not provided, the node's first unlocked account is used.
    #[arg(long, env = "PERP_OPERATOR")]
    pub operator: Option<Address>,
}

impl InitArgs {
    pub fn into_config(self) -> MigratorConfig {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(Layer::Layer1, self.layer1_endpoint);
        endpoints.insert(Layer::Layer2, self.layer2_endpoint);
        MigratorConfig {
            stage: self.stage,
            data_dir: self.data_dir,
            artifacts_dir: self.artifacts_dir,
            endpoints,
            operator: self.operator,
            redeploy: false,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct MigrateArgs {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// Redeploy contracts whose slots already hold an address.
    /// If not provided, a recorded address fails the deploy instead.
    #[arg(long, env = "PERP_REDEPLOY", default_value_t = false)]
    pub redeploy: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct SetMockPriceArgs {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// The price feed key (ETH or BTC).
    pub key: PriceFeedKey,

    /// The price in whole quote units; the aggregator's decimals are applied
    /// before the answer is stored.
    pub price: u64,

    /// Stage the answer in the aggregator without rolling the feed forward.
    #[arg(long, env = "PERP_NO_UPDATE", default_value_t = false)]
    pub no_update: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct PricesArgs {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// Restrict the report to one price feed key (ETH or BTC).
    #[arg(long)]
    pub key: Option<PriceFeedKey>,
}

#[derive(Debug, Clone, Parser)]
pub struct RelayPriceArgs {
    #[clap(flatten)]
    pub config: ConfigArgs,

    /// The price feed key to relay (ETH or BTC).
    #[arg(default_value_t = PriceFeedKey::Btc)]
    pub key: PriceFeedKey,
}
