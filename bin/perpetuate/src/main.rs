//! perpetuate is a CLI tool to roll out the Perp contract system and operate
//! it once deployed.

mod cli;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::CompleteEnv;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use perpetuate_deploy::config::PriceFeedKey;
use perpetuate_deploy::price::{self, format_d18};
use perpetuate_deploy::{Layer, Migrator};

use cli::{Cli, Command, PricesArgs};

#[tokio::main]
async fn main() -> Result<()> {
    CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Init(args) => {
            let migrator = Migrator::new(args.into_config());
            migrator.init()
        }
        Command::Migrate(args) => {
            let mut config = args.config.load()?;
            config.redeploy |= args.redeploy;
            let applied = Migrator::new(config).migrate().await?;
            tracing::info!(applied, "Migration run finished");
            Ok(())
        }
        Command::Status(args) => {
            let migrator = Migrator::new(args.load()?);
            print_status(&migrator)
        }
        Command::SetMockPrice(args) => {
            let migrator = Migrator::new(args.config.load()?);
            let context = migrator.operation_context(Layer::Layer1).await?;
            price::set_mock_price(&context, args.key, args.price, args.no_update).await
        }
        Command::Prices(args) => {
            let migrator = Migrator::new(args.config.load()?);
            print_prices(&migrator, &args).await
        }
        Command::RelayPrice(args) => {
            let migrator = Migrator::new(args.config.load()?);
            let context = migrator.operation_context(Layer::Layer1).await?;
            let receipt = price::relay_price(&context, args.key).await?;
            tracing::info!(tx_hash = %receipt.transaction_hash, "Price relayed");
            Ok(())
        }
    }
}

/// Renders the migration cursors and recorded addresses of both layers.
fn print_status(migrator: &Migrator) -> Result<()> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["Layer", "Version", "Contract", "Address"]);

    for status in migrator.status()? {
        let layer = status.layer.to_string();
        let version = status.version.to_string();
        if status.contracts.is_empty() {
            table.add_row([layer, version, "-".to_string(), "-".to_string()]);
            continue;
        }
        for contract in status.contracts {
            table.add_row([
                layer.clone(),
                version.clone(),
                contract.name,
                contract.address.to_string(),
            ]);
        }
    }

    println!("{table}");
    Ok(())
}

/// Renders the on-chain price readings for the requested keys.
async fn print_prices(migrator: &Migrator, args: &PricesArgs) -> Result<()> {
    let keys = match args.key {
        Some(key) => vec![key],
        None => vec![PriceFeedKey::Eth, PriceFeedKey::Btc],
    };

    let context = migrator.operation_context(Layer::Layer1).await?;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header([
            "Key",
            "Amm",
            "Amm price",
            "Amm TWAP",
            "Aggregator",
            "Decimals",
            "Feed price",
            "Feed TWAP",
        ]);

    for key in keys {
        let report = price::price_report(&context, key).await?;
        table.add_row([
            report.key.to_string(),
            report.amm_instance.to_string(),
            format_d18(report.amm_price),
            format_d18(report.amm_twap),
            report.aggregator.to_string(),
            report.aggregator_decimals.to_string(),
            format_d18(report.feed_price),
            format_d18(report.feed_twap),
        ]);
    }

    println!("{table}");
    Ok(())
}
