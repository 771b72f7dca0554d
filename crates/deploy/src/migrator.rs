//! Top-level driver: initializes a stage and applies pending migrations.

use std::collections::{BTreeMap, btree_map::Entry};
use std::sync::Arc;

use anyhow::Result;

use crate::chain::RpcClient;
use crate::config::{DeployConfig, MigratorConfig};
use crate::context::MigrationContext;
use crate::contract::{AmmPriceSource, ContractWrapperFactory};
use crate::metadata::{ContractMetadata, SystemMetadataDao};
use crate::migrations;
use crate::settings::{
    ExternalContracts, Layer, LayerSettings, Network, SettingsDao, Stage, SystemSettings,
    settings_path,
};

/// Runs migrations and operational commands for one configured stage.
pub struct Migrator {
    config: MigratorConfig,
}

/// Recorded deployment state for one layer.
pub struct LayerStatus {
    pub layer: Layer,
    /// Migration cursor: indices below this value have been applied.
    pub version: u32,
    pub contracts: Vec<ContractMetadata>,
}

impl Migrator {
    pub fn new(config: MigratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Prepares the working directory: writes the tool configuration and, for
    /// the persistent stages, a settings scaffold to fill in.
    ///
    /// The test stage keeps no settings on disk; it provisions a fresh chain
    /// description and funded accounts on every run.
    pub fn init(&self) -> Result<()> {
        let config_path = self.config.save_config()?;
        tracing::info!(path = %config_path.display(), "Configuration written");

        match self.config.stage {
            Stage::Test => {
                tracing::info!("Test stage settings are provisioned fresh on every run");
            }
            stage => {
                let path = settings_path(&self.config.data_dir, stage);
                if path.exists() {
                    tracing::info!(path = %path.display(), "Settings file already exists");
                    return Ok(());
                }
                let skeleton = SystemSettings {
                    layers: BTreeMap::from([
                        (Layer::Layer1, local_layer_settings()),
                        (Layer::Layer2, local_layer_settings()),
                    ]),
                };
                SettingsDao::from_settings(stage, &self.config.data_dir, skeleton).save()?;
                tracing::info!(
                    path = %path.display(),
                    "Settings scaffold written; fill in chain ids and external contracts before migrating"
                );
            }
        }
        Ok(())
    }

    /// Applies every pending migration in index order. Each layer tracks its
    /// own cursor, so a batch can interleave layers and still resume cleanly
    /// after a failure. Returns the number of migrations applied.
    pub async fn migrate(&self) -> Result<u32> {
        let settings = Arc::new(SettingsDao::open(self.config.stage, &self.config.data_dir)?);
        let metadata = Arc::new(SystemMetadataDao::open(Arc::clone(&settings))?);

        let mut contexts = BTreeMap::new();
        let mut applied = 0;
        for migration in migrations::all::<RpcClient>() {
            if settings.get_version(migration.layer)? > migration.index {
                tracing::info!(
                    migration = %migration.name,
                    index = migration.index,
                    "Already applied, skipping"
                );
                continue;
            }
            // Clients are dialed lazily so a fully applied layer is never
            // contacted.
            let context = match contexts.entry(migration.layer) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(
                    self.build_context(migration.layer, &settings, &metadata)
                        .await?,
                ),
            };
            migration.run(context).await?;
            settings.complete_migration(migration.layer, migration.index)?;
            applied += 1;
        }

        if applied == 0 {
            tracing::info!("Nothing to do, every migration is already applied");
        }
        Ok(applied)
    }

    /// Builds a context outside a migration run, for commands that talk to
    /// contracts deployed earlier.
    pub async fn operation_context(&self, layer: Layer) -> Result<MigrationContext<RpcClient>> {
        let settings = Arc::new(SettingsDao::open(self.config.stage, &self.config.data_dir)?);
        let metadata = Arc::new(SystemMetadataDao::open(Arc::clone(&settings))?);
        self.build_context(layer, &settings, &metadata).await
    }

    /// Snapshot of the migration cursors and recorded addresses, without
    /// touching any chain.
    pub fn status(&self) -> Result<Vec<LayerStatus>> {
        let settings = Arc::new(SettingsDao::open(self.config.stage, &self.config.data_dir)?);
        let metadata = SystemMetadataDao::open(Arc::clone(&settings))?;
        let mut layers = Vec::new();
        for layer in [Layer::Layer1, Layer::Layer2] {
            layers.push(LayerStatus {
                layer,
                version: settings.get_version(layer)?,
                contracts: metadata.get_layer_contracts(layer),
            });
        }
        Ok(layers)
    }

    async fn build_context(
        &self,
        layer: Layer,
        settings: &Arc<SettingsDao>,
        metadata: &Arc<SystemMetadataDao>,
    ) -> Result<MigrationContext<RpcClient>> {
        let client = Arc::new(
            RpcClient::connect(
                self.config.endpoint(layer)?,
                &self.config.artifacts_dir,
                self.config.operator,
            )
            .await?,
        );
        let deploy_config = DeployConfig::new(self.config.stage);
        let factory = Arc::new(ContractWrapperFactory::new(
            client,
            Arc::clone(metadata),
            layer,
            deploy_config.confirmations,
            self.config.redeploy,
            AmmPriceSource::default(),
        ));
        MigrationContext::new(
            layer,
            Arc::clone(settings),
            Arc::clone(metadata),
            deploy_config,
            factory,
        )
    }
}

fn local_layer_settings() -> LayerSettings {
    LayerSettings {
        chain_id: 31337,
        network: Network::Localhost,
        external_contracts: ExternalContracts::default(),
        version: 0,
    }
}
