//! The shared context a migration run hands to its tasks.

use std::sync::Arc;

use anyhow::Result;

use crate::chain::ChainClient;
use crate::config::DeployConfig;
use crate::contract::ContractWrapperFactory;
use crate::metadata::SystemMetadataDao;
use crate::settings::{ExternalContracts, Layer, SettingsDao, Stage};

/// Everything a migration task may touch, assembled once per run.
///
/// Tasks receive this by reference and perform all their I/O through the
/// factory's wrappers and the two stores; there is no other ambient state.
pub struct MigrationContext<C> {
    pub stage: Stage,
    pub layer: Layer,
    pub settings: Arc<SettingsDao>,
    pub metadata: Arc<SystemMetadataDao>,
    /// External contract addresses of this context's own layer.
    pub external_contracts: ExternalContracts,
    pub deploy_config: DeployConfig,
    pub factory: Arc<ContractWrapperFactory<C>>,
}

impl<C: ChainClient> MigrationContext<C> {
    pub fn new(
        layer: Layer,
        settings: Arc<SettingsDao>,
        metadata: Arc<SystemMetadataDao>,
        deploy_config: DeployConfig,
        factory: Arc<ContractWrapperFactory<C>>,
    ) -> Result<Self> {
        let external_contracts = settings.get_external_contracts(layer)?;
        Ok(Self {
            stage: settings.stage(),
            layer,
            settings,
            metadata,
            external_contracts,
            deploy_config,
            factory,
        })
    }
}
