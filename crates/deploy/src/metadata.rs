//! Persisted record of deployed contract addresses per stage and layer.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::settings::{
    ExternalContracts, Layer, Network, SettingsDao, Stage, TEST_ACCOUNT_BALANCE,
    TEST_ACCOUNT_COUNT, derive_test_signers,
};

/// Name and proxy address of one deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMetadata {
    pub name: String,
    pub address: Address,
}

/// Funded account available on a layer. Only populated for the test stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    pub private_key: String,
    pub balance: String,
}

/// Everything recorded about one layer: deployed contracts, funded accounts,
/// the network they live on and a snapshot of the external addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerMetadata {
    pub contracts: BTreeMap<String, ContractMetadata>,
    pub accounts: Vec<AccountMetadata>,
    pub network: Network,
    pub external_contracts: ExternalContracts,

    /// Unrecognized fields survive a rewrite untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Top level of the per-stage metadata file.
///
/// Layers are keyed by name rather than by [`Layer`] so that entries written
/// by newer tooling are carried through a rewrite instead of dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetadata {
    #[serde(default)]
    pub layers: BTreeMap<String, LayerMetadata>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Read/write access to the per-stage metadata file.
///
/// The file is loaded once at construction and flushed synchronously after
/// every mutation. That flush is the durability boundary for a migration
/// task: once a task completes, its address records are on disk.
pub struct SystemMetadataDao {
    settings: Arc<SettingsDao>,
    metadata: Mutex<SystemMetadata>,
}

impl SystemMetadataDao {
    /// Loads the metadata file for the dao's stage, or starts an empty record
    /// when none exists yet.
    pub fn open(settings: Arc<SettingsDao>) -> Result<Self> {
        let path = metadata_path(settings.root(), settings.stage());
        let metadata = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read metadata file at {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse metadata file at {}", path.display()))?
        } else {
            SystemMetadata::default()
        };
        Ok(Self {
            settings,
            metadata: Mutex::new(metadata),
        })
    }

    /// Looks up the recorded deployment of `contract_name` on `layer`.
    ///
    /// A missing layer or contract entry is a configuration error; callers
    /// rely on the address being present once a migration recorded it.
    pub fn get_contract_metadata(
        &self,
        layer: Layer,
        contract_name: &str,
    ) -> Result<ContractMetadata> {
        let key: &'static str = layer.into();
        let metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        let layer_metadata = metadata
            .layers
            .get(key)
            .with_context(|| format!("No metadata recorded for {layer} yet"))?;
        layer_metadata
            .contracts
            .get(contract_name)
            .cloned()
            .with_context(|| format!("Contract {contract_name} not found in {layer} metadata"))
    }

    /// True when a deployment is already recorded for `contract_name` on `layer`.
    pub fn has_contract(&self, layer: Layer, contract_name: &str) -> bool {
        let key: &'static str = layer.into();
        let metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        metadata
            .layers
            .get(key)
            .is_some_and(|layer_metadata| layer_metadata.contracts.contains_key(contract_name))
    }

    /// Upserts the deployment record for `contract_name` on `layer` and
    /// flushes the file.
    pub fn set_contract_metadata(
        &self,
        layer: Layer,
        contract_name: &str,
        address: Address,
    ) -> Result<()> {
        {
            let mut metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
            let layer_metadata = self.ensure_layer(&mut metadata, layer)?;
            layer_metadata.contracts.insert(
                contract_name.to_string(),
                ContractMetadata {
                    name: contract_name.to_string(),
                    address,
                },
            );
        }
        self.save()
    }

    /// Accounts recorded for `layer`. Empty outside the test stage.
    pub fn get_accounts(&self, layer: Layer) -> Vec<AccountMetadata> {
        let key: &'static str = layer.into();
        let metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        metadata
            .layers
            .get(key)
            .map(|layer_metadata| layer_metadata.accounts.clone())
            .unwrap_or_default()
    }

    /// Snapshot of every contract recorded for `layer`, sorted by name.
    pub fn get_layer_contracts(&self, layer: Layer) -> Vec<ContractMetadata> {
        let key: &'static str = layer.into();
        let metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        metadata
            .layers
            .get(key)
            .map(|layer_metadata| layer_metadata.contracts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Writes the metadata file under the data root.
    pub fn save(&self) -> Result<()> {
        let path = metadata_path(self.settings.root(), self.settings.stage());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metadata directory at {}", parent.display())
            })?;
        }
        let json = {
            let metadata = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*metadata).context("Failed to serialize metadata")?
        };
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write metadata file at {}", path.display()))
    }

    fn ensure_layer<'a>(
        &self,
        metadata: &'a mut SystemMetadata,
        layer: Layer,
    ) -> Result<&'a mut LayerMetadata> {
        let key: &'static str = layer.into();
        match metadata.layers.entry(key.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let accounts = if self.settings.stage() == Stage::Test {
                    test_accounts()?
                } else {
                    Vec::new()
                };
                Ok(entry.insert(LayerMetadata {
                    contracts: BTreeMap::new(),
                    accounts,
                    network: self.settings.get_network(layer)?,
                    external_contracts: self.settings.get_external_contracts(layer)?,
                    extra: BTreeMap::new(),
                }))
            }
        }
    }
}

/// Location of the metadata file for `stage` under `root`.
pub fn metadata_path(root: &Path, stage: Stage) -> PathBuf {
    root.join("metadata").join(format!("{stage}.json"))
}

/// Deterministic funded accounts recorded for test-stage layers.
fn test_accounts() -> Result<Vec<AccountMetadata>> {
    Ok(derive_test_signers(TEST_ACCOUNT_COUNT)?
        .into_iter()
        .map(|(_, private_key)| AccountMetadata {
            private_key,
            balance: TEST_ACCOUNT_BALANCE.to_string(),
        })
        .collect())
}
