//! Stage-scoped deployment settings for both protocol layers.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use alloy_core::primitives::Address;
use alloy_signer_local::{MnemonicBuilder, coins_bip39::English};
use anyhow::{Context, Result, bail};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mnemonic used to derive the deterministic test-stage accounts.
pub const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Number of accounts derived for the test stage.
pub const TEST_ACCOUNT_COUNT: u32 = 10;

/// Balance preloaded into each test account, in wei.
pub const TEST_ACCOUNT_BALANCE: &str = "10000000000000000000000";

/// Deployment stage. Each stage owns one settings file and one metadata file.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Production,
    Staging,
    Test,
}

/// One of the two chains the protocol spans.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Layer {
    Layer1,
    Layer2,
}

/// Named network a layer runs on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    Homestead,
    Rinkeby,
    Ropsten,
    Kovan,
    Xdai,
    Sokol,
    #[default]
    Localhost,
}

/// Addresses of third-party contracts and accounts a stage depends on.
///
/// Every field is optional; migrations that need one fail fast when the stage
/// settings omit it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalContracts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation_multisig: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation_treasury: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation_governance: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keeper: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbitrageur: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amb_bridge_on_x_dai: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amb_bridge_on_eth: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_token_mediator_on_x_dai: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_token_mediator_on_eth: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tether: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usdc: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perp: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancer_crp_factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancer_pool_factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancer_perp_usdc_crp: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testnet_faucet: Option<Address>,

    /// Keys this tool does not recognize survive a rewrite untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Unwraps an optional external address, naming the missing entry on failure.
pub fn require_external(address: Option<Address>, name: &str) -> Result<Address> {
    address.with_context(|| format!("External contract {name} is not configured for this stage"))
}

/// Per-layer slice of a stage settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSettings {
    pub chain_id: u64,
    pub network: Network,
    #[serde(default)]
    pub external_contracts: ExternalContracts,
    /// Migration cursor: indices below this value have been applied.
    #[serde(default)]
    pub version: u32,
}

/// Full contents of one stage settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default)]
    pub layers: BTreeMap<Layer, LayerSettings>,
}

/// Stage settings plus the per-layer migration cursor.
///
/// Production and staging load `settings/<stage>.json` under the data root.
/// The test stage fabricates an ephemeral settings set rooted in a fresh
/// temporary directory, with both layers on one random local chain and
/// external contract slots pointed at deterministic mnemonic accounts.
pub struct SettingsDao {
    stage: Stage,
    root: PathBuf,
    settings: Mutex<SystemSettings>,
}

impl SettingsDao {
    /// Opens the settings for `stage` under `root`.
    pub fn open(stage: Stage, root: impl AsRef<Path>) -> Result<Self> {
        match stage {
            Stage::Production | Stage::Staging => {
                let root = root.as_ref().to_path_buf();
                let path = settings_path(&root, stage);
                let raw = std::fs::read_to_string(&path).with_context(|| {
                    format!("Failed to read settings file at {}", path.display())
                })?;
                let settings: SystemSettings = serde_json::from_str(&raw).with_context(|| {
                    format!("Failed to parse settings file at {}", path.display())
                })?;
                for layer in [Layer::Layer1, Layer::Layer2] {
                    if !settings.layers.contains_key(&layer) {
                        bail!("Settings file {} has no entry for {layer}", path.display());
                    }
                }
                Ok(Self {
                    stage,
                    root,
                    settings: Mutex::new(settings),
                })
            }
            Stage::Test => Self::ephemeral(),
        }
    }

    /// Wraps an in-memory settings value rooted at `root` without touching disk.
    pub fn from_settings(stage: Stage, root: impl Into<PathBuf>, settings: SystemSettings) -> Self {
        Self {
            stage,
            root: root.into(),
            settings: Mutex::new(settings),
        }
    }

    fn ephemeral() -> Result<Self> {
        let root = tempdir::TempDir::new("perp-test-")
            .context("Failed to create temporary settings directory")?
            .into_path();
        let chain_id = rand::rng().random_range(10000..=99999);
        let signers = derive_test_signers(TEST_ACCOUNT_COUNT)?;
        let external_contracts = test_external_contracts(&signers);
        let mut layers = BTreeMap::new();
        for layer in [Layer::Layer1, Layer::Layer2] {
            layers.insert(
                layer,
                LayerSettings {
                    chain_id,
                    network: Network::Localhost,
                    external_contracts: external_contracts.clone(),
                    version: 0,
                },
            );
        }
        Ok(Self {
            stage: Stage::Test,
            root,
            settings: Mutex::new(SystemSettings { layers }),
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Directory holding this stage's settings and metadata files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn with_layer<T>(&self, layer: Layer, read: impl FnOnce(&LayerSettings) -> T) -> Result<T> {
        let settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        let layer_settings = settings
            .layers
            .get(&layer)
            .with_context(|| format!("Stage {} has no settings for {layer}", self.stage))?;
        Ok(read(layer_settings))
    }

    pub fn get_chain_id(&self, layer: Layer) -> Result<u64> {
        self.with_layer(layer, |settings| settings.chain_id)
    }

    pub fn get_network(&self, layer: Layer) -> Result<Network> {
        self.with_layer(layer, |settings| settings.network)
    }

    pub fn get_external_contracts(&self, layer: Layer) -> Result<ExternalContracts> {
        self.with_layer(layer, |settings| settings.external_contracts.clone())
    }

    /// True when both layers resolve to the same chain. Cross-chain steps such
    /// as the proxy admin handover are skipped in that case.
    pub fn in_same_layer(&self) -> Result<bool> {
        Ok(self.get_chain_id(Layer::Layer1)? == self.get_chain_id(Layer::Layer2)?)
    }

    /// Cursor for `layer`: migrations with an index below this value have
    /// already been applied.
    pub fn get_version(&self, layer: Layer) -> Result<u32> {
        self.with_layer(layer, |settings| settings.version)
    }

    /// Moves the cursor for `layer` past the migration at `index` and flushes
    /// to disk. Setting the cursor instead of incrementing it keeps the
    /// bookkeeping honest across gaps in the migration numbering.
    pub fn complete_migration(&self, layer: Layer, index: u32) -> Result<()> {
        {
            let mut settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
            let layer_settings = settings
                .layers
                .get_mut(&layer)
                .with_context(|| format!("Stage {} has no settings for {layer}", self.stage))?;
            layer_settings.version = index + 1;
        }
        self.save()
    }

    /// Writes the settings file back under the data root.
    pub fn save(&self) -> Result<()> {
        let path = settings_path(&self.root, self.stage);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory at {}", parent.display())
            })?;
        }
        let json = {
            let settings = self.settings.lock().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*settings).context("Failed to serialize settings")?
        };
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write settings file at {}", path.display()))
    }
}

/// Location of the settings file for `stage` under `root`.
pub fn settings_path(root: &Path, stage: Stage) -> PathBuf {
    root.join("settings").join(format!("{stage}.json"))
}

/// Derives `count` deterministic signers from [`TEST_MNEMONIC`].
///
/// Returns each signer's address together with its hex-encoded private key.
pub fn derive_test_signers(count: u32) -> Result<Vec<(Address, String)>> {
    let mut signers = Vec::with_capacity(count as usize);
    for index in 0..count {
        let signer = MnemonicBuilder::<English>::default()
            .phrase(TEST_MNEMONIC)
            .index(index)
            .context("Failed to set the mnemonic derivation index")?
            .build()
            .context("Failed to derive an account from the test mnemonic")?;
        let address = Address::from_slice(signer.address().as_slice());
        signers.push((address, hex::encode(signer.to_bytes())));
    }
    Ok(signers)
}

/// External contract slots the migrations require, pointed at deterministic
/// test accounts so a full run works against a local node.
fn test_external_contracts(signers: &[(Address, String)]) -> ExternalContracts {
    let at = |index: usize| signers.get(index).map(|(address, _)| *address);
    ExternalContracts {
        foundation_governance: at(1),
        foundation_multisig: at(2),
        foundation_treasury: at(3),
        keeper: at(4),
        arbitrageur: at(5),
        usdc: at(6),
        tether: at(7),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layer_settings(chain_id_l1: u64, chain_id_l2: u64) -> SystemSettings {
        let mut layers = BTreeMap::new();
        layers.insert(
            Layer::Layer1,
            LayerSettings {
                chain_id: chain_id_l1,
                network: Network::Homestead,
                external_contracts: ExternalContracts::default(),
                version: 0,
            },
        );
        layers.insert(
            Layer::Layer2,
            LayerSettings {
                chain_id: chain_id_l2,
                network: Network::Xdai,
                external_contracts: ExternalContracts::default(),
                version: 0,
            },
        );
        SystemSettings { layers }
    }

    #[test]
    fn test_stage_and_layer_parse() {
        assert_eq!("staging".parse::<Stage>().unwrap(), Stage::Staging);
        assert_eq!("layer2".parse::<Layer>().unwrap(), Layer::Layer2);
        assert_eq!(Layer::Layer1.to_string(), "layer1");
        assert!("mainnet".parse::<Stage>().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir::TempDir::new("settings-test").unwrap();
        let dao = SettingsDao::from_settings(
            Stage::Staging,
            dir.path(),
            two_layer_settings(42, 100),
        );
        dao.save().unwrap();

        let reloaded = SettingsDao::open(Stage::Staging, dir.path()).unwrap();
        assert_eq!(reloaded.get_chain_id(Layer::Layer1).unwrap(), 42);
        assert_eq!(reloaded.get_chain_id(Layer::Layer2).unwrap(), 100);
        assert_eq!(
            reloaded.get_network(Layer::Layer2).unwrap(),
            Network::Xdai
        );
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempdir::TempDir::new("settings-test").unwrap();
        assert!(SettingsDao::open(Stage::Production, dir.path()).is_err());
    }

    #[test]
    fn test_in_same_layer() {
        let dir = tempdir::TempDir::new("settings-test").unwrap();
        let same = SettingsDao::from_settings(Stage::Test, dir.path(), two_layer_settings(7, 7));
        assert!(same.in_same_layer().unwrap());

        let cross = SettingsDao::from_settings(Stage::Test, dir.path(), two_layer_settings(1, 100));
        assert!(!cross.in_same_layer().unwrap());
    }

    #[test]
    fn test_version_cursor_persists() {
        let dir = tempdir::TempDir::new("settings-test").unwrap();
        let dao =
            SettingsDao::from_settings(Stage::Staging, dir.path(), two_layer_settings(1, 100));
        dao.complete_migration(Layer::Layer1, 0).unwrap();
        dao.complete_migration(Layer::Layer1, 1).unwrap();
        dao.complete_migration(Layer::Layer2, 0).unwrap();
        assert_eq!(dao.get_version(Layer::Layer1).unwrap(), 2);

        // The cursor jumps over unnumbered slots when a later migration lands.
        dao.complete_migration(Layer::Layer1, 6).unwrap();
        assert_eq!(dao.get_version(Layer::Layer1).unwrap(), 7);

        let reloaded = SettingsDao::open(Stage::Staging, dir.path()).unwrap();
        assert_eq!(reloaded.get_version(Layer::Layer1).unwrap(), 7);
        assert_eq!(reloaded.get_version(Layer::Layer2).unwrap(), 1);
    }

    #[test]
    fn test_ephemeral_scaffold() {
        let dao = SettingsDao::open(Stage::Test, "ignored").unwrap();
        assert!(dao.in_same_layer().unwrap());
        assert_eq!(dao.get_version(Layer::Layer1).unwrap(), 0);
        let external = dao.get_external_contracts(Layer::Layer2).unwrap();
        assert!(external.foundation_governance.is_some());
        assert!(external.usdc.is_some());
    }

    #[test]
    fn test_derive_signers_deterministic() {
        let first = derive_test_signers(3).unwrap();
        let second = derive_test_signers(3).unwrap();
        assert_eq!(first, second);
        // Account zero of the standard developer mnemonic.
        assert_eq!(
            first[0].0,
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_external_contracts_unknown_keys_survive() {
        let raw = r#"{
            "usdc": "0x0000000000000000000000000000000000000001",
            "futureOracle": "0x0000000000000000000000000000000000000002"
        }"#;
        let parsed: ExternalContracts = serde_json::from_str(raw).unwrap();
        assert!(parsed.usdc.is_some());
        assert!(parsed.extra.contains_key("futureOracle"));

        let rendered = serde_json::to_string(&parsed).unwrap();
        assert!(rendered.contains("futureOracle"));
        assert!(!rendered.contains("tether"));
    }

    #[test]
    fn test_require_external() {
        let external = ExternalContracts::default();
        let err = require_external(external.usdc, "usdc").unwrap_err();
        assert!(err.to_string().contains("usdc"));
    }
}
