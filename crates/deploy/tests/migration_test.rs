//! End-to-end migration tests against an in-memory chain.
//!
//! The fake chain hands out deterministic addresses and records every
//! deployment, call and upgrade, so the tests can assert on the exact
//! transaction stream a migration produces without a node.
//! Run with: cargo test --test migration_test

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use alloy_core::primitives::{Address, B256, U64, U256};
use anyhow::{Result, bail};
use tempdir::TempDir;

use perpetuate_deploy::chain::abi::{self, EthValue};
use perpetuate_deploy::chain::{ChainClient, TxReceipt};
use perpetuate_deploy::config::{DeployConfig, PriceFeedKey, to_full_digit};
use perpetuate_deploy::context::MigrationContext;
use perpetuate_deploy::contract::{
    AmmInstanceName, AmmPriceSource, ContractName, ContractWrapperFactory,
};
use perpetuate_deploy::metadata::SystemMetadataDao;
use perpetuate_deploy::migration::Migration;
use perpetuate_deploy::migrations;
use perpetuate_deploy::price;
use perpetuate_deploy::settings::{
    ExternalContracts, Layer, LayerSettings, Network, SettingsDao, Stage, SystemSettings,
};

#[derive(Clone, Debug)]
struct Deployment {
    contract: String,
    args: Vec<EthValue>,
    address: Address,
    upgradable: bool,
}

#[derive(Clone, Debug)]
struct Call {
    to: Address,
    signature: String,
    args: Vec<EthValue>,
    confirmations: u64,
}

#[derive(Default, Debug)]
struct FakeState {
    next_address: u64,
    next_tx: u64,
    deployments: Vec<Deployment>,
    staged: Vec<(String, Address)>,
    upgrades: Vec<(String, Address)>,
    admin_transfers: Vec<(Address, Address)>,
    calls: Vec<Call>,
    views: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
}

/// Chain double recording every interaction instead of talking to a node.
///
/// Views answer with a single zero word unless a response was scripted, and
/// any signature or contract name can be told to revert.
#[derive(Default, Debug)]
struct FakeChain {
    state: Mutex<FakeState>,
}

impl FakeChain {
    fn set_view(&self, signature: &str, data: Vec<u8>) {
        self.lock().views.insert(signature.to_string(), data);
    }

    fn fail_on(&self, target: &str) {
        self.lock().failing.insert(target.to_string());
    }

    fn deployments_of(&self, contract: &str) -> Vec<Deployment> {
        self.lock()
            .deployments
            .iter()
            .filter(|deployment| deployment.contract == contract)
            .cloned()
            .collect()
    }

    fn calls(&self, signature: &str) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.signature == signature)
            .cloned()
            .collect()
    }

    fn staged(&self) -> Vec<(String, Address)> {
        self.lock().staged.clone()
    }

    fn upgrades(&self) -> Vec<(String, Address)> {
        self.lock().upgrades.clone()
    }

    fn admin_transfers(&self) -> Vec<(Address, Address)> {
        self.lock().admin_transfers.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn deploy(&self, contract: &str, args: &[EthValue], upgradable: bool) -> Result<Address> {
        let mut state = self.lock();
        if state.failing.contains(contract) {
            bail!("Deploy of {contract} reverted");
        }
        let address = next_address(&mut state);
        state.deployments.push(Deployment {
            contract: contract.to_string(),
            args: args.to_vec(),
            address,
            upgradable,
        });
        Ok(address)
    }
}

fn next_address(state: &mut FakeState) -> Address {
    state.next_address += 1;
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&state.next_address.to_be_bytes());
    Address::from_slice(&bytes)
}

fn next_receipt(state: &mut FakeState) -> TxReceipt {
    state.next_tx += 1;
    TxReceipt {
        transaction_hash: B256::from(U256::from(state.next_tx)),
        block_number: Some(U64::from(state.next_tx)),
        status: Some(U64::from(1u64)),
        contract_address: None,
    }
}

impl ChainClient for FakeChain {
    async fn deploy_upgradable(&self, contract: &str, args: &[EthValue]) -> Result<Address> {
        self.deploy(contract, args, true)
    }

    async fn deploy_immutable(&self, contract: &str, args: &[EthValue]) -> Result<Address> {
        self.deploy(contract, args, false)
    }

    async fn prepare_upgrade(&self, contract: &str, _proxy: Address) -> Result<Address> {
        let mut state = self.lock();
        let address = next_address(&mut state);
        state.staged.push((contract.to_string(), address));
        Ok(address)
    }

    async fn upgrade(&self, contract: &str, proxy: Address) -> Result<()> {
        self.lock().upgrades.push((contract.to_string(), proxy));
        Ok(())
    }

    async fn transfer_proxy_admin_ownership(
        &self,
        proxy: Address,
        new_owner: Address,
    ) -> Result<()> {
        self.lock().admin_transfers.push((proxy, new_owner));
        Ok(())
    }

    async fn view(&self, _to: Address, signature: &str, _args: &[EthValue]) -> Result<Vec<u8>> {
        let state = self.lock();
        if state.failing.contains(signature) {
            bail!("View {signature} reverted");
        }
        Ok(state
            .views
            .get(signature)
            .cloned()
            .unwrap_or_else(|| vec![0u8; 32]))
    }

    async fn execute(
        &self,
        to: Address,
        signature: &str,
        args: &[EthValue],
        confirmations: u64,
    ) -> Result<TxReceipt> {
        let mut state = self.lock();
        if state.failing.contains(signature) {
            bail!("Transaction calling {signature} reverted");
        }
        state.calls.push(Call {
            to,
            signature: signature.to_string(),
            args: args.to_vec(),
            confirmations,
        });
        Ok(next_receipt(&mut state))
    }
}

/// Test fixture: temp-backed settings and metadata around a fake chain.
struct Harness {
    chain: Arc<FakeChain>,
    settings: Arc<SettingsDao>,
    metadata: Arc<SystemMetadataDao>,
    governance: Address,
    usdc: Address,
    _dir: TempDir,
}

fn test_address(tag: u8) -> Address {
    Address::repeat_byte(tag)
}

impl Harness {
    fn new(stage: Stage, same_layer: bool) -> Result<Self> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = TempDir::new("migration-test")?;
        let governance = test_address(0xA1);
        let usdc = test_address(0xA3);
        let external = ExternalContracts {
            foundation_governance: Some(governance),
            arbitrageur: Some(test_address(0xA2)),
            usdc: Some(usdc),
            ..ExternalContracts::default()
        };
        let layer2_chain_id = if same_layer { 31337 } else { 100 };
        let settings = SystemSettings {
            layers: BTreeMap::from([
                (Layer::Layer1, layer_settings(31337, external.clone())),
                (Layer::Layer2, layer_settings(layer2_chain_id, external)),
            ]),
        };
        let settings = Arc::new(SettingsDao::from_settings(stage, dir.path(), settings));
        let metadata = Arc::new(SystemMetadataDao::open(Arc::clone(&settings))?);
        Ok(Self {
            chain: Arc::new(FakeChain::default()),
            settings,
            metadata,
            governance,
            usdc,
            _dir: dir,
        })
    }

    fn context(&self) -> Result<MigrationContext<FakeChain>> {
        let deploy_config = DeployConfig::new(self.settings.stage());
        let factory = Arc::new(ContractWrapperFactory::new(
            Arc::clone(&self.chain),
            Arc::clone(&self.metadata),
            Layer::Layer1,
            deploy_config.confirmations,
            false,
            AmmPriceSource::default(),
        ));
        MigrationContext::new(
            Layer::Layer1,
            Arc::clone(&self.settings),
            Arc::clone(&self.metadata),
            deploy_config,
            factory,
        )
    }

    fn recorded(&self, name: &str) -> Address {
        self.metadata
            .get_contract_metadata(Layer::Layer1, name)
            .unwrap()
            .address
    }
}

fn layer_settings(chain_id: u64, external_contracts: ExternalContracts) -> LayerSettings {
    LayerSettings {
        chain_id,
        network: Network::Localhost,
        external_contracts,
        version: 0,
    }
}

fn migration_at(index: u32) -> Migration<FakeChain> {
    migrations::all::<FakeChain>()
        .into_iter()
        .find(|migration| migration.index == index)
        .unwrap()
}

async fn run_through(context: &MigrationContext<FakeChain>, last_index: u32) -> Result<()> {
    for migration in migrations::all::<FakeChain>() {
        if migration.index > last_index {
            break;
        }
        migration.run(context).await?;
    }
    Ok(())
}

#[test]
fn test_factory_memoizes_wrappers() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();

    let first = context.factory.create(ContractName::ClearingHouse);
    let second = context.factory.create(ContractName::ClearingHouse);
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(
        &first,
        &context.factory.create(ContractName::InsuranceFund)
    ));

    let amm = context
        .factory
        .create_amm(AmmInstanceName::EthUsdc, ContractName::Amm);
    let again = context
        .factory
        .create_amm(AmmInstanceName::EthUsdc, ContractName::Amm);
    assert!(Arc::ptr_eq(&amm, &again));
}

#[test]
fn test_instance_requires_a_recorded_address() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();

    let err = context
        .factory
        .create(ContractName::ClearingHouse)
        .instance()
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("No address recorded for ClearingHouse on layer1")
    );
}

#[tokio::test]
async fn test_deploy_records_metadata_and_upgrade_keeps_the_address() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 0).await.unwrap();

    let wrapper = context.factory.create(ContractName::ChainlinkL1);
    let deployed = wrapper.require_address().unwrap();
    assert_eq!(harness.recorded("ChainlinkL1"), deployed);
    assert_eq!(harness.chain.deployments_of("ChainlinkL1")[0].address, deployed);

    let staged = wrapper.prepare_upgrade().await.unwrap();
    assert_ne!(staged, deployed);
    assert_eq!(harness.chain.staged(), vec![("ChainlinkL1".to_string(), staged)]);

    wrapper.upgrade().await.unwrap();
    assert_eq!(wrapper.require_address().unwrap(), deployed);
    assert_eq!(harness.recorded("ChainlinkL1"), deployed);
    assert_eq!(
        harness.chain.upgrades(),
        vec![("ChainlinkL1".to_string(), deployed)]
    );
}

#[tokio::test]
async fn test_deploy_refuses_to_overwrite_a_recorded_address() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 0).await.unwrap();

    let err = context
        .factory
        .create(ContractName::ChainlinkL1)
        .deploy_upgradable(&[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("enable redeploy to replace it"));
    assert_eq!(harness.chain.deployments_of("ChainlinkL1").len(), 1);
}

#[tokio::test]
async fn test_full_rollout_records_the_whole_system() {
    let harness = Harness::new(Stage::Staging, false).unwrap();
    let context = harness.context().unwrap();
    for migration in migrations::all::<FakeChain>() {
        migration.run(&context).await.unwrap();
    }

    for name in [
        "ChainlinkL1",
        "MetaTxGateway",
        "InsuranceFund",
        "L2PriceFeed",
        "ClearingHouse",
        "ClearingHouseViewer",
        "AmmReader",
        "ETHUSDC",
        "BTCUSDC",
        "ChainlinkAggregatorMockETH",
        "ChainlinkAggregatorMockBTC",
    ] {
        assert!(
            harness.metadata.has_contract(Layer::Layer1, name),
            "missing {name}"
        );
    }

    // Governance ends up owning every protocol contract and, cross-layer,
    // both proxy admins.
    let set_owner = harness.chain.calls("setOwner(address)");
    assert_eq!(set_owner.len(), 7);
    assert!(
        set_owner
            .iter()
            .all(|call| call.args == vec![EthValue::from(harness.governance)])
    );
    assert_eq!(
        harness.chain.admin_transfers(),
        vec![
            (harness.recorded("MetaTxGateway"), harness.governance),
            (harness.recorded("ChainlinkL1"), harness.governance),
        ]
    );

    // Both feed contracts were upgraded in place.
    assert_eq!(
        harness.chain.upgrades(),
        vec![
            ("L2PriceFeed".to_string(), harness.recorded("L2PriceFeed")),
            ("ChainlinkL1".to_string(), harness.recorded("ChainlinkL1")),
        ]
    );

    // Aggregators: two feed keys on L2PriceFeed, then mock and real rounds
    // on ChainlinkL1 with a tolerated removal before each registration.
    assert_eq!(harness.chain.calls("addAggregator(bytes32)").len(), 2);
    assert_eq!(harness.chain.calls("removeAggregator(bytes32)").len(), 4);
    assert_eq!(harness.chain.calls("addAggregator(bytes32,address)").len(), 6);

    // Caps arrive only with the dedicated migration; the initial config
    // leaves both markets uncapped.
    let caps = harness.chain.calls("setCap((uint256),(uint256))");
    assert_eq!(caps.len(), 2);
    assert_eq!(caps[0].args[0], EthValue::from(to_full_digit(40)));
    assert_eq!(caps[0].args[1], EthValue::from(U256::ZERO));
    assert_eq!(caps[1].args[0], EthValue::from(to_full_digit(3)));
    assert_eq!(harness.chain.calls("setOpen(bool)").len(), 2);
}

#[tokio::test]
async fn test_amm_deploys_with_the_derived_quote_reserve() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 1).await.unwrap();

    let amms = harness.chain.deployments_of("Amm");
    assert_eq!(amms.len(), 2);
    assert!(amms.iter().all(|amm| amm.upgradable));

    // 100 base at the fixed 4000 quote price.
    let eth = &amms[0];
    assert_eq!(eth.args.len(), 10);
    assert_eq!(eth.args[0], EthValue::from(to_full_digit(400_000)));
    assert_eq!(eth.args[1], EthValue::from(to_full_digit(100)));
    assert_eq!(eth.args[4], EthValue::from(harness.recorded("L2PriceFeed")));
    assert_eq!(
        eth.args[5],
        EthValue::from(abi::format_bytes32_string("ETH").unwrap())
    );
    assert_eq!(eth.args[6], EthValue::from(harness.usdc));

    // 20 base at the fixed 48000 quote price.
    let btc = &amms[1];
    assert_eq!(btc.args[0], EthValue::from(to_full_digit(960_000)));
    assert_eq!(btc.args[1], EthValue::from(to_full_digit(20)));
    assert_eq!(
        btc.args[5],
        EthValue::from(abi::format_bytes32_string("BTC").unwrap())
    );
}

#[tokio::test]
async fn test_failed_task_keeps_completed_work_on_disk() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 0).await.unwrap();

    harness.chain.fail_on("setBeneficiary(address)");
    let err = migration_at(1).run(&context).await.unwrap_err();
    assert!(format!("{err:#}").contains("failed at task 7/29"));

    // Every deploy before the failing task is on disk; nothing after it ran.
    let reloaded = SystemMetadataDao::open(Arc::clone(&harness.settings)).unwrap();
    for name in ["MetaTxGateway", "InsuranceFund", "L2PriceFeed", "ClearingHouse"] {
        assert!(
            reloaded.has_contract(Layer::Layer1, name),
            "missing {name}"
        );
    }
    assert!(!reloaded.has_contract(Layer::Layer1, "ETHUSDC"));
    assert!(harness.chain.calls("setWhitelist(address)").is_empty());
}

#[tokio::test]
async fn test_same_layer_rollout_skips_the_admin_handover() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    assert!(harness.settings.in_same_layer().unwrap());

    let context = harness.context().unwrap();
    run_through(&context, 2).await.unwrap();
    assert!(harness.chain.admin_transfers().is_empty());
}

#[tokio::test]
async fn test_mock_setup_tolerates_removal_reverts() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 2).await.unwrap();

    harness.chain.fail_on("removeAggregator(bytes32)");
    migration_at(3).run(&context).await.unwrap();

    // Both mocks still went in, registered right after the reverted removal.
    let adds = harness.chain.calls("addAggregator(bytes32,address)");
    assert_eq!(adds.len(), 4);
    assert_eq!(
        adds[2].args[1],
        EthValue::from(harness.recorded("ChainlinkAggregatorMockETH"))
    );
    assert_eq!(
        adds[3].args[1],
        EthValue::from(harness.recorded("ChainlinkAggregatorMockBTC"))
    );
}

#[tokio::test]
async fn test_set_mock_price_rolls_the_feed_forward() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 3).await.unwrap();

    let aggregator = test_address(0x77);
    harness
        .chain
        .set_view("getAggregator(bytes32)", abi::encode_args(&[aggregator.into()]));
    harness
        .chain
        .set_view("decimals()", abi::encode_args(&[8u64.into()]));
    harness.chain.set_view(
        "latestRoundData()",
        abi::encode_args(&[
            U256::from(4u64).into(),
            U256::from(50_000u64).into(),
            U256::ZERO.into(),
            U256::ZERO.into(),
            U256::from(4u64).into(),
        ]),
    );

    price::set_mock_price(&context, PriceFeedKey::Btc, 50_000, false)
        .await
        .unwrap();

    let answers = harness
        .chain
        .calls("mockAddAnswer(uint80,int256,uint256,uint256,uint80)");
    assert_eq!(answers.len(), 1);
    let answer = &answers[0];
    assert_eq!(answer.to, aggregator);
    assert_eq!(answer.confirmations, 1);
    assert_eq!(answer.args[0], EthValue::from(U256::from(5u64)));
    assert_eq!(
        answer.args[1],
        EthValue::from(U256::from(50_000u64) * U256::from(10u64).pow(U256::from(8u64)))
    );
    assert_eq!(answer.args[4], EthValue::from(U256::from(5u64)));
    assert_eq!(harness.chain.calls("updateLatestRoundData(bytes32)").len(), 1);
}

#[tokio::test]
async fn test_set_mock_price_can_skip_the_feed_update() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 3).await.unwrap();

    harness
        .chain
        .set_view("getAggregator(bytes32)", abi::encode_args(&[test_address(0x77).into()]));
    harness
        .chain
        .set_view("decimals()", abi::encode_args(&[8u64.into()]));
    harness.chain.fail_on("latestRoundData()");

    price::set_mock_price(&context, PriceFeedKey::Eth, 4_000, true)
        .await
        .unwrap();

    // With no prior rounds the counters start from one.
    let answers = harness
        .chain
        .calls("mockAddAnswer(uint80,int256,uint256,uint256,uint80)");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].args[0], EthValue::from(U256::from(1u64)));
    assert!(harness.chain.calls("updateLatestRoundData(bytes32)").is_empty());
}

#[tokio::test]
async fn test_set_mock_price_refuses_production() {
    let harness = Harness::new(Stage::Production, true).unwrap();
    let context = harness.context().unwrap();

    let err = price::set_mock_price(&context, PriceFeedKey::Eth, 4_000, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("production"));
}

#[tokio::test]
async fn test_price_report_collects_every_source() {
    let harness = Harness::new(Stage::Staging, true).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 1).await.unwrap();

    let aggregator = test_address(0x77);
    harness
        .chain
        .set_view("getAggregator(bytes32)", abi::encode_args(&[aggregator.into()]));
    harness
        .chain
        .set_view("decimals()", abi::encode_args(&[8u64.into()]));
    harness.chain.set_view(
        "getUnderlyingPrice()",
        abi::encode_args(&[to_full_digit(4_000).into()]),
    );
    harness.chain.set_view(
        "getUnderlyingTwapPrice(uint256)",
        abi::encode_args(&[to_full_digit(4_005).into()]),
    );
    harness.chain.set_view(
        "getPrice(bytes32)",
        abi::encode_args(&[to_full_digit(4_001).into()]),
    );
    harness.chain.set_view(
        "getTwapPrice(bytes32,uint256)",
        abi::encode_args(&[to_full_digit(4_002).into()]),
    );

    let report = price::price_report(&context, PriceFeedKey::Eth).await.unwrap();
    assert_eq!(report.key, PriceFeedKey::Eth);
    assert_eq!(report.amm_instance, AmmInstanceName::EthUsdc);
    assert_eq!(report.amm_price, to_full_digit(4_000));
    assert_eq!(report.amm_twap, to_full_digit(4_005));
    assert_eq!(report.aggregator, aggregator);
    assert_eq!(report.aggregator_decimals, 8);
    assert_eq!(report.feed_price, to_full_digit(4_001));
    assert_eq!(report.feed_twap, to_full_digit(4_002));
}

#[tokio::test]
async fn test_relay_price_pushes_the_latest_round_over_the_bridge() {
    let harness = Harness::new(Stage::Staging, false).unwrap();
    let context = harness.context().unwrap();
    run_through(&context, 1).await.unwrap();

    // The bridge is deployed out of band and the feed lives on the far layer.
    let root_bridge = test_address(0x55);
    harness
        .metadata
        .set_contract_metadata(Layer::Layer1, "RootBridge", root_bridge)
        .unwrap();
    let remote_feed = test_address(0x56);
    harness
        .metadata
        .set_contract_metadata(Layer::Layer2, "L2PriceFeed", remote_feed)
        .unwrap();

    let aggregator = test_address(0x77);
    harness
        .chain
        .set_view("getAggregator(bytes32)", abi::encode_args(&[aggregator.into()]));
    harness.chain.set_view(
        "latestRoundData()",
        abi::encode_args(&[
            U256::from(9u64).into(),
            U256::from(42_000u64).into(),
            U256::ZERO.into(),
            U256::from(1_700_000_000u64).into(),
            U256::from(9u64).into(),
        ]),
    );

    price::relay_price(&context, PriceFeedKey::Btc).await.unwrap();

    let updates = harness
        .chain
        .calls("updatePriceFeed(address,bytes32,(uint256),uint256,uint80)");
    assert_eq!(updates.len(), 1);
    let update = &updates[0];
    assert_eq!(update.to, root_bridge);
    assert_eq!(update.args[0], EthValue::from(remote_feed));
    assert_eq!(
        update.args[1],
        EthValue::from(abi::format_bytes32_string("BTC").unwrap())
    );
    assert_eq!(update.args[2], EthValue::from(U256::from(42_000u64)));
    assert_eq!(update.args[3], EthValue::from(U256::from(1_700_000_000u64)));
    assert_eq!(update.args[4], EthValue::from(U256::from(9u64)));
}
