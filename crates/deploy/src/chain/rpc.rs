//! JSON-RPC implementation of [`ChainClient`] for nodes with unlocked accounts.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64, U256, b256};
use anyhow::{Context, Result, bail};
use backon::{ConstantBuilder, Retryable};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::chain::abi::{self, EthValue};
use crate::chain::artifacts::{ContractArtifact, load_artifact};
use crate::chain::{ChainClient, TxReceipt};

// Auto-mining nodes answer eth_sendTransaction only after mining the block.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RECEIPT_POLL_ATTEMPTS: usize = 120;
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Storage slot holding the admin address of an EIP-1967 transparent proxy.
const ADMIN_SLOT: B256 = b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

const PROXY_ADMIN_CONTRACT: &str = "ProxyAdmin";
const TRANSPARENT_PROXY_CONTRACT: &str = "TransparentUpgradeableProxy";
const INITIALIZER: &str = "initialize";

/// Talks to one chain through its JSON-RPC endpoint.
///
/// Transactions are signed node-side by the operator account, so the
/// endpoint must hold an unlocked key for it. The first upgradable deploy
/// also puts a fresh proxy admin on chain; later upgrades find the admin
/// through the EIP-1967 slot, so they work across runs.
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    operator: Address,
    artifacts_dir: PathBuf,
    proxy_admin: Mutex<Option<Address>>,
    request_id: AtomicU64,
}

impl RpcClient {
    /// Connects to `endpoint` and resolves the operator account.
    ///
    /// With no explicit operator the node's first unlocked account is used.
    pub async fn connect(
        endpoint: &str,
        artifacts_dir: &Path,
        operator: Option<Address>,
    ) -> Result<Self> {
        Url::parse(endpoint).with_context(|| format!("Invalid RPC endpoint: {endpoint}"))?;
        let mut client = Self {
            client: create_client()?,
            url: endpoint.to_string(),
            operator: Address::ZERO,
            artifacts_dir: artifacts_dir.to_path_buf(),
            proxy_admin: Mutex::new(None),
            request_id: AtomicU64::new(1),
        };
        client.operator = match operator {
            Some(address) => address,
            None => {
                let accounts: Vec<Address> = client
                    .rpc("eth_accounts", vec![])
                    .await
                    .context("Failed to list node accounts")?;
                *accounts
                    .first()
                    .context("Node exposes no unlocked accounts and no operator is configured")?
            }
        };
        tracing::info!(endpoint = %endpoint, operator = %client.operator, "Connected to chain");
        Ok(client)
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?;
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("Invalid JSON-RPC response from {}", self.url))?;
        if let Some(error) = payload.get("error") {
            bail!("JSON-RPC error from {method}: {error}");
        }
        serde_json::from_value(payload["result"].clone())
            .with_context(|| format!("Unexpected result shape from {method}"))
    }

    async fn block_number(&self) -> Result<u64> {
        let block: U64 = self.rpc("eth_blockNumber", vec![]).await?;
        Ok(block.to::<u64>())
    }

    async fn send_transaction(&self, to: Option<Address>, data: &[u8]) -> Result<TxReceipt> {
        let mut tx = json!({
            "from": self.operator,
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        let estimate: U256 = self
            .rpc("eth_estimateGas", vec![tx.clone()])
            .await
            .context("Failed to estimate gas")?;
        // 20% headroom over the node's estimate.
        tx["gas"] = json!(format!("{:#x}", estimate + estimate / U256::from(5u64)));
        let tx_hash: B256 = self
            .rpc("eth_sendTransaction", vec![tx])
            .await
            .context("Failed to submit transaction")?;
        let receipt = self.wait_for_receipt(tx_hash).await?;
        if receipt.status == Some(U64::ZERO) {
            bail!("Transaction {tx_hash} reverted");
        }
        Ok(receipt)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt> {
        let fetch = || async {
            let receipt: Option<TxReceipt> = self
                .rpc("eth_getTransactionReceipt", vec![json!(tx_hash)])
                .await?;
            receipt.with_context(|| format!("Transaction {tx_hash} not mined yet"))
        };
        fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(RECEIPT_POLL_INTERVAL)
                    .with_max_times(RECEIPT_POLL_ATTEMPTS),
            )
            .notify(|error, _| tracing::trace!(error = %error, "Waiting for transaction receipt..."))
            .await
    }

    async fn wait_for_confirmations(&self, mined_in: u64, confirmations: u64) -> Result<()> {
        if confirmations <= 1 {
            return Ok(());
        }
        loop {
            let head = self.block_number().await?;
            if head + 1 >= mined_in + confirmations {
                return Ok(());
            }
            tracing::trace!(head = head, "Waiting for confirmations...");
            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
        }
    }

    async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let call = json!({
            "from": self.operator,
            "to": to,
            "data": format!("0x{}", hex::encode(data)),
        });
        let result: Bytes = self.rpc("eth_call", vec![call, json!("latest")]).await?;
        Ok(result.to_vec())
    }

    async fn deploy_contract(
        &self,
        artifact: &ContractArtifact,
        args: &[EthValue],
    ) -> Result<Address> {
        let mut data = artifact.bytecode.to_vec();
        data.extend_from_slice(&abi::encode_args(args));
        let receipt = self.send_transaction(None, &data).await?;
        let address = receipt.contract_address.with_context(|| {
            format!(
                "No contract address in the {} deploy receipt",
                artifact.contract_name
            )
        })?;
        tracing::info!(contract = %artifact.contract_name, address = %address, "Contract deployed");
        Ok(address)
    }

    /// The proxy admin shared by every upgradable contract this run deploys.
    async fn proxy_admin(&self) -> Result<Address> {
        let cached = *self.proxy_admin.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(address) = cached {
            return Ok(address);
        }
        let artifact = load_artifact(&self.artifacts_dir, PROXY_ADMIN_CONTRACT)?;
        let address = self.deploy_contract(&artifact, &[]).await?;
        *self.proxy_admin.lock().unwrap_or_else(|e| e.into_inner()) = Some(address);
        Ok(address)
    }

    async fn resolve_proxy_admin(&self, proxy: Address) -> Result<Address> {
        let word: B256 = self
            .rpc(
                "eth_getStorageAt",
                vec![json!(proxy), json!(ADMIN_SLOT), json!("latest")],
            )
            .await
            .context("Failed to read the proxy admin slot")?;
        let admin = abi::word_to_address(word);
        if admin == Address::ZERO {
            bail!("{proxy} is not a transparent proxy managed by this deployer");
        }
        Ok(admin)
    }
}

impl ChainClient for RpcClient {
    async fn deploy_upgradable(&self, contract: &str, args: &[EthValue]) -> Result<Address> {
        let logic_artifact = load_artifact(&self.artifacts_dir, contract)?;
        let logic = self.deploy_contract(&logic_artifact, &[]).await?;
        let admin = self.proxy_admin().await?;
        let init_data = abi::encode_call(&abi::build_signature(INITIALIZER, args), args);
        let proxy_artifact = load_artifact(&self.artifacts_dir, TRANSPARENT_PROXY_CONTRACT)?;
        let proxy = self
            .deploy_contract(
                &proxy_artifact,
                &[logic.into(), admin.into(), init_data.into()],
            )
            .await?;
        tracing::info!(contract = %contract, proxy = %proxy, logic = %logic, "Upgradable contract deployed");
        Ok(proxy)
    }

    async fn deploy_immutable(&self, contract: &str, args: &[EthValue]) -> Result<Address> {
        let artifact = load_artifact(&self.artifacts_dir, contract)?;
        self.deploy_contract(&artifact, args).await
    }

    async fn prepare_upgrade(&self, contract: &str, proxy: Address) -> Result<Address> {
        self.resolve_proxy_admin(proxy).await?;
        let artifact = load_artifact(&self.artifacts_dir, contract)?;
        let implementation = self.deploy_contract(&artifact, &[]).await?;
        tracing::info!(contract = %contract, proxy = %proxy, implementation = %implementation, "New implementation staged");
        Ok(implementation)
    }

    async fn upgrade(&self, contract: &str, proxy: Address) -> Result<()> {
        let admin = self.resolve_proxy_admin(proxy).await?;
        let artifact = load_artifact(&self.artifacts_dir, contract)?;
        let implementation = self.deploy_contract(&artifact, &[]).await?;
        let data = abi::encode_call(
            "upgrade(address,address)",
            &[proxy.into(), implementation.into()],
        );
        self.send_transaction(Some(admin), &data)
            .await
            .with_context(|| format!("Failed to upgrade {contract} at {proxy}"))?;
        tracing::info!(contract = %contract, proxy = %proxy, implementation = %implementation, "Proxy upgraded");
        Ok(())
    }

    async fn transfer_proxy_admin_ownership(&self, proxy: Address, new_owner: Address) -> Result<()> {
        let admin = self.resolve_proxy_admin(proxy).await?;
        let data = abi::encode_call("transferOwnership(address)", &[new_owner.into()]);
        self.send_transaction(Some(admin), &data)
            .await
            .context("Failed to transfer proxy admin ownership")?;
        tracing::info!(admin = %admin, new_owner = %new_owner, "Proxy admin ownership transferred");
        Ok(())
    }

    async fn view(&self, to: Address, signature: &str, args: &[EthValue]) -> Result<Vec<u8>> {
        let data = abi::encode_call(signature, args);
        self.call(to, &data)
            .await
            .with_context(|| format!("Failed to call {signature} on {to}"))
    }

    async fn execute(
        &self,
        to: Address,
        signature: &str,
        args: &[EthValue],
        confirmations: u64,
    ) -> Result<TxReceipt> {
        let data = abi::encode_call(signature, args);
        let receipt = self
            .send_transaction(Some(to), &data)
            .await
            .with_context(|| format!("Failed to execute {signature} on {to}"))?;
        if let Some(block) = receipt.block_number {
            self.wait_for_confirmations(block.to::<u64>(), confirmations)
                .await?;
        }
        tracing::info!(to = %to, method = %signature, tx = %receipt.transaction_hash, "Transaction confirmed");
        Ok(receipt)
    }
}

fn create_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}
