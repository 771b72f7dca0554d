//! Per-contract deployment handle backed by the metadata store.

use std::sync::{Arc, Mutex};

use alloy_core::primitives::Address;
use anyhow::{Context, Result, bail};

use crate::chain::abi::EthValue;
use crate::chain::{ChainClient, TxReceipt};
use crate::contract::names::ContractName;
use crate::metadata::SystemMetadataDao;
use crate::settings::Layer;

/// Handle for one logical contract on one layer.
///
/// A wrapper knows how to deploy its contract and where the deployed proxy
/// address is recorded. The factory memoizes wrappers, so everything in a
/// run that touches the same slot shares one wrapper and one cached address.
pub struct ContractWrapper<C> {
    client: Arc<C>,
    metadata: Arc<SystemMetadataDao>,
    layer: Layer,
    contract: ContractName,
    slot: String,
    confirmations: u64,
    allow_redeploy: bool,
    address: Mutex<Option<Address>>,
}

impl<C: ChainClient> ContractWrapper<C> {
    pub(crate) fn new(
        client: Arc<C>,
        metadata: Arc<SystemMetadataDao>,
        layer: Layer,
        contract: ContractName,
        slot: String,
        confirmations: u64,
        allow_redeploy: bool,
    ) -> Self {
        Self {
            client,
            metadata,
            layer,
            contract,
            slot,
            confirmations,
            allow_redeploy,
            address: Mutex::new(None),
        }
    }

    /// Metadata slot this wrapper records its address under.
    pub fn name(&self) -> &str {
        &self.slot
    }

    /// Address of the recorded deployment, when there is one.
    pub fn address(&self) -> Option<Address> {
        let cached = *self.address.lock().unwrap_or_else(|e| e.into_inner());
        if cached.is_some() {
            return cached;
        }
        let recorded = self
            .metadata
            .get_contract_metadata(self.layer, &self.slot)
            .ok()
            .map(|meta| meta.address);
        if recorded.is_some() {
            *self.address.lock().unwrap_or_else(|e| e.into_inner()) = recorded;
        }
        recorded
    }

    /// Like [`address`](Self::address), but a missing record is fatal.
    pub fn require_address(&self) -> Result<Address> {
        self.address()
            .with_context(|| format!("No address recorded for {} on {}", self.slot, self.layer))
    }

    /// Deploys the contract behind a transparent proxy, initializes it with
    /// `args` and records the proxy address under this wrapper's slot.
    ///
    /// A slot that already holds an address refuses to deploy again unless
    /// redeploys were explicitly requested.
    pub async fn deploy_upgradable(&self, args: &[EthValue]) -> Result<Address> {
        self.guard_redeploy()?;
        let address = self
            .client
            .deploy_upgradable(&self.contract.to_string(), args)
            .await?;
        self.record(address)?;
        Ok(address)
    }

    /// Deploys the contract directly, without a proxy. Same recording and
    /// redeploy rules as the upgradable path.
    pub async fn deploy_immutable(&self, args: &[EthValue]) -> Result<Address> {
        self.guard_redeploy()?;
        let address = self
            .client
            .deploy_immutable(&self.contract.to_string(), args)
            .await?;
        self.record(address)?;
        Ok(address)
    }

    /// Stages a new implementation for the recorded proxy without switching
    /// it over. Returns the staged implementation's address.
    pub async fn prepare_upgrade(&self) -> Result<Address> {
        let proxy = self.require_address()?;
        self.client
            .prepare_upgrade(&self.contract.to_string(), proxy)
            .await
    }

    /// Swaps the recorded proxy to a freshly deployed implementation. The
    /// proxy address and its metadata entry stay untouched.
    pub async fn upgrade(&self) -> Result<()> {
        let proxy = self.require_address()?;
        self.client.upgrade(&self.contract.to_string(), proxy).await
    }

    /// Hands the admin owning this contract's proxy over to `new_owner`.
    pub async fn transfer_proxy_admin_ownership(&self, new_owner: Address) -> Result<()> {
        let proxy = self.require_address()?;
        self.client
            .transfer_proxy_admin_ownership(proxy, new_owner)
            .await
    }

    /// Live handle bound to the recorded address. Fails when nothing has
    /// been deployed or recorded for this slot yet.
    pub fn instance(&self) -> Result<ContractInstance<C>> {
        let address = self.require_address()?;
        Ok(ContractInstance {
            client: Arc::clone(&self.client),
            address,
            confirmations: self.confirmations,
        })
    }

    pub(crate) fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn guard_redeploy(&self) -> Result<()> {
        if !self.allow_redeploy && self.metadata.has_contract(self.layer, &self.slot) {
            bail!(
                "{} already has an address recorded on {}; enable redeploy to replace it",
                self.slot,
                self.layer
            );
        }
        Ok(())
    }

    fn record(&self, address: Address) -> Result<()> {
        self.metadata
            .set_contract_metadata(self.layer, &self.slot, address)?;
        *self.address.lock().unwrap_or_else(|e| e.into_inner()) = Some(address);
        Ok(())
    }
}

/// A deployed contract at a known address.
#[derive(Debug)]
pub struct ContractInstance<C> {
    client: Arc<C>,
    pub address: Address,
    confirmations: u64,
}

impl<C: ChainClient> ContractInstance<C> {
    /// Calls a read-only method and returns the raw return data.
    pub async fn view(&self, signature: &str, args: &[EthValue]) -> Result<Vec<u8>> {
        self.client.view(self.address, signature, args).await
    }

    /// Sends a transaction and waits for the configured confirmations.
    pub async fn execute(&self, signature: &str, args: &[EthValue]) -> Result<TxReceipt> {
        self.execute_with(signature, args, self.confirmations).await
    }

    /// Sends a transaction with an explicit confirmation count.
    pub async fn execute_with(
        &self,
        signature: &str,
        args: &[EthValue],
        confirmations: u64,
    ) -> Result<TxReceipt> {
        self.client
            .execute(self.address, signature, args, confirmations)
            .await
    }
}
