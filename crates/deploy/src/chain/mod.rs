//! Chain access: the client abstraction, ABI helpers and compiled artifacts.

pub mod abi;
mod artifacts;
mod rpc;

pub use artifacts::{ContractArtifact, load_artifact};
pub use rpc::RpcClient;

use std::future::Future;

use alloy_core::primitives::{Address, B256, U64};
use anyhow::Result;
use serde::Deserialize;

use abi::EthValue;

/// Receipt of a mined transaction, trimmed to the fields the flow reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

/// Chain-side operations the deployment flow needs.
///
/// [`RpcClient`] implements this against a JSON-RPC node; tests swap in an
/// in-memory fake. Contracts are referred to by artifact name.
pub trait ChainClient: Send + Sync {
    /// Deploys `contract` behind a fresh transparent proxy and calls its
    /// initializer with `args`. Returns the proxy address.
    fn deploy_upgradable(
        &self,
        contract: &str,
        args: &[EthValue],
    ) -> impl Future<Output = Result<Address>> + Send;

    /// Deploys `contract` directly with constructor `args`.
    fn deploy_immutable(
        &self,
        contract: &str,
        args: &[EthValue],
    ) -> impl Future<Output = Result<Address>> + Send;

    /// Deploys the new logic contract for `proxy` without switching it over.
    /// Returns the address of the staged implementation.
    fn prepare_upgrade(
        &self,
        contract: &str,
        proxy: Address,
    ) -> impl Future<Output = Result<Address>> + Send;

    /// Deploys the new logic contract for `proxy` and switches the proxy to
    /// it, preserving the proxy address and its stored state.
    fn upgrade(&self, contract: &str, proxy: Address) -> impl Future<Output = Result<()>> + Send;

    /// Hands ownership of the admin managing `proxy` over to `new_owner`.
    fn transfer_proxy_admin_ownership(
        &self,
        proxy: Address,
        new_owner: Address,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Calls a read-only method and returns the raw return data.
    fn view(
        &self,
        to: Address,
        signature: &str,
        args: &[EthValue],
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Submits a state-changing call and waits for `confirmations` blocks
    /// before returning the receipt.
    fn execute(
        &self,
        to: Address,
        signature: &str,
        args: &[EthValue],
        confirmations: u64,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;
}
