//! Creates and memoizes contract wrappers for one layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::chain::ChainClient;
use crate::contract::amm::{AmmContractWrapper, AmmPriceSource};
use crate::contract::names::{AmmInstanceName, ContractName};
use crate::contract::wrapper::ContractWrapper;
use crate::metadata::SystemMetadataDao;
use crate::settings::Layer;

/// Hands out contract wrappers bound to one layer and one chain client.
///
/// Wrappers are memoized by metadata slot: asking twice for the same
/// contract returns the same `Arc`, so a resolved address is shared by all
/// call sites in a run.
pub struct ContractWrapperFactory<C> {
    client: Arc<C>,
    metadata: Arc<SystemMetadataDao>,
    layer: Layer,
    confirmations: u64,
    allow_redeploy: bool,
    price_source: AmmPriceSource,
    wrappers: Mutex<HashMap<String, Arc<ContractWrapper<C>>>>,
    amm_wrappers: Mutex<HashMap<AmmInstanceName, Arc<AmmContractWrapper<C>>>>,
}

impl<C: ChainClient> ContractWrapperFactory<C> {
    pub fn new(
        client: Arc<C>,
        metadata: Arc<SystemMetadataDao>,
        layer: Layer,
        confirmations: u64,
        allow_redeploy: bool,
        price_source: AmmPriceSource,
    ) -> Self {
        Self {
            client,
            metadata,
            layer,
            confirmations,
            allow_redeploy,
            price_source,
            wrappers: Mutex::new(HashMap::new()),
            amm_wrappers: Mutex::new(HashMap::new()),
        }
    }

    /// Wrapper for `contract`, recorded under the contract's own name.
    pub fn create(&self, contract: ContractName) -> Arc<ContractWrapper<C>> {
        let slot = contract.to_string();
        let mut wrappers = self.wrappers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(wrappers.entry(slot.clone()).or_insert_with(|| {
            Arc::new(ContractWrapper::new(
                Arc::clone(&self.client),
                Arc::clone(&self.metadata),
                self.layer,
                contract,
                slot,
                self.confirmations,
                self.allow_redeploy,
            ))
        }))
    }

    /// AMM wrapper for `instance`, recorded under the market name.
    pub fn create_amm(
        &self,
        instance: AmmInstanceName,
        contract: ContractName,
    ) -> Arc<AmmContractWrapper<C>> {
        let mut wrappers = self.amm_wrappers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(wrappers.entry(instance).or_insert_with(|| {
            let inner = ContractWrapper::new(
                Arc::clone(&self.client),
                Arc::clone(&self.metadata),
                self.layer,
                contract,
                instance.to_string(),
                self.confirmations,
                self.allow_redeploy,
            );
            Arc::new(AmmContractWrapper::new(inner, instance, self.price_source))
        }))
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub(crate) fn client(&self) -> Arc<C> {
        Arc::clone(&self.client)
    }
}
