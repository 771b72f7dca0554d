//! Contract wrappers: typed handles over deploys, upgrades and calls.

mod amm;
mod factory;
mod names;
mod wrapper;

pub use amm::{AmmContractWrapper, AmmPriceSource};
pub use factory::ContractWrapperFactory;
pub use names::{AmmInstanceName, ContractName};
pub use wrapper::{ContractInstance, ContractWrapper};
