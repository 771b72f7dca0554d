//! perpetuate-deploy - Deployment and migration library for the Perp contract system.
//!
//! This crate drives the protocol's on-chain rollout: a registry of numbered
//! migrations, the contract wrapper layer that deploys proxies and records
//! their addresses per layer, and the JSON-RPC client everything runs against.

pub mod chain;
pub mod config;
pub mod context;
pub mod contract;
pub mod metadata;
pub mod migration;
pub mod migrations;
pub mod price;
pub mod settings;

mod migrator;
pub use migrator::{LayerStatus, Migrator};

pub use chain::{ChainClient, RpcClient};
pub use context::MigrationContext;
pub use contract::{ContractName, ContractWrapperFactory};
pub use settings::{Layer, Stage};
