//! Compiled contract artifacts produced by the Solidity build.

use std::path::Path;

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// A compiled contract: its name, ABI and creation bytecode.
///
/// The on-disk format is the flattened Hardhat build output, one JSON file
/// per contract. Fields beyond these three are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractArtifact {
    pub contract_name: String,
    #[serde(default)]
    pub abi: serde_json::Value,
    pub bytecode: Bytes,
}

/// Loads the artifact for `contract` from `<dir>/<contract>.json`.
pub fn load_artifact(dir: &Path, contract: &str) -> Result<ContractArtifact> {
    let path = dir.join(format!("{contract}.json"));
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    let artifact: ContractArtifact = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse artifact {}", path.display()))?;
    if artifact.bytecode.is_empty() {
        bail!("Artifact {contract} has no deployable bytecode");
    }
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempdir::TempDir;

    fn write_artifact(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{name}.json")), body).unwrap();
    }

    #[test]
    fn test_load_artifact_reads_name_abi_and_bytecode() {
        let dir = TempDir::new("artifacts").unwrap();
        write_artifact(
            dir.path(),
            "InsuranceFund",
            r#"{
                "contractName": "InsuranceFund",
                "abi": [{"type": "function", "name": "initialize", "inputs": []}],
                "bytecode": "0x6080604052",
                "deployedBytecode": "0x6080",
                "linkReferences": {}
            }"#,
        );

        let artifact = load_artifact(dir.path(), "InsuranceFund").unwrap();
        assert_eq!(artifact.contract_name, "InsuranceFund");
        assert_eq!(artifact.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
        assert!(artifact.abi.is_array());
    }

    #[test]
    fn test_load_artifact_fails_for_missing_file() {
        let dir = TempDir::new("artifacts").unwrap();
        let err = load_artifact(dir.path(), "Missing").unwrap_err();
        assert!(err.to_string().contains("Missing.json"));
    }

    #[test]
    fn test_load_artifact_rejects_interfaces_without_bytecode() {
        let dir = TempDir::new("artifacts").unwrap();
        write_artifact(
            dir.path(),
            "IPriceFeed",
            r#"{"contractName": "IPriceFeed", "abi": [], "bytecode": "0x"}"#,
        );

        let err = load_artifact(dir.path(), "IPriceFeed").unwrap_err();
        assert!(err.to_string().contains("no deployable bytecode"));
    }
}
