//! Minimal ABI encoding for the contract calls the migrations make.
//!
//! Covers exactly the value kinds the deployment flow passes around. Head
//! words are laid out in argument order; dynamic arguments put an offset in
//! their head slot and append length-prefixed, zero-padded data to the tail.

use alloy_core::primitives::{Address, B256, U256, keccak256};
use anyhow::{Context, Result, bail};

/// One encodable Solidity value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthValue {
    Address(Address),
    Uint(U256),
    Bytes32(B256),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<Address> for EthValue {
    fn from(value: Address) -> Self {
        EthValue::Address(value)
    }
}

impl From<U256> for EthValue {
    fn from(value: U256) -> Self {
        EthValue::Uint(value)
    }
}

impl From<u64> for EthValue {
    fn from(value: u64) -> Self {
        EthValue::Uint(U256::from(value))
    }
}

impl From<B256> for EthValue {
    fn from(value: B256) -> Self {
        EthValue::Bytes32(value)
    }
}

impl From<bool> for EthValue {
    fn from(value: bool) -> Self {
        EthValue::Bool(value)
    }
}

impl From<&str> for EthValue {
    fn from(value: &str) -> Self {
        EthValue::Str(value.to_string())
    }
}

impl From<String> for EthValue {
    fn from(value: String) -> Self {
        EthValue::Str(value)
    }
}

impl From<Vec<u8>> for EthValue {
    fn from(value: Vec<u8>) -> Self {
        EthValue::Bytes(value)
    }
}

impl EthValue {
    /// Canonical Solidity type of this value in a signature.
    pub fn solidity_type(&self) -> &'static str {
        match self {
            EthValue::Address(_) => "address",
            EthValue::Uint(_) => "uint256",
            EthValue::Bytes32(_) => "bytes32",
            EthValue::Bool(_) => "bool",
            EthValue::Str(_) => "string",
            EthValue::Bytes(_) => "bytes",
        }
    }
}

/// `name(type,...)` derived from the kinds of `args`.
///
/// Good enough for initializers, whose parameters are all plain types;
/// calls taking structs spell their signature out at the call site.
pub fn build_signature(name: &str, args: &[EthValue]) -> String {
    let types: Vec<&str> = args.iter().map(EthValue::solidity_type).collect();
    format!("{}({})", name, types.join(","))
}

/// First four bytes of the keccak hash of `signature`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for `signature` called with `args`.
pub fn encode_call(signature: &str, args: &[EthValue]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode_args(args));
    data
}

/// ABI-encodes `args` as one argument block without a selector.
///
/// Also used verbatim as the trailing constructor-argument block when
/// deploying contracts.
pub fn encode_args(args: &[EthValue]) -> Vec<u8> {
    let head_len = 32 * args.len();
    let mut head: Vec<u8> = Vec::with_capacity(head_len);
    let mut tail: Vec<u8> = Vec::new();
    for arg in args {
        match arg {
            EthValue::Address(address) => {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(address.as_slice());
                head.extend_from_slice(&word);
            }
            EthValue::Uint(value) => head.extend_from_slice(&value.to_be_bytes::<32>()),
            EthValue::Bytes32(word) => head.extend_from_slice(word.as_slice()),
            EthValue::Bool(flag) => {
                let mut word = [0u8; 32];
                word[31] = *flag as u8;
                head.extend_from_slice(&word);
            }
            EthValue::Str(text) => {
                head.extend_from_slice(&offset_word(head_len + tail.len()));
                append_dynamic(&mut tail, text.as_bytes());
            }
            EthValue::Bytes(bytes) => {
                head.extend_from_slice(&offset_word(head_len + tail.len()));
                append_dynamic(&mut tail, bytes);
            }
        }
    }
    head.extend_from_slice(&tail);
    head
}

fn offset_word(offset: usize) -> [u8; 32] {
    U256::from(offset).to_be_bytes::<32>()
}

fn append_dynamic(tail: &mut Vec<u8>, data: &[u8]) {
    tail.extend_from_slice(&U256::from(data.len()).to_be_bytes::<32>());
    tail.extend_from_slice(data);
    let padding = (32 - data.len() % 32) % 32;
    tail.resize(tail.len() + padding, 0);
}

/// ASCII `text` right-padded with zeros into one 32-byte word.
///
/// The companion of ethers' `formatBytes32String`; price feed keys are
/// passed to the contracts in this form.
pub fn format_bytes32_string(text: &str) -> Result<B256> {
    let bytes = text.as_bytes();
    if bytes.len() > 31 {
        bail!("String too long for bytes32: {text}");
    }
    let mut word = [0u8; 32];
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::from(word))
}

/// The `index`-th 32-byte word of a return payload.
pub fn word_at(data: &[u8], index: usize) -> Result<B256> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        bail!(
            "Return data too short: wanted word {index}, got {} bytes",
            data.len()
        );
    }
    Ok(B256::from_slice(&data[start..end]))
}

pub fn word_to_address(word: B256) -> Address {
    Address::from_slice(&word[12..])
}

pub fn word_to_u256(word: B256) -> U256 {
    U256::from_be_bytes(word.0)
}

/// Decodes a single returned `address`.
pub fn decode_address(data: &[u8]) -> Result<Address> {
    Ok(word_to_address(word_at(data, 0)?))
}

/// Decodes a single returned `uint256`.
pub fn decode_u256(data: &[u8]) -> Result<U256> {
    Ok(word_to_u256(word_at(data, 0)?))
}

/// Decodes a single returned unsigned integer that must fit in 64 bits.
pub fn decode_u64(data: &[u8]) -> Result<u64> {
    let value = decode_u256(data)?;
    u64::try_from(value).context("Returned value does not fit in u64")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_signature_from_arg_kinds() {
        assert_eq!(build_signature("initialize", &[]), "initialize()");
        assert_eq!(
            build_signature(
                "initialize",
                &["Perp".into(), "1".into(), U256::from(1u64).into()]
            ),
            "initialize(string,string,uint256)"
        );
        assert_eq!(
            build_signature(
                "initialize",
                &[Address::ZERO.into(), B256::ZERO.into(), true.into()]
            ),
            "initialize(address,bytes32,bool)"
        );
    }

    #[test]
    fn test_selector_known_vectors() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
        assert_eq!(hex::encode(selector("decimals()")), "313ce567");
        assert_eq!(hex::encode(selector("latestRoundData()")), "feaf968c");
    }

    #[test]
    fn test_encode_static_args() {
        let to = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
            .parse::<Address>()
            .unwrap();
        let encoded = hex::encode(encode_call(
            "transfer(address,uint256)",
            &[to.into(), U256::from(1_000_000_000_000_000_000u64).into()],
        ));

        assert!(encoded.starts_with("a9059cbb"));
        // 8 selector chars + 2 * 64 word chars.
        assert_eq!(encoded.len(), 8 + 128);
        assert_eq!(
            &encoded[8..72],
            "00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8"
        );
        assert_eq!(
            &encoded[72..136],
            "0000000000000000000000000000000000000000000000000de0b6b3a7640000"
        );
    }

    #[test]
    fn test_encode_bool_words() {
        let encoded = hex::encode(encode_args(&[true.into(), false.into()]));
        assert_eq!(
            &encoded[..64],
            "0000000000000000000000000000000000000000000000000000000000000001"
        );
        assert_eq!(
            &encoded[64..],
            "0000000000000000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_encode_dynamic_string() {
        let encoded = hex::encode(encode_args(&["Perp".into()]));
        // Offset to the tail: 1 head word * 32 bytes = 0x20.
        assert_eq!(
            &encoded[..64],
            "0000000000000000000000000000000000000000000000000000000000000020"
        );
        // Length 4, then "Perp" zero-padded to a full word.
        assert_eq!(
            &encoded[64..128],
            "0000000000000000000000000000000000000000000000000000000000000004"
        );
        assert_eq!(
            &encoded[128..],
            "5065727000000000000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_encode_mixed_dynamic_offsets() {
        // The (string,string,uint256) shape used to initialize the gateway.
        let encoded = hex::encode(encode_args(&[
            "Perp".into(),
            "1".into(),
            U256::from(42u64).into(),
        ]));

        // Head: offset 0x60, offset 0xa0, then the chain id.
        assert_eq!(&encoded[56..64], "00000060");
        assert_eq!(&encoded[120..128], "000000a0");
        assert_eq!(&encoded[184..192], "0000002a");
        // First tail block holds "Perp", second holds "1".
        assert_eq!(&encoded[248..256], "00000004");
        assert_eq!(&encoded[376..384], "00000001");
        assert_eq!(&encoded[384..386], "31");
    }

    #[test]
    fn test_format_bytes32_string() {
        let word = format_bytes32_string("ETH").unwrap();
        assert_eq!(
            hex::encode(word),
            "4554480000000000000000000000000000000000000000000000000000000000"
        );
        assert!(format_bytes32_string(&"x".repeat(32)).is_err());
    }

    #[test]
    fn test_decode_helpers() {
        let owner = Address::repeat_byte(0xab);
        let payload = encode_args(&[owner.into()]);
        assert_eq!(decode_address(&payload).unwrap(), owner);

        let payload = encode_args(&[U256::from(123_456u64).into()]);
        assert_eq!(decode_u256(&payload).unwrap(), U256::from(123_456u64));
        assert_eq!(decode_u64(&payload).unwrap(), 123_456);

        let payload = encode_args(&[U256::MAX.into()]);
        assert!(decode_u64(&payload).is_err());

        assert!(word_at(&payload, 1).is_err());
    }
}
