use anyhow::{anyhow, Result};
use ethers::types::Bytes;
use ethers::utils::id;

/// First four bytes of the keccak hash of a function signature.
pub type Selector = [u8; 4];

/// Accepts either a full signature (`verify(bytes)`) or a hex selector
/// (`0x8e760afe`).
pub fn parse_selector(value: &str) -> Result<Selector> {
    let value = value.trim();
    if let Some(hex_part) = value.strip_prefix("0x") {
        let bytes = hex::decode(hex_part)?;
        return bytes
            .try_into()
            .map_err(|_| anyhow!("selector {value} is not 4 bytes long"));
    }
    if value.contains('(') && value.ends_with(')') {
        return Ok(id(value));
    }
    Err(anyhow!(
        "{value:?} is neither a function signature nor a 4-byte selector"
    ))
}

/// `selector ++ arguments`.
pub fn encode_call(selector: Selector, arguments: &Bytes) -> Bytes {
    let mut data = Vec::with_capacity(4 + arguments.len());
    data.extend_from_slice(&selector);
    data.extend_from_slice(arguments);
    Bytes::from(data)
}
