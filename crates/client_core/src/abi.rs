//! Solidity interface of the voting contract and the conversions between its
//! ABI types and the domain types.
//!
//! Every decoder fails with [`LedgerError::Decode`] instead of trusting
//! loosely typed data.

use alloy_primitives::{hex, Address, U256};
use alloy_sol_types::sol;

use crate::error::LedgerError;

sol! {
    function candidatesCount() external view returns (uint256);
    #[derive(Debug)]
    function getCandidate(uint256 id) external view returns (string name, uint256 voteCount);
    function voters(address voter) external view returns (uint256);
    function vote(uint256 candidateId) external;
    function addCandidate(string name) external;
}

pub fn decode_error(err: alloy_sol_types::Error) -> LedgerError {
    LedgerError::Decode(err.to_string())
}

/// Candidate ids and vote counts are uint256 on chain and u64 locally.
pub fn to_u64(value: U256, what: &str) -> Result<u64, LedgerError> {
    u64::try_from(value)
        .map_err(|_| LedgerError::Decode(format!("{what} {value} does not fit in 64 bits")))
}

pub fn parse_address(raw: &str) -> Result<Address, LedgerError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| LedgerError::Decode(format!("invalid address {raw:?}: {e}")))
}

/// Lowercase, `0x`-prefixed; the form JSON-RPC parameters are sent in.
pub fn encode_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode_prefixed(data)
}

pub fn decode_hex(raw: &str) -> Result<Vec<u8>, LedgerError> {
    hex::decode(raw).map_err(|e| LedgerError::Decode(format!("invalid hex {raw:?}: {e}")))
}

/// Parse a JSON-RPC hex quantity such as `0x1`.
pub fn parse_quantity(raw: &str) -> Result<u64, LedgerError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Decode(format!("quantity {raw:?} is missing 0x prefix")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::Decode(format!("invalid quantity {raw:?}: {e}")))
}
