//! Contract Address
//!
//! Strictly typed, normalized address accepted by the aggregator.
//! Two forms are recognised:
//! - EVM contract address: `0x` followed by 40 hex characters
//! - Token UID: 64 hex characters (Hathor-style NFT identifiers)
//!
//! Both are lowercased so that cache and coalescing keys are stable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of an EVM address body (without `0x`)
const EVM_ADDRESS_HEX_LEN: usize = 40;

/// Length of a token UID
const TOKEN_UID_HEX_LEN: usize = 64;

/// Address validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address is empty")]
    Empty,

    #[error("Invalid address length {0}: expected 0x + 40 hex or 64 hex characters")]
    InvalidLength(usize),

    #[error("Address contains non-hex character '{0}'")]
    InvalidCharacter(char),
}

/// Which family an address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    /// `0x`-prefixed 20-byte contract address
    Evm,
    /// 32-byte token UID
    TokenUid,
}

/// A validated, lowercase contract address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractAddress(String);

impl ContractAddress {
    /// Validate and normalize a raw address string
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let lower = trimmed.to_ascii_lowercase();
        let body = match lower.strip_prefix("0x") {
            Some(body) if body.len() == EVM_ADDRESS_HEX_LEN => body,
            Some(_) => return Err(AddressError::InvalidLength(lower.len())),
            None if lower.len() == TOKEN_UID_HEX_LEN => lower.as_str(),
            None => return Err(AddressError::InvalidLength(lower.len())),
        };

        if let Some(bad) = body.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidCharacter(bad));
        }

        Ok(Self(lower))
    }

    /// The normalized address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address family
    pub fn kind(&self) -> AddressKind {
        if self.0.starts_with("0x") {
            AddressKind::Evm
        } else {
            AddressKind::TokenUid
        }
    }

    /// Abbreviated form for display: first 8 and last 8 characters
    pub fn short(&self) -> String {
        let s = &self.0;
        format!("{}...{}", &s[..8], &s[s.len() - 8..])
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContractAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContractAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContractAddress> for String {
    fn from(address: ContractAddress) -> Self {
        address.0
    }
}

impl AsRef<str> for ContractAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
