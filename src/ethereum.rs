//! Organization wallet address handling.
//!
//! Organizations can be addressed either by id or by the wallet address they
//! registered with. Addresses are stored normalized so lookups are exact.

use anyhow::{Context, Result};
use std::fmt;
use uuid::Uuid;

/// Ethereum addresses are 20 bytes = 40 hex characters.
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Validates and normalizes an Ethereum address.
///
/// Returns a lowercase hex string without the 0x prefix.
///
/// # Errors
///
/// Returns an error if:
/// - The address is not exactly 40 hex characters (excluding 0x prefix)
/// - The address contains non-hex characters
/// - The address is the zero address
///
/// # Examples
///
/// ```
/// use zkp_batch_membership::ethereum::normalize_address;
///
/// let normalized = normalize_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
/// assert_eq!(normalized, "742d35cc6634c0532925a3b844bc454e4438f44e");
/// ```
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if stripped.len() != ADDRESS_HEX_LENGTH {
        return Err(anyhow::anyhow!(
            "Invalid wallet address '{}': must be {} hex characters (got {})",
            trimmed,
            ADDRESS_HEX_LENGTH,
            stripped.len()
        ));
    }
    hex::decode(stripped)
        .with_context(|| format!("Invalid wallet address '{trimmed}': contains non-hex characters"))?;

    let normalized = stripped.to_lowercase();

    if normalized.chars().all(|c| c == '0') {
        return Err(anyhow::anyhow!(
            "Wallet address cannot be the zero address"
        ));
    }

    Ok(normalized)
}

/// Checksum-free display form: `0x` followed by the normalized address.
#[must_use]
pub fn display_address(normalized: &str) -> String {
    format!("0x{normalized}")
}

/// How a request names its organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizationRef {
    Id(Uuid),
    /// Normalized wallet address.
    Wallet(String),
}

impl OrganizationRef {
    /// Parses an organization id or a wallet address.
    ///
    /// # Examples
    ///
    /// ```
    /// use zkp_batch_membership::ethereum::OrganizationRef;
    ///
    /// let by_wallet = OrganizationRef::parse("0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap();
    /// assert!(matches!(by_wallet, OrganizationRef::Wallet(_)));
    ///
    /// let by_id = OrganizationRef::parse("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
    /// assert!(matches!(by_id, OrganizationRef::Id(_)));
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(anyhow::anyhow!("Organization reference cannot be empty"));
        }
        if let Ok(id) = Uuid::parse_str(trimmed) {
            return Ok(Self::Id(id));
        }
        normalize_address(trimmed)
            .map(Self::Wallet)
            .context("Organization reference is neither an id nor a wallet address")
    }
}

impl fmt::Display for OrganizationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Wallet(wallet) => write!(f, "{}", display_address(wallet)),
        }
    }
}
