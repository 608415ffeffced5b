use alloy::primitives::Address;
use std::collections::HashSet;
use std::str::FromStr;

/// Infrastructure contracts whose balance churn is not tracked.
pub const EXCLUDED_CONTRACTS: &[(&str, &str)] = &[
    ("0x7B8d68f90dAaC67C577936d3Ce451801864EF189", "SuperformRouter"),
    ("0xD85ec15A9F814D6173bF1a89273bFB3964aAdaEC", "SuperformFactory"),
    ("0xBBBBBd1bA9b47a0A5b86E3f0eFC5857CE6432Bbb", "Morpho USR lending market"),
    ("0xEfE170fd8b2621C59B051a6637f64D6a87FB4f4A", "Morpho ERC4626Form USR Vault"),
];

/// Set of addresses skipped during balance enrichment.
///
/// Addresses are stored as 20-byte values, so membership is independent of
/// the hex casing (checksummed or lowercase) the address arrived in.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    addresses: HashSet<Address>,
}

impl ExclusionFilter {
    /// Build the filter from the built-in contracts plus operator-supplied extras.
    pub fn new(extra: &[String]) -> eyre::Result<Self> {
        let mut addresses = HashSet::with_capacity(EXCLUDED_CONTRACTS.len() + extra.len());

        for (address, name) in EXCLUDED_CONTRACTS {
            let parsed = parse_address(address)?;
            tracing::debug!(address = %address, name = %name, "Excluding infrastructure contract");
            addresses.insert(parsed);
        }

        for address in extra {
            addresses.insert(parse_address(address)?);
        }

        Ok(Self { addresses })
    }

    /// Whether a parsed address is a known infrastructure contract.
    pub fn is_excluded(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn count(&self) -> usize {
        self.addresses.len()
    }
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        let addresses = EXCLUDED_CONTRACTS
            .iter()
            .filter_map(|(address, _)| parse_address(address).ok())
            .collect();
        Self { addresses }
    }
}

/// Parse a hex address, normalizing case first so checksum casing is never enforced.
pub fn parse_address(address: &str) -> eyre::Result<Address> {
    let normalized = address.trim().to_lowercase();
    if !normalized.starts_with("0x") || normalized.len() != 42 {
        return Err(eyre::eyre!("Invalid address '{}'", address));
    }
    Address::from_str(&normalized).map_err(|e| eyre::eyre!("Invalid address '{}': {}", address, e))
}
