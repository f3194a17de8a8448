use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// All monetary and token amounts, in integral base units.
pub type Money = Decimal;

/// Unix timestamp in seconds.
pub type Moment = u64;

pub const SECONDS_PER_DAY: Moment = 86_400;

/// Fixed-size byte newtype rendered as `0x`-prefixed hex in text and serde.
macro_rules! hex_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn to_hex(&self) -> String {
                format!("0x{}", ::hex::encode(self.0))
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = crate::error::SettlementError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix("0x").unwrap_or(s);
                let bytes = ::hex::decode(raw).map_err(|e| {
                    crate::error::SettlementError::invalid(stringify!($name), e.to_string())
                })?;
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    crate::error::SettlementError::invalid(
                        stringify!($name),
                        format!("expected {} bytes", $len),
                    )
                })?;
                Ok($name(arr))
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(::serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use hex_bytes;

hex_bytes!(
    /// 20-byte account identifier (investors, pools, validators, contracts).
    Address,
    20
);

hex_bytes!(
    /// Deterministic identifier of a tokenized debt agreement.
    AssetId,
    32
);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Domain-separated derivation used for pool and labelled addresses.
    pub fn derive(domain: &[u8], seed: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((domain.len() as u32).to_be_bytes());
        hasher.update(domain);
        hasher.update(seed);
        let digest: [u8; 32] = hasher.finalize().into();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    /// Stable address for a human label such as a currency code.
    pub fn labeled(label: &str) -> Self {
        Self::derive(b"label", label.as_bytes())
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Senior (SOT) or junior (JOT) obligation tranche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tranche {
    Senior,
    Junior,
}

impl Tranche {
    pub fn symbol(&self) -> &'static str {
        match self {
            Tranche::Senior => "SOT",
            Tranche::Junior => "JOT",
        }
    }
}

impl fmt::Display for Tranche {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Key of a fungible ledger: an underlying currency or a pool's tranche token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenId {
    Currency(Address),
    Tranche { pool: PoolId, tranche: Tranche },
}

impl TokenId {
    pub fn tranche(pool: PoolId, tranche: Tranche) -> Self {
        TokenId::Tranche { pool, tranche }
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "fixed_point_ray_27".to_string(),
        },
    }
}
