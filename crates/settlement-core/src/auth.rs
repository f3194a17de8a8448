//! Capability checks, signature verification and nonce tracking.
//!
//! Role wiring lives outside the engine: components only ask
//! `AccessControl::has_role`. Off-chain authorizations (mint authorizations,
//! redeem orders) are ed25519 signatures over domain-separated SHA-256
//! digests; a signer's address is derived from its public key.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::SettlementError;
use crate::types::{hex_bytes, Address, PoolId};
use crate::SettlementResult;

hex_bytes!(
    /// ed25519 verifying key.
    PublicKey,
    32
);

hex_bytes!(
    /// ed25519 signature.
    SignatureBytes,
    64
);

impl PublicKey {
    pub fn to_address(&self) -> Address {
        Address::derive(b"ed25519", &self.0)
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May create pools.
    PoolCreator,
    /// Administers a pool alongside its owner.
    PoolAdmin,
    /// Passed identity checks; may buy tranche tokens.
    Investor,
    /// Off-chain distribution operator (pre-distribute / disburse).
    Backend,
    /// Agent wallet acting for a pool validator.
    WhitelistedValidator,
    /// May conclude loans.
    RepaymentRouter,
    /// May toggle the redeem-disabled flag.
    RedeemAdmin,
}

/// External role lookup. `pool == None` asks for a global grant.
pub trait AccessControl {
    fn has_role(&self, subject: &Address, role: Role, pool: Option<PoolId>) -> bool;
}

/// In-memory role table. A global grant satisfies every pool-scoped query.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    grants: BTreeSet<(Address, Role, Option<PoolId>)>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, subject: Address, role: Role, pool: Option<PoolId>) {
        debug!(%subject, ?role, ?pool, "role granted");
        self.grants.insert((subject, role, pool));
    }

    pub fn revoke(&mut self, subject: Address, role: Role, pool: Option<PoolId>) {
        self.grants.remove(&(subject, role, pool));
    }
}

impl AccessControl for RoleRegistry {
    fn has_role(&self, subject: &Address, role: Role, pool: Option<PoolId>) -> bool {
        self.grants.contains(&(*subject, role, None))
            || (pool.is_some() && self.grants.contains(&(*subject, role, pool)))
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// SHA-256 over a domain tag and length-prefixed parts.
pub fn message_digest(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((domain.len() as u32).to_be_bytes());
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Pure signature check; malformed keys verify as false.
pub fn verify(signer: &PublicKey, message: &[u8], signature: &SignatureBytes) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&signer.0) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.0);
    key.verify(message, &signature).is_ok()
}

/// Signing key held by validators, investors and test fixtures.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Deterministic key for a named party.
    pub fn from_name(name: &str) -> Self {
        Self::from_seed(&message_digest(b"party-key", &[name.as_bytes()]))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn address(&self) -> Address {
        self.public_key().to_address()
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.address())
    }
}

// ---------------------------------------------------------------------------
// Nonces
// ---------------------------------------------------------------------------

/// Last consumed nonce per signer.
#[derive(Debug, Clone, Default)]
pub struct NonceStore {
    last: BTreeMap<Address, u64>,
}

impl NonceStore {
    /// Next nonce accepted by `consume_exact`: 0 for a fresh signer.
    pub fn next_expected(&self, signer: &Address) -> u64 {
        self.last.get(signer).map(|n| n + 1).unwrap_or(0)
    }

    pub fn last(&self, signer: &Address) -> Option<u64> {
        self.last.get(signer).copied()
    }

    /// Accept only the signer's next sequential nonce.
    pub fn consume_exact(&mut self, signer: Address, nonce: u64) -> SettlementResult<()> {
        let expected = self.next_expected(&signer);
        if nonce != expected {
            return Err(SettlementError::NonceMismatch {
                signer,
                expected,
                actual: nonce,
            });
        }
        self.last.insert(signer, nonce);
        Ok(())
    }

    /// Accept any nonce strictly above the last consumed one.
    pub fn consume_increasing(&mut self, signer: Address, nonce: u64) -> SettlementResult<()> {
        if let Some(last) = self.last.get(&signer) {
            if nonce <= *last {
                return Err(SettlementError::NonceReplay { signer, nonce });
            }
        }
        self.last.insert(signer, nonce);
        Ok(())
    }
}
