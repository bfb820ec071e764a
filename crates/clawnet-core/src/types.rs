use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{ADDRESS_CHECKSUM_LEN, ADDRESS_PREFIX, ADDRESS_VERSION, DID_PREFIX};
use crate::error::ClawError;

/// Milliseconds since the Unix epoch (UTC).
pub type Timestamp = i64;

/// Per-issuer event sequence number. Starts at 1, strictly increasing.
pub type Nonce = u64;

// ── EventHash ────────────────────────────────────────────────────────────────

/// 32-byte content address: SHA-256 of the canonical envelope bytes with
/// `sig` and `hash` removed. Hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHash(pub [u8; 32]);

impl EventHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ClawError> {
        let bytes = hex::decode(s)
            .map_err(|_| ClawError::Serialization(format!("invalid hash hex: {s}")))?;
        if bytes.len() != 32 {
            return Err(ClawError::Serialization(format!(
                "hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// SHA-256 of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHash({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for EventHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EventHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── Did ──────────────────────────────────────────────────────────────────────

/// Decentralized identifier: `did:claw:<multibase-base58btc(ed25519-pk)>`.
///
/// The string form is validated here; public-key extraction lives in
/// clawnet-crypto.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    pub fn new(s: impl Into<String>) -> Result<Self, ClawError> {
        let s = s.into();
        let suffix = s
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| ClawError::MalformedDid(s.clone()))?;
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ClawError::MalformedDid(s.clone()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The multibase-encoded public key portion after `did:claw:`.
    pub fn method_specific_id(&self) -> &str {
        &self.0[DID_PREFIX.len()..]
    }
}

impl TryFrom<String> for Did {
    type Error = ClawError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Did::new(s)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> String {
        did.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Did({})", self.0)
    }
}

// ── Address ──────────────────────────────────────────────────────────────────

/// Wallet address: `claw` + base58btc(version ‖ pk ‖ SHA256(pk)[0..4]).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and checksum-validate an address string.
    pub fn new(s: impl Into<String>) -> Result<Self, ClawError> {
        let s = s.into();
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| ClawError::Serialization(format!("invalid address: {s}")))?;
        let bytes = bs58::decode(body)
            .into_vec()
            .map_err(|_| ClawError::Serialization(format!("invalid address: {s}")))?;
        if bytes.len() != 1 + 32 + ADDRESS_CHECKSUM_LEN || bytes[0] != ADDRESS_VERSION {
            return Err(ClawError::Serialization(format!("invalid address: {s}")));
        }
        let pk = &bytes[1..33];
        let checksum: [u8; 32] = Sha256::digest(pk).into();
        if checksum[..ADDRESS_CHECKSUM_LEN] != bytes[33..] {
            return Err(ClawError::Serialization(format!(
                "address checksum mismatch: {s}"
            )));
        }
        Ok(Self(s))
    }

    /// Derive the address for a raw Ed25519 public key.
    pub fn from_public_key(pk: &[u8; 32]) -> Self {
        let checksum: [u8; 32] = Sha256::digest(pk).into();
        let mut body = Vec::with_capacity(1 + 32 + ADDRESS_CHECKSUM_LEN);
        body.push(ADDRESS_VERSION);
        body.extend_from_slice(pk);
        body.extend_from_slice(&checksum[..ADDRESS_CHECKSUM_LEN]);
        Self(format!("{}{}", ADDRESS_PREFIX, bs58::encode(body).into_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = ClawError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::new(s)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> String {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.0[..self.0.len().min(12)])
    }
}

// ── Amount ───────────────────────────────────────────────────────────────────

/// Arbitrary-precision non-negative token amount. Decimal string on the
/// wire, `BigUint` in memory. Balances must never be forced into u64/u128.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    pub fn from_u64(v: u64) -> Self {
        Self(BigUint::from(v))
    }

    /// Subtraction that refuses to underflow.
    pub fn checked_sub(&self, rhs: &Amount) -> Option<Amount> {
        if self.0 >= rhs.0 {
            Some(Amount(&self.0 - &rhs.0))
        } else {
            None
        }
    }

    /// Lossy conversion used only for tiered threshold comparisons.
    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(&self.0).ok()
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;
    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl FromStr for Amount {
    type Err = ClawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClawError::Serialization(format!("invalid amount: {s:?}")));
        }
        let v = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| ClawError::Serialization(format!("invalid amount: {s:?}")))?;
        Ok(Self(v))
    }
}

impl TryFrom<String> for Amount {
    type Error = ClawError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Amount> for String {
    fn from(a: Amount) -> String {
        a.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_str_radix(10))
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0.to_str_radix(10))
    }
}
