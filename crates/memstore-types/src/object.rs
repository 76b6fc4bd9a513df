use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Snapshot id of the head (writable) version of an object.
pub const NOSNAP: u64 = u64::MAX;

/// Generation of an object that is not a rollback generation.
pub const NO_GEN: u64 = u64::MAX;

/// Shard of an object in a replicated (non-erasure-coded) pool.
pub const NO_SHARD: i8 = -1;

/// Generalized object identifier.
///
/// An `ObjectId` names an object inside a collection. Besides the
/// human-readable name it carries a 32-bit placement `hash` that spreads
/// related names across the keyspace. Ordering is *hash-bitwise*: objects
/// sort by pool first, then by the bit-reversed hash, and only then by
/// namespace, locator key and name. Listing a collection therefore walks
/// the hash space in the same order a split by hash bits partitions it.
///
/// Two sentinels bound the order: [`ObjectId::min`] sorts before every real
/// object and [`ObjectId::max`] after every real object.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    /// Pool the object belongs to.
    pub pool: i64,
    /// Namespace within the pool.
    pub namespace: String,
    /// Locator key. When empty the name is used as the effective key.
    pub key: String,
    /// Object name.
    pub name: String,
    /// Snapshot id, [`NOSNAP`] for the head object.
    pub snap: u64,
    /// Placement hash.
    pub hash: u32,
    /// Rollback generation, [`NO_GEN`] for ordinary objects.
    pub generation: u64,
    /// Erasure-code shard, [`NO_SHARD`] for replicated pools.
    pub shard: i8,
    /// Upper-bound sentinel flag.
    pub max: bool,
}

impl ObjectId {
    /// Create a head object identifier, deriving the placement hash from the name.
    pub fn new(pool: i64, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let hash = placement_hash(&name);
        Self {
            pool,
            namespace: namespace.into(),
            key: String::new(),
            name,
            snap: NOSNAP,
            hash,
            generation: NO_GEN,
            shard: NO_SHARD,
            max: false,
        }
    }

    /// Shorthand for an object in pool 0 with an empty namespace.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(0, "", name)
    }

    /// Replace the placement hash.
    pub fn with_hash(mut self, hash: u32) -> Self {
        self.hash = hash;
        self
    }

    /// Set a locator key and re-derive the placement hash from it.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self.hash = placement_hash(self.effective_key());
        self
    }

    /// Set the snapshot id.
    pub fn with_snap(mut self, snap: u64) -> Self {
        self.snap = snap;
        self
    }

    /// Set the shard.
    pub fn with_shard(mut self, shard: i8) -> Self {
        self.shard = shard;
        self
    }

    /// Set the rollback generation.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// The smallest identifier in hash-bitwise order.
    pub fn min() -> Self {
        Self {
            pool: i64::MIN,
            namespace: String::new(),
            key: String::new(),
            name: String::new(),
            snap: 0,
            hash: 0,
            generation: 0,
            shard: i8::MIN,
            max: false,
        }
    }

    /// The largest identifier in hash-bitwise order.
    pub fn max() -> Self {
        Self {
            max: true,
            ..Self::min()
        }
    }

    /// Returns `true` for the lower-bound sentinel.
    pub fn is_min(&self) -> bool {
        *self == Self::min()
    }

    /// Returns `true` for the upper-bound sentinel.
    pub fn is_max(&self) -> bool {
        self.max
    }

    /// The key used for hashing and ordering: the locator if set, else the name.
    pub fn effective_key(&self) -> &str {
        if self.key.is_empty() {
            &self.name
        } else {
            &self.key
        }
    }

    /// The hash with its bits reversed; this is what orders objects.
    pub fn bitwise_key(&self) -> u32 {
        self.hash.reverse_bits()
    }

    /// Returns `true` if the low `bits` bits of the hash equal those of `rem`.
    ///
    /// This is the predicate used to split a collection in two.
    pub fn matches(&self, bits: u32, rem: u32) -> bool {
        let mask = if bits >= 32 {
            u32::MAX
        } else {
            (1u32 << bits) - 1
        };
        self.hash & mask == rem & mask
    }

    /// Placement hash as 8 hex characters.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash.to_be_bytes())
    }

    /// Parse a placement hash printed by [`ObjectId::hash_hex`].
    pub fn parse_hash(s: &str) -> Result<u32, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidLength {
                expected: 4,
                actual: bytes.len(),
            })?;
        Ok(u32::from_be_bytes(arr))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::min()
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.max
            .cmp(&other.max)
            .then_with(|| self.shard.cmp(&other.shard))
            .then_with(|| self.pool.cmp(&other.pool))
            .then_with(|| self.bitwise_key().cmp(&other.bitwise_key()))
            .then_with(|| self.namespace.cmp(&other.namespace))
            .then_with(|| self.effective_key().cmp(other.effective_key()))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.snap.cmp(&other.snap))
            .then_with(|| self.generation.cmp(&other.generation))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max {
            return write!(f, "MAX");
        }
        if self.is_min() {
            return write!(f, "MIN");
        }
        let snap = if self.snap == NOSNAP {
            "head".to_string()
        } else {
            format!("{:x}", self.snap)
        };
        write!(
            f,
            "{}#{}:{}:{}:{}:{}:{}",
            self.shard,
            self.pool,
            self.hash_hex(),
            self.namespace,
            self.key,
            self.name,
            snap
        )?;
        if self.generation != NO_GEN {
            write!(f, ":{:x}", self.generation)?;
        }
        Ok(())
    }
}

/// 32-bit placement hash of a key: the first four bytes of its BLAKE3 digest.
fn placement_hash(key: &str) -> u32 {
    let digest = blake3::hash(key.as_bytes());
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
