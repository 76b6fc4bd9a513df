use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Name of a collection.
///
/// Collections are flat buckets of objects; a storage node typically names
/// them after the placement group they hold (`"1.2f_head"`) plus a
/// distinguished `"meta"` collection. The store treats the name as opaque,
/// it only has to be non-empty and free of NUL and `/` characters.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(String);

impl CollectionId {
    /// Create a collection id, validating the name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() || name.contains('\0') || name.contains('/') {
            return Err(TypeError::InvalidCollectionId(name));
        }
        Ok(Self(name))
    }

    /// The well-known metadata collection.
    pub fn meta() -> Self {
        Self("meta".to_string())
    }

    /// Collection for the head objects of placement group `pool.seed`.
    pub fn pg_head(pool: i64, seed: u32) -> Self {
        Self(format!("{pool}.{seed:x}_head"))
    }

    /// The collection name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the metadata collection.
    pub fn is_meta(&self) -> bool {
        self.0 == "meta"
    }
}

impl fmt::Debug for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionId({})", self.0)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CollectionId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert_eq!(CollectionId::new("1.0_head").unwrap().as_str(), "1.0_head");
        assert!(CollectionId::meta().is_meta());
        assert_eq!(CollectionId::pg_head(3, 0x2f).as_str(), "3.2f_head");
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(CollectionId::new("").is_err());
        assert!(CollectionId::new("a/b").is_err());
        assert_eq!(
            CollectionId::new("nul\0"),
            Err(TypeError::InvalidCollectionId("nul\0".into()))
        );
    }

    #[test]
    fn parse_from_str() {
        let cid: CollectionId = "2.1_head".parse().unwrap();
        assert_eq!(cid.to_string(), "2.1_head");
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = CollectionId::new("1.0_head").unwrap();
        let b = CollectionId::new("1.1_head").unwrap();
        assert!(a < b);
    }

    #[test]
    fn serde_roundtrip() {
        let cid = CollectionId::pg_head(1, 7);
        let json = serde_json::to_string(&cid).unwrap();
        let parsed: CollectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(cid, parsed);
    }
}
