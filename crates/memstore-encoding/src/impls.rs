use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use memstore_types::{CollectionId, ObjectId};

use crate::error::{DecodeError, DecodeResult};
use crate::{Decode, Decoder, Encode, Encoder};

macro_rules! primitive {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Encode for $ty {
            fn encode(&self, enc: &mut Encoder) {
                enc.$put(*self);
            }
        }

        impl Decode for $ty {
            fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
                dec.$get()
            }
        }
    };
}

primitive!(u8, put_u8, get_u8);
primitive!(i8, put_i8, get_i8);
primitive!(bool, put_bool, get_bool);
primitive!(u32, put_u32, get_u32);
primitive!(u64, put_u64, get_u64);
primitive!(i64, put_i64, get_i64);

impl Encode for str {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_str(self);
    }
}

impl Encode for String {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_str(self);
    }
}

impl Decode for String {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        dec.get_string()
    }
}

impl Encode for Bytes {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_bytes(self);
    }
}

impl Decode for Bytes {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        dec.get_bytes()
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_len(self.len());
        for (k, v) in self {
            k.encode(enc);
            v.encode(enc);
        }
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        let count = dec.get_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let k = K::decode(dec)?;
            let v = V::decode(dec)?;
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<T: Encode> Encode for BTreeSet<T> {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_len(self.len());
        for item in self {
            item.encode(enc);
        }
    }
}

impl<T: Decode + Ord> Decode for BTreeSet<T> {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        let count = dec.get_count()?;
        let mut set = BTreeSet::new();
        for _ in 0..count {
            set.insert(T::decode(dec)?);
        }
        Ok(set)
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

const OBJECT_ID_VERSION: u8 = 1;

impl Encode for ObjectId {
    fn encode(&self, enc: &mut Encoder) {
        enc.envelope(OBJECT_ID_VERSION, 1, |e| {
            e.put_bool(self.max);
            e.put_i8(self.shard);
            e.put_i64(self.pool);
            e.put_u32(self.hash);
            e.put_str(&self.namespace);
            e.put_str(&self.key);
            e.put_str(&self.name);
            e.put_u64(self.snap);
            e.put_u64(self.generation);
        });
    }
}

impl Decode for ObjectId {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        dec.envelope("object id", OBJECT_ID_VERSION, |_, d| {
            let max = d.get_bool()?;
            let shard = d.get_i8()?;
            let pool = d.get_i64()?;
            let hash = d.get_u32()?;
            let namespace = d.get_string()?;
            let key = d.get_string()?;
            let name = d.get_string()?;
            let snap = d.get_u64()?;
            let generation = d.get_u64()?;
            Ok(ObjectId {
                pool,
                namespace,
                key,
                name,
                snap,
                hash,
                generation,
                shard,
                max,
            })
        })
    }
}

impl Encode for CollectionId {
    fn encode(&self, enc: &mut Encoder) {
        enc.put_str(self.as_str());
    }
}

impl Decode for CollectionId {
    fn decode(dec: &mut Decoder<'_>) -> DecodeResult<Self> {
        let name = dec.get_string()?;
        let len = name.len() as u64;
        CollectionId::new(name).map_err(|_| DecodeError::InvalidValue {
            what: "collection id length",
            value: len,
        })
    }
}
