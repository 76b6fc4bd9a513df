use memstore_encoding::DecodeError;
use memstore_types::{CollectionId, ObjectId};

/// POSIX error numbers (Linux numbering) used in operation statuses.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENOTEMPTY: i32 = 39;
    pub const ENODATA: i32 = 61;
    pub const ESHUTDOWN: i32 = 108;
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionId),

    /// The object does not exist in the collection.
    #[error("object not found: {oid} in {cid}")]
    ObjectNotFound { cid: CollectionId, oid: ObjectId },

    /// The attribute is not set.
    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(CollectionId),

    #[error("object already exists: {oid} in {cid}")]
    ObjectExists { cid: CollectionId, oid: ObjectId },

    #[error("collection not empty: {0}")]
    CollectionNotEmpty(CollectionId),

    /// An object or attribute name exceeds the configured limit.
    #[error("{what} name too long: {len} > {max}")]
    NameTooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The store has been stopped.
    #[error("store is shut down")]
    ShutDown,

    /// Persisted data could not be decoded. Never recovered from.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Negative errno for this error, as reported in transaction statuses.
    pub fn errno(&self) -> i32 {
        use errno::*;
        -match self {
            Self::CollectionNotFound(_) | Self::ObjectNotFound { .. } => ENOENT,
            Self::AttributeNotFound(_) => ENODATA,
            Self::CollectionExists(_) | Self::ObjectExists { .. } => EEXIST,
            Self::CollectionNotEmpty(_) => ENOTEMPTY,
            Self::NameTooLong { .. } => ENAMETOOLONG,
            Self::InvalidArgument(_) | Self::InvalidConfig(_) => EINVAL,
            Self::ShutDown => ESHUTDOWN,
            Self::Decode(_) | Self::Io(_) => EIO,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_negative_posix() {
        let cid = CollectionId::meta();
        assert_eq!(StoreError::CollectionNotFound(cid.clone()).errno(), -2);
        assert_eq!(StoreError::AttributeNotFound("a".into()).errno(), -61);
        assert_eq!(StoreError::CollectionNotEmpty(cid).errno(), -39);
        assert_eq!(
            StoreError::NameTooLong {
                what: "object",
                len: 5,
                max: 4
            }
            .errno(),
            -36
        );
        assert_eq!(StoreError::ShutDown.errno(), -108);
    }

    #[test]
    fn decode_errors_map_to_eio() {
        let err: StoreError = DecodeError::TrailingBytes { count: 1 }.into();
        assert_eq!(err.errno(), -errno::EIO);
        assert!(err.to_string().contains("trailing"));
    }
}
