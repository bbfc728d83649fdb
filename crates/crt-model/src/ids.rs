#![deny(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{ModelError, Result};
use crate::handle::ReferenceHandle;

/// Identifier of a record in the persistence layer.
///
/// Cheap to clone; the same id is held by the batch context, the filed
/// record and every link that resolves to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageId(Arc<str>);

impl StorageId {
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ModelError::InvalidStorageId);
        }
        Ok(Self(Arc::from(trimmed)))
    }

    /// Deterministic id for a natural identifier.
    ///
    /// Uses the first 16 bytes of the SHA-256 digest of the encoded handle,
    /// rendered as lowercase hex.
    pub fn derive(handle: &ReferenceHandle) -> Self {
        let digest = Sha256::digest(handle.encode());
        Self(Arc::from(hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for StorageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for StorageId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StorageId::new(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ResourceKind;

    #[test]
    fn derive_is_deterministic() {
        let handle = ReferenceHandle::new(ResourceKind::Patient, "P1").unwrap();
        let a = StorageId::derive(&handle);
        let b = StorageId::derive(&handle);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn derive_depends_on_kind() {
        let patient = ReferenceHandle::new(ResourceKind::Patient, "1").unwrap();
        let location = ReferenceHandle::new(ResourceKind::Location, "1").unwrap();
        assert_ne!(StorageId::derive(&patient), StorageId::derive(&location));
    }

    #[test]
    fn blank_is_rejected() {
        assert!(StorageId::new(" ").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let id = StorageId::new("S-100").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"S-100\"");
        let back: StorageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
