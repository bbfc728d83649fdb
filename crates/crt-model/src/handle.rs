//! Reference handles.
//!
//! A [`ReferenceHandle`] names a target record by kind and natural identifier
//! before the target has a storage identifier. Lists of handles can hold
//! millions of entries, so handles are stored in their encoded form: the
//! UTF-8 bytes of `"<Kind>/<naturalId>"`.

use std::fmt;

use crate::error::{ModelError, Result};
use crate::kind::ResourceKind;

/// Separator between kind and natural identifier in the encoded form.
pub const HANDLE_SEPARATOR: u8 = b'/';

/// Reference to a target record by natural identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceHandle {
    kind: ResourceKind,
    natural_id: Box<str>,
}

impl ReferenceHandle {
    /// Builds a handle. The natural identifier is trimmed and must not be blank.
    pub fn new(kind: ResourceKind, natural_id: impl AsRef<str>) -> Result<Self> {
        let trimmed = natural_id.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ModelError::InvalidNaturalId {
                kind: kind.to_string(),
            });
        }
        Ok(Self {
            kind,
            natural_id: trimmed.into(),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn natural_id(&self) -> &str {
        &self.natural_id
    }

    /// Size in bytes of the encoded form.
    pub fn encoded_len(&self) -> usize {
        self.kind.as_str().len() + 1 + self.natural_id.len()
    }

    /// Appends the encoded form to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.extend_from_slice(self.kind.as_str().as_bytes());
        out.push(HANDLE_SEPARATOR);
        out.extend_from_slice(self.natural_id.as_bytes());
    }

    pub fn encode(&self) -> Box<[u8]> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out.into_boxed_slice()
    }

    /// Encodes, failing when the result would exceed `limit` bytes.
    pub fn encode_within(&self, limit: usize) -> Result<Box<[u8]>> {
        self.check_size(limit)?;
        Ok(self.encode())
    }

    /// Fails when the encoded form would exceed `limit` bytes.
    pub fn check_size(&self, limit: usize) -> Result<()> {
        let size = self.encoded_len();
        if size > limit {
            return Err(ModelError::HandleEncoding {
                kind: self.kind.to_string(),
                natural_id: self.natural_id.to_string(),
                size,
                limit,
            });
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| ModelError::HandleDecoding {
            reason: e.to_string(),
        })?;
        let (kind, natural_id) =
            text.split_once(HANDLE_SEPARATOR as char)
                .ok_or_else(|| ModelError::HandleDecoding {
                    reason: format!("missing separator in '{text}'"),
                })?;
        let kind: ResourceKind = kind.parse()?;
        Self::new(kind, natural_id)
    }
}

impl fmt::Display for ReferenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.natural_id)
    }
}
