//! Key encoding for the secondary indices.
//!
//! Both indices use `{owner}\0{doc_id}` so a prefix scan on `{owner}\0`
//! lists every member. Ids may not contain NUL.

use crate::error::StorageError;

const SEP: u8 = 0;

fn encode(owner: &str, member: &str) -> Result<Vec<u8>, StorageError> {
    if owner.as_bytes().contains(&SEP) || member.as_bytes().contains(&SEP) {
        return Err(StorageError::Key(format!(
            "identifier contains NUL: {:?}/{:?}",
            owner, member
        )));
    }
    let mut key = Vec::with_capacity(owner.len() + member.len() + 1);
    key.extend_from_slice(owner.as_bytes());
    key.push(SEP);
    key.extend_from_slice(member.as_bytes());
    Ok(key)
}

fn decode(bytes: &[u8]) -> Result<(String, String), StorageError> {
    let pos = bytes
        .iter()
        .position(|b| *b == SEP)
        .ok_or_else(|| StorageError::Key("missing separator".to_string()))?;
    let owner = std::str::from_utf8(&bytes[..pos])
        .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
    let member = std::str::from_utf8(&bytes[pos + 1..])
        .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
    Ok((owner.to_string(), member.to_string()))
}

fn prefix(owner: &str) -> Vec<u8> {
    let mut key = owner.as_bytes().to_vec();
    key.push(SEP);
    key
}

/// Key in the class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIndexKey {
    pub class: String,
    pub doc_id: String,
}

impl ClassIndexKey {
    pub fn new(class: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            doc_id: doc_id.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        encode(&self.class, &self.doc_id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let (class, doc_id) = decode(bytes)?;
        Ok(Self { class, doc_id })
    }

    /// Prefix covering every document of `class`.
    pub fn prefix(class: &str) -> Vec<u8> {
        prefix(class)
    }
}

/// Key in the attached-document index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedKey {
    pub parent: String,
    pub child: String,
}

impl AttachedKey {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        encode(&self.parent, &self.child)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let (parent, child) = decode(bytes)?;
        Ok(Self { parent, child })
    }

    /// Prefix covering every child of `parent`.
    pub fn prefix(parent: &str) -> Vec<u8> {
        prefix(parent)
    }
}
